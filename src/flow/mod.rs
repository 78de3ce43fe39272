//! Flow 会话控制
//!
//! - [`rate`]: 展示流速与合约流速的换算
//! - [`metadata`]: tokenURI 元数据解码
//! - [`reader`]: 读取并归一化链上 flow 状态
//! - [`controller`]: create / update / delete 交易生命周期
//! - [`session`]: 对外门面，维护最新状态并丢弃过期读取

pub mod controller;
pub mod error;
pub mod metadata;
pub mod rate;
pub mod reader;
pub mod session;
pub mod summary;
pub mod types;

pub use controller::FlowTransactionController;
pub use error::FlowError;
pub use metadata::{AttributeValue, TokenAttribute, TokenMetadata};
pub use rate::{FlowRate, RateConverter, SECONDS_PER_MONTH, parse_display_rate};
pub use reader::FlowStateReader;
pub use session::{FlowSession, SessionEvent, SettledOperation};
pub use summary::FlowSummary;
pub use types::{
    FlowInfo, FlowSnapshot, OperationKind, OperationState, Outcome, Settlement,
    TransactionRequest,
};
