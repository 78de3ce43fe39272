//! FlowCraft 流支付会话控制
//!
//! 读取账户在 FlowCraft 合约上的 flow，换算展示流速，
//! 并管理 create / update / delete 交易的生命周期。

pub mod chain;
pub mod common;
pub mod flow;
pub mod http_client;
pub mod model;
pub mod webhook;
