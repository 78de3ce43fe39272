//! Flow 会话数据类型

use alloy_primitives::{Address, B256, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::error::FlowError;
use super::metadata::TokenMetadata;
use super::rate::FlowRate;

/// 单个账户在合约上的 flow 快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowInfo {
    pub current_flow_rate: FlowRate,
    /// 已流出总量（最小单位）
    pub total_streamed: U256,
    /// 创建时间（Unix 秒）
    pub created_at: u64,
    /// 最后更新时间（Unix 秒）
    pub last_updated: u64,
    pub token_id: Option<U256>,
}

/// 一次读取的结果
///
/// `sequence` 在读取发起时分配，用于丢弃过期结果
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub account: Address,
    pub sequence: u64,
    /// None 表示该账户没有 flow
    pub flow: Option<FlowInfo>,
    /// 当前流速的展示值（token/月）
    pub display_rate: Option<Decimal>,
    pub metadata: Option<TokenMetadata>,
}

/// 用户发起的交易请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRequest {
    Create(FlowRate),
    Update(FlowRate),
    Delete,
}

impl TransactionRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            TransactionRequest::Create(_) => OperationKind::Create,
            TransactionRequest::Update(_) => OperationKind::Update,
            TransactionRequest::Delete => OperationKind::Delete,
        }
    }
}

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已结束操作的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { tx_hash: B256 },
    Failure(FlowError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// 交易操作状态机
///
/// `Idle → Submitting → AwaitingConfirmation → Settled`，
/// 调用方确认结果后回到 `Idle`。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    Submitting {
        id: Uuid,
        kind: OperationKind,
    },
    AwaitingConfirmation {
        id: Uuid,
        kind: OperationKind,
        tx_hash: B256,
    },
    Settled {
        id: Uuid,
        kind: OperationKind,
        outcome: Outcome,
    },
}

impl OperationState {
    /// 是否有交易处于提交或等待确认中
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OperationState::Submitting { .. } | OperationState::AwaitingConfirmation { .. }
        )
    }

    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            OperationState::Idle => None,
            OperationState::Submitting { kind, .. }
            | OperationState::AwaitingConfirmation { kind, .. }
            | OperationState::Settled { kind, .. } => Some(*kind),
        }
    }

    pub fn operation_id(&self) -> Option<Uuid> {
        match self {
            OperationState::Idle => None,
            OperationState::Submitting { id, .. }
            | OperationState::AwaitingConfirmation { id, .. }
            | OperationState::Settled { id, .. } => Some(*id),
        }
    }
}

/// 已结束的操作
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub id: Uuid,
    pub account: Address,
    pub kind: OperationKind,
    pub outcome: Outcome,
    /// 确认后的刷新结果（交易失败时不刷新）
    pub refreshed: Option<Result<FlowSnapshot, FlowError>>,
}
