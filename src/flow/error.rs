//! Flow 会话错误类型

use super::types::OperationKind;

/// Flow 会话错误
///
/// 校验类错误（`InvalidRate`、`WalletNotConnected`、`NoActiveFlow`、`OperationInProgress`）
/// 在发起任何网络请求之前同步返回；`Rpc` 和 `MalformedMetadata` 来自异步调用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// 流速输入无效（为空、为零、为负、非数字或超出 int96 范围）
    InvalidRate(String),
    /// 钱包未连接（没有账户或签名能力）
    WalletNotConnected,
    /// 当前账户没有进行中的 flow
    NoActiveFlow,
    /// 已有交易处于提交或等待确认状态
    OperationInProgress(OperationKind),
    /// tokenURI 返回的元数据无法解码
    MalformedMetadata(String),
    /// RPC 或合约调用失败
    Rpc(String),
}

impl FlowError {
    /// 将协作方返回的 anyhow 错误包装为 RPC 错误（保留完整错误链）
    pub fn rpc(err: anyhow::Error) -> Self {
        FlowError::Rpc(format!("{:#}", err))
    }

    /// 是否为校验类错误（未触达网络）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidRate(_)
                | FlowError::WalletNotConnected
                | FlowError::NoActiveFlow
                | FlowError::OperationInProgress(_)
        )
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::InvalidRate(reason) => write!(f, "Invalid flow rate: {}", reason),
            FlowError::WalletNotConnected => write!(f, "Please connect wallet first"),
            FlowError::NoActiveFlow => write!(f, "No flow found open to contract"),
            FlowError::OperationInProgress(kind) => {
                write!(f, "Another {} operation is still in progress", kind)
            }
            FlowError::MalformedMetadata(reason) => {
                write!(f, "Malformed token metadata: {}", reason)
            }
            FlowError::Rpc(reason) => write!(f, "RPC error: {}", reason),
        }
    }
}

impl std::error::Error for FlowError {}
