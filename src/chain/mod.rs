//! 链上协作方
//!
//! Input: RPC 节点、钱包签名能力
//! Output: `FlowContract` / `FlowSigner` 抽象及 JSON-RPC 实现
//! Pos: Flow 会话与链之间的边界

pub mod abi;
pub mod rpc;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;

use crate::flow::FlowRate;

pub use rpc::{JsonRpcClient, JsonRpcContract, RpcSigner};

/// `flowInfoByAddress` 的原始返回值（未做任何归一化）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFlowInfo {
    /// int96
    pub current_flow_rate: i128,
    pub total_streamed: U256,
    pub created_at: U256,
    pub last_updated: U256,
    pub token_id: U256,
}

/// 合约写操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMutation {
    Create(FlowRate),
    Update(FlowRate),
    Delete,
}

/// 已上链交易的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// 钱包签名能力（绑定到一个账户）
#[async_trait]
pub trait FlowSigner: Send + Sync {
    /// 签名者账户地址
    fn address(&self) -> Address;

    /// 签名并广播交易，返回交易哈希
    async fn send_transaction(&self, to: Address, data: Bytes) -> anyhow::Result<B256>;
}

/// FlowCraft 合约的读写接口
#[async_trait]
pub trait FlowContract: Send + Sync {
    /// 合约地址
    fn address(&self) -> Address;

    /// 查询账户的 flow 信息
    async fn flow_info_by_address(&self, account: Address) -> anyhow::Result<RawFlowInfo>;

    /// 查询 NFT 的 tokenURI
    async fn token_uri(&self, token_id: U256) -> anyhow::Result<String>;

    /// 通过签名者提交写操作，返回交易哈希
    async fn submit(&self, signer: &dyn FlowSigner, mutation: FlowMutation)
    -> anyhow::Result<B256>;

    /// 等待交易上链确认（回滚视为错误）
    async fn wait_for_confirmation(&self, tx_hash: B256) -> anyhow::Result<TxReceipt>;
}

/// 钱包连接状态
///
/// 未连接时不持有签名者
#[derive(Clone, Default)]
pub struct Wallet {
    signer: Option<Arc<dyn FlowSigner>>,
}

impl Wallet {
    pub fn connected(signer: Arc<dyn FlowSigner>) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    pub fn disconnected() -> Self {
        Self { signer: None }
    }

    pub fn account(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    pub fn signer(&self) -> Option<&Arc<dyn FlowSigner>> {
        self.signer.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.signer.is_some()
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("account", &self.account())
            .finish()
    }
}
