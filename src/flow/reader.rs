//! Flow 状态读取
//!
//! 查询合约上的 flow 信息，归一化原始元组，并在有 NFT 时解码元数据。
//! 每次读取在发起时分配递增序号，供会话丢弃过期结果。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, U256};

use super::error::FlowError;
use super::metadata::{self, TokenMetadata};
use super::rate::{FlowRate, RateConverter};
use super::types::{FlowInfo, FlowSnapshot};
use crate::chain::{FlowContract, RawFlowInfo, Wallet};

/// Flow 状态读取器
pub struct FlowStateReader {
    contract: Arc<dyn FlowContract>,
    converter: RateConverter,
    next_sequence: AtomicU64,
}

impl FlowStateReader {
    pub fn new(contract: Arc<dyn FlowContract>, converter: RateConverter) -> Self {
        Self {
            contract,
            converter,
            next_sequence: AtomicU64::new(1),
        }
    }

    pub fn contract(&self) -> &Arc<dyn FlowContract> {
        &self.contract
    }

    pub fn converter(&self) -> &RateConverter {
        &self.converter
    }

    /// 分配一个读取序号（严格递增）
    pub fn reserve_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// 读取钱包当前账户的 flow
    ///
    /// 未连接钱包时在任何网络请求之前返回 `WalletNotConnected`
    pub async fn read_flow(&self, wallet: &Wallet) -> Result<FlowSnapshot, FlowError> {
        let account = wallet.account().ok_or(FlowError::WalletNotConnected)?;
        self.read_account(account).await
    }

    /// 读取指定账户的 flow
    pub async fn read_account(&self, account: Address) -> Result<FlowSnapshot, FlowError> {
        let sequence = self.reserve_sequence();
        tracing::debug!("读取 flow 信息: account={}, seq={}", account, sequence);

        let raw = self
            .contract
            .flow_info_by_address(account)
            .await
            .map_err(FlowError::rpc)?;

        let flow = normalize_flow_info(raw)?;

        let display_rate = match &flow {
            Some(info) => Some(self.converter.to_display_rate(&info.current_flow_rate)?),
            None => None,
        };

        let metadata = match flow.as_ref().and_then(|f| f.token_id) {
            Some(token_id) => self.read_metadata(token_id).await,
            None => None,
        };

        Ok(FlowSnapshot {
            account,
            sequence,
            flow,
            display_rate,
            metadata,
        })
    }

    /// 读取并解码 NFT 元数据
    ///
    /// 元数据问题不应掩盖有效的 flow，失败时只记录警告
    async fn read_metadata(&self, token_id: U256) -> Option<TokenMetadata> {
        let uri = match self.contract.token_uri(token_id).await {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!("获取 tokenURI 失败 (token #{}): {:#}", token_id, e);
                return None;
            }
        };

        match metadata::decode(&uri) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!("解码 token #{} 元数据失败: {}", token_id, e);
                None
            }
        }
    }
}

/// 归一化合约返回的原始元组
///
/// `createdAt == 0` 表示没有 flow，返回 None 而不是全零记录
pub fn normalize_flow_info(raw: RawFlowInfo) -> Result<Option<FlowInfo>, FlowError> {
    if raw.created_at.is_zero() {
        return Ok(None);
    }

    let current_flow_rate = FlowRate::from_contract_value(raw.current_flow_rate)
        .map_err(|e| FlowError::Rpc(format!("contract returned {}", e)))?;

    Ok(Some(FlowInfo {
        current_flow_rate,
        total_streamed: raw.total_streamed,
        created_at: to_timestamp(raw.created_at, "createdAt")?,
        last_updated: to_timestamp(raw.last_updated, "lastUpdated")?,
        token_id: Some(raw.token_id),
    }))
}

fn to_timestamp(value: U256, field: &str) -> Result<u64, FlowError> {
    u64::try_from(value)
        .map_err(|_| FlowError::Rpc(format!("{} {} is not a valid timestamp", field, value)))
}
