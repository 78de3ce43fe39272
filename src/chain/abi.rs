//! FlowCraft 合约 ABI 绑定

use alloy_primitives::aliases::I96;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolCall, sol};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{FlowMutation, RawFlowInfo};

sol! {
    function createFlowToContract(int96 flowRate) external;
    function updateFlowToContract(int96 flowRate) external;
    function deleteFlowToContract() external;
    function flowInfoByAddress(address account) external view returns (int96 currentFlowRate, uint256 totalStreamed, uint256 createdAt, uint256 lastUpdated, uint256 tokenId);
    function getFlowInfoByAddress(address account) external view returns (int96 currentFlowRate, uint256 totalStreamed, uint256 createdAt, uint256 lastUpdated, uint256 tokenId);
    function tokenURI(uint256 tokenId) external view returns (string);
}

/// flow 信息查询方法名
///
/// 不同部署版本的合约使用不同的方法名，返回值结构相同
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowInfoMethod {
    #[default]
    FlowInfoByAddress,
    GetFlowInfoByAddress,
}

impl FlowInfoMethod {
    pub fn signature(&self) -> &'static str {
        match self {
            FlowInfoMethod::FlowInfoByAddress => flowInfoByAddressCall::SIGNATURE,
            FlowInfoMethod::GetFlowInfoByAddress => getFlowInfoByAddressCall::SIGNATURE,
        }
    }
}

/// 编码写操作 calldata
pub fn encode_mutation(mutation: &FlowMutation) -> anyhow::Result<Bytes> {
    let data = match mutation {
        FlowMutation::Create(rate) => createFlowToContractCall {
            flowRate: to_i96(rate.to_contract_value())?,
        }
        .abi_encode(),
        FlowMutation::Update(rate) => updateFlowToContractCall {
            flowRate: to_i96(rate.to_contract_value())?,
        }
        .abi_encode(),
        FlowMutation::Delete => deleteFlowToContractCall {}.abi_encode(),
    };
    Ok(data.into())
}

/// 编码 flow 信息查询 calldata
pub fn encode_flow_info_call(method: FlowInfoMethod, account: Address) -> Bytes {
    match method {
        FlowInfoMethod::FlowInfoByAddress => flowInfoByAddressCall { account }.abi_encode(),
        FlowInfoMethod::GetFlowInfoByAddress => {
            getFlowInfoByAddressCall { account }.abi_encode()
        }
    }
    .into()
}

/// 解码 flow 信息查询返回值
pub fn decode_flow_info(method: FlowInfoMethod, data: &[u8]) -> anyhow::Result<RawFlowInfo> {
    let (rate, total_streamed, created_at, last_updated, token_id) = match method {
        FlowInfoMethod::FlowInfoByAddress => {
            let ret = flowInfoByAddressCall::abi_decode_returns(data, true)
                .context("解码 flowInfoByAddress 返回值失败")?;
            (
                ret.currentFlowRate,
                ret.totalStreamed,
                ret.createdAt,
                ret.lastUpdated,
                ret.tokenId,
            )
        }
        FlowInfoMethod::GetFlowInfoByAddress => {
            let ret = getFlowInfoByAddressCall::abi_decode_returns(data, true)
                .context("解码 getFlowInfoByAddress 返回值失败")?;
            (
                ret.currentFlowRate,
                ret.totalStreamed,
                ret.createdAt,
                ret.lastUpdated,
                ret.tokenId,
            )
        }
    };

    Ok(RawFlowInfo {
        current_flow_rate: i128::try_from(rate)
            .map_err(|e| anyhow::anyhow!("int96 流速转换失败: {}", e))?,
        total_streamed,
        created_at,
        last_updated,
        token_id,
    })
}

/// 编码 tokenURI 查询 calldata
pub fn encode_token_uri_call(token_id: U256) -> Bytes {
    tokenURICall { tokenId: token_id }.abi_encode().into()
}

/// 解码 tokenURI 返回值
pub fn decode_token_uri(data: &[u8]) -> anyhow::Result<String> {
    let ret = tokenURICall::abi_decode_returns(data, true).context("解码 tokenURI 返回值失败")?;
    Ok(ret._0)
}

fn to_i96(value: i128) -> anyhow::Result<I96> {
    I96::try_from(value).map_err(|e| anyhow::anyhow!("流速 {} 超出 int96 范围: {}", value, e))
}
