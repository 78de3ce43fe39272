//! Ethereum JSON-RPC 实现
//!
//! 读操作走 `eth_call`，写操作由节点/钱包托管账户通过 `eth_sendTransaction` 签名，
//! 确认通过轮询 `eth_getTransactionReceipt` 完成。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::abi::{self, FlowInfoMethod};
use super::{FlowContract, FlowMutation, FlowSigner, RawFlowInfo, TxReceipt};

#[cfg(not(feature = "sensitive-logs"))]
use crate::common::truncate_with_ellipsis;

/// 日志中 RPC 报文的最大长度（未启用 sensitive-logs 时）
#[cfg(not(feature = "sensitive-logs"))]
const MAX_LOGGED_BODY: usize = 256;

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// `eth_getTransactionReceipt` 返回值中用到的字段
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptJson {
    #[serde(default)]
    status: Option<U64>,
    #[serde(default)]
    block_number: Option<U64>,
}

/// JSON-RPC 客户端
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 查询节点所在链的 chain id
    pub async fn chain_id(&self) -> anyhow::Result<u64> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    /// 发送单个 JSON-RPC 请求
    pub async fn request<P, R>(&self, method: &str, params: P) -> anyhow::Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let body = serde_json::to_string(&request).context("序列化 JSON-RPC 请求失败")?;
        tracing::debug!("JSON-RPC 请求 {}: {}", method, log_body(&body));

        let resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("{} 请求发送失败", method))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .with_context(|| format!("{} 读取响应失败", method))?;
        tracing::debug!("JSON-RPC 响应 {} ({}): {}", method, status, log_body(&text));

        if !status.is_success() {
            anyhow::bail!("{} HTTP {}: {}", method, status, text);
        }

        parse_response(method, &text)
    }
}

/// 解析 JSON-RPC 响应体
fn parse_response<R: DeserializeOwned>(method: &str, text: &str) -> anyhow::Result<R> {
    let response: RpcResponse =
        serde_json::from_str(text).with_context(|| format!("{} 响应不是合法的 JSON-RPC", method))?;

    if let Some(err) = response.error {
        match err.data {
            Some(data) => anyhow::bail!(
                "{} 失败 (code {}): {} {}",
                method,
                err.code,
                err.message,
                data
            ),
            None => anyhow::bail!("{} 失败 (code {}): {}", method, err.code, err.message),
        }
    }

    serde_json::from_value(response.result).with_context(|| format!("{} 返回值格式错误", method))
}

#[cfg(feature = "sensitive-logs")]
fn log_body(body: &str) -> &str {
    body
}

#[cfg(not(feature = "sensitive-logs"))]
fn log_body(body: &str) -> String {
    truncate_with_ellipsis(body, MAX_LOGGED_BODY)
}

/// 通过 JSON-RPC 访问的 FlowCraft 合约
pub struct JsonRpcContract {
    rpc: Arc<JsonRpcClient>,
    address: Address,
    flow_info_method: FlowInfoMethod,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl JsonRpcContract {
    pub fn new(rpc: Arc<JsonRpcClient>, address: Address, flow_info_method: FlowInfoMethod) -> Self {
        Self {
            rpc,
            address,
            flow_info_method,
            poll_interval: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(180),
        }
    }

    /// 设置回执轮询间隔和确认超时
    pub fn with_confirmation(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.confirmation_timeout = timeout;
        self
    }

    async fn eth_call(&self, data: Bytes) -> anyhow::Result<Bytes> {
        self.rpc
            .request(
                "eth_call",
                json!([{ "to": self.address, "data": data }, "latest"]),
            )
            .await
    }

    async fn poll_receipt(&self, tx_hash: B256) -> anyhow::Result<TxReceipt> {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            let receipt: Option<ReceiptJson> = self
                .rpc
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            match receipt {
                Some(receipt) => return interpret_receipt(tx_hash, receipt),
                None => tracing::debug!("交易 {} 尚未上链，继续等待", tx_hash),
            }
        }
    }
}

/// 根据回执判断交易是否成功
fn interpret_receipt(tx_hash: B256, receipt: ReceiptJson) -> anyhow::Result<TxReceipt> {
    // 拜占庭分叉之前的回执没有 status 字段，视为成功
    if receipt.status == Some(U64::ZERO) {
        anyhow::bail!("交易 {} 已回滚", tx_hash);
    }
    Ok(TxReceipt {
        tx_hash,
        block_number: receipt.block_number.map(|n| n.to::<u64>()),
    })
}

#[async_trait]
impl FlowContract for JsonRpcContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn flow_info_by_address(&self, account: Address) -> anyhow::Result<RawFlowInfo> {
        let data = abi::encode_flow_info_call(self.flow_info_method, account);
        let output = self
            .eth_call(data)
            .await
            .with_context(|| format!("{} 调用失败", self.flow_info_method.signature()))?;
        abi::decode_flow_info(self.flow_info_method, &output)
    }

    async fn token_uri(&self, token_id: U256) -> anyhow::Result<String> {
        let output = self
            .eth_call(abi::encode_token_uri_call(token_id))
            .await
            .context("tokenURI 调用失败")?;
        abi::decode_token_uri(&output)
    }

    async fn submit(
        &self,
        signer: &dyn FlowSigner,
        mutation: FlowMutation,
    ) -> anyhow::Result<B256> {
        let data = abi::encode_mutation(&mutation)?;
        signer.send_transaction(self.address, data).await
    }

    async fn wait_for_confirmation(&self, tx_hash: B256) -> anyhow::Result<TxReceipt> {
        tokio::time::timeout(self.confirmation_timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "等待交易 {} 确认超时（{} 秒）",
                    tx_hash,
                    self.confirmation_timeout.as_secs()
                )
            })?
    }
}

/// 由节点托管账户签名的签名者
///
/// 私钥保存在节点或钱包中，这里只发送 `eth_sendTransaction`
pub struct RpcSigner {
    rpc: Arc<JsonRpcClient>,
    from: Address,
}

impl RpcSigner {
    pub fn new(rpc: Arc<JsonRpcClient>, from: Address) -> Self {
        Self { rpc, from }
    }
}

#[async_trait]
impl FlowSigner for RpcSigner {
    fn address(&self) -> Address {
        self.from
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> anyhow::Result<B256> {
        self.rpc
            .request(
                "eth_sendTransaction",
                json!([{ "from": self.from, "to": to, "data": data }]),
            )
            .await
            .context("eth_sendTransaction 失败")
    }
}
