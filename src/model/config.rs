use alloy_primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::abi::FlowInfoMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TlsBackend {
    #[default]
    Rustls,
    NativeTls,
}

/// FlowCraft 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// JSON-RPC 节点地址
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// FlowCraft 合约地址（必须配置）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// 流动 token 精度
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,

    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,

    /// 查询 flow 信息使用的合约方法
    #[serde(default)]
    pub flow_info_method: FlowInfoMethod,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// 等待交易确认时的轮询间隔（毫秒）
    #[serde(default = "default_confirmation_poll_interval_ms")]
    pub confirmation_poll_interval_ms: u64,

    /// 等待交易确认的最长时间（秒），超时按失败结束
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default)]
    pub tls_backend: TlsBackend,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Webhook 通知 URL（可选，交易结束时发送 HTTP POST 通知）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Webhook 通知 JSON 模板（可选，支持变量占位符）
    /// 可用变量: {{operation_id}}, {{account}}, {{operation}}, {{status}},
    ///          {{tx_hash}}, {{error}}, {{timestamp}}
    /// 未配置时使用内置默认格式
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_body: Option<String>,

    /// 默认钱包账户（节点托管的解锁账户）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_rpc_url() -> String {
    "https://sepolia.optimism.io".to_string()
}

fn default_chain_id() -> u64 {
    11_155_420
}

fn default_token_decimals() -> u8 {
    18
}

fn default_token_symbol() -> String {
    "fDAIx".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_confirmation_poll_interval_ms() -> u64 {
    1000
}

fn default_confirmation_timeout_secs() -> u64 {
    180
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            contract_address: None,
            chain_id: default_chain_id(),
            token_decimals: default_token_decimals(),
            token_symbol: default_token_symbol(),
            flow_info_method: FlowInfoMethod::default(),
            request_timeout_secs: default_request_timeout_secs(),
            confirmation_poll_interval_ms: default_confirmation_poll_interval_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            tls_backend: TlsBackend::default(),
            proxy_url: None,
            webhook_url: None,
            webhook_body: None,
            account: None,
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 合约地址（未配置时报错）
    pub fn require_contract_address(&self) -> anyhow::Result<Address> {
        self.contract_address
            .ok_or_else(|| anyhow::anyhow!("未配置 contractAddress"))
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// 将当前配置写回原始配置文件
    pub fn save(&self) -> anyhow::Result<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("配置文件路径未知，无法保存配置"))?;

        let content = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }
}
