//! tokenURI 元数据解码
//!
//! 合约的 `tokenURI` 返回 `<scheme>,<base64 JSON>` 形式的 data URI，
//! 例如 `data:application/json;base64,eyJuYW1lIjoi...`

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use super::error::FlowError;
use crate::common::truncate_with_ellipsis;

/// 错误信息中引用原始输入的最大长度
const MAX_ERROR_SNIPPET: usize = 64;

/// NFT 元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub description: String,
    /// 图片 URI
    pub image: String,
    /// 属性列表（缺失时为空）
    #[serde(default)]
    pub attributes: Vec<TokenAttribute>,
}

/// 单个 NFT 属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAttribute {
    pub trait_type: String,
    pub value: AttributeValue,
}

/// 属性值：字符串或数字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// 解码 data URI 为 [`TokenMetadata`]
///
/// 以第一个逗号分割，逗号之后按标准 base64 解码并解析 JSON。
/// 解码要么完整成功，要么返回 `MalformedMetadata`。
pub fn decode(data_uri: &str) -> Result<TokenMetadata, FlowError> {
    let (scheme, payload) = data_uri.split_once(',').ok_or_else(|| {
        FlowError::MalformedMetadata(format!(
            "missing ',' separator in {:?}",
            truncate_with_ellipsis(data_uri, MAX_ERROR_SNIPPET)
        ))
    })?;

    if !scheme.ends_with(";base64") {
        tracing::debug!("tokenURI scheme 未声明 base64 编码: {}", scheme);
    }

    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| FlowError::MalformedMetadata(format!("invalid base64 payload: {}", e)))?;

    let text = String::from_utf8(bytes)
        .map_err(|e| FlowError::MalformedMetadata(format!("payload is not UTF-8: {}", e)))?;

    serde_json::from_str::<TokenMetadata>(&text)
        .map_err(|e| FlowError::MalformedMetadata(format!("invalid metadata record: {}", e)))
}
