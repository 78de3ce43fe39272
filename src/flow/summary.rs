//! Flow 汇总视图
//!
//! 把会话状态整理成展示层直接可用的形式：月流速、已流出数量、
//! 日期和相对时间。

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::metadata::TokenMetadata;
use super::rate::RateConverter;
use super::types::FlowInfo;

/// 展示用的 flow 汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub account: Address,
    pub contract: Address,
    /// 月流速（token/月，2 位小数）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_rate: Option<Decimal>,
    /// 已流出总量（token，4 位小数）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_streamed: Option<Decimal>,
    /// 已流出总量（最小单位）
    pub total_streamed_raw: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// 例如 "3 minutes ago"
    pub created_ago: String,
    pub updated_ago: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TokenMetadata>,
}

impl FlowSummary {
    pub fn build(
        account: Address,
        contract: Address,
        flow: &FlowInfo,
        monthly_rate: Option<Decimal>,
        metadata: Option<TokenMetadata>,
        converter: &RateConverter,
        now: DateTime<Utc>,
    ) -> Self {
        let created_at = to_datetime(flow.created_at);
        let last_updated = to_datetime(flow.last_updated);

        Self {
            account,
            contract,
            monthly_rate,
            total_streamed: converter.format_token_amount(flow.total_streamed),
            total_streamed_raw: flow.total_streamed,
            created_ago: created_at
                .map(|t| format_relative(t, now))
                .unwrap_or_default(),
            updated_ago: last_updated
                .map(|t| format_relative(t, now))
                .unwrap_or_default(),
            created_at,
            last_updated,
            token_id: flow.token_id,
            metadata,
        }
    }
}

fn to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

/// 相对时间描述（"a few seconds ago"、"5 minutes ago"、"in 2 hours"）
pub fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then).num_seconds();
    let phrase = relative_phrase(delta.unsigned_abs());
    if delta < 0 {
        format!("in {}", phrase)
    } else {
        format!("{} ago", phrase)
    }
}

fn relative_phrase(secs: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 365 * DAY;

    let round = |value: u64, unit: u64| (value + unit / 2) / unit;

    match secs {
        s if s < 45 => "a few seconds".to_string(),
        s if s < 90 => "a minute".to_string(),
        s if s < 45 * MINUTE => format!("{} minutes", round(s, MINUTE)),
        s if s < 90 * MINUTE => "an hour".to_string(),
        s if s < 22 * HOUR => format!("{} hours", round(s, HOUR)),
        s if s < 36 * HOUR => "a day".to_string(),
        s if s < 26 * DAY => format!("{} days", round(s, DAY)),
        s if s < 46 * DAY => "a month".to_string(),
        s if s < 320 * DAY => format!("{} months", round(s, MONTH)),
        s if s < 548 * DAY => "a year".to_string(),
        s => format!("{} years", round(s, YEAR)),
    }
}
