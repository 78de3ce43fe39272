//! 流速换算
//!
//! 展示流速：每月多少个 token（十进制，保留 2 位小数）
//! 合约流速：每秒多少个最小单位（整数，int96）
//!
//! 合约方向全程使用整数运算，只有展示方向做一次定精度舍入。

use std::str::FromStr;

use alloy_primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::error::FlowError;

/// 一个"月"的秒数（30.41 天的日历近似值，两个换算方向必须一致）
pub const SECONDS_PER_MONTH: u64 = 2_628_000;

/// 支持的最大 token 精度
pub const MAX_TOKEN_DECIMALS: u8 = 36;

/// 展示流速保留的小数位
pub const DISPLAY_SCALE: u32 = 2;

/// token 数量展示保留的小数位
pub const AMOUNT_SCALE: u32 = 4;

/// 展示方向中间舍入的最大保护精度
const MAX_GUARD_SCALE: u32 = 6;

/// int96 最大值（合约 flowRate 参数类型）
const MAX_FLOW_RATE: u128 = (1u128 << 95) - 1;

/// 合约流速（最小单位/秒）
///
/// 非负，且不超过 int96 上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowRate(U256);

impl FlowRate {
    pub const ZERO: FlowRate = FlowRate(U256::ZERO);

    /// 从每秒最小单位数构造
    pub fn from_units_per_second(units: U256) -> Result<Self, FlowError> {
        if units > U256::from(MAX_FLOW_RATE) {
            return Err(FlowError::InvalidRate(format!(
                "{} units/s exceeds the int96 flow rate limit",
                units
            )));
        }
        Ok(Self(units))
    }

    /// 从合约返回的 int96 原始值构造（负数视为非法）
    pub fn from_contract_value(raw: i128) -> Result<Self, FlowError> {
        if raw < 0 {
            return Err(FlowError::InvalidRate(format!(
                "negative contract flow rate {}",
                raw
            )));
        }
        Self::from_units_per_second(U256::from(raw as u128))
    }

    /// 每秒最小单位数
    pub fn units_per_second(&self) -> U256 {
        self.0
    }

    /// 作为合约 int96 参数的值
    pub fn to_contract_value(&self) -> i128 {
        // 构造时已保证不超过 int96 上限
        low_u128(&self.0).map(|v| v as i128).unwrap_or(MAX_FLOW_RATE as i128)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::fmt::Display for FlowRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} units/s", self.0)
    }
}

/// 流速换算器
///
/// 持有 token 精度，两个方向共用同一个 [`SECONDS_PER_MONTH`] 和舍入规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConverter {
    token_decimals: u8,
}

impl RateConverter {
    pub fn new(token_decimals: u8) -> Result<Self, FlowError> {
        if token_decimals > MAX_TOKEN_DECIMALS {
            return Err(FlowError::InvalidRate(format!(
                "token decimals {} exceeds the supported maximum {}",
                token_decimals, MAX_TOKEN_DECIMALS
            )));
        }
        Ok(Self { token_decimals })
    }

    pub fn token_decimals(&self) -> u8 {
        self.token_decimals
    }

    /// 展示流速（token/月）→ 合约流速（最小单位/秒）
    ///
    /// `floor(display * 10^decimals / SECONDS_PER_MONTH)`，全程整数运算
    pub fn to_contract_rate(&self, display: Decimal) -> Result<FlowRate, FlowError> {
        if display.is_sign_negative() && !display.is_zero() {
            return Err(FlowError::InvalidRate(format!(
                "flow rate must not be negative: {}",
                display
            )));
        }

        // display = mantissa / 10^scale
        let mantissa = U256::from(display.mantissa().unsigned_abs());
        let numerator = mantissa * pow10(self.token_decimals as u32);
        let denominator = pow10(display.scale()) * U256::from(SECONDS_PER_MONTH);

        FlowRate::from_units_per_second(numerator / denominator)
    }

    /// 合约流速（最小单位/秒）→ 展示流速（token/月）
    ///
    /// `round(rate * SECONDS_PER_MONTH / 10^decimals, 2)`，四舍五入；零输入返回 0
    pub fn to_display_rate(&self, rate: &FlowRate) -> Result<Decimal, FlowError> {
        if rate.is_zero() {
            return Ok(Decimal::new(0, DISPLAY_SCALE));
        }

        // 先舍入到保护精度，吸收合约方向 floor 带来的误差，再舍入到展示精度
        let guard = self.guard_scale();
        let numerator = rate.units_per_second() * U256::from(SECONDS_PER_MONTH) * pow10(guard);
        let guarded = div_round_half_up(numerator, pow10(self.token_decimals as u32));
        let cents = div_round_half_up(guarded, pow10(guard - DISPLAY_SCALE));

        low_u128(&cents)
            .and_then(|c| i128::try_from(c).ok())
            .and_then(|c| Decimal::try_from_i128_with_scale(c, DISPLAY_SCALE).ok())
            .ok_or_else(|| {
                FlowError::InvalidRate(format!("{} is out of the display range", rate))
            })
    }

    /// 展示方向的中间舍入精度
    ///
    /// floor 误差上限为 `SECONDS_PER_MONTH / 10^decimals` (< 10^(7 - decimals))，
    /// 保护精度取 `decimals - 7`，限制在 [`DISPLAY_SCALE`, `MAX_GUARD_SCALE`] 之间
    fn guard_scale(&self) -> u32 {
        (self.token_decimals as u32)
            .saturating_sub(7)
            .clamp(DISPLAY_SCALE, MAX_GUARD_SCALE)
    }

    /// 最小单位数量 → token 数量（保留 4 位小数，超出十进制范围时返回 None）
    pub fn format_token_amount(&self, amount: U256) -> Option<Decimal> {
        let scaled = amount.checked_mul(pow10(AMOUNT_SCALE))?;
        let units = div_round_half_up(scaled, pow10(self.token_decimals as u32));
        let units = i128::try_from(low_u128(&units)?).ok()?;
        Decimal::try_from_i128_with_scale(units, AMOUNT_SCALE).ok()
    }
}

/// 解析用户输入的展示流速
///
/// 空输入、非数字、NaN/Infinity、负数均返回 `InvalidRate`
pub fn parse_display_rate(input: &str) -> Result<Decimal, FlowError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FlowError::InvalidRate("Please enter flow rate".to_string()));
    }

    let lowered = trimmed.to_ascii_lowercase();
    let unsigned = lowered.trim_start_matches(['+', '-']);
    if unsigned == "nan" || unsigned.starts_with("inf") {
        return Err(FlowError::InvalidRate(format!(
            "flow rate must be a finite number: {}",
            trimmed
        )));
    }

    let value = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| FlowError::InvalidRate(format!("not a number: {}", trimmed)))?;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(FlowError::InvalidRate(format!(
            "flow rate must not be negative: {}",
            trimmed
        )));
    }
    Ok(value)
}

/// 从浮点数构造展示流速（非有限值或负数返回 `InvalidRate`）
pub fn display_rate_from_f64(value: f64) -> Result<Decimal, FlowError> {
    if !value.is_finite() {
        return Err(FlowError::InvalidRate(format!(
            "flow rate must be a finite number: {}",
            value
        )));
    }
    if value < 0.0 {
        return Err(FlowError::InvalidRate(format!(
            "flow rate must not be negative: {}",
            value
        )));
    }
    Decimal::try_from(value)
        .map_err(|e| FlowError::InvalidRate(format!("{} is not representable: {}", value, e)))
}

/// 按展示精度四舍五入（与 `to_display_rate` 的舍入规则一致）
pub fn round_display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

fn div_round_half_up(numerator: U256, denominator: U256) -> U256 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder * U256::from(2u64) >= denominator {
        quotient + U256::from(1u64)
    } else {
        quotient
    }
}

/// 取低 128 位（高位非零时返回 None）
fn low_u128(value: &U256) -> Option<u128> {
    let limbs = value.as_limbs();
    if limbs[2] != 0 || limbs[3] != 0 {
        return None;
    }
    Some((limbs[0] as u128) | ((limbs[1] as u128) << 64))
}
