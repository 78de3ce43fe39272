//! 公共工具模块

use std::borrow::Cow;

/// 在不超过 `max_bytes` 的最近字符边界处截断 UTF-8 字符串
pub fn truncate_str_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let end = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..end]
}

/// 截断字符串并添加 `...` 后缀（用于日志和错误信息）
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    match truncate_for_log(s, max_bytes) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

/// 同 [`truncate_with_ellipsis`]，未截断时不分配
pub fn truncate_for_log(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }

    // 为省略号预留空间
    let keep = max_bytes.saturating_sub(3);
    Cow::Owned(format!("{}...", truncate_str_safe(s, keep)))
}

/// 缩写十六进制标识（地址、交易哈希），例如 `0x1234…abcd`
pub fn short_hex(value: &str) -> String {
    if value.len() <= 12 || !value.is_ascii() {
        return value.to_string();
    }
    format!("{}…{}", &value[..6], &value[value.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_safe_respects_char_boundary() {
        let s = "流速换算";
        // 每个汉字 3 字节，4 字节处不是字符边界
        assert_eq!(truncate_str_safe(s, 4), "流");
        assert_eq!(truncate_str_safe(s, 100), s);
        assert_eq!(truncate_str_safe(s, 0), "");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("0123456789abcdef", 10), "0123456...");
    }

    #[test]
    fn test_truncate_for_log_borrows_short_input() {
        assert!(matches!(truncate_for_log("abc", 10), Cow::Borrowed("abc")));
    }

    #[test]
    fn test_short_hex() {
        assert_eq!(
            short_hex("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234…5678"
        );
        assert_eq!(short_hex("0x1234"), "0x1234");
    }
}
