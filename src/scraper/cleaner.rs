//! Best-effort numeric parsing for scraped tokens.
//!
//! Policy: these functions never fail upward. A token that cannot be parsed
//! yields 0, so callers cannot distinguish "zero because absent" from "zero
//! because malformed" — if that distinction matters, check the raw cell text
//! before converting.

/// Parse a float token, tolerating "%" and thousands separators.
/// "12.3%" → 12.3 | "1,234.56" → 1234.56 | garbage → 0.0
pub fn parse_float(s: &str) -> f64 {
    let cleaned = s.trim().replace('%', "").replace(',', "");
    cleaned.parse().unwrap_or(0.0)
}

/// Parse an integer token with a trailing K/M/B scale suffix
/// (case-sensitive, as the upstream pages print them).
/// "1.5K" → 1500 | "2M" → 2000000 | "N/A" → 0 | "12345" → 12345
pub fn parse_scaled_int(s: &str) -> i64 {
    let s = s.trim().replace(',', "");
    if s.is_empty() || s.contains("N/A") {
        return 0;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('B') {
        (n, 1_000_000_000.0)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1_000_000.0)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1_000.0)
    } else {
        (s.as_str(), 1.0)
    };

    match num_str.trim().parse::<f64>() {
        Ok(f) => (f * multiplier) as i64,
        Err(_) => 0,
    }
}

/// Zero-pad a stock code to the 5-digit wire format. 5 → "00005"
pub fn pad_code(code: u32) -> String {
    format!("{:05}", code)
}

/// "00301.HK" → "00301"
pub fn strip_hk_suffix(s: &str) -> String {
    s.trim().replace(".HK", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("12.3%"), 12.3);
        assert_eq!(parse_float("-0.5"), -0.5);
        assert_eq!(parse_float("1,234.56"), 1234.56);
        assert_eq!(parse_float("garbage"), 0.0);
        assert_eq!(parse_float(""), 0.0);
        assert_eq!(parse_float("N/A"), 0.0);
    }

    #[test]
    fn test_parse_scaled_int() {
        assert_eq!(parse_scaled_int("1.5K"), 1_500);
        assert_eq!(parse_scaled_int("2M"), 2_000_000);
        assert_eq!(parse_scaled_int("1.2B"), 1_200_000_000);
        assert_eq!(parse_scaled_int("N/A"), 0);
        assert_eq!(parse_scaled_int("12345"), 12_345);
        assert_eq!(parse_scaled_int("garbage"), 0);
        // Suffix is case-sensitive: lowercase is not a scale marker.
        assert_eq!(parse_scaled_int("1.5k"), 0);
    }

    #[test]
    fn test_pad_code() {
        assert_eq!(pad_code(5), "00005");
        assert_eq!(pad_code(9988), "09988");
    }

    #[test]
    fn test_strip_hk_suffix() {
        assert_eq!(strip_hk_suffix("00301.HK"), "00301");
        assert_eq!(strip_hk_suffix(" 00005.HK "), "00005");
        assert_eq!(strip_hk_suffix("00005"), "00005");
    }
}
