use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

/// Percent change from `prev` to `current`; zero when either side is zero.
pub fn percent_change(current: f64, prev: f64) -> f64 {
    if current == 0.0 || prev == 0.0 {
        return 0.0;
    }
    (current / prev - 1.0) * 100.0
}

/// One-decimal percent with an explicit sign: 1.23 → "+1.2%", -0.5 → "-0.5%".
pub fn percent_format(input: f64) -> String {
    if input >= 0.0 {
        format!("+{:.1}%", input)
    } else {
        format!("{:.1}%", input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
    }

    #[test]
    fn test_percent_change() {
        assert!((percent_change(46.0, 40.0) - 15.0).abs() < 1e-9);
        assert_eq!(percent_change(0.0, 40.0), 0.0);
        assert_eq!(percent_change(46.0, 0.0), 0.0);
    }

    #[test]
    fn test_percent_format() {
        assert_eq!(percent_format(1.23), "+1.2%");
        assert_eq!(percent_format(-0.5), "-0.5%");
        assert_eq!(percent_format(0.0), "+0.0%");
    }
}
