//! Progress parsing for renderer output.

use std::sync::OnceLock;

use regex::Regex;

fn percent_regex() -> &'static Regex {
    static PERCENT: OnceLock<Regex> = OnceLock::new();
    PERCENT.get_or_init(|| Regex::new(r"(\d{1,3})(?:\.\d+)?\s?%").expect("valid percent regex"))
}

/// Extract a percentage token (`NN%`) from one line of renderer output.
///
/// The last token on the line wins; values above 100 are ignored. Lines
/// without a token yield `None`, which callers treat as "no progress".
pub fn parse_percentage(line: &str) -> Option<u8> {
    percent_regex()
        .captures_iter(line)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u8>().ok())
        .filter(|value| *value <= 100)
        .last()
}

/// Forwards only strictly increasing percentages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    /// Feed a line; returns the new fraction if it advanced.
    pub fn observe_line(&mut self, line: &str) -> Option<f64> {
        parse_percentage(line).and_then(|value| self.observe(value))
    }

    /// Feed a percentage; returns the new fraction if it advanced.
    pub fn observe(&mut self, percent: u8) -> Option<f64> {
        if percent > self.last {
            self.last = percent;
            Some(percent as f64 / 100.0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage("Rendering frames 45%"), Some(45));
        assert_eq!(parse_percentage("Rendered 12/60 (20%)"), Some(20));
        assert_eq!(parse_percentage("Encoding 7.5% done"), Some(7));
        assert_eq!(parse_percentage("bundling 100 %"), Some(100));
        assert_eq!(parse_percentage("frames 10% encoded 30%"), Some(30));
    }

    #[test]
    fn test_parse_percentage_ignores_noise() {
        assert_eq!(parse_percentage("Bundling project..."), None);
        assert_eq!(parse_percentage(""), None);
        assert_eq!(parse_percentage("weird 250% value"), None);
        assert_eq!(parse_percentage("percent sign alone %"), None);
    }

    #[test]
    fn test_tracker_is_monotonic() {
        let mut tracker = ProgressTracker::default();
        let lines = ["5%", "noise", "30%", "20%", "30%", "100%", "99%"];
        let emitted: Vec<f64> = lines
            .iter()
            .filter_map(|line| tracker.observe_line(line))
            .collect();

        assert_eq!(emitted, vec![0.05, 0.30, 1.0]);
    }

    #[test]
    fn test_tracker_does_not_emit_zero() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.observe(0), None);
        assert_eq!(tracker.observe(1), Some(0.01));
    }
}
