//! Change-score severity buckets

use serde::{Deserialize, Serialize};

/// Ordinal classification of a change score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Thresholds mapping a 0-100 change score to a [`Severity`].
///
/// `0 -> none`, `(0, medium_from) -> low`, `[medium_from, high_from) -> medium`,
/// `[high_from, 100] -> high`. Scores are classified before rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub medium_from: f64,
    pub high_from: f64,
}

impl SeverityPolicy {
    /// Pixel noise makes even small visual scores meaningful.
    pub const VISUAL: SeverityPolicy = SeverityPolicy {
        medium_from: 1.0,
        high_from: 5.0,
    };

    /// Text changes are judged more leniently.
    pub const TEXT: SeverityPolicy = SeverityPolicy {
        medium_from: 5.0,
        high_from: 20.0,
    };

    /// Classify the unrounded score. A tiny nonzero change can display as
    /// `0.00` and still be `Low`.
    pub fn classify(&self, score: f64) -> Severity {
        if score.is_nan() || score <= 0.0 {
            Severity::None
        } else if score < self.medium_from {
            Severity::Low
        } else if score < self.high_from {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole` as a percentage; zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_boundaries() {
        let p = SeverityPolicy::TEXT;
        assert_eq!(p.classify(0.0), Severity::None);
        assert_eq!(p.classify(0.01), Severity::Low);
        assert_eq!(p.classify(4.999), Severity::Low);
        assert_eq!(p.classify(5.0), Severity::Medium);
        assert_eq!(p.classify(19.999), Severity::Medium);
        assert_eq!(p.classify(20.0), Severity::High);
        assert_eq!(p.classify(100.0), Severity::High);
    }

    #[test]
    fn test_visual_boundaries() {
        let p = SeverityPolicy::VISUAL;
        assert_eq!(p.classify(0.0), Severity::None);
        assert_eq!(p.classify(0.999), Severity::Low);
        assert_eq!(p.classify(1.0), Severity::Medium);
        assert_eq!(p.classify(4.99), Severity::Medium);
        assert_eq!(p.classify(5.0), Severity::High);
    }

    #[test]
    fn test_unrounded_score_decides() {
        // 19.999 rounds to 20.00 for display but stays medium.
        assert_eq!(round2(19.999), 20.0);
        assert_eq!(SeverityPolicy::TEXT.classify(19.999), Severity::Medium);

        // One changed pixel of 25,000 displays as zero but is still a change.
        let score = percentage(1, 25_000);
        assert_eq!(round2(score), 0.0);
        assert_eq!(SeverityPolicy::VISUAL.classify(score), Severity::Low);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(round2(percentage(1, 3)), 33.33);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::None < Severity::Low);
        assert!(Severity::Medium < Severity::High);
    }
}
