use serde::Serialize;

use crate::config::RecognitionConfig;
use crate::recognition::error::RecognitionError;
use crate::recognition::{RawRecognition, RecognitionResult};

/// Share of Japanese script above which text is considered Japanese.
const JAPANESE_RATIO: f32 = 0.1;

fn is_japanese(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{4E00}'..='\u{9FAF}')
}

/// Summary statistics included in success notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextStats {
    pub chars: usize,
    pub words: usize,
    pub lines: usize,
    pub has_japanese: bool,
    pub japanese_ratio: f32,
}

impl TextStats {
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::default();
        }

        let chars = text.chars().count();
        let japanese = text.chars().filter(|c| is_japanese(*c)).count();
        Self {
            chars,
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
            has_japanese: japanese > 0,
            japanese_ratio: japanese as f32 / chars as f32,
        }
    }

    /// Script-based guess used when the backend reports no language.
    pub fn guess_language(&self) -> Option<&'static str> {
        (self.japanese_ratio >= JAPANESE_RATIO).then_some("ja")
    }
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Acceptance rules applied to every backend's output.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionCriteria {
    pub confidence_threshold: f32,
    pub expected_language: Option<String>,
    pub min_text_chars: usize,
}

impl RecognitionCriteria {
    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            expected_language: config
                .expected_language
                .as_deref()
                .map(primary_subtag)
                .filter(|l| !l.is_empty()),
            min_text_chars: config.min_text_chars,
        }
    }

    /// Turns a raw backend response into a result, or rejects it. Rejections
    /// are never transient.
    pub fn check(
        &self,
        raw: RawRecognition,
        attempts: u32,
    ) -> Result<RecognitionResult, RecognitionError> {
        let text = raw.text.trim().to_string();
        let stats = TextStats::from_text(&text);

        if stats.chars < self.min_text_chars.max(1) {
            return Err(RecognitionError::TextTooShort {
                chars: stats.chars,
                min: self.min_text_chars.max(1),
            });
        }

        if !raw.confidence.is_finite() {
            return Err(RecognitionError::MalformedResponse(format!(
                "confidence {} is not a number",
                raw.confidence
            )));
        }
        let confidence = raw.confidence.clamp(0.0, 1.0);
        if confidence < self.confidence_threshold {
            return Err(RecognitionError::LowConfidence {
                confidence,
                threshold: self.confidence_threshold,
            });
        }

        let language = raw
            .language
            .as_deref()
            .map(primary_subtag)
            .filter(|l| !l.is_empty())
            .or_else(|| stats.guess_language().map(str::to_string));

        let language_valid = match (&self.expected_language, &language) {
            (None, _) => true,
            (Some(expected), Some(detected)) => expected == detected,
            // Only Japanese can be confirmed by script; other expectations
            // pass when the backend is silent.
            (Some(expected), None) => expected != "ja",
        };

        if !language_valid {
            return Err(RecognitionError::LanguageMismatch {
                expected: self.expected_language.clone().unwrap_or_default(),
                detected: language.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        Ok(RecognitionResult {
            text,
            confidence,
            language,
            language_valid,
            stats,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(expected: Option<&str>) -> RecognitionCriteria {
        RecognitionCriteria {
            confidence_threshold: 0.7,
            expected_language: expected.map(str::to_string),
            min_text_chars: 5,
        }
    }

    fn raw(text: &str, confidence: f32, language: Option<&str>) -> RawRecognition {
        RawRecognition {
            text: text.to_string(),
            confidence,
            language: language.map(str::to_string),
        }
    }

    #[test]
    fn test_stats_counts() {
        let stats = TextStats::from_text("  請求書 No. 42\n御中 様\n");
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.words, 5);
        assert!(stats.has_japanese);
        assert!(stats.japanese_ratio > 0.3);
    }

    #[test]
    fn test_stats_empty_text() {
        assert_eq!(TextStats::from_text("   \n"), TextStats::default());
    }

    #[test]
    fn test_accepts_confident_result() {
        let result = criteria(None)
            .check(raw("Invoice 2026-10", 0.92, Some("en")), 1)
            .unwrap();
        assert_eq!(result.text, "Invoice 2026-10");
        assert!((result.confidence - 0.92).abs() < f32::EPSILON);
        assert!(result.language_valid);
    }

    #[test]
    fn test_low_confidence_is_rejected() {
        let err = criteria(None)
            .check(raw("Invoice 2026-10", 0.5, None), 1)
            .unwrap_err();
        assert!(matches!(err, RecognitionError::LowConfidence { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_non_finite_confidence_is_malformed() {
        for confidence in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let err = criteria(None)
                .check(raw("Invoice 2026-10", confidence, None), 1)
                .unwrap_err();
            assert!(matches!(err, RecognitionError::MalformedResponse(_)));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_short_and_empty_text_is_rejected() {
        assert!(matches!(
            criteria(None).check(raw("ab", 1.0, None), 1),
            Err(RecognitionError::TextTooShort { chars: 2, min: 5 })
        ));
        assert!(matches!(
            criteria(None).check(raw("  ", 1.0, None), 1),
            Err(RecognitionError::TextTooShort { chars: 0, .. })
        ));
    }

    #[test]
    fn test_reported_language_compared_by_primary_subtag() {
        let ok = criteria(Some("ja")).check(raw("これはテストです", 0.9, Some("ja-JP")), 1);
        assert!(ok.is_ok());

        let err = criteria(Some("ja"))
            .check(raw("This is a test", 0.9, Some("en")), 1)
            .unwrap_err();
        assert!(matches!(err, RecognitionError::LanguageMismatch { .. }));
    }

    #[test]
    fn test_script_heuristic_when_language_unreported() {
        assert!(criteria(Some("ja"))
            .check(raw("ファクス受信しました", 1.0, None), 1)
            .is_ok());
        assert!(criteria(Some("ja"))
            .check(raw("plain latin text", 1.0, None), 1)
            .is_err());
        assert!(criteria(Some("en"))
            .check(raw("plain latin text", 1.0, None), 1)
            .is_ok());
    }

    #[test]
    fn test_expected_language_normalized_from_config() {
        let config = RecognitionConfig {
            expected_language: Some("JA-jp".to_string()),
            ..RecognitionConfig::default()
        };
        assert_eq!(
            RecognitionCriteria::from_config(&config).expected_language,
            Some("ja".to_string())
        );
    }
}
