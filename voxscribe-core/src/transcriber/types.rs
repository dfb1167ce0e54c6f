use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::error::TranscribeError;

/// Language used when the caller does not give one.
pub const DEFAULT_LANGUAGE: &str = "ja";

/// Sentinel asking the model to detect the language itself.
pub const AUTO_LANGUAGE: &str = "auto";

/// Text and language returned by a speech model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// The transcribed text.
    pub text: String,
    /// Language code the model used or detected (e.g., "ja", "en").
    pub language: String,
}

/// Language hint passed along with a transcription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageHint {
    /// Let the model detect the language.
    Auto,
    /// Expect this language code.
    Code(String),
}

impl LanguageHint {
    /// The code to hand to the model, or `None` for auto-detection.
    pub fn as_code(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Code(code) => Some(code),
        }
    }
}

impl Default for LanguageHint {
    fn default() -> Self {
        Self::Code(DEFAULT_LANGUAGE.to_string())
    }
}

impl FromStr for LanguageHint {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl From<String> for LanguageHint {
    fn from(s: String) -> Self {
        if s == AUTO_LANGUAGE {
            Self::Auto
        } else {
            Self::Code(s)
        }
    }
}

impl fmt::Display for LanguageHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code().unwrap_or(AUTO_LANGUAGE))
    }
}

/// Result of a transcription request, as printed to stdout.
///
/// Exactly one of the two shapes is ever produced:
/// `{"text", "language", "success": true}` or `{"error", "success": false}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

impl TranscriptionResult {
    /// Create a successful result.
    pub fn success(text: String, language: String) -> Self {
        Self {
            text: Some(text),
            language: Some(language),
            error: None,
            success: true,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            text: None,
            language: None,
            error: Some(error.into()),
            success: false,
        }
    }

    /// Indented JSON with non-ASCII characters kept as-is.
    pub fn to_json_pretty(&self) -> String {
        // A struct of strings and a bool cannot fail to serialize.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl From<Transcript> for TranscriptionResult {
    fn from(transcript: Transcript) -> Self {
        Self::success(transcript.text, transcript.language)
    }
}

impl From<TranscribeError> for TranscriptionResult {
    fn from(err: TranscribeError) -> Self {
        Self::failure(err.to_string())
    }
}

impl From<Result<Transcript, TranscribeError>> for TranscriptionResult {
    fn from(result: Result<Transcript, TranscribeError>) -> Self {
        match result {
            Ok(transcript) => transcript.into(),
            Err(err) => err.into(),
        }
    }
}
