//! Error types for page fetching and snapshot extraction.

use thiserror::Error;

/// Why a fetched page could not be turned into a usable snapshot.
///
/// Missing optional fields are not errors; they degrade to defaults inside
/// the extractor. The only hard extraction failure is a page with no
/// recognizable product name.
#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("No product name found on page: {url}")]
    MissingName { url: String },

    #[error("Invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

impl ExtractionError {
    pub fn missing_name(url: &str) -> Self {
        Self::MissingName {
            url: url.to_string(),
        }
    }

    pub fn invalid_selector(selector: &str, reason: &str) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;
