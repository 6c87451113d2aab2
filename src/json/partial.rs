//! Parsing of possibly-truncated JSON text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::repair::repair_json;

/// Classification of a partial parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ParseState {
    UndefinedInput,
    SuccessfulParse,
    RepairedParse,
    FailedParse,
}

/// Outcome of [`parse_partial_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum PartialJson {
    /// No text was supplied.
    UndefinedInput,
    /// The text was already a complete document.
    Successful(Value),
    /// The text parsed after structural repair.
    Repaired(Value),
    /// The text could not be parsed, even after repair.
    Failed,
}

impl PartialJson {
    pub fn state(&self) -> ParseState {
        match self {
            PartialJson::UndefinedInput => ParseState::UndefinedInput,
            PartialJson::Successful(_) => ParseState::SuccessfulParse,
            PartialJson::Repaired(_) => ParseState::RepairedParse,
            PartialJson::Failed => ParseState::FailedParse,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            PartialJson::Successful(value) | PartialJson::Repaired(value) => Some(value),
            PartialJson::UndefinedInput | PartialJson::Failed => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            PartialJson::Successful(value) | PartialJson::Repaired(value) => Some(value),
            PartialJson::UndefinedInput | PartialJson::Failed => None,
        }
    }
}

/// Parse JSON text that may have been cut off mid-document.
///
/// Strict parsing is tried first; on failure the text goes through a single
/// [`repair_json`] pass and is parsed again.
///
/// # Example
/// ```
/// use serde_json::json;
/// use unai::json::{parse_partial_json, ParseState};
///
/// let result = parse_partial_json(Some(r#"{"city": "Ber"#));
/// assert_eq!(result.state(), ParseState::RepairedParse);
/// assert_eq!(result.value(), Some(&json!({ "city": "Ber" })));
/// ```
pub fn parse_partial_json(text: Option<&str>) -> PartialJson {
    let Some(text) = text else {
        return PartialJson::UndefinedInput;
    };

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return PartialJson::Successful(value);
    }

    match serde_json::from_str::<Value>(&repair_json(text)) {
        Ok(value) => PartialJson::Repaired(value),
        Err(_) => PartialJson::Failed,
    }
}
