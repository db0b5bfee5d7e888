//! JSON utilities for LLM response payloads.
//!
//! Every structured exchange with a model in this crate is a JSON contract:
//! the prompt asks for a JSON object, and the response is parsed strictly
//! into a typed struct. Models routinely wrap their output in Markdown code
//! fences, so parsing always goes through [`strip_code_fences`] first.
//! Callers that tolerate degraded output (the coherence paths) use
//! [`is_effectively_empty`] to detect responses that should be treated as
//! no-ops rather than errors.

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while decoding an LLM JSON payload.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmJsonError {
    /// The payload was not valid JSON after fence stripping.
    #[error("invalid JSON in {context}: {source}")]
    #[diagnostic(
        code(fableforge::json::invalid),
        help("The model returned malformed JSON. Retrying with a fresh call usually resolves this.")
    )]
    Invalid {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The payload parsed but a required field was missing or empty.
    #[error("missing required field `{field}` in {context}")]
    #[diagnostic(code(fableforge::json::missing_field))]
    MissingField {
        context: &'static str,
        field: &'static str,
    },
}

/// Strip Markdown code-fence framing from a model response.
///
/// Handles both ```` ```json ```` and bare ```` ``` ```` fences, with or
/// without a trailing fence. Text without fences is returned trimmed.
///
/// # Examples
///
/// ```
/// use fableforge::utils::json::strip_code_fences;
///
/// let fenced = "```json\n{\"theme\": \"redemption\"}\n```";
/// assert_eq!(strip_code_fences(fenced), "{\"theme\": \"redemption\"}");
///
/// let bare = "{\"theme\": \"redemption\"}";
/// assert_eq!(strip_code_fences(bare), bare);
/// ```
#[must_use]
pub fn strip_code_fences(response: &str) -> &str {
    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse a model response into `T`, stripping code fences first.
pub fn parse_llm_json<T: DeserializeOwned>(
    response: &str,
    context: &'static str,
) -> Result<T, LlmJsonError> {
    let cleaned = strip_code_fences(response);
    serde_json::from_str(cleaned).map_err(|source| LlmJsonError::Invalid { context, source })
}

/// Returns true when a response carries no usable JSON content.
///
/// The coherence paths treat these as "nothing to record" rather than a
/// failure, so state updates degrade to no-ops.
#[must_use]
pub fn is_effectively_empty(response: &str) -> bool {
    let cleaned = strip_code_fences(response);
    cleaned.is_empty() || cleaned == "null" || cleaned == "None" || cleaned == "{}"
}

/// Require that a parsed string field is present and non-blank.
pub fn require_field<'a>(
    value: &'a str,
    field: &'static str,
    context: &'static str,
) -> Result<&'a str, LlmJsonError> {
    if value.trim().is_empty() {
        Err(LlmJsonError::MissingField { context, field })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct Probe {
        theme: String,
    }

    #[test]
    fn strips_json_fences() {
        let parsed: Probe =
            parse_llm_json("```json\n{\"theme\": \"loss\"}\n```", "probe").unwrap();
        assert_eq!(parsed.theme, "loss");
    }

    #[test]
    fn strips_bare_fences() {
        let parsed: Probe = parse_llm_json("```\n{\"theme\": \"loss\"}\n```", "probe").unwrap();
        assert_eq!(parsed.theme, "loss");
    }

    #[test]
    fn passes_plain_json_through() {
        let parsed: Probe = parse_llm_json("{\"theme\": \"loss\"}", "probe").unwrap();
        assert_eq!(parsed.theme, "loss");
    }

    #[test]
    fn invalid_json_reports_context() {
        let err = parse_llm_json::<Probe>("not json at all", "probe").unwrap_err();
        assert!(err.to_string().contains("probe"));
    }

    #[test]
    fn detects_empty_responses() {
        assert!(is_effectively_empty(""));
        assert!(is_effectively_empty("```json\n```"));
        assert!(is_effectively_empty("null"));
        assert!(is_effectively_empty("{}"));
        assert!(!is_effectively_empty("{\"a\": 1}"));
    }
}
