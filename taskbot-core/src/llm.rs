//! Language-understanding seam: one prompt in, free-form text out.

use std::future::Future;

use serde::de::DeserializeOwned;

use crate::error::{Result, TaskbotError};

/// A blocking-per-call language model.
///
/// Implementations request deterministic sampling and do not retry; a stalled
/// call stalls only the turn that issued it.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

impl<T: LanguageModel> LanguageModel for std::sync::Arc<T> {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send {
        (**self).complete(prompt)
    }
}

/// Remove a ```` ```json ... ``` ```` wrapper if the model added one.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    body.strip_prefix("json").unwrap_or(body).trim()
}

/// Strip the fence and decode into `T`.
pub fn decode_json<T: DeserializeOwned>(response: &str) -> Result<T> {
    let body = strip_code_fence(response);
    if body.is_empty() {
        return Err(TaskbotError::decode("empty response"));
    }
    Ok(serde_json::from_str(body)?)
}

/// Treat blank strings as absent.
pub(crate) fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn strips_fenced_json() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json {\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn decode_reports_garbage_as_decode_failure() {
        let err = decode_json::<Value>("Sure! Here is your task.").unwrap_err();
        assert!(matches!(err, TaskbotError::ResponseDecodeFailed(_)));
        let err = decode_json::<Value>("```json\n```").unwrap_err();
        assert!(matches!(err, TaskbotError::ResponseDecodeFailed(_)));
    }
}
