use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AIClientError, classify_status, fallback_message};

use super::types::OpenAiStreamError;

/// Parses error responses returned by OpenAI-compatible endpoints.
///
/// Extracts `error.message` and `error.code` (falling back to `error.type`) and
/// lets the shared status table decide the category.
pub(crate) fn parse_openai_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> AIClientError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }
    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        r#type: Option<String>,
        code: Option<Value>,
    }

    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let message = error
            .message
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| fallback_message(status, body));
        let code = vendor_code(error.code).or(error.r#type);
        return classify_status(status, headers, message, code);
    }

    classify_status(status, headers, fallback_message(status, body), None)
}

/// Maps an `{"error":{...}}` payload received mid-stream.
///
/// No HTTP status accompanies it, so the vendor code (or type) picks the status
/// that [`classify_status`] would have seen on a buffered call.
pub(crate) fn stream_error(error: OpenAiStreamError) -> AIClientError {
    let code = vendor_code(error.code).or(error.kind);
    let status = match code.as_deref() {
        Some("invalid_api_key" | "authentication_error") => 401,
        Some("insufficient_quota" | "rate_limit_exceeded" | "rate_limit_error" | "requests" | "tokens") => {
            429
        }
        Some("billing_hard_limit_reached") => 402,
        Some("invalid_request_error" | "context_length_exceeded" | "model_not_found") => 400,
        _ => 500,
    };
    let message = error
        .message
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| "stream reported an error".to_string());
    classify_status(status, &HashMap::new(), message, code)
}

fn vendor_code(code: Option<Value>) -> Option<String> {
    code.and_then(|code| match code {
        Value::String(code) => Some(code),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    })
}
