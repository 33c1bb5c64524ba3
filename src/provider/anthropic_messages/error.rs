use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{AIClientError, classify_status, fallback_message};

/// Parses error responses returned by the Anthropic Messages API.
///
/// The body looks like `{"type":"error","error":{"type":"...","message":"..."}}`;
/// the inner `type` becomes the vendor code.
pub(crate) fn parse_anthropic_error(
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
    }

    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let message = error
            .message
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| fallback_message(status, body));
        return classify_status(status, headers, message, error.r#type);
    }

    // Fallback: if the payload cannot be parsed, surface the raw body.
    classify_status(status, headers, fallback_message(status, body), None)
}

/// Maps an in-stream `error` event onto the status its type corresponds to.
pub(crate) fn stream_error(kind: Option<&str>, message: Option<String>) -> AIClientError {
    let status = match kind {
        Some("invalid_request_error") => 400,
        Some("authentication_error") => 401,
        Some("permission_error") => 403,
        Some("not_found_error") => 404,
        Some("rate_limit_error") => 429,
        Some("overloaded_error") => 529,
        _ => 500,
    };
    let message = message.unwrap_or_else(|| "stream reported an error".to_string());
    classify_status(status, &HashMap::new(), message, kind.map(str::to_string))
}
