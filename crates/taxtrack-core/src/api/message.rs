//! Human-readable messages for errors shown to the user.

use std::any::Any;

use serde_json::Value;

use super::ApiError;

/// Shown when nothing more specific can be extracted
pub const FALLBACK_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Pull `message` (preferred) or `error` out of a JSON error body.
fn body_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"].iter().find_map(|field| {
        value
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn non_empty(message: String) -> Option<String> {
    if message.trim().is_empty() {
        None
    } else {
        Some(message)
    }
}

/// Message for an API error: the server's `message`, then its `error`,
/// then the error's own description.
pub fn api_error_message(err: &ApiError) -> String {
    err.body()
        .and_then(body_message)
        .or_else(|| non_empty(err.to_string()))
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}

/// Message for any application error. An `ApiError` anywhere in the chain
/// takes precedence over added context.
pub fn error_message(err: &anyhow::Error) -> String {
    if let Some(api) = err.chain().find_map(|cause| cause.downcast_ref::<ApiError>()) {
        return api_error_message(api);
    }
    non_empty(err.to_string()).unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}

/// Message for an arbitrary value, such as a panic payload from a task.
/// Anything that is not an error or a string gets the fallback.
pub fn error_message_any(value: &(dyn Any + Send)) -> String {
    if let Some(api) = value.downcast_ref::<ApiError>() {
        api_error_message(api)
    } else if let Some(err) = value.downcast_ref::<anyhow::Error>() {
        error_message(err)
    } else if let Some(s) = value.downcast_ref::<String>() {
        non_empty(s.clone()).unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
    } else if let Some(s) = value.downcast_ref::<&str>() {
        non_empty(s.to_string()).unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
    } else {
        FALLBACK_ERROR_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_prefers_body_message() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"message":"X","error":"Y"}"#);
        assert_eq!(api_error_message(&err), "X");
    }

    #[test]
    fn test_falls_back_to_body_error() {
        let err = ApiError::from_status(StatusCode::CONFLICT, r#"{"error":"Y"}"#);
        assert_eq!(api_error_message(&err), "Y");
    }

    #[test]
    fn test_falls_back_to_error_description() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, "<html>nope</html>");
        assert_eq!(api_error_message(&err), "Resource not found: <html>nope</html>");

        let err = ApiError::InvalidResponse("Z".to_string());
        assert_eq!(api_error_message(&err), "Invalid response: Z");
    }

    #[test]
    fn test_anyhow_chain_and_plain_errors() {
        let err = anyhow::Error::new(ApiError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"message":"X"}"#,
        ))
        .context("Failed to load summary");
        assert_eq!(error_message(&err), "X");

        assert_eq!(error_message(&anyhow::anyhow!("Z")), "Z");
        assert_eq!(error_message(&anyhow::anyhow!("")), FALLBACK_ERROR_MESSAGE);
    }

    #[test]
    fn test_unrecognized_values_use_fallback() {
        assert_eq!(error_message_any(&42_i32), FALLBACK_ERROR_MESSAGE);
        assert_eq!(error_message_any(&"Z"), "Z");
        assert_eq!(error_message_any(&String::from("Z")), "Z");
    }
}
