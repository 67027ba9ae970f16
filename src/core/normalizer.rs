//! 错误归一化
//!
//! classify 是全函数：任何 RawFailure 都映射为恰好一个 NormalizedError，
//! 从不 panic，message 从不为空。优先级：带响应 > 无响应 > 其它。

use serde_json::{Map, Value};

use crate::core::{ErrorClass, NormalizedError, RawFailure};

/// 找不到任何可用描述时的默认文案
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred";

const NO_RESPONSE_MESSAGE: &str = "No response received from the server";

/// 将原始失败归一化
pub fn classify(raw: &RawFailure) -> NormalizedError {
    match raw {
        RawFailure::Response { status, body } => classify_response(*status, body.as_ref()),
        RawFailure::NoResponse { message } => {
            NormalizedError::new(ErrorClass::Network, non_empty_or(message, NO_RESPONSE_MESSAGE))
        }
        RawFailure::Other(value) => {
            let message = match value {
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string()),
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            NormalizedError::new(ErrorClass::Unknown, non_empty_or(&message, DEFAULT_ERROR_MESSAGE))
        }
    }
}

fn classify_response(status: u16, body: Option<&Value>) -> NormalizedError {
    let server_code = body
        .and_then(|b| b.get("code"))
        .and_then(Value::as_str);

    let classification = server_code
        .and_then(ErrorClass::from_server_code)
        .unwrap_or_else(|| ErrorClass::from_status(status));

    let message = body
        .and_then(body_message)
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());

    let mut err = NormalizedError::new(classification, message).with_status(status);
    if let Some(details) = body.and_then(body_details) {
        err = err.with_details(details);
    }
    err
}

/// 响应体中的描述：message，其次 DRF 风格的 error / detail
fn body_message(body: &Value) -> Option<String> {
    ["message", "error", "detail"]
        .iter()
        .filter_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn body_details(body: &Value) -> Option<Map<String, Value>> {
    match body {
        Value::Object(map) => Some(map.clone()),
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => {
            let mut map = Map::new();
            map.insert("body".to_string(), other.clone());
            Some(map)
        }
    }
}

fn non_empty_or(s: &str, fallback: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_response_with_message_and_details() {
        let raw = RawFailure::response(
            400,
            json!({"message": "Chapter name is required", "field": "name"}),
        );
        let err = classify(&raw);
        assert_eq!(err.status_code, Some(400));
        assert_eq!(err.message, "Chapter name is required");
        assert_eq!(err.classification, ErrorClass::Unknown);
        let details = err.details.unwrap();
        assert_eq!(details.get("field"), Some(&json!("name")));
    }

    #[test]
    fn test_server_code_overrides_status() {
        let raw = RawFailure::response(
            400,
            json!({"message": "bad file", "code": "INVALID_FILE_FORMAT"}),
        );
        assert_eq!(classify(&raw).classification, ErrorClass::InvalidInput);

        let raw = RawFailure::response(500, json!({"code": "PROCESSING_ERROR"}));
        let err = classify(&raw);
        assert_eq!(err.classification, ErrorClass::Processing);
        assert_eq!(err.status_code, Some(500));

        let raw = RawFailure::response(413, json!({"code": "FILE_TOO_LARGE"}));
        assert_eq!(classify(&raw).classification, ErrorClass::TooLarge);

        let raw = RawFailure::response(429, json!({"code": "RATE_LIMIT_ERROR"}));
        assert_eq!(classify(&raw).classification, ErrorClass::RateLimited);
    }

    #[test]
    fn test_unknown_code_falls_back_to_status() {
        let raw = RawFailure::response(404, json!({"code": "NO_SUCH_THING"}));
        assert_eq!(classify(&raw).classification, ErrorClass::NotFound);
    }

    #[test]
    fn test_status_only() {
        let err = classify(&RawFailure::status(403));
        assert_eq!(err.classification, ErrorClass::Forbidden);
        assert_eq!(err.message, DEFAULT_ERROR_MESSAGE);
        assert!(err.details.is_none());

        assert_eq!(classify(&RawFailure::status(502)).classification, ErrorClass::Server);
    }

    #[test]
    fn test_drf_error_field() {
        let raw = RawFailure::response(404, json!({"error": "Chapter not found"}));
        let err = classify(&raw);
        assert_eq!(err.message, "Chapter not found");
        assert_eq!(err.classification, ErrorClass::NotFound);

        let raw = RawFailure::response(403, json!({"detail": "Authentication credentials were not provided."}));
        assert_eq!(
            classify(&raw).message,
            "Authentication credentials were not provided."
        );
    }

    #[test]
    fn test_plain_text_body_kept_in_details() {
        let raw = RawFailure::response(502, json!("Bad Gateway"));
        let err = classify(&raw);
        assert_eq!(err.message, DEFAULT_ERROR_MESSAGE);
        assert_eq!(err.details.unwrap().get("body"), Some(&json!("Bad Gateway")));
    }

    #[test]
    fn test_no_response_is_network() {
        let err = classify(&RawFailure::no_response("connection refused"));
        assert_eq!(err.classification, ErrorClass::Network);
        assert_eq!(err.status_code, None);
        assert_eq!(err.message, "connection refused");

        let err = classify(&RawFailure::no_response(""));
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_other_values() {
        let err = classify(&RawFailure::Other(json!({"message": "parse failed"})));
        assert_eq!(err.classification, ErrorClass::Unknown);
        assert_eq!(err.message, "parse failed");

        let err = classify(&RawFailure::other("boom"));
        assert_eq!(err.message, "boom");

        let err = classify(&RawFailure::Other(json!(42)));
        assert_eq!(err.message, "42");

        let err = classify(&RawFailure::Other(Value::Null));
        assert_eq!(err.message, DEFAULT_ERROR_MESSAGE);

        let err = classify(&RawFailure::other("   "));
        assert_eq!(err.message, DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_classify_is_total() {
        let samples = vec![
            RawFailure::status(0),
            RawFailure::status(200),
            RawFailure::status(u16::MAX),
            RawFailure::response(500, json!(null)),
            RawFailure::response(400, json!([])),
            RawFailure::response(400, json!({"message": ""})),
            RawFailure::response(400, json!({"code": 12})),
            RawFailure::no_response("timeout"),
            RawFailure::Other(json!({})),
            RawFailure::Other(json!([1, 2])),
            RawFailure::Other(json!(true)),
        ];
        for raw in samples {
            let err = classify(&raw);
            assert!(!err.message.is_empty(), "empty message for {raw:?}");
        }
    }
}
