//! Response envelope shared by every JSON endpoint.
//!
//! All API responses use the same top-level shape:
//!
//! ```json
//! {
//!   "success": true,
//!   "message": "Generated QR code",
//!   "data": { ... },
//!   "error": null,
//!   "metadata": { "requestId": "...", "durationMs": 12, "timestamp": "..." }
//! }
//! ```
//!
//! Exactly one of `data` / `error` carries a payload. Error responses map a
//! symbolic [`ErrorCode`] to a numeric code and a default HTTP status through
//! a fixed table, so handlers never pick status codes ad hoc.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Symbolic error codes used across the gateway.
///
/// Each code carries a stable numeric identifier (for clients that switch on
/// numbers) and a default HTTP status. The mapping is fixed here so the same
/// failure always produces the same status, regardless of which handler
/// raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    Unauthorized,
    Forbidden,
    NotFound,
    FunctionNotFound,
    FileNotFound,
    Conflict,
    RateLimited,
    UpstreamError,
    InvalidFunctionResponse,
    InternalError,
}

impl ErrorCode {
    /// Stable numeric identifier for this code.
    pub fn numeric_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed => 1001,
            ErrorCode::Unauthorized => 2001,
            ErrorCode::Forbidden => 2002,
            ErrorCode::NotFound => 3000,
            ErrorCode::FunctionNotFound => 3001,
            ErrorCode::FileNotFound => 3002,
            ErrorCode::Conflict => 4001,
            ErrorCode::RateLimited => 5001,
            ErrorCode::UpstreamError => 6001,
            ErrorCode::InvalidFunctionResponse => 6002,
            ErrorCode::InternalError => 9001,
        }
    }

    /// Default HTTP status for this code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound | ErrorCode::FunctionNotFound | ErrorCode::FileNotFound => {
                StatusCode::NOT_FOUND
            }
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::InvalidFunctionResponse | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wire representation (`SCREAMING_SNAKE_CASE`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::FunctionNotFound => "FUNCTION_NOT_FOUND",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::InvalidFunctionResponse => "INVALID_FUNCTION_RESPONSE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Error payload carried inside an [`Envelope`] when `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    /// Structured detail records (e.g. one entry per failed validation
    /// field). Serialized even when empty; the error shape is fixed.
    #[serde(default)]
    pub details: Vec<Value>,
    /// HTTP status the gateway responds with for this code.
    pub http_status: u16,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The uniform JSON response body.
///
/// `data` and `error` are always present on the wire (`null` when empty) so
/// clients can branch on `success` without probing for missing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub error: Option<ErrorBody>,
    pub metadata: Map<String, Value>,
}

impl Envelope {
    /// Build a success envelope with a data payload.
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Envelope {
            success: true,
            message: message.into(),
            data,
            error: None,
            metadata: base_metadata(),
        }
    }

    /// Build an error envelope from a symbolic code.
    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::fail_with_details(code, message, Vec::new())
    }

    /// Build an error envelope carrying structured detail records.
    pub fn fail_with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: Vec<Value>,
    ) -> Self {
        let message = message.into();
        Envelope {
            success: false,
            message: message.clone(),
            data: Value::Null,
            error: Some(ErrorBody {
                code,
                numeric_code: code.numeric_code(),
                message,
                details,
                http_status: code.http_status().as_u16(),
            }),
            metadata: base_metadata(),
        }
    }

    /// Build a success envelope for a paginated item list.
    ///
    /// `page` is 1-based. `per_page` of 0 is treated as 1 to keep the
    /// page-count arithmetic defined.
    pub fn paginated(
        message: impl Into<String>,
        items: Vec<Value>,
        page: u64,
        per_page: u64,
        total: u64,
    ) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total.div_ceil(per_page);
        let data = json!({
            "items": items,
            "pagination": {
                "page": page,
                "perPage": per_page,
                "total": total,
                "totalPages": total_pages,
                "hasNext": page < total_pages,
                "hasPrev": page > 1,
            }
        });
        Envelope::ok(message, data)
    }

    /// Build a success envelope describing a stored media file.
    ///
    /// When `base64` is present the payload is inlined alongside the
    /// retrieval URL, so small artifacts (QR codes, thumbnails) can be used
    /// without a second round trip.
    pub fn media(message: impl Into<String>, file: MediaInfo) -> Self {
        let mut data = json!({
            "fileId": file.file_id,
            "url": file.url,
            "filename": file.filename,
            "mimeType": file.mime_type,
            "size": file.size,
            "expiresAt": file.expires_at,
        });
        if let Some(b64) = file.base64 {
            data["base64"] = Value::String(b64);
        }
        Envelope::ok(message, data)
    }

    /// Build a success envelope pointing at a downloadable file.
    pub fn file_download(message: impl Into<String>, file: MediaInfo) -> Self {
        let data = json!({
            "downloadUrl": file.url,
            "fileId": file.file_id,
            "filename": file.filename,
            "mimeType": file.mime_type,
            "size": file.size,
            "expiresAt": file.expires_at,
        });
        Envelope::ok(message, data)
    }

    /// Build a success envelope for generated text content.
    pub fn ai_content(
        message: impl Into<String>,
        content: impl Into<String>,
        model: impl Into<String>,
        tokens: Option<u64>,
    ) -> Self {
        let mut data = json!({
            "content": content.into(),
            "model": model.into(),
        });
        if let Some(t) = tokens {
            data["tokens"] = Value::from(t);
        }
        Envelope::ok(message, data)
    }

    /// Attach a metadata entry, returning the envelope for chaining.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// HTTP status this envelope should be served with.
    pub fn http_status(&self) -> StatusCode {
        match &self.error {
            Some(body) => body.code.http_status(),
            None => StatusCode::OK,
        }
    }

    /// Symbolic error code, if this is an error envelope.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self)).into_response()
    }
}

/// Descriptor for a stored file referenced from an envelope.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub file_id: String,
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    /// RFC 3339 expiry timestamp.
    pub expires_at: String,
    pub base64: Option<String>,
}

fn base_metadata() -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_has_data_and_no_error() {
        let env = Envelope::ok("done", json!({"x": 1}));
        assert!(env.success);
        assert!(env.error.is_none());
        assert_eq!(env.data["x"], 1);
        assert_eq!(env.http_status(), StatusCode::OK);
    }

    #[test]
    fn fail_envelope_has_error_and_null_data() {
        let env = Envelope::fail(ErrorCode::FunctionNotFound, "no such function");
        assert!(!env.success);
        assert!(env.data.is_null());
        let err = env.error.as_ref().unwrap();
        assert_eq!(err.code, ErrorCode::FunctionNotFound);
        assert_eq!(err.numeric_code, 3001);
        assert_eq!(env.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn status_table_is_fixed() {
        let cases = [
            (ErrorCode::ValidationFailed, StatusCode::BAD_REQUEST),
            (ErrorCode::Unauthorized, StatusCode::UNAUTHORIZED),
            (ErrorCode::Forbidden, StatusCode::FORBIDDEN),
            (ErrorCode::FunctionNotFound, StatusCode::NOT_FOUND),
            (ErrorCode::FileNotFound, StatusCode::NOT_FOUND),
            (ErrorCode::Conflict, StatusCode::CONFLICT),
            (ErrorCode::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ErrorCode::UpstreamError, StatusCode::BAD_GATEWAY),
            (ErrorCode::InternalError, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, status) in cases {
            assert_eq!(code.http_status(), status, "{:?}", code);
        }
    }

    #[test]
    fn wire_shape_keeps_null_slots() {
        let env = Envelope::ok("hi", json!({"a": true}));
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["success"], true);
        assert!(wire["error"].is_null());
        assert!(wire.get("data").is_some());
        assert!(wire["metadata"]["timestamp"].is_string());

        let env = Envelope::fail(ErrorCode::InternalError, "boom");
        let wire = serde_json::to_value(&env).unwrap();
        assert!(wire["data"].is_null());
        assert_eq!(wire["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(wire["error"]["numericCode"], 9001);
        assert_eq!(wire["error"]["httpStatus"], 500);
        assert_eq!(wire["error"]["details"], json!([]));
    }

    #[test]
    fn paginated_math() {
        let env = Envelope::paginated("page", vec![json!(1), json!(2)], 2, 2, 5);
        let p = &env.data["pagination"];
        assert_eq!(p["totalPages"], 3);
        assert_eq!(p["hasNext"], true);
        assert_eq!(p["hasPrev"], true);

        let env = Envelope::paginated("page", vec![], 1, 10, 0);
        let p = &env.data["pagination"];
        assert_eq!(p["totalPages"], 0);
        assert_eq!(p["hasNext"], false);
        assert_eq!(p["hasPrev"], false);
    }

    #[test]
    fn media_envelope_inlines_base64_when_present() {
        let file = MediaInfo {
            file_id: "abc".into(),
            url: "/temp/abc".into(),
            filename: "qr.png".into(),
            mime_type: "image/png".into(),
            size: 42,
            expires_at: "2026-01-01T00:00:00Z".into(),
            base64: Some("aGVsbG8=".into()),
        };
        let env = Envelope::media("generated", file);
        assert_eq!(env.data["base64"], "aGVsbG8=");
        assert_eq!(env.data["fileId"], "abc");

        let file = MediaInfo {
            file_id: "abc".into(),
            url: "/temp/abc".into(),
            filename: "qr.png".into(),
            mime_type: "image/png".into(),
            size: 42,
            expires_at: "2026-01-01T00:00:00Z".into(),
            base64: None,
        };
        let env = Envelope::file_download("stored", file);
        assert!(env.data.get("base64").is_none());
        assert_eq!(env.data["downloadUrl"], "/temp/abc");
    }
}
