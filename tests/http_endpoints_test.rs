//! End-to-end tests for the gateway endpoint semantics.
//!
//! Each test starts a real server on an ephemeral port and talks to it over
//! HTTP, covering the response envelope contract, function execution, batch
//! dispatch, temp file serving, the admin cache endpoint, and rate limiting.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use switchboard::functions::{register_builtins, FunctionsConfig};
use switchboard::registry::Registry;
use switchboard::server::ratelimit::RateLimitConfig;
use switchboard::server::startup::{run_server_with_config, ServerConfig, ServerHandle};
use switchboard::server::MiddlewareConfig;
use switchboard::storage::{StoreConfig, TempStore};
use tempfile::TempDir;

/// Start a test server after letting the caller adjust the config
/// (admin token, middleware, ...).
async fn start_configured_server(
    configure: impl FnOnce(&mut ServerConfig),
) -> (ServerHandle, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = TempStore::new(StoreConfig::default().with_base_dir(dir.path().to_path_buf()))
        .await
        .unwrap();
    let registry = register_builtins(Registry::builder(), &FunctionsConfig::default()).build();
    let mut config = ServerConfig::for_testing(Arc::new(registry), Arc::new(store));
    configure(&mut config);
    let handle = run_server_with_config(config).await.unwrap();
    (handle, dir)
}

async fn start_test_server() -> (ServerHandle, TempDir) {
    start_configured_server(|_| {}).await
}

/// POST a JSON body to `/execute` and return (status, parsed envelope).
async fn execute(
    client: &reqwest::Client,
    base_url: &str,
    body: Value,
) -> (reqwest::StatusCode, Value) {
    let resp = client
        .post(format!("{}/execute", base_url))
        .json(&body)
        .send()
        .await
        .expect("POST /execute failed");
    let status = resp.status();
    let body: Value = resp.json().await.expect("response body was not JSON");
    (status, body)
}

// ---------------------------------------------------------------------------
// 1. Successful execution fills data, leaves error null
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_success_envelope() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = execute(
        &client,
        &handle.base_url(),
        json!({"category": "tools", "function": "uuid", "data": {"count": 3}}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert_eq!(body["data"]["count"], 3);
    assert_eq!(body["data"]["uuids"].as_array().unwrap().len(), 3);
    assert!(body["error"].is_null(), "success responses carry no error");
    assert!(body["metadata"]["timestamp"].is_string());
    assert!(body["metadata"]["requestId"].is_string());
    assert!(body["metadata"]["durationMs"].is_number());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 2. Unknown function fills error, leaves data null
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_unknown_function_envelope() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = execute(
        &client,
        &handle.base_url(),
        json!({"category": "tools", "function": "teleport", "data": {}}),
    )
    .await;

    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null(), "failure responses carry no data");
    assert_eq!(body["error"]["code"], "FUNCTION_NOT_FOUND");
    assert_eq!(body["error"]["numericCode"], 3001);
    assert!(body["metadata"]["requestId"].is_string());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. Validation failure reports every bad field at once
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_validation_reports_all_fields() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // text is missing and the algorithm is not in the allowed set.
    let (status, body) = execute(
        &client,
        &handle.base_url(),
        json!({"category": "tools", "function": "hash", "data": {"algorithm": "md5"}}),
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    assert_eq!(body["error"]["numericCode"], 1001);

    let details = body["error"]["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    let fields: Vec<&str> = details
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"text"));
    assert!(fields.contains(&"algorithm"));

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Malformed JSON bodies are rejected with the envelope, not a bare error
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_json_body_rejected() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    for path in ["/execute", "/batch"] {
        let resp = client
            .post(format!("{}{}", handle.base_url(), path))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "POST {} should reject bad JSON", path);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    }

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. Hash function returns a known digest
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_hash_known_vector() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = execute(
        &client,
        &handle.base_url(),
        json!({"category": "tools", "function": "hash", "data": {"text": "hello world"}}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["data"]["algorithm"], "sha256");
    assert_eq!(
        body["data"]["hash"],
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 6. Base64 encode/decode round-trips; invalid input fails validation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_base64_roundtrip() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let base_url = handle.base_url();

    let (status, body) = execute(
        &client,
        &base_url,
        json!({"category": "tools", "function": "base64", "data": {"text": "switchboard"}}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["mode"], "encode");
    assert_eq!(body["data"]["result"], "c3dpdGNoYm9hcmQ=");

    let (status, body) = execute(
        &client,
        &base_url,
        json!({
            "category": "tools",
            "function": "base64",
            "data": {"text": "c3dpdGNoYm9hcmQ=", "mode": "decode"},
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["result"], "switchboard");

    let (status, body) = execute(
        &client,
        &base_url,
        json!({
            "category": "tools",
            "function": "base64",
            "data": {"text": "!!! not base64 !!!", "mode": "decode"},
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 7. Time function reports UTC
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_time() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = execute(
        &client,
        &handle.base_url(),
        json!({"category": "info", "function": "time", "data": {}}),
    )
    .await;

    assert_eq!(status, 200);
    assert!(body["data"]["timestamp"]
        .as_str()
        .is_some_and(|t| t.ends_with('Z')));
    assert_eq!(body["data"]["timezone"], "UTC");
    assert!(body["data"]["unix"].as_i64().unwrap() > 1_700_000_000);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 8. Weather serves deterministic fallback data without an API key
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_weather_fallback_without_key() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let base_url = handle.base_url();
    let request = json!({
        "category": "info",
        "function": "weather",
        "data": {"city": "Zurich"},
    });

    let (status, first) = execute(&client, &base_url, request.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(first["success"], true);
    assert_eq!(first["metadata"]["source"], "fallback");
    assert_eq!(first["data"]["city"], "Zurich");
    assert_eq!(first["data"]["units"], "metric");

    // Fallback data is derived from the city name, so a repeat call agrees.
    let (_, second) = execute(&client, &base_url, request).await;
    assert_eq!(first["data"]["temperature"], second["data"]["temperature"]);
    assert_eq!(first["data"]["conditions"], second["data"]["conditions"]);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 9. Caller-supplied x-request-id is echoed in the metadata
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_id_header_is_echoed() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/execute", handle.base_url()))
        .header("x-request-id", "itest-42")
        .json(&json!({"category": "info", "function": "time", "data": {}}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["metadata"]["requestId"], "itest-42");

    // Without the header the gateway generates one.
    let (_, body) = execute(
        &client,
        &handle.base_url(),
        json!({"category": "info", "function": "time", "data": {}}),
    )
    .await;
    assert!(body["metadata"]["requestId"]
        .as_str()
        .is_some_and(|id| !id.is_empty()));

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 10. Batch preserves submission order and isolates failures
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_order_and_failure_isolation() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/batch", handle.base_url()))
        .json(&json!({
            "requests": [
                {"category": "tools", "function": "uuid", "data": {}},
                {"category": "tools", "function": "nope", "data": {}},
                {"category": "info", "function": "time", "data": {}},
                {"category": "tools", "function": "hash", "data": {}},
                {"category": "tools", "function": "base64",
                 "data": {"text": "aGk=", "mode": "decode"}},
                {"category": "tools", "function": "uuid", "data": {"count": 2}},
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "a well-formed batch is itself a success");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 6);
    assert_eq!(body["data"]["succeeded"], 4);
    assert_eq!(body["data"]["failed"], 2);

    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 6);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(
            result["metadata"]["index"], i as u64,
            "result {} out of order",
            i
        );
    }

    // The failures landed exactly where they were submitted.
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"]["code"], "FUNCTION_NOT_FOUND");
    assert_eq!(results[3]["success"], false);
    assert_eq!(results[3]["error"]["code"], "VALIDATION_FAILED");
    assert_eq!(results[4]["data"]["result"], "hi");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 11. Batch size limits: empty, oversized, and missing array
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_size_limits() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let batch_url = format!("{}/batch", handle.base_url());

    // Eleven requests is one over the cap.
    let oversized: Vec<Value> = (0..11)
        .map(|_| json!({"category": "tools", "function": "uuid", "data": {}}))
        .collect();
    let resp = client
        .post(&batch_url)
        .json(&json!({"requests": oversized}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

    // Empty array.
    let resp = client
        .post(&batch_url)
        .json(&json!({"requests": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Missing the requests field entirely.
    let resp = client
        .post(&batch_url)
        .json(&json!({"items": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["details"][0]["field"], "requests");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 12. QR generation stores a temp file that can be fetched back
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_qr_temp_file_roundtrip() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = execute(
        &client,
        &handle.base_url(),
        json!({
            "category": "tools",
            "function": "qr",
            "data": {"text": "https://example.com", "size": 128},
        }),
    )
    .await;
    assert_eq!(status, 200);

    let qr_id = body["data"]["qrId"].as_str().unwrap();
    assert!(!qr_id.is_empty());
    assert_eq!(body["data"]["mimeType"], "image/png");
    assert_eq!(body["data"]["url"], format!("/temp/{}", qr_id));
    let encoded = body["data"]["base64"].as_str().unwrap();

    // Fetch the stored file back through the gateway.
    let resp = client
        .get(format!("{}/temp/{}", handle.base_url(), qr_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "image/png"
    );
    assert!(resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("attachment"));

    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n", "served file is a PNG");
    assert_eq!(bytes.to_vec(), BASE64.decode(encoded).unwrap());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 13. Unknown temp file id returns FILE_NOT_FOUND
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_temp_file_unknown_id() {
    let (handle, _dir) = start_test_server().await;

    let resp = reqwest::get(format!("{}/temp/no-such-file", handle.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "FILE_NOT_FOUND");
    assert_eq!(body["error"]["numericCode"], 3002);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 14. Function catalog lists every registered function by category
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_functions_catalog() {
    let (handle, _dir) = start_test_server().await;

    let resp = reqwest::get(format!("{}/functions", handle.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 8);

    let categories = body["data"]["categories"].as_object().unwrap();
    assert_eq!(categories["tools"].as_array().unwrap().len(), 4);
    assert_eq!(categories["info"].as_array().unwrap().len(), 3);
    assert_eq!(categories["media"].as_array().unwrap().len(), 1);

    let tool_names: Vec<&str> = categories["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert!(tool_names.contains(&"qr"));
    assert!(tool_names.contains(&"uuid"));

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 15. Describing a function includes invocation stats once it has run
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_describe_function_with_stats() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let base_url = handle.base_url();

    let resp = reqwest::get(format!("{}/functions/tools/uuid", base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["category"], "tools");
    assert_eq!(body["data"]["name"], "uuid");

    // Invoke once, then the descriptor carries stats.
    execute(
        &client,
        &base_url,
        json!({"category": "tools", "function": "uuid", "data": {}}),
    )
    .await;
    let resp = reqwest::get(format!("{}/functions/tools/uuid", base_url))
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["stats"]["calls"], 1);
    assert_eq!(body["data"]["stats"]["errors"], 0);

    // Unknown functions 404.
    let resp = reqwest::get(format!("{}/functions/tools/nope", base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FUNCTION_NOT_FOUND");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 16. Cache clearing requires the admin bearer token
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cache_clear_requires_admin_token() {
    let (handle, _dir) = start_configured_server(|config| {
        config.http_config.admin_token = Some("itest-admin-token".to_string());
    })
    .await;
    let client = reqwest::Client::new();
    let cache_url = format!("{}/cache", handle.base_url());

    // Warm the instance cache so there is something to clear.
    execute(
        &client,
        &handle.base_url(),
        json!({"category": "tools", "function": "uuid", "data": {}}),
    )
    .await;

    // No token.
    let resp = client.delete(&cache_url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["error"]["numericCode"], 2001);

    // Wrong token.
    let resp = client
        .delete(&cache_url)
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Correct token clears the warmed instance.
    let resp = client
        .delete(&cache_url)
        .bearer_auth("itest-admin-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["cleared"], 1);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 17. Cache endpoint stays locked when no admin token is configured
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cache_clear_disabled_without_token() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(format!("{}/cache", handle.base_url()))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 18. Stats reflect dispatch counters and registry state
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stats_endpoint() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let base_url = handle.base_url();

    // One success, one failure.
    execute(
        &client,
        &base_url,
        json!({"category": "tools", "function": "uuid", "data": {}}),
    )
    .await;
    execute(
        &client,
        &base_url,
        json!({"category": "tools", "function": "nope", "data": {}}),
    )
    .await;

    let resp = reqwest::get(format!("{}/stats", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["requests"]["total"], 2);
    assert_eq!(body["data"]["requests"]["succeeded"], 1);
    assert_eq!(body["data"]["requests"]["failed"], 1);
    assert_eq!(body["data"]["registry"]["registered"], 8);
    assert_eq!(body["data"]["registry"]["cachedInstances"], 1);
    assert!(body["data"]["uptimeSeconds"].as_i64().unwrap() >= 0);
    assert!(body["data"]["storage"]["fileCount"].is_number());
    assert_eq!(body["data"]["functions"]["tools:uuid"]["calls"], 1);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 19. Rate limiting returns 429 with retry metadata once the window is spent
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rate_limit_blocks_after_window_exhausted() {
    let (handle, _dir) = start_configured_server(|config| {
        config.middleware_config = MiddlewareConfig {
            rate_limit: RateLimitConfig::builder()
                .max_requests(3)
                .window(Duration::from_secs(60))
                .block_duration(Duration::from_secs(120))
                .build(),
            enable_rate_limit: true,
        };
    })
    .await;
    let client = reqwest::Client::new();
    let request = json!({"category": "info", "function": "time", "data": {}});

    // The first three requests pass and report the shrinking budget.
    for expected_remaining in ["2", "1", "0"] {
        let resp = client
            .post(format!("{}/execute", handle.base_url()))
            .json(&request)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("x-ratelimit-limit").unwrap().to_str().unwrap(),
            "3"
        );
        assert_eq!(
            resp.headers()
                .get("x-ratelimit-remaining")
                .unwrap()
                .to_str()
                .unwrap(),
            expected_remaining
        );
    }

    // The fourth request trips the limiter.
    let resp = client
        .post(format!("{}/execute", handle.base_url()))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);

    let retry_after_header: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after_header >= 1 && retry_after_header <= 300);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert_eq!(body["error"]["numericCode"], 5001);
    let retry_after = body["metadata"]["retryAfter"].as_u64().unwrap();
    assert!(retry_after >= 1 && retry_after <= 300);
    assert_eq!(body["error"]["details"][0]["retryAfter"], retry_after);

    // Still blocked once tripped.
    let resp = client
        .post(format!("{}/execute", handle.base_url()))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 20. Bodies over the configured limit are rejected before dispatch
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_body_rejected() {
    let (handle, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let huge = "x".repeat(300 * 1024);
    let resp = client
        .post(format!("{}/execute", handle.base_url()))
        .json(&json!({"category": "tools", "function": "hash", "data": {"text": huge}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);

    handle.shutdown().await;
}
