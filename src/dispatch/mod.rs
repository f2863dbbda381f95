//! Request dispatch and batch execution
//!
//! Turns parsed execute requests into response envelopes: looks up the
//! function in the registry, validates the input against its schema, runs
//! the handler, and maps its result (or error) onto the envelope shape.
//! Batches run their items in fixed-size concurrent chunks, and a failure
//! in one item never touches its neighbours.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, ErrorCode};
use crate::logging::targets;
use crate::registry::{FunctionContext, FunctionError, FunctionOutput, Registry};
use crate::registry::{function_key, DataSource};
use crate::storage::{StoreError, TempStore};
use crate::validation::errors_to_details;

/// Maximum number of sub-requests in one batch.
pub const MAX_BATCH_SIZE: usize = 10;

/// How many batch items run concurrently.
pub const BATCH_CHUNK_SIZE: usize = 5;

/// A single execute request.
///
/// Fields are optional at the type level so malformed requests (and batch
/// items) can be rejected with a proper validation envelope instead of a
/// bare deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteRequest {
    pub category: Option<String>,
    pub function: Option<String>,
    pub data: Option<Value>,
    /// Opaque client metadata; accepted and ignored.
    pub metadata: Option<Value>,
}

/// Global dispatch counters for the stats endpoint.
#[derive(Default)]
struct DispatchCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the dispatch counters.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Executes requests against a function registry.
pub struct Dispatcher {
    registry: Arc<Registry>,
    store: Arc<TempStore>,
    http: reqwest::Client,
    counters: DispatchCounters,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, store: Arc<TempStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Dispatcher {
            registry,
            store,
            http,
            counters: DispatchCounters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<TempStore> {
        &self.store
    }

    /// Execute a raw JSON request value.
    ///
    /// Shape problems (non-object, wrongly typed fields) become validation
    /// envelopes rather than hard errors, which is what keeps batch items
    /// isolated from each other.
    pub async fn execute_value(&self, raw: Value, request_id: &str) -> Envelope {
        match serde_json::from_value::<ExecuteRequest>(raw) {
            Ok(request) => self.execute(request, request_id).await,
            Err(e) => self.finish(
                Envelope::fail_with_details(
                    ErrorCode::ValidationFailed,
                    "Request must be a JSON object with category and function fields",
                    vec![json!({"message": e.to_string()})],
                ),
                request_id,
                None,
                0,
            ),
        }
    }

    /// Execute a parsed request, producing a response envelope.
    pub async fn execute(&self, request: ExecuteRequest, request_id: &str) -> Envelope {
        let started = Instant::now();

        let mut missing = Vec::new();
        if request.category.as_deref().unwrap_or("").is_empty() {
            missing.push(json!({"field": "category", "code": "required", "message": "is required"}));
        }
        if request.function.as_deref().unwrap_or("").is_empty() {
            missing.push(json!({"field": "function", "code": "required", "message": "is required"}));
        }
        if !missing.is_empty() {
            return self.finish(
                Envelope::fail_with_details(
                    ErrorCode::ValidationFailed,
                    "Request is missing required fields",
                    missing,
                ),
                request_id,
                None,
                elapsed_ms(started),
            );
        }

        let category = request.category.unwrap_or_default();
        let function = request.function.unwrap_or_default();
        let key = function_key(&category, &function);

        let data = match request.data {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return self.finish(
                    Envelope::fail_with_details(
                        ErrorCode::ValidationFailed,
                        "Request data must be a JSON object",
                        vec![json!({"field": "data", "code": "type", "message": "must be an object"})],
                    ),
                    request_id,
                    Some(&key),
                    elapsed_ms(started),
                );
            }
        };

        let Some(descriptor) = self.registry.descriptor(&category, &function) else {
            return self.finish(
                Envelope::fail(
                    ErrorCode::FunctionNotFound,
                    format!("Function not found: {}/{}", category, function),
                ),
                request_id,
                Some(&key),
                elapsed_ms(started),
            );
        };

        if let Err(errors) = descriptor.input_schema.validate(&data) {
            debug!(target: targets::DISPATCH, function = %key, errors = errors.len(), "Input validation failed");
            return self.finish(
                Envelope::fail_with_details(
                    ErrorCode::ValidationFailed,
                    format!("Validation failed for {}/{}", category, function),
                    errors_to_details(&errors),
                )
                .with_meta("function", Value::String(key.clone())),
                request_id,
                Some(&key),
                elapsed_ms(started),
            );
        }

        let Some(handler) = self.registry.resolve(&category, &function) else {
            // Registration table and resolve disagree; a bug, not a client error.
            return self.finish(
                Envelope::fail(ErrorCode::InternalError, "Function handler unavailable"),
                request_id,
                Some(&key),
                elapsed_ms(started),
            );
        };

        let ctx = FunctionContext {
            request_id: request_id.to_string(),
            store: self.store.clone(),
            http: self.http.clone(),
        };

        let result = handler.invoke(data, &ctx).await;
        let duration_ms = elapsed_ms(started);
        let ok = result.is_ok();
        self.registry
            .record_call(&category, &function, duration_ms, ok);

        let envelope = match result {
            Ok(output) => self.envelope_from_output(&key, output),
            Err(error) => {
                warn!(target: targets::DISPATCH, function = %key, error = %error, "Function invocation failed");
                envelope_from_error(error)
            }
        }
        .with_meta("function", Value::String(key.clone()));

        self.finish(envelope, request_id, Some(&key), duration_ms)
    }

    /// Execute a batch of raw request values.
    ///
    /// Items run [`BATCH_CHUNK_SIZE`] at a time; results come back in
    /// submission order with an `index` metadata entry. The batch envelope
    /// itself is a success whenever the batch was well formed, regardless
    /// of how many items failed.
    pub async fn execute_batch(&self, requests: Vec<Value>, request_id: &str) -> Envelope {
        let started = Instant::now();

        if requests.is_empty() || requests.len() > MAX_BATCH_SIZE {
            return Envelope::fail_with_details(
                ErrorCode::ValidationFailed,
                format!(
                    "Batch must contain between 1 and {} requests",
                    MAX_BATCH_SIZE
                ),
                vec![json!({
                    "field": "requests",
                    "code": "size",
                    "message": format!("got {} requests", requests.len()),
                })],
            )
            .with_meta("requestId", Value::String(request_id.to_string()));
        }

        let total = requests.len();
        let mut results: Vec<Envelope> = Vec::with_capacity(total);
        for chunk in requests.chunks(BATCH_CHUNK_SIZE) {
            let futures = chunk
                .iter()
                .map(|raw| self.execute_value(raw.clone(), request_id));
            results.extend(join_all(futures).await);
        }

        let succeeded = results.iter().filter(|e| e.success).count();
        let failed = total - succeeded;
        debug!(
            target: targets::DISPATCH,
            request_id = %request_id,
            total,
            succeeded,
            failed,
            "Batch finished"
        );
        let items: Vec<Value> = results
            .into_iter()
            .enumerate()
            .map(|(index, envelope)| {
                let envelope = envelope.with_meta("index", Value::from(index));
                serde_json::to_value(&envelope).unwrap_or(Value::Null)
            })
            .collect();

        Envelope::ok(
            format!(
                "Executed {} requests ({} succeeded, {} failed)",
                total, succeeded, failed
            ),
            json!({
                "total": total,
                "succeeded": succeeded,
                "failed": failed,
                "results": items,
            }),
        )
        .with_meta("requestId", Value::String(request_id.to_string()))
        .with_meta("durationMs", Value::from(elapsed_ms(started)))
    }

    pub fn counters_snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total: self.counters.total.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stamp common metadata, bump the global counters, and write the
    /// per-call log record. Every execute path funnels through here, so
    /// every call produces exactly one completion event.
    fn finish(
        &self,
        envelope: Envelope,
        request_id: &str,
        function: Option<&str>,
        duration_ms: u64,
    ) -> Envelope {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if envelope.success {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            target: targets::DISPATCH,
            request_id = %request_id,
            function = function.unwrap_or("-"),
            duration_ms,
            success = envelope.success,
            "Call finished"
        );
        envelope
            .with_meta("requestId", Value::String(request_id.to_string()))
            .with_meta("durationMs", Value::from(duration_ms))
    }

    fn envelope_from_output(&self, key: &str, output: FunctionOutput) -> Envelope {
        if !output.data.is_object() {
            warn!(target: targets::DISPATCH, function = %key, "Function returned non-object data");
            return Envelope::fail(
                ErrorCode::InvalidFunctionResponse,
                format!("Function {} returned a malformed response", key),
            );
        }
        let mut envelope = Envelope::ok(output.message, output.data);
        if output.source == DataSource::Fallback {
            envelope = envelope.with_meta("source", Value::String("fallback".to_string()));
        }
        envelope
    }
}

fn envelope_from_error(error: FunctionError) -> Envelope {
    match error {
        FunctionError::Invalid(message) => Envelope::fail_with_details(
            ErrorCode::ValidationFailed,
            message.clone(),
            vec![json!({"message": message})],
        ),
        FunctionError::Upstream(message) => Envelope::fail(ErrorCode::UpstreamError, message),
        FunctionError::Storage(StoreError::FileTooLarge { size, max }) => {
            Envelope::fail_with_details(
                ErrorCode::ValidationFailed,
                "Generated file exceeds the size limit",
                vec![json!({"size": size, "max": max})],
            )
        }
        FunctionError::Storage(StoreError::NotFound(id)) => {
            Envelope::fail(ErrorCode::FileNotFound, format!("File not found: {}", id))
        }
        FunctionError::Storage(StoreError::Io(message)) => {
            Envelope::fail(ErrorCode::InternalError, internal_message(&message))
        }
        FunctionError::Internal(message) => {
            Envelope::fail(ErrorCode::InternalError, internal_message(&message))
        }
    }
}

/// Internal error detail is only exposed when dev mode is on.
fn internal_message(detail: &str) -> String {
    if crate::config::dev_mode() {
        format!("Internal error: {}", detail)
    } else {
        "Internal server error".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
