//! Function registry for request dispatch
//!
//! Holds the table of callable functions, addressed by `(category, name)`.
//! The table itself is fixed at startup; handler *instances* are built
//! lazily on first use and kept in a cache that only the admin cache-clear
//! endpoint empties. Per-function call counters are tracked here so the
//! stats endpoint can report usage without touching the dispatch path.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::logging::targets;
use crate::storage::{StoreError, TempStore};
use crate::validation::Schema;

/// Describes one callable function for listings and validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDescriptor {
    pub category: String,
    pub name: String,
    pub description: String,
    /// Input schema the dispatcher validates request data against.
    pub input_schema: Schema,
    /// Whether this function stores artifacts in the temp store.
    pub produces_files: bool,
}

impl FunctionDescriptor {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        FunctionDescriptor {
            category: category.into(),
            name: name.into(),
            description: description.into(),
            input_schema: Schema::new(),
            produces_files: false,
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn produces_files(mut self) -> Self {
        self.produces_files = true;
        self
    }

    /// Registry key, `category:name`.
    pub fn key(&self) -> String {
        function_key(&self.category, &self.name)
    }
}

pub fn function_key(category: &str, name: &str) -> String {
    format!("{}:{}", category, name)
}

/// Context handed to every function invocation.
#[derive(Clone)]
pub struct FunctionContext {
    /// Request ID of the triggering HTTP request (batch items share one).
    pub request_id: String,
    /// Temp store for generated artifacts.
    pub store: Arc<TempStore>,
    /// Shared HTTP client for upstream calls.
    pub http: reqwest::Client,
}

/// Where a function's result data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Computed locally or fetched from the live upstream.
    Live,
    /// Upstream was unavailable; deterministic fallback data substituted.
    Fallback,
}

/// Successful function result.
#[derive(Debug, Clone)]
pub struct FunctionOutput {
    pub message: String,
    /// Result payload; must be a JSON object.
    pub data: Value,
    pub source: DataSource,
}

impl FunctionOutput {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        FunctionOutput {
            message: message.into(),
            data,
            source: DataSource::Live,
        }
    }

    /// Mark this output as substituted fallback data.
    pub fn fallback(mut self) -> Self {
        self.source = DataSource::Fallback;
        self
    }
}

/// Errors a function handler can raise.
#[derive(Error, Debug)]
pub enum FunctionError {
    /// Input passed the schema but failed a semantic check.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// An upstream service failed and no fallback was possible.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Temp store operation failed.
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A callable function.
///
/// Handlers receive the already schema-validated `data` object and the
/// shared [`FunctionContext`]. Implementations are held behind `Arc` in the
/// instance cache, so `&self` must be enough for invocation.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn invoke(
        &self,
        data: Map<String, Value>,
        ctx: &FunctionContext,
    ) -> Result<FunctionOutput, FunctionError>;
}

/// Builds a handler instance on first use.
pub type HandlerFactory = Box<dyn Fn() -> Arc<dyn FunctionHandler> + Send + Sync>;

struct FunctionEntry {
    descriptor: FunctionDescriptor,
    factory: HandlerFactory,
}

/// Per-function usage counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStats {
    pub calls: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_invoked_at: Option<String>,
}

impl FunctionStats {
    pub fn average_duration_ms(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_duration_ms / self.calls
        }
    }
}

/// Assembles the registration table before the server starts.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, FunctionEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Re-registering the same `(category, name)` pair
    /// replaces the earlier entry.
    pub fn register<F>(mut self, descriptor: FunctionDescriptor, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn FunctionHandler> + Send + Sync + 'static,
    {
        let key = descriptor.key();
        if self.entries.contains_key(&key) {
            tracing::warn!(target: targets::DISPATCH, function = %key, "Replacing existing function registration");
        }
        self.entries.insert(
            key,
            FunctionEntry {
                descriptor,
                factory: Box::new(factory),
            },
        );
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
            cache: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }
}

/// Function registry with a lazy handler-instance cache.
pub struct Registry {
    /// Registration table, immutable after build.
    entries: HashMap<String, FunctionEntry>,
    /// Lazily populated handler instances, keyed by `category:name`.
    cache: RwLock<HashMap<String, Arc<dyn FunctionHandler>>>,
    /// Usage counters, keyed by `category:name`.
    stats: RwLock<HashMap<String, FunctionStats>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a descriptor without instantiating the handler.
    pub fn descriptor(&self, category: &str, name: &str) -> Option<&FunctionDescriptor> {
        self.entries
            .get(&function_key(category, name))
            .map(|e| &e.descriptor)
    }

    /// Resolve a handler instance, building and caching it on first use.
    pub fn resolve(&self, category: &str, name: &str) -> Option<Arc<dyn FunctionHandler>> {
        let key = function_key(category, name);

        if let Some(handler) = self.cache.read().get(&key) {
            return Some(handler.clone());
        }

        let entry = self.entries.get(&key)?;
        let mut cache = self.cache.write();
        // Another caller may have won the race while we waited for the lock.
        if let Some(handler) = cache.get(&key) {
            return Some(handler.clone());
        }
        let handler = (entry.factory)();
        cache.insert(key.clone(), handler.clone());
        tracing::debug!(target: targets::DISPATCH, function = %key, "Instantiated function handler");
        Some(handler)
    }

    /// Drop every cached handler instance. Returns how many were dropped.
    ///
    /// The registration table is unaffected; subsequent calls re-instantiate
    /// handlers through their factories.
    pub fn clear_cache(&self) -> usize {
        let mut cache = self.cache.write();
        let count = cache.len();
        cache.clear();
        count
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of currently cached handler instances.
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Descriptors grouped by category, both levels sorted by name.
    pub fn by_category(&self) -> BTreeMap<String, Vec<&FunctionDescriptor>> {
        let mut grouped: BTreeMap<String, Vec<&FunctionDescriptor>> = BTreeMap::new();
        for entry in self.entries.values() {
            grouped
                .entry(entry.descriptor.category.clone())
                .or_default()
                .push(&entry.descriptor);
        }
        for descriptors in grouped.values_mut() {
            descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        }
        grouped
    }

    /// Record the outcome of one invocation.
    pub fn record_call(&self, category: &str, name: &str, duration_ms: u64, ok: bool) {
        let mut stats = self.stats.write();
        let entry = stats.entry(function_key(category, name)).or_default();
        entry.calls += 1;
        if !ok {
            entry.errors += 1;
        }
        entry.total_duration_ms += duration_ms;
        entry.last_invoked_at = Some(Utc::now().to_rfc3339());
    }

    /// Snapshot of per-function counters, sorted by key.
    pub fn stats_snapshot(&self) -> BTreeMap<String, FunctionStats> {
        self.stats
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
