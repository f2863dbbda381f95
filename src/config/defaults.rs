//! Config defaults application
//!
//! Merges user-provided config with sane defaults so that partial configs work
//! correctly.
//!
//! The top-level entry point is [`apply_defaults`], which takes a raw
//! `serde_json::Value` (the JSON5-parsed config) and fills in any missing
//! sections/fields with production-ready defaults.
//!
//! Design:
//! - We use typed structs with `#[serde(default)]` so that serde fills in
//!   missing fields automatically during deserialization.
//! - The result is serialized back to `Value` so existing code that reads raw
//!   JSON values continues to work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::logging::targets;

// ---------------------------------------------------------------------------
// Top-level typed config (only the sections that need defaults)
// ---------------------------------------------------------------------------

/// Top-level config with all sections that receive defaults.
///
/// Sections not listed here pass through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigWithDefaults {
    #[serde(default)]
    gateway: GatewayDefaults,

    #[serde(default)]
    limits: LimitsDefaults,

    #[serde(default)]
    storage: StorageDefaults,

    #[serde(default)]
    logging: LoggingDefaults,
}

// ---------------------------------------------------------------------------
// Gateway defaults
// ---------------------------------------------------------------------------

/// Default gateway port (matches bind.rs).
const DEFAULT_GATEWAY_PORT: u16 = 18700;

/// Default bind mode.
const DEFAULT_BIND_MODE: &str = "loopback";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayDefaults {
    #[serde(default = "default_gateway_port")]
    port: u16,

    #[serde(default = "default_bind_mode")]
    bind: String,
}

impl Default for GatewayDefaults {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_bind_mode(),
        }
    }
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_bind_mode() -> String {
    DEFAULT_BIND_MODE.to_string()
}

// ---------------------------------------------------------------------------
// Rate limit / body limits
// ---------------------------------------------------------------------------

/// Default requests allowed per rate window.
const DEFAULT_RATE_MAX_REQUESTS: u32 = 100;

/// Default rate window in seconds.
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Default block duration after exceeding the window, in seconds.
const DEFAULT_RATE_BLOCK_SECS: u64 = 300;

/// Default max request body size (256 KB).
const DEFAULT_BODY_LIMIT_BYTES: u64 = 262_144;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitsDefaults {
    #[serde(default = "default_rate_max_requests")]
    rate_max_requests: u32,

    #[serde(default = "default_rate_window_secs")]
    rate_window_secs: u64,

    #[serde(default = "default_rate_block_secs")]
    rate_block_secs: u64,

    #[serde(default = "default_body_limit_bytes")]
    body_limit_bytes: u64,
}

impl Default for LimitsDefaults {
    fn default() -> Self {
        Self {
            rate_max_requests: default_rate_max_requests(),
            rate_window_secs: default_rate_window_secs(),
            rate_block_secs: default_rate_block_secs(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

fn default_rate_max_requests() -> u32 {
    DEFAULT_RATE_MAX_REQUESTS
}
fn default_rate_window_secs() -> u64 {
    DEFAULT_RATE_WINDOW_SECS
}
fn default_rate_block_secs() -> u64 {
    DEFAULT_RATE_BLOCK_SECS
}
fn default_body_limit_bytes() -> u64 {
    DEFAULT_BODY_LIMIT_BYTES
}

// ---------------------------------------------------------------------------
// Temp storage defaults
// ---------------------------------------------------------------------------

/// Default temp file TTL in seconds (1 hour).
const DEFAULT_STORAGE_TTL_SECS: u64 = 3600;

/// Default sweep interval in seconds (30 minutes).
const DEFAULT_STORAGE_SWEEP_INTERVAL_SECS: u64 = 1800;

/// Default per-file size cap (50 MB).
const DEFAULT_STORAGE_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Default total store size cap (500 MB).
const DEFAULT_STORAGE_MAX_TOTAL_BYTES: u64 = 500 * 1024 * 1024;

/// Default age before an untracked disk file is removed (2 hours).
const DEFAULT_STORAGE_ORPHAN_AGE_SECS: u64 = 7200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageDefaults {
    #[serde(default = "default_storage_ttl_secs")]
    ttl_secs: u64,

    #[serde(default = "default_storage_sweep_interval_secs")]
    sweep_interval_secs: u64,

    #[serde(default = "default_storage_max_file_bytes")]
    max_file_bytes: u64,

    #[serde(default = "default_storage_max_total_bytes")]
    max_total_bytes: u64,

    #[serde(default = "default_storage_orphan_age_secs")]
    orphan_age_secs: u64,
}

impl Default for StorageDefaults {
    fn default() -> Self {
        Self {
            ttl_secs: default_storage_ttl_secs(),
            sweep_interval_secs: default_storage_sweep_interval_secs(),
            max_file_bytes: default_storage_max_file_bytes(),
            max_total_bytes: default_storage_max_total_bytes(),
            orphan_age_secs: default_storage_orphan_age_secs(),
        }
    }
}

fn default_storage_ttl_secs() -> u64 {
    DEFAULT_STORAGE_TTL_SECS
}
fn default_storage_sweep_interval_secs() -> u64 {
    DEFAULT_STORAGE_SWEEP_INTERVAL_SECS
}
fn default_storage_max_file_bytes() -> u64 {
    DEFAULT_STORAGE_MAX_FILE_BYTES
}
fn default_storage_max_total_bytes() -> u64 {
    DEFAULT_STORAGE_MAX_TOTAL_BYTES
}
fn default_storage_orphan_age_secs() -> u64 {
    DEFAULT_STORAGE_ORPHAN_AGE_SECS
}

// ---------------------------------------------------------------------------
// Logging defaults
// ---------------------------------------------------------------------------

/// Default log level.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log format.
const DEFAULT_LOG_FORMAT: &str = "plaintext";

/// Default log output destination.
const DEFAULT_LOG_OUTPUT: &str = "stdout";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoggingDefaults {
    #[serde(default = "default_log_level")]
    level: String,

    #[serde(default = "default_log_format")]
    format: String,

    #[serde(default = "default_log_output")]
    output: String,
}

impl Default for LoggingDefaults {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_log_format() -> String {
    DEFAULT_LOG_FORMAT.to_string()
}
fn default_log_output() -> String {
    DEFAULT_LOG_OUTPUT.to_string()
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Apply production-ready defaults to a raw config `Value`.
///
/// This function:
/// 1. Deserializes known sections into typed structs (which fill missing fields
///    via `#[serde(default)]`).
/// 2. Serializes those structs back.
/// 3. Deep-merges the defaults *under* the original value so user-provided
///    values always win.
///
/// Sections not covered by the typed structs pass through untouched.
pub fn apply_defaults(config: &mut Value) {
    if !config.is_object() {
        *config = Value::Object(serde_json::Map::new());
    }

    // Deserialize into typed struct — missing fields get defaults.
    let with_defaults: ConfigWithDefaults = match serde_json::from_value(config.clone()) {
        Ok(v) => v,
        Err(e) => {
            debug!(target: targets::CONFIG, "config defaults: deserialization failed, using all defaults: {e}");
            ConfigWithDefaults {
                gateway: GatewayDefaults::default(),
                limits: LimitsDefaults::default(),
                storage: StorageDefaults::default(),
                logging: LoggingDefaults::default(),
            }
        }
    };

    // Serialize the defaulted structs back to Value.
    let defaults_value = serde_json::to_value(&with_defaults).unwrap_or_default();

    // Deep-merge: defaults go *under* user values (user wins).
    merge_defaults(config, defaults_value);

    // Post-merge cross-field fixups: a single file can never be larger than
    // the whole store.
    if let Some(storage) = config.get_mut("storage").and_then(|v| v.as_object_mut()) {
        let max_total = storage.get("maxTotalBytes").and_then(|v| v.as_u64());
        let max_file = storage.get("maxFileBytes").and_then(|v| v.as_u64());
        if let (Some(total), Some(file)) = (max_total, max_file) {
            if file > total {
                debug!(target: targets::CONFIG, "storage.maxFileBytes {file} exceeds maxTotalBytes {total}; clamping");
                storage.insert("maxFileBytes".to_string(), Value::from(total));
            }
        }
    }
}

/// Deep-merge `defaults` into `target`.
///
/// - For objects: recursively merge; keys in `target` are preserved (user wins).
/// - For all other types: `target` keeps its value if present.
fn merge_defaults(target: &mut Value, defaults: Value) {
    if let (Value::Object(target_obj), Value::Object(defaults_obj)) = (target, defaults) {
        for (key, default_value) in defaults_obj {
            match target_obj.get_mut(&key) {
                Some(existing) => {
                    // Recurse into nested objects.
                    merge_defaults(existing, default_value);
                }
                None => {
                    // Key missing in target — insert the default.
                    target_obj.insert(key, default_value);
                }
            }
        }
    }
    // target already has a non-object value — user wins, keep it.
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
