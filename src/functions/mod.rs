//! Built-in functions
//!
//! Every function the gateway ships is registered here, at startup, in one
//! table. Handlers that talk to an upstream service degrade to deterministic
//! local fallback data when the upstream is unreachable; the dispatcher
//! marks such responses with `metadata.source = "fallback"`.

pub mod info;
pub mod media;
pub mod tools;

use serde_json::Value;
use std::sync::Arc;

use crate::registry::RegistryBuilder;

/// Settings the built-in functions need at registration time.
#[derive(Debug, Clone, Default)]
pub struct FunctionsConfig {
    /// OpenWeatherMap API key; without it the weather function always
    /// serves fallback data.
    pub weather_api_key: Option<String>,
}

impl FunctionsConfig {
    /// Build from the loaded config value, with env overrides.
    pub fn from_config(config: &Value) -> Self {
        let weather_api_key = std::env::var("SWITCHBOARD_WEATHER_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                config
                    .get("functions")
                    .and_then(|f| f.get("weatherApiKey"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            });

        FunctionsConfig { weather_api_key }
    }
}

/// Register every built-in function.
///
/// This is the complete registration table; nothing is discovered or loaded
/// dynamically at runtime.
pub fn register_builtins(builder: RegistryBuilder, config: &FunctionsConfig) -> RegistryBuilder {
    let weather_api_key = config.weather_api_key.clone();

    builder
        .register(tools::qr_descriptor(), || Arc::new(tools::QrFunction::new()))
        .register(tools::uuid_descriptor(), || Arc::new(tools::UuidFunction))
        .register(tools::hash_descriptor(), || Arc::new(tools::HashFunction))
        .register(tools::base64_descriptor(), || {
            Arc::new(tools::Base64Function)
        })
        .register(info::time_descriptor(), || Arc::new(info::TimeFunction))
        .register(info::weather_descriptor(), move || {
            Arc::new(info::WeatherFunction::new(weather_api_key.clone()))
        })
        .register(info::currency_descriptor(), || {
            Arc::new(info::CurrencyFunction::new())
        })
        .register(media::fetch_descriptor(), || {
            Arc::new(media::FetchFunction::new())
        })
}
