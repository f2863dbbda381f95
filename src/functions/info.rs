//! `info/*` functions: time, weather, currency.
//!
//! Weather and currency lookups try their upstream first and quietly fall
//! back to deterministic local data when the upstream is unreachable, so
//! the endpoints stay usable offline.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::logging::targets;
use crate::registry::{
    FunctionContext, FunctionDescriptor, FunctionError, FunctionHandler, FunctionOutput,
};
use crate::validation::{FieldSpec, Schema};

// ---------------------------------------------------------------------------
// info/time
// ---------------------------------------------------------------------------

pub fn time_descriptor() -> FunctionDescriptor {
    FunctionDescriptor::new("info", "time", "Get the current time, UTC by default")
        .with_schema(Schema::new().field(
            "offset",
            FieldSpec::string()
                .max_length(10)
                .describe("UTC offset such as +05:30 (default UTC)"),
        ))
}

pub struct TimeFunction;

#[async_trait]
impl FunctionHandler for TimeFunction {
    async fn invoke(
        &self,
        data: Map<String, Value>,
        _ctx: &FunctionContext,
    ) -> Result<FunctionOutput, FunctionError> {
        let now = Utc::now();
        let offset = match data.get("offset").and_then(Value::as_str) {
            Some(raw) => Some(
                raw.parse::<FixedOffset>()
                    .map_err(|_| FunctionError::Invalid(format!("Invalid UTC offset: {}", raw)))?,
            ),
            None => None,
        };

        let (timestamp, timezone) = match offset {
            Some(tz) => (
                now.with_timezone(&tz)
                    .format("%Y-%m-%dT%H:%M:%S%:z")
                    .to_string(),
                tz.to_string(),
            ),
            None => (
                now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "UTC".to_string(),
            ),
        };

        Ok(FunctionOutput::new(
            format!("Current time: {}", timestamp),
            json!({
                "timestamp": timestamp,
                "timezone": timezone,
                "unix": now.timestamp(),
                "unixMs": now.timestamp_millis(),
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// info/weather
// ---------------------------------------------------------------------------

const WEATHER_API_BASE: &str = "https://api.openweathermap.org/data/2.5/weather";

const FALLBACK_CONDITIONS: &[&str] = &[
    "clear sky",
    "few clouds",
    "scattered clouds",
    "overcast",
    "light rain",
    "moderate rain",
    "mist",
    "snow",
];

pub fn weather_descriptor() -> FunctionDescriptor {
    FunctionDescriptor::new("info", "weather", "Current weather conditions for a city")
        .with_schema(
            Schema::new()
                .field(
                    "city",
                    FieldSpec::string().required().min_length(1).max_length(80),
                )
                .field(
                    "units",
                    FieldSpec::string()
                        .allowed(&["metric", "imperial"])
                        .describe("Unit system (default metric)"),
                ),
        )
}

pub struct WeatherFunction {
    api_key: Option<String>,
    api_base: String,
}

impl WeatherFunction {
    pub fn new(api_key: Option<String>) -> Self {
        WeatherFunction {
            api_key,
            api_base: WEATHER_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(api_key: Option<String>, api_base: impl Into<String>) -> Self {
        WeatherFunction {
            api_key,
            api_base: api_base.into(),
        }
    }

    /// Query the live weather API. `Ok(None)` means "fall back"; only an
    /// unknown city is surfaced as a hard error.
    async fn fetch_live(
        &self,
        ctx: &FunctionContext,
        city: &str,
        units: &str,
    ) -> Result<Option<Value>, FunctionError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(None);
        };

        let result = ctx
            .http
            .get(&self.api_base)
            .query(&[("q", city), ("appid", api_key), ("units", units)])
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(target: targets::FUNCTIONS, error = %e, "Weather upstream unreachable, using fallback");
                return Ok(None);
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FunctionError::Invalid(format!("Unknown city: {}", city)));
        }
        if !response.status().is_success() {
            warn!(target: targets::FUNCTIONS, status = %response.status(), "Weather upstream returned error, using fallback");
            return Ok(None);
        }

        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(target: targets::FUNCTIONS, error = %e, "Weather upstream sent malformed body, using fallback");
                return Ok(None);
            }
        };

        let (Some(temp), Some(humidity)) = (
            body.pointer("/main/temp").and_then(|v| v.as_f64()),
            body.pointer("/main/humidity").and_then(|v| v.as_u64()),
        ) else {
            warn!(target: targets::FUNCTIONS, "Weather upstream body missing fields, using fallback");
            return Ok(None);
        };
        let conditions = body
            .pointer("/weather/0/description")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let wind = body
            .pointer("/wind/speed")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let name = body
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(city)
            .to_string();

        Ok(Some(json!({
            "city": name,
            "temperature": round1(temp),
            "units": units,
            "conditions": conditions,
            "humidity": humidity,
            "windSpeed": round1(wind),
        })))
    }
}

/// Deterministic weather derived from the city name, so repeated calls for
/// the same city agree with each other.
fn fallback_weather(city: &str, units: &str) -> Value {
    let digest = Sha256::digest(city.to_lowercase().as_bytes());
    let temp_c = (digest[0] % 30) as f64 - 5.0;
    let humidity = 40 + (digest[1] % 50) as u64;
    let wind_ms = (digest[2] % 120) as f64 / 10.0;
    let conditions = FALLBACK_CONDITIONS[digest[3] as usize % FALLBACK_CONDITIONS.len()];

    let (temperature, wind_speed) = if units == "imperial" {
        (round1(temp_c * 9.0 / 5.0 + 32.0), round1(wind_ms * 2.237))
    } else {
        (temp_c, wind_ms)
    };

    json!({
        "city": city,
        "temperature": temperature,
        "units": units,
        "conditions": conditions,
        "humidity": humidity,
        "windSpeed": wind_speed,
    })
}

#[async_trait]
impl FunctionHandler for WeatherFunction {
    async fn invoke(
        &self,
        data: Map<String, Value>,
        ctx: &FunctionContext,
    ) -> Result<FunctionOutput, FunctionError> {
        let city = data.get("city").and_then(|v| v.as_str()).unwrap_or_default();
        let units = data
            .get("units")
            .and_then(|v| v.as_str())
            .unwrap_or("metric");

        let (payload, fallback) = match self.fetch_live(ctx, city, units).await? {
            Some(live) => (live, false),
            None => (fallback_weather(city, units), true),
        };

        let message = format!(
            "Weather for {}: {}° and {}",
            payload["city"].as_str().unwrap_or(city),
            payload["temperature"],
            payload["conditions"].as_str().unwrap_or("unknown"),
        );
        let output = FunctionOutput::new(message, payload);
        Ok(if fallback { output.fallback() } else { output })
    }
}

// ---------------------------------------------------------------------------
// info/currency
// ---------------------------------------------------------------------------

const CURRENCY_API_BASE: &str = "https://open.er-api.com/v6/latest";

/// Fixed USD-relative rates used when the live API is unreachable.
const FALLBACK_USD_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("JPY", 155.0),
    ("CHF", 0.88),
    ("CAD", 1.36),
    ("AUD", 1.52),
    ("NZD", 1.66),
    ("CNY", 7.2),
    ("INR", 83.3),
    ("BRL", 5.4),
    ("MXN", 17.1),
    ("SEK", 10.5),
    ("NOK", 10.6),
    ("KRW", 1350.0),
];

pub fn currency_descriptor() -> FunctionDescriptor {
    FunctionDescriptor::new("info", "currency", "Convert an amount between currencies")
        .with_schema(
            Schema::new()
                .field(
                    "amount",
                    FieldSpec::number()
                        .required()
                        .min(0.01)
                        .max(1_000_000_000.0),
                )
                .field(
                    "from",
                    FieldSpec::string().required().min_length(3).max_length(3),
                )
                .field(
                    "to",
                    FieldSpec::string().required().min_length(3).max_length(3),
                ),
        )
}

pub struct CurrencyFunction {
    api_base: String,
}

impl CurrencyFunction {
    pub fn new() -> Self {
        CurrencyFunction {
            api_base: CURRENCY_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(api_base: impl Into<String>) -> Self {
        CurrencyFunction {
            api_base: api_base.into(),
        }
    }

    /// Look up the live rate. `Ok(None)` means "fall back".
    async fn live_rate(
        &self,
        ctx: &FunctionContext,
        from: &str,
        to: &str,
    ) -> Result<Option<f64>, FunctionError> {
        let url = format!("{}/{}", self.api_base, from);
        let result = ctx.http.get(&url).send().await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(target: targets::FUNCTIONS, status = %r.status(), "Currency upstream returned error, using fallback");
                return Ok(None);
            }
            Err(e) => {
                warn!(target: targets::FUNCTIONS, error = %e, "Currency upstream unreachable, using fallback");
                return Ok(None);
            }
        };

        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(target: targets::FUNCTIONS, error = %e, "Currency upstream sent malformed body, using fallback");
                return Ok(None);
            }
        };

        if body.get("result").and_then(|v| v.as_str()) != Some("success") {
            return Ok(None);
        }
        let Some(rates) = body.get("rates").and_then(|v| v.as_object()) else {
            return Ok(None);
        };
        match rates.get(to).and_then(|v| v.as_f64()) {
            Some(rate) => Ok(Some(rate)),
            // The live API answered but does not know the target code.
            None => Err(FunctionError::Invalid(format!(
                "Unsupported currency: {}",
                to
            ))),
        }
    }
}

impl Default for CurrencyFunction {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_usd_rate(code: &str) -> Option<f64> {
    FALLBACK_USD_RATES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, r)| *r)
}

#[async_trait]
impl FunctionHandler for CurrencyFunction {
    async fn invoke(
        &self,
        data: Map<String, Value>,
        ctx: &FunctionContext,
    ) -> Result<FunctionOutput, FunctionError> {
        let amount = data.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let from = data
            .get("from")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_uppercase();
        let to = data
            .get("to")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_uppercase();

        let (rate, fallback) = match self.live_rate(ctx, &from, &to).await? {
            Some(rate) => (rate, false),
            None => {
                let from_rate = fallback_usd_rate(&from).ok_or_else(|| {
                    FunctionError::Invalid(format!("Unsupported currency: {}", from))
                })?;
                let to_rate = fallback_usd_rate(&to).ok_or_else(|| {
                    FunctionError::Invalid(format!("Unsupported currency: {}", to))
                })?;
                (to_rate / from_rate, true)
            }
        };

        let converted = round2(amount * rate);
        let output = FunctionOutput::new(
            format!("{} {} = {} {}", amount, from, converted, to),
            json!({
                "amount": amount,
                "from": from,
                "to": to,
                "rate": round6(rate),
                "converted": converted,
            }),
        );
        Ok(if fallback { output.fallback() } else { output })
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}
