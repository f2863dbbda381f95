//! Schema-driven input validation.
//!
//! Functions declare their expected input as a [`Schema`]: a map of field
//! name to [`FieldSpec`] (type, required flag, length/range bounds, enum
//! values, string format). Validation collects every failure instead of
//! stopping at the first, so a single response can report all problems.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Field specification
// ---------------------------------------------------------------------------

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Named string formats checked with fixed patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Format {
    Email,
    Url,
    Phone,
    HexColor,
    Uuid,
    Jwt,
    Ip,
    Base64,
}

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static RE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://[^\s]+$").unwrap());
static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").unwrap());
static RE_HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").unwrap());
static RE_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});
static RE_JWT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*$").unwrap());
static RE_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])$")
        .unwrap()
});
static RE_BASE64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap());

impl Format {
    /// Check a string against this format's pattern.
    pub fn matches(&self, s: &str) -> bool {
        match self {
            Format::Email => RE_EMAIL.is_match(s),
            Format::Url => RE_URL.is_match(s),
            Format::Phone => RE_PHONE.is_match(s),
            Format::HexColor => RE_HEX_COLOR.is_match(s),
            Format::Uuid => RE_UUID.is_match(s),
            Format::Jwt => RE_JWT.is_match(s),
            Format::Ip => RE_IPV4.is_match(s),
            Format::Base64 => RE_BASE64.is_match(s) && s.len() % 4 == 0,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Format::Email => "a valid email address",
            Format::Url => "a valid http(s) URL",
            Format::Phone => "a valid phone number",
            Format::HexColor => "a hex color like #1a2b3c",
            Format::Uuid => "a valid UUID",
            Format::Jwt => "a valid JWT",
            Format::Ip => "a valid IPv4 address",
            Format::Base64 => "valid base64",
        }
    }
}

/// Validation rules for a single field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minimum length for strings, minimum element count for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Inclusive numeric lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values for string fields.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
}

impl FieldSpec {
    fn new(field_type: FieldType) -> Self {
        FieldSpec {
            field_type,
            required: false,
            description: None,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            allowed: None,
            format: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn array() -> Self {
        Self::new(FieldType::Array)
    }

    pub fn object() -> Self {
        Self::new(FieldType::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn min(mut self, n: f64) -> Self {
        self.min = Some(n);
        self
    }

    pub fn max(mut self, n: f64) -> Self {
        self.max = Some(n);
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A single validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: String,
    /// Short machine-readable reason (`required`, `type`, `minLength`, ...).
    pub code: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, code: &'static str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            code,
            message: message.into(),
        }
    }
}

/// Input schema for a function: field name -> [`FieldSpec`].
///
/// Fields are stored sorted by name so listings and error ordering are
/// deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Schema {
            fields: BTreeMap::new(),
        }
    }

    /// Add a field spec, replacing any existing spec for the same name.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    /// Validate an input object against this schema.
    ///
    /// Every failure is collected; `Ok(())` means the input satisfied all
    /// field specs. Extra keys not named in the schema are ignored. A JSON
    /// `null` value is treated the same as an absent field.
    pub fn validate(&self, data: &Map<String, Value>) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        for (name, spec) in &self.fields {
            let value = match data.get(name) {
                Some(v) if !v.is_null() => v,
                _ => {
                    if spec.required {
                        errors.push(FieldError::new(name, "required", "is required"));
                    }
                    continue;
                }
            };
            check_value(name, spec, value, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_value(name: &str, spec: &FieldSpec, value: &Value, errors: &mut Vec<FieldError>) {
    let type_ok = match spec.field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        // Accept any JSON number with no fractional part, matching how
        // clients that round-trip through floats send integer values.
        FieldType::Integer => value.as_f64().is_some_and(|f| f.fract() == 0.0),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    };
    if !type_ok {
        errors.push(FieldError::new(
            name,
            "type",
            format!("must be a {}", spec.field_type.name()),
        ));
        return;
    }

    match spec.field_type {
        FieldType::String => {
            let s = value.as_str().unwrap_or_default();
            let chars = s.chars().count();
            if let Some(min) = spec.min_length {
                if chars < min {
                    errors.push(FieldError::new(
                        name,
                        "minLength",
                        format!("must be at least {} characters", min),
                    ));
                }
            }
            if let Some(max) = spec.max_length {
                if chars > max {
                    errors.push(FieldError::new(
                        name,
                        "maxLength",
                        format!("must be at most {} characters", max),
                    ));
                }
            }
            if let Some(allowed) = &spec.allowed {
                if !allowed.iter().any(|a| a == s) {
                    errors.push(FieldError::new(
                        name,
                        "enum",
                        format!("must be one of: {}", allowed.join(", ")),
                    ));
                }
            }
            if let Some(format) = &spec.format {
                if !format.matches(s) {
                    errors.push(FieldError::new(
                        name,
                        "format",
                        format!("must be {}", format.describe()),
                    ));
                }
            }
        }
        FieldType::Number | FieldType::Integer => {
            let n = value.as_f64().unwrap_or_default();
            if let Some(min) = spec.min {
                if n < min {
                    errors.push(FieldError::new(name, "min", format!("must be >= {}", min)));
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    errors.push(FieldError::new(name, "max", format!("must be <= {}", max)));
                }
            }
        }
        FieldType::Array => {
            let len = value.as_array().map(|a| a.len()).unwrap_or_default();
            if let Some(min) = spec.min_length {
                if len < min {
                    errors.push(FieldError::new(
                        name,
                        "minLength",
                        format!("must have at least {} items", min),
                    ));
                }
            }
            if let Some(max) = spec.max_length {
                if len > max {
                    errors.push(FieldError::new(
                        name,
                        "maxLength",
                        format!("must have at most {} items", max),
                    ));
                }
            }
        }
        FieldType::Boolean | FieldType::Object => {}
    }
}

/// Convert field errors into JSON detail records for an error envelope.
pub fn errors_to_details(errors: &[FieldError]) -> Vec<Value> {
    errors
        .iter()
        .map(|e| serde_json::to_value(e).unwrap_or_else(|_| Value::String(e.message.clone())))
        .collect()
}
