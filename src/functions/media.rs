//! `media/*` functions: fetch.
//!
//! Downloads a remote file into the temp store. Only https URLs are
//! accepted, and hosts that point at loopback, private ranges, or cloud
//! metadata endpoints are rejected before any connection is made.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::registry::{
    FunctionContext, FunctionDescriptor, FunctionError, FunctionHandler, FunctionOutput,
};
use crate::storage::CreateOptions;
use crate::validation::{FieldSpec, Format, Schema};

/// Longest URL accepted for fetching.
pub const MAX_URL_LENGTH: usize = 2048;

pub fn fetch_descriptor() -> FunctionDescriptor {
    FunctionDescriptor::new("media", "fetch", "Download a file over HTTPS into temp storage")
        .with_schema(
            Schema::new()
                .field(
                    "url",
                    FieldSpec::string()
                        .required()
                        .max_length(MAX_URL_LENGTH)
                        .format(Format::Url),
                )
                .field(
                    "filename",
                    FieldSpec::string()
                        .min_length(1)
                        .max_length(128)
                        .describe("Name to record for the stored file"),
                ),
        )
        .produces_files()
}

pub struct FetchFunction {
    client: reqwest::Client,
}

impl FetchFunction {
    pub fn new() -> Self {
        // Redirects are disabled so a public URL cannot bounce the request
        // to an internal address.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        FetchFunction { client }
    }
}

impl Default for FetchFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FunctionHandler for FetchFunction {
    async fn invoke(
        &self,
        data: Map<String, Value>,
        ctx: &FunctionContext,
    ) -> Result<FunctionOutput, FunctionError> {
        let raw_url = data.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        let provided_name = data.get("filename").and_then(|v| v.as_str());

        let parsed = url::Url::parse(raw_url)
            .map_err(|_| FunctionError::Invalid("invalid URL".into()))?;
        if parsed.scheme() != "https" {
            return Err(FunctionError::Invalid(format!(
                "only https URLs are allowed, got scheme '{}'",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| FunctionError::Invalid("URL has no host".into()))?;
        if host_blocked(host) {
            return Err(FunctionError::Invalid(format!(
                "URL host is not allowed: {}",
                host
            )));
        }

        let max_size = ctx.store.config().max_file_size;

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| FunctionError::Upstream(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FunctionError::Upstream(format!(
                "upstream returned HTTP {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > max_size {
                return Err(FunctionError::Invalid(format!(
                    "remote file is too large: {} bytes (max {})",
                    content_length, max_size
                )));
            }
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        // Stream the body with a running size check; Content-Length can lie
        // or be absent entirely.
        let mut response = response;
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FunctionError::Upstream(format!("download failed: {}", e)))?
        {
            if bytes.len() as u64 + chunk.len() as u64 > max_size {
                return Err(FunctionError::Invalid(format!(
                    "remote file is too large (max {} bytes)",
                    max_size
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let filename = resolve_filename(&parsed, provided_name);
        let size = bytes.len() as u64;
        let meta = ctx
            .store
            .create(bytes, &filename, CreateOptions::mime(mime_type.clone()))
            .await?;

        Ok(FunctionOutput::new(
            format!("Fetched {} bytes ({})", size, mime_type),
            json!({
                "fileId": meta.id,
                "downloadUrl": meta.url(),
                "filename": meta.filename,
                "mimeType": mime_type,
                "size": size,
                "expiresAt": meta.expires_at.to_rfc3339(),
            }),
        ))
    }
}

/// Pick the stored filename: the caller's choice (basename only), else the
/// last URL path segment, else a generic name.
fn resolve_filename(url: &url::Url, provided: Option<&str>) -> String {
    if let Some(name) = provided {
        let base = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(name)
            .trim()
            .to_string();
        if !base.is_empty() && base != "." && base != ".." {
            return base.chars().take(128).collect();
        }
    }

    let from_path = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    if !from_path.is_empty() {
        return from_path.chars().take(128).collect();
    }

    "download.bin".to_string()
}

/// Reject hosts that would let a fetch reach local or internal services.
fn host_blocked(host: &str) -> bool {
    let host_lower = host.to_lowercase();

    if host_lower == "localhost"
        || host_lower == "localhost.localdomain"
        || host_lower.ends_with(".localhost")
    {
        return true;
    }

    // Cloud metadata endpoints.
    if host_lower == "metadata"
        || host_lower == "metadata.google.internal"
        || host_lower == "instance-data"
        || host_lower.ends_with(".internal")
    {
        return true;
    }

    // Bracketed IPv6 literals come through as "[::1]".
    let bare = host_lower
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&host_lower);

    if let Ok(ip) = bare.parse::<Ipv4Addr>() {
        return ipv4_blocked(&ip);
    }
    if let Ok(ip) = bare.parse::<Ipv6Addr>() {
        return ipv6_blocked(&ip);
    }
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => ipv4_blocked(&v4),
            IpAddr::V6(v6) => ipv6_blocked(&v6),
        };
    }

    false
}

fn ipv4_blocked(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_private()
        || ip.is_link_local()
        // CGNAT range 100.64.0.0/10.
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
}

fn ipv6_blocked(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        // Unique-local fc00::/7.
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local fe80::/10.
        || (segments[0] & 0xffc0) == 0xfe80
}
