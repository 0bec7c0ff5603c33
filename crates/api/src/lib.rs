//! Execution gateway client utilities.
//!
//! This crate provides a lightweight client for the workflow execution
//! gateway. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Discovering credentials from `APIFLOW_API_TOKEN`
//! - Validating the gateway base URL for safety
//! - Building requests with a consistent User-Agent and Accept headers
//!
//! The primary entry point is [`GatewayClient`]. Create an instance via
//! [`GatewayClient::new`] (or [`GatewayClient::from_env`]), then build
//! requests with [`GatewayClient::request`].

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder, Url, header};
use tracing::debug;

/// Environment variable naming the gateway base URL.
pub const GATEWAY_URL_ENV: &str = "APIFLOW_GATEWAY_URL";
/// Environment variable carrying the bearer token, when the gateway needs one.
pub const API_TOKEN_ENV: &str = "APIFLOW_API_TOKEN";
/// Default gateway address for local development.
const DEFAULT_GATEWAY_URL: &str = "http://localhost:8000";
/// Hostnames allowed with any scheme for local development.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Thin wrapper around a configured `reqwest::Client` for gateway access.
///
/// The client pre-configures default headers and builds requests against a
/// validated base URL. Authentication, when present, is read from the
/// environment.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl GatewayClient {
    /// Constructs a client for an explicit base URL.
    ///
    /// Non-localhost hosts must use HTTPS. A bearer token is attached when
    /// `APIFLOW_API_TOKEN` is set.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        validate_base_url(&base_url)?;

        let mut default_headers = header::HeaderMap::new();
        if let Ok(api_token) = env::var(API_TOKEN_ENV) {
            let authorization_header_value = format!("Bearer {}", api_token);
            default_headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&authorization_header_value).context("invalid API token value")?,
            );
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("apiflow/0.1; {}", env::consts::OS),
        })
    }

    /// Constructs a client from `APIFLOW_GATEWAY_URL`, falling back to the
    /// local development default.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(GATEWAY_URL_ENV).unwrap_or_else(|_| DEFAULT_GATEWAY_URL.into());
        Self::new(base_url)
    }

    /// Builds a `reqwest::RequestBuilder` for a method and gateway-relative
    /// path, with the configured User-Agent applied.
    pub fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        debug!(%url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }
}

/// Validates that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: the scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|error| anyhow!("Invalid gateway URL '{}': {}", base, error))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("gateway URL must include a host"))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "gateway URL must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        ));
    }

    Ok(())
}
