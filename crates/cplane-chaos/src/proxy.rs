//! ---
//! cp_section: "04-chaos-engineering"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Controlled fault injection with experiment lifecycle management."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use cplane_common::config::ChaosConfig;

use crate::Result;

/// One named fault attached to a proxy, in the wire shape the fault-proxy
/// admin API expects.
#[derive(Debug, Clone, Serialize)]
pub struct Toxic {
    /// Toxic name, used later for removal.
    pub name: String,
    /// Toxic kind understood by the proxy.
    #[serde(rename = "type")]
    pub kind: String,
    /// Which direction of the stream is affected.
    pub stream: String,
    /// Share of connections affected, 0.0 to 1.0.
    pub toxicity: f64,
    /// Kind-specific attributes.
    pub attributes: serde_json::Value,
}

impl Toxic {
    /// Downstream latency with jitter.
    pub fn latency(name: impl Into<String>, latency_ms: u64, jitter_ms: u64) -> Self {
        Self {
            name: name.into(),
            kind: "latency".into(),
            stream: "downstream".into(),
            toxicity: 1.0,
            attributes: json!({ "latency": latency_ms, "jitter": jitter_ms }),
        }
    }

    /// Hang the connection, then close it after `timeout_ms`.
    pub fn timeout(name: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            kind: "timeout".into(),
            stream: "downstream".into(),
            toxicity: 1.0,
            attributes: json!({ "timeout": timeout_ms }),
        }
    }

    /// Reset the peer connection after `timeout_ms`.
    pub fn reset_peer(name: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            kind: "reset_peer".into(),
            stream: "downstream".into(),
            toxicity: 1.0,
            attributes: json!({ "timeout": timeout_ms }),
        }
    }
}

/// HTTP client for a Toxiproxy-compatible fault-proxy admin API.
///
/// Every call carries the configured connect and request timeouts; a down
/// proxy is reported quickly, never waited on.
pub struct FaultProxyClient {
    base_url: String,
    client: reqwest::Client,
}

impl FaultProxyClient {
    /// Build a client from the chaos configuration.
    pub fn new(config: &ChaosConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.proxy_connect_timeout)
            .timeout(config.proxy_request_timeout)
            .build()?;
        Ok(Self {
            base_url: config.proxy_base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Admin API base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe whether the proxy admin API answers at all.
    pub async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/proxies", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "fault proxy probe failed");
                false
            }
        }
    }

    /// Enable or disable a named proxy. Disabling severs the network path.
    pub async fn set_proxy_enabled(&self, proxy: &str, enabled: bool) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/proxies/{proxy}", self.base_url))
            .json(&json!({ "enabled": enabled }))
            .send()
            .await?;
        response.error_for_status()?;
        debug!(proxy, enabled, "proxy toggled");
        Ok(())
    }

    /// Attach a toxic to a named proxy.
    pub async fn add_toxic(&self, proxy: &str, toxic: &Toxic) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/proxies/{proxy}/toxics", self.base_url))
            .json(toxic)
            .send()
            .await?;
        response.error_for_status()?;
        debug!(proxy, toxic = %toxic.name, kind = %toxic.kind, "toxic added");
        Ok(())
    }

    /// Remove a named toxic. A missing toxic is treated as already removed.
    pub async fn remove_toxic(&self, proxy: &str, toxic_name: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!(
                "{}/proxies/{proxy}/toxics/{toxic_name}",
                self.base_url
            ))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(proxy, toxic = toxic_name, "toxic already absent");
            return Ok(());
        }
        response.error_for_status()?;
        debug!(proxy, toxic = toxic_name, "toxic removed");
        Ok(())
    }
}
