//! Uniform tool RPC client.
//!
//! Every tool is `POST <tool_server>/<tool_name>` with the call args as the
//! JSON body. Whatever comes back — success, error payload, garbage, or a
//! transport failure — is normalized into a `ToolOutput` through the
//! contract enforcer; callers never see a raised error from a tool.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use cg_contracts::ContractEnforcer;
use cg_domain::config::ToolsConfig;
use cg_domain::tool::{ToolCall, ToolOutput};
use cg_domain::{Error, Result};

pub struct ToolClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
    enforcer: Arc<ContractEnforcer>,
}

impl ToolClient {
    pub fn new(config: &ToolsConfig, enforcer: Arc<ContractEnforcer>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: config.server_url.trim_end_matches('/').to_owned(),
            timeout,
            client,
            enforcer,
        })
    }

    /// Invoke one tool. Transport failures and timeouts are returned as
    /// `Err` so the caller's circuit breaker can account for them; any HTTP
    /// response, success or not, is normalized into a `ToolOutput`.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
        let url = format!("{}/{}", self.base_url, call.tool);
        tracing::debug!(tool = %call.tool, url = %url, "tool RPC");

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&call.args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.timeout)
                } else {
                    Error::Http(format!("{}: {e}", call.tool))
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        let mut output = if status.is_success() {
            self.enforcer.parse_tool_output(&body, &call.tool)
        } else {
            ToolOutput::failed(&call.tool, format!("HTTP {} from tool server", status.as_u16()))
        };
        output.metadata.insert(
            "elapsed_ms".into(),
            Value::from(started.elapsed().as_millis() as u64),
        );
        Ok(output)
    }
}
