// SPDX-License-Identifier: MIT

//! Built-in agent handlers
//!
//! Small, dependency-free agents useful for wiring and testing workflows.
//! Real deployments register their own handlers next to these.

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::agent::{AgentHandler, AgentRequest};
use crate::engine::error::EngineError;

/// Returns its input unchanged. Handy as a pipeline terminator and in tests.
pub struct EchoAgent;

#[async_trait]
impl AgentHandler for EchoAgent {
    fn agent_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<Value, EngineError> {
        Ok(request.input.clone())
    }
}

/// Logs its input at info level and passes it through.
pub struct LogAgent;

#[async_trait]
impl AgentHandler for LogAgent {
    fn agent_type(&self) -> &str {
        "log"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<Value, EngineError> {
        let label = request
            .config
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("log");
        log::info!("[{}] {}", label, request.input);
        Ok(request.input.clone())
    }
}

/// Calls an HTTP endpoint with the step input as a JSON body and returns the
/// response JSON. The URL comes from the step options.
pub struct HttpAgent {
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentHandler for HttpAgent {
    fn agent_type(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<Value, EngineError> {
        let url = request
            .config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::step("http", "http agent requires a 'url' option", false)
            })?;
        let response = self
            .client
            .post(url)
            .json(&request.input)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::step(
                "http",
                format!("endpoint returned {}", status),
                status.is_server_error(),
            ));
        }
        Ok(response.json::<Value>().await?)
    }
}
