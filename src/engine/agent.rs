// SPDX-License-Identifier: MIT

//! Agent dispatch boundary
//!
//! The engine never depends on concrete agent implementations; it invokes
//! whatever handler is registered for a request's `agent_type`. Every
//! dispatch runs through a circuit breaker keyed by that agent type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::breaker::{BreakerConfig, BreakerRegistry};
use crate::engine::error::EngineError;

/// A request dispatched to a registered agent handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent_type: String,
    pub input: Value,
    /// Execution context as JSON (trace id, session/user identifiers)
    #[serde(default)]
    pub context: Value,
    /// Step-level options passed through from the workflow definition
    #[serde(default)]
    pub config: Value,
}

/// Outcome of an agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl AgentResponse {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            metadata: None,
        }
    }
}

/// The seam at which external capability handlers plug in.
///
/// `agent_type()` must be unique within one executor's registry.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn agent_type(&self) -> &str;

    async fn execute(&self, request: &AgentRequest) -> Result<Value, EngineError>;
}

/// Looks up a handler by agent type and invokes it behind a breaker
pub struct AgentExecutor {
    handlers: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
    breakers: BreakerRegistry,
}

impl AgentExecutor {
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            breakers: BreakerRegistry::new(breaker_config),
        }
    }

    pub async fn register(&self, handler: Arc<dyn AgentHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(handler.agent_type().to_string(), handler);
    }

    pub async fn has_handler(&self, agent_type: &str) -> bool {
        self.handlers.read().await.contains_key(agent_type)
    }

    /// Dispatch a request to its handler.
    ///
    /// Unknown agent types fail before the breaker is consulted; handler
    /// failures count against the breaker for that agent type.
    pub async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, EngineError> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&request.agent_type).cloned()
        };
        let handler = handler.ok_or_else(|| EngineError::UnknownAgent {
            agent_type: request.agent_type.clone(),
        })?;

        let breaker = self
            .breakers
            .get_or_create(&format!("agent:{}", request.agent_type))
            .await;

        let output = breaker.execute(|| handler.execute(request)).await?;
        Ok(AgentResponse::ok(output))
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }
}

impl Default for AgentExecutor {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::breaker::BreakerState;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl AgentHandler for EchoHandler {
        fn agent_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, request: &AgentRequest) -> Result<Value, EngineError> {
            Ok(request.input.clone())
        }
    }

    struct FailingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentHandler for FailingHandler {
        fn agent_type(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _request: &AgentRequest) -> Result<Value, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::step("s", "downstream unavailable", true))
        }
    }

    fn request(agent_type: &str, input: Value) -> AgentRequest {
        AgentRequest {
            agent_type: agent_type.to_string(),
            input,
            context: Value::Null,
            config: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let executor = AgentExecutor::default();
        executor.register(Arc::new(EchoHandler)).await;

        let response = executor
            .execute(&request("echo", json!({"text": "hi"})))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.output, Some(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn test_unknown_agent_type() {
        let executor = AgentExecutor::default();
        let err = executor
            .execute(&request("ghost", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownAgent { agent_type } if agent_type == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_failures_trip_the_agent_breaker() {
        let executor = AgentExecutor::new(BreakerConfig {
            failure_threshold: 2,
            window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(10),
            half_open_max_calls: 1,
        });
        let handler = Arc::new(FailingHandler {
            calls: AtomicU32::new(0),
        });
        executor.register(handler.clone()).await;

        for _ in 0..2 {
            let _ = executor.execute(&request("flaky", json!({}))).await;
        }
        let breaker = executor.breakers().get_or_create("agent:flaky").await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // Short-circuited: the handler is not called again
        let err = executor
            .execute(&request("flaky", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CircuitOpen { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_breakers_isolated_per_agent_type() {
        let executor = AgentExecutor::new(BreakerConfig {
            failure_threshold: 1,
            window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(10),
            half_open_max_calls: 1,
        });
        executor.register(Arc::new(EchoHandler)).await;
        executor
            .register(Arc::new(FailingHandler {
                calls: AtomicU32::new(0),
            }))
            .await;

        let _ = executor.execute(&request("flaky", json!({}))).await;

        // The echo agent still works while flaky's breaker is open
        let response = executor
            .execute(&request("echo", json!({"ok": true})))
            .await
            .unwrap();
        assert!(response.success);
    }
}
