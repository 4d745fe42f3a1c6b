// SPDX-License-Identifier: MIT

//! Circuit breaking around unreliable downstream dependencies
//!
//! One breaker per logical dependency name, so failures in one dependency
//! cannot starve calls to unrelated ones. While OPEN, `execute` returns
//! `EngineError::CircuitOpen` without constructing the wrapped future.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::engine::error::EngineError;

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; failures are counted in a rolling window
    Closed,
    /// Calls fail fast; no downstream call is attempted
    Open,
    /// A bounded number of trial calls probe for recovery
    HalfOpen,
}

/// Per-breaker tuning parameters
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the rolling window that trip the breaker
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted
    pub window: Duration,
    /// Time OPEN before trial calls are allowed
    pub reset_timeout: Duration,
    /// Trial calls permitted while HALF_OPEN
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

/// Fail-fast guard for one named dependency
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                half_open_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Run an operation through the breaker.
    ///
    /// The factory is only invoked when the breaker admits the call, so an
    /// OPEN breaker never does downstream work.
    pub async fn execute<T, Fut, F>(&self, operation: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        self.before_call()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn before_call(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.maybe_half_open(&mut inner);

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(EngineError::CircuitOpen {
                breaker: self.name.clone(),
            }),
            BreakerState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    return Err(EngineError::CircuitOpen {
                        breaker: self.name.clone(),
                    });
                }
                inner.half_open_calls += 1;
                Ok(())
            }
        }
    }

    /// OPEN -> HALF_OPEN once the reset timeout has elapsed
    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let expired = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.reset_timeout)
                .unwrap_or(false);
            if expired {
                log::info!("circuit breaker '{}' entering half-open", self.name);
                inner.state = BreakerState::HalfOpen;
                inner.half_open_calls = 0;
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.state == BreakerState::HalfOpen {
            log::info!("circuit breaker '{}' closed after trial success", self.name);
        }
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.half_open_calls = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            BreakerState::HalfOpen => {
                log::warn!("circuit breaker '{}' reopened after trial failure", self.name);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                let now = Instant::now();
                inner.failures.push_back(now);
                let window = self.config.window;
                while let Some(front) = inner.failures.front() {
                    if now.duration_since(*front) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    log::warn!(
                        "circuit breaker '{}' opened after {} failures",
                        self.name,
                        inner.failures.len()
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Breakers keyed by logical dependency name
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for a dependency, creating it with the default
    /// config on first use.
    pub async fn get_or_create(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Install a breaker with a non-default config for one dependency
    pub async fn configure(&self, name: &str, config: BreakerConfig) {
        let mut breakers = self.breakers.write().await;
        breakers.insert(
            name.to_string(),
            std::sync::Arc::new(CircuitBreaker::new(name, config)),
        );
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
