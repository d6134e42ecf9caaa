//! Circuit breaker for the external enrichment services.
//!
//! One circuit per service, with the usual state machine:
//! - **Closed**: requests pass; consecutive failures within the window count
//!   toward the trip threshold.
//! - **Open**: requests fail fast with [`PipelineError::CircuitOpen`]
//!   (retriable, so the dispatcher requeues instead of burying the task).
//! - **HalfOpen**: after the recovery timeout, spaced probe requests are
//!   allowed; enough successes close the circuit, any failure reopens it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::{CounterVec, IntGaugeVec, Opts, Registry};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within the window that trip the circuit.
    pub failure_threshold: u32,
    /// Window for counting failures.
    pub failure_window: Duration,
    /// How long an open circuit blocks before allowing a probe.
    pub open_timeout: Duration,
    /// Successes needed in half-open to close.
    pub half_open_success_threshold: u32,
    /// Spacing between half-open probes.
    pub half_open_probe_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
            half_open_probe_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_timestamps: Vec<Instant>,
    opened_at: Option<Instant>,
    last_probe: Option<Instant>,
    half_open_successes: u32,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_timestamps: Vec::new(),
            opened_at: None,
            last_probe: None,
            half_open_successes: 0,
        }
    }
}

#[derive(Clone)]
struct BreakerMetrics {
    state_gauge: IntGaugeVec,
    trips_total: CounterVec,
    requests_blocked: CounterVec,
}

impl BreakerMetrics {
    fn new(registry: &Registry) -> std::result::Result<Self, prometheus::Error> {
        let state_gauge = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit state (0=closed, 1=open, 2=half_open)",
            )
            .namespace("pipeline"),
            &["service"],
        )?;
        let trips_total = CounterVec::new(
            Opts::new("circuit_breaker_trips_total", "Circuit trips to open")
                .namespace("pipeline"),
            &["service"],
        )?;
        let requests_blocked = CounterVec::new(
            Opts::new(
                "circuit_breaker_requests_blocked_total",
                "Requests blocked by an open circuit",
            )
            .namespace("pipeline"),
            &["service"],
        )?;
        registry.register(Box::new(state_gauge.clone()))?;
        registry.register(Box::new(trips_total.clone()))?;
        registry.register(Box::new(requests_blocked.clone()))?;
        Ok(Self {
            state_gauge,
            trips_total,
            requests_blocked,
        })
    }

    fn set_state(&self, service: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.state_gauge.with_label_values(&[service]).set(value);
    }
}

/// Process-wide breaker table, one circuit per enrichment service.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<String, Circuit>>>,
    metrics: Option<BreakerMetrics>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, registry: &Registry) -> Result<Self> {
        self.metrics = Some(
            BreakerMetrics::new(registry)
                .map_err(|e| PipelineError::Config(format!("metrics registration: {}", e)))?,
        );
        Ok(self)
    }

    pub async fn state(&self, service: &str) -> CircuitState {
        self.circuits
            .read()
            .await
            .get(service)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Whether a request may proceed, performing open -> half-open
    /// transitions as timeouts elapse.
    pub async fn can_proceed(&self, service: &str) -> bool {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(service.to_string()).or_default();
        let now = Instant::now();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.config.open_timeout {
                    info!(service = service, "circuit half-open, allowing probe");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_successes = 0;
                    circuit.last_probe = Some(now);
                    if let Some(metrics) = &self.metrics {
                        metrics.set_state(service, CircuitState::HalfOpen);
                    }
                    true
                } else {
                    if let Some(metrics) = &self.metrics {
                        metrics.requests_blocked.with_label_values(&[service]).inc();
                    }
                    false
                }
            }
            CircuitState::HalfOpen => {
                let probe_due = circuit.last_probe.map_or(true, |last| {
                    now.duration_since(last) >= self.config.half_open_probe_interval
                });
                if probe_due {
                    circuit.last_probe = Some(now);
                    true
                } else {
                    if let Some(metrics) = &self.metrics {
                        metrics.requests_blocked.with_label_values(&[service]).inc();
                    }
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, service: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(service.to_string()).or_default();
        match circuit.state {
            CircuitState::Closed => circuit.failure_timestamps.clear(),
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.half_open_success_threshold {
                    info!(service = service, "circuit closed after recovery");
                    *circuit = Circuit::default();
                    if let Some(metrics) = &self.metrics {
                        metrics.set_state(service, CircuitState::Closed);
                    }
                }
            }
            CircuitState::Open => {
                *circuit = Circuit::default();
                if let Some(metrics) = &self.metrics {
                    metrics.set_state(service, CircuitState::Closed);
                }
            }
        }
    }

    pub async fn record_failure(&self, service: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(service.to_string()).or_default();
        let now = Instant::now();

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_timestamps.push(now);
                let window = self.config.failure_window;
                circuit
                    .failure_timestamps
                    .retain(|&ts| now.duration_since(ts) < window);
                if circuit.failure_timestamps.len() >= self.config.failure_threshold as usize {
                    warn!(
                        service = service,
                        failures = circuit.failure_timestamps.len(),
                        "circuit tripped open"
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(now);
                    if let Some(metrics) = &self.metrics {
                        metrics.set_state(service, CircuitState::Open);
                        metrics.trips_total.with_label_values(&[service]).inc();
                    }
                }
            }
            CircuitState::HalfOpen => {
                warn!(service = service, "probe failed, circuit reopened");
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(now);
                circuit.half_open_successes = 0;
                if let Some(metrics) = &self.metrics {
                    metrics.set_state(service, CircuitState::Open);
                    metrics.trips_total.with_label_values(&[service]).inc();
                }
            }
            CircuitState::Open => {
                circuit.opened_at = Some(now);
            }
        }
    }

    /// Run an operation under the breaker. Blocked calls fail fast with the
    /// retriable `CircuitOpen`; only transient errors count as failures.
    pub async fn execute<F, Fut, T>(&self, service: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.can_proceed(service).await {
            return Err(PipelineError::CircuitOpen {
                service: service.to_string(),
            });
        }
        match operation().await {
            Ok(value) => {
                self.record_success(service).await;
                Ok(value)
            }
            Err(e) => {
                if e.is_retriable() {
                    self.record_failure(service).await;
                } else {
                    // Terminal errors (404, validation) are the service
                    // answering correctly; they do not indicate ill health.
                    self.record_success(service).await;
                }
                Err(e)
            }
        }
    }

    /// Force a circuit closed (manual recovery).
    pub async fn reset(&self, service: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(service) {
            info!(service = service, "circuit manually reset");
            *circuit = Circuit::default();
            if let Some(metrics) = &self.metrics {
                metrics.set_state(service, CircuitState::Closed);
            }
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            open_timeout: Duration::from_millis(0),
            half_open_success_threshold: 2,
            half_open_probe_interval: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = CircuitBreakerRegistry::new();
        assert_eq!(breaker.state("spotify").await, CircuitState::Closed);
        assert!(breaker.can_proceed("spotify").await);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreakerRegistry::new();
        for _ in 0..3 {
            breaker.record_failure("spotify").await;
        }
        assert_eq!(breaker.state("spotify").await, CircuitState::Open);
        assert!(!breaker.can_proceed("spotify").await);
    }

    #[tokio::test]
    async fn test_success_clears_failure_streak() {
        let breaker = CircuitBreakerRegistry::new();
        breaker.record_failure("spotify").await;
        breaker.record_failure("spotify").await;
        breaker.record_success("spotify").await;
        breaker.record_failure("spotify").await;
        breaker.record_failure("spotify").await;
        assert_eq!(breaker.state("spotify").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recovery_probe_closes_after_successes() {
        let breaker = CircuitBreakerRegistry::with_config(fast_config());
        for _ in 0..3 {
            breaker.record_failure("spotify").await;
        }
        assert_eq!(breaker.state("spotify").await, CircuitState::Open);

        // Timeout is zero: the next check transitions to half-open.
        assert!(breaker.can_proceed("spotify").await);
        assert_eq!(breaker.state("spotify").await, CircuitState::HalfOpen);

        breaker.record_success("spotify").await;
        breaker.record_success("spotify").await;
        assert_eq!(breaker.state("spotify").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = CircuitBreakerRegistry::with_config(fast_config());
        for _ in 0..3 {
            breaker.record_failure("spotify").await;
        }
        breaker.can_proceed("spotify").await;
        assert_eq!(breaker.state("spotify").await, CircuitState::HalfOpen);
        breaker.record_failure("spotify").await;
        assert_eq!(breaker.state("spotify").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let breaker = CircuitBreakerRegistry::new();
        for _ in 0..3 {
            breaker.record_failure("spotify").await;
        }
        assert_eq!(breaker.state("spotify").await, CircuitState::Open);
        assert_eq!(breaker.state("musicbrainz").await, CircuitState::Closed);
        assert!(breaker.can_proceed("musicbrainz").await);
    }

    #[tokio::test]
    async fn test_execute_blocks_when_open() {
        let breaker = CircuitBreakerRegistry::new();
        for _ in 0..3 {
            breaker.record_failure("spotify").await;
        }
        let result: Result<()> = breaker.execute("spotify", || async { Ok(()) }).await;
        assert!(matches!(result, Err(PipelineError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_terminal_errors_do_not_trip() {
        let breaker = CircuitBreakerRegistry::new();
        for _ in 0..5 {
            let result: Result<()> = breaker
                .execute("spotify", || async {
                    Err(PipelineError::NotFound {
                        resource: "track".to_string(),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state("spotify").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_transient_errors_trip() {
        let breaker = CircuitBreakerRegistry::new();
        for _ in 0..3 {
            let result: Result<()> = breaker
                .execute("spotify", || async {
                    Err(PipelineError::HttpStatus {
                        status: 503,
                        url: "https://api.spotify.com".to_string(),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state("spotify").await, CircuitState::Open);
    }
}
