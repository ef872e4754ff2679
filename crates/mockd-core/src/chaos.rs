//! Chaos injection
//!
//! A single atomically-swapped config drives two independent effects:
//! uniform random latency and error substitution. Effects compose
//! additively — both may apply to the same response, and chaos latency
//! stacks on top of any per-mock declared delay.

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Singleton chaos configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<ChaosLatency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<ChaosErrorRate>,
}

/// Uniform random latency effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosLatency {
    pub min_ms: u64,
    pub max_ms: u64,
    /// Bernoulli probability in [0, 1].
    pub probability: f64,
}

/// Error substitution effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosErrorRate {
    /// Bernoulli probability in [0, 1].
    pub probability: f64,
    #[serde(default = "default_error_code")]
    pub default_code: u16,
}

fn default_error_code() -> u16 {
    500
}

/// What the chaos draw decided for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosDecision {
    /// Sleep this long before responding.
    pub latency: Option<Duration>,
    /// Replace the response with an empty body and this status.
    pub error_status: Option<u16>,
}

/// Holds the current config and draws per-request decisions.
#[derive(Clone, Default)]
pub struct ChaosEngine {
    config: Arc<RwLock<Arc<ChaosConfig>>>,
}

impl ChaosEngine {
    pub fn new(config: ChaosConfig) -> Self {
        Self { config: Arc::new(RwLock::new(Arc::new(config))) }
    }

    /// Atomically replace the config; in-flight requests keep the draw
    /// they already made.
    pub fn replace(&self, config: ChaosConfig) {
        *self.config.write() = Arc::new(config);
    }

    pub fn current(&self) -> Arc<ChaosConfig> {
        self.config.read().clone()
    }

    /// Draw a decision. Each effect is an independent Bernoulli; both can
    /// fire for the same response.
    pub fn decide(&self) -> ChaosDecision {
        let config = self.current();
        if !config.enabled {
            return ChaosDecision::default();
        }
        let mut rng = rand::rng();
        let mut decision = ChaosDecision::default();

        if let Some(latency) = &config.latency {
            if bernoulli(&mut rng, latency.probability) {
                let (lo, hi) = if latency.min_ms <= latency.max_ms {
                    (latency.min_ms, latency.max_ms)
                } else {
                    (latency.max_ms, latency.min_ms)
                };
                decision.latency = Some(Duration::from_millis(rng.random_range(lo..=hi)));
            }
        }
        if let Some(error) = &config.error_rate {
            if bernoulli(&mut rng, error.probability) {
                decision.error_status = Some(error.default_code);
            }
        }
        decision
    }

    /// Draw and apply: sleep any chosen latency, return the substituted
    /// status if the error effect fired.
    pub async fn apply(&self) -> Option<u16> {
        let decision = self.decide();
        if let Some(latency) = decision.latency {
            tokio::time::sleep(latency).await;
        }
        decision.error_status
    }
}

fn bernoulli<R: Rng>(rng: &mut R, probability: f64) -> bool {
    if probability <= 0.0 {
        false
    } else if probability >= 1.0 {
        true
    } else {
        rng.random_bool(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_is_passthrough() {
        let engine = ChaosEngine::new(ChaosConfig {
            enabled: false,
            latency: Some(ChaosLatency { min_ms: 10, max_ms: 20, probability: 1.0 }),
            error_rate: Some(ChaosErrorRate { probability: 1.0, default_code: 503 }),
        });
        assert_eq!(engine.decide(), ChaosDecision::default());
    }

    #[test]
    fn certain_effects_both_fire() {
        let engine = ChaosEngine::new(ChaosConfig {
            enabled: true,
            latency: Some(ChaosLatency { min_ms: 5, max_ms: 5, probability: 1.0 }),
            error_rate: Some(ChaosErrorRate { probability: 1.0, default_code: 503 }),
        });
        let decision = engine.decide();
        assert_eq!(decision.latency, Some(Duration::from_millis(5)));
        assert_eq!(decision.error_status, Some(503));
    }

    #[test]
    fn zero_probability_never_fires() {
        let engine = ChaosEngine::new(ChaosConfig {
            enabled: true,
            latency: Some(ChaosLatency { min_ms: 5, max_ms: 10, probability: 0.0 }),
            error_rate: Some(ChaosErrorRate { probability: 0.0, default_code: 500 }),
        });
        for _ in 0..100 {
            assert_eq!(engine.decide(), ChaosDecision::default());
        }
    }

    #[test]
    fn latency_bounds_are_inclusive() {
        let engine = ChaosEngine::new(ChaosConfig {
            enabled: true,
            latency: Some(ChaosLatency { min_ms: 3, max_ms: 9, probability: 1.0 }),
            error_rate: None,
        });
        for _ in 0..100 {
            let ms = engine.decide().latency.unwrap().as_millis() as u64;
            assert!((3..=9).contains(&ms));
        }
    }

    #[test]
    fn replace_swaps_atomically() {
        let engine = ChaosEngine::default();
        assert!(!engine.current().enabled);
        engine.replace(ChaosConfig { enabled: true, ..Default::default() });
        assert!(engine.current().enabled);
    }

    #[test]
    fn reversed_bounds_are_tolerated() {
        let engine = ChaosEngine::new(ChaosConfig {
            enabled: true,
            latency: Some(ChaosLatency { min_ms: 9, max_ms: 3, probability: 1.0 }),
            error_rate: None,
        });
        let ms = engine.decide().latency.unwrap().as_millis() as u64;
        assert!((3..=9).contains(&ms));
    }
}
