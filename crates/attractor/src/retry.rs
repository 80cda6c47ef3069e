//! Retry policies and the panic-isolating executor that applies them.

use std::future::Future;
use std::time::Duration as StdDuration;

use rand::RngExt;

use crate::error::PipelineError;
use crate::graph::{Graph, Node};

/// Resolve the retry policy for a node: `max_attempts` comes from the
/// node's own `max_retries` attribute when positive, else from the
/// graph-level `default_max_retry` attribute, else a single attempt.
#[must_use]
pub fn policy_for_node(node: &Node, graph: &Graph) -> RetryPolicy {
    let node_max = node.get("max_retries").and_then(crate::graph::AttrValue::as_f64).map(|n| n as i64).filter(|n| *n > 0);
    let graph_default = graph.attrs.get("default_max_retry").and_then(crate::graph::AttrValue::as_f64).map(|n| n as i64).filter(|n| *n > 0);
    let max_attempts = node_max.or(graph_default).unwrap_or(1).max(1) as u32;
    RetryPolicy { max_attempts, ..RetryPolicy::default() }
}

/// Named starting points for a [`RetryPolicy`]; callers can still override
/// individual fields afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPreset {
    None,
    Standard,
    Aggressive,
    Linear,
    Patient,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
    pub factor: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_preset(preset: RetryPreset) -> Self {
        match preset {
            RetryPreset::None => Self {
                max_attempts: 1,
                base_delay: StdDuration::from_millis(0),
                max_delay: StdDuration::from_millis(0),
                factor: 1.0,
                jitter: false,
            },
            RetryPreset::Standard => Self {
                max_attempts: 5,
                base_delay: StdDuration::from_millis(200),
                max_delay: StdDuration::from_secs(60),
                factor: 2.0,
                jitter: true,
            },
            RetryPreset::Aggressive => Self {
                max_attempts: 5,
                base_delay: StdDuration::from_millis(500),
                max_delay: StdDuration::from_secs(60),
                factor: 2.0,
                jitter: true,
            },
            RetryPreset::Linear => Self {
                max_attempts: 3,
                base_delay: StdDuration::from_millis(500),
                max_delay: StdDuration::from_secs(60),
                factor: 1.0,
                jitter: true,
            },
            RetryPreset::Patient => Self {
                max_attempts: 3,
                base_delay: StdDuration::from_millis(2000),
                max_delay: StdDuration::from_secs(60),
                factor: 3.0,
                jitter: true,
            },
        }
    }

    /// `min(initial * factor^(attempt-1), max)`, then optionally scaled by a
    /// uniform random factor in `[0.5, 1.5]`, for the delay before the given
    /// (1-indexed) attempt number.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> StdDuration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        let millis = if self.jitter && capped > 0.0 {
            capped * rand::rng().random_range(0.5..=1.5)
        } else {
            capped
        };
        StdDuration::from_millis(millis.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_preset(RetryPreset::Standard)
    }
}

/// Run `make_future` up to `policy.max_attempts` times, retrying on
/// [`PipelineError::is_retryable`] errors and on handler panics, applying
/// backoff between attempts. A panic is isolated via `tokio::spawn` so one
/// misbehaving handler never takes the engine loop down with it, and
/// normally consumes one attempt like any other transient failure. When
/// `partial_on_panic` is `Some`, a panic instead returns that value
/// immediately without consuming a retry — the node's `allow_partial`
/// attribute asking for the partial result rather than another attempt.
pub async fn execute_with_retry<F, Fut, T>(policy: &RetryPolicy, node_id: &str, mut partial_on_panic: Option<T>, mut make_future: F) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>> + Send + 'static,
    T: Send + 'static,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::spawn(make_future(attempt)).await;
        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if err.is_retryable() && attempt < policy.max_attempts {
                    tokio::time::sleep(policy.backoff_delay(attempt)).await;
                    continue;
                }
                return Err(err);
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    if let Some(partial) = partial_on_panic.take() {
                        return Ok(partial);
                    }
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.backoff_delay(attempt)).await;
                        continue;
                    }
                }
                return Err(PipelineError::Terminal {
                    node: node_id.into(),
                    message: format!("handler panicked: {join_err}"),
                });
            }
        }
    }
}
