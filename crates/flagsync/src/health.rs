//! Health status reporting.
//!
//! Layered on top of the running flag and the lag metric: the consumption
//! loop never stops on its own, so a repository whose transport keeps
//! failing stays "running" and shows up here as degraded instead.

use std::fmt;

use crate::consumer::LoopState;

/// Health status of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// Consuming normally with lag under the configured threshold.
    Healthy,

    /// Still serving reads but falling behind or unable to reach the log.
    /// Contains a description of the degradation.
    Degraded(String),

    /// Not consuming.
    /// Contains a description of the failure.
    Unhealthy(String),

    /// Health status is unknown (e.g., loop not yet running).
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Derives a status from the loop state and a lag measurement.
    ///
    /// `lag` is `Err` when end offsets could not be fetched.
    #[must_use]
    pub fn evaluate(state: LoopState, lag: Result<u64, String>, max_lag: u64) -> Self {
        match state {
            LoopState::Stopped | LoopState::Starting => HealthStatus::Unknown,
            LoopState::Closing | LoopState::Closed => {
                HealthStatus::Unhealthy(format!("consumption loop {state}"))
            }
            LoopState::Running => match lag {
                Ok(lag) if lag > max_lag => {
                    HealthStatus::Degraded(format!("consumer lag {lag} exceeds {max_lag}"))
                }
                Ok(_) => HealthStatus::Healthy,
                Err(e) => HealthStatus::Degraded(format!("end offsets unavailable: {e}")),
            },
        }
    }

    /// Returns `true` if the repository is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Returns `true` if the repository still applies updates.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded(msg) => write!(f, "Degraded: {msg}"),
            HealthStatus::Unhealthy(msg) => write!(f, "Unhealthy: {msg}"),
            HealthStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_running() {
        assert_eq!(
            HealthStatus::evaluate(LoopState::Running, Ok(0), 10),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::evaluate(LoopState::Running, Ok(10), 10),
            HealthStatus::Healthy
        );

        let lagging = HealthStatus::evaluate(LoopState::Running, Ok(11), 10);
        assert!(matches!(lagging, HealthStatus::Degraded(ref m) if m.contains("11")));
        assert!(lagging.is_operational());
        assert!(!lagging.is_healthy());
    }

    #[test]
    fn test_evaluate_unreachable_log() {
        let status =
            HealthStatus::evaluate(LoopState::Running, Err("broker down".into()), 10);
        assert!(matches!(status, HealthStatus::Degraded(ref m) if m.contains("broker down")));
    }

    #[test]
    fn test_evaluate_lifecycle() {
        assert_eq!(
            HealthStatus::evaluate(LoopState::Starting, Ok(0), 10),
            HealthStatus::Unknown
        );
        let closed = HealthStatus::evaluate(LoopState::Closed, Ok(0), 10);
        assert!(!closed.is_operational());
        assert_eq!(closed.to_string(), "Unhealthy: consumption loop Closed");
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "Healthy");
        assert_eq!(HealthStatus::Unknown.to_string(), "Unknown");
        assert!(HealthStatus::Degraded("slow".into())
            .to_string()
            .contains("slow"));
    }
}
