//! Health monitoring for connection pools

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_connpool::HealthStatus;
///
/// let health = HealthStatus::new(3, 1, 0, 10, false);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_connections, 3);
///
/// let saturated = HealthStatus::new(0, 10, 4, 10, false);
/// assert!(!saturated.is_healthy());
/// assert_eq!(saturated.warning_count, 3);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    /// Idle connections count
    pub idle_connections: usize,

    /// Checked-out connections count
    pub checked_out_connections: usize,

    /// Callers blocked in `acquire`
    pub waiting_callers: usize,

    /// Total capacity
    pub total_capacity: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(
        idle: usize,
        checked_out: usize,
        waiting: usize,
        capacity: usize,
        closed: bool,
    ) -> Self {
        let utilization = if capacity > 0 {
            checked_out as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if closed {
            warnings.push("Pool is closed".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if waiting > 0 {
            warnings.push(format!("{} callers waiting for a connection", waiting));
        }

        if idle == 0 && capacity > 0 && !closed {
            warnings.push("No idle connections".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_connections: idle,
            checked_out_connections: checked_out,
            waiting_callers: waiting,
            total_capacity: capacity,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_pool_is_unhealthy() {
        let health = HealthStatus::new(0, 0, 0, 10, true);
        assert!(!health.is_healthy());
        assert_eq!(health.warnings, vec!["Pool is closed".to_string()]);
    }

    #[test]
    fn empty_idle_set_is_only_a_warning() {
        let health = HealthStatus::new(0, 5, 0, 10, false);
        assert!(health.is_healthy());
        assert_eq!(health.warning_count, 1);
    }
}
