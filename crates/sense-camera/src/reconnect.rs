// src/reconnect.rs

//! The exponential-backoff reconnect algorithm (spec.md §4.4.4), factored
//! out as pure functions so the boundary-behavior laws in spec.md §8 are
//! directly testable without a real transcoder.

/// Delay before reconnect attempt `attempt` (1-based), `min(base * 2^(n-1), 60)`.
pub fn backoff_delay_secs(attempt: u32, base_secs: f64) -> f64 {
    let scaled = base_secs * 2f64.powi(attempt.saturating_sub(1) as i32);
    scaled.min(60.0)
}

/// Whether a reconnect attempt numbered `attempt` is still permitted under
/// `max_attempts` (`-1` meaning unbounded).
pub fn attempt_allowed(attempt: u32, max_attempts: i64) -> bool {
    max_attempts == -1 || (attempt as i64) <= max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_at_attempt_4_with_base_5_is_40s() {
        assert_eq!(backoff_delay_secs(4, 5.0), 40.0);
    }

    #[test]
    fn delay_at_attempt_7_clamps_to_60s() {
        assert_eq!(backoff_delay_secs(7, 5.0), 60.0);
    }

    #[test]
    fn first_attempt_equals_base_delay() {
        assert_eq!(backoff_delay_secs(1, 5.0), 5.0);
    }

    #[test]
    fn unbounded_max_always_allows() {
        assert!(attempt_allowed(1000, -1));
    }

    #[test]
    fn bounded_max_rejects_past_limit() {
        assert!(attempt_allowed(10, 10));
        assert!(!attempt_allowed(11, 10));
    }
}
