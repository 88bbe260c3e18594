//! Quorum arithmetic for failover votes.
//!
//! A failover set is configured with a confidence level between 0 and 100.
//! 100 means every configured client must answer before the coordinator acts
//! (unanimity); 0 means the first answer received is enough. The percentage
//! always applies to the number of *configured* client ids, not the number of
//! clients that happen to answer.

/// Number of answers required to reach quorum for `configured_clients`
/// configured client ids at the given `confidence_level` (0..=100).
///
/// Returns 0 when no clients are configured at all — callers must treat that
/// as "skip voting, switch unconditionally" rather than divide by it.
pub fn required_responses(confidence_level: u8, configured_clients: usize) -> usize {
    if configured_clients == 0 {
        return 0;
    }
    if confidence_level == 0 {
        return 1;
    }
    let required = (configured_clients * confidence_level as usize).div_ceil(100);
    required.clamp(1, configured_clients)
}

/// Whether `received` answers are enough to satisfy `required_responses`.
pub fn quorum_reached(confidence_level: u8, configured_clients: usize, received: usize) -> bool {
    let required = required_responses(confidence_level, configured_clients);
    required > 0 && received >= required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_configured_clients_means_no_vote() {
        assert_eq!(required_responses(100, 0), 0);
        assert!(!quorum_reached(100, 0, 0));
    }

    #[test]
    fn unanimity_requires_all() {
        assert_eq!(required_responses(100, 5), 5);
        assert!(!quorum_reached(100, 5, 4));
        assert!(quorum_reached(100, 5, 5));
    }

    #[test]
    fn zero_confidence_is_first_answer_wins() {
        assert_eq!(required_responses(0, 5), 1);
        assert!(quorum_reached(0, 5, 1));
    }

    #[test]
    fn fractional_rounds_up() {
        // 50% of 3 configured clients rounds up to 2.
        assert_eq!(required_responses(50, 3), 2);
    }
}
