//! Dot-separated topic glob matching: `*` matches exactly one segment.

/// Does `topic` match `pattern`, where `pattern` segments are literal
/// except for `*`, which matches any single topic segment?
///
/// Segment counts must match exactly — `robot.*` does not match
/// `robot.exec.started` (two segments against a three-segment topic).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let topic_segments: Vec<&str> = topic.split('.').collect();
    if pattern_segments.len() != topic_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(topic_segments.iter())
        .all(|(p, t)| *p == "*" || p == t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_identical_topic() {
        assert!(topic_matches("robot.exec.started", "robot.exec.started"));
    }

    #[test]
    fn star_matches_one_segment() {
        assert!(topic_matches("robot.exec.*", "robot.exec.started"));
        assert!(topic_matches("robot.*.started", "robot.exec.started"));
        assert!(topic_matches("*.exec.started", "robot.exec.started"));
    }

    #[test]
    fn star_does_not_match_zero_or_multiple_segments() {
        assert!(!topic_matches("robot.*", "robot.exec.started"));
        assert!(!topic_matches("robot.exec.*.*", "robot.exec.started"));
    }

    #[test]
    fn mismatched_literal_segment_fails() {
        assert!(!topic_matches("robot.config.created", "robot.exec.started"));
    }

    #[test]
    fn integration_webhook_provider_is_matched_by_trailing_star() {
        assert!(topic_matches("integration.webhook.*", "integration.webhook.telegram"));
    }
}
