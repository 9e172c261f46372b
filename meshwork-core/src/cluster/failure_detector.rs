//! Timeout based failure detection with datacenter-aware thresholds

use std::time::Duration;

use super::node_state::MemberStatus;
use super::view::ClusterView;
use crate::config::FailureDetectionConfig;

/// Members that crossed a threshold during one detection pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Ids to mark Suspect
    pub suspect: Vec<String>,
    /// Ids to remove from the view
    pub remove: Vec<String>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.suspect.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FailureDetector {
    timeout: Duration,
    cross_dc_timeout: Duration,
    confirmation: Duration,
}

impl FailureDetector {
    pub fn new(config: &FailureDetectionConfig) -> Self {
        let cross_dc_timeout = config
            .cross_dc_timeout
            .unwrap_or_else(|| config.timeout.mul_f64(config.cross_dc_multiplier.max(1.0)));
        Self {
            timeout: config.timeout,
            cross_dc_timeout,
            confirmation: config.suspect_confirmation.unwrap_or(Duration::ZERO),
        }
    }

    /// Silence tolerated before a member in `member_dc` is suspected
    pub fn suspect_timeout(&self, self_dc: &str, member_dc: &str) -> Duration {
        if self_dc == member_dc {
            self.timeout
        } else {
            self.cross_dc_timeout
        }
    }

    /// Silence tolerated before a member in `member_dc` is removed
    pub fn down_timeout(&self, self_dc: &str, member_dc: &str) -> Duration {
        self.suspect_timeout(self_dc, member_dc) + self.confirmation
    }

    /// Classify members by how long they have been silent at `now` (unix nanos)
    pub fn detect(&self, view: &ClusterView, self_id: &str, self_dc: &str, now: i64) -> Detection {
        let mut detection = Detection::default();

        for member in view.members() {
            if member.id == self_id {
                continue;
            }
            let silent = Duration::from_nanos(now.saturating_sub(member.last_seen).max(0) as u64);
            let member_dc = member.datacenter();

            if silent > self.down_timeout(self_dc, member_dc) {
                detection.remove.push(member.id.clone());
            } else if silent > self.suspect_timeout(self_dc, member_dc) {
                if self.confirmation.is_zero() {
                    detection.remove.push(member.id.clone());
                } else if member.status != MemberStatus::Suspect {
                    detection.suspect.push(member.id.clone());
                }
            }
        }

        detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node_state::{NodeState, LABEL_DATACENTER};

    const MS: i64 = 1_000_000;

    fn member(id: &str, dc: &str, last_seen: i64) -> NodeState {
        let mut s = NodeState::new(id, "test", format!("{}:1", id), 0);
        s.status = MemberStatus::Up;
        s.last_seen = last_seen;
        s.labels.insert(LABEL_DATACENTER.into(), dc.into());
        s
    }

    fn view(members: Vec<NodeState>) -> ClusterView {
        ClusterView::from_parts("v".into(), 0, 0, members, Default::default(), 1, 0)
    }

    fn config(timeout_ms: u64, confirm_ms: Option<u64>) -> FailureDetectionConfig {
        FailureDetectionConfig {
            timeout: Duration::from_millis(timeout_ms),
            suspect_confirmation: confirm_ms.map(Duration::from_millis),
            ..Default::default()
        }
    }

    #[test]
    fn test_removes_directly_without_confirmation() {
        let detector = FailureDetector::new(&config(200, None));
        let v = view(vec![member("self", "dc1", 0), member("b", "dc1", 0)]);

        let detection = detector.detect(&v, "self", "dc1", 500 * MS);
        assert_eq!(detection.remove, vec!["b".to_string()]);
        assert!(detection.suspect.is_empty());
    }

    #[test]
    fn test_suspect_then_remove_with_confirmation() {
        let detector = FailureDetector::new(&config(200, Some(300)));
        let v = view(vec![member("self", "dc1", 0), member("b", "dc1", 0)]);

        let early = detector.detect(&v, "self", "dc1", 250 * MS);
        assert_eq!(early.suspect, vec!["b".to_string()]);
        assert!(early.remove.is_empty());

        let late = detector.detect(&v, "self", "dc1", 600 * MS);
        assert_eq!(late.remove, vec!["b".to_string()]);
    }

    #[test]
    fn test_cross_dc_gets_doubled_timeout() {
        let detector = FailureDetector::new(&config(200, None));
        let v = view(vec![member("self", "dc1", 0), member("far", "dc2", 0)]);

        assert!(detector.detect(&v, "self", "dc1", 300 * MS).is_empty());
        assert_eq!(detector.detect(&v, "self", "dc1", 450 * MS).remove, vec!["far".to_string()]);
    }

    #[test]
    fn test_explicit_cross_dc_timeout() {
        let mut cfg = config(200, None);
        cfg.cross_dc_timeout = Some(Duration::from_secs(2));
        let detector = FailureDetector::new(&cfg);
        assert_eq!(detector.suspect_timeout("dc1", "dc2"), Duration::from_secs(2));
        assert_eq!(detector.suspect_timeout("dc1", "dc1"), Duration::from_millis(200));
    }

    #[test]
    fn test_already_suspect_not_reported_again() {
        let detector = FailureDetector::new(&config(200, Some(300)));
        let mut b = member("b", "dc1", 0);
        b.status = MemberStatus::Suspect;
        let v = view(vec![member("self", "dc1", 0), b]);

        assert!(detector.detect(&v, "self", "dc1", 250 * MS).is_empty());
    }

    #[test]
    fn test_self_never_detected() {
        let detector = FailureDetector::new(&config(200, None));
        let v = view(vec![member("self", "dc1", 0)]);
        assert!(detector.detect(&v, "self", "dc1", 10_000 * MS).is_empty());
    }
}
