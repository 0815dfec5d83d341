use crate::model::TargetRecord;
use crate::normalize::labels_equal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// `would_change` is `None` when no proposed value was given.
    WrongState {
        state: Option<String>,
        would_change: Option<bool>,
    },
    NoChange,
}

/// Lifecycle gate: only records in the single eligible state may change,
/// and only when the proposed value differs from the current one.
#[derive(Debug, Clone)]
pub struct StatusGate {
    eligible: String,
}

impl StatusGate {
    pub fn new(eligible: &str) -> Self {
        Self {
            eligible: eligible.to_string(),
        }
    }

    pub fn eligible_state(&self) -> &str {
        &self.eligible
    }

    pub fn state_allows(&self, record: &TargetRecord) -> bool {
        record.state.as_deref() == Some(self.eligible.as_str())
    }

    /// State is checked before the no-op comparison. Without a proposed
    /// value only the state is checked.
    pub fn check(&self, record: &TargetRecord, proposed: Option<&str>) -> GateDecision {
        if !self.state_allows(record) {
            return GateDecision::WrongState {
                state: record.state.clone(),
                would_change: proposed.map(|p| would_change(record, p)),
            };
        }
        match proposed {
            Some(p) if !would_change(record, p) => GateDecision::NoChange,
            _ => GateDecision::Allow,
        }
    }
}

pub fn would_change(record: &TargetRecord, proposed: &str) -> bool {
    !labels_equal(record.value.as_deref().unwrap_or(""), proposed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> StatusGate {
        StatusGate::new("pending_enrollment")
    }

    #[test]
    fn allow_when_eligible_and_different() {
        let record = TargetRecord::new("a", "pending_enrollment", Some("Nobody"));
        assert_eq!(gate().check(&record, Some("John Smith")), GateDecision::Allow);
    }

    #[test]
    fn no_change_on_normalized_equal() {
        let record = TargetRecord::new("a", "pending_enrollment", Some("Jane Doe"));
        assert_eq!(gate().check(&record, Some(" jane doe ")), GateDecision::NoChange);
    }

    #[test]
    fn wrong_state_reported_even_when_value_differs() {
        let record = TargetRecord::new("a", "enrolled", Some("Nobody"));
        assert_eq!(
            gate().check(&record, Some("John Smith")),
            GateDecision::WrongState {
                state: Some("enrolled".into()),
                would_change: Some(true),
            }
        );
    }

    #[test]
    fn wrong_state_takes_precedence_over_no_change() {
        let record = TargetRecord::new("a", "enrolled", Some("Jane Doe"));
        assert_eq!(
            gate().check(&record, Some("Jane Doe")),
            GateDecision::WrongState {
                state: Some("enrolled".into()),
                would_change: Some(false),
            }
        );
    }

    #[test]
    fn state_only_check_without_proposed_value() {
        let eligible = TargetRecord::new("a", "pending_enrollment", Some("k1"));
        assert_eq!(gate().check(&eligible, None), GateDecision::Allow);

        let closed = TargetRecord::new("a", "enrolled", Some("k1"));
        assert_eq!(
            gate().check(&closed, None),
            GateDecision::WrongState {
                state: Some("enrolled".into()),
                would_change: None,
            }
        );
    }

    #[test]
    fn missing_state_denied() {
        let mut record = TargetRecord::new("a", "x", None);
        record.state = None;
        assert_eq!(
            gate().check(&record, Some("John")),
            GateDecision::WrongState {
                state: None,
                would_change: Some(true),
            }
        );
    }

    #[test]
    fn state_comparison_is_exact() {
        let record = TargetRecord::new("a", "Pending_Enrollment", None);
        assert!(!gate().state_allows(&record));
    }

    #[test]
    fn missing_value_counts_as_empty() {
        let record = TargetRecord::new("a", "pending_enrollment", None);
        assert_eq!(gate().check(&record, Some("John")), GateDecision::Allow);
        assert_eq!(gate().check(&record, Some("  ")), GateDecision::NoChange);
    }
}
