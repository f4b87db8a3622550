use crate::error::Error;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Event lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    New,
    Acknowledged,
    OnHold,
    Escalated,
    Resolved,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::OnHold => "on_hold",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
        }
    }
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "acknowledged" => Ok(Self::Acknowledged),
            "on_hold" => Ok(Self::OnHold),
            "escalated" => Ok(Self::Escalated),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::Internal(format!("unknown event status: {}", other))),
        }
    }
}

/// Operator action against the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Acknowledge,
    Hold,
    Resume,
    Escalate,
    Resolve,
}

/// Validate one transition:
/// new → acknowledged → (on_hold ⇄ acknowledged) → (escalated ⇄ acknowledged)
/// → resolved (terminal). Escalation and resolution require a reason. Any
/// other combination is a stale-state rejection and the caller should refetch
/// current status.
pub fn apply(
    current: EventStatus,
    action: TransitionAction,
    reason: Option<&str>,
) -> Result<EventStatus> {
    use EventStatus::*;
    use TransitionAction::*;

    let reason_given = reason.map(|r| !r.trim().is_empty()).unwrap_or(false);

    let next = match (current, action) {
        (New, Acknowledge) => Acknowledged,
        (Escalated, Acknowledge) => Acknowledged,
        (Acknowledged, Hold) => OnHold,
        (OnHold, Resume) => Acknowledged,
        (Acknowledged, Escalate) => {
            if !reason_given {
                return Err(Error::Api("escalation requires a reason".to_string()).into());
            }
            Escalated
        }
        (Resolved, Resolve) => {
            return Err(Error::StaleState("event is already resolved".to_string()).into());
        }
        (_, Resolve) => {
            if !reason_given {
                return Err(Error::Api("resolution requires a reason".to_string()).into());
            }
            Resolved
        }
        (current, action) => {
            return Err(Error::StaleState(format!(
                "cannot {:?} an event in status {}",
                action, current
            ))
            .into());
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale(result: Result<EventStatus>) -> bool {
        matches!(
            result.unwrap_err().downcast::<Error>().unwrap(),
            Error::StaleState(_)
        )
    }

    #[test]
    fn happy_path_through_the_graph() {
        use EventStatus::*;
        use TransitionAction::*;

        let s = apply(New, Acknowledge, None).unwrap();
        assert_eq!(s, Acknowledged);
        let s = apply(s, Hold, None).unwrap();
        assert_eq!(s, OnHold);
        let s = apply(s, Resume, None).unwrap();
        assert_eq!(s, Acknowledged);
        let s = apply(s, Escalate, Some("nobody reachable")).unwrap();
        assert_eq!(s, Escalated);
        let s = apply(s, Acknowledge, None).unwrap();
        assert_eq!(s, Acknowledged);
        let s = apply(s, Resolve, Some("video dispatched")).unwrap();
        assert_eq!(s, Resolved);
    }

    #[test]
    fn resolve_from_any_non_terminal_state() {
        for state in [
            EventStatus::New,
            EventStatus::Acknowledged,
            EventStatus::OnHold,
            EventStatus::Escalated,
        ] {
            let s = apply(state, TransitionAction::Resolve, Some("false alarm")).unwrap();
            assert_eq!(s, EventStatus::Resolved);
        }
    }

    #[test]
    fn double_resolve_is_stale() {
        let s = apply(EventStatus::New, TransitionAction::Resolve, Some("done")).unwrap();
        assert!(stale(apply(s, TransitionAction::Resolve, Some("done"))));
    }

    #[test]
    fn hold_requires_acknowledged() {
        assert!(stale(apply(EventStatus::New, TransitionAction::Hold, None)));
        assert!(stale(apply(
            EventStatus::Escalated,
            TransitionAction::Hold,
            None
        )));
    }

    #[test]
    fn escalate_requires_reason() {
        let err = apply(EventStatus::Acknowledged, TransitionAction::Escalate, None).unwrap_err();
        assert!(matches!(err.downcast::<Error>().unwrap(), Error::Api(_)));

        let err = apply(
            EventStatus::Acknowledged,
            TransitionAction::Escalate,
            Some("  "),
        )
        .unwrap_err();
        assert!(matches!(err.downcast::<Error>().unwrap(), Error::Api(_)));
    }

    #[test]
    fn terminal_state_rejects_everything() {
        for action in [
            TransitionAction::Acknowledge,
            TransitionAction::Hold,
            TransitionAction::Resume,
            TransitionAction::Escalate,
            TransitionAction::Resolve,
        ] {
            assert!(stale(apply(EventStatus::Resolved, action, Some("x"))));
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            EventStatus::New,
            EventStatus::Acknowledged,
            EventStatus::OnHold,
            EventStatus::Escalated,
            EventStatus::Resolved,
        ] {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
    }
}
