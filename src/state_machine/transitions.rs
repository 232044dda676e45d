use super::errors::{TransitionError, TransitionResult};
use super::states::{MessageStatus, StatusUpdate};

/// What a log call should do with the status column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Status recorded on the log entry
    pub recorded: MessageStatus,
    /// Whether the status column must be written
    pub write: bool,
}

/// Decide how a status update applies to the current status.
///
/// `current` is `None` when nothing is known about the message yet. Re-entering the
/// current status is idempotent and never writes.
pub fn plan_transition(
    current: Option<MessageStatus>,
    update: StatusUpdate,
) -> TransitionResult<TransitionPlan> {
    let target = match update {
        StatusUpdate::Unchanged => {
            return Ok(TransitionPlan {
                recorded: current.unwrap_or_default(),
                write: false,
            })
        }
        StatusUpdate::To(target) => target,
    };

    let Some(current) = current else {
        return Ok(TransitionPlan {
            recorded: target,
            write: true,
        });
    };

    if current == target {
        return Ok(TransitionPlan {
            recorded: target,
            write: false,
        });
    }

    if current.is_terminal() {
        return Err(TransitionError::TerminalStatus {
            current,
            requested: target,
        });
    }

    if target.rank() <= current.rank() {
        return Err(TransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(TransitionPlan {
        recorded: target,
        write: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessageStatus::*;

    #[test]
    fn test_forward_transitions_write() {
        for (from, to) in [
            (Created, InProcess),
            (Created, Completed),
            (Created, Aborted),
            (InProcess, Completed),
            (InProcess, Aborted),
        ] {
            let plan = plan_transition(Some(from), StatusUpdate::To(to)).unwrap();
            assert_eq!(plan, TransitionPlan { recorded: to, write: true });
        }
    }

    #[test]
    fn test_unchanged_never_writes() {
        let plan = plan_transition(Some(InProcess), StatusUpdate::Unchanged).unwrap();
        assert_eq!(plan, TransitionPlan { recorded: InProcess, write: false });

        let plan = plan_transition(None, StatusUpdate::Unchanged).unwrap();
        assert_eq!(plan.recorded, Created);
        assert!(!plan.write);
    }

    #[test]
    fn test_same_status_is_idempotent() {
        let plan = plan_transition(Some(Completed), StatusUpdate::To(Completed)).unwrap();
        assert!(!plan.write);
    }

    #[test]
    fn test_no_return_to_created() {
        let result = plan_transition(Some(InProcess), StatusUpdate::To(Created));
        assert_eq!(
            result,
            Err(TransitionError::InvalidTransition { from: InProcess, to: Created })
        );
    }

    #[test]
    fn test_terminal_states_are_not_reentered() {
        let result = plan_transition(Some(Completed), StatusUpdate::To(Aborted));
        assert!(matches!(result, Err(TransitionError::TerminalStatus { .. })));

        let result = plan_transition(Some(Aborted), StatusUpdate::To(InProcess));
        assert!(matches!(result, Err(TransitionError::TerminalStatus { .. })));
    }
}
