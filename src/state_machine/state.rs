use std::fmt;

use serde::{Deserialize, Serialize};

use super::workflow::ReceivingWorkflow;
use crate::error::RecebError;

/// States of a receipt workflow for one Header and its current UC.
///
/// NEW_HEADER → HEADER_OPEN → UC_OPEN → UC_READY → UC_CONCLUDING → UC_CONCLUDED,
/// looping back to UC_OPEN for the next UC, until HEADER_CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceivingState {
    NewHeader,
    HeaderOpen,
    UcOpen,
    UcReady,
    UcConcluding,
    UcConcluded,
    HeaderClosed,
}

impl fmt::Display for ReceivingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceivingState::NewHeader => write!(f, "NEW_HEADER"),
            ReceivingState::HeaderOpen => write!(f, "HEADER_OPEN"),
            ReceivingState::UcOpen => write!(f, "UC_OPEN"),
            ReceivingState::UcReady => write!(f, "UC_READY"),
            ReceivingState::UcConcluding => write!(f, "UC_CONCLUDING"),
            ReceivingState::UcConcluded => write!(f, "UC_CONCLUDED"),
            ReceivingState::HeaderClosed => write!(f, "HEADER_CLOSED"),
        }
    }
}

/// Something that happened in the workflow and may move it to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceivingEvent {
    /// Header created or found open for (Nf, Identificador).
    HeaderOpened,
    UcCreated,
    /// An existing open UC was reloaded with `items` items.
    UcResumed { items: usize },
    ItemAdded,
    /// Last item removed.
    ItemsEmptied,
    UcDeleted,
    CompletionStarted,
    UcConcluded,
    HeaderFinalized,
    /// Operator gave up and went back to the main menu.
    Abandoned,
}

impl fmt::Display for ReceivingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceivingEvent::HeaderOpened => write!(f, "HEADER_OPENED"),
            ReceivingEvent::UcCreated => write!(f, "UC_CREATED"),
            ReceivingEvent::UcResumed { items } => write!(f, "UC_RESUMED({items})"),
            ReceivingEvent::ItemAdded => write!(f, "ITEM_ADDED"),
            ReceivingEvent::ItemsEmptied => write!(f, "ITEMS_EMPTIED"),
            ReceivingEvent::UcDeleted => write!(f, "UC_DELETED"),
            ReceivingEvent::CompletionStarted => write!(f, "COMPLETION_STARTED"),
            ReceivingEvent::UcConcluded => write!(f, "UC_CONCLUDED"),
            ReceivingEvent::HeaderFinalized => write!(f, "HEADER_FINALIZED"),
            ReceivingEvent::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// Decides and applies legal transitions on a [`ReceivingWorkflow`].
pub struct ReceivingStateMachine;

impl ReceivingStateMachine {
    /// Pure transition function. Anything not listed is illegal.
    pub fn transition(
        from: ReceivingState,
        event: ReceivingEvent,
    ) -> Result<ReceivingState, RecebError> {
        use ReceivingEvent as E;
        use ReceivingState as S;

        let next = match (from, event) {
            (_, E::Abandoned) => S::NewHeader,
            (S::NewHeader | S::HeaderOpen, E::HeaderOpened) => S::HeaderOpen,
            (S::HeaderOpen | S::UcConcluded, E::UcCreated) => S::UcOpen,
            (S::HeaderOpen | S::UcConcluded, E::UcResumed { items: 0 }) => S::UcOpen,
            (S::HeaderOpen | S::UcConcluded, E::UcResumed { .. }) => S::UcReady,
            (S::UcOpen | S::UcReady, E::ItemAdded) => S::UcReady,
            (S::UcReady, E::ItemsEmptied) => S::UcOpen,
            (S::UcOpen, E::UcDeleted) => S::HeaderOpen,
            (S::UcReady | S::UcConcluding, E::CompletionStarted) => S::UcConcluding,
            (S::UcConcluding, E::UcConcluded) => S::UcConcluded,
            (S::HeaderOpen | S::UcConcluded, E::HeaderFinalized) => S::HeaderClosed,
            (from, event) => return Err(RecebError::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Checks `event` is legal in the current state without applying it.
    pub fn ensure(workflow: &ReceivingWorkflow, event: ReceivingEvent) -> Result<(), RecebError> {
        Self::transition(workflow.state, event).map(|_| ())
    }

    /// Applies `event`, recording the previous state in the history.
    pub fn apply(
        workflow: &mut ReceivingWorkflow,
        event: ReceivingEvent,
    ) -> Result<ReceivingState, RecebError> {
        let next = Self::transition(workflow.state, event)?;
        if next != workflow.state {
            workflow.state_history.push(workflow.state);
            tracing::debug!(
                workflow = %workflow.id,
                from = %workflow.state,
                to = %next,
                %event,
                "workflow transition"
            );
            workflow.state = next;
        }
        workflow.touch();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReceiptContext;

    fn workflow() -> ReceivingWorkflow {
        ReceivingWorkflow::new(ReceiptContext::default())
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut wf = workflow();
        assert_eq!(wf.state, ReceivingState::NewHeader);

        let steps = [
            (ReceivingEvent::HeaderOpened, ReceivingState::HeaderOpen),
            (ReceivingEvent::UcCreated, ReceivingState::UcOpen),
            (ReceivingEvent::ItemAdded, ReceivingState::UcReady),
            (ReceivingEvent::ItemAdded, ReceivingState::UcReady),
            (ReceivingEvent::CompletionStarted, ReceivingState::UcConcluding),
            (ReceivingEvent::UcConcluded, ReceivingState::UcConcluded),
            (ReceivingEvent::HeaderFinalized, ReceivingState::HeaderClosed),
        ];
        for (event, expected) in steps {
            let next = ReceivingStateMachine::apply(&mut wf, event).unwrap();
            assert_eq!(next, expected, "after {event}");
        }

        assert_eq!(
            wf.state_history,
            vec![
                ReceivingState::NewHeader,
                ReceivingState::HeaderOpen,
                ReceivingState::UcOpen,
                ReceivingState::UcReady,
                ReceivingState::UcConcluding,
                ReceivingState::UcConcluded,
            ]
        );
    }

    #[test]
    fn completion_requires_items() {
        let err = ReceivingStateMachine::transition(
            ReceivingState::UcOpen,
            ReceivingEvent::CompletionStarted,
        )
        .unwrap_err();
        assert!(matches!(err, RecebError::InvalidTransition { .. }));
    }

    #[test]
    fn completion_can_be_reentered_for_retry() {
        assert_eq!(
            ReceivingStateMachine::transition(
                ReceivingState::UcConcluding,
                ReceivingEvent::CompletionStarted
            )
            .unwrap(),
            ReceivingState::UcConcluding
        );
    }

    #[test]
    fn next_uc_after_conclusion() {
        assert_eq!(
            ReceivingStateMachine::transition(ReceivingState::UcConcluded, ReceivingEvent::UcCreated)
                .unwrap(),
            ReceivingState::UcOpen
        );
    }

    #[test]
    fn resume_depends_on_item_count() {
        assert_eq!(
            ReceivingStateMachine::transition(
                ReceivingState::HeaderOpen,
                ReceivingEvent::UcResumed { items: 0 }
            )
            .unwrap(),
            ReceivingState::UcOpen
        );
        assert_eq!(
            ReceivingStateMachine::transition(
                ReceivingState::HeaderOpen,
                ReceivingEvent::UcResumed { items: 3 }
            )
            .unwrap(),
            ReceivingState::UcReady
        );
    }

    #[test]
    fn delete_only_from_empty_uc() {
        assert!(
            ReceivingStateMachine::transition(ReceivingState::UcReady, ReceivingEvent::UcDeleted)
                .is_err()
        );
        assert_eq!(
            ReceivingStateMachine::transition(ReceivingState::UcOpen, ReceivingEvent::UcDeleted)
                .unwrap(),
            ReceivingState::HeaderOpen
        );
    }

    #[test]
    fn closed_header_is_terminal_except_abandon() {
        for event in [
            ReceivingEvent::HeaderOpened,
            ReceivingEvent::UcCreated,
            ReceivingEvent::ItemAdded,
            ReceivingEvent::HeaderFinalized,
        ] {
            assert!(
                ReceivingStateMachine::transition(ReceivingState::HeaderClosed, event).is_err(),
                "{event} must be rejected"
            );
        }
        assert_eq!(
            ReceivingStateMachine::transition(ReceivingState::HeaderClosed, ReceivingEvent::Abandoned)
                .unwrap(),
            ReceivingState::NewHeader
        );
    }

    #[test]
    fn items_cannot_be_added_before_uc_exists() {
        assert!(
            ReceivingStateMachine::transition(ReceivingState::HeaderOpen, ReceivingEvent::ItemAdded)
                .is_err()
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(ReceivingState::NewHeader.to_string(), "NEW_HEADER");
        assert_eq!(ReceivingState::UcConcluding.to_string(), "UC_CONCLUDING");
        assert_eq!(ReceivingEvent::UcResumed { items: 2 }.to_string(), "UC_RESUMED(2)");
    }
}
