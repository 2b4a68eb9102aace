use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::ReceivingState;
use crate::context::ReceiptContext;

/// One receiving session: a Header worked UC by UC until it is closed.
///
/// Every orchestrator step takes `&mut ReceivingWorkflow`, so at most one step
/// per workflow is in flight and a late response cannot touch a context that
/// has already moved on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingWorkflow {
    pub id: String,
    pub state: ReceivingState,
    pub state_history: Vec<ReceivingState>,
    pub context: ReceiptContext,
    /// UCs concluded in this session, in order.
    pub ucs_concluded: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReceivingWorkflow {
    pub fn new(context: ReceiptContext) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            state: ReceivingState::NewHeader,
            state_history: Vec::new(),
            context,
            ucs_concluded: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Summary emitted when a Header is finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAudit {
    pub workflow_id: String,
    pub nf: String,
    pub identificador: String,
    pub state_transitions: Vec<ReceivingState>,
    pub ucs_concluded: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl WorkflowAudit {
    /// Built before the context is cleared, so NF and Identificador are still set.
    pub fn from_workflow(workflow: &ReceivingWorkflow) -> Self {
        let now = Utc::now();
        let duration = now - workflow.created_at;
        let mut transitions = workflow.state_history.clone();
        transitions.push(workflow.state);

        Self {
            workflow_id: workflow.id.clone(),
            nf: workflow.context.nf.clone().unwrap_or_default(),
            identificador: workflow.context.identificador.clone().unwrap_or_default(),
            state_transitions: transitions,
            ucs_concluded: workflow.ucs_concluded.clone(),
            started_at: workflow.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
