mod state;
mod storage;
mod workflow;

pub use state::{ReceivingEvent, ReceivingState, ReceivingStateMachine};
pub use storage::{StorageStep, determine_next_step, flags_after};
pub use workflow::{ReceivingWorkflow, WorkflowAudit};
