use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::TdFlags;

/// Next action of the storage sub-flow for a UC, derived only from its TD flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageStep {
    /// Td1, Td2 and ConfTd2 set. Nothing left to do.
    AlreadyStored,
    CreateTd1,
    CreateTd2,
    /// Tasks exist; waiting for the operator to confirm a position.
    ToConfirm,
    /// Flags that no legal sequence can produce (e.g. Td2 without Td1).
    Inconsistent(TdFlags),
}

impl fmt::Display for StorageStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageStep::AlreadyStored => write!(f, "ALREADY_STORED"),
            StorageStep::CreateTd1 => write!(f, "CREATE_TD1"),
            StorageStep::CreateTd2 => write!(f, "CREATE_TD2"),
            StorageStep::ToConfirm => write!(f, "TO_CONFIRM"),
            StorageStep::Inconsistent(flags) => write!(f, "INCONSISTENT({flags})"),
        }
    }
}

/// Resolves where a UC is in the TD1 → TD2 → confirmation sequence.
///
/// Re-entering with partially persisted flags resumes at the right sub-step.
pub fn determine_next_step(flags: TdFlags) -> StorageStep {
    match (flags.td1, flags.td2, flags.conf_td2) {
        (true, true, true) => StorageStep::AlreadyStored,
        (false, false, false) => StorageStep::CreateTd1,
        (true, false, false) => StorageStep::CreateTd2,
        (true, true, false) => StorageStep::ToConfirm,
        _ => StorageStep::Inconsistent(flags),
    }
}

/// Flags the UC carries once `step` has completed successfully.
pub fn flags_after(step: StorageStep) -> Option<TdFlags> {
    match step {
        StorageStep::CreateTd1 => Some(TdFlags::td1_done()),
        StorageStep::CreateTd2 => Some(TdFlags::td2_done()),
        StorageStep::ToConfirm => Some(TdFlags::stored()),
        StorageStep::AlreadyStored | StorageStep::Inconsistent(_) => None,
    }
}
