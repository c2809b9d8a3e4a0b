//! A Change: one causally-identified batch of operations plus an optional
//! presence update (spec §3.1, §4.8).

use serde::{Deserialize, Serialize};

use crate::change_id::ChangeID;
use crate::error::{DocError, DocResult};
use crate::operation::Operation;
use crate::presence::PresenceChange;
use crate::root::Root;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Change {
    id: ChangeID,
    operations: Vec<Operation>,
    presence_change: Option<PresenceChange>,
    message: Option<String>,
}

impl Change {
    pub fn new(id: ChangeID, operations: Vec<Operation>, presence_change: Option<PresenceChange>, message: Option<String>) -> Self {
        Change { id, operations, presence_change, message }
    }

    pub fn id(&self) -> &ChangeID {
        &self.id
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn presence_change(&self) -> Option<&PresenceChange> {
        self.presence_change.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.presence_change.is_none()
    }

    pub fn with_id(&self, id: ChangeID) -> Change {
        Change { id, ..self.clone() }
    }

    /// Execute every operation against `root` in order, atomically:
    /// local changes apply as one unit, so the first failure aborts
    /// (spec §4.8). Reserved for local application — remote application
    /// uses `execute_lenient` instead (spec §7: a remote change keeps
    /// applying past a per-operation failure).
    pub fn execute(&self, root: &mut Root) -> DocResult<()> {
        for op in &self.operations {
            op.execute(root)?;
        }
        Ok(())
    }

    /// Execute every operation, collecting rather than aborting on
    /// failure (spec §7: a `Reference`/`Unsupported` error from a remote
    /// operation is logged and the remaining operations still run).
    pub fn execute_lenient(&self, root: &mut Root) -> Vec<DocError> {
        let mut errors = Vec::new();
        for op in &self.operations {
            if let Err(e) = op.execute(root) {
                errors.push(e);
            }
        }
        errors
    }
}
