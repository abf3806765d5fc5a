use std::collections::HashMap;

use tracing::warn;

use sinkbridge_core::ProjectId;
use sinkbridge_state::Ownership;

use crate::error::CleanupError;

/// Per-cycle cache of project ownership decisions.
pub(crate) struct Partitions<'a> {
    ownership: &'a dyn Ownership,
    owned: HashMap<ProjectId, bool>,
}

impl<'a> Partitions<'a> {
    pub fn new(ownership: &'a dyn Ownership) -> Self {
        Self {
            ownership,
            owned: HashMap::new(),
        }
    }

    /// Whether this node cleans the project. A failed check skips the
    /// project and is recorded in `errors`.
    pub async fn owns(&mut self, project: ProjectId, errors: &mut Vec<CleanupError>) -> bool {
        if let Some(owned) = self.owned.get(&project) {
            return *owned;
        }
        let owned = match self.ownership.is_owner(&project.to_string()).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(project = %project, error = %e, "cannot check ownership of project");
                errors.push(e.into());
                false
            }
        };
        self.owned.insert(project, owned);
        owned
    }
}
