use std::collections::HashSet;

use muxdedup_core::{Mux, ScanResult};
use serde::Serialize;

/// What to do about one duplicate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Decision {
    /// One side was already updated or deleted earlier in this run.
    Skip,
    /// The older record has no mapped services; drop it.
    DeleteOlder,
    /// Copy the newer values onto the older record, then drop the newer one
    /// when nothing maps it.
    UpdateOlder { delete_newer: bool },
    /// The newer record failed its scan and nothing maps it.
    DeleteNewer,
    NoAction,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub newer: &'a Mux,
    pub older: &'a Mux,
    pub allow_merge: bool,
    pub nupdates: usize,
    pub newer_mappings: usize,
    pub older_mappings: usize,
}

/// Chooses an action per pair and remembers which muxes were acted on.
///
/// The handled set lives for one run only; a uuid in it is never mutated twice.
#[derive(Debug, Default)]
pub struct ActionPlanner {
    handled: HashSet<String>,
}

impl ActionPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handled(&self, uuid: &str) -> bool {
        self.handled.contains(uuid)
    }

    pub fn handled(&self) -> &HashSet<String> {
        &self.handled
    }

    /// First matching rule wins. Does not touch the handled set.
    pub fn decide(&self, input: &PlanInput<'_>) -> Decision {
        if self.is_handled(&input.newer.uuid) || self.is_handled(&input.older.uuid) {
            return Decision::Skip;
        }
        if input.allow_merge && input.older_mappings == 0 {
            return Decision::DeleteOlder;
        }
        if input.allow_merge && input.nupdates > 0 {
            return Decision::UpdateOlder {
                delete_newer: input.newer_mappings == 0,
            };
        }
        if input.newer_mappings == 0 && input.newer.scan_result == ScanResult::Fail {
            return Decision::DeleteNewer;
        }
        Decision::NoAction
    }

    /// Decide, then mark every record the decision mutates as handled.
    pub fn plan(&mut self, input: &PlanInput<'_>) -> Decision {
        let decision = self.decide(input);
        match decision {
            Decision::DeleteOlder => {
                self.handled.insert(input.older.uuid.clone());
            }
            Decision::UpdateOlder { delete_newer } => {
                self.handled.insert(input.older.uuid.clone());
                if delete_newer {
                    self.handled.insert(input.newer.uuid.clone());
                }
            }
            Decision::DeleteNewer => {
                self.handled.insert(input.newer.uuid.clone());
            }
            Decision::Skip | Decision::NoAction => {}
        }
        decision
    }
}
