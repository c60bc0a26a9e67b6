//! One-step transition detection between two snapshots.

use crate::models::{PlatformState, StatusSnapshot};

use std::collections::BTreeSet;

/// Units that went offline or came back online since the previous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChanges {
    pub newly_offline: BTreeSet<String>,
    pub newly_online: BTreeSet<String>,
}

impl StatusChanges {
    pub fn is_empty(&self) -> bool {
        self.newly_offline.is_empty() && self.newly_online.is_empty()
    }
}

/// Diff `current` against `previous`.
///
/// Only units present in both snapshots are compared; transitions into
/// partial or error are not reported.
pub fn detect_changes(previous: &StatusSnapshot, current: &StatusSnapshot) -> StatusChanges {
    let mut changes = StatusChanges::default();

    for (name, before) in previous {
        let Some(now) = current.get(name) else {
            tracing::debug!("{} not in current run, no transition", name);
            continue;
        };
        if before == now {
            continue;
        }

        match now {
            PlatformState::Offline => {
                changes.newly_offline.insert(name.clone());
            }
            PlatformState::Online => {
                changes.newly_online.insert(name.clone());
            }
            PlatformState::Partial | PlatformState::Error => {}
        }
        tracing::info!("{} changed from {} to {}", name, before, now);
    }

    changes
}
