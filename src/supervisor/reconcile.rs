//! Desired-set versus live-set diffing.

use std::collections::HashSet;

use crate::models::workspace::Workspace;

/// Work needed to converge the registry onto a desired workspace set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Live sessions whose workspace is no longer desired.
    pub stop: Vec<Workspace>,
    /// Desired workspaces with no session.
    pub start: Vec<Workspace>,
}

impl ReconcilePlan {
    /// Whether the registry already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop.is_empty() && self.start.is_empty()
    }
}

/// Locally addressable workspaces from `desired`, first occurrence kept.
#[must_use]
pub fn eligible(desired: &[Workspace]) -> Vec<Workspace> {
    let mut seen = HashSet::new();
    desired
        .iter()
        .filter(|ws| ws.is_local())
        .filter(|ws| seen.insert(*ws))
        .cloned()
        .collect()
}

/// Diff `live` against the eligible part of `desired`.
///
/// Workspaces present on both sides are left alone, so planning twice
/// against an unchanged set yields an empty plan.
#[must_use]
pub fn plan<'a>(live: impl IntoIterator<Item = &'a Workspace>, desired: &[Workspace]) -> ReconcilePlan {
    let wanted = eligible(desired);
    let wanted_set: HashSet<&Workspace> = wanted.iter().collect();
    let live_set: HashSet<&Workspace> = live.into_iter().collect();

    let mut stop: Vec<Workspace> = live_set
        .iter()
        .filter(|ws| !wanted_set.contains(*ws))
        .map(|ws| (*ws).clone())
        .collect();
    stop.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uri.cmp(&b.uri)));

    let start = wanted
        .iter()
        .filter(|ws| !live_set.contains(ws))
        .cloned()
        .collect();

    ReconcilePlan { stop, start }
}
