use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::{self, HuntState};
use crate::{PuzzleId, TeamId};

/// A piece of the hunt's narrative. Entries tied to a puzzle unlock when
/// that puzzle is solved; unconditioned entries are always visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    pub order: i32,
    pub puzzle_id: Option<PuzzleId>,
}

/// The singleton post-hunt wrap-up, gated on its own release instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapupEntry {
    pub title: String,
    pub content: String,
    pub available_at: DateTime<Utc>,
}

/// A story entry as shown to a particular viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryView<'a> {
    pub entry: &'a StoryEntry,
    /// Set when the hunt has ended and the entry is shown to a viewer who
    /// never solved its puzzle themselves.
    pub spoiler_warning: bool,
}

/// Derived unlocks cascading from a solve or from a hunt state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockEvent {
    PuzzleSolved { team_id: TeamId, puzzle_id: PuzzleId },
    StoryUnlocked { puzzle_id: PuzzleId },
    HuntFinished { team_id: TeamId },
}

/// The story page for a viewer with the given solve set. Once the hunt
/// ends every entry is visible to everyone, with spoiler warnings on the
/// ones the viewer had not personally solved.
pub fn story_page<'a>(
    entries: &'a [StoryEntry],
    solved: &HashSet<PuzzleId>,
    hunt_state: HuntState,
) -> Vec<StoryView<'a>> {
    let mut visible: Vec<StoryView<'a>> = entries
        .iter()
        .filter_map(|entry| match &entry.puzzle_id {
            None => Some(StoryView { entry, spoiler_warning: false }),
            Some(puzzle_id) if solved.contains(puzzle_id) => {
                Some(StoryView { entry, spoiler_warning: false })
            }
            Some(_) if hunt_state == HuntState::Ended => {
                Some(StoryView { entry, spoiler_warning: true })
            }
            Some(_) => None,
        })
        .collect();
    visible.sort_by_key(|view| view.entry.order);
    visible
}

/// Whether a viewer may see the victory page. Callers must translate a
/// denial into not-found, so gated content is indistinguishable from
/// nonexistent content.
pub fn victory_access(viewer_finished: bool, is_tester: bool, hunt_state: HuntState) -> bool {
    viewer_finished || is_tester || hunt_state == HuntState::Ended
}

/// Whether the wrap-up is visible: after the hunt ends and the entry's own
/// release instant has passed, or always for testers.
pub fn wrapup_visible(
    entry: &WrapupEntry,
    hunt_state: HuntState,
    now: DateTime<Utc>,
    is_tester: bool,
) -> bool {
    is_tester || (hunt_state == HuntState::Ended && gate::is_available(entry.available_at, now))
}
