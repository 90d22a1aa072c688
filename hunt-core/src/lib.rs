pub mod answers;
pub mod cascade;
pub mod catalog;
pub mod gate;
pub mod leaderboard;
pub mod ledger;

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cascade::{StoryEntry, StoryView, UnlockEvent, WrapupEntry};
pub use catalog::{CalendarDay, Catalog, Erratum, MetapuzzleInfo, NewPuzzle, Puzzle, PuzzleError};
pub use gate::{effective_now, HuntSchedule, HuntState, ScheduleError};
pub use leaderboard::LeaderboardEntry;
pub use ledger::{Finish, Guess, GuessEvaluation, Ledger, Solve, SubmissionResult, SubmitError};

pub type TeamId = String;
pub type PuzzleId = String;

/// The authenticated actor. Display names are unique; `is_finished` is
/// derived from the Finish ledger and only the cascade flips it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub is_tester: bool,
    pub is_finished: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HuntError {
    #[error("team name {0:?} is already taken")]
    TeamNameTaken(String),
    #[error("team id {0:?} is already in use")]
    TeamIdTaken(TeamId),
    #[error("team not found")]
    TeamNotFound,
    #[error("puzzle not found")]
    PuzzleNotFound,
    #[error(transparent)]
    Puzzle(#[from] PuzzleError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// What a guess submission produced, including the unlocks it cascaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub result: SubmissionResult,
    pub events: Vec<UnlockEvent>,
}

/// The whole hunt: schedule, catalog, teams, narrative content, and the
/// guess/solve ledger everything else derives from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunt {
    pub schedule: HuntSchedule,
    pub catalog: Catalog,
    ledger: Ledger,
    teams: HashMap<TeamId, Team>,
    pub story: Vec<StoryEntry>,
    pub wrapup: Option<WrapupEntry>,
}

impl Hunt {
    pub fn new(schedule: HuntSchedule) -> Self {
        Self {
            schedule,
            catalog: Catalog::new(),
            ledger: Ledger::new(),
            teams: HashMap::new(),
            story: Vec::new(),
            wrapup: None,
        }
    }

    pub fn hunt_state(&self, now: DateTime<Utc>) -> HuntState {
        self.schedule.state_at(now)
    }

    pub fn register_team(
        &mut self,
        id: TeamId,
        name: String,
        is_tester: bool,
        now: DateTime<Utc>,
    ) -> Result<&Team, HuntError> {
        if self.teams.values().any(|t| t.name == name) {
            return Err(HuntError::TeamNameTaken(name));
        }
        let team = Team {
            id: id.clone(),
            name,
            is_tester,
            is_finished: false,
            created_at: now,
        };
        match self.teams.entry(id) {
            Entry::Occupied(slot) => Err(HuntError::TeamIdTaken(slot.key().clone())),
            Entry::Vacant(slot) => Ok(slot.insert(team)),
        }
    }

    pub fn team(&self, id: &str) -> Option<&Team> {
        self.teams.get(id)
    }

    pub fn add_puzzle(&mut self, id: PuzzleId, def: NewPuzzle) -> Result<&Puzzle, HuntError> {
        Ok(self.catalog.add_puzzle(id, def)?)
    }

    /// Publishes an erratum against an existing puzzle.
    pub fn add_erratum(
        &mut self,
        slug: &str,
        text: String,
        published_at: DateTime<Utc>,
    ) -> Result<(), HuntError> {
        let puzzle_id = self
            .catalog
            .by_slug(slug)
            .map(|p| p.id.clone())
            .ok_or(HuntError::PuzzleNotFound)?;
        self.catalog.add_erratum(Erratum {
            puzzle_id,
            text,
            published_at,
        });
        Ok(())
    }

    /// Adds a story entry. Entries tied to a puzzle must reference one that
    /// exists.
    pub fn add_story_entry(&mut self, entry: StoryEntry) -> Result<(), HuntError> {
        if let Some(puzzle_id) = &entry.puzzle_id {
            if self.catalog.by_id(puzzle_id).is_none() {
                return Err(HuntError::PuzzleNotFound);
            }
        }
        self.story.push(entry);
        Ok(())
    }

    /// A puzzle as visible to a viewer: testers see everything, everyone
    /// else only puzzles that have opened as of `as_of`.
    pub fn visible_puzzle(
        &self,
        slug: &str,
        as_of: DateTime<Utc>,
        is_tester: bool,
    ) -> Option<&Puzzle> {
        self.catalog
            .by_slug(slug)
            .filter(|p| is_tester || p.is_available_at(as_of))
    }

    /// Submits a guess and runs the unlock cascade on a fresh solve. The
    /// ledger write happens before any cascade step; everything runs under
    /// one exclusive borrow, so the effects land together or not at all.
    pub fn submit_guess(
        &mut self,
        team_id: &str,
        slug: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, HuntError> {
        let puzzle = self
            .catalog
            .by_slug(slug)
            .cloned()
            .ok_or(HuntError::PuzzleNotFound)?;
        if !self.teams.contains_key(team_id) {
            return Err(HuntError::TeamNotFound);
        }

        let submission = self.ledger.submit_guess(&puzzle, team_id, text, now)?;

        let mut events = Vec::new();
        if submission.newly_solved {
            events.push(UnlockEvent::PuzzleSolved {
                team_id: team_id.to_string(),
                puzzle_id: puzzle.id.clone(),
            });
            if self
                .story
                .iter()
                .any(|entry| entry.puzzle_id.as_deref() == Some(puzzle.id.as_str()))
            {
                events.push(UnlockEvent::StoryUnlocked {
                    puzzle_id: puzzle.id.clone(),
                });
            }
            if puzzle.is_final() && self.ledger.record_finish(team_id, now) {
                if let Some(team) = self.teams.get_mut(team_id) {
                    team.is_finished = true;
                }
                events.push(UnlockEvent::HuntFinished {
                    team_id: team_id.to_string(),
                });
            }
        }

        Ok(SubmissionOutcome {
            result: submission.result,
            events,
        })
    }

    pub fn guess_history(&self, team_id: &str, puzzle_id: &str) -> Vec<&Guess> {
        self.ledger.guesses_for(team_id, puzzle_id)
    }

    pub fn solves_for(&self, team_id: &str) -> Vec<&Solve> {
        self.ledger.solves_for(team_id)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn calendar(&self, as_of: DateTime<Utc>, viewer: Option<&str>) -> Vec<CalendarDay> {
        let solved = viewer
            .map(|team_id| self.ledger.solved_set(team_id))
            .unwrap_or_default();
        self.catalog.calendar(as_of, &solved)
    }

    pub fn story_page(&self, viewer: Option<&str>, now: DateTime<Utc>) -> Vec<StoryView<'_>> {
        let solved = viewer
            .map(|team_id| self.ledger.solved_set(team_id))
            .unwrap_or_default();
        cascade::story_page(&self.story, &solved, self.hunt_state(now))
    }

    /// The victory story entry, or None when the viewer may not know it
    /// exists.
    pub fn victory_entry(&self, viewer: Option<&Team>, now: DateTime<Utc>) -> Option<&StoryEntry> {
        let finished = viewer.is_some_and(|t| t.is_finished);
        let is_tester = viewer.is_some_and(|t| t.is_tester);
        if !cascade::victory_access(finished, is_tester, self.hunt_state(now)) {
            return None;
        }
        let final_id = self.catalog.final_puzzle_id()?;
        self.story
            .iter()
            .find(|entry| entry.puzzle_id.as_ref() == Some(final_id))
    }

    pub fn wrapup_page(&self, is_tester: bool, now: DateTime<Utc>) -> Option<&WrapupEntry> {
        self.wrapup
            .as_ref()
            .filter(|entry| cascade::wrapup_visible(entry, self.hunt_state(now), now, is_tester))
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let teams: Vec<&Team> = self.teams.values().collect();
        leaderboard::rank_teams(
            &teams,
            self.ledger.all_solves(),
            &self.catalog.metapuzzle_ids(),
            self.catalog.final_puzzle_id(),
            &self.catalog.days(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, day, hour, 0, 0).unwrap()
    }

    fn hunt() -> Hunt {
        let schedule = HuntSchedule::new(dec(1, 0), dec(26, 0)).unwrap();
        let mut hunt = Hunt::new(schedule);
        hunt.add_puzzle(
            "p1".into(),
            NewPuzzle {
                slug: "first".into(),
                title: "First".into(),
                answer: "FELIZ NAVIDAD".into(),
                keep_going_answers: vec!["SNOWFLAKE".into()],
                pdf_url: "https://puzzles.example/first.pdf".into(),
                available_at: dec(1, 0),
                canned_hints_available_at: None,
                meta: None,
                day: 1,
            },
        )
        .unwrap();
        hunt.add_puzzle(
            "final".into(),
            NewPuzzle {
                slug: "grand-finale".into(),
                title: "Grand Finale".into(),
                answer: "SLEIGH RIDE".into(),
                keep_going_answers: vec![],
                pdf_url: "https://puzzles.example/finale.pdf".into(),
                available_at: dec(24, 0),
                canned_hints_available_at: None,
                meta: Some(MetapuzzleInfo { icon: "🎅".into(), is_final: true }),
                day: 24,
            },
        )
        .unwrap();
        hunt.add_story_entry(StoryEntry {
            id: "s1".into(),
            title: "Chapter One".into(),
            content: "...".into(),
            order: 1,
            puzzle_id: Some("p1".into()),
        })
        .unwrap();
        hunt.add_story_entry(StoryEntry {
            id: "victory".into(),
            title: "The End".into(),
            content: "...".into(),
            order: 99,
            puzzle_id: Some("final".into()),
        })
        .unwrap();
        hunt.register_team("t1".into(), "Herrings".into(), false, dec(1, 0))
            .unwrap();
        hunt
    }

    #[test]
    fn register_team_rejects_duplicate_name() {
        let mut hunt = hunt();
        assert_eq!(
            hunt.register_team("t2".into(), "Herrings".into(), false, dec(1, 0)),
            Err(HuntError::TeamNameTaken("Herrings".into()))
        );
    }

    #[test]
    fn register_team_rejects_duplicate_id() {
        let mut hunt = hunt();
        assert_eq!(
            hunt.register_team("t1".into(), "Axolotls".into(), false, dec(1, 0)),
            Err(HuntError::TeamIdTaken("t1".into()))
        );
        // The original registration is untouched.
        assert_eq!(hunt.team("t1").unwrap().name, "Herrings");
    }

    #[test]
    fn errata_require_an_existing_puzzle() {
        let mut hunt = hunt();
        assert_eq!(
            hunt.add_erratum("missing", "Clue 3 is wrong.".into(), dec(2, 0)),
            Err(HuntError::PuzzleNotFound)
        );
        hunt.add_erratum("first", "Clue 3 is wrong.".into(), dec(2, 0))
            .unwrap();
        assert_eq!(hunt.catalog.errata_for("p1", dec(3, 0)).len(), 1);
    }

    #[test]
    fn correct_guess_solves_and_unlocks_story() {
        let mut hunt = hunt();
        let outcome = hunt.submit_guess("t1", "first", "feliz navidad", dec(1, 1)).unwrap();
        assert_eq!(outcome.result, SubmissionResult::Evaluated(GuessEvaluation::Correct));
        assert_eq!(
            outcome.events,
            vec![
                UnlockEvent::PuzzleSolved { team_id: "t1".into(), puzzle_id: "p1".into() },
                UnlockEvent::StoryUnlocked { puzzle_id: "p1".into() },
            ]
        );

        let story = hunt.story_page(Some("t1"), dec(1, 2));
        assert_eq!(story.len(), 1);
        assert_eq!(story[0].entry.id, "s1");
    }

    #[test]
    fn solving_final_puzzle_finishes_the_hunt_once() {
        let mut hunt = hunt();
        let outcome = hunt
            .submit_guess("t1", "grand-finale", "Sleigh Ride", dec(24, 1))
            .unwrap();
        assert!(outcome
            .events
            .contains(&UnlockEvent::HuntFinished { team_id: "t1".into() }));
        assert!(hunt.team("t1").unwrap().is_finished);
        assert!(hunt.ledger().has_finished("t1"));

        // Identical text is suppressed, no second finish.
        let again = hunt
            .submit_guess("t1", "grand-finale", "SLEIGH-RIDE", dec(24, 2))
            .unwrap();
        assert_eq!(again.result, SubmissionResult::AlreadySubmitted);
        assert!(again.events.is_empty());
        assert_eq!(hunt.solves_for("t1").len(), 1);
    }

    #[test]
    fn non_final_solve_never_finishes() {
        let mut hunt = hunt();
        hunt.submit_guess("t1", "first", "FELIZ NAVIDAD", dec(1, 1)).unwrap();
        assert!(!hunt.team("t1").unwrap().is_finished);
        assert!(!hunt.ledger().has_finished("t1"));
    }

    #[test]
    fn victory_page_is_gated() {
        let mut hunt = hunt();
        hunt.register_team("tester".into(), "Elves".into(), true, dec(1, 0)).unwrap();

        let viewer = hunt.team("t1").cloned();
        assert!(hunt.victory_entry(viewer.as_ref(), dec(5, 0)).is_none());

        // Testers see it mid-hunt.
        let tester = hunt.team("tester").cloned();
        assert_eq!(hunt.victory_entry(tester.as_ref(), dec(5, 0)).unwrap().id, "victory");

        // Everyone sees it once the hunt has ended.
        assert_eq!(hunt.victory_entry(None, dec(26, 0)).unwrap().id, "victory");

        // Finishing unlocks it mid-hunt.
        hunt.submit_guess("t1", "grand-finale", "sleigh ride", dec(24, 1)).unwrap();
        let viewer = hunt.team("t1").cloned();
        assert_eq!(hunt.victory_entry(viewer.as_ref(), dec(24, 2)).unwrap().id, "victory");
    }

    #[test]
    fn unavailable_puzzles_hidden_except_for_testers() {
        let hunt = hunt();
        assert!(hunt.visible_puzzle("grand-finale", dec(5, 0), false).is_none());
        assert!(hunt.visible_puzzle("grand-finale", dec(5, 0), true).is_some());
        assert!(hunt.visible_puzzle("grand-finale", dec(24, 0), false).is_some());
        assert!(hunt.visible_puzzle("missing", dec(24, 0), true).is_none());
    }

    #[test]
    fn leaderboard_reflects_ledger() {
        let mut hunt = hunt();
        hunt.register_team("t2".into(), "Axolotls".into(), false, dec(1, 0)).unwrap();
        hunt.submit_guess("t1", "first", "FELIZ NAVIDAD", dec(1, 1)).unwrap();

        let board = hunt.leaderboard();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].team_name, "Herrings");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].solved_days, vec![1]);
        assert_eq!(board[1].team_name, "Axolotls");
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn wrapup_visibility() {
        let mut hunt = hunt();
        hunt.wrapup = Some(WrapupEntry {
            title: "Wrap-up".into(),
            content: "...".into(),
            available_at: dec(28, 0),
        });
        assert!(hunt.wrapup_page(false, dec(25, 0)).is_none());
        assert!(hunt.wrapup_page(false, dec(27, 0)).is_none());
        assert!(hunt.wrapup_page(false, dec(28, 0)).is_some());
        assert!(hunt.wrapup_page(true, dec(2, 0)).is_some());
    }
}
