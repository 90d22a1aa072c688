use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::answers::{clean, normalize};
use crate::catalog::Puzzle;
use crate::{PuzzleId, TeamId};

pub const MAX_GUESS_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuessEvaluation {
    Correct,
    Incorrect,
    KeepGoing,
}

/// One evaluated submission. Append-only: never mutated or deleted once
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guess {
    pub id: u64,
    pub team_id: TeamId,
    pub puzzle_id: PuzzleId,
    pub text: String,
    pub text_normalized: String,
    pub evaluation: GuessEvaluation,
    pub created_at: DateTime<Utc>,
}

/// At most one per (team, puzzle); created on the first correct guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solve {
    pub id: u64,
    pub team_id: TeamId,
    pub puzzle_id: PuzzleId,
    pub created_at: DateTime<Utc>,
}

/// At most one per team; created when the team solves the final metapuzzle.
/// Its existence is the single source of truth for "team completed the hunt".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finish {
    pub id: u64,
    pub team_id: TeamId,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a submission attempt. Resubmitting text a team has already
/// tried on a puzzle is reported explicitly, never persisted twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionResult {
    Evaluated(GuessEvaluation),
    AlreadySubmitted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("guess text is blank")]
    Blank,
    #[error("guess text exceeds {MAX_GUESS_LEN} characters")]
    TooLong,
}

/// What a single `submit_guess` call did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub result: SubmissionResult,
    /// True iff this submission created a Solve that did not exist before.
    pub newly_solved: bool,
}

/// The durable guess/solve/finish ledger. Every derived view (leaderboard,
/// unlock state) recomputes from these rows; nothing else is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    guesses: Vec<Guess>,
    solves: Vec<Solve>,
    finishes: Vec<Finish>,
    // Unique index over (team, puzzle, normalized text). The in-memory
    // analogue of the store-level constraint that closes the duplicate
    // submission race; exclusive access makes check-then-insert atomic here.
    guess_keys: HashSet<(TeamId, PuzzleId, String)>,
    next_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Evaluates and records a guess, per the submission state machine:
    /// validate, normalize, suppress duplicates, classify, append the guess,
    /// and upsert the solve on a correct answer.
    pub fn submit_guess(
        &mut self,
        puzzle: &Puzzle,
        team_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Submission, SubmitError> {
        if text.chars().count() > MAX_GUESS_LEN {
            return Err(SubmitError::TooLong);
        }
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(SubmitError::Blank);
        }

        let key = (team_id.to_string(), puzzle.id.clone(), normalized.clone());
        if self.guess_keys.contains(&key) {
            return Ok(Submission {
                result: SubmissionResult::AlreadySubmitted,
                newly_solved: false,
            });
        }

        let evaluation = if normalized == puzzle.answer_normalized() {
            GuessEvaluation::Correct
        } else if puzzle.keep_going_normalized().iter().any(|kg| *kg == normalized) {
            GuessEvaluation::KeepGoing
        } else {
            GuessEvaluation::Incorrect
        };

        let id = self.next_id();
        self.guess_keys.insert(key);
        self.guesses.push(Guess {
            id,
            team_id: team_id.to_string(),
            puzzle_id: puzzle.id.clone(),
            text: clean(text),
            text_normalized: normalized,
            evaluation,
            created_at: now,
        });

        let newly_solved = evaluation == GuessEvaluation::Correct
            && self.record_solve(team_id, &puzzle.id, now);

        Ok(Submission {
            result: SubmissionResult::Evaluated(evaluation),
            newly_solved,
        })
    }

    /// Creates the Solve for (team, puzzle) if absent. Returns whether a new
    /// row was created; re-solving is a no-op.
    pub fn record_solve(&mut self, team_id: &str, puzzle_id: &str, now: DateTime<Utc>) -> bool {
        if self.has_solved(team_id, puzzle_id) {
            return false;
        }
        let id = self.next_id();
        self.solves.push(Solve {
            id,
            team_id: team_id.to_string(),
            puzzle_id: puzzle_id.to_string(),
            created_at: now,
        });
        true
    }

    /// Creates the Finish for a team if absent. Returns whether a new row
    /// was created.
    pub fn record_finish(&mut self, team_id: &str, now: DateTime<Utc>) -> bool {
        if self.has_finished(team_id) {
            return false;
        }
        let id = self.next_id();
        self.finishes.push(Finish {
            id,
            team_id: team_id.to_string(),
            created_at: now,
        });
        true
    }

    /// All guesses for a (team, puzzle), newest first.
    pub fn guesses_for(&self, team_id: &str, puzzle_id: &str) -> Vec<&Guess> {
        self.guesses
            .iter()
            .rev()
            .filter(|g| g.team_id == team_id && g.puzzle_id == puzzle_id)
            .collect()
    }

    /// All solves for a team, newest first.
    pub fn solves_for(&self, team_id: &str) -> Vec<&Solve> {
        self.solves
            .iter()
            .rev()
            .filter(|s| s.team_id == team_id)
            .collect()
    }

    pub fn solved_set(&self, team_id: &str) -> HashSet<PuzzleId> {
        self.solves
            .iter()
            .filter(|s| s.team_id == team_id)
            .map(|s| s.puzzle_id.clone())
            .collect()
    }

    pub fn has_solved(&self, team_id: &str, puzzle_id: &str) -> bool {
        self.solves
            .iter()
            .any(|s| s.team_id == team_id && s.puzzle_id == puzzle_id)
    }

    pub fn has_finished(&self, team_id: &str) -> bool {
        self.finishes.iter().any(|f| f.team_id == team_id)
    }

    pub fn all_solves(&self) -> &[Solve] {
        &self.solves
    }

    pub fn guess_count(&self, puzzle_id: &str) -> usize {
        self.guesses.iter().filter(|g| g.puzzle_id == puzzle_id).count()
    }

    pub fn solve_count(&self, puzzle_id: &str) -> usize {
        self.solves.iter().filter(|s| s.puzzle_id == puzzle_id).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, NewPuzzle};
    use chrono::TimeZone;

    fn dec(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, day, hour, 0, 0).unwrap()
    }

    fn puzzle(answer: &str, keep_going: &[&str]) -> Puzzle {
        let mut catalog = Catalog::new();
        catalog
            .add_puzzle(
                "p1".into(),
                NewPuzzle {
                    slug: "test-puzzle".into(),
                    title: "Test Puzzle".into(),
                    answer: answer.into(),
                    keep_going_answers: keep_going.iter().map(|s| s.to_string()).collect(),
                    pdf_url: "https://puzzles.example/test.pdf".into(),
                    available_at: dec(1, 0),
                    canned_hints_available_at: None,
                    meta: None,
                    day: 1,
                },
            )
            .unwrap()
            .clone()
    }

    #[test]
    fn classifies_correct_keep_going_and_incorrect() {
        let puzzle = puzzle("FELIZ NAVIDAD", &["SNOWFLAKE"]);
        let mut ledger = Ledger::new();

        let sub = ledger.submit_guess(&puzzle, "t1", "feliz   navidad", dec(1, 1)).unwrap();
        assert_eq!(sub.result, SubmissionResult::Evaluated(GuessEvaluation::Correct));
        assert!(sub.newly_solved);

        let sub = ledger.submit_guess(&puzzle, "t2", "snowflake", dec(1, 1)).unwrap();
        assert_eq!(sub.result, SubmissionResult::Evaluated(GuessEvaluation::KeepGoing));
        assert!(!sub.newly_solved);

        let sub = ledger.submit_guess(&puzzle, "t2", "anything else", dec(1, 2)).unwrap();
        assert_eq!(sub.result, SubmissionResult::Evaluated(GuessEvaluation::Incorrect));
    }

    #[test]
    fn duplicate_text_is_suppressed_even_with_different_casing() {
        let puzzle = puzzle("SUPER SECRET ANSWER", &[]);
        let mut ledger = Ledger::new();

        let first = ledger.submit_guess(&puzzle, "t1", "wrong guess", dec(1, 1)).unwrap();
        assert_eq!(first.result, SubmissionResult::Evaluated(GuessEvaluation::Incorrect));
        assert_eq!(ledger.guesses_for("t1", "p1").len(), 1);

        let dup = ledger.submit_guess(&puzzle, "t1", "  WRONG-guess!! ", dec(1, 2)).unwrap();
        assert_eq!(dup.result, SubmissionResult::AlreadySubmitted);
        assert_eq!(ledger.guesses_for("t1", "p1").len(), 1);

        // Same text from another team is not a duplicate.
        let other = ledger.submit_guess(&puzzle, "t2", "wrong guess", dec(1, 3)).unwrap();
        assert_eq!(other.result, SubmissionResult::Evaluated(GuessEvaluation::Incorrect));
    }

    #[test]
    fn wrong_wrong_then_correct_scenario() {
        let puzzle = puzzle("SUPER SECRET ANSWER", &[]);
        let mut ledger = Ledger::new();

        ledger.submit_guess(&puzzle, "t1", "WRONG", dec(1, 1)).unwrap();
        // Different word, a second ordinary incorrect guess.
        ledger.submit_guess(&puzzle, "t1", "WRONG AGAIN", dec(1, 2)).unwrap();
        let third = ledger.submit_guess(&puzzle, "t1", "SUPER SECRET ANSWER", dec(1, 3)).unwrap();

        assert_eq!(third.result, SubmissionResult::Evaluated(GuessEvaluation::Correct));
        assert!(third.newly_solved);
        assert_eq!(ledger.guesses_for("t1", "p1").len(), 3);
        assert_eq!(ledger.solves_for("t1").len(), 1);
    }

    #[test]
    fn keep_going_duplicate_scenario() {
        let puzzle = puzzle("SUPER SECRET ANSWER", &["KEEP GOING"]);
        let mut ledger = Ledger::new();

        let first = ledger.submit_guess(&puzzle, "t1", "keep going", dec(1, 1)).unwrap();
        assert_eq!(first.result, SubmissionResult::Evaluated(GuessEvaluation::KeepGoing));
        assert!(!first.newly_solved);
        assert_eq!(ledger.guesses_for("t1", "p1").len(), 1);

        let second = ledger.submit_guess(&puzzle, "t1", "KEEP GOING", dec(1, 2)).unwrap();
        assert_eq!(second.result, SubmissionResult::AlreadySubmitted);
        assert_eq!(ledger.guesses_for("t1", "p1").len(), 1);
        assert!(ledger.solves_for("t1").is_empty());
    }

    #[test]
    fn solve_upsert_is_create_if_absent() {
        let mut ledger = Ledger::new();
        assert!(ledger.record_solve("t1", "p1", dec(1, 1)));
        assert!(!ledger.record_solve("t1", "p1", dec(1, 2)));
        assert_eq!(ledger.solves_for("t1").len(), 1);

        assert!(ledger.record_finish("t1", dec(1, 3)));
        assert!(!ledger.record_finish("t1", dec(1, 4)));
        assert!(ledger.has_finished("t1"));
    }

    #[test]
    fn rejects_blank_and_overlong_guesses() {
        let puzzle = puzzle("SUPER SECRET ANSWER", &[]);
        let mut ledger = Ledger::new();

        assert_eq!(ledger.submit_guess(&puzzle, "t1", "   ", dec(1, 1)), Err(SubmitError::Blank));
        // Normalizes to nothing: no letters survive.
        assert_eq!(ledger.submit_guess(&puzzle, "t1", "12345!", dec(1, 1)), Err(SubmitError::Blank));
        let long = "A".repeat(MAX_GUESS_LEN + 1);
        assert_eq!(ledger.submit_guess(&puzzle, "t1", &long, dec(1, 1)), Err(SubmitError::TooLong));
        assert!(ledger.guesses_for("t1", "p1").is_empty());
    }

    #[test]
    fn guess_history_is_newest_first() {
        let puzzle = puzzle("SUPER SECRET ANSWER", &[]);
        let mut ledger = Ledger::new();

        for (hour, text) in [(1, "guess one"), (2, "guess two"), (3, "guess three")] {
            ledger.submit_guess(&puzzle, "t1", text, dec(1, hour)).unwrap();
        }
        let texts: Vec<&str> = ledger
            .guesses_for("t1", "p1")
            .iter()
            .map(|g| g.text.as_str())
            .collect();
        assert_eq!(texts, vec!["GUESS THREE", "GUESS TWO", "GUESS ONE"]);
    }

    #[test]
    fn solves_are_newest_first() {
        let mut ledger = Ledger::new();
        ledger.record_solve("t1", "p1", dec(1, 1));
        ledger.record_solve("t1", "p2", dec(2, 1));
        ledger.record_solve("t2", "p1", dec(3, 1));

        let ids: Vec<&str> = ledger
            .solves_for("t1")
            .iter()
            .map(|s| s.puzzle_id.as_str())
            .collect();
        assert_eq!(ids, vec!["p2", "p1"]);
        assert_eq!(ledger.solve_count("p1"), 2);
    }
}
