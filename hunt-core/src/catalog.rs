use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::answers::{clean, normalize};
use crate::gate;
use crate::PuzzleId;

/// Days of the advent calendar the hunt runs over.
pub const CALENDAR_DAYS: u8 = 24;

/// Marks a puzzle as a metapuzzle. At most one puzzle system-wide may be
/// flagged final; solving the final puzzle finishes the hunt for a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetapuzzleInfo {
    pub icon: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: PuzzleId,
    pub slug: String,
    pub title: String,
    pub answer: String,
    answer_normalized: String,
    pub keep_going_answers: Vec<String>,
    keep_going_normalized: Vec<String>,
    pub pdf_url: String,
    pub available_at: DateTime<Utc>,
    pub canned_hints_available_at: Option<DateTime<Utc>>,
    pub meta: Option<MetapuzzleInfo>,
}

/// Input for creating a puzzle together with its calendar placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPuzzle {
    pub slug: String,
    pub title: String,
    pub answer: String,
    pub keep_going_answers: Vec<String>,
    pub pdf_url: String,
    pub available_at: DateTime<Utc>,
    pub canned_hints_available_at: Option<DateTime<Utc>>,
    pub meta: Option<MetapuzzleInfo>,
    pub day: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PuzzleError {
    #[error("answer is empty after normalization")]
    BlankAnswer,
    #[error("keep-going answer {0:?} is empty after normalization")]
    BlankKeepGoing(String),
    #[error("answer {0:?} appears more than once after normalization")]
    DuplicateAnswer(String),
    #[error("slug {0:?} is already taken")]
    DuplicateSlug(String),
    #[error("a final metapuzzle already exists")]
    SecondFinalMetapuzzle,
    #[error("calendar day {0} is out of range")]
    DayOutOfRange(u8),
    #[error("calendar day {0} is already taken")]
    DayTaken(u8),
}

impl Puzzle {
    fn build(id: PuzzleId, def: &NewPuzzle) -> Result<Self, PuzzleError> {
        let answer = clean(&def.answer);
        let answer_normalized = normalize(&def.answer);
        if answer_normalized.is_empty() {
            return Err(PuzzleError::BlankAnswer);
        }

        let mut seen = HashSet::new();
        seen.insert(answer_normalized.clone());
        let mut keep_going_answers = Vec::new();
        let mut keep_going_normalized = Vec::new();
        for raw in &def.keep_going_answers {
            let normalized = normalize(raw);
            if normalized.is_empty() {
                return Err(PuzzleError::BlankKeepGoing(raw.clone()));
            }
            if !seen.insert(normalized.clone()) {
                return Err(PuzzleError::DuplicateAnswer(raw.clone()));
            }
            keep_going_answers.push(clean(raw));
            keep_going_normalized.push(normalized);
        }

        Ok(Self {
            id,
            slug: def.slug.clone(),
            title: def.title.clone(),
            answer,
            answer_normalized,
            keep_going_answers,
            keep_going_normalized,
            pdf_url: def.pdf_url.clone(),
            available_at: def.available_at,
            canned_hints_available_at: def.canned_hints_available_at,
            meta: def.meta.clone(),
        })
    }

    pub fn answer_normalized(&self) -> &str {
        &self.answer_normalized
    }

    pub fn keep_going_normalized(&self) -> &[String] {
        &self.keep_going_normalized
    }

    pub fn is_available_at(&self, as_of: DateTime<Utc>) -> bool {
        gate::is_available(self.available_at, as_of)
    }

    pub fn is_final(&self) -> bool {
        self.meta.as_ref().is_some_and(|meta| meta.is_final)
    }

    pub fn canned_hints_available(&self, as_of: DateTime<Utc>) -> bool {
        self.canned_hints_available_at
            .is_some_and(|at| gate::is_available(at, as_of))
    }
}

/// A correction issued against a puzzle. Hidden until its own
/// `published_at` instant passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erratum {
    pub puzzle_id: PuzzleId,
    pub text: String,
    pub published_at: DateTime<Utc>,
}

/// Placement of a puzzle on the advent calendar. Created in the same
/// `add_puzzle` call that inserts the puzzle, never as a side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub puzzle_id: PuzzleId,
    pub day: u8,
}

/// One slot of the rendered advent calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub day: u8,
    pub puzzle: Option<CalendarSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSlot {
    pub puzzle_id: PuzzleId,
    pub slug: String,
    pub title: String,
    pub solved: bool,
    pub meta_icon: Option<String>,
}

/// The read-side puzzle collection: puzzles plus their calendar entries,
/// with the slug and single-final invariants enforced at insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    puzzles: Vec<Puzzle>,
    calendar: Vec<CalendarEntry>,
    #[serde(default)]
    errata: Vec<Erratum>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a puzzle and its calendar entry together.
    pub fn add_puzzle(&mut self, id: PuzzleId, def: NewPuzzle) -> Result<&Puzzle, PuzzleError> {
        if self.puzzles.iter().any(|p| p.slug == def.slug) {
            return Err(PuzzleError::DuplicateSlug(def.slug));
        }
        if def.day == 0 || def.day > CALENDAR_DAYS {
            return Err(PuzzleError::DayOutOfRange(def.day));
        }
        if self.calendar.iter().any(|entry| entry.day == def.day) {
            return Err(PuzzleError::DayTaken(def.day));
        }
        let is_final = def.meta.as_ref().is_some_and(|meta| meta.is_final);
        if is_final && self.final_puzzle_id().is_some() {
            return Err(PuzzleError::SecondFinalMetapuzzle);
        }

        let puzzle = Puzzle::build(id, &def)?;
        self.calendar.push(CalendarEntry {
            puzzle_id: puzzle.id.clone(),
            day: def.day,
        });
        self.puzzles.push(puzzle);
        Ok(self.puzzles.last().unwrap())
    }

    pub fn puzzles(&self) -> &[Puzzle] {
        &self.puzzles
    }

    pub fn by_slug(&self, slug: &str) -> Option<&Puzzle> {
        self.puzzles.iter().find(|p| p.slug == slug)
    }

    pub fn by_id(&self, id: &str) -> Option<&Puzzle> {
        self.puzzles.iter().find(|p| p.id == id)
    }

    pub fn available_at(&self, as_of: DateTime<Utc>) -> Vec<&Puzzle> {
        self.puzzles
            .iter()
            .filter(|p| p.is_available_at(as_of))
            .collect()
    }

    pub fn day_of(&self, puzzle_id: &str) -> Option<u8> {
        self.calendar
            .iter()
            .find(|entry| entry.puzzle_id == puzzle_id)
            .map(|entry| entry.day)
    }

    pub fn days(&self) -> HashMap<PuzzleId, u8> {
        self.calendar
            .iter()
            .map(|entry| (entry.puzzle_id.clone(), entry.day))
            .collect()
    }

    pub fn metapuzzle_ids(&self) -> HashSet<PuzzleId> {
        self.puzzles
            .iter()
            .filter(|p| p.meta.is_some())
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn final_puzzle_id(&self) -> Option<&PuzzleId> {
        self.puzzles.iter().find(|p| p.is_final()).map(|p| &p.id)
    }

    pub fn add_erratum(&mut self, erratum: Erratum) {
        self.errata.push(erratum);
    }

    /// Published errata for a puzzle, newest first.
    pub fn errata_for(&self, puzzle_id: &str, as_of: DateTime<Utc>) -> Vec<&Erratum> {
        let mut published: Vec<&Erratum> = self
            .errata
            .iter()
            .filter(|e| e.puzzle_id == puzzle_id && gate::is_available(e.published_at, as_of))
            .collect();
        published.sort_by_key(|e| std::cmp::Reverse(e.published_at));
        published
    }

    /// Renders the full advent calendar as of `as_of`: every day appears,
    /// days whose puzzle has not opened yet render empty.
    pub fn calendar(&self, as_of: DateTime<Utc>, solved: &HashSet<PuzzleId>) -> Vec<CalendarDay> {
        let by_day: HashMap<u8, &Puzzle> = self
            .calendar
            .iter()
            .filter_map(|entry| {
                self.by_id(&entry.puzzle_id)
                    .filter(|p| p.is_available_at(as_of))
                    .map(|p| (entry.day, p))
            })
            .collect();

        (1..=CALENDAR_DAYS)
            .map(|day| CalendarDay {
                day,
                puzzle: by_day.get(&day).map(|puzzle| CalendarSlot {
                    puzzle_id: puzzle.id.clone(),
                    slug: puzzle.slug.clone(),
                    title: puzzle.title.clone(),
                    solved: solved.contains(&puzzle.id),
                    meta_icon: puzzle.meta.as_ref().map(|meta| meta.icon.clone()),
                }),
            })
            .collect()
    }
}
