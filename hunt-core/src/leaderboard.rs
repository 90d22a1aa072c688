use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ledger::Solve;
use crate::{PuzzleId, Team, TeamId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub team_id: TeamId,
    pub team_name: String,
    /// Calendar days of the team's solves, in solve order.
    pub solved_days: Vec<u8>,
    pub rank: usize,
}

// Ascending sort: finished before unfinished, then more metapuzzle solves,
// then more solves overall.
type RankKey = (bool, i64, i64);

/// Ranks teams from the solve ledger. Tester teams and their solves are
/// excluded. Ties share a rank number and the next distinct key skips ahead
/// by the number of tied teams ("1224" competition ranking); the returned
/// list is ordered by (rank, team name).
pub fn rank_teams(
    teams: &[&Team],
    solves: &[Solve],
    metapuzzle_ids: &HashSet<PuzzleId>,
    final_puzzle_id: Option<&PuzzleId>,
    days: &HashMap<PuzzleId, u8>,
) -> Vec<LeaderboardEntry> {
    let ranked: Vec<&Team> = teams.iter().copied().filter(|t| !t.is_tester).collect();
    let eligible: HashSet<&str> = ranked.iter().map(|t| t.id.as_str()).collect();

    let mut solves_by_team: HashMap<&str, Vec<&PuzzleId>> = HashMap::new();
    for solve in solves {
        if eligible.contains(solve.team_id.as_str()) {
            solves_by_team
                .entry(solve.team_id.as_str())
                .or_default()
                .push(&solve.puzzle_id);
        }
    }

    let rank_key = |team: &Team| -> RankKey {
        let solved = solves_by_team.get(team.id.as_str());
        let total = solved.map_or(0, |s| s.len());
        let metas = solved.map_or(0, |s| {
            s.iter().filter(|p| metapuzzle_ids.contains(**p)).count()
        });
        let finished =
            final_puzzle_id.is_some_and(|fid| solved.is_some_and(|s| s.contains(&fid)));
        (!finished, -(metas as i64), -(total as i64))
    };

    let mut keys: Vec<RankKey> = ranked.iter().map(|t| rank_key(t)).collect();
    keys.sort();
    let mut ranks_map: HashMap<RankKey, usize> = HashMap::new();
    let mut rank = 0;
    let mut step_size = 1;
    for key in keys {
        if ranks_map.contains_key(&key) {
            // Tie: the next distinct key skips ahead.
            step_size += 1;
        } else {
            ranks_map.insert(key, rank + step_size);
            rank += step_size;
            step_size = 1;
        }
    }

    let mut entries: Vec<LeaderboardEntry> = ranked
        .iter()
        .map(|team| LeaderboardEntry {
            team_id: team.id.clone(),
            team_name: team.name.clone(),
            solved_days: solves_by_team
                .get(team.id.as_str())
                .map(|solved| {
                    solved
                        .iter()
                        .filter_map(|p| days.get(*p).copied())
                        .collect()
                })
                .unwrap_or_default(),
            rank: ranks_map[&rank_key(team)],
        })
        .collect();
    entries.sort_by(|a, b| (a.rank, &a.team_name).cmp(&(b.rank, &b.team_name)));
    entries
}
