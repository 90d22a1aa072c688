use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hunt_core::{
    effective_now, Hunt, HuntError, HuntSchedule, HuntState, MetapuzzleInfo, NewPuzzle,
    PuzzleError, StoryEntry, SubmissionResult, Team, TeamId, UnlockEvent, WrapupEntry,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    hunt: Arc<RwLock<Hunt>>,
    tokens: Arc<RwLock<HashMap<String, TeamId>>>,
    // Per-team time travel overrides. Session state: never persisted.
    time_travel: Arc<RwLock<HashMap<TeamId, DateTime<Utc>>>>,
    persist_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    hunt: Hunt,
    tokens: HashMap<String, TeamId>,
}

fn admin_password() -> String {
    env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "changeme".to_string())
}

/// Hunt schedule from `HUNT_LIVE_AT` / `HUNT_ENDED_AT` (RFC 3339). Falls
/// back to a hunt that went live now and runs for 30 days.
pub fn schedule_from_env() -> HuntSchedule {
    let parse = |var: &str| {
        env::var(var)
            .ok()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc))
    };
    let live_at = parse("HUNT_LIVE_AT").unwrap_or_else(Utc::now);
    let ended_at = parse("HUNT_ENDED_AT").unwrap_or(live_at + chrono::Duration::days(30));
    HuntSchedule::new(live_at, ended_at).unwrap_or_else(|err| {
        tracing::warn!(%err, "invalid hunt schedule configured, ignoring end instant");
        HuntSchedule::new(live_at, live_at + chrono::Duration::days(30))
            .expect("schedule with positive duration")
    })
}

impl AppState {
    pub fn new(schedule: HuntSchedule) -> Self {
        Self {
            hunt: Arc::new(RwLock::new(Hunt::new(schedule))),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            time_travel: Arc::new(RwLock::new(HashMap::new())),
            persist_path: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new(schedule_from_env())
    }

    pub async fn with_persistence(schedule: HuntSchedule, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = Self::new(schedule);
        state.persist_path = Some(path.clone());
        if let Ok(bytes) = tokio::fs::read(&path).await {
            match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(saved) => {
                    *state.hunt.write().await = saved.hunt;
                    *state.tokens.write().await = saved.tokens;
                }
                Err(err) => {
                    tracing::warn!(%err, path = %path.display(), "could not load saved hunt state");
                }
            }
        }
        state
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = Snapshot {
                hunt: self.hunt.read().await.clone(),
                tokens: self.tokens.read().await.clone(),
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(json) => {
                    if let Err(err) = tokio::fs::write(path, json).await {
                        tracing::error!(%err, "persist error");
                    }
                }
                Err(err) => tracing::error!(%err, "persist serialization error"),
            }
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/teams", post(register_team))
        .route("/puzzles", post(create_puzzle))
        .route("/puzzles", get(puzzle_list))
        .route("/puzzles/:slug", get(puzzle_detail))
        .route("/puzzles/:slug/errata", post(create_erratum))
        .route("/puzzles/:slug/guesses", post(submit_guess))
        .route("/leaderboard", get(leaderboard))
        .route("/story", post(create_story_entry))
        .route("/story", get(story_page))
        .route("/victory", get(victory_page))
        .route("/wrapup", put(set_wrapup))
        .route("/wrapup", get(wrapup_page))
        .route("/time-travel", post(time_travel))
        .route("/time-travel", delete(time_travel_reset))
        .with_state(state)
}

fn is_admin(headers: &HeaderMap) -> bool {
    headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| provided == admin_password())
}

async fn team_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Team> {
    let token = headers.get("x-team-token")?.to_str().ok()?;
    let team_id = state.tokens.read().await.get(token).cloned()?;
    state.hunt.read().await.team(&team_id).cloned()
}

/// The instant this request is evaluated against: a tester's time travel
/// override if one is set, the real clock otherwise.
async fn request_now(state: &AppState, team: Option<&Team>) -> DateTime<Utc> {
    let override_at = match team {
        Some(team) => state.time_travel.read().await.get(&team.id).copied(),
        None => None,
    };
    effective_now(Utc::now(), override_at, team.is_some_and(|t| t.is_tester))
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    #[serde(default)]
    is_tester: bool,
}

#[derive(Serialize)]
struct RegisterResponse {
    team_id: TeamId,
    token: String,
}

async fn register_team(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "team name required").into_response();
    }
    // Only operators may mint tester teams.
    if payload.is_tester && !is_admin(&headers) {
        return (StatusCode::FORBIDDEN, "tester flag requires admin password").into_response();
    }

    let team_id = Uuid::new_v4().to_string();
    let token = Uuid::new_v4().to_string();
    {
        let mut hunt = state.hunt.write().await;
        match hunt.register_team(team_id.clone(), name.clone(), payload.is_tester, Utc::now()) {
            Ok(_) => {}
            Err(HuntError::TeamNameTaken(_)) => {
                return (StatusCode::CONFLICT, "team name taken").into_response()
            }
            Err(err) => {
                tracing::error!(%err, "team registration failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "registration failed").into_response();
            }
        }
        state.tokens.write().await.insert(token.clone(), team_id.clone());
    }
    state.persist().await;
    tracing::info!(team = %name, "team registered");

    (StatusCode::CREATED, Json(RegisterResponse { team_id, token })).into_response()
}

#[derive(Deserialize)]
struct MetaRequest {
    icon: String,
    #[serde(default)]
    is_final: bool,
}

#[derive(Deserialize)]
struct AttachedStoryRequest {
    title: String,
    content: String,
    #[serde(default)]
    order: i32,
}

#[derive(Deserialize)]
struct CreatePuzzleRequest {
    slug: String,
    title: String,
    answer: String,
    #[serde(default)]
    keep_going_answers: Vec<String>,
    pdf_url: String,
    available_at: DateTime<Utc>,
    canned_hints_available_at: Option<DateTime<Utc>>,
    day: u8,
    meta: Option<MetaRequest>,
    story: Option<AttachedStoryRequest>,
}

#[derive(Serialize)]
struct CreatePuzzleResponse {
    puzzle_id: String,
    slug: String,
    day: u8,
}

fn puzzle_error_status(err: &PuzzleError) -> StatusCode {
    match err {
        PuzzleError::DuplicateSlug(_)
        | PuzzleError::DayTaken(_)
        | PuzzleError::SecondFinalMetapuzzle => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn create_puzzle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePuzzleRequest>,
) -> impl IntoResponse {
    if !is_admin(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    let puzzle_id = Uuid::new_v4().to_string();
    let def = NewPuzzle {
        slug: payload.slug.clone(),
        title: payload.title,
        answer: payload.answer,
        keep_going_answers: payload.keep_going_answers,
        pdf_url: payload.pdf_url,
        available_at: payload.available_at,
        canned_hints_available_at: payload.canned_hints_available_at,
        meta: payload.meta.map(|meta| MetapuzzleInfo {
            icon: meta.icon,
            is_final: meta.is_final,
        }),
        day: payload.day,
    };

    {
        let mut hunt = state.hunt.write().await;
        if let Err(err) = hunt.add_puzzle(puzzle_id.clone(), def) {
            return match err {
                HuntError::Puzzle(ref puzzle_err) => {
                    (puzzle_error_status(puzzle_err), err.to_string()).into_response()
                }
                _ => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
            };
        }
        if let Some(story) = payload.story {
            let entry = StoryEntry {
                id: Uuid::new_v4().to_string(),
                title: story.title,
                content: story.content,
                order: story.order,
                puzzle_id: Some(puzzle_id.clone()),
            };
            if let Err(err) = hunt.add_story_entry(entry) {
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
        }
    }
    state.persist().await;
    tracing::info!(slug = %payload.slug, day = payload.day, "puzzle created");

    (
        StatusCode::CREATED,
        Json(CreatePuzzleResponse {
            puzzle_id,
            slug: payload.slug,
            day: payload.day,
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct ErratumRequest {
    text: String,
    // Defaults to the moment of publication.
    published_at: Option<DateTime<Utc>>,
}

async fn create_erratum(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ErratumRequest>,
) -> impl IntoResponse {
    if !is_admin(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }
    let published_at = payload.published_at.unwrap_or_else(Utc::now);
    {
        let mut hunt = state.hunt.write().await;
        if let Err(err) = hunt.add_erratum(&slug, payload.text, published_at) {
            return (StatusCode::NOT_FOUND, err.to_string()).into_response();
        }
    }
    state.persist().await;
    tracing::info!(%slug, "erratum published");
    (StatusCode::CREATED, "created").into_response()
}

#[derive(Deserialize)]
struct CreateStoryRequest {
    title: String,
    content: String,
    #[serde(default)]
    order: i32,
    puzzle_id: Option<String>,
}

async fn create_story_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateStoryRequest>,
) -> impl IntoResponse {
    if !is_admin(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }
    let entry = StoryEntry {
        id: Uuid::new_v4().to_string(),
        title: payload.title,
        content: payload.content,
        order: payload.order,
        puzzle_id: payload.puzzle_id,
    };
    {
        let mut hunt = state.hunt.write().await;
        if let Err(err) = hunt.add_story_entry(entry) {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    }
    state.persist().await;
    (StatusCode::CREATED, "created").into_response()
}

#[derive(Deserialize)]
struct WrapupRequest {
    title: String,
    content: String,
    available_at: DateTime<Utc>,
}

async fn set_wrapup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WrapupRequest>,
) -> impl IntoResponse {
    if !is_admin(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }
    {
        let mut hunt = state.hunt.write().await;
        hunt.wrapup = Some(WrapupEntry {
            title: payload.title,
            content: payload.content,
            available_at: payload.available_at,
        });
    }
    state.persist().await;
    (StatusCode::OK, "wrapup set").into_response()
}

#[derive(Serialize)]
struct PuzzleListResponse {
    hunt_state: HuntState,
    days: Vec<hunt_core::CalendarDay>,
}

async fn puzzle_list(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let team = team_from_headers(&state, &headers).await;
    let now = request_now(&state, team.as_ref()).await;
    let hunt = state.hunt.read().await;

    let response = PuzzleListResponse {
        hunt_state: hunt.hunt_state(now),
        days: hunt.calendar(now, team.as_ref().map(|t| t.id.as_str())),
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[derive(Serialize)]
struct GuessView {
    text: String,
    evaluation: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErratumView {
    text: String,
    published_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PuzzleDetailResponse {
    slug: String,
    title: String,
    pdf_url: String,
    day: Option<u8>,
    solved: bool,
    canned_hints_available: bool,
    errata: Vec<ErratumView>,
    guesses: Vec<GuessView>,
}

fn evaluation_label(result: SubmissionResult) -> &'static str {
    match result {
        SubmissionResult::Evaluated(hunt_core::GuessEvaluation::Correct) => "correct",
        SubmissionResult::Evaluated(hunt_core::GuessEvaluation::Incorrect) => "incorrect",
        SubmissionResult::Evaluated(hunt_core::GuessEvaluation::KeepGoing) => "keep_going",
        SubmissionResult::AlreadySubmitted => "already_submitted",
    }
}

fn evaluation_message(result: SubmissionResult) -> &'static str {
    match result {
        SubmissionResult::Evaluated(hunt_core::GuessEvaluation::Correct) => "Correct! 🎉",
        SubmissionResult::Evaluated(hunt_core::GuessEvaluation::Incorrect) => "Incorrect.",
        SubmissionResult::Evaluated(hunt_core::GuessEvaluation::KeepGoing) => {
            "Not the answer, but keep going!"
        }
        SubmissionResult::AlreadySubmitted => "You've already submitted that guess.",
    }
}

async fn puzzle_detail(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(team) = team_from_headers(&state, &headers).await else {
        return (StatusCode::UNAUTHORIZED, "team token required").into_response();
    };
    let now = request_now(&state, Some(&team)).await;
    let hunt = state.hunt.read().await;

    let Some(puzzle) = hunt.visible_puzzle(&slug, now, team.is_tester) else {
        return (StatusCode::NOT_FOUND, "puzzle not found").into_response();
    };

    let guesses = hunt
        .guess_history(&team.id, &puzzle.id)
        .into_iter()
        .map(|guess| GuessView {
            text: guess.text.clone(),
            evaluation: evaluation_label(SubmissionResult::Evaluated(guess.evaluation)).to_string(),
            created_at: guess.created_at,
        })
        .collect();

    let errata = hunt
        .catalog
        .errata_for(&puzzle.id, now)
        .into_iter()
        .map(|e| ErratumView {
            text: e.text.clone(),
            published_at: e.published_at,
        })
        .collect();

    let response = PuzzleDetailResponse {
        slug: puzzle.slug.clone(),
        title: puzzle.title.clone(),
        pdf_url: puzzle.pdf_url.clone(),
        day: hunt.catalog.day_of(&puzzle.id),
        solved: hunt.ledger().has_solved(&team.id, &puzzle.id),
        canned_hints_available: puzzle.canned_hints_available(now),
        errata,
        guesses,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[derive(Deserialize)]
struct GuessRequest {
    guess: String,
}

#[derive(Serialize)]
struct GuessResponse {
    result: &'static str,
    message: &'static str,
    events: Vec<UnlockEvent>,
}

async fn submit_guess(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<GuessRequest>,
) -> impl IntoResponse {
    let Some(team) = team_from_headers(&state, &headers).await else {
        return (StatusCode::UNAUTHORIZED, "team token required").into_response();
    };
    let now = request_now(&state, Some(&team)).await;

    let outcome = {
        let mut hunt = state.hunt.write().await;
        // Same gate as the detail page: an unopened puzzle does not exist.
        if hunt.visible_puzzle(&slug, now, team.is_tester).is_none() {
            return (StatusCode::NOT_FOUND, "puzzle not found").into_response();
        }
        match hunt.submit_guess(&team.id, &slug, &payload.guess, now) {
            Ok(outcome) => outcome,
            Err(HuntError::Submit(err)) => {
                tracing::warn!(team = %team.name, %slug, %err, "invalid guess rejected");
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
            Err(HuntError::PuzzleNotFound) => {
                return (StatusCode::NOT_FOUND, "puzzle not found").into_response()
            }
            Err(err) => {
                tracing::error!(%err, "guess submission failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "submission failed").into_response();
            }
        }
    };
    state.persist().await;
    tracing::info!(
        team = %team.name,
        %slug,
        result = evaluation_label(outcome.result),
        "guess submitted"
    );

    (
        StatusCode::OK,
        Json(GuessResponse {
            result: evaluation_label(outcome.result),
            message: evaluation_message(outcome.result),
            events: outcome.events,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct LeaderboardResponse {
    entries: Vec<hunt_core::LeaderboardEntry>,
}

async fn leaderboard(State(state): State<AppState>) -> impl IntoResponse {
    let hunt = state.hunt.read().await;
    (
        StatusCode::OK,
        Json(LeaderboardResponse {
            entries: hunt.leaderboard(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct StoryEntryView {
    title: String,
    content: String,
    spoiler_warning: bool,
}

async fn story_page(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let team = team_from_headers(&state, &headers).await;
    let now = request_now(&state, team.as_ref()).await;
    let hunt = state.hunt.read().await;

    let entries: Vec<StoryEntryView> = hunt
        .story_page(team.as_ref().map(|t| t.id.as_str()), now)
        .into_iter()
        .map(|view| StoryEntryView {
            title: view.entry.title.clone(),
            content: view.entry.content.clone(),
            spoiler_warning: view.spoiler_warning,
        })
        .collect();
    (StatusCode::OK, Json(entries)).into_response()
}

async fn victory_page(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let team = team_from_headers(&state, &headers).await;
    let now = request_now(&state, team.as_ref()).await;
    let hunt = state.hunt.read().await;

    match hunt.victory_entry(team.as_ref(), now) {
        Some(entry) => (
            StatusCode::OK,
            Json(StoryEntryView {
                title: entry.title.clone(),
                content: entry.content.clone(),
                spoiler_warning: false,
            }),
        )
            .into_response(),
        // Deliberately indistinguishable from a page that does not exist.
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn wrapup_page(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let team = team_from_headers(&state, &headers).await;
    let now = request_now(&state, team.as_ref()).await;
    let hunt = state.hunt.read().await;

    match hunt.wrapup_page(team.as_ref().is_some_and(|t| t.is_tester), now) {
        Some(entry) => (StatusCode::OK, Json(entry.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

#[derive(Deserialize)]
struct TimeTravelRequest {
    to: DateTime<Utc>,
}

async fn time_travel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TimeTravelRequest>,
) -> impl IntoResponse {
    let Some(team) = team_from_headers(&state, &headers).await else {
        return (StatusCode::UNAUTHORIZED, "team token required").into_response();
    };
    if !team.is_tester {
        return (StatusCode::FORBIDDEN, "testers only").into_response();
    }
    state.time_travel.write().await.insert(team.id.clone(), payload.to);
    tracing::info!(team = %team.name, to = %payload.to, "time traveling");
    (StatusCode::OK, "traveling through time...").into_response()
}

async fn time_travel_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(team) = team_from_headers(&state, &headers).await else {
        return (StatusCode::UNAUTHORIZED, "team token required").into_response();
    };
    if !team.is_tester {
        return (StatusCode::FORBIDDEN, "testers only").into_response();
    }
    state.time_travel.write().await.remove(&team.id);
    tracing::info!(team = %team.name, "returned to the present");
    (StatusCode::OK, "returned to the present").into_response()
}
