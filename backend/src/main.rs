use std::env;

use backend::{app, schedule_from_env, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let schedule = schedule_from_env();
    let state = if let Ok(path) = env::var("HUNT_STATE_PATH") {
        AppState::with_persistence(schedule, path).await
    } else {
        AppState::new(schedule)
    };
    let app = app(state);
    tracing::info!("starting server on 0.0.0.0:3000");
    axum::serve(
        tokio::net::TcpListener::bind("0.0.0.0:3000")
            .await
            .expect("bind"),
        app,
    )
    .await
    .expect("server error");
}
