//! Documentation of an online voting backend.
//!
//! Voters register, stand as candidates, cast exactly one vote each and watch
//! live results. Admins read aggregate statistics.
//!
//!
//!
//! # General Infrastructure
//! - Clients talk JSON over HTTP to the axum server
//! - Clients open `/ws` to receive change events as they happen
//! - Records live in Redis, or in process memory when `REDIS_URL` is unset
//! - Several server instances may share one Redis, each fans out to its own sockets
//!
//!
//!
//! # Single Vote
//!
//! **Goal**: every voter ends up with at most one vote, and the tally never disagrees
//! with the vote records.
//!
//! - Gateway authenticates the bearer token and validates the payload
//! - [`ledger::Ledger`] runs the policy checks: admin, existing vote, voter flag,
//!   candidate approval, self-vote
//! - The store commits vote, tally increment and voter flag in one transaction
//! - The unique index on vote voter settles races, first committer wins
//! - Losers of the race get the same "already voted" answer as a plain repeat
//! - After commit, [`fanout::FanOut`] pushes `vote-cast` to every local observer
//!
//! The voter flag and the vote index are both kept. The flag is a cheap early
//! rejection, the index is what holds under concurrency.
//!
//!
//!
//! # Live Results
//!
//! - Events are hints, receivers call `GET /votes/results` again
//! - Best-effort, at-most-once, nothing is replayed after a reconnect
//! - The tally is read from the store on every request, never cached
//!
//!
//!
//! # Notes
//!
//! ## Snapshots
//! Vote records carry the voter and candidate names as they were when the vote was
//! written. They are never refreshed.
//!
//! ## Timeouts
//! A cast whose commit outlives `STORE_TIMEOUT_MS` answers 503 with an unknown outcome.
//! Clients should read `GET /votes/my-vote` before trying again. Resubmitting is safe
//! anyway, the vote index rejects a second vote.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! `````
//!
//! Run against a local Redis.
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 TOKEN_SECRET=dev RUST_LOG=info cargo run -p ballot
//! ```
//!
//! Run with the in-memory store.
//! ```sh
//! TOKEN_SECRET=dev RUST_LOG=info cargo run -p ballot
//! ```
//!
//! Seed an admin.
//! ```sh
//! ADMIN_USERNAME=admin ADMIN_PASSWORD='admin@123' TOKEN_SECRET=dev cargo run -p ballot
//! ```
//!
//!
//!
//! ## Load Testing
//!
//! Fire concurrent double votes at a running server.
//! ```sh
//! cargo run -p tester -- --voters 200 --attempts 4
//! ```
use std::time::Duration;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod fanout;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;
pub mod tally;
pub mod utils;

use error::AppError;
use routes::{
    admin_candidates_handler, admin_users_handler, admin_votes_handler, approval_handler,
    candidacy_handler, candidate_handler, candidates_handler, login_handler, me_handler,
    my_vote_handler, register_candidate_handler, register_handler, results_handler, root_handler,
    stats_handler, votes_handler, ws_handler,
};
use state::{SharedState, State};

pub fn app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let cors = match state
        .config
        .cors_origin
        .as_deref()
        .map(HeaderValue::from_str)
    {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            warn!("Invalid CORS_ORIGIN, allowing any: {e}");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    };

    Router::new()
        .route("/", get(root_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/me", get(me_handler))
        .route("/candidates", get(candidates_handler))
        .route("/candidates/register", post(register_candidate_handler))
        .route("/candidates/check/status", get(candidacy_handler))
        .route("/candidates/{id}", get(candidate_handler))
        .route("/votes", post(votes_handler))
        .route("/votes/results", get(results_handler))
        .route("/votes/my-vote", get(my_vote_handler))
        .route("/admin/stats", get(stats_handler))
        .route("/admin/votes", get(admin_votes_handler))
        .route("/admin/users", get(admin_users_handler))
        .route("/admin/candidates", get(admin_candidates_handler))
        .route("/admin/candidates/{id}/approval", post(approval_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let app = app(state);

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))?;

    info!("Server shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
