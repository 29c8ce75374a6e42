use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{AuthAdmin, AuthVoter, issue_token},
    error::AppError,
    fanout::Subscription,
    models::{CandidateView, Voter, VoterProfile},
    state::SharedState,
    tally::{stats, tally},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    username: String,
    password: String,
    full_name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRequest {
    candidate_name: String,
    party: String,
    manifesto: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    candidate_id: Uuid,
}

#[derive(Deserialize)]
pub struct ApprovalRequest {
    approved: bool,
}

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| {
            debug!("Rejected payload: {e}");
            AppError::MalformedPayload
        })
}

fn path_id(id: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    id.map(|Path(inner)| inner)
        .map_err(|_| AppError::MalformedPayload)
}

fn session(state: &SharedState, voter: &Voter) -> Result<serde_json::Value, AppError> {
    let token = issue_token(
        state.config.token_secret.as_bytes(),
        voter.id,
        state.config.token_ttl_secs,
    )
    .map_err(|e| AppError::InternalError(Box::new(e)))?;

    Ok(json!({ "token": token, "user": VoterProfile::from(voter) }))
}

pub async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "Voting System API is running!" }))
}

pub async fn register_handler(
    State(state): State<SharedState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    let voter = state
        .registry
        .register_voter(&request.username, &request.password, &request.full_name)
        .await?;

    Ok((StatusCode::CREATED, Json(session(&state, &voter)?)))
}

pub async fn login_handler(
    State(state): State<SharedState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    let voter = state
        .registry
        .authenticate(&request.username, &request.password)
        .await?;

    Ok(Json(session(&state, &voter)?))
}

pub async fn me_handler(AuthVoter(voter): AuthVoter) -> impl IntoResponse {
    Json(json!({ "user": VoterProfile::from(&voter) }))
}

pub async fn candidates_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let candidates: Vec<CandidateView> = state
        .registry
        .candidates()
        .await?
        .iter()
        .map(CandidateView::from)
        .collect();

    Ok(Json(json!({ "candidates": candidates })))
}

pub async fn candidate_handler(
    State(state): State<SharedState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let candidate = state.registry.candidate(path_id(id)?).await?;

    Ok(Json(json!({ "candidate": CandidateView::from(&candidate) })))
}

pub async fn register_candidate_handler(
    State(state): State<SharedState>,
    AuthVoter(voter): AuthVoter,
    payload: Result<Json<CandidateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    let candidate = state
        .registry
        .register_candidate(
            voter.id,
            &request.candidate_name,
            &request.party,
            &request.manifesto,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Successfully registered as candidate",
            "candidate": CandidateView::from(&candidate),
        })),
    ))
}

pub async fn candidacy_handler(
    State(state): State<SharedState>,
    AuthVoter(voter): AuthVoter,
) -> Result<impl IntoResponse, AppError> {
    let candidacy = state.registry.candidacy(voter.id).await?;

    Ok(Json(json!({
        "isCandidate": candidacy.is_some(),
        "candidate": candidacy.as_ref().map(CandidateView::from),
    })))
}

pub async fn votes_handler(
    State(state): State<SharedState>,
    AuthVoter(voter): AuthVoter,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    let receipt = state.ledger.cast(voter.id, request.candidate_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Vote cast successfully", "vote": receipt })),
    ))
}

pub async fn results_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(tally(state.store.as_ref()).await?))
}

pub async fn my_vote_handler(
    State(state): State<SharedState>,
    AuthVoter(voter): AuthVoter,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.voter_status(voter.id).await?))
}

pub async fn stats_handler(
    State(state): State<SharedState>,
    _admin: AuthAdmin,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(stats(state.store.as_ref()).await?))
}

pub async fn admin_votes_handler(
    State(state): State<SharedState>,
    _admin: AuthAdmin,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .registry
        .votes(query.page.unwrap_or(1), query.limit.unwrap_or(20))
        .await?;

    let votes: Vec<_> = page
        .votes
        .iter()
        .map(|vote| {
            json!({
                "id": vote.id,
                "voterId": vote.voter,
                "voterName": vote.voter_name,
                "voterUsername": page.usernames.get(&vote.voter),
                "candidateId": vote.candidate,
                "candidateName": vote.candidate_name,
                "candidateParty": vote.party,
                "timestamp": vote.timestamp,
            })
        })
        .collect();

    Ok(Json(json!({
        "votes": votes,
        "pagination": {
            "currentPage": page.page,
            "totalPages": page.total_pages,
            "totalVotes": page.total_votes,
            "hasNext": page.page < page.total_pages,
            "hasPrev": page.page > 1,
        },
    })))
}

pub async fn admin_users_handler(
    State(state): State<SharedState>,
    _admin: AuthAdmin,
) -> Result<impl IntoResponse, AppError> {
    let users: Vec<VoterProfile> = state
        .registry
        .voters()
        .await?
        .iter()
        .map(VoterProfile::from)
        .collect();

    Ok(Json(json!({ "users": users })))
}

pub async fn admin_candidates_handler(
    State(state): State<SharedState>,
    _admin: AuthAdmin,
) -> Result<impl IntoResponse, AppError> {
    let candidates: Vec<CandidateView> = state
        .registry
        .all_candidates()
        .await?
        .iter()
        .map(CandidateView::from)
        .collect();

    Ok(Json(json!({ "candidates": candidates })))
}

pub async fn approval_handler(
    State(state): State<SharedState>,
    _admin: AuthAdmin,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ApprovalRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id = path_id(id)?;
    let request = body(payload)?;
    let candidate = state.registry.set_approval(id, request.approved).await?;

    Ok(Json(json!({ "candidate": CandidateView::from(&candidate) })))
}

pub async fn ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observe(socket, state))
}

async fn observe(socket: WebSocket, state: SharedState) {
    let Subscription { id, mut receiver } = state.fanout.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = receiver.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };

                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.fanout.unsubscribe(id);
}
