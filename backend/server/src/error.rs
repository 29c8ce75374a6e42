use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::{Record, StoreError, UniqueIndex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    Policy,
    Conflict,
    NotFound,
    Invalid,
    Transient,
}

/// Typed outcome of a core operation that did not go through.
#[derive(Error, Debug, PartialEq)]
pub enum Rejection {
    #[error("Admins cannot vote. You manage the election.")]
    AdminCannotVote,

    #[error("Admins cannot register as candidates. You manage the election.")]
    AdminCannotRegister,

    #[error("Candidates cannot vote for themselves.")]
    SelfVote,

    #[error("Candidate not approved")]
    CandidateNotApproved,

    #[error("You have already voted. Each user can only vote once.")]
    AlreadyVoted,

    #[error("You are already registered as a candidate")]
    AlreadyCandidate,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Voter not found")]
    VoterNotFound,

    #[error("Candidate not found")]
    CandidateNotFound,

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store timed out, outcome unknown. Check your vote status before retrying.")]
    Timeout,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::AdminCannotVote
            | Rejection::AdminCannotRegister
            | Rejection::SelfVote
            | Rejection::CandidateNotApproved => RejectionKind::Policy,
            Rejection::AlreadyVoted | Rejection::AlreadyCandidate | Rejection::UsernameTaken => {
                RejectionKind::Conflict
            }
            Rejection::VoterNotFound | Rejection::CandidateNotFound => RejectionKind::NotFound,
            Rejection::Invalid(_) | Rejection::InvalidCredentials => RejectionKind::Invalid,
            Rejection::Unavailable(_) | Rejection::Timeout => RejectionKind::Transient,
        }
    }

    /// Only transient faults can change outcome on resubmission.
    pub fn is_retryable(&self) -> bool {
        self.kind() == RejectionKind::Transient
    }
}

impl From<StoreError> for Rejection {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate(UniqueIndex::VoteVoter) => Rejection::AlreadyVoted,
            StoreError::Duplicate(UniqueIndex::CandidateOwner) => Rejection::AlreadyCandidate,
            StoreError::Duplicate(UniqueIndex::VoterUsername) => Rejection::UsernameTaken,
            StoreError::Missing(Record::Voter) => Rejection::VoterNotFound,
            StoreError::Missing(Record::Candidate) => Rejection::CandidateNotFound,
            StoreError::Unapproved(_) => Rejection::CandidateNotApproved,
            StoreError::Unavailable(message) | StoreError::Corrupt(message) => {
                Rejection::Unavailable(message)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Access token required")]
    Unauthorized,

    #[error("Admin access required")]
    Forbidden,

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Rejected(Rejection::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            AppError::Rejected(rejection) => match rejection.kind() {
                RejectionKind::Policy => StatusCode::FORBIDDEN,
                RejectionKind::Conflict => StatusCode::CONFLICT,
                RejectionKind::NotFound => StatusCode::NOT_FOUND,
                RejectionKind::Invalid => StatusCode::BAD_REQUEST,
                RejectionKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("{self}");
        }

        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_rejections() {
        assert_eq!(
            Rejection::from(StoreError::Duplicate(UniqueIndex::VoteVoter)),
            Rejection::AlreadyVoted
        );
        assert_eq!(
            Rejection::from(StoreError::Missing(Record::Candidate)),
            Rejection::CandidateNotFound
        );
        assert_eq!(
            Rejection::from(StoreError::Corrupt("bad".into())).kind(),
            RejectionKind::Transient
        );
    }

    #[test]
    fn test_status_codes() {
        let status = |error: AppError| error.into_response().status();

        assert_eq!(status(Rejection::AdminCannotVote.into()), StatusCode::FORBIDDEN);
        assert_eq!(status(Rejection::AlreadyVoted.into()), StatusCode::CONFLICT);
        assert_eq!(status(Rejection::CandidateNotFound.into()), StatusCode::NOT_FOUND);
        assert_eq!(status(Rejection::InvalidCredentials.into()), StatusCode::UNAUTHORIZED);
        assert_eq!(status(Rejection::Timeout.into()), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(AppError::MalformedPayload), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Rejection::Timeout.is_retryable());
        assert!(!Rejection::AlreadyVoted.is_retryable());
        assert!(!Rejection::SelfVote.is_retryable());
    }
}
