use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::{ChoiceId, Message, PollId};
use crate::store::StoreError;

pub type PollResult<T> = Result<T, PollError>;

/// What a [`PollError::NotFound`] was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Poll(PollId),
    Question(String),
    Choice(PollId, ChoiceId),
    Vote(PollId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Poll(id) => write!(f, "poll {}", id),
            Missing::Question(question) => write!(f, "poll with question \"{}\"", question),
            Missing::Choice(poll_id, id) => write!(f, "choice {} on poll {}", id, poll_id),
            Missing::Vote(poll_id) => write!(f, "vote on poll {}", poll_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("invalid poll: {0}")]
    InvalidPoll(String),
    #[error("invalid choice{}: {reason}", on_poll(.poll_id))]
    InvalidChoice {
        poll_id: Option<PollId>,
        reason: String,
    },
    #[error("poll {poll_id} is locked because voting has started")]
    PollLocked { poll_id: PollId },
    #[error("no such {0}")]
    NotFound(Missing),
    #[error("poll {poll_id} is busy, try again")]
    ConcurrentModification { poll_id: PollId },
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

fn on_poll(poll_id: &Option<PollId>) -> String {
    match poll_id {
        Some(id) => format!(" on poll {}", id),
        None => String::new(),
    }
}

impl PollError {
    pub fn invalid_choice(reason: impl Into<String>) -> Self {
        PollError::InvalidChoice {
            poll_id: None,
            reason: reason.into(),
        }
    }

    /// Attaches the poll id to errors raised before the poll was known.
    pub fn with_poll(self, id: PollId) -> Self {
        match self {
            PollError::InvalidChoice {
                poll_id: None,
                reason,
            } => PollError::InvalidChoice {
                poll_id: Some(id),
                reason,
            },
            other => other,
        }
    }
}

/// Wraps persistence failures with the operation that hit them.
pub trait StoreContext<T> {
    fn during(self, operation: &'static str) -> PollResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn during(self, operation: &'static str) -> PollResult<T> {
        self.map_err(|source| PollError::Store { operation, source })
    }
}

impl ResponseError for PollError {
    fn status_code(&self) -> StatusCode {
        match self {
            PollError::InvalidPoll(_) | PollError::InvalidChoice { .. } => StatusCode::BAD_REQUEST,
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::PollLocked { .. } | PollError::ConcurrentModification { .. } => {
                StatusCode::CONFLICT
            }
            PollError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            PollError::Store { .. } => {
                log::error!("{}", self);
                HttpResponse::InternalServerError().json(Message("internal server error"))
            }
            _ => HttpResponse::build(self.status_code()).json(Message(&self.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = PollError::invalid_choice("choice text is empty").with_poll(PollId(7));
        assert_eq!(err.to_string(), "invalid choice on poll 7: choice text is empty");
        let err = PollError::NotFound(Missing::Choice(PollId(7), ChoiceId(2)));
        assert_eq!(err.to_string(), "no such choice 2 on poll 7");
        let err = Err::<(), _>(StoreError::Unavailable("lock poisoned".into()))
            .during("save poll")
            .unwrap_err();
        assert_eq!(err.to_string(), "save poll failed: store unavailable: lock poisoned");
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            PollError::InvalidPoll("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PollError::PollLocked { poll_id: PollId(1) }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PollError::NotFound(Missing::Vote(PollId(1))).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
