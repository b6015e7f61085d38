use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Poll, PollId, Vote, VoterId};

mod memory;
mod postgres;

pub use memory::MemoryPollStore;
pub use postgres::PgPollStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for polls and their vote records.
///
/// Implementations do not retry. Callers serialize writes per poll, so a
/// store only has to make each single call atomic.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn next_poll_id(&self) -> StoreResult<PollId>;

    /// Inserts or replaces the poll with the same id.
    async fn save(&self, poll: &Poll) -> StoreResult<()>;

    async fn find_by_id(&self, id: PollId) -> StoreResult<Option<Poll>>;

    /// First poll with this exact question, in insertion order.
    async fn find_by_question(&self, question: &str) -> StoreResult<Option<Poll>>;

    async fn list(&self) -> StoreResult<Vec<Poll>>;

    /// Removes the poll and its votes. Returns false if there was no such poll.
    async fn delete(&self, id: PollId) -> StoreResult<bool>;

    async fn find_vote(&self, poll_id: PollId, voter_id: &VoterId) -> StoreResult<Option<Vote>>;

    /// Saves the poll tally together with the voter's (new or replaced) vote.
    async fn record_vote(&self, poll: &Poll, vote: &Vote) -> StoreResult<()>;

    /// Saves the poll tally and drops the voter's vote in one step.
    async fn withdraw_vote(&self, poll: &Poll, voter_id: &VoterId) -> StoreResult<()>;

    async fn count_votes(&self, poll_id: PollId) -> StoreResult<u64>;
}
