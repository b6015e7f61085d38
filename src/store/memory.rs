use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{PollStore, StoreError, StoreResult};
use crate::models::{Poll, PollId, Vote, VoterId};

#[derive(Default)]
struct Tables {
    polls: HashMap<PollId, Poll>,
    // insertion order of poll ids
    order: Vec<PollId>,
    votes: HashMap<(PollId, VoterId), Vote>,
}

impl Tables {
    fn upsert(&mut self, poll: &Poll) {
        if self.polls.insert(poll.id(), poll.clone()).is_none() {
            self.order.push(poll.id());
        }
    }
}

/// Keeps everything in process memory. Reads hand out copies.
pub struct MemoryPollStore {
    next_id: AtomicI64,
    tables: RwLock<Tables>,
}

impl Default for MemoryPollStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn next_poll_id(&self) -> StoreResult<PollId> {
        Ok(PollId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn save(&self, poll: &Poll) -> StoreResult<()> {
        // ids saved from elsewhere must not be handed out again
        self.next_id.fetch_max(poll.id().0 + 1, Ordering::Relaxed);
        self.write()?.upsert(poll);
        Ok(())
    }

    async fn find_by_id(&self, id: PollId) -> StoreResult<Option<Poll>> {
        Ok(self.read()?.polls.get(&id).cloned())
    }

    async fn find_by_question(&self, question: &str) -> StoreResult<Option<Poll>> {
        let tables = self.read()?;
        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.polls.get(id))
            .find(|poll| poll.question() == question)
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Poll>> {
        let tables = self.read()?;
        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.polls.get(id))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: PollId) -> StoreResult<bool> {
        let mut tables = self.write()?;
        if tables.polls.remove(&id).is_none() {
            return Ok(false);
        }
        tables.order.retain(|poll_id| *poll_id != id);
        tables.votes.retain(|(poll_id, _), _| *poll_id != id);
        Ok(true)
    }

    async fn find_vote(&self, poll_id: PollId, voter_id: &VoterId) -> StoreResult<Option<Vote>> {
        Ok(self
            .read()?
            .votes
            .get(&(poll_id, voter_id.clone()))
            .cloned())
    }

    async fn record_vote(&self, poll: &Poll, vote: &Vote) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.upsert(poll);
        tables
            .votes
            .insert((vote.poll_id, vote.voter_id.clone()), vote.clone());
        Ok(())
    }

    async fn withdraw_vote(&self, poll: &Poll, voter_id: &VoterId) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.upsert(poll);
        tables.votes.remove(&(poll.id(), voter_id.clone()));
        Ok(())
    }

    async fn count_votes(&self, poll_id: PollId) -> StoreResult<u64> {
        let tables = self.read()?;
        Ok(tables
            .votes
            .keys()
            .filter(|(id, _)| *id == poll_id)
            .count() as u64)
    }
}
