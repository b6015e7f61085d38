use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as PollLock, OwnedMutexGuard};

use crate::error::{Missing, PollError, PollResult, StoreContext};
use crate::models::{Choice, ChoiceCount, ChoiceId, Poll, PollId, PollStatistics, Vote, VoterId};
use crate::store::PollStore;

#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub max_choices: usize,
    /// How long a write waits for the poll lock before giving up.
    pub lock_timeout: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            max_choices: 10,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Applies every poll mutation under that poll's own lock.
///
/// Reads (`get_poll`, `tally`, `statistics`) take a copy from the store and
/// never wait on the lock.
pub struct VotingEngine {
    store: Arc<dyn PollStore>,
    locks: Mutex<HashMap<PollId, Arc<PollLock<()>>>>,
    policy: EnginePolicy,
}

impl VotingEngine {
    pub fn new(store: Arc<dyn PollStore>, policy: EnginePolicy) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            policy,
        }
    }

    async fn lock(&self, poll_id: PollId) -> PollResult<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(poll_id)
            .or_default()
            .clone();
        match tokio::time::timeout(self.policy.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                log::warn!("timed out waiting for lock on poll {}", poll_id);
                Err(PollError::ConcurrentModification { poll_id })
            }
        }
    }

    /// Drops the table entry unless another task is queued on it.
    /// Must be called while holding the guard for `poll_id`.
    fn forget_idle_lock(&self, poll_id: PollId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the table, one in the caller's guard
        if locks
            .get(&poll_id)
            .map_or(false, |lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&poll_id);
        }
    }

    async fn load(&self, poll_id: PollId) -> PollResult<Poll> {
        self.store
            .find_by_id(poll_id)
            .await
            .during("load poll")?
            .ok_or(PollError::NotFound(Missing::Poll(poll_id)))
    }

    /// Like `load`, for callers holding the poll lock.
    async fn load_locked(&self, poll_id: PollId) -> PollResult<Poll> {
        let poll = self.load(poll_id).await;
        if let Err(PollError::NotFound(Missing::Poll(_))) = poll {
            self.forget_idle_lock(poll_id);
        }
        poll
    }

    async fn save(&self, poll: &Poll) -> PollResult<()> {
        self.store.save(poll).await.during("save poll")
    }

    pub async fn create_poll<I, T>(&self, question: &str, choices: I) -> PollResult<Poll>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let id = self.store.next_poll_id().await.during("allocate poll id")?;
        let poll = Poll::create(id, question, choices, Utc::now())?;
        if poll.choices().len() > self.policy.max_choices {
            return Err(PollError::InvalidPoll(format!(
                "at most {} poll choices are allowed",
                self.policy.max_choices
            )));
        }
        self.save(&poll).await?;
        log::info!(
            "created poll {} with {} choices",
            poll.id(),
            poll.choices().len()
        );
        Ok(poll)
    }

    pub async fn get_poll(&self, poll_id: PollId) -> PollResult<Poll> {
        self.load(poll_id).await
    }

    pub async fn find_by_question(&self, question: &str) -> PollResult<Poll> {
        self.store
            .find_by_question(question)
            .await
            .during("find poll by question")?
            .ok_or_else(|| PollError::NotFound(Missing::Question(question.to_string())))
    }

    pub async fn list_polls(&self) -> PollResult<Vec<Poll>> {
        self.store.list().await.during("list polls")
    }

    /// Deleting a poll that does not exist is not an error.
    pub async fn delete_poll(&self, poll_id: PollId) -> PollResult<bool> {
        let guard = self.lock(poll_id).await?;
        let deleted = self.store.delete(poll_id).await.during("delete poll")?;
        self.forget_idle_lock(poll_id);
        drop(guard);
        if deleted {
            log::info!("deleted poll {}", poll_id);
        }
        Ok(deleted)
    }

    pub async fn add_choice(&self, poll_id: PollId, text: &str) -> PollResult<Choice> {
        let _guard = self.lock(poll_id).await?;
        let mut poll = self.load_locked(poll_id).await?;
        if poll.is_locked() {
            return Err(PollError::PollLocked { poll_id });
        }
        if poll.choices().len() >= self.policy.max_choices {
            return Err(PollError::InvalidChoice {
                poll_id: Some(poll_id),
                reason: format!(
                    "at most {} poll choices are allowed",
                    self.policy.max_choices
                ),
            });
        }
        let choice = poll.add_choice(text)?;
        self.save(&poll).await?;
        Ok(choice)
    }

    pub async fn rename_choice(
        &self,
        poll_id: PollId,
        choice_id: ChoiceId,
        text: &str,
    ) -> PollResult<Choice> {
        self.update_choice(poll_id, choice_id, Some(text), None).await
    }

    pub async fn reorder_choice(
        &self,
        poll_id: PollId,
        choice_id: ChoiceId,
        weight: i32,
    ) -> PollResult<Choice> {
        self.update_choice(poll_id, choice_id, None, Some(weight)).await
    }

    /// Renames and/or moves a choice in one write. Nothing is saved unless
    /// every requested change is accepted.
    pub async fn update_choice(
        &self,
        poll_id: PollId,
        choice_id: ChoiceId,
        text: Option<&str>,
        weight: Option<i32>,
    ) -> PollResult<Choice> {
        if text.is_none() && weight.is_none() {
            return Err(PollError::InvalidChoice {
                poll_id: Some(poll_id),
                reason: "nothing to update".to_string(),
            });
        }
        let _guard = self.lock(poll_id).await?;
        let mut poll = self.load_locked(poll_id).await?;
        let mut updated = None;
        if let Some(text) = text {
            updated = Some(poll.rename_choice(choice_id, text)?);
        }
        if let Some(weight) = weight {
            updated = Some(poll.reorder_choice(choice_id, weight)?);
        }
        self.save(&poll).await?;
        updated.ok_or_else(|| {
            PollError::invalid_choice(format!("no choice with id {}", choice_id)).with_poll(poll_id)
        })
    }

    /// Records the voter's choice, replacing any vote they already hold on
    /// this poll. Returns the tally after the change.
    pub async fn cast_vote(
        &self,
        poll_id: PollId,
        choice_id: ChoiceId,
        voter_id: VoterId,
    ) -> PollResult<Vec<ChoiceCount>> {
        let _guard = self.lock(poll_id).await?;
        let mut poll = self.load_locked(poll_id).await?;
        if poll.choices().get(choice_id).is_none() {
            return Err(PollError::NotFound(Missing::Choice(poll_id, choice_id)));
        }

        let previous = self
            .store
            .find_vote(poll_id, &voter_id)
            .await
            .during("find vote")?;
        match previous {
            Some(previous) if previous.choice_id == choice_id => {
                log::debug!("voter {} already voted {} on poll {}", voter_id, choice_id, poll_id);
                return Ok(poll.tally());
            }
            Some(previous) => {
                log::debug!(
                    "voter {} recasts from {} to {} on poll {}",
                    voter_id,
                    previous.choice_id,
                    choice_id,
                    poll_id
                );
                poll.withdraw_vote(previous.choice_id);
            }
            None => log::debug!("voter {} votes {} on poll {}", voter_id, choice_id, poll_id),
        }

        poll.record_vote(choice_id)?;
        let vote = Vote {
            poll_id,
            choice_id,
            voter_id,
            cast_at: Utc::now(),
        };
        self.store
            .record_vote(&poll, &vote)
            .await
            .during("record vote")?;
        Ok(poll.tally())
    }

    pub async fn cancel_vote(
        &self,
        poll_id: PollId,
        voter_id: &VoterId,
    ) -> PollResult<Vec<ChoiceCount>> {
        let _guard = self.lock(poll_id).await?;
        let mut poll = self.load_locked(poll_id).await?;
        let vote = self
            .store
            .find_vote(poll_id, voter_id)
            .await
            .during("find vote")?
            .ok_or(PollError::NotFound(Missing::Vote(poll_id)))?;

        poll.withdraw_vote(vote.choice_id);
        self.store
            .withdraw_vote(&poll, voter_id)
            .await
            .during("withdraw vote")?;
        log::debug!("voter {} cancelled vote on poll {}", voter_id, poll_id);
        Ok(poll.tally())
    }

    pub async fn tally(&self, poll_id: PollId) -> PollResult<Vec<ChoiceCount>> {
        Ok(self.load(poll_id).await?.tally())
    }

    pub async fn statistics(&self, poll_id: PollId) -> PollResult<PollStatistics> {
        Ok(self.load(poll_id).await?.statistics(Utc::now()))
    }

    /// Deletes every poll created before `cutoff`. Returns how many went away.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> PollResult<usize> {
        let mut purged = 0;
        for poll in self.list_polls().await? {
            if poll.created_at() < cutoff && self.delete_poll(poll.id()).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}
