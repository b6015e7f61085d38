use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::{PollStore, StoreError, StoreResult};
use crate::models::{Choice, ChoiceId, ChoiceList, Poll, PollId, Vote, VoterId};

#[derive(sqlx::FromRow)]
struct PollRow {
    id: PollId,
    question: String,
    locked: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ChoiceRow {
    id: ChoiceId,
    text: String,
    weight: i32,
    votes: i64,
}

pub struct PgPollStore {
    pool: PgPool,
}

impl PgPollStore {
    /// Connects and brings the schema up to date.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    async fn load(&self, row: PollRow) -> StoreResult<Poll> {
        let choice_rows = sqlx::query_as::<_, ChoiceRow>(
            r#"select id, text, weight, votes from poll_choice where poll_id = $1"#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let mut votes = BTreeMap::new();
        let mut choices = Vec::with_capacity(choice_rows.len());
        for choice in choice_rows {
            let count = u64::try_from(choice.votes).map_err(|_| {
                StoreError::Corrupt(format!(
                    "choice {} of poll {} has {} votes",
                    choice.id, row.id, choice.votes
                ))
            })?;
            votes.insert(choice.id, count);
            choices.push(Choice {
                id: choice.id,
                text: choice.text,
                weight: choice.weight,
            });
        }

        Ok(Poll::restore(
            row.id,
            row.question,
            ChoiceList::from_choices(choices),
            votes,
            row.locked,
            row.created_at,
        ))
    }
}

async fn write_poll(conn: &mut PgConnection, poll: &Poll) -> StoreResult<()> {
    sqlx::query(
        r#"insert into poll (id, question, locked, created_at) values ($1, $2, $3, $4)
        on conflict (id) do update set question = excluded.question, locked = excluded.locked"#,
    )
    .bind(poll.id())
    .bind(poll.question())
    .bind(poll.is_locked())
    .bind(poll.created_at())
    .execute(&mut *conn)
    .await?;

    // choices are never removed, so an upsert per choice is enough
    for choice in poll.ordered() {
        let votes = i64::try_from(poll.votes_for(choice.id))
            .map_err(|_| StoreError::Corrupt(format!("vote count overflow on poll {}", poll.id())))?;
        sqlx::query(
            r#"insert into poll_choice (poll_id, id, text, weight, votes) values ($1, $2, $3, $4, $5)
            on conflict (poll_id, id) do update
            set text = excluded.text, weight = excluded.weight, votes = excluded.votes"#,
        )
        .bind(poll.id())
        .bind(choice.id)
        .bind(&choice.text)
        .bind(choice.weight)
        .bind(votes)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn next_poll_id(&self) -> StoreResult<PollId> {
        let id = sqlx::query_scalar::<_, i64>(r#"select nextval(pg_get_serial_sequence('poll', 'id'))"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(PollId(id))
    }

    async fn save(&self, poll: &Poll) -> StoreResult<()> {
        let mut transaction = self.pool.begin().await?;
        write_poll(transaction.as_mut(), poll).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: PollId) -> StoreResult<Option<Poll>> {
        let row = sqlx::query_as::<_, PollRow>(
            r#"select id, question, locked, created_at from poll where id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_question(&self, question: &str) -> StoreResult<Option<Poll>> {
        let row = sqlx::query_as::<_, PollRow>(
            r#"select id, question, locked, created_at from poll
            where question = $1 order by id limit 1"#,
        )
        .bind(question)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> StoreResult<Vec<Poll>> {
        let rows = sqlx::query_as::<_, PollRow>(
            r#"select id, question, locked, created_at from poll order by id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut polls = Vec::with_capacity(rows.len());
        for row in rows {
            polls.push(self.load(row).await?);
        }
        Ok(polls)
    }

    async fn delete(&self, id: PollId) -> StoreResult<bool> {
        // choices and votes go with it through "on delete cascade"
        let result = sqlx::query(r#"delete from poll where id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_vote(&self, poll_id: PollId, voter_id: &VoterId) -> StoreResult<Option<Vote>> {
        let vote = sqlx::query_as::<_, Vote>(
            r#"select poll_id, choice_id, voter_id, cast_at from poll_vote
            where poll_id = $1 and voter_id = $2"#,
        )
        .bind(poll_id)
        .bind(voter_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(vote)
    }

    async fn record_vote(&self, poll: &Poll, vote: &Vote) -> StoreResult<()> {
        let mut transaction = self.pool.begin().await?;
        write_poll(transaction.as_mut(), poll).await?;
        sqlx::query(
            r#"insert into poll_vote (poll_id, voter_id, choice_id, cast_at) values ($1, $2, $3, $4)
            on conflict (poll_id, voter_id) do update
            set choice_id = excluded.choice_id, cast_at = excluded.cast_at"#,
        )
        .bind(vote.poll_id)
        .bind(vote.voter_id.as_str())
        .bind(vote.choice_id)
        .bind(vote.cast_at)
        .execute(transaction.as_mut())
        .await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn withdraw_vote(&self, poll: &Poll, voter_id: &VoterId) -> StoreResult<()> {
        let mut transaction = self.pool.begin().await?;
        write_poll(transaction.as_mut(), poll).await?;
        sqlx::query(r#"delete from poll_vote where poll_id = $1 and voter_id = $2"#)
            .bind(poll.id())
            .bind(voter_id.as_str())
            .execute(transaction.as_mut())
            .await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn count_votes(&self, poll_id: PollId) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(r#"select count(*) from poll_vote where poll_id = $1"#)
            .bind(poll_id)
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative vote count {}", count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // needs a scratch database: DATABASE_URL=postgres://... cargo test -- --ignored
    #[actix_web::test]
    #[ignore]
    async fn persists_polls_and_votes() {
        let url = dotenvy::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgPollStore::connect(&url).await.unwrap();

        let id = store.next_poll_id().await.unwrap();
        let mut poll = Poll::create(id, "Persisted?", ["yes", "no"], Utc::now()).unwrap();
        store.save(&poll).await.unwrap();

        poll.record_vote(ChoiceId(2)).unwrap();
        let vote = Vote {
            poll_id: id,
            choice_id: ChoiceId(2),
            voter_id: VoterId::new("pg-test"),
            cast_at: Utc::now(),
        };
        store.record_vote(&poll, &vote).await.unwrap();

        let loaded = store.find_by_id(id).await.unwrap().unwrap();
        assert!(loaded.is_locked());
        assert_eq!(loaded.votes_for(ChoiceId(2)), 1);
        assert_eq!(loaded.choices().len(), 2);
        let found = store
            .find_vote(id, &VoterId::new("pg-test"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.choice_id, ChoiceId(2));

        assert!(store.delete(id).await.unwrap());
        assert_eq!(store.count_votes(id).await.unwrap(), 0);
    }
}
