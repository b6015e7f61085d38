use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};

use crate::error::{Missing, PollError, PollResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PollId(pub i64);

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a choice within its poll. Two polls may both have a choice 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ChoiceId(pub i32);

impl fmt::Display for ChoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque voter identity handed to us by whoever authenticated the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub text: String,
    pub weight: i32,
}

/// Choices of a poll, always kept sorted by weight and then id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceList {
    choices: Vec<Choice>,
    next_id: i32,
}

impl Default for ChoiceList {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceList {
    pub fn new() -> Self {
        Self {
            choices: Vec::new(),
            next_id: 1,
        }
    }

    /// Rebuilds a list from stored choices. New ids continue after the highest one.
    pub fn from_choices(mut choices: Vec<Choice>) -> Self {
        choices.sort_by_key(|choice| (choice.weight, choice.id));
        let next_id = choices.iter().map(|choice| choice.id.0 + 1).max().unwrap_or(1);
        Self { choices, next_id }
    }

    /// Appends a choice below every existing one.
    ///
    /// Fails when the heaviest choice already sits at `i32::MAX`.
    pub fn add(&mut self, text: impl Into<String>) -> PollResult<Choice> {
        let weight = match self.choices.iter().map(|choice| choice.weight).max() {
            Some(max) => max.checked_add(1).ok_or_else(|| {
                PollError::invalid_choice("no weight left below the last choice")
            })?,
            None => 0,
        };
        let choice = Choice {
            id: ChoiceId(self.next_id),
            text: text.into(),
            weight,
        };
        self.next_id += 1;
        self.choices.push(choice.clone());
        self.sort();
        Ok(choice)
    }

    pub fn reorder(&mut self, id: ChoiceId, new_weight: i32) -> PollResult<Choice> {
        let choice = self.get_mut(id)?;
        choice.weight = new_weight;
        let updated = choice.clone();
        self.sort();
        Ok(updated)
    }

    pub fn rename(&mut self, id: ChoiceId, text: impl Into<String>) -> PollResult<Choice> {
        let choice = self.get_mut(id)?;
        choice.text = text.into();
        Ok(choice.clone())
    }

    pub fn get(&self, id: ChoiceId) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.id == id)
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.choices.iter().any(|choice| choice.text == text)
    }

    /// Choices by ascending weight, ties broken by ascending id.
    pub fn ordered(&self) -> std::slice::Iter<'_, Choice> {
        self.choices.iter()
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    fn get_mut(&mut self, id: ChoiceId) -> PollResult<&mut Choice> {
        self.choices
            .iter_mut()
            .find(|choice| choice.id == id)
            .ok_or_else(|| PollError::invalid_choice(format!("no choice with id {}", id)))
    }

    fn sort(&mut self) {
        self.choices.sort_by_key(|choice| (choice.weight, choice.id));
    }
}

impl Serialize for ChoiceList {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.ordered())
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    id: PollId,
    question: String,
    choices: ChoiceList,
    votes: BTreeMap<ChoiceId, u64>,
    locked: bool,
    created_at: DateTime<Utc>,
}

impl Poll {
    /// Creates a poll from its question and choice texts.
    ///
    /// Blank texts are skipped and repeated texts collapse into the first
    /// occurrence; at least two distinct choices must remain.
    pub fn create<I, T>(
        id: PollId,
        question: impl Into<String>,
        choices: I,
        created_at: DateTime<Utc>,
    ) -> PollResult<Poll>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let question = question.into();
        if is_blank(&question) {
            return Err(PollError::InvalidPoll("question is empty".to_string()));
        }

        let mut list = ChoiceList::new();
        for text in choices {
            let text = text.into();
            if is_blank(&text) || list.contains_text(&text) {
                continue;
            }
            list.add(text)?;
        }
        if list.len() < 2 {
            return Err(PollError::InvalidPoll(
                "at least two distinct poll choices are required".to_string(),
            ));
        }

        let votes = list.ordered().map(|choice| (choice.id, 0)).collect();
        Ok(Poll {
            id,
            question,
            choices: list,
            votes,
            locked: false,
            created_at,
        })
    }

    /// Reassembles a poll read back from storage.
    pub(crate) fn restore(
        id: PollId,
        question: String,
        choices: ChoiceList,
        votes: BTreeMap<ChoiceId, u64>,
        locked: bool,
        created_at: DateTime<Utc>,
    ) -> Poll {
        Poll {
            id,
            question,
            choices,
            votes,
            locked,
            created_at,
        }
    }

    pub fn id(&self) -> PollId {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn choices(&self) -> &ChoiceList {
        &self.choices
    }

    pub fn ordered(&self) -> std::slice::Iter<'_, Choice> {
        self.choices.ordered()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Set by the first vote and never cleared.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn votes_for(&self, choice_id: ChoiceId) -> u64 {
        self.votes.get(&choice_id).copied().unwrap_or(0)
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.values().sum()
    }

    pub fn add_choice(&mut self, text: impl Into<String>) -> PollResult<Choice> {
        if self.locked {
            return Err(PollError::PollLocked { poll_id: self.id });
        }
        let text = text.into();
        self.check_new_text(&text)?;
        let choice = self
            .choices
            .add(text)
            .map_err(|e| e.with_poll(self.id))?;
        self.votes.insert(choice.id, 0);
        Ok(choice)
    }

    pub fn rename_choice(&mut self, id: ChoiceId, text: impl Into<String>) -> PollResult<Choice> {
        if self.locked {
            return Err(PollError::PollLocked { poll_id: self.id });
        }
        let text = text.into();
        if let Some(choice) = self.choices.get(id).filter(|choice| choice.text == text) {
            return Ok(choice.clone());
        }
        self.check_new_text(&text)?;
        self.choices
            .rename(id, text)
            .map_err(|e| e.with_poll(self.id))
    }

    /// Reordering stays allowed after voting has started.
    pub fn reorder_choice(&mut self, id: ChoiceId, new_weight: i32) -> PollResult<Choice> {
        self.choices
            .reorder(id, new_weight)
            .map_err(|e| e.with_poll(self.id))
    }

    pub(crate) fn record_vote(&mut self, choice_id: ChoiceId) -> PollResult<()> {
        if self.choices.get(choice_id).is_none() {
            return Err(PollError::NotFound(Missing::Choice(self.id, choice_id)));
        }
        *self.votes.entry(choice_id).or_insert(0) += 1;
        self.locked = true;
        Ok(())
    }

    pub(crate) fn withdraw_vote(&mut self, choice_id: ChoiceId) {
        if let Some(count) = self.votes.get_mut(&choice_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Per-choice vote counts in display order.
    pub fn tally(&self) -> Vec<ChoiceCount> {
        self.ordered()
            .map(|choice| ChoiceCount {
                poll_id: self.id,
                choice_id: choice.id,
                choice_text: choice.text.clone(),
                count: self.votes_for(choice.id),
            })
            .collect()
    }

    pub fn statistics(&self, now: DateTime<Utc>) -> PollStatistics {
        let total_votes = self.total_votes();

        // strictly greater keeps the earliest choice in display order on ties
        let mut winner: Option<(&Choice, u64)> = None;
        if total_votes > 0 {
            for choice in self.ordered() {
                let count = self.votes_for(choice.id);
                if winner.map_or(true, |(_, best)| count > best) {
                    winner = Some((choice, count));
                }
            }
        }

        let winner_votes = winner.map_or(0, |(_, count)| count);
        let winner_percent = if total_votes > 0 {
            (winner_votes * 200 + total_votes) / (total_votes * 2)
        } else {
            0
        };

        PollStatistics {
            poll_id: self.id,
            total_votes,
            winner_choice_id: winner.map(|(choice, _)| choice.id),
            winner_text: winner.map(|(choice, _)| choice.text.clone()),
            winner_votes,
            winner_percent,
            duration_seconds: (now - self.created_at).num_seconds(),
        }
    }

    fn check_new_text(&self, text: &str) -> PollResult<()> {
        if is_blank(text) {
            return Err(PollError::InvalidChoice {
                poll_id: Some(self.id),
                reason: "choice text is empty".to_string(),
            });
        }
        if self.choices.contains_text(text) {
            return Err(PollError::InvalidChoice {
                poll_id: Some(self.id),
                reason: format!("choice \"{}\" already exists", text),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub poll_id: PollId,
    pub choice_id: ChoiceId,
    pub voter_id: VoterId,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceCount {
    pub poll_id: PollId,
    pub choice_id: ChoiceId,
    pub choice_text: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStatistics {
    pub poll_id: PollId,
    pub total_votes: u64,
    pub winner_choice_id: Option<ChoiceId>,
    pub winner_text: Option<String>,
    pub winner_votes: u64,
    pub winner_percent: u64,
    pub duration_seconds: i64,
}

#[derive(Debug)]
pub(crate) struct Message<'a>(pub &'a str);

impl<'a> Serialize for Message<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ts = serializer.serialize_struct("message", 1)?;
        ts.serialize_field("message", self.0)?;
        ts.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll(choices: &[&str]) -> Poll {
        Poll::create(PollId(1), "Best color?", choices.iter().copied(), Utc::now()).unwrap()
    }

    fn ids(list: &ChoiceList) -> Vec<i32> {
        list.ordered().map(|choice| choice.id.0).collect()
    }

    #[test]
    fn add_assigns_increasing_weights() {
        let mut list = ChoiceList::new();
        assert_eq!(list.add("Red").unwrap().weight, 0);
        assert_eq!(list.add("Blue").unwrap().weight, 1);
        list.reorder(ChoiceId(1), 10).unwrap();
        assert_eq!(list.add("Green").unwrap().weight, 11);
    }

    #[test]
    fn add_below_max_weight_is_rejected() {
        let mut list = ChoiceList::new();
        list.add("a").unwrap();
        list.add("b").unwrap();
        list.reorder(ChoiceId(2), i32::MAX).unwrap();
        assert!(matches!(
            list.add("c"),
            Err(PollError::InvalidChoice { .. })
        ));
        assert_eq!(ids(&list), vec![1, 2]);

        list.reorder(ChoiceId(2), i32::MAX - 1).unwrap();
        assert_eq!(list.add("c").unwrap().weight, i32::MAX);
        assert_eq!(ids(&list), vec![1, 2, 3]);
    }

    #[test]
    fn ordered_breaks_weight_ties_by_id() {
        let mut list = ChoiceList::new();
        list.add("a").unwrap();
        list.add("b").unwrap();
        list.add("c").unwrap();
        list.reorder(ChoiceId(3), 0).unwrap();
        assert_eq!(ids(&list), vec![1, 3, 2]);
        list.reorder(ChoiceId(1), 5).unwrap();
        assert_eq!(ids(&list), vec![3, 2, 1]);
        list.reorder(ChoiceId(2), 0).unwrap();
        // weights are now 5, 0, 0
        assert_eq!(ids(&list), vec![2, 3, 1]);
        list.add("d").unwrap();
        assert_eq!(ids(&list), vec![2, 3, 1, 4]);
        // the iterator can be restarted
        assert_eq!(list.ordered().count(), list.ordered().count());
    }

    #[test]
    fn reorder_unknown_choice_is_rejected() {
        let mut list = ChoiceList::new();
        list.add("a").unwrap();
        assert!(matches!(
            list.reorder(ChoiceId(9), 1),
            Err(PollError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn from_choices_continues_ids() {
        let mut list = ChoiceList::from_choices(vec![
            Choice {
                id: ChoiceId(4),
                text: "late".into(),
                weight: 1,
            },
            Choice {
                id: ChoiceId(2),
                text: "early".into(),
                weight: 0,
            },
        ]);
        assert_eq!(ids(&list), vec![2, 4]);
        assert_eq!(list.add("new").unwrap().id, ChoiceId(5));
    }

    #[test]
    fn create_orders_choices_by_weight() {
        let poll = poll(&["Red", "Blue", "Green"]);
        let weights: Vec<i32> = poll.ordered().map(|choice| choice.weight).collect();
        let texts: Vec<&str> = poll.ordered().map(|choice| choice.text.as_str()).collect();
        assert_eq!(weights, vec![0, 1, 2]);
        assert_eq!(texts, vec!["Red", "Blue", "Green"]);
        assert_eq!(poll.total_votes(), 0);
    }

    #[test]
    fn create_requires_question_and_two_distinct_choices() {
        let now = Utc::now();
        let cases: Vec<(&str, Vec<&str>)> = vec![
            ("", vec!["a", "b"]),
            ("   ", vec!["a", "b"]),
            ("q", vec![]),
            ("q", vec!["a"]),
            ("q", vec!["a", "a"]),
            ("q", vec!["a", "", "  "]),
        ];
        for (question, choices) in cases {
            let result = Poll::create(PollId(1), question, choices.clone(), now);
            assert!(
                matches!(result, Err(PollError::InvalidPoll(_))),
                "{:?} / {:?} should be rejected",
                question,
                choices
            );
        }
    }

    #[test]
    fn create_collapses_blank_and_repeated_choices() {
        let poll = poll(&["a", "", "b", "a"]);
        assert_eq!(poll.choices().len(), 2);
    }

    #[test]
    fn add_choice_rejects_blank_and_duplicate_text() {
        let mut poll = poll(&["Red", "Blue"]);
        assert!(matches!(
            poll.add_choice(" "),
            Err(PollError::InvalidChoice { .. })
        ));
        assert!(matches!(
            poll.add_choice("Red"),
            Err(PollError::InvalidChoice { .. })
        ));
        let green = poll.add_choice("Green").unwrap();
        assert_eq!(green.weight, 2);
        assert_eq!(poll.votes_for(green.id), 0);
    }

    #[test]
    fn voting_locks_structure_but_not_order() {
        let mut poll = poll(&["Red", "Blue"]);
        poll.record_vote(ChoiceId(1)).unwrap();
        poll.withdraw_vote(ChoiceId(1));
        assert!(poll.is_locked());
        assert!(matches!(
            poll.add_choice("Green"),
            Err(PollError::PollLocked { poll_id: PollId(1) })
        ));
        assert!(matches!(
            poll.rename_choice(ChoiceId(1), "Crimson"),
            Err(PollError::PollLocked { .. })
        ));
        poll.reorder_choice(ChoiceId(1), 3).unwrap();
        assert_eq!(poll.ordered().next().map(|c| c.id), Some(ChoiceId(2)));
    }

    #[test]
    fn statistics_pick_the_most_voted_choice() {
        let mut poll = poll(&["Red", "Blue", "Green"]);
        poll.record_vote(ChoiceId(1)).unwrap();
        poll.record_vote(ChoiceId(1)).unwrap();
        poll.record_vote(ChoiceId(2)).unwrap();
        let stats = poll.statistics(poll.created_at() + Duration::seconds(90));
        assert_eq!(stats.total_votes, 3);
        assert_eq!(stats.winner_choice_id, Some(ChoiceId(1)));
        assert_eq!(stats.winner_text.as_deref(), Some("Red"));
        assert_eq!(stats.winner_votes, 2);
        assert_eq!(stats.winner_percent, 67);
        assert_eq!(stats.duration_seconds, 90);
    }

    #[test]
    fn statistics_tie_goes_to_lowest_weight() {
        let mut poll = poll(&["Red", "Blue", "Green"]);
        for id in [3, 2, 1] {
            poll.record_vote(ChoiceId(id)).unwrap();
        }
        poll.reorder_choice(ChoiceId(3), -1).unwrap();
        let stats = poll.statistics(Utc::now());
        assert_eq!(stats.winner_choice_id, Some(ChoiceId(3)));
        assert_eq!(stats.winner_percent, 33);
    }

    #[test]
    fn statistics_without_votes() {
        let stats = poll(&["Red", "Blue"]).statistics(Utc::now());
        assert_eq!(stats.total_votes, 0);
        assert_eq!(stats.winner_choice_id, None);
        assert_eq!(stats.winner_percent, 0);
    }

    #[test]
    fn tally_follows_display_order() {
        let mut poll = poll(&["Red", "Blue"]);
        poll.record_vote(ChoiceId(2)).unwrap();
        poll.reorder_choice(ChoiceId(2), -1).unwrap();
        let tally = poll.tally();
        assert_eq!(tally[0].choice_text, "Blue");
        assert_eq!(tally[0].count, 1);
        assert_eq!(tally[1].count, 0);
    }
}
