use crate::engine::VotingEngine;
use crate::error::{PollError, PollResult};
use crate::models::{Choice, ChoiceList, Poll};

/// Choices gathered so far by an unfinished poll form.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    choices: ChoiceList,
    submissions: usize,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choices(&self) -> std::slice::Iter<'_, Choice> {
        self.choices.ordered()
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Number of batches accepted so far.
    pub fn submissions(&self) -> usize {
        self.submissions
    }

    fn texts(&self) -> Vec<String> {
        self.choices().map(|choice| choice.text.clone()).collect()
    }
}

/// Builds a poll the way the "add another item" form does: a few new
/// choices per submission until the client asks to save.
#[derive(Debug, Clone)]
pub struct IncrementalFormBuilder {
    batch_size: usize,
    max_choices: usize,
}

impl Default for IncrementalFormBuilder {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_choices: 10,
        }
    }
}

impl IncrementalFormBuilder {
    pub fn new(batch_size: usize, max_choices: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_choices,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Appends one batch of new texts to the draft, skipping blank ones.
    ///
    /// A batch is all or nothing: if any text is rejected, or the draft would
    /// grow past the choice limit, the draft is left as it was. Returns how
    /// many choices were added.
    pub fn submit_batch<S: AsRef<str>>(
        &self,
        draft: &mut Draft,
        new_texts: &[S],
    ) -> PollResult<usize> {
        if new_texts.len() > self.batch_size {
            return Err(PollError::invalid_choice(format!(
                "at most {} new choices per submission",
                self.batch_size
            )));
        }

        let mut accepted: Vec<&str> = Vec::with_capacity(new_texts.len());
        for text in new_texts.iter().map(AsRef::as_ref) {
            if text.trim().is_empty() {
                continue;
            }
            if draft.choices.contains_text(text) || accepted.contains(&text) {
                return Err(PollError::invalid_choice(format!(
                    "choice \"{}\" was already submitted",
                    text
                )));
            }
            if draft.len() + accepted.len() >= self.max_choices {
                return Err(PollError::invalid_choice(format!(
                    "at most {} poll choices are allowed",
                    self.max_choices
                )));
            }
            accepted.push(text);
        }

        for text in &accepted {
            draft.choices.add(*text)?;
        }
        draft.submissions += 1;
        Ok(accepted.len())
    }

    /// Replays `texts` as consecutive batches. Returns the number of submissions.
    pub fn submit_all<S: AsRef<str>>(
        &self,
        draft: &mut Draft,
        texts: &[S],
    ) -> PollResult<usize> {
        let mut submissions = 0;
        for batch in texts.chunks(self.batch_size) {
            self.submit_batch(draft, batch)?;
            submissions += 1;
        }
        Ok(submissions)
    }

    /// Turns the draft into a stored poll.
    pub async fn finalize(
        &self,
        engine: &VotingEngine,
        draft: Draft,
        question: &str,
    ) -> PollResult<Poll> {
        engine.create_poll(question, draft.texts()).await
    }
}
