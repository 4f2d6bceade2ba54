//! Name quiz — pick a pictured person, offer up to four names, score the guess.
//!
//! Rounds are independent: targets are drawn uniformly from the roster with
//! no memory of earlier rounds, so a person may come up twice in a row.

use crate::types::Person;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of names offered per round (target included).
pub const MAX_OPTIONS: usize = 4;

/// How long the revealed answer is meant to stay visible before advancing.
pub const FEEDBACK_DELAY: Duration = Duration::from_millis(500);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuizError {
    #[error("no people with a face image to quiz on")]
    EmptyRoster,
    #[error("no round in progress")]
    NoRound,
}

/// Presentation class of one option once the answer is revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionState {
    Neutral,
    ChosenCorrect,
    ChosenIncorrect,
    CorrectNotChosen,
}

/// One question: a pictured person and the names to choose from.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizRound {
    pub target: Person,
    pub options: Vec<String>,
    pub revealed: bool,
    pub chosen_name: Option<String>,
}

impl QuizRound {
    /// Whether the submitted answer (if any) names the target.
    pub fn is_correct(&self) -> bool {
        self.chosen_name.as_deref() == Some(self.target.name.as_str())
    }

    /// Classify `option` for display.
    pub fn classify(&self, option: &str) -> OptionState {
        if !self.revealed {
            return OptionState::Neutral;
        }
        let is_target = option == self.target.name;
        let is_chosen = self.chosen_name.as_deref() == Some(option);
        match (is_chosen, is_target) {
            (true, true) => OptionState::ChosenCorrect,
            (true, false) => OptionState::ChosenIncorrect,
            (false, true) => OptionState::CorrectNotChosen,
            (false, false) => OptionState::Neutral,
        }
    }
}

/// Result of [`submit_answer`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub correct: bool,
    /// `false` when the round had already been answered and nothing changed.
    pub first_submission: bool,
    pub round: QuizRound,
}

/// People eligible for quizzing: those with a face image.
pub fn eligible_roster(people: &[Person]) -> Vec<Person> {
    people.iter().filter(|p| p.has_image()).cloned().collect()
}

/// Start a round: random target plus distinct distractor names, shuffled.
pub fn start_round<R: Rng + ?Sized>(roster: &[Person], rng: &mut R) -> Result<QuizRound, QuizError> {
    let target = roster.choose(rng).ok_or(QuizError::EmptyRoster)?.clone();

    let distinct_names: HashSet<&str> = roster.iter().map(|p| p.name.as_str()).collect();
    let wanted = distinct_names.len().min(MAX_OPTIONS);

    let mut options = vec![target.name.clone()];
    while options.len() < wanted {
        // Non-empty: `target` was drawn from it.
        let Some(candidate) = roster.choose(rng) else {
            break;
        };
        if !options.contains(&candidate.name) {
            options.push(candidate.name.clone());
        }
    }
    options.shuffle(rng);

    tracing::debug!(target = %target.name, ?options, "quiz round started");
    Ok(QuizRound {
        target,
        options,
        revealed: false,
        chosen_name: None,
    })
}

/// Reveal the round with the player's choice.
///
/// Submitting to an already revealed round changes nothing and reports the
/// original result.
pub fn submit_answer(round: QuizRound, chosen_name: &str) -> AnswerOutcome {
    if round.revealed {
        return AnswerOutcome {
            correct: round.is_correct(),
            first_submission: false,
            round,
        };
    }

    let round = QuizRound {
        revealed: true,
        chosen_name: Some(chosen_name.to_string()),
        ..round
    };
    AnswerOutcome {
        correct: round.is_correct(),
        first_submission: true,
        round,
    }
}

/// What [`QuizSession::advance`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance<'a> {
    Round(&'a QuizRound),
    Ended,
}

/// Score and current round of a game.
#[derive(Debug, Clone, Default)]
pub struct QuizSession {
    score: u32,
    ended: bool,
    round: Option<QuizRound>,
}

impl QuizSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn round(&self) -> Option<&QuizRound> {
        self.round.as_ref()
    }

    /// Move to the next round, rebuilding the roster from `people`.
    ///
    /// Ends the game when nobody has a face image.
    pub fn advance<R: Rng + ?Sized>(&mut self, people: &[Person], rng: &mut R) -> Advance<'_> {
        if self.ended {
            return Advance::Ended;
        }

        let roster = eligible_roster(people);
        match start_round(&roster, rng) {
            Ok(round) => Advance::Round(self.round.insert(round)),
            Err(_) => {
                tracing::info!(score = self.score, "quiz ended: roster is empty");
                self.round = None;
                self.ended = true;
                Advance::Ended
            }
        }
    }

    /// Answer the current round; the score grows by one only for the first
    /// correct submission.
    pub fn answer(&mut self, chosen_name: &str) -> Result<bool, QuizError> {
        let round = self.round.take().ok_or(QuizError::NoRound)?;
        let outcome = submit_answer(round, chosen_name);
        if outcome.first_submission && outcome.correct {
            self.score += 1;
        }
        tracing::debug!(
            chosen = chosen_name,
            correct = outcome.correct,
            score = self.score,
            "answer submitted"
        );
        self.round = Some(outcome.round);
        Ok(outcome.correct)
    }

    /// Start over: zero score, game no longer ended.
    pub fn restart(&mut self) {
        *self = Self::default();
    }
}
