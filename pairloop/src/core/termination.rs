//! Termination detection for agent rounds.
//!
//! [`TerminationState`] is the shared, monotonic completion flag the executor
//! sets. [`Termination`] is a composable predicate evaluated over the messages
//! of the current round.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core::types::Envelope;

/// Completion flag plus running counters.
///
/// The flag is set at most once and never cleared. Every sighting of the
/// completion token is still counted, so later rounds that complete again
/// can be told apart from rounds that did not. The message counter spans the
/// whole session and is reported in the session outcome; per-round caps are
/// evaluated over the round transcript instead.
#[derive(Debug, Default)]
pub struct TerminationState {
    completed: AtomicBool,
    completions: AtomicUsize,
    delivered: AtomicUsize,
}

impl TerminationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion-token sighting and set the flag.
    ///
    /// Returns `true` only for the call that set the flag.
    pub fn mark_complete(&self) -> bool {
        self.completions.fetch_add(1, Ordering::SeqCst);
        self.completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Completion-token sightings so far, across all rounds.
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    /// Count one more published message; returns the new session total.
    pub fn record_message(&self) -> usize {
        self.delivered.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn messages(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

/// What a termination condition gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct TerminationView<'a> {
    /// Messages published during the current round, in publish order.
    pub messages: &'a [Envelope],
    /// Completion-token sightings recorded during the current round.
    pub completions: usize,
}

/// Why a round was stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The executor saw the completion token in a result.
    TaskComplete,
    /// An agent message mentioned a stop token.
    TextMentioned { token: String },
    /// The round hit the message cap.
    MaxMessages { count: usize, limit: usize },
}

impl StopReason {
    pub fn is_count_based(&self) -> bool {
        matches!(self, Self::MaxMessages { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskComplete => write!(f, "task complete"),
            Self::TextMentioned { token } => write!(f, "agent mentioned {token:?}"),
            Self::MaxMessages { count, limit } => {
                write!(f, "message limit reached ({count}/{limit})")
            }
        }
    }
}

/// Composable stop predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Fires when the completion token was seen during this round, whether
    /// or not an earlier round already set the flag.
    CompletionFlag,
    /// Fires when an agent-authored message contains the token
    /// (case-sensitive). Human messages are ignored.
    TextMention(String),
    /// Fires once the round holds at least this many messages.
    MaxMessages(usize),
    /// Fires when any member fires. Count-based stops win over others.
    Any(Vec<Termination>),
}

impl Termination {
    pub fn evaluate(&self, view: &TerminationView<'_>) -> Option<StopReason> {
        match self {
            Self::CompletionFlag => {
                (view.completions > 0).then_some(StopReason::TaskComplete)
            }
            Self::TextMention(token) => view
                .messages
                .iter()
                .filter(|envelope| envelope.sender.is_some())
                .any(|envelope| envelope.message.content.contains(token.as_str()))
                .then(|| StopReason::TextMentioned {
                    token: token.clone(),
                }),
            Self::MaxMessages(limit) => {
                let count = view.messages.len();
                (count >= *limit).then_some(StopReason::MaxMessages {
                    count,
                    limit: *limit,
                })
            }
            Self::Any(conditions) => {
                let fired: Vec<StopReason> = conditions
                    .iter()
                    .filter_map(|condition| condition.evaluate(view))
                    .collect();
                let count_based = fired.iter().position(StopReason::is_count_based);
                let index = count_based.unwrap_or(0);
                fired.into_iter().nth(index)
            }
        }
    }
}

impl BitOr for Termination {
    type Output = Termination;

    fn bitor(self, rhs: Self) -> Self::Output {
        let mut conditions = match self {
            Self::Any(conditions) => conditions,
            other => vec![other],
        };
        match rhs {
            Self::Any(more) => conditions.extend(more),
            other => conditions.push(other),
        }
        Self::Any(conditions)
    }
}
