//! Single-threaded, topic-based message runtime.
//!
//! Handlers are registered under an [`AgentId`] and subscribed to topics.
//! [`Runtime::publish`] enqueues one delivery per subscriber (never to the
//! sender) and bumps the pending count; [`Runtime::stop_when_idle`] drains the
//! queue in FIFO order, running one handler at a time to completion, and
//! returns once nothing is pending.
//!
//! A round is everything published between a (re)start and the next idle
//! point. The runtime keeps the messages of the current round so termination
//! conditions can inspect them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use crate::core::termination::{StopReason, Termination, TerminationState, TerminationView};
use crate::core::types::{AgentId, Envelope, Message, TopicId};

/// Delivery metadata passed to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub recipient: AgentId,
    pub sender: Option<AgentId>,
    pub topic: TopicId,
}

/// A participant on the bus.
///
/// Every returned message is published to the topic the input arrived on.
#[async_trait]
pub trait MessageHandler: Send {
    async fn on_message(&mut self, message: &Message, ctx: &MessageContext)
    -> Result<Vec<Message>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Stopped,
    Running,
}

/// `stop_when_idle` was called while stopped with deliveries still queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeNotRunningError {
    pub pending: usize,
}

impl fmt::Display for RuntimeNotRunningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runtime is stopped with {} pending deliveries (call start first)",
            self.pending
        )
    }
}

impl std::error::Error for RuntimeNotRunningError {}

/// What happened during the round that just went idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    /// Messages published during the round, the seed included.
    pub messages: usize,
    /// Set when the round was cut short by the termination condition.
    pub stop: Option<StopReason>,
}

/// Callback invoked for every published message.
pub type Observer = Box<dyn FnMut(&Envelope) + Send>;

struct Registration {
    id: AgentId,
    handler: Box<dyn MessageHandler>,
}

struct Delivery {
    recipient: usize,
    envelope: Arc<Envelope>,
}

pub struct Runtime {
    state: RuntimeState,
    agents: Vec<Registration>,
    subscriptions: HashMap<TopicId, Vec<usize>>,
    queue: VecDeque<Delivery>,
    pending: usize,
    round: Vec<Envelope>,
    round_open: bool,
    completions_before_round: usize,
    stop_reason: Option<StopReason>,
    termination: Option<Termination>,
    completion: Arc<TerminationState>,
    observer: Option<Observer>,
}

impl Runtime {
    pub fn new(completion: Arc<TerminationState>) -> Self {
        Self {
            state: RuntimeState::Stopped,
            agents: Vec::new(),
            subscriptions: HashMap::new(),
            queue: VecDeque::new(),
            pending: 0,
            round: Vec::new(),
            round_open: false,
            completions_before_round: 0,
            stop_reason: None,
            termination: None,
            completion,
            observer: None,
        }
    }

    /// Stop a round early, dropping its queued deliveries, once `condition`
    /// fires after a completed delivery.
    ///
    /// Meant as a safety valve (message caps, stop words). Conditions that
    /// should let the round finish, such as task completion, belong to the
    /// caller's check after idle.
    pub fn with_termination(mut self, condition: Termination) -> Self {
        self.termination = Some(condition);
        self
    }

    pub fn set_observer(&mut self, observer: impl FnMut(&Envelope) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn register(
        &mut self,
        id: AgentId,
        handler: impl MessageHandler + 'static,
    ) -> Result<()> {
        if self.index_of(&id).is_some() {
            bail!("agent {id} is already registered");
        }
        debug!(agent = %id, "registering agent");
        self.agents.push(Registration {
            id,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn subscribe(&mut self, id: &AgentId, topic: TopicId) -> Result<()> {
        let Some(index) = self.index_of(id) else {
            bail!("cannot subscribe unknown agent {id}");
        };
        let subscribers = self.subscriptions.entry(topic).or_default();
        if !subscribers.contains(&index) {
            subscribers.push(index);
        }
        Ok(())
    }

    /// Register `handler` and subscribe it to the default topic.
    pub fn register_default(
        &mut self,
        id: AgentId,
        handler: impl MessageHandler + 'static,
    ) -> Result<()> {
        self.register(id.clone(), handler)?;
        self.subscribe(&id, TopicId::default())
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Deliveries published but not yet fully handled.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.state == RuntimeState::Running && self.pending == 0
    }

    pub fn termination_state(&self) -> &Arc<TerminationState> {
        &self.completion
    }

    /// Messages of the current (or most recently finished) round.
    pub fn round_messages(&self) -> &[Envelope] {
        &self.round
    }

    pub fn round_view(&self) -> TerminationView<'_> {
        TerminationView {
            messages: &self.round,
            completions: self
                .completion
                .completions()
                .saturating_sub(self.completions_before_round),
        }
    }

    pub fn start(&mut self) {
        if self.state == RuntimeState::Running {
            return;
        }
        self.open_round();
        self.state = RuntimeState::Running;
        debug!(pending = self.pending, "runtime started");
    }

    /// Publish a message from outside the runtime (no sender).
    pub fn publish(&mut self, message: Message, topic: TopicId) -> usize {
        self.publish_from(message, topic, None)
    }

    fn publish_from(&mut self, message: Message, topic: TopicId, sender: Option<usize>) -> usize {
        self.open_round();
        let envelope = Arc::new(Envelope {
            topic,
            sender: sender.map(|index| self.agents[index].id.clone()),
            message,
        });
        self.completion.record_message();
        if let Some(observer) = self.observer.as_mut() {
            observer(envelope.as_ref());
        }

        let recipients: Vec<usize> = self
            .subscriptions
            .get(&envelope.topic)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .copied()
                    .filter(|index| Some(*index) != sender)
                    .collect()
            })
            .unwrap_or_default();
        for &recipient in &recipients {
            self.queue.push_back(Delivery {
                recipient,
                envelope: Arc::clone(&envelope),
            });
        }
        self.pending += recipients.len();
        debug!(
            topic = %envelope.topic,
            deliveries = recipients.len(),
            pending = self.pending,
            "published message"
        );
        self.round.push(envelope.as_ref().clone());
        recipients.len()
    }

    /// Dispatch queued deliveries until nothing is pending, then stop.
    ///
    /// A handler error aborts the round: remaining deliveries are dropped,
    /// the runtime stops, and the error is returned.
    #[instrument(skip_all, fields(pending = self.pending))]
    pub async fn stop_when_idle(&mut self) -> Result<RoundSummary> {
        if self.state == RuntimeState::Stopped && self.pending > 0 {
            return Err(RuntimeNotRunningError {
                pending: self.pending,
            }
            .into());
        }

        while let Some(Delivery {
            recipient,
            envelope,
        }) = self.queue.pop_front()
        {
            let ctx = MessageContext {
                recipient: self.agents[recipient].id.clone(),
                sender: envelope.sender.clone(),
                topic: envelope.topic.clone(),
            };
            debug!(recipient = %ctx.recipient, topic = %ctx.topic, "dispatching delivery");
            let outcome = self.agents[recipient]
                .handler
                .on_message(&envelope.message, &ctx)
                .await;
            self.pending -= 1;

            let outgoing = match outcome {
                Ok(outgoing) => outgoing,
                Err(err) => {
                    let dropped = self.discard_queue();
                    self.close_round();
                    error!(agent = %ctx.recipient, dropped, err = %err, "handler failed, round aborted");
                    return Err(err.context(format!("agent {} failed", ctx.recipient)));
                }
            };
            for message in outgoing {
                self.publish_from(message, envelope.topic.clone(), Some(recipient));
            }

            if let Some(reason) = self.check_termination() {
                let dropped = self.discard_queue();
                info!(reason = %reason, dropped, "round terminated");
                self.stop_reason = Some(reason);
                break;
            }
        }

        self.close_round();
        Ok(RoundSummary {
            messages: self.round.len(),
            stop: self.stop_reason.clone(),
        })
    }

    fn check_termination(&self) -> Option<StopReason> {
        self.termination.as_ref()?.evaluate(&self.round_view())
    }

    fn discard_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.pending = 0;
        dropped
    }

    fn open_round(&mut self) {
        if self.round_open {
            return;
        }
        self.round.clear();
        self.stop_reason = None;
        self.completions_before_round = self.completion.completions();
        self.round_open = true;
    }

    fn close_round(&mut self) {
        self.state = RuntimeState::Stopped;
        self.round_open = false;
    }

    fn index_of(&self, id: &AgentId) -> Option<usize> {
        self.agents.iter().position(|agent| &agent.id == id)
    }
}
