//! Human-in-the-loop session driver.
//!
//! One round is: publish a seed message, wait for the runtime to go idle,
//! check termination. Between rounds the controller blocks on human input;
//! empty input (or end of input) ends the session.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agents::{
    EXECUTOR_ID, Executor, ExecutorSettings, GENERATOR_ID, Generator, RetryPolicy,
};
use crate::core::termination::{StopReason, Termination, TerminationState};
use crate::core::types::{AgentId, Message, TopicId};
use crate::io::completion::CompletionClient;
use crate::io::config::{ControllerConfig, PairloopConfig};
use crate::io::feedback::FeedbackSource;
use crate::io::prompt::{SystemPromptInputs, render_system_prompt};
use crate::io::runner::CodeRunner;
use crate::runtime::{RoundSummary, Runtime, RuntimeNotRunningError};

/// Progress notifications emitted while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The runtime went idle after `round`.
    RoundFinished { round: u32, summary: RoundSummary },
    /// Termination was detected after `round`.
    Terminated { round: u32, reason: StopReason },
    /// `round` was aborted by a failing agent.
    RoundFailed { round: u32, error: String },
    /// The session is ending.
    Exiting { rounds: u32 },
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub rounds: u32,
    /// Whether the completion flag was ever set.
    pub completed: bool,
    /// Reason of the most recent termination, if any.
    pub last_stop: Option<StopReason>,
    /// Messages published over the whole session, seeds included.
    pub messages: usize,
}

/// Wire a generator and an executor onto the default topic.
///
/// The runtime cuts a round short once the message cap or a stop word fires.
/// Task completion is left to the idle check in [`run_session`], so the
/// generator still receives the result that reported success.
pub fn build_runtime(
    config: &PairloopConfig,
    client: Arc<dyn CompletionClient>,
    runner: Box<dyn CodeRunner>,
) -> Result<Runtime> {
    let system_prompt = render_system_prompt(&SystemPromptInputs::from_config(config))?;
    let state = Arc::new(TerminationState::new());

    let mut runtime =
        Runtime::new(Arc::clone(&state)).with_termination(config.termination.dispatch_guard());
    runtime
        .register_default(
            AgentId::new(GENERATOR_ID),
            Generator::new(
                AgentId::new(GENERATOR_ID),
                system_prompt,
                client,
                RetryPolicy::from_config(&config.model),
            ),
        )
        .context("register generator")?;
    runtime
        .register_default(
            AgentId::new(EXECUTOR_ID),
            Executor::new(
                AgentId::new(EXECUTOR_ID),
                ExecutorSettings::from_config(config),
                runner,
                state,
            ),
        )
        .context("register executor")?;
    Ok(runtime)
}

/// Run rounds until the human exits (or, with `exit_on_termination`, until a
/// round terminates).
///
/// A round aborted by an agent failure is reported and followed by a prompt
/// for feedback, so the human can retry. Only runtime misuse is returned as
/// an error.
#[instrument(skip_all)]
pub async fn run_session<F, E>(
    runtime: &mut Runtime,
    feedback: &mut F,
    detector: &Termination,
    config: &ControllerConfig,
    task: &str,
    mut on_event: E,
) -> Result<SessionOutcome>
where
    F: FeedbackSource + ?Sized,
    E: FnMut(&SessionEvent),
{
    let mut seed = task.trim().to_string();
    let mut rounds = 0u32;
    let mut last_stop = None;

    loop {
        rounds += 1;
        info!(round = rounds, "starting round");
        runtime.start();
        runtime.publish(Message::new(seed), TopicId::default());

        match runtime.stop_when_idle().await {
            Ok(summary) => {
                let reason = summary
                    .stop
                    .clone()
                    .or_else(|| detector.evaluate(&runtime.round_view()));
                on_event(&SessionEvent::RoundFinished {
                    round: rounds,
                    summary,
                });
                if let Some(reason) = reason {
                    info!(round = rounds, reason = %reason, "terminated");
                    on_event(&SessionEvent::Terminated {
                        round: rounds,
                        reason: reason.clone(),
                    });
                    last_stop = Some(reason);
                    if config.exit_on_termination {
                        break;
                    }
                }
            }
            Err(err) if err.downcast_ref::<RuntimeNotRunningError>().is_some() => {
                return Err(err);
            }
            Err(err) => {
                warn!(round = rounds, err = %format!("{err:#}"), "round failed");
                on_event(&SessionEvent::RoundFailed {
                    round: rounds,
                    error: format!("{err:#}"),
                });
            }
        }

        let Some(input) = feedback.next_input().await? else {
            info!("feedback closed");
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            break;
        }
        seed = input.to_string();
    }

    on_event(&SessionEvent::Exiting { rounds });
    Ok(SessionOutcome {
        rounds,
        completed: runtime.termination_state().is_complete(),
        last_stop,
        messages: runtime.termination_state().messages(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionResult;
    use crate::test_support::{ScriptedCompletion, ScriptedFeedback, ScriptedRunner};

    struct Harness {
        runtime: Runtime,
        client: Arc<ScriptedCompletion>,
        detector: Termination,
        config: PairloopConfig,
    }

    fn harness(
        config: PairloopConfig,
        client: ScriptedCompletion,
        results: Vec<ExecutionResult>,
    ) -> Harness {
        let client = Arc::new(client);
        let dyn_client: Arc<dyn CompletionClient> = client.clone();
        let runtime = build_runtime(&config, dyn_client, Box::new(ScriptedRunner::new(results)))
            .expect("runtime");
        Harness {
            runtime,
            client,
            detector: config.termination.condition(),
            config,
        }
    }

    fn fast_config() -> PairloopConfig {
        let mut config = PairloopConfig::default();
        config.model.max_retries = 0;
        config.model.retry_backoff_ms = 0;
        config
    }

    async fn run(
        h: &mut Harness,
        feedback: &mut ScriptedFeedback,
        task: &str,
    ) -> (SessionOutcome, Vec<SessionEvent>) {
        let mut events = Vec::new();
        let outcome = run_session(
            &mut h.runtime,
            feedback,
            &h.detector,
            &h.config.controller,
            task,
            |event| events.push(event.clone()),
        )
        .await
        .expect("session");
        (outcome, events)
    }

    #[tokio::test]
    async fn completion_token_terminates_and_exits() {
        let mut config = fast_config();
        config.controller.exit_on_termination = true;
        let mut h = harness(
            config,
            ScriptedCompletion::replying(["```r\ncat('TASK_COMPLETE')\n```", "Done."]),
            vec![ExecutionResult::success("TASK_COMPLETE\n")],
        );
        let mut feedback = ScriptedFeedback::new(["unused"]);

        let (outcome, events) = run(&mut h, &mut feedback, "print the token").await;

        assert_eq!(
            outcome,
            SessionOutcome {
                rounds: 1,
                completed: true,
                last_stop: Some(StopReason::TaskComplete),
                messages: 4,
            }
        );
        assert_eq!(feedback.asked(), 0);
        assert!(events.contains(&SessionEvent::Terminated {
            round: 1,
            reason: StopReason::TaskComplete,
        }));
        assert_eq!(events.last(), Some(&SessionEvent::Exiting { rounds: 1 }));
    }

    #[tokio::test]
    async fn termination_asks_for_feedback_unless_configured_to_exit() {
        let mut h = harness(
            fast_config(),
            ScriptedCompletion::replying(["```r\ncat('TASK_COMPLETE')\n```", "Done."]),
            vec![ExecutionResult::success("TASK_COMPLETE\n")],
        );
        let mut feedback = ScriptedFeedback::new(["   "]);

        let (outcome, _events) = run(&mut h, &mut feedback, "print the token").await;
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.completed);
        assert_eq!(feedback.asked(), 1);
    }

    #[tokio::test]
    async fn generator_receives_the_result_that_completed_the_task() {
        let mut h = harness(
            fast_config(),
            ScriptedCompletion::replying(["```r\ncat('TASK_COMPLETE')\n```", "All done."]),
            vec![ExecutionResult::success("mean 3\nTASK_COMPLETE\n")],
        );
        let mut feedback = ScriptedFeedback::new(Vec::<String>::new());

        let (outcome, _events) = run(&mut h, &mut feedback, "print the token").await;
        assert!(outcome.completed);
        assert_eq!(outcome.last_stop, Some(StopReason::TaskComplete));

        let requests = h.client.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].last().expect("turn");
        assert!(last.content().starts_with("Success:\n"));
        assert!(last.content().contains("mean 3"));
        assert_eq!(last.source(), EXECUTOR_ID);
    }

    #[tokio::test]
    async fn every_round_that_completes_is_reported() {
        let mut h = harness(
            fast_config(),
            ScriptedCompletion::replying([
                "```r\ncat('TASK_COMPLETE')\n```",
                "Done.",
                "Checked again, no code needed.",
                "```r\ncat('TASK_COMPLETE')\n```",
                "Done again.",
            ]),
            vec![
                ExecutionResult::success("TASK_COMPLETE\n"),
                ExecutionResult::success("TASK_COMPLETE\n"),
            ],
        );
        let mut feedback = ScriptedFeedback::new(["look once more", "and once more", ""]);

        let (outcome, events) = run(&mut h, &mut feedback, "print the token").await;

        assert_eq!(outcome.rounds, 3);
        let terminated: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Terminated { round, .. } => Some(*round),
                _ => None,
            })
            .collect();
        assert_eq!(terminated, vec![1, 3]);
        assert_eq!(h.runtime.termination_state().completions(), 2);
    }

    #[tokio::test]
    async fn outcome_counts_messages_across_rounds() {
        let mut h = harness(
            fast_config(),
            ScriptedCompletion::replying(["Which column?", "Using aorta."]),
            Vec::new(),
        );
        let mut feedback = ScriptedFeedback::new(["use column aorta", ""]);

        let (outcome, _events) = run(&mut h, &mut feedback, "compute the mean").await;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.messages, 4);
        assert_eq!(h.runtime.round_messages().len(), 2);
    }

    #[tokio::test]
    async fn human_feedback_seeds_the_next_round() {
        let mut h = harness(
            fast_config(),
            ScriptedCompletion::replying(["Which column?", "Using aorta."]),
            Vec::new(),
        );
        let mut feedback = ScriptedFeedback::new(["  use column aorta  "]);

        let (outcome, events) = run(&mut h, &mut feedback, "compute the mean").await;

        assert_eq!(outcome.rounds, 2);
        assert!(!outcome.completed);
        assert_eq!(outcome.last_stop, None);
        assert_eq!(feedback.asked(), 2);
        let finished = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::RoundFinished { .. }))
            .count();
        assert_eq!(finished, 2);

        let requests = h.client.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].last().expect("turn");
        assert_eq!(last.content(), "use column aorta");
        assert_eq!(last.source(), "user");
    }

    #[tokio::test]
    async fn message_cap_terminates_runaway_round() {
        let mut config = fast_config();
        config.termination.max_messages = 4;
        let mut h = harness(
            config,
            ScriptedCompletion::replying(["```r\nstop('x')\n```", "```r\nstop('y')\n```"]),
            vec![ExecutionResult::error("Error: x")],
        );
        let mut feedback = ScriptedFeedback::new(Vec::<String>::new());

        let (outcome, _events) = run(&mut h, &mut feedback, "loop forever").await;
        assert_eq!(
            outcome.last_stop,
            Some(StopReason::MaxMessages { count: 4, limit: 4 })
        );
        assert!(!outcome.completed);
        assert_eq!(h.runtime.pending(), 0);
    }

    #[tokio::test]
    async fn completion_failure_is_reported_and_session_continues() {
        let mut h = harness(
            fast_config(),
            ScriptedCompletion::new(vec![
                Err("connection refused".to_string()),
                Ok("no code this time".to_string()),
            ]),
            Vec::new(),
        );
        let mut feedback = ScriptedFeedback::new(["try again"]);

        let (outcome, events) = run(&mut h, &mut feedback, "task").await;

        assert_eq!(outcome.rounds, 2);
        let failure = events.iter().find_map(|event| match event {
            SessionEvent::RoundFailed { round, error } => Some((*round, error.clone())),
            _ => None,
        });
        let (round, error) = failure.expect("round failure reported");
        assert_eq!(round, 1);
        assert!(error.contains("connection refused"));
    }
}
