//! Interpreter transition events and the observer interface.

use std::fmt;
use uuid::Uuid;

use super::error::EvalError;
use crate::lang::MatchPolicy;

/// One interpreter transition, borrowed from the running interpreter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterpreterEvent<'a> {
    /// A message entered the interpreter.
    StartProcessing {
        /// Message id.
        message_id: Uuid,
    },
    /// Streams and pipelines selected for the message.
    ProcessStreams {
        /// Message id.
        message_id: Uuid,
        /// Stream ids supplied by the caller.
        streams: &'a [String],
        /// Pipelines that will run, in order.
        pipelines: &'a [&'a str],
    },
    /// A stage is about to evaluate its rules.
    EnterStage {
        /// Pipeline name.
        pipeline: &'a str,
        /// Stage number.
        stage: i32,
        /// Stage policy.
        policy: MatchPolicy,
    },
    /// A rule condition is about to be evaluated.
    EvaluateRule {
        /// Pipeline name.
        pipeline: &'a str,
        /// Rule name.
        rule: &'a str,
    },
    /// A rule condition held.
    SatisfyRule {
        /// Pipeline name.
        pipeline: &'a str,
        /// Rule name.
        rule: &'a str,
    },
    /// A rule condition did not hold.
    DissatisfyRule {
        /// Pipeline name.
        pipeline: &'a str,
        /// Rule name.
        rule: &'a str,
    },
    /// A rule condition faulted; counted as not matched.
    FailEvaluateRule {
        /// Pipeline name.
        pipeline: &'a str,
        /// Rule name.
        rule: &'a str,
        /// The fault.
        error: &'a EvalError,
    },
    /// A matched rule's statements completed.
    ExecuteRule {
        /// Pipeline name.
        pipeline: &'a str,
        /// Rule name.
        rule: &'a str,
    },
    /// A matched rule's statements faulted.
    FailExecuteRule {
        /// Pipeline name.
        pipeline: &'a str,
        /// Rule name.
        rule: &'a str,
        /// The fault.
        error: &'a EvalError,
    },
    /// The stage policy held; the pipeline moves on.
    ContinuePipelineExecution {
        /// Pipeline name.
        pipeline: &'a str,
        /// Stage number.
        stage: i32,
    },
    /// The stage policy failed; the pipeline stops here.
    StopPipelineExecution {
        /// Pipeline name.
        pipeline: &'a str,
        /// Stage number.
        stage: i32,
    },
    /// The message left the interpreter.
    FinishProcessing {
        /// Message id.
        message_id: Uuid,
        /// Whether a rule dropped the message.
        dropped: bool,
    },
}

/// Event discriminant, for matching without borrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventKind {
    StartProcessing,
    ProcessStreams,
    EnterStage,
    EvaluateRule,
    SatisfyRule,
    DissatisfyRule,
    FailEvaluateRule,
    ExecuteRule,
    FailExecuteRule,
    ContinuePipelineExecution,
    StopPipelineExecution,
    FinishProcessing,
}

impl InterpreterEvent<'_> {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            InterpreterEvent::StartProcessing { .. } => EventKind::StartProcessing,
            InterpreterEvent::ProcessStreams { .. } => EventKind::ProcessStreams,
            InterpreterEvent::EnterStage { .. } => EventKind::EnterStage,
            InterpreterEvent::EvaluateRule { .. } => EventKind::EvaluateRule,
            InterpreterEvent::SatisfyRule { .. } => EventKind::SatisfyRule,
            InterpreterEvent::DissatisfyRule { .. } => EventKind::DissatisfyRule,
            InterpreterEvent::FailEvaluateRule { .. } => EventKind::FailEvaluateRule,
            InterpreterEvent::ExecuteRule { .. } => EventKind::ExecuteRule,
            InterpreterEvent::FailExecuteRule { .. } => EventKind::FailExecuteRule,
            InterpreterEvent::ContinuePipelineExecution { .. } => {
                EventKind::ContinuePipelineExecution
            }
            InterpreterEvent::StopPipelineExecution { .. } => EventKind::StopPipelineExecution,
            InterpreterEvent::FinishProcessing { .. } => EventKind::FinishProcessing,
        }
    }

    /// Rule the event concerns, if any.
    pub fn rule(&self) -> Option<&str> {
        match self {
            InterpreterEvent::EvaluateRule { rule, .. }
            | InterpreterEvent::SatisfyRule { rule, .. }
            | InterpreterEvent::DissatisfyRule { rule, .. }
            | InterpreterEvent::FailEvaluateRule { rule, .. }
            | InterpreterEvent::ExecuteRule { rule, .. }
            | InterpreterEvent::FailExecuteRule { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    /// Pipeline the event concerns, if any.
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            InterpreterEvent::EnterStage { pipeline, .. }
            | InterpreterEvent::EvaluateRule { pipeline, .. }
            | InterpreterEvent::SatisfyRule { pipeline, .. }
            | InterpreterEvent::DissatisfyRule { pipeline, .. }
            | InterpreterEvent::FailEvaluateRule { pipeline, .. }
            | InterpreterEvent::ExecuteRule { pipeline, .. }
            | InterpreterEvent::FailExecuteRule { pipeline, .. }
            | InterpreterEvent::ContinuePipelineExecution { pipeline, .. }
            | InterpreterEvent::StopPipelineExecution { pipeline, .. } => Some(*pipeline),
            _ => None,
        }
    }
}

impl fmt::Display for InterpreterEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterEvent::StartProcessing { message_id } => {
                write!(f, "Starting message processing of message {}", message_id)
            }
            InterpreterEvent::ProcessStreams {
                streams, pipelines, ..
            } => write!(
                f,
                "Message is in streams [{}], running pipelines [{}]",
                streams.join(", "),
                pipelines.join(", ")
            ),
            InterpreterEvent::EnterStage {
                pipeline,
                stage,
                policy,
            } => write!(
                f,
                "Enter Stage {} (match {}) of Pipeline '{}'",
                stage, policy, pipeline
            ),
            InterpreterEvent::EvaluateRule { pipeline, rule } => {
                write!(f, "Evaluate Rule '{}' in Pipeline '{}'", rule, pipeline)
            }
            InterpreterEvent::SatisfyRule { pipeline, rule } => write!(
                f,
                "Evaluation satisfied Rule '{}' in Pipeline '{}'",
                rule, pipeline
            ),
            InterpreterEvent::DissatisfyRule { pipeline, rule } => write!(
                f,
                "Evaluation not satisfied Rule '{}' in Pipeline '{}'",
                rule, pipeline
            ),
            InterpreterEvent::FailEvaluateRule {
                pipeline,
                rule,
                error,
            } => write!(
                f,
                "Error evaluating condition of Rule '{}' in Pipeline '{}': {}",
                rule, pipeline, error
            ),
            InterpreterEvent::ExecuteRule { pipeline, rule } => {
                write!(f, "Execute Rule '{}' in Pipeline '{}'", rule, pipeline)
            }
            InterpreterEvent::FailExecuteRule {
                pipeline,
                rule,
                error,
            } => write!(
                f,
                "Error executing Rule '{}' in Pipeline '{}': {}",
                rule, pipeline, error
            ),
            InterpreterEvent::ContinuePipelineExecution { pipeline, stage } => write!(
                f,
                "Completed Stage {} for Pipeline '{}', continuing to next Stage",
                stage, pipeline
            ),
            InterpreterEvent::StopPipelineExecution { pipeline, stage } => write!(
                f,
                "Completed Stage {} for Pipeline '{}', NOT continuing to next Stage",
                stage, pipeline
            ),
            InterpreterEvent::FinishProcessing {
                message_id,
                dropped,
            } => {
                write!(f, "Finished message processing of message {}", message_id)?;
                if *dropped {
                    f.write_str(" (dropped)")?;
                }
                Ok(())
            }
        }
    }
}

/// Observer of interpreter transitions.
///
/// Listeners only watch; nothing they do feeds back into the run.
pub trait InterpreterListener {
    /// Receive one event.
    fn on_event(&mut self, event: &InterpreterEvent<'_>);
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl InterpreterListener for NoopListener {
    fn on_event(&mut self, _event: &InterpreterEvent<'_>) {}
}

/// Listener forwarding each event to `tracing` at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl InterpreterListener for TracingListener {
    fn on_event(&mut self, event: &InterpreterEvent<'_>) {
        tracing::trace!(kind = ?event.kind(), "{}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_lines() {
        let enter = InterpreterEvent::EnterStage {
            pipeline: "p",
            stage: 0,
            policy: MatchPolicy::All,
        };
        assert_eq!(enter.to_string(), "Enter Stage 0 (match all) of Pipeline 'p'");

        let satisfied = InterpreterEvent::SatisfyRule {
            pipeline: "p",
            rule: "r",
        };
        assert_eq!(
            satisfied.to_string(),
            "Evaluation satisfied Rule 'r' in Pipeline 'p'"
        );
        assert_eq!(satisfied.rule(), Some("r"));
        assert_eq!(satisfied.kind(), EventKind::SatisfyRule);
    }
}
