//! Dry-run execution with a recorded trace.
//!
//! The simulator runs a copy of the caller's message through the same
//! interpreter used in production, with a listener that writes down every
//! transition. Statements really execute, but only against the copy.

use serde::Serialize;

use super::interpreter::{PipelineInterpreter, ProcessingReport};
use super::listener::{EventKind, InterpreterEvent, InterpreterListener};
use super::message::Message;

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Pipeline, when the event has one.
    pub pipeline: Option<String>,
    /// Stage number, for stage events.
    pub stage: Option<i32>,
    /// Rule, for rule events.
    pub rule: Option<String>,
}

/// Listener that keeps the trace text and the structured events.
#[derive(Debug, Clone, Default)]
pub struct SimulatorListener {
    trace: Vec<String>,
    events: Vec<RecordedEvent>,
}

impl SimulatorListener {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-readable lines in order.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Structured events in order.
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Take both recordings.
    pub fn into_parts(self) -> (Vec<String>, Vec<RecordedEvent>) {
        (self.trace, self.events)
    }
}

impl InterpreterListener for SimulatorListener {
    fn on_event(&mut self, event: &InterpreterEvent<'_>) {
        let stage = match event {
            InterpreterEvent::EnterStage { stage, .. }
            | InterpreterEvent::ContinuePipelineExecution { stage, .. }
            | InterpreterEvent::StopPipelineExecution { stage, .. } => Some(*stage),
            _ => None,
        };
        self.trace.push(event.to_string());
        self.events.push(RecordedEvent {
            kind: event.kind(),
            pipeline: event.pipeline().map(str::to_string),
            stage,
            rule: event.rule().map(str::to_string),
        });
    }
}

/// Outcome of a simulated run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    /// The mutated copy of the input message.
    pub message: Message,
    /// Trace lines in order.
    pub trace: Vec<String>,
    /// Faults and drop flag.
    pub report: ProcessingReport,
    #[serde(skip)]
    events: Vec<RecordedEvent>,
}

impl SimulationResult {
    /// Structured events in order.
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Kinds of the events concerning `rule`, in order.
    pub fn rule_events(&self, rule: &str) -> Vec<EventKind> {
        self.events
            .iter()
            .filter(|event| event.rule.as_deref() == Some(rule))
            .map(|event| event.kind)
            .collect()
    }

    /// Kind of the last event before processing finished.
    pub fn last_transition(&self) -> Option<EventKind> {
        self.events
            .iter()
            .rev()
            .map(|event| event.kind)
            .find(|kind| *kind != EventKind::FinishProcessing)
    }
}

/// Drives an interpreter in dry-run mode.
#[derive(Debug, Clone, Copy)]
pub struct Simulator<'i> {
    interpreter: &'i PipelineInterpreter,
}

impl<'i> Simulator<'i> {
    /// Simulate against `interpreter`'s installed pipelines.
    pub fn new(interpreter: &'i PipelineInterpreter) -> Self {
        Self { interpreter }
    }

    /// Run a copy of `message` through `pipelines`.
    pub fn simulate(
        &self,
        message: &Message,
        streams: &[String],
        pipelines: &[&str],
    ) -> SimulationResult {
        let mut copy = message.clone();
        let mut listener = SimulatorListener::new();
        let report = self
            .interpreter
            .process(&mut copy, streams, pipelines, &mut listener);
        let (trace, events) = listener.into_parts();
        SimulationResult {
            message: copy,
            trace,
            report,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::lang::Value;
    use crate::runtime::{InterpreterConfig, PipelineSet};

    #[test]
    fn simulation_leaves_input_untouched() {
        let set = PipelineSet::from_source(
            r#"
            rule "mark" when true then set_field("seen", true); end
            pipeline "p" stage 0 match all rule "mark"; end
            "#,
            &FunctionRegistry::builtin(),
        )
        .unwrap();
        let interpreter = PipelineInterpreter::with_pipelines(InterpreterConfig::default(), set);
        let input = Message::new();

        let result = Simulator::new(&interpreter).simulate(&input, &["main".into()], &["p"]);

        assert!(!input.has_field("seen"));
        assert_eq!(result.message.get_field("seen"), Some(&Value::Boolean(true)));
        assert_eq!(
            result.rule_events("mark"),
            vec![
                EventKind::EvaluateRule,
                EventKind::SatisfyRule,
                EventKind::ExecuteRule
            ]
        );
        assert_eq!(
            result.last_transition(),
            Some(EventKind::ContinuePipelineExecution)
        );
        assert!(result.trace[1].contains("[main]"));
        assert_eq!(result.trace[2], "Enter Stage 0 (match all) of Pipeline 'p'");
    }
}
