//! Stage/pipeline interpreter
//!
//! Runs one message through a list of pipelines. Each pipeline gets a fresh
//! [`EvaluationContext`]; stages run in order, and within a stage every rule
//! condition is evaluated before the policy is applied and the matched rules
//! are executed. A fault (or panic) in one rule is recorded and reported to
//! the listener, but never stops sibling rules, later pipelines, or the
//! caller.

use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, trace};

use super::cache::RuleCache;
use super::compiler::{CompiledRule, RuleCompiler};
use super::config::InterpreterConfig;
use super::context::{EvaluationContext, FaultPhase, RuleFault};
use super::error::{EvalError, EvalResult};
use super::eval;
use super::listener::{InterpreterEvent, InterpreterListener, NoopListener};
use super::message::Message;
use super::pipeline_set::PipelineSet;
use crate::lang::{Pipeline, Rule, Stage};

/// What happened to a message during one `process` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingReport {
    /// Faults in run order.
    pub faults: Vec<RuleFault>,
    /// Whether a rule dropped the message.
    pub dropped: bool,
    /// Pipelines that were entered, in order.
    pub pipelines_run: Vec<String>,
}

impl ProcessingReport {
    /// Whether every rule ran without a fault.
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// How a rule body is run for one evaluation.
enum RuleBody<'r> {
    Interpreted(&'r Rule),
    Compiled(Arc<CompiledRule>),
}

impl RuleBody<'_> {
    fn condition(&self, context: &mut EvaluationContext<'_>) -> EvalResult<bool> {
        match self {
            RuleBody::Interpreted(rule) => eval::evaluate_condition(&rule.when, context),
            RuleBody::Compiled(compiled) => compiled.condition(context),
        }
    }

    fn execute(&self, context: &mut EvaluationContext<'_>) -> EvalResult<()> {
        match self {
            RuleBody::Interpreted(rule) => eval::execute_statements(&rule.then, context),
            RuleBody::Compiled(compiled) => compiled.execute(context),
        }
    }
}

/// Runs messages through installed pipelines.
///
/// Shared between worker threads by reference; the installed set is
/// swapped wholesale by [`install`](Self::install).
#[derive(Debug)]
pub struct PipelineInterpreter {
    config: InterpreterConfig,
    state: RwLock<Arc<PipelineSet>>,
    cache: RuleCache,
}

impl PipelineInterpreter {
    /// Interpreter with nothing installed.
    pub fn new(config: InterpreterConfig) -> Self {
        let cache = RuleCache::new(
            RuleCompiler::new(config.max_compile_depth),
            config.compile_rules,
            config.compile_threshold,
        );
        Self {
            config,
            state: RwLock::new(Arc::new(PipelineSet::default())),
            cache,
        }
    }

    /// Interpreter with `set` installed.
    pub fn with_pipelines(config: InterpreterConfig, set: PipelineSet) -> Self {
        let interpreter = Self::new(config);
        interpreter.install(set);
        interpreter
    }

    /// Replace the installed pipelines. Runs already in flight finish on the
    /// set they started with.
    pub fn install(&self, set: PipelineSet) {
        self.cache.retain(&set.cache_keys());
        let count = set.pipelines().count();
        *self.state.write() = Arc::new(set);
        debug!(pipelines = count, "installed pipeline set");
    }

    /// Currently installed pipelines.
    pub fn pipelines(&self) -> Arc<PipelineSet> {
        Arc::clone(&self.state.read())
    }

    /// Compilation cache.
    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Active configuration.
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Run `message` through the named pipelines in order.
    ///
    /// `streams` are the stream ids that selected those pipelines; they are
    /// only reported to the listener. Unknown pipeline names are skipped.
    pub fn process(
        &self,
        message: &mut Message,
        streams: &[String],
        pipelines: &[&str],
        listener: &mut dyn InterpreterListener,
    ) -> ProcessingReport {
        let set = self.pipelines();
        let message_id = message.id;
        listener.on_event(&InterpreterEvent::StartProcessing { message_id });

        let selected: Vec<&Arc<Pipeline>> = pipelines
            .iter()
            .filter_map(|name| {
                let found = set.pipeline(name);
                if found.is_none() {
                    debug!(pipeline = %name, "skipping unknown pipeline");
                }
                found
            })
            .collect();
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        listener.on_event(&InterpreterEvent::ProcessStreams {
            message_id,
            streams,
            pipelines: &names,
        });

        let mut report = ProcessingReport::default();
        for pipeline in selected {
            if message.is_dropped() {
                break;
            }
            report.pipelines_run.push(pipeline.name.clone());
            let faults = self.run_pipeline(pipeline, message, listener);
            report.faults.extend(faults);
        }
        report.dropped = message.is_dropped();

        listener.on_event(&InterpreterEvent::FinishProcessing {
            message_id,
            dropped: report.dropped,
        });
        trace!(
            message = %message_id,
            faults = report.faults.len(),
            dropped = report.dropped,
            "processed message"
        );
        report
    }

    /// [`process`](Self::process) without streams or a listener.
    pub fn process_pipelines(&self, message: &mut Message, pipelines: &[&str]) -> ProcessingReport {
        self.process(message, &[], pipelines, &mut NoopListener)
    }

    fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        message: &mut Message,
        listener: &mut dyn InterpreterListener,
    ) -> Vec<RuleFault> {
        let mut context = EvaluationContext::new(message);
        for stage in &pipeline.stages {
            let proceed = self.run_stage(pipeline, stage, &mut context, listener);
            if !proceed {
                break;
            }
            if context.message().is_dropped() {
                debug!(pipeline = %pipeline.name, stage = stage.number, "message dropped");
                break;
            }
        }
        context.into_faults()
    }

    /// Returns whether the pipeline continues past `stage`.
    fn run_stage(
        &self,
        pipeline: &Pipeline,
        stage: &Stage,
        context: &mut EvaluationContext<'_>,
        listener: &mut dyn InterpreterListener,
    ) -> bool {
        let name = pipeline.name.as_str();
        listener.on_event(&InterpreterEvent::EnterStage {
            pipeline: name,
            stage: stage.number,
            policy: stage.policy,
        });

        let mut matched: Vec<(&Rule, RuleBody<'_>)> = Vec::new();
        for rule in &stage.rules {
            let rule = rule.as_ref();
            listener.on_event(&InterpreterEvent::EvaluateRule {
                pipeline: name,
                rule: &rule.name,
            });
            let body = self.body(rule);
            match guarded(|| body.condition(context)) {
                Ok(true) => {
                    listener.on_event(&InterpreterEvent::SatisfyRule {
                        pipeline: name,
                        rule: &rule.name,
                    });
                    matched.push((rule, body));
                }
                Ok(false) => listener.on_event(&InterpreterEvent::DissatisfyRule {
                    pipeline: name,
                    rule: &rule.name,
                }),
                Err(error) => {
                    listener.on_event(&InterpreterEvent::FailEvaluateRule {
                        pipeline: name,
                        rule: &rule.name,
                        error: &error,
                    });
                    self.fault(context, name, stage, rule, FaultPhase::Condition, error);
                }
            }
        }

        if !stage.policy.satisfied(matched.len(), stage.rules.len()) {
            listener.on_event(&InterpreterEvent::StopPipelineExecution {
                pipeline: name,
                stage: stage.number,
            });
            return false;
        }

        for (rule, body) in &matched {
            match guarded(|| body.execute(context)) {
                Ok(()) => listener.on_event(&InterpreterEvent::ExecuteRule {
                    pipeline: name,
                    rule: &rule.name,
                }),
                Err(error) => {
                    listener.on_event(&InterpreterEvent::FailExecuteRule {
                        pipeline: name,
                        rule: &rule.name,
                        error: &error,
                    });
                    self.fault(context, name, stage, rule, FaultPhase::Execution, error);
                }
            }
        }

        listener.on_event(&InterpreterEvent::ContinuePipelineExecution {
            pipeline: name,
            stage: stage.number,
        });
        true
    }

    fn body<'r>(&self, rule: &'r Rule) -> RuleBody<'r> {
        match self.cache.lookup(rule) {
            Some(compiled) => RuleBody::Compiled(compiled),
            None => RuleBody::Interpreted(rule),
        }
    }

    fn fault(
        &self,
        context: &mut EvaluationContext<'_>,
        pipeline: &str,
        stage: &Stage,
        rule: &Rule,
        phase: FaultPhase,
        error: EvalError,
    ) {
        debug!(pipeline, stage = stage.number, rule = %rule.name, ?phase, %error, "rule fault");
        if let Some(field) = &self.config.processing_error_field {
            let entry = format!("For rule '{}': {}", rule.name, error);
            context.message_mut().append_processing_error(field, &entry);
        }
        context.record_fault(RuleFault {
            pipeline: pipeline.to_string(),
            stage: stage.number,
            rule: rule.name.clone(),
            phase,
            error,
        });
    }
}

impl Default for PipelineInterpreter {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}

/// Run `body`, turning a panic into a fault.
fn guarded<T>(body: impl FnOnce() -> EvalResult<T>) -> EvalResult<T> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|text| text.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(EvalError::Panic(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::lang::Value;
    use crate::runtime::listener::EventKind;

    fn interpreter(source: &str) -> PipelineInterpreter {
        let set = PipelineSet::from_source(source, &FunctionRegistry::builtin()).unwrap();
        PipelineInterpreter::with_pipelines(InterpreterConfig::default(), set)
    }

    struct Kinds(Vec<EventKind>);

    impl InterpreterListener for Kinds {
        fn on_event(&mut self, event: &InterpreterEvent<'_>) {
            self.0.push(event.kind());
        }
    }

    #[test]
    fn condition_fault_counts_as_unmatched() {
        let interpreter = interpreter(
            r#"
            rule "bad" when $message.n + 1 > 0 then set_field("bad", true); end
            rule "good" when true then set_field("good", true); end
            pipeline "p"
            stage 0 match either
              rule "bad";
              rule "good";
            end
            "#,
        );
        let mut message = Message::new();
        let mut kinds = Kinds(Vec::new());
        let report = interpreter.process(&mut message, &[], &["p"], &mut kinds);

        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].phase, FaultPhase::Condition);
        assert_eq!(message.get_field("good"), Some(&Value::Boolean(true)));
        assert!(!message.has_field("bad"));
        assert_eq!(
            message.get_field("processing_error").and_then(Value::as_str),
            Some("For rule 'bad': null operand for '+'")
        );
        assert!(kinds.0.contains(&EventKind::FailEvaluateRule));
        assert!(kinds.0.contains(&EventKind::ContinuePipelineExecution));
    }

    #[test]
    fn unknown_pipelines_are_skipped() {
        let interpreter = interpreter(
            r#"
            rule "r" when true then set_field("x", 1); end
            pipeline "p" stage 0 match all rule "r"; end
            "#,
        );
        let mut message = Message::new();
        let report = interpreter.process_pipelines(&mut message, &["nope", "p"]);
        assert_eq!(report.pipelines_run, vec!["p".to_string()]);
        assert_eq!(message.get_field("x"), Some(&Value::Long(1)));
    }

    #[test]
    fn panics_become_faults() {
        assert_eq!(
            guarded::<()>(|| panic!("boom")),
            Err(EvalError::Panic("boom".into()))
        );
        assert_eq!(
            guarded::<()>(|| panic!("{}", String::from("formatted"))),
            Err(EvalError::Panic("formatted".into()))
        );
    }

    #[test]
    fn error_field_can_be_disabled() {
        let set = PipelineSet::from_source(
            r#"
            rule "bad" when true then to_long(1 / 0); end
            pipeline "p" stage 0 match all rule "bad"; end
            "#,
            &FunctionRegistry::builtin(),
        )
        .unwrap();
        let config = InterpreterConfig {
            processing_error_field: None,
            ..InterpreterConfig::default()
        };
        let interpreter = PipelineInterpreter::with_pipelines(config, set);
        let mut message = Message::new();
        let report = interpreter.process_pipelines(&mut message, &["p"]);
        assert_eq!(report.faults[0].phase, FaultPhase::Execution);
        assert!(message.fields().is_empty());
    }
}
