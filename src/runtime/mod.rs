//! Message processing runtime
//!
//! Holds everything that runs after parsing: the message model, evaluation
//! contexts, the tree-walking evaluator and its closure-compiled twin, the
//! stage/pipeline interpreter with its listeners, deployment of pipeline
//! sets, dry-run simulation and configuration.

use std::sync::Arc;

// Submodules
pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod interpreter;
pub mod listener;
pub mod message;
pub mod ops;
pub mod pipeline_set;
pub mod simulator;

pub use cache::{CacheStats, RuleCache};
pub use compiler::{CompiledRule, RuleCompiler};
pub use config::InterpreterConfig;
pub use context::{EvaluationContext, FaultPhase, RuleFault};
pub use error::{
    CompileError, CompileResult, EvalError, EvalResult, PipelineError, PipelineResult,
    SourceDiagnostics,
};
pub use interpreter::{PipelineInterpreter, ProcessingReport};
pub use listener::{EventKind, InterpreterEvent, InterpreterListener, NoopListener, TracingListener};
pub use message::Message;
pub use pipeline_set::{PipelineSet, SourceUnit};
pub use simulator::{RecordedEvent, SimulationResult, Simulator, SimulatorListener};

use crate::functions::FunctionRegistry;

/// Build a pipeline set from sources and install it in a new interpreter.
pub fn deploy(
    config: InterpreterConfig,
    rule_sources: &[SourceUnit],
    pipeline_sources: &[SourceUnit],
    registry: &FunctionRegistry,
) -> PipelineResult<Arc<PipelineInterpreter>> {
    let set = PipelineSet::build(rule_sources, pipeline_sources, registry)?;
    Ok(Arc::new(PipelineInterpreter::with_pipelines(config, set)))
}
