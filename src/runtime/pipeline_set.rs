//! Deployable set of rules and pipelines.
//!
//! A set is built from source text in one go. Every source is parsed before
//! anything is rejected, so callers get the diagnostics of all sources at
//! once. A built set is immutable; redeploying means building a new one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{PipelineError, PipelineResult, SourceDiagnostics};
use crate::functions::FunctionRegistry;
use crate::lang::{
    Declaration, Diagnostics, Fingerprint, ParseError, ParseErrorKind, Pipeline, Rule,
    parse_with_diagnostics,
};

/// A labelled piece of rule-language source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Name used in diagnostics (file path, database id, ...).
    pub label: String,
    /// Source text.
    pub text: String,
}

impl SourceUnit {
    /// Label a source text.
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// Immutable rules and pipelines ready to run.
#[derive(Debug, Clone, Default)]
pub struct PipelineSet {
    rules: BTreeMap<String, Arc<Rule>>,
    pipelines: BTreeMap<String, Arc<Pipeline>>,
}

impl PipelineSet {
    /// Parse rule and pipeline sources and link pipelines to rules.
    ///
    /// Declarations may appear in either kind of source; the split only
    /// mirrors how rules and pipelines are usually stored. A pipeline stage
    /// naming an unknown rule gets a placeholder that never matches.
    pub fn build(
        rule_sources: &[SourceUnit],
        pipeline_sources: &[SourceUnit],
        registry: &FunctionRegistry,
    ) -> PipelineResult<Self> {
        let mut invalid = Vec::new();
        let mut rules: BTreeMap<String, Arc<Rule>> = BTreeMap::new();
        let mut pipelines: Vec<Pipeline> = Vec::new();
        let mut pipeline_names: HashSet<String> = HashSet::new();

        for unit in rule_sources.iter().chain(pipeline_sources) {
            let outcome = parse_with_diagnostics(&unit.text, registry);
            let mut errors = outcome.errors;
            for declaration in outcome.declarations {
                match declaration {
                    Declaration::Rule(rule) => {
                        if rules.contains_key(&rule.name) {
                            errors.push(ParseError::new(
                                rule.position,
                                ParseErrorKind::DuplicateRule { name: rule.name },
                            ));
                            continue;
                        }
                        rules.insert(rule.name.clone(), Arc::new(rule));
                    }
                    Declaration::Pipeline(pipeline) => {
                        if !pipeline_names.insert(pipeline.name.clone()) {
                            errors.push(ParseError::new(
                                pipeline.position,
                                ParseErrorKind::DuplicatePipeline {
                                    name: pipeline.name,
                                },
                            ));
                            continue;
                        }
                        pipelines.push(pipeline);
                    }
                }
            }
            if let Some(diagnostics) = Diagnostics::from_errors(errors) {
                debug!(source = %unit.label, errors = diagnostics.len(), "source rejected");
                invalid.push(SourceDiagnostics {
                    source: unit.label.clone(),
                    diagnostics,
                });
            }
        }

        if !invalid.is_empty() {
            return Err(PipelineError::Invalid(invalid));
        }

        let mut linked = BTreeMap::new();
        for mut pipeline in pipelines {
            let pipeline_name = pipeline.name.clone();
            pipeline.resolve(|name| match rules.get(name) {
                Some(rule) => Arc::clone(rule),
                None => {
                    warn!(pipeline = %pipeline_name, rule = %name, "pipeline references unknown rule");
                    Arc::new(Rule::always_false(name))
                }
            });
            linked.insert(pipeline_name, Arc::new(pipeline));
        }

        debug!(
            rules = rules.len(),
            pipelines = linked.len(),
            "built pipeline set"
        );
        Ok(Self {
            rules,
            pipelines: linked,
        })
    }

    /// Build from a single source holding rules and pipelines together.
    pub fn from_source(text: &str, registry: &FunctionRegistry) -> PipelineResult<Self> {
        Self::build(&[SourceUnit::new("<source>", text)], &[], registry)
    }

    /// Pipeline by name.
    pub fn pipeline(&self, name: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(name)
    }

    /// Rule by name.
    pub fn rule(&self, name: &str) -> Option<&Arc<Rule>> {
        self.rules.get(name)
    }

    /// Pipelines sorted by name.
    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.pipelines.values()
    }

    /// Rules sorted by name.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    /// Cache keys of every rule any pipeline can run.
    pub fn cache_keys(&self) -> HashSet<Fingerprint> {
        self.pipelines
            .values()
            .flat_map(|pipeline| pipeline.stages.iter())
            .flat_map(|stage| stage.rules.iter())
            .map(|rule| rule.cache_key())
            .collect()
    }

    /// Rules grouped by the pipelines that use them.
    pub fn usage(&self) -> HashMap<&str, Vec<&str>> {
        let mut usage: HashMap<&str, Vec<&str>> = HashMap::new();
        for pipeline in self.pipelines.values() {
            for stage in &pipeline.stages {
                for rule in &stage.rule_refs {
                    let users = usage.entry(rule.as_str()).or_default();
                    if !users.contains(&pipeline.name.as_str()) {
                        users.push(pipeline.name.as_str());
                    }
                }
            }
        }
        usage
    }

    /// Whether the set has no pipelines.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
        rule "tag" when has_field("source") then set_field("tagged", true); end
        rule "drop" when $message.level == "debug" then drop_message(); end
    "#;

    const PIPELINE: &str = r#"
        pipeline "main"
        stage 0 match either
          rule "tag";
        stage 1 match all
          rule "drop";
          rule "missing";
        end
    "#;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::builtin()
    }

    #[test]
    fn links_pipelines_to_rules() {
        let set = PipelineSet::build(
            &[SourceUnit::new("rules", RULES)],
            &[SourceUnit::new("pipeline", PIPELINE)],
            &registry(),
        )
        .unwrap();
        let main = set.pipeline("main").unwrap();
        assert!(main.is_resolved());
        assert!(Arc::ptr_eq(&main.stages[0].rules[0], set.rule("tag").unwrap()));

        let placeholder = &main.stages[1].rules[1];
        assert_eq!(placeholder.name, "missing");
        assert_eq!(set.cache_keys().len(), 3);
        assert_eq!(set.usage()["drop"], vec!["main"]);
    }

    #[test]
    fn collects_diagnostics_from_every_source() {
        let err = PipelineSet::build(
            &[
                SourceUnit::new("a", r#"rule "a" when bogus() then end"#),
                SourceUnit::new("b", RULES),
                SourceUnit::new("c", r#"rule "c" when then end"#),
            ],
            &[],
            &registry(),
        )
        .unwrap_err();
        let PipelineError::Invalid(sources) = err;
        let labels: Vec<_> = sources.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(labels, vec!["a", "c"]);
    }

    fn kinds(err: PipelineError) -> Vec<(String, ParseErrorKind)> {
        let PipelineError::Invalid(sources) = err;
        sources
            .into_iter()
            .flat_map(|source| {
                let label = source.source;
                source
                    .diagnostics
                    .into_errors()
                    .into_iter()
                    .map(move |error| (label.clone(), error.kind))
            })
            .collect()
    }

    #[test]
    fn duplicates_are_diagnostics() {
        let twice = format!("{RULES}\n{RULES}");
        let err = PipelineSet::from_source(&twice, &registry()).unwrap_err();
        assert_eq!(
            kinds(err),
            vec![
                ("<source>".to_string(), ParseErrorKind::DuplicateRule { name: "tag".into() }),
                ("<source>".to_string(), ParseErrorKind::DuplicateRule { name: "drop".into() }),
            ]
        );

        let pipelines = format!("{RULES}\n{PIPELINE}\n{PIPELINE}");
        let err = PipelineSet::from_source(&pipelines, &registry()).unwrap_err();
        assert_eq!(
            kinds(err),
            vec![(
                "<source>".to_string(),
                ParseErrorKind::DuplicatePipeline { name: "main".into() }
            )]
        );
    }

    #[test]
    fn duplicates_do_not_hide_later_sources() {
        let err = PipelineSet::build(
            &[
                SourceUnit::new("a", r#"rule "x" when true then end"#),
                SourceUnit::new("b", r#"rule "x" when false then end"#),
                SourceUnit::new("c", r#"rule "y" when true then bogus(); end"#),
            ],
            &[],
            &registry(),
        )
        .unwrap_err();
        assert_eq!(
            kinds(err),
            vec![
                ("b".to_string(), ParseErrorKind::DuplicateRule { name: "x".into() }),
                (
                    "c".to_string(),
                    ParseErrorKind::UndeclaredFunction {
                        name: "bogus".into()
                    }
                ),
            ]
        );
    }
}
