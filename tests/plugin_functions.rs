use std::sync::Arc;

use rulepipe::functions::{
    ErrorFunction, FnFunction, FunctionArgs, FunctionCatalog, FunctionDescriptor,
    FunctionRegistry, ParameterDescriptor,
};
use rulepipe::lang::{Value, ValueType};
use rulepipe::runtime::{
    EvalError, EvaluationContext, FaultPhase, InterpreterConfig, Message, PipelineInterpreter,
    PipelineSet,
};

fn geo_lookup() -> Arc<dyn rulepipe::Function> {
    let descriptor = FunctionDescriptor::new("geo_country", ValueType::String)
        .with_param(ParameterDescriptor::required("ip", ValueType::String))
        .with_param(
            ParameterDescriptor::optional("fallback", ValueType::String).with_default("unknown"),
        )
        .describe("Country code for an address");
    FnFunction::shared(descriptor, |args, _| {
        let ip = args.required_string("ip")?;
        if ip.starts_with("81.") {
            return Ok(Value::from("DE"));
        }
        Ok(args.get("fallback").cloned().unwrap_or_default())
    })
}

fn tag(label: &'static str) -> Arc<dyn rulepipe::Function> {
    let descriptor = FunctionDescriptor::new("tag", ValueType::String);
    FnFunction::shared(descriptor, move |_, _| Ok(Value::from(label)))
}

fn unstable() -> Arc<dyn rulepipe::Function> {
    let descriptor = FunctionDescriptor::new("unstable", ValueType::Boolean);
    FnFunction::shared(descriptor, |_, _| panic!("plugin bug"))
}

#[test]
fn plugins_register_through_the_catalog() {
    let catalog = FunctionCatalog::new();
    assert!(catalog.register(geo_lookup()).is_none());
    let registry = catalog.snapshot();

    let set = PipelineSet::from_source(
        r#"
        rule "geo"
        when true
        then
          set_field("country", geo_country($message.ip));
          set_field("other", geo_country(ip: "10.0.0.1", fallback: "ZZ"));
        end
        pipeline "p" stage 0 match all rule "geo"; end
        "#,
        &registry,
    )
    .unwrap();
    let interpreter = PipelineInterpreter::with_pipelines(InterpreterConfig::default(), set);
    let mut message = Message::new().with_field("ip", "81.2.69.160");
    let report = interpreter.process_pipelines(&mut message, &["p"]);

    assert!(report.is_clean());
    assert_eq!(message.get_field("country"), Some(&Value::from("DE")));
    assert_eq!(message.get_field("other"), Some(&Value::from("ZZ")));
}

#[test]
fn snapshots_do_not_see_later_registrations() {
    let catalog = FunctionCatalog::new();
    let before = catalog.snapshot();
    catalog.register(geo_lookup());

    assert!(before.resolve("geo_country").is_none());
    assert!(catalog.snapshot().resolve("geo_country").is_some());
    assert!(FunctionRegistry::builtin().with(geo_lookup()).resolve("geo_country").is_some());
}

#[test]
fn error_function_always_fails_cleanly() {
    let registry = FunctionRegistry::empty();
    let sentinel = registry.resolve_or_error("whatever");
    assert_eq!(sentinel.descriptor().name, ErrorFunction::NAME);

    let mut message = Message::new();
    let mut context = EvaluationContext::new(&mut message);
    let result = sentinel.evaluate(&FunctionArgs::new("whatever"), &mut context);
    assert_eq!(
        result,
        Err(EvalError::UnresolvedFunction {
            name: "whatever".into()
        })
    );
}

#[test]
fn panicking_plugin_is_a_rule_fault() {
    let registry = FunctionRegistry::builtin().with(unstable());
    let set = PipelineSet::from_source(
        r#"
        rule "risky" when unstable() then set_field("risky", true); end
        rule "steady" when true then set_field("steady", true); end
        pipeline "p"
        stage 0 match either
          rule "risky";
          rule "steady";
        end
        "#,
        &registry,
    )
    .unwrap();

    for compile in [false, true] {
        let config = InterpreterConfig {
            compile_rules: compile,
            compile_threshold: 0,
            ..InterpreterConfig::default()
        };
        let interpreter = PipelineInterpreter::with_pipelines(config, set.clone());
        let mut message = Message::new();
        let report = interpreter.process_pipelines(&mut message, &["p"]);

        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].phase, FaultPhase::Condition);
        assert_eq!(report.faults[0].error, EvalError::Panic("plugin bug".into()));
        assert!(!message.has_field("risky"));
        assert_eq!(message.get_field("steady"), Some(&Value::Boolean(true)));
    }
}

#[test]
fn reinstalling_under_a_new_registry_calls_the_new_functions() {
    let source = r#"
        rule "tag" when true then set_field("tag", tag()); end
        pipeline "p" stage 0 match all rule "tag"; end
    "#;
    let old = FunctionRegistry::builtin().with(tag("old"));
    let new = FunctionRegistry::builtin().with(tag("new"));
    let config = InterpreterConfig {
        compile_threshold: 0,
        ..InterpreterConfig::default()
    };
    let interpreter =
        PipelineInterpreter::with_pipelines(config, PipelineSet::from_source(source, &old).unwrap());

    let mut message = Message::new();
    interpreter.process_pipelines(&mut message, &["p"]);
    assert_eq!(message.get_field("tag"), Some(&Value::from("old")));

    let replacement = PipelineSet::from_source(source, &new).unwrap();
    {
        let installed = interpreter.pipelines();
        let before = installed.rule("tag").unwrap();
        let after = replacement.rule("tag").unwrap();
        assert_eq!(before.fingerprint(), after.fingerprint());
        assert_ne!(before.cache_key(), after.cache_key());
    }
    interpreter.install(replacement);

    let mut message = Message::new();
    interpreter.process_pipelines(&mut message, &["p"]);
    assert_eq!(message.get_field("tag"), Some(&Value::from("new")));

    let stats = interpreter.cache().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.compilations, 2);
}
