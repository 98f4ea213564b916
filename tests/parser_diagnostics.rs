use rulepipe::functions::{ErrorFunction, FunctionRegistry};
use rulepipe::lang::{
    Declaration, ExpressionKind, MAX_NESTING, ParseErrorKind, Position, Statement, Value, parse,
    parse_with_diagnostics,
};
use rulepipe::runtime::{
    InterpreterConfig, Message, PipelineError, PipelineInterpreter, PipelineSet, SourceUnit,
};

fn registry() -> FunctionRegistry {
    FunctionRegistry::builtin()
}

#[test]
fn valid_source_has_no_diagnostics() {
    let declarations = parse(
        r#"
        // classify syslog levels
        rule "classify"
        when to_long($message.severity) <= 3 && !is_null($message.host)
        then
          let label = concat("sev-", to_string($message.severity));
          set_field("label", label);
          set_field(field: "checked", value: true);
        end

        pipeline "syslog"
        stage 0 match all
          rule "classify";
        end
        "#,
        &registry(),
    )
    .unwrap();
    assert_eq!(declarations.len(), 2);
    assert!(matches!(&declarations[0], Declaration::Rule(rule) if rule.then.len() == 3));
}

#[test]
fn bogus_function_yields_one_diagnostic_and_keeps_the_tree() {
    let source = "rule \"r\"\nwhen true\nthen\n  bogus_function();\nend\n";
    let outcome = parse_with_diagnostics(source, &registry());

    assert_eq!(outcome.errors.len(), 1);
    let error = &outcome.errors[0];
    assert_eq!(error.position, Position::new(4, 3));
    assert_eq!(
        error.kind,
        ParseErrorKind::UndeclaredFunction {
            name: "bogus_function".into()
        }
    );
    assert!(error.to_string().contains("bogus_function"));

    let rule = outcome.rules().next().unwrap();
    match &rule.then[0] {
        Statement::FunctionCall(expr) => match &expr.kind {
            ExpressionKind::Call(call) => {
                assert!(!call.resolved);
                assert_eq!(call.function.descriptor().name, ErrorFunction::NAME);
            }
            other => panic!("expected a call, got {other:?}"),
        },
        other => panic!("expected a call statement, got {other}"),
    }
}

#[test]
fn bogus_function_is_not_installable() {
    let err = PipelineSet::build(
        &[SourceUnit::new(
            "rules.rp",
            r#"rule "r" when true then bogus_function(); end"#,
        )],
        &[],
        &registry(),
    )
    .unwrap_err();
    let PipelineError::Invalid(sources) = err;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source, "rules.rp");
    assert_eq!(sources[0].diagnostics.len(), 1);
}

#[test]
fn independent_errors_are_reported_together() {
    let outcome = parse_with_diagnostics(
        r#"
        rule "one" when $message.a == then set_field("x", 1); end
        rule "two" when true then nope(); set_field("y"); end
        rule "three" when "text" then set_field("z", missing_var); end
        "#,
        &registry(),
    );
    let kinds: Vec<_> = outcome.errors.iter().map(|e| &e.kind).collect();

    assert!(matches!(kinds[0], ParseErrorKind::Syntax(_)));
    assert!(kinds.contains(&&ParseErrorKind::UndeclaredFunction { name: "nope".into() }));
    assert!(kinds.iter().any(|k| matches!(k, ParseErrorKind::WrongNumberOfArgs { .. })));
    assert!(kinds.iter().any(|k| matches!(k, ParseErrorKind::IncompatibleType { .. })));
    assert!(kinds.contains(&&ParseErrorKind::UndeclaredVariable {
        name: "missing_var".into()
    }));

    let positions: Vec<_> = outcome.errors.iter().map(|e| e.position).collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);
}

#[test]
fn pipeline_structure_is_checked() {
    let outcome = parse_with_diagnostics(
        r#"
        pipeline "gaps"
        stage 0 match all
          rule "a";
        stage 2 match all
          rule "b";
        end
        "#,
        &registry(),
    );
    assert!(outcome.errors.iter().any(|e| matches!(
        &e.kind,
        ParseErrorKind::NonContiguousStages { expected: 1, found: 2, .. }
    )));
}

#[test]
fn deep_nesting_is_a_diagnostic() {
    let sources = [
        format!(
            "rule \"r\" when {}true{} then end",
            "(".repeat(1_000),
            ")".repeat(1_000)
        ),
        format!("rule \"r\" when {}true then end", "not ".repeat(1_000)),
        format!("rule \"r\" when {}1 > 0 then end", "- ".repeat(1_000)),
        format!("rule \"r\" when {}1 > 0 then end", "1 + ".repeat(10_000)),
        format!(
            "rule \"r\" when true then let v = {}1{}; end",
            "[".repeat(1_000),
            "]".repeat(1_000)
        ),
    ];
    for source in &sources {
        let outcome = parse_with_diagnostics(source, &registry());
        assert!(
            outcome
                .errors
                .iter()
                .any(|e| e.kind == ParseErrorKind::NestingTooDeep { limit: MAX_NESTING }),
            "no nesting diagnostic for source starting {:?}",
            &source[..24]
        );
        assert_eq!(outcome.rules().count(), 1);
    }
}

#[test]
fn moderate_nesting_parses_and_runs() {
    let sum = format!("{}1{}", "(1 + ".repeat(60), ")".repeat(60));
    let source = format!(
        r#"
        rule "sum" when {sum} == 61 then set_field("sum", {sum}); end
        pipeline "p" stage 0 match all rule "sum"; end
        "#
    );
    let set = PipelineSet::from_source(&source, &registry()).unwrap();
    let interpreter = PipelineInterpreter::with_pipelines(InterpreterConfig::default(), set);
    let mut message = Message::new();
    let report = interpreter.process_pipelines(&mut message, &["p"]);

    assert!(report.is_clean());
    assert_eq!(message.get_field("sum"), Some(&Value::Long(61)));
}
