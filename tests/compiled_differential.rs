use proptest::prelude::*;
use rulepipe::functions::FunctionRegistry;
use rulepipe::lang::{Rule, parse_rule};
use rulepipe::runtime::eval::{evaluate_condition, execute_statements};
use rulepipe::runtime::{EvalResult, EvaluationContext, Message, RuleCompiler};

/// Outcome of running a rule once: condition result, statement result and
/// the message afterwards.
type Run = (EvalResult<bool>, Option<EvalResult<()>>, Message);

fn interpreted(rule: &Rule, message: &Message) -> Run {
    let mut message = message.clone();
    let mut context = EvaluationContext::new(&mut message);
    let matched = evaluate_condition(&rule.when, &mut context);
    let executed = match matched {
        Ok(true) => Some(execute_statements(&rule.then, &mut context)),
        _ => None,
    };
    (matched, executed, message)
}

fn compiled(rule: &Rule, message: &Message) -> Run {
    let compiled = RuleCompiler::default().compile(rule).unwrap();
    let mut message = message.clone();
    let mut context = EvaluationContext::new(&mut message);
    let matched = compiled.condition(&mut context);
    let executed = match matched {
        Ok(true) => Some(compiled.execute(&mut context)),
        _ => None,
    };
    (matched, executed, message)
}

fn arithmetic() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (-4i64..5).prop_map(|n| n.to_string()),
        Just("$message.a".to_string()),
        Just("$message.b".to_string()),
        Just("$message.missing".to_string()),
        Just("2.5".to_string()),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        (
            inner.clone(),
            prop_oneof![Just("+"), Just("-"), Just("*"), Just("/"), Just("%")],
            inner,
        )
            .prop_map(|(left, op, right)| format!("({} {} {})", left, op, right))
    })
}

fn condition() -> impl Strategy<Value = String> {
    let comparison = (
        arithmetic(),
        prop_oneof![
            Just("=="),
            Just("!="),
            Just("<"),
            Just("<="),
            Just(">"),
            Just(">=")
        ],
        arithmetic(),
    )
        .prop_map(|(left, op, right)| format!("{} {} {}", left, op, right));
    let leaf = prop_oneof![
        comparison,
        Just("has_field(\"a\")".to_string()),
        Just("contains(to_string($message.s), \"err\")".to_string()),
        Just("true".to_string()),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({} and {})", l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({} or {})", l, r)),
            inner.prop_map(|c| format!("not ({})", c)),
        ]
    })
}

fn message() -> impl Strategy<Value = Message> {
    (
        proptest::option::of(-20i64..20),
        proptest::option::of(-20i64..20),
        prop_oneof![Just("ok"), Just("error"), Just("ERR")],
    )
        .prop_map(|(a, b, s)| {
            let mut message = Message::new().with_field("s", s);
            if let Some(a) = a {
                message = message.with_field("a", a);
            }
            if let Some(b) = b {
                message = message.with_field("b", b);
            }
            message
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn compiled_rules_match_the_tree_walker(
        when in condition(),
        value in arithmetic(),
        message in message(),
    ) {
        let source = format!(
            r#"rule "differential"
            when {when}
            then
              let v = {value};
              set_field("v", v);
              set_field("doubled", v * 2);
              remove_field("s");
            end"#
        );
        let rule = parse_rule(&source, &FunctionRegistry::builtin()).unwrap();
        prop_assert_eq!(interpreted(&rule, &message), compiled(&rule, &message));
    }
}

#[test]
fn constant_folding_preserves_faults() {
    let rule = parse_rule(
        r#"rule "r" when (7 / (2 - 2)) > 1 or true then set_field("x", 3 * 4); end"#,
        &FunctionRegistry::builtin(),
    )
    .unwrap();
    let message = Message::new();
    let expected = interpreted(&rule, &message);
    assert!(expected.0.is_err());
    assert_eq!(expected, compiled(&rule, &message));
}
