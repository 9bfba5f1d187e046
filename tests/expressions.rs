use datatree::bindings::{Segment, is_dynamic_value, split_segments, substitute};
use datatree::entity::SubstitutionType;
use datatree::error::EvalError;
use datatree::lexer::{TokenKind, tokenize};
use datatree::parser::{Expr, parse_expression};
use datatree::sandbox::{Effect, Limits, Sandbox, Scope};
use datatree::value::{Object, Value};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn entities() -> Object {
    let json = serde_json::json!({
        "Input1": { "text": "hello", "count": 3 },
        "Table1": { "data": [ { "id": 1, "name": "a" }, { "id": 2, "name": "b" } ] },
        "Api1": { "data": { "users": [] } }
    });
    match Value::from(json) {
        Value::Object(map) => map,
        _ => Object::new(),
    }
}

fn eval_with(entities: &Object, actions: &BTreeSet<String>, code: &str) -> Result<Value, EvalError> {
    let scope = Scope { entities, actions };
    let mut sandbox = Sandbox::new(scope, Limits::default());
    sandbox.eval_source(code)
}

fn eval(code: &str) -> Result<Value, EvalError> {
    eval_with(&entities(), &BTreeSet::new(), code)
}

#[test]
fn tokenizer_prefers_longest_punctuator() {
    let kinds: Vec<TokenKind> = tokenize("a === b?.c")
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Ident("a".to_string()),
            TokenKind::Punct("==="),
            TokenKind::Ident("b".to_string()),
            TokenKind::Punct("?."),
            TokenKind::Ident("c".to_string()),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn tokenizer_skips_comments_and_rejects_stray_characters() {
    let tokens = tokenize("1 // one\n + /* two */ 2").unwrap();
    assert_eq!(tokens.len(), 4);
    assert!(tokenize("a # b").is_err());
    assert!(tokenize("/* open").is_err());
}

#[test]
fn parser_builds_member_chains() {
    let expr = parse_expression("Table1.data[0]").unwrap();
    match expr {
        Expr::Index { object, .. } => assert!(matches!(*object, Expr::Member { .. })),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn parser_rejects_incomplete_input() {
    assert!(parse_expression("1 +").is_err());
    assert!(parse_expression("(a").is_err());
    assert!(parse_expression("a b").is_err());
    assert!(parse_expression("const").is_err());
}

#[test]
fn arithmetic_and_strings() {
    assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Number(7.0));
    assert_eq!(eval("'a' + 1").unwrap(), Value::str("a1"));
    assert_eq!(eval("Input1.text.toUpperCase()").unwrap(), Value::str("HELLO"));
    assert_eq!(eval("Input1.count > 2 ? 'big' : 'small'").unwrap(), Value::str("big"));
    assert_eq!(eval("null ?? 'fallback'").unwrap(), Value::str("fallback"));
}

#[test]
fn array_methods_with_closures() {
    assert_eq!(
        eval("Table1.data.map(row => row.name).join('-')").unwrap(),
        Value::str("a-b")
    );
    assert_eq!(
        eval("Table1.data.filter(r => r.id > 1).length").unwrap(),
        Value::Number(1.0)
    );
    assert_eq!(
        eval("Table1.data.reduce((sum, r) => sum + r.id, 0)").unwrap(),
        Value::Number(3.0)
    );
}

#[test]
fn function_bodies_run_statements() {
    let code = "(function (n) { let total = 0; if (n > 1) { total = n * 2; } return total; })(4)";
    assert_eq!(eval(code).unwrap(), Value::Number(8.0));
}

#[test]
fn builtins_are_available() {
    assert_eq!(eval("Math.max(1, 5, 3)").unwrap(), Value::Number(5.0));
    assert_eq!(eval("JSON.stringify({a: [1, 2]})").unwrap(), Value::str(r#"{"a":[1,2]}"#));
    assert_eq!(eval("Object.keys(Input1).length").unwrap(), Value::Number(2.0));
    assert_eq!(eval("parseInt('42px')").unwrap(), Value::Number(42.0));
}

#[test]
fn unknown_identifier_is_a_reference_error() {
    assert_eq!(eval("missing + 1"), Err(EvalError::Reference("missing".to_string())));
    assert_eq!(eval("typeof missing").unwrap(), Value::str("undefined"));
}

#[test]
fn reading_through_undefined_is_a_type_error() {
    assert!(matches!(eval("Api1.nothing.deeper"), Err(EvalError::Type(_))));
    assert_eq!(eval("Api1.nothing?.deeper").unwrap(), Value::Undefined);
}

#[test]
fn thrown_errors_carry_their_message() {
    let err = eval("(() => { throw { message: 'boom' }; })()").unwrap_err();
    assert_eq!(err, EvalError::Thrown("boom".to_string()));
}

#[test]
fn global_writes_stay_in_the_overlay() {
    let tree = entities();
    let actions = BTreeSet::new();
    let scope = Scope {
        entities: &tree,
        actions: &actions,
    };
    let mut sandbox = Sandbox::new(scope, Limits::default());
    let result = sandbox
        .eval_source("(() => { Input1.text = 'changed'; leaked = 1; return Input1.text; })()")
        .unwrap();

    assert_eq!(result, Value::str("changed"));
    assert!(sandbox.overlay().contains_key("leaked"));
    assert_eq!(
        tree.get("Input1").and_then(|v| v.as_object()).and_then(|o| o.get("text")),
        Some(&Value::str("hello"))
    );
}

#[test]
fn runaway_recursion_hits_the_call_depth_limit() {
    let tree = Object::new();
    let actions = BTreeSet::new();
    let scope = Scope {
        entities: &tree,
        actions: &actions,
    };
    let limits = Limits {
        max_call_depth: 16,
        max_steps: 1_000_000,
        ..Limits::default()
    };
    let mut sandbox = Sandbox::new(scope, limits);
    let err = sandbox
        .eval_source("(() => { const f = (g, n) => g(g, n + 1); return f(f, 0); })()")
        .unwrap_err();
    assert_eq!(err, EvalError::CallDepth(16));
}

#[test]
fn step_limit_stops_long_evaluations() {
    let tree = Object::new();
    let actions = BTreeSet::new();
    let scope = Scope {
        entities: &tree,
        actions: &actions,
    };
    let limits = Limits {
        max_call_depth: 64,
        max_steps: 10,
        ..Limits::default()
    };
    let mut sandbox = Sandbox::new(scope, limits);
    let err = sandbox.eval_source("1 + 2 + 3 + 4 + 5 + 6 + 7 + 8").unwrap_err();
    assert_eq!(err, EvalError::StepLimit(10));
}

#[test]
fn effects_are_recorded_not_executed() {
    let tree = entities();
    let actions: BTreeSet<String> = ["Api1".to_string()].into_iter().collect();
    let scope = Scope {
        entities: &tree,
        actions: &actions,
    };
    let mut sandbox = Sandbox::new(scope, Limits::default());
    sandbox
        .eval_source("(() => { showAlert('saved', 'success'); Api1.run({ page: 2 }); storeValue('k', 1); })()")
        .unwrap();

    let effects = sandbox.take_effects();
    assert_eq!(effects.len(), 3);
    assert_eq!(
        effects[0],
        Effect::ShowAlert {
            message: "saved".to_string(),
            style: "success".to_string(),
        }
    );
    assert!(matches!(&effects[1], Effect::RunAction { action, .. } if action == "Api1"));
    assert_eq!(
        effects[2],
        Effect::StoreValue {
            key: "k".to_string(),
            value: Value::Number(1.0),
        }
    );
    assert!(sandbox.take_effects().is_empty());
}

#[test]
fn segments_split_text_and_bindings() {
    assert_eq!(
        split_segments("Hi {{ Input1.text }}!"),
        vec![
            Segment::Text("Hi "),
            Segment::Binding(" Input1.text "),
            Segment::Text("!"),
        ]
    );
    assert!(is_dynamic_value("{{a}}"));
    assert!(!is_dynamic_value("plain"));
}

#[test]
fn single_binding_keeps_its_type() {
    let raw = Value::str("{{ Table1.data }}");
    let value = substitute(&raw, SubstitutionType::Template, false, eval).unwrap();
    assert!(matches!(value, Value::Array(ref rows) if rows.len() == 2));
}

#[test]
fn template_concatenates_as_text() {
    let raw = Value::str("{{ Input1.count }} items, {{ [1, 2] }} and {{ undefined }}.");
    let value = substitute(&raw, SubstitutionType::Template, false, eval).unwrap();
    assert_eq!(value, Value::str("3 items, [1,2] and ."));
}

#[test]
fn smart_substitute_parses_json_results() {
    let raw = Value::str("[{{ Input1.count }}, {{ Input1.count + 1 }}]");
    let value = substitute(&raw, SubstitutionType::SmartSubstitute, false, eval).unwrap();
    assert_eq!(value, Value::Array(vec![Value::Number(3.0), Value::Number(4.0)]));

    let raw = Value::str("count: {{ Input1.count }}");
    let value = substitute(&raw, SubstitutionType::SmartSubstitute, false, eval).unwrap();
    assert_eq!(value, Value::str("count: 3"));
}

#[test]
fn none_copies_the_raw_value() {
    let raw = Value::str("{{ Input1.text }}");
    let value = substitute(&raw, SubstitutionType::None, false, |_| {
        Err(EvalError::Type("never called".to_string()))
    })
    .unwrap();
    assert_eq!(value, raw);
}

#[test]
fn code_paths_evaluate_the_whole_text() {
    let raw = Value::str("Input1.count * 10");
    let value = substitute(&raw, SubstitutionType::SmartSubstitute, true, eval).unwrap();
    assert_eq!(value, Value::Number(30.0));

    let empty = Value::str("  ");
    let value = substitute(&empty, SubstitutionType::SmartSubstitute, true, eval).unwrap();
    assert_eq!(value, Value::Undefined);
}

#[test]
fn parser_limits_nesting_depth() {
    let shallow = format!("{}1{}", "(".repeat(200), ")".repeat(200));
    assert_eq!(parse_expression(&shallow).unwrap(), Expr::Number(1.0));

    let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
    let err = parse_expression(&deep).unwrap_err();
    assert!(err.message.contains("nested deeper"), "{}", err.message);

    let long_member_chain = format!("a{}", ".b".repeat(300));
    assert!(parse_expression(&long_member_chain).is_err());
    let unary_chain = format!("{}1", "- ".repeat(300));
    assert!(parse_expression(&unary_chain).is_err());
}

#[test]
fn string_growth_counts_against_steps() {
    let code = format!("((f) => {}'ab'{})(s => s + s)", "f(".repeat(30), ")".repeat(30));
    assert_eq!(eval(&code), Err(EvalError::StepLimit(100_000)));
    assert_eq!(eval("((f) => f(f('ab')))(s => s + s)"), Ok(Value::str("abababab")));
}

#[test]
fn array_growth_is_bounded() {
    let err = eval("(() => { const a = []; a[1e18] = 1; return a.length; })()").unwrap_err();
    assert!(matches!(err, EvalError::Range(_)), "{:?}", err);

    let tree = Object::new();
    let actions = BTreeSet::new();
    let scope = Scope {
        entities: &tree,
        actions: &actions,
    };
    let limits = Limits {
        max_array_length: 10,
        ..Limits::default()
    };
    let mut sandbox = Sandbox::new(scope, limits);
    assert_eq!(
        sandbox.eval_source("(() => { const a = []; a[9] = 1; return a.length; })()"),
        Ok(Value::Number(10.0))
    );
    assert!(matches!(
        sandbox.eval_source("(() => { const a = []; a[10] = 1; return a.length; })()"),
        Err(EvalError::Range(_))
    ));
}
