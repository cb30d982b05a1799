use std::path::Path;

use pretty_assertions::assert_eq;

use kilncore::{Config, EvalError, Evaluator, PathValue, Scope, Value, ValueKind};

fn evaluator(serial: bool) -> Evaluator {
    Evaluator::new(Config {
        serial,
        ..Config::default()
    })
    .with_parse_file(|path: &PathValue| {
        kilnlang::parse_file(Path::new(&path.name)).map_err(|err| EvalError::IncludeFailed {
            pos: path.pos.clone(),
            path: path.name.clone(),
            message: err.to_string(),
        })
    })
}

fn eval_in(src: &str, scope: &Scope, serial: bool) -> Result<Value, EvalError> {
    let expr = kilnlang::parse_str(src, "<test>", Path::new("/work")).unwrap();
    evaluator(serial)
        .resolve(&expr, scope)
        .map(|(value, _deps)| value)
}

fn eval(src: &str) -> Value {
    eval_in(src, &Scope::new(), true).unwrap()
}

fn eval_err(src: &str) -> EvalError {
    eval_in(src, &Scope::new(), true).unwrap_err()
}

fn json(src: &str) -> serde_json::Value {
    eval(src).json()
}

#[test]
fn scalars_resolve_to_themselves() {
    assert_eq!(json("42"), serde_json::json!(42));
    assert_eq!(json("true"), serde_json::json!(true));
    assert_eq!(json(r#""hello""#), serde_json::json!("hello"));
    assert_eq!(json("/some/path"), serde_json::json!("/some/path"));
}

#[test]
fn empty_string_resolves_to_empty_string() {
    assert_eq!(json(r#""""#), serde_json::json!(""));
}

#[test]
fn interpolation_concatenates_chunks() {
    assert_eq!(
        json(r#"let v = "1.2.3" in "version=\(v)!""#),
        serde_json::json!("version=1.2.3!")
    );
}

#[test]
fn interpolation_injects_path_names() {
    assert_eq!(
        json(r#""at \(/store/item) here""#),
        serde_json::json!("at /store/item here")
    );
}

#[test]
fn interpolation_rejects_non_string_values() {
    let err = eval_err(r#""x\([1])""#);
    assert!(
        matches!(err, EvalError::NonStringInterpolation { got: "array", .. }),
        "got {err:?}"
    );
}

#[test]
fn with_clause_defaults_never_overwrite_entries() {
    assert_eq!(
        json(r#"let base = { "a": 1, "b": 2, } in { "a": 10, with base, }"#),
        serde_json::json!({ "a": 10, "b": 2 })
    );
}

#[test]
fn with_clauses_apply_left_to_right() {
    let value = json(
        r#"let
            first = { "k": "first", "x": "fx", },
            second = { "k": "second", "y": "sy", }
        in { with first, with second, }"#,
    );
    assert_eq!(
        value,
        serde_json::json!({ "k": "first", "x": "fx", "y": "sy" })
    );
}

#[test]
fn with_clause_requires_a_map() {
    let err = eval_err(r#"{ with "nope", }"#);
    assert!(
        matches!(err, EvalError::TypeMismatch { expected: "map", got: "string", .. }),
        "got {err:?}"
    );
}

#[test]
fn map_keys_must_resolve_to_strings() {
    let err = eval_err("{ 1: 2, }");
    assert!(
        matches!(err, EvalError::ExpectedStringKey { got: "number", .. }),
        "got {err:?}"
    );
}

#[test]
fn map_keys_may_be_computed() {
    assert_eq!(
        json(r#"let k = "dynamic" in { "\(k)": 1, }"#),
        serde_json::json!({ "dynamic": 1 })
    );
}

#[test]
fn single_at_key_unwraps() {
    assert_eq!(json(r#"{ "@": 42, }"#), serde_json::json!(42));
    // only a lone `@` unwraps
    assert_eq!(
        json(r#"{ "@": 1, "other": 2, }"#),
        serde_json::json!({ "@": 1, "other": 2 })
    );
}

#[test]
fn empty_define_is_identity() {
    assert_eq!(json("let in 5"), serde_json::json!(5));
}

#[test]
fn lambdas_capture_their_defining_scope() {
    // the captured x survives shadowing at the call site
    assert_eq!(
        json(r#"let x = "outer" in (let f a = x in (let x = "inner" in f("_")))"#),
        serde_json::json!("outer")
    );
}

#[test]
fn bindings_capture_the_pre_extension_scope() {
    // siblings of the same let are not visible to each other
    let err = eval_err(r#"let x = 1, y = x in y"#);
    assert!(
        matches!(err, EvalError::NotInScope { ref name, .. } if name == "x"),
        "got {err:?}"
    );
}

#[test]
fn arguments_resolve_in_the_callers_scope() {
    assert_eq!(
        json(r#"let f a = a in (let y = "caller" in f(y))"#),
        serde_json::json!("caller")
    );
}

#[test]
fn bare_reference_yields_the_lambda_value() {
    let value = eval(r#"let f a = a in f"#);
    assert!(matches!(value.kind, ValueKind::Lambda { .. }));
    assert_eq!(value.json(), serde_json::Value::Null);
}

#[test]
fn call_sites_apply_lambdas() {
    assert_eq!(
        json(r#"let greet who = "hi \(who)" in greet("you")"#),
        serde_json::json!("hi you")
    );
}

#[test]
fn call_arity_is_checked() {
    let err = eval_err(r#"let f a = a in f("x", "y")"#);
    assert!(
        matches!(err, EvalError::ArityMismatch { expected: 1, got: 2, .. }),
        "got {err:?}"
    );
}

#[test]
fn calls_on_plain_bindings_resolve_the_binding() {
    assert_eq!(json(r#"let x = "plain" in x()"#), serde_json::json!("plain"));
}

#[test]
fn unknown_names_are_reported() {
    let err = eval_err("missing");
    assert!(
        matches!(err, EvalError::NotInScope { ref name, .. } if name == "missing"),
        "got {err:?}"
    );
}

#[test]
fn attribute_projection_walks_maps() {
    assert_eq!(
        json(r#"{ "a": { "b": 3, }, }.a.b"#),
        serde_json::json!(3)
    );
}

#[test]
fn missing_attributes_are_reported() {
    let err = eval_err(r#"{ "a": 1, }.b"#);
    assert!(
        matches!(err, EvalError::NoSuchAttribute { ref name, .. } if name == "b"),
        "got {err:?}"
    );

    let err = eval_err(r#""str".attr"#);
    assert!(
        matches!(err, EvalError::TypeMismatch { expected: "map", .. }),
        "got {err:?}"
    );
}

#[test]
fn conditions_select_exactly_one_branch() {
    // the unchosen branch is never resolved, unbound names and all
    assert_eq!(json(r#"if true then "x" else boom"#), serde_json::json!("x"));
    assert_eq!(json(r#"if false then boom else "y""#), serde_json::json!("y"));
}

#[test]
fn condition_truthiness_follows_value_shape() {
    assert_eq!(json(r#"if "" then 1 else 2"#), serde_json::json!(2));
    assert_eq!(json(r#"if "x" then 1 else 2"#), serde_json::json!(1));
    assert_eq!(json("if 0 then 1 else 2"), serde_json::json!(2));
    assert_eq!(json("if 0.5 then 1 else 2"), serde_json::json!(1));
    assert_eq!(json("if [] then 1 else 2"), serde_json::json!(2));
    assert_eq!(json(r#"if { "k": 1, } then 1 else 2"#), serde_json::json!(1));
    assert_eq!(json("if /any/path then 1 else 2"), serde_json::json!(1));

    let err = eval_err("let f a = a in if f then 1 else 2");
    assert!(
        matches!(err, EvalError::TypeMismatch { expected: "boolean", got: "function", .. }),
        "got {err:?}"
    );
}

#[test]
fn parallel_and_serial_evaluation_agree() {
    let src = r#"let
        mk suffix = "item-\(suffix)",
        base = { "common": true, }
    in {
        "name": "root",
        "items": [mk("a"), mk("b"), mk("c")],
        "nested": { "deep": [1, 2, { "@": 3, }], with base, },
        "pick": if true then mk("yes") else mk("no"),
    }"#;
    let serial = eval_in(src, &Scope::new(), true).unwrap().json();
    let parallel = eval_in(src, &Scope::new(), false).unwrap().json();
    assert_eq!(serial, parallel);
}

#[test]
fn peer_failures_are_all_reported() {
    for serial in [true, false] {
        let err = eval_in("[first_missing, second_missing]", &Scope::new(), serial).unwrap_err();
        match err {
            EvalError::Multiple(errs) => {
                assert_eq!(errs.len(), 2);
                let text = errs
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                assert!(text.contains("first_missing"), "missing peer in: {text}");
                assert!(text.contains("second_missing"), "missing peer in: {text}");
            }
            other => panic!("expected a joined composite, got {other:?}"),
        }
    }
}

#[test]
fn includes_compose_with_the_current_scope() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("lib.kiln"),
        b"{ \"greet\": \"hi \\(who)\", }",
    )
    .unwrap();

    let src = format!(
        r#"let who = "tester" in include {}/lib.kiln"#,
        dir.path().display()
    );
    let expr = kilnlang::parse_str(&src, "<test>", dir.path()).unwrap();
    let (value, _deps) = evaluator(true).resolve(&expr, &Scope::new()).unwrap();
    assert_eq!(value.json(), serde_json::json!({ "greet": "hi tester" }));
}

#[test]
fn failing_includes_are_classified() {
    let err = eval_err("include /no/such/file.kiln");
    assert!(
        matches!(err, EvalError::IncludeFailed { ref path, .. } if path == "/no/such/file.kiln"),
        "got {err:?}"
    );

    let err = eval_err(r#"include "not a path""#);
    assert!(
        matches!(err, EvalError::TypeMismatch { expected: "path", .. }),
        "got {err:?}"
    );
}

#[test]
fn command_line_bindings_enter_the_scope() {
    let scope = Scope::new().extend([(
        "who".to_string(),
        kilncore::Variable {
            expr: kilncore::Expr::string_constant("cli", "<commandline>"),
            scope: Scope::new(),
        },
    )]);
    let value = eval_in(r#""hello \(who)""#, &scope, true).unwrap();
    assert_eq!(value.json(), serde_json::json!("hello cli"));
}

#[test]
fn json_documents_round_trip() {
    let doc = serde_json::json!({
        "name": "demo",
        "version": 3,
        "precise": 1.25,
        "enabled": true,
        "tags": ["a", "b"],
        "nested": { "empty": [], "deep": { "n": 7 } }
    });
    let src = serde_json::to_string_pretty(&doc).unwrap();
    let value = eval_in(&src, &Scope::new(), true).unwrap();
    assert_eq!(value.json(), doc);
}
