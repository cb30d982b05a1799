use kilncore::expr::{Binding, Expr, ExprKind};
use kilncore::fingerprint;
use kilncore::Position;

fn expr(kind: ExprKind) -> Expr {
    Expr {
        pos: Position::default(),
        kind,
    }
}

fn string(s: &str) -> Expr {
    Expr::string_constant(s, "<test>")
}

fn number(n: f64) -> Expr {
    expr(ExprKind::Number(n))
}

fn map(entries: Vec<(Expr, Expr)>) -> Expr {
    expr(ExprKind::Map {
        entries,
        extends: vec![],
    })
}

#[test]
fn same_tree_yields_same_fingerprint() {
    let a = map(vec![
        (string("name"), string("hello")),
        (string("count"), number(3.0)),
    ]);
    let b = map(vec![
        (string("name"), string("hello")),
        (string("count"), number(3.0)),
    ]);
    assert_eq!(fingerprint::of_expr(&a), fingerprint::of_expr(&b));
}

#[test]
fn fingerprint_ignores_map_entry_order() {
    let a = map(vec![
        (string("a"), number(1.0)),
        (string("b"), number(2.0)),
    ]);
    let b = map(vec![
        (string("b"), number(2.0)),
        (string("a"), number(1.0)),
    ]);
    assert_eq!(fingerprint::of_expr(&a), fingerprint::of_expr(&b));
}

#[test]
fn fingerprint_tracks_values() {
    let a = map(vec![(string("k"), string("one"))]);
    let b = map(vec![(string("k"), string("two"))]);
    assert_ne!(fingerprint::of_expr(&a), fingerprint::of_expr(&b));
}

#[test]
fn with_clause_order_is_semantic() {
    let a = expr(ExprKind::Map {
        entries: vec![],
        extends: vec![expr(ExprKind::Var { name: "x".into() }), expr(ExprKind::Var { name: "y".into() })],
    });
    let b = expr(ExprKind::Map {
        entries: vec![],
        extends: vec![expr(ExprKind::Var { name: "y".into() }), expr(ExprKind::Var { name: "x".into() })],
    });
    assert_ne!(fingerprint::of_expr(&a), fingerprint::of_expr(&b));
}

#[test]
fn define_bindings_flow_into_fingerprint() {
    let body = expr(ExprKind::Var { name: "x".into() });
    let a = expr(ExprKind::Define {
        bindings: vec![Binding {
            name: "x".into(),
            expr: string("one"),
        }],
        body: Box::new(body.clone()),
    });
    let b = expr(ExprKind::Define {
        bindings: vec![Binding {
            name: "x".into(),
            expr: string("two"),
        }],
        body: Box::new(body),
    });
    assert_ne!(fingerprint::of_expr(&a), fingerprint::of_expr(&b));
}

#[test]
fn call_arguments_flow_into_fingerprint() {
    let a = expr(ExprKind::Call {
        name: "f".into(),
        args: vec![string("one")],
    });
    let b = expr(ExprKind::Call {
        name: "f".into(),
        args: vec![string("two")],
    });
    assert_ne!(fingerprint::of_expr(&a), fingerprint::of_expr(&b));
}

#[test]
fn unstatable_path_still_fingerprints() {
    let a = expr(ExprKind::Path("/definitely/not/there".into()));
    assert_eq!(fingerprint::of_expr(&a), fingerprint::of_expr(&a));
}

#[test]
fn formats_as_lowercase_hex() {
    let text = fingerprint::of_expr(&string("x")).to_string();
    assert_eq!(text.len(), 32);
    assert!(text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
}

#[test]
fn random_fingerprints_differ() {
    assert_ne!(fingerprint::random(), fingerprint::random());
}
