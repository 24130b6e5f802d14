//! Analyzer tests: IR shape, lifting, environments, and the error taxonomy.

mod common;

use common::{analyze, declare_fn, render_def, test_registry};
use yantra::analyzer::ir::Ir;
use yantra::form::build::*;
use yantra::form::Form;

#[test]
fn nested_lets_flatten_into_one_binding_list() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("x"), int(1)]),
            call(
                "let*",
                vec![
                    vector(vec![sym("y"), int(2)]),
                    call(".+", vec![sym("x"), sym("y")]),
                ],
            ),
        ],
    );
    let ir = analyze(&mut reg, &form).unwrap();
    let Ir::Let { bindings, body } = ir else {
        panic!("expected a let, got {ir:?}");
    };
    assert_eq!(bindings.len(), 2);
    assert!(matches!(*body, Ir::MethodCall { ref method, .. } if method == "+"));
}

#[test]
fn compound_if_tests_are_lifted_to_a_temporary() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "foo");
    let form = call("if", vec![call("foo", vec![]), string("y"), string("n")]);
    let ir = analyze(&mut reg, &form).unwrap();
    let Ir::Let { bindings, body } = ir else {
        panic!("expected the test to be lifted, got {ir:?}");
    };
    assert_eq!(bindings.len(), 1);
    assert!(matches!(bindings[0].value, Ir::Call { .. }));
    let Ir::If { test, .. } = &*body else {
        panic!("expected an if body");
    };
    assert!(matches!(&**test, Ir::Id(_)));
}

#[test]
fn boolean_tests_stay_inline() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("a"), int(1), sym("b"), int(2)]),
            call("if", vec![call(".<", vec![sym("a"), sym("b")]), int(1), int(2)]),
        ],
    );
    let ir = analyze(&mut reg, &form).unwrap();
    let Ir::Let { bindings, body } = ir else {
        panic!("expected a let");
    };
    assert_eq!(bindings.len(), 2, "no temporary for a boolean test");
    assert!(matches!(&*body, Ir::If { test, .. } if matches!(&**test, Ir::MethodCall { .. })));
}

#[test]
fn argument_order_is_preserved_once_lifting_starts() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    declare_fn(&mut reg, "g");
    declare_fn(&mut reg, "h");
    // (h (f) (if (g) 1 2)): the second argument branches, which forces the
    // first into a temporary too, in source order.
    let form = call(
        "h",
        vec![call("f", vec![]), call("if", vec![call("g", vec![]), int(1), int(2)])],
    );
    let ir = analyze(&mut reg, &form).unwrap();
    let Ir::Let { bindings, body } = ir else {
        panic!("expected lifted arguments");
    };
    assert!(bindings.len() >= 2);
    assert!(
        matches!(bindings[0].value, Ir::Call { .. }),
        "first binding evaluates (f) before the branching argument"
    );
    let Ir::Call { args, .. } = &*body else {
        panic!("expected the call body");
    };
    assert!(args.iter().all(|a| a.ir().is_atomic()));
}

#[test]
fn throw_is_wrapped_into_statement_position() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "boom");
    let form = call("throw", vec![call("boom", vec![])]);
    let ir = analyze(&mut reg, &form).unwrap();
    let Ir::Let { bindings, body } = ir else {
        panic!("throw should be let-wrapped");
    };
    assert!(matches!(bindings.last().unwrap().value, Ir::Throw(_)));
    assert!(matches!(*body, Ir::Nil));
}

#[test]
fn unknown_symbols_fail_analysis() {
    let mut reg = test_registry();
    let err = analyze(&mut reg, &call("boop", vec![int(1)])).unwrap_err();
    assert!(err.message().contains("unknown symbol 'boop'"));
}

#[test]
fn recur_arity_must_match_the_loop() {
    let mut reg = test_registry();
    let form = call(
        "loop*",
        vec![
            vector(vec![sym("a"), int(1)]),
            call("recur", vec![sym("a"), int(2)]),
        ],
    );
    let err = analyze(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("recur arity mismatch"));
}

#[test]
fn recur_outside_tail_position_is_rejected() {
    let mut reg = test_registry();
    let form = call(
        "loop*",
        vec![
            vector(vec![sym("a"), int(1)]),
            call("do", vec![call("recur", vec![sym("a")]), int(1)]),
        ],
    );
    let err = analyze(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("not in tail position"));
}

#[test]
fn recur_may_not_cross_a_try() {
    let mut reg = test_registry();
    let form = call(
        "loop*",
        vec![
            vector(vec![sym("a"), int(1)]),
            call("try", vec![call("recur", vec![sym("a")])]),
        ],
    );
    let err = analyze(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("recur across try boundary"));
}

#[test]
fn counted_loops_analyze_cleanly() {
    let mut reg = test_registry();
    let form = call(
        "loop*",
        vec![
            vector(vec![sym("x"), int(0)]),
            call(
                "if",
                vec![
                    call(".<", vec![sym("x"), int(10)]),
                    call("recur", vec![call(".+", vec![sym("x"), int(1)])]),
                    sym("x"),
                ],
            ),
        ],
    );
    let ir = analyze(&mut reg, &form).unwrap();
    assert!(matches!(ir, Ir::Loop { .. }));
}

#[test]
fn set_rejects_immutable_locals_and_globals() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![vector(vec![sym("x"), int(1)]), call("set!", vec![sym("x"), int(2)])],
    );
    let err = analyze(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("bad assignment"));

    declare_fn(&mut reg, "f");
    let err = analyze(&mut reg, &call("set!", vec![sym("f"), int(2)])).unwrap_err();
    assert!(err.message().contains("bad assignment"));
}

#[test]
fn set_accepts_loop_bindings_and_field_targets() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    let loop_set = call(
        "loop*",
        vec![vector(vec![sym("x"), int(1)]), call("set!", vec![sym("x"), int(2)])],
    );
    analyze(&mut reg, &loop_set).unwrap();

    let field_set = call(
        "let*",
        vec![
            vector(vec![sym("o"), call("f", vec![])]),
            call("set!", vec![call(".-count", vec![sym("o")]), int(2)]),
        ],
    );
    analyze(&mut reg, &field_set).unwrap();
}

#[test]
fn tagged_literals_are_unsupported() {
    let mut reg = test_registry();
    let err = analyze(&mut reg, &tagged("inst", string("2020-01-01"))).unwrap_err();
    assert!(err.message().contains("unsupported literal"));
}

#[test]
fn case_clause_values_must_be_simple_literals() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("s"), int(1)]),
            Form::List(vec![
                sym("case*"),
                sym("s"),
                Form::List(vec![Form::List(vec![num(1.5)]), string("x")]),
                string("d"),
            ]),
        ],
    );
    let err = analyze(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("unsupported literal in case clause"));
}

#[test]
fn def_doc_position_must_hold_a_string() {
    let mut reg = test_registry();
    let form = call("def", vec![sym("x"), int(1), int(2)]);
    let err = render_def(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("misplaced doc string"));
}

#[test]
fn def_records_doc_and_pre_declares_for_recursion() {
    let mut reg = test_registry();
    // Self-reference resolves because the definition is pre-declared.
    let form = call(
        "def",
        vec![
            sym("count-down"),
            string("counts to zero"),
            call(
                "fn*",
                vec![
                    vector(vec![sym("n")]),
                    call(
                        "if",
                        vec![
                            call(".<", vec![sym("n"), int(1)]),
                            int(0),
                            call("count-down", vec![call(".-", vec![sym("n"), int(1)])]),
                        ],
                    ),
                ],
            ),
        ],
    );
    render_def(&mut reg, &form).unwrap();
    let def = reg.current_ns().lookup("count-down").unwrap();
    assert_eq!(def.doc.as_deref(), Some("counts to zero"));
    assert_eq!(def.dart_name, "count_down");
}

#[test]
fn type_tags_resolve_or_fail_loudly() {
    let mut reg = test_registry();
    let ok = call(
        "let*",
        vec![
            vector(vec![with_tag("String", sym("s")), string("x")]),
            sym("s"),
        ],
    );
    analyze(&mut reg, &ok).unwrap();

    let bad = call(
        "let*",
        vec![
            vector(vec![with_tag("Widget", sym("w")), string("x")]),
            sym("w"),
        ],
    );
    let err = analyze(&mut reg, &bad).unwrap_err();
    assert!(err.message().contains("unknown type tag"));
}
