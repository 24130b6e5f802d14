//! Emitter tests: locus behavior, truthiness-aware tests, operators, loops,
//! try/catch, and the keyword factory, asserting on exact Dart text.

mod common;

use common::{declare_fn, emit_return, emit_statement, test_registry};
use yantra::form::build::*;
use yantra::form::Form;

#[test]
fn nested_let_with_method_call_in_statement_position() {
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
    assert_eq!(
        emit_statement(&mut reg, &form),
        "var x$1 = 1;\nvar y$1 = 2;\n(x$1)+(y$1);\n"
    );
}

#[test]
fn nested_let_in_return_position() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("x"), int(1), sym("y"), int(2)]),
            call(".+", vec![sym("x"), sym("y")]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var x$1 = 1;\nvar y$1 = 2;\nreturn (x$1)+(y$1);\n"
    );
}

#[test]
fn dynamic_if_test_gets_the_full_truthiness_check() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "foo");
    let form = call("if", vec![call("foo", vec![]), string("y"), string("n")]);
    assert_eq!(
        emit_return(&mut reg, &form),
        "var t$1 = foo();\nif (t$1 != false && t$1 != null) {\nreturn \"y\";\n}\nreturn \"n\";\n"
    );
}

#[test]
fn known_non_boolean_tests_only_check_nil() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("s"), string("x")]),
            call("if", vec![sym("s"), int(1), int(2)]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var s$1 = \"x\";\nif (s$1 != null) {\nreturn 1;\n}\nreturn 2;\n"
    );
}

#[test]
fn boolean_tests_emit_bare() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("a"), int(1), sym("b"), int(2)]),
            call("if", vec![call(".<", vec![sym("a"), sym("b")]), string("y"), string("n")]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var a$1 = 1;\nvar b$1 = 2;\nif ((a$1)<(b$1)) {\nreturn \"y\";\n}\nreturn \"n\";\n"
    );
}

#[test]
fn rethrow_replaces_throwing_the_caught_exception() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    let form = call(
        "try",
        vec![
            call("f", vec![]),
            Form::List(vec![
                sym("catch"),
                sym("StateError"),
                sym("e"),
                call("throw", vec![sym("e")]),
            ]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "try {\nreturn f();\n} on StateError catch (e$1) {\nrethrow;\n}\n"
    );
}

#[test]
fn catch_binds_stack_trace_and_finally_runs_statements() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    declare_fn(&mut reg, "cleanup");
    let form = call(
        "try",
        vec![
            call("f", vec![]),
            Form::List(vec![
                sym("catch"),
                sym("dynamic"),
                sym("e"),
                sym("st"),
                sym("st"),
            ]),
            Form::List(vec![sym("finally"), call("cleanup", vec![])]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "try {\nreturn f();\n} catch (e$1, st$1) {\nreturn st$1;\n} finally {\ncleanup();\n}\n"
    );
}

#[test]
fn dependent_recur_rebinds_compute_before_assigning() {
    let mut reg = test_registry();
    let form = call(
        "loop*",
        vec![
            vector(vec![sym("a"), int(0), sym("b"), int(1)]),
            call("recur", vec![sym("b"), call(".+", vec![sym("a"), sym("b")])]),
        ],
    );
    assert_eq!(
        emit_statement(&mut reg, &form),
        "var a$1 = 0;\nvar b$1 = 1;\ndo {\nvar t$r1 = (a$1)+(b$1);\na$1 = b$1;\nb$1 = t$r1;\ncontinue;\n} while (true);\n"
    );
}

#[test]
fn loops_without_recur_still_break_out_of_the_do_while() {
    let mut reg = test_registry();
    let form = call(
        "loop*",
        vec![vector(vec![sym("x"), int(1)]), sym("x")],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var x$1 = 1;\ndo {\nreturn x$1;\n} while (true);\n"
    );
}

#[test]
fn keyword_literals_call_the_intern_factory() {
    let mut reg = test_registry();
    assert_eq!(
        emit_statement(&mut reg, &kw("foo/bar")),
        "lib0.Keyword.intern(\"foo\", \"bar\");\n"
    );
    assert_eq!(
        emit_statement(&mut reg, &kw("solo")),
        "lib0.Keyword.intern(null, \"solo\");\n"
    );
}

#[test]
fn operator_members_emit_operator_syntax() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    let form = call(
        "let*",
        vec![
            vector(vec![sym("v"), call("f", vec![])]),
            call(".[]", vec![sym("v"), int(0)]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var v$1 = f();\nreturn v$1[0];\n"
    );

    let not = call(
        "let*",
        vec![
            vector(vec![sym("b"), boolean(true)]),
            call("if", vec![call(".!", vec![sym("b")]), int(1), int(2)]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &not),
        "var b$1 = true;\nif (!(b$1)) {\nreturn 1;\n}\nreturn 2;\n"
    );
}

#[test]
fn logical_operators_double_for_boolean_operands() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("p"), boolean(true), sym("q"), boolean(false)]),
            call("if", vec![call(".&", vec![sym("p"), sym("q")]), int(1), int(2)]),
        ],
    );
    let out = emit_return(&mut reg, &form);
    assert!(out.contains("if ((p$1)&&(q$1)) {"), "got: {out}");

    // Integer operands keep the bitwise operator.
    let bitwise = call(
        "let*",
        vec![
            vector(vec![sym("m"), int(3), sym("n"), int(5)]),
            call(".&", vec![sym("m"), sym("n")]),
        ],
    );
    let out = emit_statement(&mut reg, &bitwise);
    assert!(out.contains("(m$1)&(n$1);"), "got: {out}");
}

#[test]
fn method_receivers_evaluate_once() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    let form = call(".render", vec![call("f", vec![]), int(1)]);
    assert_eq!(emit_statement(&mut reg, &form), "(f()).render(1);\n");
}

#[test]
fn field_assignment_targets_emit_dotted_stores() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    let form = call(
        "let*",
        vec![
            vector(vec![sym("o"), call("f", vec![])]),
            call("set!", vec![call(".-count", vec![sym("o")]), int(2)]),
        ],
    );
    assert_eq!(
        emit_statement(&mut reg, &form),
        "var o$1 = f();\no$1.count = 2;\n"
    );
}

#[test]
fn case_emits_a_switch_with_grouped_values() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("s"), int(1)]),
            Form::List(vec![
                sym("case*"),
                sym("s"),
                Form::List(vec![Form::List(vec![int(1), int(2)]), string("a")]),
                string("d"),
            ]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var s$1 = 1;\nswitch (s$1) {\ncase 1:\ncase 2:\nreturn \"a\";\ndefault:\nreturn \"d\";\n}\n"
    );
}

#[test]
fn string_literals_escape_in_output() {
    let mut reg = test_registry();
    assert_eq!(
        emit_return(&mut reg, &string("a\nb $x \"q\"")),
        "return \"a\\nb \\$x \\\"q\\\"\";\n"
    );
}

#[test]
fn vector_literals_build_persistent_vectors() {
    let mut reg = test_registry();
    declare_fn(&mut reg, "f");
    let form = vector(vec![int(1), call("f", vec![])]);
    assert_eq!(
        emit_statement(&mut reg, &form),
        "lib0.PersistentVector.fromList([1, f()]);\n"
    );
}

#[test]
fn quoted_symbols_intern_through_the_runtime() {
    let mut reg = test_registry();
    let form = call("quote", vec![sym("my.ns/thing")]);
    assert_eq!(
        emit_statement(&mut reg, &form),
        "lib0.Symbol.intern(\"my.ns\", \"thing\");\n"
    );
}

#[test]
fn is_and_cast_emit_parenthesized_forms() {
    let mut reg = test_registry();
    let form = call(
        "let*",
        vec![
            vector(vec![sym("x"), string("s")]),
            call("is?", vec![sym("x"), sym("String")]),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &form),
        "var x$1 = \"s\";\nreturn (x$1 is String);\n"
    );

    let cast = call(
        "let*",
        vec![
            vector(vec![sym("x"), string("s")]),
            with_tag("Object", call(".toString", vec![sym("x")])),
        ],
    );
    assert_eq!(
        emit_return(&mut reg, &cast),
        "var x$1 = \"s\";\nreturn (x$1.toString() as Object);\n"
    );
}
