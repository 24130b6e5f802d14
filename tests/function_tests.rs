//! Function-lowering tests: plain functions, Dart optionals, invoke-style
//! objects with variadic dispatch, closures, and call-site conventions.

mod common;

use common::{render_def, test_registry};
use yantra::form::build::*;
use yantra::form::Form;

fn arity(params: Vec<Form>, body: Form) -> Form {
    Form::List(vec![Form::Vector(params), body])
}

#[test]
fn plain_functions_become_top_level_dart_functions() {
    let mut reg = test_registry();
    let form = call(
        "def",
        vec![
            sym("ident"),
            call("fn*", vec![vector(vec![sym("x")]), sym("x")]),
        ],
    );
    let src = render_def(&mut reg, &form).unwrap();
    assert_eq!(src, "dynamic ident(dynamic x$1) {\nreturn x$1;\n}\n");
}

#[test]
fn optional_positional_and_named_parameters() {
    let mut reg = test_registry();
    let positional = call(
        "def",
        vec![
            sym("pad"),
            call(
                "fn*",
                vec![
                    vector(vec![
                        sym("a"),
                        sym(".&"),
                        sym("b"),
                        Form::List(vec![sym("c"), int(5)]),
                    ]),
                    sym("a"),
                ],
            ),
        ],
    );
    let src = render_def(&mut reg, &positional).unwrap();
    assert_eq!(
        src,
        "dynamic pad(dynamic a$1, [dynamic b$1, dynamic c$1 = 5]) {\nreturn a$1;\n}\n"
    );

    let named = call(
        "def",
        vec![
            sym("style"),
            call(
                "fn*",
                vec![
                    vector(vec![sym("a"), sym(".&"), map(vec![(sym("color"), int(1))])]),
                    sym("a"),
                ],
            ),
        ],
    );
    let src = render_def(&mut reg, &named).unwrap();
    assert_eq!(
        src,
        "dynamic style(dynamic a$1, {dynamic color$1 = 1}) {\nreturn a$1;\n}\n"
    );
}

#[test]
fn multi_arity_variadic_functions_lower_to_invoke_objects() {
    let mut reg = test_registry();
    let form = call(
        "def",
        vec![
            sym("f"),
            Form::List(vec![
                sym("fn*"),
                arity(vec![], int(0)),
                arity(vec![sym("a")], int(1)),
                arity(vec![sym("a"), sym("b"), sym("&"), sym("rest")], int(2)),
            ]),
        ],
    );
    let src = render_def(&mut reg, &form).unwrap();

    assert!(src.contains("class f$Fn$1 implements lib0.IFn {"), "got: {src}");
    assert!(src.contains("dynamic $_invoke$0() {\nreturn 0;\n}"));
    assert!(src.contains("dynamic $_invoke$1(dynamic a$1) {\nreturn 1;\n}"));
    assert!(src.contains(
        "dynamic $_invoke$vararg(dynamic a$2, dynamic b$1, dynamic rest$1) {\nreturn 2;\n}"
    ));
    // Arity 2 forwards an empty rest into the canonical variadic body.
    assert!(src.contains(
        "dynamic $_invoke$2(dynamic x$1, dynamic x$2) {\nreturn this.$_invoke$vararg(x$1, x$2, lib0.emptyList);\n}"
    ));
    // Arity 4 packs the trailing arguments.
    assert!(src.contains("this.$_invoke$vararg(x$6, x$7, lib0.list(x$8, x$9));"));
    // The packed-rest overflow entry unpacks into the variadic body.
    assert!(src.contains("dynamic $_invoke_more("));
    assert!(src.contains("lib0.listConcat("));
    // The Dart-callable entry compares optional slots to the sentinel.
    assert!(src.contains("dynamic call([dynamic p$1 = lib0.missingArg"));
    assert!(src.contains("if ((p$1)==(lib0.missingArg)) {\nreturn this.$_invoke$0();\n}"));
    // The object implements an interface it does not fully cover.
    assert!(src.contains(
        "dynamic noSuchMethod(Invocation invocation) => super.noSuchMethod(invocation);"
    ));
    assert!(src.ends_with("final f = f$Fn$1();\n"));
}

#[test]
fn call_sites_dispatch_by_arity_and_convention() {
    let mut reg = test_registry();
    let def_f = call(
        "def",
        vec![
            sym("f"),
            Form::List(vec![
                sym("fn*"),
                arity(vec![], int(0)),
                arity(vec![sym("a"), sym("&"), sym("rest")], int(1)),
            ]),
        ],
    );
    render_def(&mut reg, &def_f).unwrap();

    let few = call(
        "def",
        vec![
            sym("g"),
            call("fn*", vec![vector(vec![]), call("f", vec![int(1), int(2), int(3), int(4)])]),
        ],
    );
    let src = render_def(&mut reg, &few).unwrap();
    assert!(src.contains("return f.$_invoke$4(1, 2, 3, 4);"), "got: {src}");

    let many_args: Vec<Form> = (1..=12).map(int).collect();
    let many = call(
        "def",
        vec![
            sym("h"),
            call("fn*", vec![vector(vec![]), call("f", many_args)]),
        ],
    );
    let src = render_def(&mut reg, &many).unwrap();
    assert!(
        src.contains(
            "return f.$_invoke_more(1, 2, 3, 4, 5, 6, 7, 8, 9, lib0.list(10, 11, 12));"
        ),
        "got: {src}"
    );
}

#[test]
fn unknown_callees_branch_on_the_function_interface() {
    let mut reg = test_registry();
    let form = call(
        "def",
        vec![
            sym("apply-one"),
            call("fn*", vec![vector(vec![sym("x")]), call("x", vec![int(1)])]),
        ],
    );
    let src = render_def(&mut reg, &form).unwrap();
    assert!(
        src.contains(
            "return ((x$1 is lib0.IFn) ? (x$1 as lib0.IFn).$_invoke$1(1) : (x$1 as dynamic)(1));"
        ),
        "got: {src}"
    );
}

#[test]
fn nested_multi_arity_functions_capture_their_closure() {
    let mut reg = test_registry();
    let form = call(
        "def",
        vec![
            sym("k"),
            call(
                "fn*",
                vec![
                    vector(vec![sym("x")]),
                    Form::List(vec![
                        sym("fn*"),
                        arity(vec![], sym("x")),
                        arity(vec![sym("y")], call(".+", vec![sym("x"), sym("y")])),
                    ]),
                ],
            ),
        ],
    );
    let src = render_def(&mut reg, &form).unwrap();
    assert!(src.contains("class k$Fn$1 implements lib0.IFn {"), "got: {src}");
    assert!(src.contains("final dynamic x$1;"));
    assert!(src.contains("k$Fn$1(this.x$1);"));
    assert!(src.contains("dynamic k(dynamic x$1) {\nreturn k$Fn$1(x$1);\n}"));
}

#[test]
fn recursive_plain_functions_loop_instead_of_calling() {
    let mut reg = test_registry();
    let form = call(
        "def",
        vec![
            sym("sum-to"),
            call(
                "fn*",
                vec![
                    vector(vec![sym("n"), sym("acc")]),
                    call(
                        "if",
                        vec![
                            call(".<", vec![sym("n"), int(1)]),
                            sym("acc"),
                            call(
                                "recur",
                                vec![
                                    call(".-", vec![sym("n"), int(1)]),
                                    call(".+", vec![sym("acc"), sym("n")]),
                                ],
                            ),
                        ],
                    ),
                ],
            ),
        ],
    );
    let src = render_def(&mut reg, &form).unwrap();
    assert!(src.contains("do {"), "got: {src}");
    assert!(src.contains("} while (true);"));
    assert!(src.contains("continue;"));
    assert!(src.contains("if ((n$1)<(1)) {\nreturn acc$1;\n}"));
}

#[test]
fn fixed_arity_above_the_variadic_base_is_rejected() {
    let mut reg = test_registry();
    let form = call(
        "def",
        vec![
            sym("bad"),
            Form::List(vec![
                sym("fn*"),
                arity(vec![sym("a"), sym("b"), sym("c")], int(3)),
                arity(vec![sym("a"), sym("&"), sym("rest")], int(1)),
            ]),
        ],
    );
    let err = render_def(&mut reg, &form).unwrap_err();
    assert!(err.message().contains("exceeds the variadic base arity"));
}
