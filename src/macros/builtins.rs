//! The built-in macro set.
//!
//! Each macro is a native function over surface forms, rewriting author-facing
//! syntax into the fixed special forms the analyzer consumes. `defprotocol`
//! additionally records its method table into the namespace registry so that
//! class bodies and call sites can resolve protocol method names.

use crate::form::build::{boolean, call, kw, string, sym, vector, with_flag};
use crate::form::{Form, Symbol};
use crate::mangle::munge;
use crate::registry::{NamespaceRegistry, ProtocolInfo, ProtocolMethod};
use crate::{err_msg, YantraError};

use super::MacroTable;

/// Registers the built-in macro set.
///
/// `ns` is nominally part of this set but is shadowed by the special form of
/// the same name, which the expander checks first.
pub fn install(table: &mut MacroTable) {
    table.register("reify", expand_reify);
    table.register("deftype", expand_deftype);
    table.register("definterface", expand_definterface);
    table.register("defprotocol", expand_defprotocol);
    table.register("case", expand_case);
    table.register("are", expand_are);
    table.register("is", expand_is);
    table.register("testing", expand_testing);
    table.register("deftest", expand_deftest);
    table.register("try-expr", expand_try_expr);
    table.register("defrunner-main", expand_defrunner_main);
}

// ============================================================================
// HELPERS
// ============================================================================

fn expect_symbol<'a>(form: &'a Form, what: &str, macro_name: &str) -> Result<&'a Symbol, YantraError> {
    form.as_symbol()
        .ok_or_else(|| err_msg!(Expand, "{} expects a symbol for {}, got {}", macro_name, what, form.pretty()))
}

/// `(throw (new Class msg))`
fn throw_new(class: &str, msg: Form) -> Form {
    call("throw", vec![call("new", vec![sym(class), msg])])
}

/// `(. a + b)` string concatenation.
fn concat(a: Form, b: Form) -> Form {
    call(".", vec![a, sym("+"), b])
}

/// `(. o toString)`
fn to_string(o: Form) -> Form {
    call(".", vec![o, sym("toString")])
}

// ============================================================================
// case
// ============================================================================

/// Rewrites `case` to `case*`: directly when the scrutinee is already a
/// symbol, otherwise behind a `let*`. A missing default becomes a throwing
/// one, so `case*` always carries a default.
fn expand_case(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let Some((scrut, tail)) = args.split_first() else {
        return Err(err_msg!(Expand, "case requires a scrutinee"));
    };
    if tail.is_empty() {
        return Err(err_msg!(Expand, "case requires at least one clause or default"));
    }

    let has_default = tail.len() % 2 == 1;
    let default = if has_default {
        tail[tail.len() - 1].clone()
    } else {
        throw_new("StateError", string("no matching clause"))
    };
    let pairs = &tail[..tail.len() - usize::from(has_default)];

    let mut clauses = Vec::new();
    for pair in pairs.chunks(2) {
        let values = match pair[0].unwrapped() {
            Form::List(vals) => vals.clone(),
            single => vec![single.clone()],
        };
        clauses.push(Form::List(vec![Form::List(values), pair[1].clone()]));
    }

    let build_case = |scrut_form: Form| {
        let mut items = vec![sym("case*"), scrut_form];
        items.extend(clauses.iter().cloned());
        items.push(default.clone());
        Form::List(items)
    };

    if scrut.as_symbol().is_some() {
        Ok(build_case(scrut.clone()))
    } else {
        Ok(call(
            "let*",
            vec![
                vector(vec![sym("__scrut__"), scrut.clone()]),
                build_case(sym("__scrut__")),
            ],
        ))
    }
}

// ============================================================================
// Test-framework macros
// ============================================================================

/// `(deftest name body...)` => `(def ^:test name (fn* [] (do body...)))`
fn expand_deftest(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let Some((name, body)) = args.split_first() else {
        return Err(err_msg!(Expand, "deftest requires a name"));
    };
    expect_symbol(name, "the test name", "deftest")?;
    let mut do_form = vec![sym("do")];
    do_form.extend_from_slice(body);
    Ok(call(
        "def",
        vec![
            with_flag("test", name.unwrapped().clone()),
            call("fn*", vec![vector(vec![]), Form::List(do_form)]),
        ],
    ))
}

/// `(testing "context" body...)` => `(do body...)`
fn expand_testing(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let Some((desc, body)) = args.split_first() else {
        return Err(err_msg!(Expand, "testing requires a description"));
    };
    if desc.as_str().is_none() {
        return Err(err_msg!(
            Expand,
            "testing requires a string description, got {}",
            desc.pretty()
        ));
    }
    let mut do_form = vec![sym("do")];
    do_form.extend_from_slice(body);
    Ok(Form::List(do_form))
}

/// `(is expr msg?)` => `(try-expr msg expr)`
fn expand_is(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let (expr, msg) = match args {
        [expr] => (expr.clone(), string(format!("assertion failed: {}", expr.pretty()))),
        [expr, msg] => (expr.clone(), msg.clone()),
        _ => return Err(err_msg!(Expand, "is expects one or two arguments")),
    };
    Ok(call("try-expr", vec![msg, expr]))
}

/// The one-shot assertion body behind `is`: evaluate the expression, throw an
/// `AssertionError` when it is falsy, and convert any other thrown value into
/// an `AssertionError` carrying the original text.
fn expand_try_expr(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let [msg, expr] = args else {
        return Err(err_msg!(Expand, "try-expr expects a message and an expression"));
    };
    let fail = throw_new("AssertionError", msg.clone());
    let assertion = call("if", vec![expr.clone(), Form::Nil, fail]);
    let rethrow_ae = Form::List(vec![
        sym("catch"),
        sym("AssertionError"),
        sym("__ae__"),
        call("throw", vec![sym("__ae__")]),
    ]);
    let wrap_other = Form::List(vec![
        sym("catch"),
        sym("dynamic"),
        sym("__err__"),
        throw_new(
            "AssertionError",
            concat(string("error in assertion: "), to_string(sym("__err__"))),
        ),
    ]);
    Ok(Form::List(vec![sym("try"), assertion, rethrow_ae, wrap_other]))
}

/// `(are [x y] (check x y) 1 2, 3 4)` => `(do (is (check 1 2)) (is (check 3 4)))`
fn expand_are(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let [argv, template, rest @ ..] = args else {
        return Err(err_msg!(Expand, "are expects an argument vector and a template"));
    };
    let Some(params) = argv.as_vector() else {
        return Err(err_msg!(Expand, "are expects a vector of parameter symbols"));
    };
    let names: Vec<&Symbol> = params
        .iter()
        .map(|p| expect_symbol(p, "a template parameter", "are"))
        .collect::<Result<_, _>>()?;
    if names.is_empty() {
        return Err(err_msg!(Expand, "are arity mismatch: empty argument vector"));
    }
    if rest.len() % names.len() != 0 {
        return Err(err_msg!(
            Expand,
            "are arity mismatch: {} argument(s) do not fill rows of {}",
            rest.len(),
            names.len()
        ));
    }

    let mut assertions = vec![sym("do")];
    for row in rest.chunks(names.len()) {
        let substituted = substitute(template, &names, row);
        assertions.push(call("is", vec![substituted]));
    }
    Ok(Form::List(assertions))
}

fn substitute(template: &Form, names: &[&Symbol], row: &[Form]) -> Form {
    match template {
        Form::Symbol(s) if s.is_simple() => {
            for (name, replacement) in names.iter().zip(row) {
                if name.name == s.name {
                    return replacement.clone();
                }
            }
            template.clone()
        }
        Form::List(items) => Form::List(items.iter().map(|i| substitute(i, names, row)).collect()),
        Form::Vector(items) => {
            Form::Vector(items.iter().map(|i| substitute(i, names, row)).collect())
        }
        Form::Set(items) => Form::Set(items.iter().map(|i| substitute(i, names, row)).collect()),
        Form::Map(pairs) => Form::Map(
            pairs
                .iter()
                .map(|(k, v)| (substitute(k, names, row), substitute(v, names, row)))
                .collect(),
        ),
        Form::Tagged(tag, inner) => {
            Form::Tagged(tag.clone(), Box::new(substitute(inner, names, row)))
        }
        Form::Annotated(meta, inner) => {
            Form::Annotated(meta.clone(), Box::new(substitute(inner, names, row)))
        }
        other => other.clone(),
    }
}

/// `(defrunner-main)` => a `main` function invoking every `deftest` definition
/// recorded so far in the current namespace, in definition order.
fn expand_defrunner_main(reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    if !args.is_empty() {
        return Err(err_msg!(Expand, "defrunner-main takes no arguments"));
    }
    let mut body = vec![sym("do")];
    for (short_name, def) in reg.current_ns().defs_in_order() {
        if def.test {
            body.push(call(short_name, vec![]));
        }
    }
    Ok(call(
        "def",
        vec![
            sym("main"),
            call("fn*", vec![vector(vec![]), Form::List(body)]),
        ],
    ))
}

// ============================================================================
// Class-producing macros
// ============================================================================

/// Parsed tail shared by `reify` and `deftype`: interface symbols, an
/// optional `:extends (Super args...)`, `^:mixin` symbols, and method forms.
struct ClassTail {
    extends: Option<Form>,
    implements: Vec<Form>,
    mixins: Vec<Form>,
    methods: Vec<Form>,
}

fn parse_class_tail(items: &[Form], macro_name: &str) -> Result<ClassTail, YantraError> {
    let mut tail = ClassTail {
        extends: None,
        implements: Vec::new(),
        mixins: Vec::new(),
        methods: Vec::new(),
    };
    let mut i = 0;
    while i < items.len() {
        let item = &items[i];
        match item.unwrapped() {
            Form::Keyword(k) if k.name == "extends" => {
                let Some(parent) = items.get(i + 1) else {
                    return Err(err_msg!(Expand, "{}: :extends requires a superclass form", macro_name));
                };
                tail.extends = Some(parent.clone());
                i += 2;
            }
            Form::Symbol(_) => {
                let (_, meta) = item.strip_meta();
                if meta.is_some_and(|m| m.flag("mixin")) {
                    tail.mixins.push(item.unwrapped().clone());
                } else {
                    tail.implements.push(item.unwrapped().clone());
                }
                i += 1;
            }
            Form::List(_) => {
                tail.methods.push(item.clone());
                i += 1;
            }
            other => {
                return Err(err_msg!(
                    Expand,
                    "{}: unexpected form {} in class body",
                    macro_name,
                    other.pretty()
                ));
            }
        }
    }
    Ok(tail)
}

fn class_tail_forms(tail: ClassTail) -> Vec<Form> {
    let mut out = Vec::new();
    if let Some(parent) = tail.extends {
        out.push(kw("extends"));
        out.push(parent);
    }
    if !tail.implements.is_empty() {
        out.push(kw("implements"));
        out.push(Form::Vector(tail.implements));
    }
    if !tail.mixins.is_empty() {
        out.push(kw("mixins"));
        out.push(Form::Vector(tail.mixins));
    }
    out.extend(tail.methods);
    out
}

/// `(reify Iface (m [this] ...) ...)` => `(reify* :implements [Iface] ...)`
fn expand_reify(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let tail = parse_class_tail(args, "reify")?;
    let mut items = vec![sym("reify*")];
    items.extend(class_tail_forms(tail));
    Ok(Form::List(items))
}

/// `(deftype Name [fields] specs...)` => the `deftype*` class plus the
/// positional factory `->Name`.
fn expand_deftype(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let [name_form, fields_form, rest @ ..] = args else {
        return Err(err_msg!(Expand, "deftype expects a name and a field vector"));
    };
    let name = expect_symbol(name_form, "the type name", "deftype")?.clone();
    let Some(fields) = fields_form.as_vector() else {
        return Err(err_msg!(Expand, "deftype expects a vector of fields"));
    };

    let tail = parse_class_tail(rest, "deftype")?;
    let mut deftype_star = vec![
        sym("deftype*"),
        Form::Symbol(name.clone()),
        Form::Vector(fields.to_vec()),
    ];
    deftype_star.extend(class_tail_forms(tail));

    // Positional factory over the bare field names.
    let field_syms: Vec<Form> = fields
        .iter()
        .map(|f| Ok(Form::Symbol(expect_symbol(f, "a field", "deftype")?.clone())))
        .collect::<Result<_, YantraError>>()?;
    let mut ctor_call = vec![sym("new"), Form::Symbol(name.clone())];
    ctor_call.extend(field_syms.iter().cloned());
    let factory = call(
        "def",
        vec![
            Form::Symbol(Symbol::simple(format!("->{}", name.name))),
            call(
                "fn*",
                vec![Form::Vector(field_syms), Form::List(ctor_call)],
            ),
        ],
    );

    Ok(call("do", vec![Form::List(deftype_star), factory]))
}

/// `(definterface IName (m [a b]) ...)` => an abstract `deftype*` whose
/// methods have a prepended receiver and no body.
fn expand_definterface(_reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let [name_form, sigs @ ..] = args else {
        return Err(err_msg!(Expand, "definterface expects a name"));
    };
    let name = expect_symbol(name_form, "the interface name", "definterface")?.clone();

    let mut items = vec![
        sym("deftype*"),
        Form::Symbol(name),
        Form::Vector(vec![]),
        kw("abstract"),
        boolean(true),
    ];
    for sig in sigs {
        let Some(parts) = sig.as_list() else {
            return Err(err_msg!(
                Expand,
                "definterface expects method signatures, got {}",
                sig.pretty()
            ));
        };
        let [method_name, params] = parts else {
            return Err(err_msg!(
                Expand,
                "definterface signature must be (name [params]), got {}",
                sig.pretty()
            ));
        };
        let Some(param_syms) = params.as_vector() else {
            return Err(err_msg!(Expand, "definterface signature needs a parameter vector"));
        };
        let mut with_receiver = vec![sym("this")];
        with_receiver.extend_from_slice(param_syms);
        items.push(Form::List(vec![
            method_name.clone(),
            Form::Vector(with_receiver),
        ]));
    }
    Ok(Form::List(items))
}

/// `(defprotocol P (m [this] [this a]) ...)` synthesizes the marker class,
/// the per-method dispatch functions, and the protocol method table.
fn expand_defprotocol(reg: &mut NamespaceRegistry, args: &[Form]) -> Result<Form, YantraError> {
    let [name_form, rest @ ..] = args else {
        return Err(err_msg!(Expand, "defprotocol expects a name"));
    };
    let proto = expect_symbol(name_form, "the protocol name", "defprotocol")?.clone();
    // Skip an optional doc string.
    let sigs = match rest.first() {
        Some(Form::Str(_)) => &rest[1..],
        _ => rest,
    };

    let mut info = ProtocolInfo::default();
    let mut marker_methods: Vec<Form> = Vec::new();
    let mut dispatch_defs: Vec<Form> = Vec::new();

    for sig in sigs {
        let Some(parts) = sig.as_list() else {
            return Err(err_msg!(
                Expand,
                "defprotocol expects method signatures, got {}",
                sig.pretty()
            ));
        };
        let Some((method_form, sig_tail)) = parts.split_first() else {
            return Err(err_msg!(Expand, "defprotocol signature cannot be empty"));
        };
        let method = expect_symbol(method_form, "a method name", "defprotocol")?.clone();

        let mut arity_bodies: Vec<Form> = Vec::new();
        let mut arities = info.methods.remove(&method.name).unwrap_or_default();
        for param_form in sig_tail {
            // A trailing string is a doc string.
            if param_form.as_str().is_some() {
                continue;
            }
            let Some(params) = param_form.as_vector() else {
                return Err(err_msg!(
                    Expand,
                    "defprotocol signature for '{}' expects parameter vectors",
                    method
                ));
            };
            if params.is_empty() {
                return Err(err_msg!(
                    Expand,
                    "defprotocol method '{}' needs a receiver parameter",
                    method
                ));
            }
            let names: Vec<String> = params
                .iter()
                .map(|p| Ok(expect_symbol(p, "a parameter", "defprotocol")?.name.clone()))
                .collect::<Result<_, YantraError>>()?;
            let arity = names.len();
            let dart_name = format!("{}${}", munge(&method.name), arity - 1);
            arities.insert(
                arity,
                ProtocolMethod {
                    dart_name: dart_name.clone(),
                    params: names.clone(),
                },
            );

            // Marker class declares the target method abstractly.
            marker_methods.push(Form::List(vec![
                with_flag("dart", sym(&dart_name)),
                Form::Vector(params.to_vec()),
            ]));

            // One dispatch arity: (if (is? x P) (. x m$k args) (throw ...)).
            let receiver = sym(&names[0]);
            let mut direct = vec![sym("."), receiver.clone(), sym(&dart_name)];
            direct.extend(names[1..].iter().map(|n| sym(n)));
            let fallback = throw_new(
                "UnsupportedError",
                concat(
                    string(format!(
                        "No implementation of method '{}' of protocol '{}' for: ",
                        method.name, proto.name
                    )),
                    to_string(receiver.clone()),
                ),
            );
            let body = call(
                "if",
                vec![
                    call("is?", vec![receiver, Form::Symbol(proto.clone())]),
                    Form::List(direct),
                    fallback,
                ],
            );
            arity_bodies.push(Form::List(vec![Form::Vector(params.to_vec()), body]));
        }

        if arity_bodies.is_empty() {
            return Err(err_msg!(
                Expand,
                "defprotocol method '{}' declares no arity",
                method
            ));
        }
        info.methods.insert(method.name.clone(), arities);

        let mut fn_form = vec![sym("fn*")];
        fn_form.extend(arity_bodies);
        dispatch_defs.push(call(
            "def",
            vec![Form::Symbol(method.clone()), Form::List(fn_form)],
        ));
    }

    reg.record_protocol(&proto.name, info);

    let mut marker = vec![
        sym("deftype*"),
        Form::Symbol(proto),
        Form::Vector(vec![]),
        kw("abstract"),
        boolean(true),
    ];
    marker.extend(marker_methods);

    let mut result = vec![sym("do"), Form::List(marker)];
    result.extend(dispatch_defs);
    Ok(Form::List(result))
}
