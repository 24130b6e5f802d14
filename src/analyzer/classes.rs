//! Class assembly for `reify*` and `deftype*`.
//!
//! Both produce a [`ClassDef`]: name, parent, interfaces, mixins, typed
//! fields, constructor parameters, an optional super-constructor call, and
//! methods. For `reify*` the fields are the closure set computed from the
//! method bodies, and constructor parameters combine captured values with
//! explicit parent-constructor arguments.
//!
//! Method names resolve against the protocol tables of the implemented
//! interfaces; a `^:dart` flag on the method name takes it verbatim (used by
//! the protocol marker classes, whose method names are already targets).

use crate::form::{Form, Symbol};
use crate::registry::CallConv;
use crate::{err_msg, YantraError};

use super::functions::free_locals;
use super::ir::{Arg, DartType, Ident, Ir, OptKind};
use super::{check_recur_tail, let_node, Analyzer, Env};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Option<DartType>,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CtorParam {
    /// `this.<field>` initializing parameter.
    Field(String),
    /// A plain parameter, forwarded to the super constructor.
    Plain(Ident),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuperCtor {
    /// Named constructor, when the parent form spelled `Super.name`.
    pub ctor: Option<String>,
    pub args: Vec<Ir>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Normal,
    Getter,
    Setter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub kind: MethodKind,
    pub params: Vec<Ident>,
    pub opt_kind: Option<OptKind>,
    pub opt_params: Vec<(Ident, Option<Ir>)>,
    pub ret: Option<DartType>,
    /// `None` is an abstract method.
    pub body: Option<Ir>,
}

impl MethodDef {
    pub fn normal(name: String, params: Vec<Ident>, body: Ir) -> Self {
        Self {
            name,
            kind: MethodKind::Normal,
            params,
            opt_kind: None,
            opt_params: Vec::new(),
            ret: None,
            body: Some(body),
        }
    }
}

/// A fully assembled class, ready for the class writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub abstract_: bool,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub mixins: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub ctor_params: Vec<CtorParam>,
    pub super_ctor: Option<SuperCtor>,
    pub methods: Vec<MethodDef>,
    pub need_nsm: bool,
}

// ============================================================================
// CLASS BODY PARSING
// ============================================================================

struct ClassSpec {
    extends: Option<Form>,
    implements: Vec<Symbol>,
    mixins: Vec<Symbol>,
    abstract_: bool,
    methods: Vec<Form>,
}

fn parse_class_spec(items: &[Form]) -> Result<ClassSpec, YantraError> {
    let mut spec = ClassSpec {
        extends: None,
        implements: Vec::new(),
        mixins: Vec::new(),
        abstract_: false,
        methods: Vec::new(),
    };
    let mut i = 0;
    while i < items.len() {
        match items[i].unwrapped() {
            Form::Keyword(k) => {
                let Some(value) = items.get(i + 1) else {
                    return Err(err_msg!(Analyze, "class option :{} is missing a value", k.name));
                };
                match k.name.as_str() {
                    "extends" => spec.extends = Some(value.clone()),
                    "abstract" => spec.abstract_ = value == &Form::Bool(true),
                    "implements" | "mixins" => {
                        let Some(syms) = value.as_vector() else {
                            return Err(err_msg!(
                                Analyze,
                                "class option :{} expects a vector of symbols",
                                k.name
                            ));
                        };
                        let target = if k.name == "implements" {
                            &mut spec.implements
                        } else {
                            &mut spec.mixins
                        };
                        for s in syms {
                            let Some(sym) = s.as_symbol() else {
                                return Err(err_msg!(
                                    Analyze,
                                    "class option :{} expects symbols, got {}",
                                    k.name,
                                    s.pretty()
                                ));
                            };
                            target.push(sym.clone());
                        }
                    }
                    other => {
                        return Err(err_msg!(Analyze, "unknown class option :{}", other));
                    }
                }
                i += 2;
            }
            Form::List(_) => {
                spec.methods.push(items[i].clone());
                i += 1;
            }
            other => {
                return Err(err_msg!(
                    Analyze,
                    "unexpected form {} in class body",
                    other.pretty()
                ));
            }
        }
    }
    Ok(spec)
}

/// Splits a parent symbol `Super.named` into the class symbol and the named
/// constructor.
fn split_super(sym: &Symbol) -> (Symbol, Option<String>) {
    match sym.name.split_once('.') {
        Some((base, ctor)) => (
            Symbol {
                ns: sym.ns.clone(),
                name: base.to_string(),
            },
            Some(ctor.to_string()),
        ),
        None => (sym.clone(), None),
    }
}

// ============================================================================
// METHODS
// ============================================================================

/// Resolves the emitted name for a class method: a `^:dart` flag keeps it
/// verbatim; otherwise the implemented protocols are consulted by name and
/// arity, falling back to plain mangling.
fn resolve_method_name(
    anal: &mut Analyzer,
    name: &Symbol,
    verbatim: bool,
    arity_with_receiver: usize,
    implements: &[(Symbol, String)],
) -> String {
    if verbatim {
        return name.name.clone();
    }
    for (proto_sym, _) in implements {
        if let Ok(found) =
            anal.registry
                .resolve_protocol_method(proto_sym, &name.name, arity_with_receiver)
        {
            return found.dart_name;
        }
    }
    crate::mangle::munge(&name.name)
}

fn analyze_method(
    anal: &mut Analyzer,
    env: &Env,
    form: &Form,
    implements: &[(Symbol, String)],
) -> Result<MethodDef, YantraError> {
    let Some(parts) = form.as_list() else {
        return Err(err_msg!(Analyze, "method form must be a list"));
    };
    let [name_form, params_form, body_forms @ ..] = parts else {
        return Err(err_msg!(
            Analyze,
            "method form needs a name and parameters, got {}",
            form.pretty()
        ));
    };
    let (name_inner, meta) = name_form.strip_meta();
    let Form::Symbol(name_sym) = name_inner else {
        return Err(err_msg!(Analyze, "method name must be a symbol"));
    };
    let verbatim = meta.is_some_and(|m| m.flag("dart"));
    let getter = meta.is_some_and(|m| m.flag("getter"));
    let setter = meta.is_some_and(|m| m.flag("setter"));
    let ret = anal.tag_of_meta(meta)?;

    let Some(param_forms) = params_form.as_vector() else {
        return Err(err_msg!(
            Analyze,
            "method '{}' needs a parameter vector with a receiver",
            name_sym
        ));
    };
    let Some((receiver_form, rest_params)) = param_forms.split_first() else {
        return Err(err_msg!(
            Analyze,
            "method '{}' needs a receiver parameter",
            name_sym
        ));
    };
    let Some(receiver) = receiver_form.as_symbol() else {
        return Err(err_msg!(Analyze, "method receiver must be a symbol"));
    };

    let mut scope = env.clone();
    scope.insert(
        Symbol::simple(receiver.name.clone()),
        Ident::this(CallConv::Unknown),
    );
    let mut params = Vec::new();
    for p in rest_params {
        let (inner, p_meta) = p.strip_meta();
        let Form::Symbol(p_sym) = inner else {
            return Err(err_msg!(Analyze, "method parameter must be a symbol, got {}", p.pretty()));
        };
        let ty = anal.tag_of_meta(p_meta)?;
        let ident = anal.fresh_ident(&p_sym.name).with_ty(ty);
        scope.insert(Symbol::simple(p_sym.name.clone()), ident.clone());
        params.push(ident);
    }

    let name = resolve_method_name(anal, name_sym, verbatim, param_forms.len(), implements);
    let kind = match (getter, setter) {
        (true, _) => MethodKind::Getter,
        (_, true) => MethodKind::Setter,
        _ => MethodKind::Normal,
    };

    let body = if body_forms.is_empty() {
        None
    } else {
        let arity = params.len();
        let body = anal.with_recur_arity(arity, |a| a.analyze_do(&scope, body_forms))?;
        let body = if check_recur_tail(&body, true)? {
            Ir::Loop {
                bindings: params
                    .iter()
                    .map(|ident| super::ir::LoopBinding {
                        ident: ident.clone(),
                        init: None,
                    })
                    .collect(),
                body: Box::new(body),
            }
        } else {
            body
        };
        Some(body)
    };

    Ok(MethodDef {
        name,
        kind,
        params,
        opt_kind: None,
        opt_params: Vec::new(),
        ret,
        body,
    })
}

fn resolve_implements(
    anal: &mut Analyzer,
    syms: &[Symbol],
) -> Result<Vec<(Symbol, String)>, YantraError> {
    syms.iter()
        .map(|s| Ok((s.clone(), anal.resolve_class(s)?)))
        .collect()
}

fn has_no_such_method(methods: &[MethodDef]) -> bool {
    methods.iter().any(|m| m.name == "noSuchMethod")
}

// ============================================================================
// deftype*
// ============================================================================

/// `(deftype* Name [fields] opts... methods...)` at the top level.
pub fn analyze_deftype(
    anal: &mut Analyzer,
    env: &Env,
    items: &[Form],
    dart_name: &str,
) -> Result<ClassDef, YantraError> {
    let Some(field_forms) = items.get(2).and_then(Form::as_vector) else {
        return Err(err_msg!(Analyze, "deftype* requires a field vector"));
    };

    let mut scope = env.clone();
    let mut fields = Vec::new();
    for field_form in field_forms {
        let (inner, meta) = field_form.strip_meta();
        let Form::Symbol(sym) = inner else {
            return Err(err_msg!(Analyze, "deftype* field must be a symbol, got {}", field_form.pretty()));
        };
        let ty = anal.tag_of_meta(meta)?;
        let mutable = meta.is_some_and(|m| m.flag("mutable"));
        let name = crate::mangle::munge(&sym.name);
        let mut ident = Ident::member(name.clone(), mutable);
        ident.ty = ty.clone();
        scope.insert(Symbol::simple(sym.name.clone()), ident);
        fields.push(FieldDef { name, ty, mutable });
    }

    let spec = parse_class_spec(&items[3..])?;
    let implements = resolve_implements(anal, &spec.implements)?;
    let mixins = spec
        .mixins
        .iter()
        .map(|s| anal.resolve_class(s))
        .collect::<Result<Vec<_>, _>>()?;

    // Parent constructor arguments see the constructor parameters (the
    // fields) in scope.
    let (extends, super_ctor) = match &spec.extends {
        None => (None, None),
        Some(parent) => match parent.unwrapped() {
            Form::Symbol(s) => {
                let (base, ctor) = split_super(s);
                let class = anal.resolve_class(&base)?;
                (Some(class), ctor.map(|c| SuperCtor { ctor: Some(c), args: Vec::new() }))
            }
            Form::List(parts) => {
                let Some((head, arg_forms)) = parts.split_first() else {
                    return Err(err_msg!(Analyze, "empty :extends form"));
                };
                let Some(head_sym) = head.as_symbol() else {
                    return Err(err_msg!(Analyze, ":extends requires a class symbol"));
                };
                let (base, ctor) = split_super(head_sym);
                let class = anal.resolve_class(&base)?;
                let args = arg_forms
                    .iter()
                    .map(|f| anal.analyze(&scope, f))
                    .collect::<Result<Vec<_>, _>>()?;
                (Some(class), Some(SuperCtor { ctor, args }))
            }
            other => {
                return Err(err_msg!(Analyze, ":extends must be a symbol or a call, got {}", other.pretty()));
            }
        },
    };

    let methods = spec
        .methods
        .iter()
        .map(|m| analyze_method(anal, &scope, m, &implements))
        .collect::<Result<Vec<_>, _>>()?;

    let need_nsm = !implements.is_empty() && !has_no_such_method(&methods);
    let abstract_ = spec.abstract_ || methods.iter().any(|m| m.body.is_none());
    let ctor_params = fields
        .iter()
        .map(|f| CtorParam::Field(f.name.clone()))
        .collect();

    Ok(ClassDef {
        name: dart_name.to_string(),
        abstract_,
        extends,
        implements: implements.into_iter().map(|(_, c)| c).collect(),
        mixins,
        fields,
        ctor_params,
        super_ctor,
        methods,
        need_nsm,
    })
}

// ============================================================================
// reify*
// ============================================================================

/// `(reify* opts... methods...)` in expression position: hoists an anonymous
/// class whose fields are the closure set, and returns the construction.
pub fn analyze_reify(anal: &mut Analyzer, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
    let spec = parse_class_spec(&items[1..])?;
    let implements = resolve_implements(anal, &spec.implements)?;
    let mixins = spec
        .mixins
        .iter()
        .map(|s| anal.resolve_class(s))
        .collect::<Result<Vec<_>, _>>()?;

    let (extends, super_arg_irs, super_ctor_name) = match &spec.extends {
        None => (None, Vec::new(), None),
        Some(parent) => match parent.unwrapped() {
            Form::Symbol(s) => {
                let (base, ctor) = split_super(s);
                (Some(anal.resolve_class(&base)?), Vec::new(), ctor)
            }
            Form::List(parts) => {
                let Some((head, arg_forms)) = parts.split_first() else {
                    return Err(err_msg!(Analyze, "empty :extends form"));
                };
                let Some(head_sym) = head.as_symbol() else {
                    return Err(err_msg!(Analyze, ":extends requires a class symbol"));
                };
                let (base, ctor) = split_super(head_sym);
                let class = anal.resolve_class(&base)?;
                // Evaluated at the construction site, in the outer scope.
                let args = arg_forms
                    .iter()
                    .map(|f| anal.analyze(env, f))
                    .collect::<Result<Vec<_>, _>>()?;
                (Some(class), args, ctor)
            }
            other => {
                return Err(err_msg!(Analyze, ":extends must be a symbol or a call, got {}", other.pretty()));
            }
        },
    };

    let mut methods = Vec::new();
    for m in &spec.methods {
        let method = analyze_method(anal, env, m, &implements)?;
        if method.body.is_none() {
            return Err(err_msg!(Analyze, "reify method '{}' needs a body", method.name));
        }
        methods.push(method);
    }

    let closure = free_locals(&methods);
    let fields: Vec<FieldDef> = closure
        .iter()
        .map(|id| FieldDef {
            name: id.name.clone(),
            ty: id.ty.clone(),
            mutable: false,
        })
        .collect();

    let mut ctor_params: Vec<CtorParam> = closure
        .iter()
        .map(|id| CtorParam::Field(id.name.clone()))
        .collect();
    let mut super_param_refs = Vec::new();
    for _ in &super_arg_irs {
        let param = anal.fresh_ident("s");
        super_param_refs.push(Ir::Id(param.clone()));
        ctor_params.push(CtorParam::Plain(param));
    }
    let super_ctor = if super_ctor_name.is_some() || !super_param_refs.is_empty() {
        Some(SuperCtor {
            ctor: super_ctor_name,
            args: super_param_refs,
        })
    } else {
        None
    };

    let need_nsm = !implements.is_empty() && !has_no_such_method(&methods);
    let class_name = anal.class_name("Reify");
    anal.classes.push(ClassDef {
        name: class_name.clone(),
        abstract_: false,
        extends,
        implements: implements.into_iter().map(|(_, c)| c).collect(),
        mixins,
        fields,
        ctor_params,
        super_ctor,
        methods,
        need_nsm,
    });

    let mut args: Vec<Arg> = closure.into_iter().map(|id| Arg::Pos(Ir::Id(id))).collect();
    args.extend(super_arg_irs.into_iter().map(Arg::Pos));
    let (bindings, args) = anal.lift_args(args);
    Ok(let_node(
        bindings,
        Ir::New {
            class: class_name,
            args,
        },
    ))
}
