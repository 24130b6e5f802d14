//! Function lowering.
//!
//! A function with a single fixed body, no self-name, and no variadic arity
//! lowers to a plain [`FnDef`]. Anything else becomes an invoke-style class:
//! an object implementing the runtime's `IFn` interface with one method per
//! arity, a canonical `$_invoke$vararg` body, fixed-arity trampolines, a
//! packed-rest `$_invoke_more` entry, and a Dart-callable `call` method that
//! selects an arity by comparing optional slots against the `missingArg`
//! sentinel.

use std::collections::{BTreeMap, HashSet};

use crate::form::{Form, Symbol};
use crate::registry::CallConv;
use crate::{err_msg, YantraError};

use super::classes::{ClassDef, CtorParam, FieldDef, MethodDef, MethodKind};
use super::ir::{
    Arg, AssignTarget, Binding, DartType, FnDef, Ident, IdentScope, Ir, LoopBinding, OptKind,
};
use super::{check_recur_tail, Analyzer, Env};

/// The call-site arity boundary: at and above it, arguments are packed for
/// dispatch through `$_invoke_more`.
pub const INVOKE_ARITY_THRESHOLD: usize = 10;

/// The arity-indexed method name for direct positional dispatch.
pub fn invoke_name(arity: usize) -> String {
    if arity < INVOKE_ARITY_THRESHOLD {
        format!("$_invoke${arity}")
    } else {
        format!("$_invoke$ext{arity}")
    }
}

// ============================================================================
// SHAPE PARSING
// ============================================================================

/// One arity of a `fn*` form, still as surface forms.
#[derive(Debug, Clone, PartialEq)]
pub struct ArityForm {
    pub params: Vec<Form>,
    pub body: Vec<Form>,
}

/// The parsed outline of a `fn*` form.
#[derive(Debug, Clone, PartialEq)]
pub struct FnShape {
    pub self_name: Option<Symbol>,
    pub arities: Vec<ArityForm>,
}

impl FnShape {
    /// Plain functions have one arity, no variadic rest, and no self-name.
    pub fn is_plain(&self) -> bool {
        self.self_name.is_none()
            && self.arities.len() == 1
            && !params_have_rest(&self.arities[0].params)
    }
}

fn params_have_rest(params: &[Form]) -> bool {
    params
        .iter()
        .any(|p| matches!(p.as_symbol(), Some(s) if s.is_simple() && s.name == "&"))
}

/// Parses the outline of a `fn*` form. Returns `None` when the form is not a
/// `fn*` list at all.
pub fn fn_form_shape(form: &Form) -> Option<FnShape> {
    let items = form.as_list()?;
    if form.head_symbol().map(|s| s.name.as_str()) != Some("fn*") {
        return None;
    }
    fn_shape_from_items(items)
}

fn fn_shape_from_items(items: &[Form]) -> Option<FnShape> {
    let mut rest = &items[1..];
    let mut self_name = None;
    if let Some(Form::Symbol(s)) = rest.first().map(Form::unwrapped) {
        self_name = Some(s.clone());
        rest = &rest[1..];
    }
    match rest.first().map(Form::unwrapped) {
        Some(Form::Vector(params)) => Some(FnShape {
            self_name,
            arities: vec![ArityForm {
                params: params.clone(),
                body: rest[1..].to_vec(),
            }],
        }),
        _ => {
            let mut arities = Vec::new();
            for arity_form in rest {
                let parts = arity_form.as_list()?;
                let Some(Form::Vector(params)) = parts.first().map(Form::unwrapped) else {
                    return None;
                };
                arities.push(ArityForm {
                    params: params.clone(),
                    body: parts[1..].to_vec(),
                });
            }
            if arities.is_empty() {
                return None;
            }
            Some(FnShape { self_name, arities })
        }
    }
}

// ============================================================================
// PARAMETER PARSING
// ============================================================================

#[derive(Debug, Clone)]
struct ParsedParams {
    fixed: Vec<Form>,
    rest: Option<Form>,
    opt_kind: Option<OptKind>,
    opts: Vec<(Form, Option<Form>)>,
}

/// Splits a parameter vector at the `&` (variadic rest) and `.&` (Dart
/// optionals) markers.
fn parse_params(params: &[Form]) -> Result<ParsedParams, YantraError> {
    let mut parsed = ParsedParams {
        fixed: Vec::new(),
        rest: None,
        opt_kind: None,
        opts: Vec::new(),
    };
    let mut i = 0;
    while i < params.len() {
        let marker = params[i]
            .as_symbol()
            .filter(|s| s.is_simple())
            .map(|s| s.name.as_str());
        match marker {
            Some("&") => {
                let Some(rest) = params.get(i + 1) else {
                    return Err(err_msg!(Analyze, "& must be followed by a rest parameter"));
                };
                if i + 2 != params.len() {
                    return Err(err_msg!(Analyze, "the rest parameter must come last"));
                }
                parsed.rest = Some(rest.clone());
                return Ok(parsed);
            }
            Some(".&") => {
                return parse_opt_params(&params[i + 1..], parsed);
            }
            _ => {
                parsed.fixed.push(params[i].clone());
                i += 1;
            }
        }
    }
    Ok(parsed)
}

fn parse_opt_params(
    opts: &[Form],
    mut parsed: ParsedParams,
) -> Result<ParsedParams, YantraError> {
    // A single map form declares named optionals; otherwise positional.
    if let [Form::Map(entries)] = opts {
        parsed.opt_kind = Some(OptKind::Named);
        for (name, default) in entries {
            let default = if default == &Form::Nil {
                None
            } else {
                Some(default.clone())
            };
            parsed.opts.push((name.clone(), default));
        }
        return Ok(parsed);
    }
    parsed.opt_kind = Some(OptKind::Positional);
    for opt in opts {
        match opt.unwrapped() {
            Form::Symbol(_) => parsed.opts.push((opt.clone(), None)),
            Form::List(pair) if pair.len() == 2 => {
                parsed.opts.push((pair[0].clone(), Some(pair[1].clone())));
            }
            other => {
                return Err(err_msg!(
                    Analyze,
                    "optional parameter must be a symbol or (symbol default), got {}",
                    other.pretty()
                ));
            }
        }
    }
    Ok(parsed)
}

/// Binds one parameter form to a fresh local identifier.
fn bind_param(
    anal: &mut Analyzer,
    scope: &mut Env,
    form: &Form,
) -> Result<Ident, YantraError> {
    let (inner, meta) = form.strip_meta();
    let Form::Symbol(sym) = inner else {
        return Err(err_msg!(Analyze, "parameter must be a symbol, got {}", form.pretty()));
    };
    let ty = anal.tag_of_meta(meta)?;
    let ident = anal.fresh_ident(&sym.name).with_ty(ty);
    scope.insert(Symbol::simple(sym.name.clone()), ident.clone());
    Ok(ident)
}

// ============================================================================
// PLAIN FUNCTIONS
// ============================================================================

/// Lowers a single-arity, non-variadic `fn*` body.
pub fn analyze_plain_fn(
    anal: &mut Analyzer,
    env: &Env,
    shape: &FnShape,
    ret: Option<DartType>,
) -> Result<FnDef, YantraError> {
    let arity = &shape.arities[0];
    let parsed = parse_params(&arity.params)?;

    let mut scope = env.clone();
    let mut params = Vec::new();
    for form in &parsed.fixed {
        params.push(bind_param(anal, &mut scope, form)?);
    }
    let mut opt_params = Vec::new();
    for (form, default) in &parsed.opts {
        let default = match default {
            Some(d) => Some(anal.analyze(env, d)?),
            None => None,
        };
        let ident = bind_param(anal, &mut scope, form)?;
        opt_params.push((ident, default));
    }

    let total = params.len() + opt_params.len();
    let body = anal.with_recur_arity(total, |a| a.analyze_do(&scope, &arity.body))?;
    let body = wrap_recur_loop(body, params.iter().chain(opt_params.iter().map(|(i, _)| i)))?;

    Ok(FnDef {
        params,
        opt_kind: parsed.opt_kind,
        opt_params,
        ret,
        body,
    })
}

/// Wraps a body in a parameter-rebinding loop when it contains `recur`.
fn wrap_recur_loop<'a>(
    body: Ir,
    params: impl Iterator<Item = &'a Ident>,
) -> Result<Ir, YantraError> {
    if check_recur_tail(&body, true)? {
        Ok(Ir::Loop {
            bindings: params
                .map(|ident| LoopBinding {
                    ident: ident.clone(),
                    init: None,
                })
                .collect(),
            body: Box::new(body),
        })
    } else {
        Ok(body)
    }
}

// ============================================================================
// INVOKE-STYLE OBJECTS
// ============================================================================

/// Analyzes a `fn*` in expression position.
pub fn analyze_fn_expr(
    anal: &mut Analyzer,
    env: &Env,
    items: &[Form],
) -> Result<Ir, YantraError> {
    let Some(shape) = fn_shape_from_items(items) else {
        return Err(err_msg!(Analyze, "malformed fn* form"));
    };
    if shape.is_plain() {
        let fndef = analyze_plain_fn(anal, env, &shape, None)?;
        return Ok(Ir::Fun(Box::new(fndef)));
    }

    let class_name = anal.class_name("Fn");
    let (class, closure) = analyze_invoke_fn(anal, env, &shape, class_name.clone())?;
    anal.classes.push(class);
    let args = closure.into_iter().map(|id| Arg::Pos(Ir::Id(id))).collect();
    Ok(Ir::New {
        class: class_name,
        args,
    })
}

/// Lowers a multi-arity or variadic `fn*` into an invoke-style class.
/// Returns the class and its closure (captured locals, in first-use order).
pub fn analyze_invoke_fn(
    anal: &mut Analyzer,
    env: &Env,
    shape: &FnShape,
    class_name: String,
) -> Result<(ClassDef, Vec<Ident>), YantraError> {
    let t = INVOKE_ARITY_THRESHOLD;
    let mut scope = env.clone();
    if let Some(self_name) = &shape.self_name {
        scope.insert(
            Symbol::simple(self_name.name.clone()),
            Ident::this(CallConv::Invoke),
        );
    }

    // Fixed arities and at most one variadic body.
    let mut fixed: BTreeMap<usize, MethodDef> = BTreeMap::new();
    let mut vararg: Option<(usize, MethodDef)> = None;
    for arity_form in &shape.arities {
        let parsed = parse_params(&arity_form.params)?;
        if parsed.opt_kind.is_some() {
            return Err(err_msg!(
                Analyze,
                "optional parameters are not supported in multi-arity functions"
            ));
        }

        let mut method_scope = scope.clone();
        let mut params = Vec::new();
        for form in &parsed.fixed {
            params.push(bind_param(anal, &mut method_scope, form)?);
        }

        match &parsed.rest {
            None => {
                let k = params.len();
                if fixed.contains_key(&k) {
                    return Err(err_msg!(Analyze, "duplicate arity {} in fn*", k));
                }
                let body =
                    anal.with_recur_arity(k, |a| a.analyze_do(&method_scope, &arity_form.body))?;
                let body = wrap_recur_loop(body, params.iter())?;
                fixed.insert(
                    k,
                    MethodDef::normal(invoke_name(k), params, body),
                );
            }
            Some(rest_form) => {
                if vararg.is_some() {
                    return Err(err_msg!(Analyze, "fn* can have only one variadic arity"));
                }
                let base = params.len();
                let rest = bind_param(anal, &mut method_scope, rest_form)?;
                params.push(rest);
                let body = anal
                    .with_recur_arity(base + 1, |a| a.analyze_do(&method_scope, &arity_form.body))?;
                let body = wrap_recur_loop(body, params.iter())?;
                vararg = Some((
                    base,
                    MethodDef::normal("$_invoke$vararg".to_string(), params, body),
                ));
            }
        }
    }

    let max_fixed = fixed.keys().max().copied();
    if let (Some((base, _)), Some(max)) = (&vararg, max_fixed) {
        if max > *base {
            return Err(err_msg!(
                Analyze,
                "fixed arity {} exceeds the variadic base arity {}",
                max,
                base
            ));
        }
    }

    // Trampolines: fixed-arity entries that pack an empty or short rest and
    // forward into the canonical variadic body.
    let mut trampolines: BTreeMap<usize, MethodDef> = BTreeMap::new();
    if let Some((base, _)) = &vararg {
        let base = *base;
        let limit = max_fixed.map_or(t, |m| t.max(m + 1));
        for k in base..limit {
            if fixed.contains_key(&k) {
                continue;
            }
            let params: Vec<Ident> = (0..k).map(|_| anal.fresh_ident("x")).collect();
            let mut args: Vec<Arg> = params[..base]
                .iter()
                .cloned()
                .map(|p| Arg::Pos(Ir::Id(p)))
                .collect();
            args.push(Arg::Pos(pack_rest(anal, &params[base..])));
            let body = this_invoke("$_invoke$vararg", args);
            trampolines.insert(k, MethodDef::normal(invoke_name(k), params, body));
        }
    }

    let more = build_invoke_more(anal, &fixed, &vararg)?;
    let call = build_call_method(anal, &fixed, &trampolines);

    let mut methods: Vec<MethodDef> = Vec::new();
    let mut direct: BTreeMap<usize, MethodDef> = fixed;
    direct.extend(trampolines);
    methods.extend(direct.into_values());
    if let Some((_, vararg_method)) = vararg {
        methods.push(vararg_method);
    }
    methods.push(more);
    methods.extend(call);

    let closure = free_locals(&methods);
    let fields = closure
        .iter()
        .map(|id| FieldDef {
            name: id.name.clone(),
            ty: id.ty.clone(),
            mutable: false,
        })
        .collect();
    let ctor_params = closure
        .iter()
        .map(|id| CtorParam::Field(id.name.clone()))
        .collect();

    let class = ClassDef {
        name: class_name,
        abstract_: false,
        extends: None,
        implements: vec![anal.registry.runtime_ref("IFn")],
        mixins: Vec::new(),
        fields,
        ctor_params,
        super_ctor: None,
        methods,
        need_nsm: true,
    };
    Ok((class, closure))
}

/// `this.<method>(args)`
fn this_invoke(method: &str, args: Vec<Arg>) -> Ir {
    Ir::MethodCall {
        obj: Box::new(Ir::Id(Ident::this(CallConv::Unknown))),
        method: method.to_string(),
        args,
    }
}

/// Packs extra positional parameters into a runtime list value.
fn pack_rest(anal: &mut Analyzer, extras: &[Ident]) -> Ir {
    if extras.is_empty() {
        return Ir::Id(Ident::global(
            anal.registry.runtime_ref("emptyList"),
            CallConv::Unknown,
        ));
    }
    Ir::Call {
        callee: Box::new(Ir::Id(Ident::global(
            anal.registry.runtime_ref("list"),
            CallConv::Native,
        ))),
        args: extras.iter().map(|p| Arg::Pos(Ir::Id(p.clone()))).collect(),
    }
}

fn rest_index(rest: &Ident, i: usize) -> Ir {
    Ir::MethodCall {
        obj: Box::new(Ir::Id(rest.clone())),
        method: "[]".to_string(),
        args: vec![Arg::Pos(Ir::Int(i as i64))],
    }
}

fn throw_bad_arity() -> Ir {
    Ir::Let {
        bindings: vec![Binding {
            ident: None,
            value: Ir::Throw(Box::new(Ir::New {
                class: "ArgumentError".to_string(),
                args: vec![Arg::Pos(Ir::Str("wrong number of arguments".to_string()))],
            })),
        }],
        body: Box::new(Ir::Nil),
    }
}

/// `$_invoke_more` receives T-1 positionals plus a packed rest and either
/// redispatches to a matching `$_invoke$ext` or unpacks into the variadic
/// body.
fn build_invoke_more(
    anal: &mut Analyzer,
    fixed: &BTreeMap<usize, MethodDef>,
    vararg: &Option<(usize, MethodDef)>,
) -> Result<MethodDef, YantraError> {
    let t = INVOKE_ARITY_THRESHOLD;
    let xs: Vec<Ident> = (0..t - 1).map(|_| anal.fresh_ident("x")).collect();
    let rest = anal.fresh_ident("rest");

    let default = match vararg {
        None => throw_bad_arity(),
        Some((base, _)) => {
            let base = *base;
            let mut args: Vec<Arg> = Vec::new();
            if base <= t - 1 {
                args.extend(xs[..base].iter().map(|x| Arg::Pos(Ir::Id(x.clone()))));
                if base == t - 1 {
                    args.push(Arg::Pos(Ir::Id(rest.clone())));
                } else {
                    let packed = pack_rest(anal, &xs[base..]);
                    args.push(Arg::Pos(Ir::Call {
                        callee: Box::new(Ir::Id(Ident::global(
                            anal.registry.runtime_ref("listConcat"),
                            CallConv::Native,
                        ))),
                        args: vec![Arg::Pos(packed), Arg::Pos(Ir::Id(rest.clone()))],
                    }));
                }
            } else {
                // The variadic base reaches past the packed boundary: pull
                // the missing positionals out of the rest list.
                let extra = base - (t - 1);
                args.extend(xs.iter().map(|x| Arg::Pos(Ir::Id(x.clone()))));
                for i in 0..extra {
                    args.push(Arg::Pos(rest_index(&rest, i)));
                }
                args.push(Arg::Pos(Ir::Call {
                    callee: Box::new(Ir::Id(Ident::global(
                        anal.registry.runtime_ref("listDrop"),
                        CallConv::Native,
                    ))),
                    args: vec![Arg::Pos(Ir::Id(rest.clone())), Arg::Pos(Ir::Int(extra as i64))],
                }));
            }
            this_invoke("$_invoke$vararg", args)
        }
    };

    let ext_arities: Vec<usize> = fixed.keys().copied().filter(|k| *k >= t).collect();
    let body = if ext_arities.is_empty() {
        default
    } else {
        let clauses = ext_arities
            .iter()
            .map(|k| {
                let mut args: Vec<Arg> =
                    xs.iter().map(|x| Arg::Pos(Ir::Id(x.clone()))).collect();
                for i in 0..(k - (t - 1)) {
                    args.push(Arg::Pos(rest_index(&rest, i)));
                }
                super::ir::CaseClause {
                    values: vec![Ir::Int((k - (t - 1)) as i64)],
                    body: this_invoke(&invoke_name(*k), args),
                }
            })
            .collect();
        Ir::Case {
            scrut: Box::new(Ir::FieldGet {
                obj: Box::new(Ir::Id(rest.clone())),
                field: "length".to_string(),
            }),
            clauses,
            default: Box::new(default),
        }
    };

    let mut params = xs;
    params.push(rest);
    Ok(MethodDef::normal("$_invoke_more".to_string(), params, body))
}

/// The Dart-callable `call` method: required params up to the smallest
/// supported arity, optional slots defaulting to the `missingArg` sentinel,
/// and a dispatch chain that picks the first unfilled slot.
fn build_call_method(
    anal: &mut Analyzer,
    fixed: &BTreeMap<usize, MethodDef>,
    trampolines: &BTreeMap<usize, MethodDef>,
) -> Option<MethodDef> {
    let t = INVOKE_ARITY_THRESHOLD;
    let covered: HashSet<usize> = fixed
        .keys()
        .chain(trampolines.keys())
        .copied()
        .filter(|k| *k < t)
        .collect();
    let min_arity = covered.iter().min().copied()?;
    let max_arity = covered.iter().max().copied()?;

    let params: Vec<Ident> = (0..max_arity).map(|_| anal.fresh_ident("p")).collect();
    let missing = Ident::global(anal.registry.runtime_ref("missingArg"), CallConv::Unknown);

    let dispatch_to = |k: usize| -> Ir {
        if covered.contains(&k) {
            let args = params[..k].iter().map(|p| Arg::Pos(Ir::Id(p.clone()))).collect();
            this_invoke(&invoke_name(k), args)
        } else {
            throw_bad_arity()
        }
    };

    let mut body = dispatch_to(max_arity);
    for k in (min_arity..max_arity).rev() {
        let test = Ir::MethodCall {
            obj: Box::new(Ir::Id(params[k].clone())),
            method: "==".to_string(),
            args: vec![Arg::Pos(Ir::Id(missing.clone()))],
        };
        body = Ir::If {
            test: Box::new(test),
            then: Box::new(dispatch_to(k)),
            els: Box::new(body),
        };
    }

    let required = params[..min_arity].to_vec();
    let opt_params = params[min_arity..]
        .iter()
        .map(|p| (p.clone(), Some(Ir::Id(missing.clone()))))
        .collect();
    Some(MethodDef {
        name: "call".to_string(),
        kind: MethodKind::Normal,
        params: required,
        opt_kind: Some(OptKind::Positional),
        opt_params,
        ret: None,
        body: Some(body),
    })
}

// ============================================================================
// FREE-VARIABLE ANALYSIS
// ============================================================================

/// The closure of a method set: locals referenced by the bodies but bound
/// outside them. Identifier names are unique per top-level form, so a simple
/// used-minus-bound subtraction suffices.
pub fn free_locals(methods: &[MethodDef]) -> Vec<Ident> {
    let mut used: Vec<Ident> = Vec::new();
    let mut bound: HashSet<String> = HashSet::new();
    for method in methods {
        for p in method.params.iter().chain(method.opt_params.iter().map(|(p, _)| p)) {
            bound.insert(p.name.clone());
        }
        for (_, default) in &method.opt_params {
            if let Some(d) = default {
                collect_used(d, &mut used);
                collect_bound(d, &mut bound);
            }
        }
        if let Some(body) = &method.body {
            collect_used(body, &mut used);
            collect_bound(body, &mut bound);
        }
    }

    let mut seen = HashSet::new();
    used.into_iter()
        .filter(|id| {
            id.scope == IdentScope::Local
                && !bound.contains(&id.name)
                && seen.insert(id.name.clone())
        })
        .collect()
}

fn collect_used(ir: &Ir, out: &mut Vec<Ident>) {
    match ir {
        Ir::Id(id) => out.push(id.clone()),
        Ir::DartList(items) => items.iter().for_each(|i| collect_used(i, out)),
        Ir::Let { bindings, body } => {
            bindings.iter().for_each(|b| collect_used(&b.value, out));
            collect_used(body, out);
        }
        Ir::If { test, then, els } => {
            collect_used(test, out);
            collect_used(then, out);
            collect_used(els, out);
        }
        Ir::Loop { bindings, body } => {
            bindings
                .iter()
                .filter_map(|b| b.init.as_ref())
                .for_each(|i| collect_used(i, out));
            collect_used(body, out);
        }
        Ir::Recur { args } => args.iter().for_each(|a| collect_used(a, out)),
        Ir::Fun(f) => {
            f.opt_params
                .iter()
                .filter_map(|(_, d)| d.as_ref())
                .for_each(|d| collect_used(d, out));
            collect_used(&f.body, out);
        }
        Ir::Case {
            scrut,
            clauses,
            default,
        } => {
            collect_used(scrut, out);
            clauses.iter().for_each(|c| collect_used(&c.body, out));
            collect_used(default, out);
        }
        Ir::Try {
            body,
            catches,
            finally,
        } => {
            collect_used(body, out);
            catches.iter().for_each(|c| collect_used(&c.body, out));
            if let Some(f) = finally {
                collect_used(f, out);
            }
        }
        Ir::Throw(e) => collect_used(e, out),
        Ir::MethodCall { obj, args, .. } => {
            collect_used(obj, out);
            args.iter().for_each(|a| collect_used(a.ir(), out));
        }
        Ir::FieldGet { obj, .. } => collect_used(obj, out),
        Ir::Assign { target, value } => {
            match target {
                AssignTarget::Ident(id) => out.push(id.clone()),
                AssignTarget::Field { obj, .. } => collect_used(obj, out),
            }
            collect_used(value, out);
        }
        Ir::New { args, .. } => args.iter().for_each(|a| collect_used(a.ir(), out)),
        Ir::Is { expr, .. } | Ir::Cast { expr, .. } | Ir::Hinted { expr, .. } => {
            collect_used(expr, out);
        }
        Ir::Call { callee, args } => {
            collect_used(callee, out);
            args.iter().for_each(|a| collect_used(a.ir(), out));
        }
        _ => {}
    }
}

fn collect_bound(ir: &Ir, out: &mut HashSet<String>) {
    match ir {
        Ir::Let { bindings, body } => {
            for b in bindings {
                if let Some(id) = &b.ident {
                    out.insert(id.name.clone());
                }
                collect_bound(&b.value, out);
            }
            collect_bound(body, out);
        }
        Ir::If { test, then, els } => {
            collect_bound(test, out);
            collect_bound(then, out);
            collect_bound(els, out);
        }
        Ir::Loop { bindings, body } => {
            for b in bindings {
                out.insert(b.ident.name.clone());
                if let Some(i) = &b.init {
                    collect_bound(i, out);
                }
            }
            collect_bound(body, out);
        }
        Ir::Recur { args } | Ir::DartList(args) => {
            args.iter().for_each(|a| collect_bound(a, out));
        }
        Ir::Fun(f) => {
            for p in f.params.iter().chain(f.opt_params.iter().map(|(p, _)| p)) {
                out.insert(p.name.clone());
            }
            f.opt_params
                .iter()
                .filter_map(|(_, d)| d.as_ref())
                .for_each(|d| collect_bound(d, out));
            collect_bound(&f.body, out);
        }
        Ir::Case {
            scrut,
            clauses,
            default,
        } => {
            collect_bound(scrut, out);
            clauses.iter().for_each(|c| collect_bound(&c.body, out));
            collect_bound(default, out);
        }
        Ir::Try {
            body,
            catches,
            finally,
        } => {
            collect_bound(body, out);
            for c in catches {
                out.insert(c.exn.name.clone());
                if let Some(st) = &c.stack {
                    out.insert(st.name.clone());
                }
                collect_bound(&c.body, out);
            }
            if let Some(f) = finally {
                collect_bound(f, out);
            }
        }
        Ir::Throw(e) => collect_bound(e, out),
        Ir::MethodCall { obj, args, .. } => {
            collect_bound(obj, out);
            args.iter().for_each(|a| collect_bound(a.ir(), out));
        }
        Ir::FieldGet { obj, .. } => collect_bound(obj, out),
        Ir::Assign { target, value } => {
            if let AssignTarget::Field { obj, .. } = target {
                collect_bound(obj, out);
            }
            collect_bound(value, out);
        }
        Ir::New { args, .. } => args.iter().for_each(|a| collect_bound(a.ir(), out)),
        Ir::Is { expr, .. } | Ir::Cast { expr, .. } | Ir::Hinted { expr, .. } => {
            collect_bound(expr, out);
        }
        Ir::Call { callee, args } => {
            collect_bound(callee, out);
            args.iter().for_each(|a| collect_bound(a.ir(), out));
        }
        _ => {}
    }
}
