//! The analyzer: lowers expanded surface forms into IR.
//!
//! Analysis is head-symbol dispatch over the fixed special forms with a
//! fallback to plain calls. Lexical environments are persistent maps from
//! source symbols to [`ir::Ident`]s; the gensym counters live on the
//! [`Analyzer`] and are scoped to one top-level form (constructing the
//! analyzer opens the scope, dropping it closes it — analysis outside an
//! analyzer is unrepresentable).
//!
//! Cross-cutting concerns here: A-normalization (`lift_*`), truthiness-aware
//! test handling, recur validation, and the top-level `def`/`deftype*`
//! entry points the driver uses.

pub mod classes;
pub mod functions;
pub mod ir;

use std::collections::HashMap;

use crate::form::{Form, Keyword, Meta, Symbol};
use crate::macros::{expand, MacroTable};
use crate::mangle::{self, munge};
use crate::registry::{CallConv, DefKind, Definition, NamespaceRegistry};
use crate::{err_msg, YantraError};

use self::classes::ClassDef;
use self::ir::{
    Arg, AssignTarget, Binding, CaseClause, CatchClause, DartType, FnDef, Ident, IdentScope, Ir,
    LoopBinding, Truth,
};

/// Lexical environment: source symbol → identifier.
pub type Env = im::HashMap<Symbol, ir::Ident>;

/// Whether `recur` is currently meaningful, and at what arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecurState {
    None,
    /// Inside a `try`; recur may not cross it.
    Barred,
    Allowed(usize),
}

pub struct Analyzer<'r> {
    pub registry: &'r mut NamespaceRegistry,
    macros: &'r MacroTable,
    /// Hoisted-class name prefix: the enclosing definition's Dart name.
    owner: String,
    counters: HashMap<String, u32>,
    /// Classes synthesized while analyzing the current top-level form.
    pub classes: Vec<ClassDef>,
    recur: RecurState,
}

impl<'r> Analyzer<'r> {
    /// Opens a fresh gensym scope for one top-level form.
    pub fn new(registry: &'r mut NamespaceRegistry, macros: &'r MacroTable, owner: &str) -> Self {
        Self {
            registry,
            macros,
            owner: owner.to_string(),
            counters: HashMap::new(),
            classes: Vec::new(),
            recur: RecurState::None,
        }
    }

    // ------------------------------------------------------------------------
    // Gensym
    // ------------------------------------------------------------------------

    /// A fresh name `hint$N` from an already-mangled hint.
    fn fresh_raw(&mut self, hint: &str) -> String {
        let n = self.counters.entry(hint.to_string()).or_insert(0);
        *n += 1;
        format!("{hint}${n}")
    }

    /// A fresh name derived from a source-symbol hint.
    pub fn fresh(&mut self, source_hint: &str) -> String {
        let hint = mangle::hint(source_hint);
        self.fresh_raw(&hint)
    }

    pub fn fresh_ident(&mut self, source_hint: &str) -> Ident {
        Ident::local(self.fresh(source_hint))
    }

    /// A file-unique name for a hoisted class.
    pub fn class_name(&mut self, kind: &str) -> String {
        let hint = format!("{}${}", self.owner, kind);
        self.fresh_raw(&hint)
    }

    fn with_recur<T>(
        &mut self,
        state: RecurState,
        f: impl FnOnce(&mut Self) -> Result<T, YantraError>,
    ) -> Result<T, YantraError> {
        let saved = std::mem::replace(&mut self.recur, state);
        let result = f(self);
        self.recur = saved;
        result
    }

    /// Runs `f` with recur allowed at the given arity (function and loop
    /// bodies).
    pub fn with_recur_arity<T>(
        &mut self,
        arity: usize,
        f: impl FnOnce(&mut Self) -> Result<T, YantraError>,
    ) -> Result<T, YantraError> {
        self.with_recur(RecurState::Allowed(arity), f)
    }

    // ------------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------------

    pub fn analyze(&mut self, env: &Env, form: &Form) -> Result<Ir, YantraError> {
        let expanded = expand(self.registry, self.macros, env, form)?;
        let (inner, meta) = expanded.strip_meta();
        let ir = self.analyze_inner(env, inner)?;
        match self.tag_of_meta(meta)? {
            Some(ty) => Ok(apply_tag(ir, ty)),
            None => Ok(ir),
        }
    }

    fn analyze_inner(&mut self, env: &Env, form: &Form) -> Result<Ir, YantraError> {
        match form {
            Form::Nil => Ok(Ir::Nil),
            Form::Bool(b) => Ok(Ir::Bool(*b)),
            Form::Int(i) => Ok(Ir::Int(*i)),
            Form::Float(n) => Ok(Ir::Float(*n)),
            Form::Str(s) => Ok(Ir::Str(s.clone())),
            Form::Keyword(k) => Ok(self.keyword_literal(k)),
            Form::Symbol(s) => self.resolve_ident(env, s).map(Ir::Id),
            Form::Vector(items) => self.aggregate(env, "PersistentVector.fromList", items),
            Form::Set(items) => self.aggregate(env, "PersistentHashSet.fromList", items),
            Form::Map(pairs) => {
                let flat: Vec<Form> = pairs
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.aggregate(env, "PersistentHashMap.fromPairs", &flat)
            }
            Form::Tagged(tag, _) => Err(err_msg!(
                Analyze,
                "unsupported literal: #{} has no compile-time reading",
                tag
            )),
            Form::Annotated(_, inner) => self.analyze_inner(env, inner),
            Form::List(items) if items.is_empty() => {
                Ok(Ir::Id(self.rt_global("emptyList")))
            }
            Form::List(items) => self.analyze_seq(env, items),
        }
    }

    fn analyze_seq(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let head = items[0].as_symbol().filter(|s| s.is_simple());
        let Some(head) = head else {
            return self.analyze_call(env, items);
        };
        match head.name.as_str() {
            "do" => self.analyze_do(env, &items[1..]),
            "let*" => self.analyze_let(env, items),
            "loop*" => self.analyze_loop(env, items),
            "recur" => self.analyze_recur(env, items),
            "if" => self.analyze_if(env, items),
            "fn*" => functions::analyze_fn_expr(self, env, items),
            "quote" => self.analyze_quote(items),
            "case*" => self.analyze_case(env, items),
            "try" => self.analyze_try(env, items),
            "throw" => self.analyze_throw(env, items),
            "new" => self.analyze_new(env, items),
            "." => self.analyze_dot(env, items),
            "set!" => self.analyze_set(env, items),
            "is?" => self.analyze_is(env, items),
            "reify*" => classes::analyze_reify(self, env, items),
            "def" => Err(err_msg!(Analyze, "def is only supported at the top level")),
            "ns" => Err(err_msg!(Analyze, "ns is only supported at the top level")),
            "deftype*" => Err(err_msg!(
                Analyze,
                "deftype* is only supported at the top level"
            )),
            _ => self.analyze_call(env, items),
        }
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    fn resolve_ident(&mut self, env: &Env, sym: &Symbol) -> Result<Ident, YantraError> {
        if sym.is_simple() {
            if let Some(ident) = env.get(sym) {
                return Ok(ident.clone());
            }
        }
        let resolved = self.registry.resolve_global(sym)?;
        Ok(Ident::global(resolved.dart_name, resolved.conv))
    }

    /// Resolves a class-position symbol to its emitted Dart name, keeping a
    /// trailing `.namedCtor` segment intact.
    pub fn resolve_class(&mut self, sym: &Symbol) -> Result<String, YantraError> {
        if let Some(ns_part) = &sym.ns {
            let current = self.registry.current_ns();
            if let Some(import_alias) = current.aliases.get(ns_part) {
                return Ok(format!("{import_alias}.{}", sym.name));
            }
            if self.registry.namespace(ns_part).is_some() {
                return Ok(self.registry.resolve_global(sym)?.dart_name);
            }
            return Err(err_msg!(Resolve, "unknown symbol '{}'", sym));
        }

        let (base, ctor) = match sym.name.split_once('.') {
            Some((base, ctor)) => (base, Some(ctor)),
            None => (sym.name.as_str(), None),
        };
        let resolved = if NamespaceRegistry::is_builtin_type(base) {
            base.to_string()
        } else if let Some(def) = self.registry.current_ns().lookup(base) {
            if def.kind != DefKind::Class {
                return Err(err_msg!(Resolve, "unknown symbol '{}': not a class", sym));
            }
            def.dart_name.clone()
        } else {
            return Err(err_msg!(Resolve, "unknown symbol '{}'", sym));
        };
        Ok(match ctor {
            Some(ctor) => format!("{resolved}.{ctor}"),
            None => resolved,
        })
    }

    /// Resolves the `:tag` entry of a metadata map, when present.
    pub fn tag_of_meta(&mut self, meta: Option<&Meta>) -> Result<Option<DartType>, YantraError> {
        let Some(meta) = meta else { return Ok(None) };
        let tag = match meta.get("tag") {
            None => return Ok(None),
            Some(Form::Symbol(s)) => match &s.ns {
                Some(ns) => format!("{}.{}", ns, s.name),
                None => s.name.clone(),
            },
            Some(Form::Str(s)) => s.clone(),
            Some(other) => {
                return Err(err_msg!(
                    Resolve,
                    "unknown type tag {}: tags are symbols or strings",
                    other.pretty()
                ));
            }
        };
        let resolved = self.registry.resolve_type(&tag)?;
        Ok(Some(DartType(resolved.dart_name)))
    }

    fn rt_global(&mut self, name: &str) -> Ident {
        Ident::global(self.registry.runtime_ref(name), CallConv::Native)
    }

    fn keyword_literal(&mut self, k: &Keyword) -> Ir {
        let callee = Ir::Id(self.rt_global("Keyword.intern"));
        let ns = match &k.ns {
            Some(ns) => Ir::Str(ns.clone()),
            None => Ir::Nil,
        };
        Ir::Call {
            callee: Box::new(callee),
            args: vec![Arg::Pos(ns), Arg::Pos(Ir::Str(k.name.clone()))],
        }
    }

    // ------------------------------------------------------------------------
    // A-normalization
    // ------------------------------------------------------------------------

    fn temp_binding(&mut self, ir: Ir, hint: &str) -> (Vec<Binding>, Ir) {
        // Temporaries stay `var`; the truth classification carries the inference.
        let ident = self.fresh_ident(hint).with_truth(ir.truth());
        (
            vec![Binding {
                ident: Some(ident.clone()),
                value: ir,
            }],
            Ir::Id(ident),
        )
    }

    /// Returns `(bindings, operand)`. Lets hoist their bindings; branching
    /// nodes always move into a temporary; other non-atomic operands move
    /// only when `force` is set (an operand to their right already bound).
    pub fn lift_operand(&mut self, ir: Ir, hint: &str, force: bool) -> (Vec<Binding>, Ir) {
        match ir {
            Ir::Let { bindings, body } => {
                let (tail_bindings, atom) = self.lift_operand(*body, hint, force);
                let mut all = bindings;
                all.extend(tail_bindings);
                (all, atom)
            }
            Ir::Hinted { ty, expr } => {
                let (bindings, atom) = self.lift_operand(*expr, hint, force);
                (
                    bindings,
                    Ir::Hinted {
                        ty,
                        expr: Box::new(atom),
                    },
                )
            }
            ir @ (Ir::If { .. } | Ir::Case { .. } | Ir::Try { .. } | Ir::Loop { .. }) => {
                self.temp_binding(ir, hint)
            }
            ir if ir.is_atomic() => (Vec::new(), ir),
            ir if force => self.temp_binding(ir, hint),
            ir => (Vec::new(), ir),
        }
    }

    /// Like [`Self::lift_operand`] but the result is always atomic.
    pub fn lift_to_atom(&mut self, ir: Ir, hint: &str) -> (Vec<Binding>, Ir) {
        let (mut bindings, atom) = self.lift_operand(ir, hint, false);
        if atom.is_atomic() {
            (bindings, atom)
        } else {
            let (extra, id) = self.temp_binding(atom, hint);
            bindings.extend(extra);
            (bindings, id)
        }
    }

    /// Lifts an argument list right to left: once any argument required a
    /// binding, every non-atomic argument before it moves to a temporary as
    /// well, and binding order ends up matching source order.
    pub fn lift_args(&mut self, mut args: Vec<Arg>) -> (Vec<Binding>, Vec<Arg>) {
        let mut bindings: Vec<Binding> = Vec::new();
        let mut force = false;
        for arg in args.iter_mut().rev() {
            let ir = std::mem::replace(arg.ir_mut(), Ir::Nil);
            let (arg_bindings, atom) = self.lift_operand(ir, "t", force);
            if !arg_bindings.is_empty() {
                force = true;
            }
            *arg.ir_mut() = atom;
            let mut merged = arg_bindings;
            merged.extend(bindings.drain(..));
            bindings = merged;
        }
        (bindings, args)
    }

    // ------------------------------------------------------------------------
    // Special forms
    // ------------------------------------------------------------------------

    pub fn analyze_do(&mut self, env: &Env, forms: &[Form]) -> Result<Ir, YantraError> {
        let Some((last, init)) = forms.split_last() else {
            return Ok(Ir::Nil);
        };
        let mut bindings = Vec::new();
        for form in init {
            bindings.push(Binding {
                ident: None,
                value: self.analyze(env, form)?,
            });
        }
        let body = self.analyze(env, last)?;
        Ok(let_node(bindings, body))
    }

    fn analyze_bindings(
        &mut self,
        env: &Env,
        vec_form: &Form,
        mutable: bool,
    ) -> Result<(Env, Vec<(Ident, Ir)>), YantraError> {
        let Some(pairs) = vec_form.as_vector() else {
            return Err(err_msg!(Analyze, "bindings must be a vector"));
        };
        if pairs.len() % 2 != 0 {
            return Err(err_msg!(Analyze, "bindings vector must hold name/value pairs"));
        }
        let mut scope = env.clone();
        let mut out = Vec::new();
        for pair in pairs.chunks(2) {
            let (name_inner, meta) = pair[0].strip_meta();
            let Form::Symbol(sym) = name_inner else {
                return Err(err_msg!(
                    Analyze,
                    "binding name must be a symbol, got {}",
                    pair[0].pretty()
                ));
            };
            let value = self.analyze(&scope, &pair[1])?;
            let ty = self.tag_of_meta(meta)?;
            let truth = match value.truth() {
                Truth::Unknown => ty.as_ref().map(|t| t.truth()).unwrap_or(Truth::Unknown),
                t => t,
            };
            let mut ident = self.fresh_ident(&sym.name).with_ty(ty).with_truth(truth);
            ident.mutable = mutable;
            scope.insert(Symbol::simple(sym.name.clone()), ident.clone());
            out.push((ident, value));
        }
        Ok((scope, out))
    }

    fn analyze_let(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let Some(vec_form) = items.get(1) else {
            return Err(err_msg!(Analyze, "let* requires a bindings vector"));
        };
        let (scope, pairs) = self.analyze_bindings(env, vec_form, false)?;
        let bindings = pairs
            .into_iter()
            .map(|(ident, value)| Binding {
                ident: Some(ident),
                value,
            })
            .collect();
        let body = self.analyze_do(&scope, &items[2..])?;
        Ok(let_node(bindings, body))
    }

    fn analyze_loop(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let Some(vec_form) = items.get(1) else {
            return Err(err_msg!(Analyze, "loop* requires a bindings vector"));
        };
        let (scope, pairs) = self.analyze_bindings(env, vec_form, true)?;
        let arity = pairs.len();
        let body = self.with_recur_arity(arity, |a| a.analyze_do(&scope, &items[2..]))?;
        check_recur_tail(&body, true)?;
        Ok(Ir::Loop {
            bindings: pairs
                .into_iter()
                .map(|(ident, init)| LoopBinding {
                    ident,
                    init: Some(init),
                })
                .collect(),
            body: Box::new(body),
        })
    }

    fn analyze_recur(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        match self.recur {
            RecurState::None => {
                return Err(err_msg!(Analyze, "recur outside of loop or function"));
            }
            RecurState::Barred => {
                return Err(err_msg!(Analyze, "recur across try boundary"));
            }
            RecurState::Allowed(arity) => {
                if arity != items.len() - 1 {
                    return Err(err_msg!(
                        Analyze,
                        "recur arity mismatch: expected {} argument(s), got {}",
                        arity,
                        items.len() - 1
                    ));
                }
            }
        }
        let mut args = Vec::new();
        for form in &items[1..] {
            args.push(Arg::Pos(self.analyze(env, form)?));
        }
        let (bindings, args) = self.lift_args(args);
        let args = args
            .into_iter()
            .map(|a| match a {
                Arg::Pos(ir) => ir,
                Arg::Named(_, ir) => ir,
            })
            .collect();
        Ok(let_node(bindings, Ir::Recur { args }))
    }

    fn analyze_if(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        if items.len() < 3 || items.len() > 4 {
            return Err(err_msg!(Analyze, "if requires a test, a then, and an optional else"));
        }
        let test = self.analyze(env, &items[1])?;
        // A boolean test is referenced once and may stay inline; a dynamic
        // test is referenced by both halves of the truthiness check.
        let (bindings, test) = if test.truth() == Truth::Boolean {
            self.lift_operand(test, "t", false)
        } else {
            self.lift_to_atom(test, "t")
        };
        let then = self.analyze(env, &items[2])?;
        let els = match items.get(3) {
            Some(form) => self.analyze(env, form)?,
            None => Ir::Nil,
        };
        Ok(let_node(
            bindings,
            Ir::If {
                test: Box::new(test),
                then: Box::new(then),
                els: Box::new(els),
            },
        ))
    }

    fn analyze_quote(&mut self, items: &[Form]) -> Result<Ir, YantraError> {
        let Some(form) = items.get(1) else {
            return Err(err_msg!(Analyze, "quote requires a form"));
        };
        self.quote_form(form)
    }

    fn quote_form(&mut self, form: &Form) -> Result<Ir, YantraError> {
        match form {
            Form::Nil => Ok(Ir::Nil),
            Form::Bool(b) => Ok(Ir::Bool(*b)),
            Form::Int(i) => Ok(Ir::Int(*i)),
            Form::Float(n) => Ok(Ir::Float(*n)),
            Form::Str(s) => Ok(Ir::Str(s.clone())),
            Form::Keyword(k) => Ok(self.keyword_literal(k)),
            Form::Symbol(s) => {
                let callee = Ir::Id(self.rt_global("Symbol.intern"));
                let ns = match &s.ns {
                    Some(ns) => Ir::Str(ns.clone()),
                    None => Ir::Nil,
                };
                Ok(Ir::Call {
                    callee: Box::new(callee),
                    args: vec![Arg::Pos(ns), Arg::Pos(Ir::Str(s.name.clone()))],
                })
            }
            Form::List(items) => {
                let quoted: Vec<Arg> = items
                    .iter()
                    .map(|i| self.quote_form(i).map(Arg::Pos))
                    .collect::<Result<_, _>>()?;
                Ok(Ir::Call {
                    callee: Box::new(Ir::Id(self.rt_global("list"))),
                    args: quoted,
                })
            }
            Form::Vector(items) => self.quote_aggregate("PersistentVector.fromList", items),
            Form::Set(items) => self.quote_aggregate("PersistentHashSet.fromList", items),
            Form::Map(pairs) => {
                let flat: Vec<Form> = pairs
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.quote_aggregate("PersistentHashMap.fromPairs", &flat)
            }
            Form::Tagged(tag, _) => Err(err_msg!(
                Analyze,
                "unsupported literal: #{} cannot be quoted",
                tag
            )),
            Form::Annotated(_, inner) => self.quote_form(inner),
        }
    }

    fn quote_aggregate(&mut self, factory: &str, items: &[Form]) -> Result<Ir, YantraError> {
        let quoted: Vec<Ir> = items
            .iter()
            .map(|i| self.quote_form(i))
            .collect::<Result<_, _>>()?;
        Ok(Ir::Call {
            callee: Box::new(Ir::Id(self.rt_global(factory))),
            args: vec![Arg::Pos(Ir::DartList(quoted))],
        })
    }

    fn analyze_case(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        if items.len() < 3 {
            return Err(err_msg!(Analyze, "case* requires a scrutinee and a default"));
        }
        let scrut = self.analyze(env, &items[1])?;
        let default = self.analyze(env, &items[items.len() - 1])?;
        let mut clauses = Vec::new();
        for clause_form in &items[2..items.len() - 1] {
            let Some([values_form, body_form]) = clause_form.as_list() else {
                return Err(err_msg!(
                    Analyze,
                    "case* clause must be (values expr), got {}",
                    clause_form.pretty()
                ));
            };
            let Some(value_forms) = values_form.as_list() else {
                return Err(err_msg!(Analyze, "case* clause values must be a list"));
            };
            let values = value_forms
                .iter()
                .map(|v| self.case_literal(v))
                .collect::<Result<_, _>>()?;
            clauses.push(CaseClause {
                values,
                body: self.analyze(env, body_form)?,
            });
        }
        Ok(Ir::Case {
            scrut: Box::new(scrut),
            clauses,
            default: Box::new(default),
        })
    }

    fn case_literal(&self, form: &Form) -> Result<Ir, YantraError> {
        match form.unwrapped() {
            Form::Nil => Ok(Ir::Nil),
            Form::Bool(b) => Ok(Ir::Bool(*b)),
            Form::Int(i) => Ok(Ir::Int(*i)),
            Form::Str(s) => Ok(Ir::Str(s.clone())),
            other => Err(err_msg!(
                Analyze,
                "unsupported literal in case clause: {}",
                other.pretty()
            )),
        }
    }

    /// Parses a try form. A symbol immediately after the exception binding is
    /// read as the stack-trace binding when more forms follow it.
    fn analyze_try(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let mut body_forms: Vec<Form> = Vec::new();
        let mut catch_forms: Vec<&[Form]> = Vec::new();
        let mut finally_forms: Option<&[Form]> = None;
        for item in &items[1..] {
            match item.head_symbol().map(|s| s.name.as_str()) {
                Some("catch") => {
                    catch_forms.push(item.as_list().expect("head implies list"));
                }
                Some("finally") => {
                    finally_forms = Some(&item.as_list().expect("head implies list")[1..]);
                }
                _ => body_forms.push(item.clone()),
            }
        }

        self.with_recur(RecurState::Barred, |a| {
            let body = a.analyze_do(env, &body_forms)?;
            let mut catches = Vec::new();
            for parts in catch_forms {
                catches.push(a.analyze_catch(env, parts)?);
            }
            let finally = match finally_forms {
                Some(forms) => Some(Box::new(a.analyze_do(env, forms)?)),
                None => None,
            };
            Ok(Ir::Try {
                body: Box::new(body),
                catches,
                finally,
            })
        })
    }

    fn analyze_catch(&mut self, env: &Env, parts: &[Form]) -> Result<CatchClause, YantraError> {
        let [_, class_form, exn_form, rest @ ..] = parts else {
            return Err(err_msg!(Analyze, "catch requires a class and a binding"));
        };
        let Some(class_sym) = class_form.as_symbol() else {
            return Err(err_msg!(Analyze, "catch class must be a symbol"));
        };
        let class = DartType(self.resolve_class(&class_sym.clone())?);
        let Some(exn_sym) = exn_form.as_symbol() else {
            return Err(err_msg!(Analyze, "catch binding must be a symbol"));
        };

        let mut exn = self.fresh_ident(&exn_sym.name).with_truth(Truth::Some);
        if !class.is_nullable() {
            exn.ty = Some(class.clone());
        }
        let mut scope = env.clone();
        scope.insert(Symbol::simple(exn_sym.name.clone()), exn.clone());

        let (stack, body_forms) = match rest {
            [Form::Symbol(st), more @ ..] if !more.is_empty() => {
                let stack = self.fresh_ident(&st.name).with_truth(Truth::Some);
                scope.insert(Symbol::simple(st.name.clone()), stack.clone());
                (Some(stack), more)
            }
            _ => (None, rest),
        };

        let body = self.analyze_do(&scope, body_forms)?;
        Ok(CatchClause {
            class,
            exn,
            stack,
            body,
        })
    }

    /// `throw` is statement-only: the analyzer wraps it in a `let` whose body
    /// is nil so that it never appears in expression position.
    fn analyze_throw(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let Some(expr_form) = items.get(1) else {
            return Err(err_msg!(Analyze, "throw requires an expression"));
        };
        let expr = self.analyze(env, expr_form)?;
        let (mut bindings, expr) = self.lift_operand(expr, "t", false);
        bindings.push(Binding {
            ident: None,
            value: Ir::Throw(Box::new(expr)),
        });
        Ok(let_node(bindings, Ir::Nil))
    }

    fn analyze_new(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let Some(class_form) = items.get(1) else {
            return Err(err_msg!(Analyze, "new requires a class"));
        };
        let Some(class_sym) = class_form.as_symbol() else {
            return Err(err_msg!(Analyze, "new requires a class symbol"));
        };
        let class = self.resolve_class(&class_sym.clone())?;
        let args = self.split_args(env, &items[2..])?;
        let (bindings, args) = self.lift_args(args);
        Ok(let_node(bindings, Ir::New { class, args }))
    }

    fn analyze_dot(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let [_, obj_form, member_form, arg_forms @ ..] = items else {
            return Err(err_msg!(Analyze, "the . form requires an object and a member"));
        };
        let Some(member) = member_form.as_symbol() else {
            return Err(err_msg!(
                Analyze,
                "the . form member must be a symbol, got {}",
                member_form.pretty()
            ));
        };
        let member_name = member.name.clone();
        let obj = self.analyze(env, obj_form)?;

        // Field read: member spelled with a leading dash. A bare `-` is the
        // minus operator, not a field.
        if let Some(field) = member_name.strip_prefix('-').filter(|f| !f.is_empty()) {
            if !arg_forms.is_empty() {
                return Err(err_msg!(Analyze, "field access .-{} takes no arguments", field));
            }
            let (bindings, obj) = self.lift_operand(obj, "t", false);
            return Ok(let_node(
                bindings,
                Ir::FieldGet {
                    obj: Box::new(obj),
                    field: field.to_string(),
                },
            ));
        }

        let args = self.split_args(env, arg_forms)?;
        let (arg_bindings, args) = self.lift_args(args);
        let (mut bindings, obj) = self.lift_operand(obj, "t", !arg_bindings.is_empty());
        bindings.extend(arg_bindings);
        Ok(let_node(
            bindings,
            Ir::MethodCall {
                obj: Box::new(obj),
                method: member_name,
                args,
            },
        ))
    }

    fn analyze_set(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let [_, target_form, value_form] = items else {
            return Err(err_msg!(Analyze, "set! requires a target and a value"));
        };
        let target_form = expand(self.registry, self.macros, env, target_form)?;

        let (mut bindings, target) = match target_form.unwrapped() {
            Form::Symbol(sym) => {
                let ident = env.get(sym).cloned();
                match ident {
                    Some(id)
                        if id.mutable
                            && matches!(id.scope, IdentScope::Local | IdentScope::Member) =>
                    {
                        (Vec::new(), AssignTarget::Ident(id))
                    }
                    _ => {
                        return Err(err_msg!(
                            Analyze,
                            "bad assignment: '{}' is not a mutable local",
                            sym
                        ));
                    }
                }
            }
            Form::List(parts)
                if parts.first().and_then(Form::as_symbol).map(|s| s.name.as_str())
                    == Some(".") =>
            {
                let [_, obj_form, member_form] = parts.as_slice() else {
                    return Err(err_msg!(Analyze, "bad assignment: malformed field target"));
                };
                let Some(member) = member_form.as_symbol() else {
                    return Err(err_msg!(Analyze, "bad assignment: field name must be a symbol"));
                };
                let Some(field) = member.name.strip_prefix('-').filter(|f| !f.is_empty()) else {
                    return Err(err_msg!(
                        Analyze,
                        "bad assignment: target must be a mutable local or a field access"
                    ));
                };
                let obj = self.analyze(env, obj_form)?;
                let (bindings, obj) = self.lift_operand(obj, "t", false);
                (
                    bindings,
                    AssignTarget::Field {
                        obj: Box::new(obj),
                        field: field.to_string(),
                    },
                )
            }
            _ => {
                return Err(err_msg!(
                    Analyze,
                    "bad assignment: target must be a mutable local or a field access"
                ));
            }
        };

        let value = self.analyze(env, value_form)?;
        let (value_bindings, value) = self.lift_operand(value, "t", false);
        bindings.extend(value_bindings);
        Ok(let_node(
            bindings,
            Ir::Assign {
                target,
                value: Box::new(value),
            },
        ))
    }

    fn analyze_is(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let [_, expr_form, type_form] = items else {
            return Err(err_msg!(Analyze, "is? requires an expression and a type"));
        };
        let Some(type_sym) = type_form.as_symbol() else {
            return Err(err_msg!(Analyze, "is? type must be a symbol"));
        };
        let ty = DartType(self.resolve_class(&type_sym.clone())?);
        let expr = self.analyze(env, expr_form)?;
        let (bindings, expr) = self.lift_operand(expr, "t", false);
        Ok(let_node(
            bindings,
            Ir::Is {
                expr: Box::new(expr),
                ty,
            },
        ))
    }

    // ------------------------------------------------------------------------
    // Calls and aggregates
    // ------------------------------------------------------------------------

    /// Splits argument forms at the `.&` sentinel into positional and named
    /// arguments, analyzing each.
    pub fn split_args(&mut self, env: &Env, forms: &[Form]) -> Result<Vec<Arg>, YantraError> {
        let mut args = Vec::new();
        let mut named = false;
        let mut i = 0;
        while i < forms.len() {
            if forms[i].is_named_args_sentinel() {
                named = true;
                i += 1;
                continue;
            }
            if named {
                let Some(kw) = forms[i].as_keyword() else {
                    return Err(err_msg!(
                        Analyze,
                        "named arguments after .& must be keyword/value pairs, got {}",
                        forms[i].pretty()
                    ));
                };
                let Some(value_form) = forms.get(i + 1) else {
                    return Err(err_msg!(Analyze, "named argument :{} is missing a value", kw.name));
                };
                let value = self.analyze(env, value_form)?;
                args.push(Arg::Named(munge(&kw.name), value));
                i += 2;
            } else {
                args.push(Arg::Pos(self.analyze(env, &forms[i])?));
                i += 1;
            }
        }
        Ok(args)
    }

    fn analyze_call(&mut self, env: &Env, items: &[Form]) -> Result<Ir, YantraError> {
        let callee = self.analyze(env, &items[0])?;
        let args = self.split_args(env, &items[1..])?;
        let (arg_bindings, args) = self.lift_args(args);
        let (mut bindings, callee) = match callee {
            id @ Ir::Id(_) => (Vec::new(), id),
            other => self.lift_to_atom(other, "f"),
        };
        bindings.extend(arg_bindings);
        Ok(let_node(
            bindings,
            Ir::Call {
                callee: Box::new(callee),
                args,
            },
        ))
    }

    fn aggregate(&mut self, env: &Env, factory: &str, items: &[Form]) -> Result<Ir, YantraError> {
        let mut args = Vec::new();
        for item in items {
            args.push(Arg::Pos(self.analyze(env, item)?));
        }
        let (bindings, args) = self.lift_args(args);
        let elems = args
            .into_iter()
            .map(|a| match a {
                Arg::Pos(ir) => ir,
                Arg::Named(_, ir) => ir,
            })
            .collect();
        let callee = Ir::Id(self.rt_global(factory));
        Ok(let_node(
            bindings,
            Ir::Call {
                callee: Box::new(callee),
                args: vec![Arg::Pos(Ir::DartList(elems))],
            },
        ))
    }
}

// ============================================================================
// IR CONSTRUCTION HELPERS
// ============================================================================

/// Builds a `let`, flattening a `let` body into one binding list.
pub fn let_node(bindings: Vec<Binding>, body: Ir) -> Ir {
    if bindings.is_empty() {
        return body;
    }
    match body {
        Ir::Let {
            bindings: inner,
            body,
        } => {
            let mut all = bindings;
            all.extend(inner);
            Ir::Let {
                bindings: all,
                body,
            }
        }
        other => Ir::Let {
            bindings,
            body: Box::new(other),
        },
    }
}

fn apply_tag(ir: Ir, ty: DartType) -> Ir {
    if ir.is_atomic() {
        Ir::Hinted {
            ty,
            expr: Box::new(ir),
        }
    } else {
        Ir::Cast {
            expr: Box::new(ir),
            ty,
        }
    }
}

/// Validates that every `recur` in the tree sits in tail position, without
/// descending into nested functions or loop bodies. Returns whether any
/// `recur` was seen.
pub fn check_recur_tail(ir: &Ir, tail: bool) -> Result<bool, YantraError> {
    let non_tail_args = |args: &[Ir]| -> Result<bool, YantraError> {
        let mut found = false;
        for arg in args {
            found |= check_recur_tail(arg, false)?;
        }
        Ok(found)
    };
    match ir {
        Ir::Recur { args } => {
            if !tail {
                return Err(err_msg!(Analyze, "recur is not in tail position"));
            }
            non_tail_args(args)?;
            Ok(true)
        }
        Ir::Let { bindings, body } => {
            let mut found = false;
            for b in bindings {
                found |= check_recur_tail(&b.value, false)?;
            }
            found |= check_recur_tail(body, tail)?;
            Ok(found)
        }
        Ir::If { test, then, els } => {
            let mut found = check_recur_tail(test, false)?;
            found |= check_recur_tail(then, tail)?;
            found |= check_recur_tail(els, tail)?;
            Ok(found)
        }
        Ir::Case {
            scrut,
            clauses,
            default,
        } => {
            let mut found = check_recur_tail(scrut, false)?;
            for clause in clauses {
                found |= check_recur_tail(&clause.body, tail)?;
            }
            found |= check_recur_tail(default, tail)?;
            Ok(found)
        }
        Ir::Loop { bindings, .. } => {
            // The loop's own body answers to the loop, not to us.
            let inits: Vec<Ir> = bindings.iter().filter_map(|b| b.init.clone()).collect();
            non_tail_args(&inits)
        }
        Ir::Fun(_) => Ok(false),
        Ir::Try {
            body,
            catches,
            finally,
        } => {
            let mut found = check_recur_tail(body, false)?;
            for c in catches {
                found |= check_recur_tail(&c.body, false)?;
            }
            if let Some(f) = finally {
                found |= check_recur_tail(f, false)?;
            }
            Ok(found)
        }
        Ir::Throw(e) => check_recur_tail(e, false),
        Ir::MethodCall { obj, args, .. } => {
            let mut found = check_recur_tail(obj, false)?;
            for a in args {
                found |= check_recur_tail(a.ir(), false)?;
            }
            Ok(found)
        }
        Ir::Call { callee, args } => {
            let mut found = check_recur_tail(callee, false)?;
            for a in args {
                found |= check_recur_tail(a.ir(), false)?;
            }
            Ok(found)
        }
        Ir::New { args, .. } => {
            let mut found = false;
            for a in args {
                found |= check_recur_tail(a.ir(), false)?;
            }
            Ok(found)
        }
        Ir::DartList(items) => non_tail_args(items),
        Ir::Assign { target, value } => {
            let mut found = check_recur_tail(value, false)?;
            if let AssignTarget::Field { obj, .. } = target {
                found |= check_recur_tail(obj, false)?;
            }
            Ok(found)
        }
        Ir::FieldGet { obj, .. } => check_recur_tail(obj, false),
        Ir::Is { expr, .. } | Ir::Cast { expr, .. } | Ir::Hinted { expr, .. } => {
            check_recur_tail(expr, false)
        }
        _ => Ok(false),
    }
}

// ============================================================================
// TOP-LEVEL ENTRY POINTS
// ============================================================================

/// What a top-level definition lowers to.
#[derive(Debug, Clone, PartialEq)]
pub enum TopBody {
    PlainFn(FnDef),
    InvokeObj(ClassDef),
    Value(Ir),
    Class(ClassDef),
}

/// A fully analyzed top-level definition, ready for emission.
#[derive(Debug, Clone, PartialEq)]
pub struct TopDef {
    pub short_name: String,
    pub dart_name: String,
    pub kind: DefKind,
    pub conv: CallConv,
    pub doc: Option<String>,
    pub test: bool,
    pub ty: Option<DartType>,
    pub body: TopBody,
    pub hoisted: Vec<ClassDef>,
}

/// Analyzes a top-level `(def ...)` form.
///
/// The definition is pre-declared before its value is analyzed so that
/// recursive references resolve. A bare `fn*` value becomes a top-level
/// function (or an invoke-style object when multi-arity or variadic);
/// anything else becomes a top-level field.
pub fn analyze_top_def(
    registry: &mut NamespaceRegistry,
    macros: &MacroTable,
    items: &[Form],
) -> Result<TopDef, YantraError> {
    let Some(name_form) = items.get(1) else {
        return Err(err_msg!(Analyze, "def requires a name"));
    };
    let (name_inner, meta) = name_form.strip_meta();
    let Form::Symbol(name_sym) = name_inner else {
        return Err(err_msg!(Analyze, "def name must be a symbol, got {}", name_form.pretty()));
    };
    let short_name = name_sym.name.clone();
    let dart_name = munge(&short_name);
    let test = meta.is_some_and(|m| m.flag("test"));

    let (doc, value_form) = match &items[2..] {
        [] => (None, None),
        [value] => (None, Some(value)),
        [doc_form, value] => {
            let Form::Str(doc) = doc_form.unwrapped() else {
                return Err(err_msg!(
                    Analyze,
                    "misplaced doc string in def of '{}': expected a string, got {}",
                    short_name,
                    doc_form.pretty()
                ));
            };
            (Some(doc.clone()), Some(value))
        }
        _ => {
            return Err(err_msg!(
                Analyze,
                "def of '{}' takes at most a doc string and a value",
                short_name
            ));
        }
    };

    let value_form = match value_form {
        Some(form) => Some(expand(registry, macros, &Env::default(), form)?),
        None => None,
    };

    let shape = value_form.as_ref().and_then(functions::fn_form_shape);
    let (kind, conv) = match &shape {
        Some(shape) if shape.is_plain() => (DefKind::DartFn, CallConv::Native),
        Some(_) => (DefKind::Field, CallConv::Invoke),
        None => (DefKind::Field, CallConv::Unknown),
    };

    // Pre-declare so the body can reference itself.
    let mut declared = Definition::declare(dart_name.clone(), kind, conv);
    declared.doc = doc.clone();
    declared.test = test;
    registry.define_current(&short_name, declared);

    let mut analyzer = Analyzer::new(registry, macros, &dart_name);
    let ty = analyzer.tag_of_meta(meta)?;
    let env = Env::default();

    let body = match (shape, value_form) {
        (Some(shape), Some(_)) if shape.is_plain() => {
            let fndef = functions::analyze_plain_fn(&mut analyzer, &env, &shape, ty.clone())?;
            TopBody::PlainFn(fndef)
        }
        (Some(shape), Some(_)) => {
            let class_name = analyzer.class_name("Fn");
            let (class, closure) =
                functions::analyze_invoke_fn(&mut analyzer, &env, &shape, class_name)?;
            if let Some(captured) = closure.first() {
                return Err(err_msg!(
                    Internal,
                    "top-level function '{}' captured local '{}'",
                    short_name,
                    captured.name
                ));
            }
            TopBody::InvokeObj(class)
        }
        (None, Some(form)) => TopBody::Value(analyzer.analyze(&env, &form)?),
        (_, None) => TopBody::Value(Ir::Nil),
    };

    let hoisted = std::mem::take(&mut analyzer.classes);
    Ok(TopDef {
        short_name,
        dart_name,
        kind,
        conv,
        doc,
        test,
        ty,
        body,
        hoisted,
    })
}

/// Analyzes a top-level `(deftype* ...)` form into a class definition.
pub fn analyze_top_deftype(
    registry: &mut NamespaceRegistry,
    macros: &MacroTable,
    items: &[Form],
) -> Result<TopDef, YantraError> {
    let Some(name_sym) = items.get(1).and_then(Form::as_symbol) else {
        return Err(err_msg!(Analyze, "deftype* requires a name symbol"));
    };
    let short_name = name_sym.name.clone();
    let dart_name = munge(&short_name);

    // Pre-declare: methods and factories may reference the class.
    let existing = registry
        .current_ns()
        .lookup(&short_name)
        .and_then(|d| d.protocol.clone());
    let mut declared = Definition::declare(dart_name.clone(), DefKind::Class, CallConv::Unknown);
    declared.protocol = existing;
    registry.define_current(&short_name, declared);

    let mut analyzer = Analyzer::new(registry, macros, &dart_name);
    let class = classes::analyze_deftype(&mut analyzer, &Env::default(), items, &dart_name)?;
    let hoisted = std::mem::take(&mut analyzer.classes);

    Ok(TopDef {
        short_name,
        dart_name,
        kind: DefKind::Class,
        conv: CallConv::Unknown,
        doc: None,
        test: false,
        ty: None,
        body: TopBody::Class(class),
        hoisted,
    })
}
