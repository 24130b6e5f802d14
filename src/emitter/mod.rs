//! The emitter: writes Dart source for IR nodes against a locus.
//!
//! Statement-shaped nodes (`let`, `if`, `loop`, `case`, `try`, `throw`,
//! `recur`) consume the locus structurally, pushing it into their tails;
//! everything else renders through the expression writer and is wrapped in
//! the locus's prefix/suffix. The variable-declaration locus splits into a
//! declaration plus per-arm assignments so branching values emit as plain
//! statements.
//!
//! Two dynamic scopes live on the emitter: the enclosing loop bindings (for
//! `recur` rebinding) and the caught-exception identifier (to choose between
//! `throw e` and `rethrow`). Both are stacks, saved and restored around
//! nested bodies.

pub mod classes;
pub mod locus;

use crate::analyzer::functions::INVOKE_ARITY_THRESHOLD;
use crate::analyzer::ir::{Arg, AssignTarget, FnDef, Ident, Ir, OptKind, Truth};
use crate::analyzer::{TopBody, TopDef};
use crate::registry::{CallConv, NamespaceRegistry};
use crate::{err_msg, YantraError};

use self::locus::Locus;

pub struct Emitter<'r> {
    pub registry: &'r mut NamespaceRegistry,
    out: String,
    /// Caught-exception identifiers, innermost last.
    caught: Vec<String>,
    /// Enclosing loop bindings, innermost last.
    loops: Vec<Vec<Ident>>,
    recur_tmp: u32,
}

// ============================================================================
// PUBLIC ENTRY POINTS
// ============================================================================

/// Renders an IR tree in statement position.
pub fn statement_text(
    registry: &mut NamespaceRegistry,
    ir: &Ir,
) -> Result<String, YantraError> {
    let mut em = Emitter::new(registry);
    em.emit(ir, &Locus::Statement)?;
    Ok(em.out)
}

/// Renders an IR tree in return position.
pub fn return_text(registry: &mut NamespaceRegistry, ir: &Ir) -> Result<String, YantraError> {
    let mut em = Emitter::new(registry);
    em.emit(ir, &Locus::Return)?;
    Ok(em.out)
}

/// Renders a fully analyzed top-level definition: hoisted classes first,
/// then the definition itself.
pub fn render_top_def(
    registry: &mut NamespaceRegistry,
    def: &TopDef,
) -> Result<String, YantraError> {
    let mut em = Emitter::new(registry);
    let mut out = String::new();
    for class in &def.hoisted {
        out.push_str(&em.class_text(class)?);
    }
    match &def.body {
        TopBody::PlainFn(f) => {
            out.push_str(&em.named_fn_text(&def.dart_name, f)?);
        }
        TopBody::InvokeObj(class) => {
            out.push_str(&em.class_text(class)?);
            out.push_str(&format!("final {} = {}();\n", def.dart_name, class.name));
        }
        TopBody::Class(class) => {
            out.push_str(&em.class_text(class)?);
        }
        TopBody::Value(ir) => {
            let ty_text = def
                .ty
                .as_ref()
                .map(|t| format!("{} ", t.0))
                .unwrap_or_default();
            if is_statement_shaped(ir) {
                // The initializer needs statements: wrap it in a zero-arg
                // thunk invocation.
                let body = em.nested(|e| e.emit(ir, &Locus::Return))?;
                out.push_str(&format!(
                    "final {}{} = (() {{\n{}}})();\n",
                    ty_text, def.dart_name, body
                ));
            } else {
                let text = em.emit_expr(ir)?;
                out.push_str(&format!("final {}{} = {};\n", ty_text, def.dart_name, text));
            }
        }
    }
    Ok(out)
}

fn is_statement_shaped(ir: &Ir) -> bool {
    matches!(
        ir,
        Ir::Let { .. } | Ir::If { .. } | Ir::Case { .. } | Ir::Try { .. } | Ir::Loop { .. }
    )
}

// ============================================================================
// EMITTER
// ============================================================================

impl<'r> Emitter<'r> {
    pub fn new(registry: &'r mut NamespaceRegistry) -> Self {
        Self {
            registry,
            out: String::new(),
            caught: Vec::new(),
            loops: Vec::new(),
            recur_tmp: 0,
        }
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Runs `f` against a fresh buffer and returns what it wrote.
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), YantraError>,
    ) -> Result<String, YantraError> {
        let saved = std::mem::take(&mut self.out);
        let result = f(self);
        let body = std::mem::replace(&mut self.out, saved);
        result.map(|_| body)
    }

    // ------------------------------------------------------------------------
    // Statement-level emission
    // ------------------------------------------------------------------------

    pub fn emit(&mut self, ir: &Ir, locus: &Locus) -> Result<(), YantraError> {
        match ir {
            Ir::Let { bindings, body } => {
                for b in bindings {
                    match &b.ident {
                        Some(id) => self.emit_binding(id, &b.value)?,
                        None => {
                            self.emit(&b.value, &Locus::Statement)?;
                            if b.value.exits() {
                                // Anything after a statement throw is
                                // unreachable; still declare the target so
                                // dead references stay well-formed.
                                if let Some(decl) = locus.declaration() {
                                    self.push(&decl);
                                }
                                return Ok(());
                            }
                        }
                    }
                }
                self.emit(body, locus)
            }

            Ir::If { test, then, els } => {
                if let Some(decl) = locus.declaration() {
                    self.push(&decl);
                }
                let locus = locus.for_branches();
                let cond = self.emit_test(test)?;
                self.push(&format!("if ({cond}) {{\n"));
                self.emit(then, &locus)?;
                let exits = locus.exits() || then.exits();
                if exits {
                    // The then branch leaves control flow: fall through
                    // without an else wrapper.
                    self.push("}\n");
                    self.emit(els, &locus)?;
                } else if matches!(&**els, Ir::Nil) {
                    self.push("}\n");
                } else {
                    self.push("} else {\n");
                    self.emit(els, &locus)?;
                    self.push("}\n");
                }
                Ok(())
            }

            Ir::Loop { bindings, body } => {
                if let Some(decl) = locus.declaration() {
                    self.push(&decl);
                }
                let locus = locus.for_branches();
                for b in bindings {
                    if let Some(init) = &b.init {
                        self.emit_binding(&b.ident, init)?;
                    }
                }
                self.loops.push(bindings.iter().map(|b| b.ident.clone()).collect());
                self.push("do {\n");
                let result = self.emit(body, &locus);
                if result.is_ok() && !(locus.exits() || body.exits()) {
                    self.push("break;\n");
                }
                self.push("} while (true);\n");
                self.loops.pop();
                result
            }

            Ir::Recur { args } => self.emit_recur(args),

            Ir::Case {
                scrut,
                clauses,
                default,
            } => {
                if let Some(decl) = locus.declaration() {
                    self.push(&decl);
                }
                let locus = locus.for_branches();
                let scrut_text = self.emit_expr(scrut)?;
                self.push(&format!("switch ({scrut_text}) {{\n"));
                for clause in clauses {
                    for value in &clause.values {
                        let v = self.emit_expr(value)?;
                        self.push(&format!("case {v}:\n"));
                    }
                    self.emit(&clause.body, &locus)?;
                    if !(locus.exits() || clause.body.exits()) {
                        self.push("break;\n");
                    }
                }
                self.push("default:\n");
                self.emit(default, &locus)?;
                self.push("}\n");
                Ok(())
            }

            Ir::Try {
                body,
                catches,
                finally,
            } => {
                if let Some(decl) = locus.declaration() {
                    self.push(&decl);
                }
                let locus = locus.for_branches();
                self.push("try {\n");
                self.emit(body, &locus)?;
                for c in catches {
                    let binding = match &c.stack {
                        Some(st) => format!("({}, {})", c.exn.name, st.name),
                        None => format!("({})", c.exn.name),
                    };
                    if c.class.0 == "dynamic" {
                        self.push(&format!("}} catch {binding} {{\n"));
                    } else {
                        self.push(&format!("}} on {} catch {binding} {{\n", c.class.0));
                    }
                    self.caught.push(c.exn.name.clone());
                    let result = self.emit(&c.body, &locus);
                    self.caught.pop();
                    result?;
                }
                if let Some(f) = finally {
                    self.push("} finally {\n");
                    self.emit(f, &Locus::Statement)?;
                }
                self.push("}\n");
                Ok(())
            }

            Ir::Throw(expr) => {
                // Inside a handler, rethrowing the caught identifier keeps
                // the original stack trace.
                if let Ir::Id(id) = &**expr {
                    if self.caught.last() == Some(&id.name) {
                        self.push("rethrow;\n");
                        return Ok(());
                    }
                }
                let text = self.emit_expr(expr)?;
                self.push(&format!("throw {text};\n"));
                Ok(())
            }

            Ir::Nil => {
                match locus {
                    Locus::Statement => {}
                    _ => self.push(&format!("{}null{}", locus.prefix(), locus.suffix())),
                }
                Ok(())
            }

            expr => {
                if matches!(locus, Locus::Statement) && is_pure_expression(expr) {
                    return Ok(());
                }
                let text = self.emit_expr(expr)?;
                self.push(&format!("{}{}{}", locus.prefix(), text, locus.suffix()));
                Ok(())
            }
        }
    }

    /// Emits one `let` binding. Function values take the named-function
    /// locus; branching values split into declare and assign.
    fn emit_binding(&mut self, ident: &Ident, value: &Ir) -> Result<(), YantraError> {
        if let Ir::Fun(f) = value {
            let text = self.named_fn_text(&ident.name, f)?;
            self.push(&text);
            return Ok(());
        }
        if is_statement_shaped(value) {
            return self.emit(value, &Locus::var_decl(&ident.name, ident.ty.clone()));
        }
        let text = self.emit_expr(value)?;
        let prefix = Locus::var_decl(&ident.name, ident.ty.clone()).prefix();
        self.push(&format!("{prefix}{text};\n"));
        Ok(())
    }

    /// Emits a test with the truthiness rule: a provable boolean stays bare,
    /// a provable non-boolean only checks nil, anything else gets the full
    /// dynamic check.
    fn emit_test(&mut self, test: &Ir) -> Result<String, YantraError> {
        let text = self.emit_expr(test)?;
        Ok(match test.truth() {
            Truth::Boolean => text,
            Truth::Some => format!("{text} != null"),
            Truth::Unknown => format!("{text} != false && {text} != null"),
        })
    }

    /// Rebinds the enclosing loop's bindings and continues.
    ///
    /// Arguments that mention an earlier binding (whose slot is reassigned
    /// first) are computed into temporaries up front, so all new values
    /// exist before any variable is reassigned; once any argument needs a
    /// temporary, every non-atomic argument gets one to keep source order.
    fn emit_recur(&mut self, args: &[Ir]) -> Result<(), YantraError> {
        let bindings = self
            .loops
            .last()
            .cloned()
            .ok_or_else(|| err_msg!(Internal, "recur emitted outside of a loop"))?;
        if bindings.len() != args.len() {
            return Err(err_msg!(
                Internal,
                "recur argument count {} does not match loop bindings {}",
                args.len(),
                bindings.len()
            ));
        }

        let mut need_temp: Vec<bool> = (0..args.len())
            .map(|i| {
                (0..i).any(|j| args[i].mentions(&bindings[j].name))
            })
            .collect();
        if need_temp.iter().any(|&t| t) {
            for (i, arg) in args.iter().enumerate() {
                if !arg.is_atomic() {
                    need_temp[i] = true;
                }
            }
        }

        // Compute phase.
        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let text = self.emit_expr(arg)?;
            if need_temp[i] {
                self.recur_tmp += 1;
                let tmp = format!("t$r{}", self.recur_tmp);
                self.push(&format!("var {tmp} = {text};\n"));
                values.push(tmp);
            } else {
                values.push(text);
            }
        }

        // Assign phase.
        for (binding, value) in bindings.iter().zip(&values) {
            if &binding.name != value {
                self.push(&format!("{} = {};\n", binding.name, value));
            }
        }
        self.push("continue;\n");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Expression emission
    // ------------------------------------------------------------------------

    pub fn emit_expr(&mut self, ir: &Ir) -> Result<String, YantraError> {
        match ir {
            Ir::Nil => Ok("null".to_string()),
            Ir::Bool(b) => Ok(b.to_string()),
            Ir::Int(i) => Ok(i.to_string()),
            Ir::Float(n) => Ok(float_literal(*n)),
            Ir::Str(s) => Ok(string_literal(s)),
            Ir::Id(id) => Ok(id.name.clone()),
            Ir::Hinted { expr, .. } => self.emit_expr(expr),
            Ir::DartList(items) => {
                let parts = items
                    .iter()
                    .map(|i| self.emit_expr(i))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("[{}]", parts.join(", ")))
            }
            Ir::FieldGet { obj, field } => {
                Ok(format!("{}.{}", self.receiver_text(obj)?, field))
            }
            Ir::MethodCall { obj, method, args } => self.method_call_text(obj, method, args),
            Ir::Assign { target, value } => {
                let target_text = match target {
                    AssignTarget::Ident(id) => id.name.clone(),
                    AssignTarget::Field { obj, field } => {
                        format!("{}.{}", self.receiver_text(obj)?, field)
                    }
                };
                Ok(format!("{} = {}", target_text, self.emit_expr(value)?))
            }
            Ir::New { class, args } => {
                Ok(format!("{}({})", class, self.args_text(args)?))
            }
            Ir::Is { expr, ty } => Ok(format!("({} is {})", self.emit_expr(expr)?, ty.0)),
            Ir::Cast { expr, ty } => Ok(format!("({} as {})", self.emit_expr(expr)?, ty.0)),
            Ir::Call { callee, args } => self.call_text(callee, args),
            Ir::Fun(f) => {
                let sig = self.fn_signature(&f.params, f.opt_kind, &f.opt_params)?;
                let body = self.nested(|em| em.emit(&f.body, &Locus::Return))?;
                Ok(format!("({sig}) {{\n{body}}}"))
            }
            Ir::Let { .. }
            | Ir::If { .. }
            | Ir::Loop { .. }
            | Ir::Recur { .. }
            | Ir::Case { .. }
            | Ir::Try { .. }
            | Ir::Throw(_) => Err(err_msg!(
                Internal,
                "statement-shaped node reached expression position"
            )),
        }
    }

    /// A receiver: identifiers stay bare, anything else is parenthesized.
    fn receiver_text(&mut self, obj: &Ir) -> Result<String, YantraError> {
        let text = self.emit_expr(obj)?;
        match obj {
            Ir::Id(_) | Ir::FieldGet { .. } => Ok(text),
            _ => Ok(format!("({text})")),
        }
    }

    fn method_call_text(
        &mut self,
        obj: &Ir,
        method: &str,
        args: &[Arg],
    ) -> Result<String, YantraError> {
        if let Some(text) = self.operator_text(obj, method, args)? {
            return Ok(text);
        }
        Ok(format!(
            "{}.{}({})",
            self.receiver_text(obj)?,
            method,
            self.args_text(args)?
        ))
    }

    /// Operator method names emit operator syntax; `&`, `|` double into
    /// their logical forms when both operands are provably boolean.
    fn operator_text(
        &mut self,
        obj: &Ir,
        method: &str,
        args: &[Arg],
    ) -> Result<Option<String>, YantraError> {
        const BINARY: &[&str] = &[
            "+", "-", "*", "/", "%", "==", "!=", "<", ">", "<=", ">=", "<<", ">>", ">>>", "~/",
            "&", "|", "^",
        ];
        match method {
            "[]" if args.len() == 1 => {
                let index = self.emit_expr(args[0].ir())?;
                Ok(Some(format!("{}[{}]", self.receiver_text(obj)?, index)))
            }
            "[]=" if args.len() == 2 => {
                let index = self.emit_expr(args[0].ir())?;
                let value = self.emit_expr(args[1].ir())?;
                Ok(Some(format!(
                    "{}[{}] = {}",
                    self.receiver_text(obj)?,
                    index,
                    value
                )))
            }
            "!" if args.is_empty() => Ok(Some(format!("!({})", self.emit_expr(obj)?))),
            "~" if args.is_empty() => Ok(Some(format!("~({})", self.emit_expr(obj)?))),
            "-" if args.is_empty() => Ok(Some(format!("-({})", self.emit_expr(obj)?))),
            m if args.len() == 1 && BINARY.contains(&m) => {
                let rhs = args[0].ir();
                let both_bool =
                    obj.truth() == Truth::Boolean && rhs.truth() == Truth::Boolean;
                let op = match m {
                    "&" if both_bool => "&&",
                    "|" if both_bool => "||",
                    other => other,
                };
                let left = self.emit_expr(obj)?;
                let right = self.emit_expr(rhs)?;
                Ok(Some(format!("({left}){op}({right})")))
            }
            _ => Ok(None),
        }
    }

    fn args_text(&mut self, args: &[Arg]) -> Result<String, YantraError> {
        let parts = args
            .iter()
            .map(|a| match a {
                Arg::Pos(ir) => self.emit_expr(ir),
                Arg::Named(name, ir) => Ok(format!("{}: {}", name, self.emit_expr(ir)?)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(", "))
    }

    fn pos_args(&mut self, args: &[Arg]) -> Result<Vec<String>, YantraError> {
        args.iter()
            .filter_map(|a| match a {
                Arg::Pos(ir) => Some(ir),
                Arg::Named(..) => None,
            })
            .map(|ir| self.emit_expr(ir))
            .collect()
    }

    /// Call emission by callee calling convention: native functions call
    /// directly, invoke-style objects dispatch by arity, and unknown callees
    /// branch on `is IFn` at runtime.
    fn call_text(&mut self, callee: &Ir, args: &[Arg]) -> Result<String, YantraError> {
        match callee {
            Ir::Id(id) if id.conv == CallConv::Native => {
                Ok(format!("{}({})", id.name, self.args_text(args)?))
            }
            Ir::Id(id) if id.conv == CallConv::Invoke => {
                let recv = id.name.clone();
                self.invoke_dispatch(&recv, args)
            }
            other => {
                let callee_text = self.emit_expr(other)?;
                let ifn = self.registry.runtime_ref("IFn");
                let direct =
                    self.invoke_dispatch(&format!("({callee_text} as {ifn})"), args)?;
                let dynamic_call =
                    format!("({callee_text} as dynamic)({})", self.args_text(args)?);
                Ok(format!(
                    "(({callee_text} is {ifn}) ? {direct} : {dynamic_call})"
                ))
            }
        }
    }

    fn invoke_dispatch(&mut self, recv: &str, args: &[Arg]) -> Result<String, YantraError> {
        let t = INVOKE_ARITY_THRESHOLD;
        let pos = self.pos_args(args)?;
        if pos.len() <= t - 1 {
            return Ok(format!("{recv}.$_invoke${}({})", pos.len(), pos.join(", ")));
        }
        let list = self.registry.runtime_ref("list");
        Ok(format!(
            "{recv}.$_invoke_more({}, {list}({}))",
            pos[..t - 1].join(", "),
            pos[t - 1..].join(", ")
        ))
    }

    // ------------------------------------------------------------------------
    // Function signatures
    // ------------------------------------------------------------------------

    /// A parameter list: typed fixed params, then optional params in their
    /// positional `[...]` or named `{...}` group.
    pub fn fn_signature(
        &mut self,
        params: &[Ident],
        opt_kind: Option<OptKind>,
        opt_params: &[(Ident, Option<Ir>)],
    ) -> Result<String, YantraError> {
        let mut parts: Vec<String> = params.iter().map(param_text).collect();
        if !opt_params.is_empty() {
            let opts = opt_params
                .iter()
                .map(|(p, default)| {
                    let base = param_text(p);
                    match default {
                        Some(d) => Ok(format!("{} = {}", base, self.emit_expr(d)?)),
                        None => Ok(base),
                    }
                })
                .collect::<Result<Vec<_>, YantraError>>()?;
            match opt_kind {
                Some(OptKind::Named) => parts.push(format!("{{{}}}", opts.join(", "))),
                _ => parts.push(format!("[{}]", opts.join(", "))),
            }
        }
        Ok(parts.join(", "))
    }

    /// The named-function locus: an idiomatic function declaration.
    pub fn named_fn_text(&mut self, name: &str, f: &FnDef) -> Result<String, YantraError> {
        let sig = self.fn_signature(&f.params, f.opt_kind, &f.opt_params)?;
        let ret = f.ret.as_ref().map(|t| t.0.as_str()).unwrap_or("dynamic");
        let body = self.nested(|em| em.emit(&f.body, &Locus::Return))?;
        Ok(format!("{ret} {name}({sig}) {{\n{body}}}\n"))
    }
}

fn param_text(p: &Ident) -> String {
    match &p.ty {
        Some(ty) => format!("{} {}", ty.0, p.name),
        None => format!("dynamic {}", p.name),
    }
}

fn is_pure_expression(ir: &Ir) -> bool {
    matches!(
        ir,
        Ir::Nil | Ir::Bool(_) | Ir::Int(_) | Ir::Float(_) | Ir::Str(_) | Ir::Id(_) | Ir::Fun(_)
    )
}

// ============================================================================
// LITERALS
// ============================================================================

fn float_literal(n: f64) -> String {
    if n.is_nan() {
        return "double.nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 {
            "double.infinity".to_string()
        } else {
            "double.negativeInfinity".to_string()
        };
    }
    if n.fract() == 0.0 {
        format!("{n:.1}")
    } else {
        n.to_string()
    }
}

/// Emits a Dart double-quoted string literal: named escapes for the common
/// control characters, `\xNN` for the rest of `[0x00..0x1f]`, and escapes
/// for the quote, the interpolation sigil, and the backslash.
pub fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\u{8}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{c}' => out.push_str("\\f"),
            '\u{b}' => out.push_str("\\v"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
