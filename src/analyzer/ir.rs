//! The intermediate tree the analyzer lowers surface forms into.
//!
//! IR nodes are a small tagged union; values that are not constructors are
//! literal atoms or [`Ident`]s (namespace-unique mangled names carrying type,
//! truthiness, and mutability metadata). The emitter consumes this tree
//! against a locus and never sees surface forms.

use crate::registry::CallConv;

/// Truthiness classification of an expression.
///
/// `Boolean` means provably a boolean; `Some` means provably non-boolean (so
/// only the nil check is needed); `Unknown` requires the full dynamic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    Boolean,
    Some,
    Unknown,
}

/// A resolved Dart type name, possibly alias-qualified and possibly nullable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DartType(pub String);

impl DartType {
    pub fn dynamic() -> Self {
        DartType("dynamic".to_string())
    }

    pub fn is_bool(&self) -> bool {
        self.0 == "bool"
    }

    pub fn is_nullable(&self) -> bool {
        self.0.ends_with('?') || self.0 == "dynamic" || self.0 == "Null" || self.0 == "void"
    }

    pub fn truth(&self) -> Truth {
        if self.is_bool() {
            Truth::Boolean
        } else if self.is_nullable() {
            Truth::Unknown
        } else {
            Truth::Some
        }
    }
}

/// Where an identifier lives, which decides capture analysis and emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentScope {
    /// A gensym-created local; candidate for closure capture.
    Local,
    /// A class field or ctor param, visible without qualification.
    Member,
    /// A namespace-level or imported definition.
    Global,
    /// The receiver inside a method body.
    This,
}

/// A mangled identifier with its attached metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub ty: Option<DartType>,
    pub truth: Option<Truth>,
    pub mutable: bool,
    pub scope: IdentScope,
    pub conv: CallConv,
}

impl Ident {
    pub fn local(name: String) -> Self {
        Self {
            name,
            ty: None,
            truth: None,
            mutable: false,
            scope: IdentScope::Local,
            conv: CallConv::Unknown,
        }
    }

    pub fn global(name: String, conv: CallConv) -> Self {
        Self {
            name,
            ty: None,
            truth: None,
            mutable: false,
            scope: IdentScope::Global,
            conv,
        }
    }

    pub fn member(name: String, mutable: bool) -> Self {
        Self {
            name,
            ty: None,
            truth: None,
            mutable,
            scope: IdentScope::Member,
            conv: CallConv::Unknown,
        }
    }

    pub fn this(conv: CallConv) -> Self {
        Self {
            name: "this".to_string(),
            ty: None,
            truth: None,
            mutable: false,
            scope: IdentScope::This,
            conv,
        }
    }

    pub fn with_ty(mut self, ty: Option<DartType>) -> Self {
        self.ty = ty;
        self
    }

    pub fn with_truth(mut self, truth: Truth) -> Self {
        self.truth = Some(truth);
        self
    }

    pub fn truth(&self) -> Truth {
        if let Some(t) = self.truth {
            return t;
        }
        match &self.ty {
            Some(ty) => ty.truth(),
            None => Truth::Unknown,
        }
    }
}

/// One `let` binding; a `None` ident is a pure statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub ident: Option<Ident>,
    pub value: Ir,
}

/// One `loop` binding; a `None` init reuses an enclosing function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBinding {
    pub ident: Ident,
    pub init: Option<Ir>,
}

/// A call or constructor argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Pos(Ir),
    Named(String, Ir),
}

impl Arg {
    pub fn ir(&self) -> &Ir {
        match self {
            Arg::Pos(ir) | Arg::Named(_, ir) => ir,
        }
    }

    pub fn ir_mut(&mut self) -> &mut Ir {
        match self {
            Arg::Pos(ir) | Arg::Named(_, ir) => ir,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub class: DartType,
    pub exn: Ident,
    pub stack: Option<Ident>,
    pub body: Ir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseClause {
    /// Literal atoms only.
    pub values: Vec<Ir>,
    pub body: Ir,
}

/// Dart-style optional parameters are either positional or named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptKind {
    Positional,
    Named,
}

/// A plain (single fixed body, non-variadic) function.
#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub params: Vec<Ident>,
    pub opt_kind: Option<OptKind>,
    pub opt_params: Vec<(Ident, Option<Ir>)>,
    pub ret: Option<DartType>,
    pub body: Ir,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Ident(Ident),
    Field { obj: Box<Ir>, field: String },
}

/// The IR variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Ir {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Id(Ident),
    /// A Dart list literal, used for aggregate factories and rest packing.
    DartList(Vec<Ir>),
    Let {
        bindings: Vec<Binding>,
        body: Box<Ir>,
    },
    If {
        test: Box<Ir>,
        then: Box<Ir>,
        els: Box<Ir>,
    },
    Loop {
        bindings: Vec<LoopBinding>,
        body: Box<Ir>,
    },
    Recur {
        args: Vec<Ir>,
    },
    Fun(Box<FnDef>),
    Case {
        scrut: Box<Ir>,
        clauses: Vec<CaseClause>,
        default: Box<Ir>,
    },
    Try {
        body: Box<Ir>,
        catches: Vec<CatchClause>,
        finally: Option<Box<Ir>>,
    },
    Throw(Box<Ir>),
    MethodCall {
        obj: Box<Ir>,
        method: String,
        args: Vec<Arg>,
    },
    FieldGet {
        obj: Box<Ir>,
        field: String,
    },
    Assign {
        target: AssignTarget,
        value: Box<Ir>,
    },
    New {
        class: String,
        args: Vec<Arg>,
    },
    Is {
        expr: Box<Ir>,
        ty: DartType,
    },
    Cast {
        expr: Box<Ir>,
        ty: DartType,
    },
    Call {
        callee: Box<Ir>,
        args: Vec<Arg>,
    },
    /// Transparent type-hint carrier from user tags.
    Hinted {
        ty: DartType,
        expr: Box<Ir>,
    },
}

/// Operators whose results are provably boolean.
pub const BOOL_OPS: &[&str] = &["<", "<=", ">", ">=", "==", "!=", "&", "|", "^", "!"];

impl Ir {
    /// Truthiness classification used when emitting tests.
    pub fn truth(&self) -> Truth {
        match self {
            Ir::Bool(_) => Truth::Boolean,
            Ir::Int(_) | Ir::Float(_) | Ir::Str(_) | Ir::DartList(_) => Truth::Some,
            Ir::Id(id) => id.truth(),
            Ir::Hinted { ty, .. } | Ir::Cast { ty, .. } => ty.truth(),
            Ir::Is { .. } => Truth::Boolean,
            Ir::MethodCall { method, .. } if BOOL_OPS.contains(&method.as_str()) => Truth::Boolean,
            Ir::Let { body, .. } => body.truth(),
            Ir::If { then, els, .. } => {
                let (a, b) = (then.truth(), els.truth());
                if a == b {
                    a
                } else {
                    Truth::Unknown
                }
            }
            Ir::Assign { value, .. } => value.truth(),
            Ir::New { .. } | Ir::Fun(_) => Truth::Some,
            _ => Truth::Unknown,
        }
    }

    /// The statically known Dart type, when any.
    pub fn dart_type(&self) -> Option<DartType> {
        match self {
            Ir::Bool(_) => Some(DartType("bool".into())),
            Ir::Int(_) => Some(DartType("int".into())),
            Ir::Float(_) => Some(DartType("double".into())),
            Ir::Str(_) => Some(DartType("String".into())),
            Ir::Id(id) => id.ty.clone(),
            Ir::Hinted { ty, .. } | Ir::Cast { ty, .. } => Some(ty.clone()),
            Ir::Is { .. } => Some(DartType("bool".into())),
            Ir::MethodCall { method, .. } if BOOL_OPS.contains(&method.as_str()) => {
                Some(DartType("bool".into()))
            }
            Ir::Let { body, .. } => body.dart_type(),
            _ => None,
        }
    }

    /// Atomic expressions are safe to reference without pre-evaluation:
    /// literals, identifiers, and bare field reads off atomic receivers.
    pub fn is_atomic(&self) -> bool {
        match self {
            Ir::Nil | Ir::Bool(_) | Ir::Int(_) | Ir::Float(_) | Ir::Str(_) | Ir::Id(_) => true,
            Ir::FieldGet { obj, .. } => obj.is_atomic(),
            Ir::Hinted { expr, .. } => expr.is_atomic(),
            _ => false,
        }
    }

    /// True when evaluation can never fall through this node.
    pub fn exits(&self) -> bool {
        match self {
            Ir::Throw(_) | Ir::Recur { .. } => true,
            Ir::Let { bindings, body } => {
                bindings.iter().any(|b| b.value.exits()) || body.exits()
            }
            Ir::If { then, els, .. } => then.exits() && els.exits(),
            Ir::Case {
                clauses, default, ..
            } => clauses.iter().all(|c| c.body.exits()) && default.exits(),
            Ir::Hinted { expr, .. } => expr.exits(),
            _ => false,
        }
    }

    /// Textual-mention check used by the recur rebind emitter.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Ir::Id(id) => id.name == name,
            Ir::Nil | Ir::Bool(_) | Ir::Int(_) | Ir::Float(_) | Ir::Str(_) => false,
            Ir::DartList(items) => items.iter().any(|i| i.mentions(name)),
            Ir::Let { bindings, body } => {
                bindings.iter().any(|b| b.value.mentions(name)) || body.mentions(name)
            }
            Ir::If { test, then, els } => {
                test.mentions(name) || then.mentions(name) || els.mentions(name)
            }
            Ir::Loop { bindings, body } => {
                bindings
                    .iter()
                    .any(|b| b.init.as_ref().is_some_and(|i| i.mentions(name)))
                    || body.mentions(name)
            }
            Ir::Recur { args } => args.iter().any(|a| a.mentions(name)),
            Ir::Fun(f) => {
                f.opt_params
                    .iter()
                    .any(|(_, d)| d.as_ref().is_some_and(|d| d.mentions(name)))
                    || f.body.mentions(name)
            }
            Ir::Case {
                scrut,
                clauses,
                default,
            } => {
                scrut.mentions(name)
                    || clauses.iter().any(|c| c.body.mentions(name))
                    || default.mentions(name)
            }
            Ir::Try {
                body,
                catches,
                finally,
            } => {
                body.mentions(name)
                    || catches.iter().any(|c| c.body.mentions(name))
                    || finally.as_ref().is_some_and(|f| f.mentions(name))
            }
            Ir::Throw(e) => e.mentions(name),
            Ir::MethodCall { obj, args, .. } => {
                obj.mentions(name) || args.iter().any(|a| a.ir().mentions(name))
            }
            Ir::FieldGet { obj, .. } => obj.mentions(name),
            Ir::Assign { target, value } => {
                let target_hit = match target {
                    AssignTarget::Ident(id) => id.name == name,
                    AssignTarget::Field { obj, .. } => obj.mentions(name),
                };
                target_hit || value.mentions(name)
            }
            Ir::New { args, .. } => args.iter().any(|a| a.ir().mentions(name)),
            Ir::Is { expr, .. } | Ir::Cast { expr, .. } | Ir::Hinted { expr, .. } => {
                expr.mentions(name)
            }
            Ir::Call { callee, args } => {
                callee.mentions(name) || args.iter().any(|a| a.ir().mentions(name))
            }
        }
    }
}
