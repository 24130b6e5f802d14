//! Surface-form data model.
//!
//! The reader hands the compiler a tree of [`Form`] values: the homoiconic
//! representation of source programs. Forms are plain owned values with no
//! interior mutability; the macro expander and analyzer clone and rebuild
//! them freely.
//!
//! Metadata (`^Tag x`, `^:mutable f`, `^{:doc "..."}`) is carried by the
//! [`Form::Annotated`] wrapper so that [`Symbol`] itself stays `Eq + Hash`
//! and can key lexical environments.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// A symbol, optionally namespace-qualified (`foo` or `my.ns/foo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub ns: Option<String>,
    pub name: String,
}

impl Symbol {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            ns: None,
            name: name.into(),
        }
    }

    pub fn qualified(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ns: Some(ns.into()),
            name: name.into(),
        }
    }

    /// True when the symbol has no namespace part.
    pub fn is_simple(&self) -> bool {
        self.ns.is_none()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A keyword, optionally namespace-qualified (`:foo` or `:foo/bar`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keyword {
    pub ns: Option<String>,
    pub name: String,
}

impl Keyword {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            ns: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, ":{}/{}", ns, self.name),
            None => write!(f, ":{}", self.name),
        }
    }
}

/// Metadata map attached through [`Form::Annotated`], keyed by the keyword's
/// name (`tag`, `mutable`, `doc`, `test`, `getter`, `setter`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Meta(pub HashMap<String, Form>);

impl Meta {
    pub fn get(&self, key: &str) -> Option<&Form> {
        self.0.get(key)
    }

    /// The `:tag` entry as a symbol, when present.
    pub fn tag(&self) -> Option<&Symbol> {
        match self.0.get("tag") {
            Some(Form::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    /// True when the given flag entry is present and truthy.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Form::Bool(true)))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Form) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The recursive surface-form variant produced by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Form {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(Keyword),
    Symbol(Symbol),
    List(Vec<Form>),
    Vector(Vec<Form>),
    Map(Vec<(Form, Form)>),
    Set(Vec<Form>),
    /// `#tag form` reader literal.
    Tagged(Symbol, Box<Form>),
    /// `^meta form` annotation wrapper.
    Annotated(Meta, Box<Form>),
}

// ============================================================================
// ACCESSORS
// ============================================================================

impl Form {
    /// Strips annotation wrappers, returning the innermost form.
    pub fn unwrapped(&self) -> &Form {
        match self {
            Form::Annotated(_, inner) => inner.unwrapped(),
            other => other,
        }
    }

    /// Splits the form into its innermost value and the nearest metadata.
    pub fn strip_meta(&self) -> (&Form, Option<&Meta>) {
        match self {
            Form::Annotated(meta, inner) => (inner.unwrapped(), Some(meta)),
            other => (other, None),
        }
    }

    /// The form as a symbol, looking through annotations.
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self.unwrapped() {
            Form::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match self.unwrapped() {
            Form::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Form]> {
        match self.unwrapped() {
            Form::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrapped() {
            Form::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self.unwrapped() {
            Form::Keyword(k) => Some(k),
            _ => None,
        }
    }

    /// The head symbol of a list form, if any.
    pub fn head_symbol(&self) -> Option<&Symbol> {
        self.as_list()?.first()?.as_symbol()
    }

    /// True for the `.&` sentinel separating positional from named arguments.
    pub fn is_named_args_sentinel(&self) -> bool {
        matches!(self.as_symbol(), Some(s) if s.is_simple() && s.name == ".&")
    }

    /// True for atoms that carry no sub-forms.
    pub fn is_atom(&self) -> bool {
        matches!(
            self.unwrapped(),
            Form::Nil
                | Form::Bool(_)
                | Form::Int(_)
                | Form::Float(_)
                | Form::Str(_)
                | Form::Keyword(_)
                | Form::Symbol(_)
        )
    }
}

// ============================================================================
// PRETTY PRINTING
// ============================================================================

impl Form {
    /// Prints the form back as reader syntax.
    pub fn pretty(&self) -> String {
        match self {
            Form::Nil => "nil".to_string(),
            Form::Bool(b) => b.to_string(),
            Form::Int(i) => i.to_string(),
            Form::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{n:.1}")
                } else {
                    n.to_string()
                }
            }
            Form::Str(s) => format!("{s:?}"),
            Form::Keyword(k) => k.to_string(),
            Form::Symbol(s) => s.to_string(),
            Form::List(items) => format!("({})", Self::pretty_seq(items)),
            Form::Vector(items) => format!("[{}]", Self::pretty_seq(items)),
            Form::Set(items) => format!("#{{{}}}", Self::pretty_seq(items)),
            Form::Map(pairs) => {
                let inner = pairs
                    .iter()
                    .map(|(k, v)| format!("{} {}", k.pretty(), v.pretty()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            Form::Tagged(tag, inner) => format!("#{} {}", tag, inner.pretty()),
            Form::Annotated(meta, inner) => {
                format!("{} {}", Self::pretty_meta(meta), inner.pretty())
            }
        }
    }

    fn pretty_seq(items: &[Form]) -> String {
        items
            .iter()
            .map(Form::pretty)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn pretty_meta(meta: &Meta) -> String {
        // Shorthands: a lone tag prints as ^Tag, a lone flag as ^:flag.
        if meta.0.len() == 1 {
            if let Some(tag) = meta.tag() {
                return format!("^{tag}");
            }
            if let Some((key, Form::Bool(true))) = meta.0.iter().next() {
                return format!("^:{key}");
            }
        }
        let mut entries: Vec<_> = meta
            .0
            .iter()
            .map(|(k, v)| format!(":{} {}", k, v.pretty()))
            .collect();
        entries.sort();
        format!("^{{{}}}", entries.join(", "))
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

/// Constructor helpers used by the built-in macros and by tests.
pub mod build {
    use super::{Form, Keyword, Meta, Symbol};

    /// Parses `"ns/name"` into a [`Symbol`]. A lone `/` stays a simple symbol.
    pub fn symbol(s: &str) -> Symbol {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Symbol::qualified(ns, name),
            _ => Symbol::simple(s),
        }
    }

    pub fn sym(s: &str) -> Form {
        Form::Symbol(symbol(s))
    }

    pub fn kw(s: &str) -> Form {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Form::Keyword(Keyword {
                ns: Some(ns.to_string()),
                name: name.to_string(),
            }),
            _ => Form::Keyword(Keyword::simple(s)),
        }
    }

    pub fn string(s: impl Into<String>) -> Form {
        Form::Str(s.into())
    }

    pub fn int(i: i64) -> Form {
        Form::Int(i)
    }

    pub fn num(n: f64) -> Form {
        Form::Float(n)
    }

    pub fn boolean(b: bool) -> Form {
        Form::Bool(b)
    }

    pub fn nil() -> Form {
        Form::Nil
    }

    pub fn list(items: Vec<Form>) -> Form {
        Form::List(items)
    }

    pub fn vector(items: Vec<Form>) -> Form {
        Form::Vector(items)
    }

    pub fn set(items: Vec<Form>) -> Form {
        Form::Set(items)
    }

    pub fn map(pairs: Vec<(Form, Form)>) -> Form {
        Form::Map(pairs)
    }

    pub fn tagged(tag: &str, inner: Form) -> Form {
        Form::Tagged(symbol(tag), Box::new(inner))
    }

    /// A call form `(head args...)`.
    pub fn call(head: &str, args: Vec<Form>) -> Form {
        let mut items = vec![sym(head)];
        items.extend(args);
        Form::List(items)
    }

    pub fn annotate(meta: Meta, inner: Form) -> Form {
        Form::Annotated(meta, Box::new(inner))
    }

    /// Annotates a form with a `:tag` type hint.
    pub fn with_tag(tag: &str, inner: Form) -> Form {
        let mut meta = Meta::default();
        meta.insert("tag", sym(tag));
        annotate(meta, inner)
    }

    /// Annotates a form with a boolean flag (`^:mutable` and friends).
    pub fn with_flag(flag: &str, inner: Form) -> Form {
        let mut meta = Meta::default();
        meta.insert(flag, Form::Bool(true));
        annotate(meta, inner)
    }
}
