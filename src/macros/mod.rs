//! Macro expansion.
//!
//! [`expand1`] applies one layer of rewriting to a surface form; [`expand`]
//! iterates it to a fixpoint. The macro set is closed: the built-in macros in
//! [`builtins`] are native Rust functions over form trees, registered in a
//! [`MacroTable`]. No user-defined macros exist outside this set.
//!
//! Rewriting order per layer:
//! 1. non-list forms and non-symbol heads pass through untouched;
//! 2. heads shadowed by the lexical environment pass through;
//! 3. the fixed special forms pass through;
//! 4. `(X. args)` becomes `(new X args)`, `(.m o args)` becomes `(. o m args)`;
//! 5. a head naming a built-in macro applies it to the form's tail;
//! 6. anything else passes through.
//!
//! Macros receive the registry (so `defprotocol` can record its method
//! table) and the call tail, and must be environment-independent.

pub mod builtins;

use std::collections::HashMap;

use crate::analyzer::Env;
use crate::form::{Form, Symbol};
use crate::registry::NamespaceRegistry;
use crate::{err_msg, YantraError};

/// Ceiling on `expand1` iterations for a single form.
pub const MAX_EXPANSION_DEPTH: usize = 128;

/// The fixed special forms the analyzer consumes; the expander never rewrites
/// a list headed by one of these.
pub const SPECIAL_FORMS: &[&str] = &[
    ".", "set!", "throw", "new", "ns", "try", "case*", "quote", "do", "let*", "loop*", "recur",
    "if", "fn*", "def", "reify*", "deftype*", "is?",
];

pub fn is_special(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}

/// A built-in macro: a native transformation over the call's tail.
pub type MacroFn = fn(&mut NamespaceRegistry, &[Form]) -> Result<Form, YantraError>;

/// The closed table of built-in macros.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, MacroFn>,
}

impl MacroTable {
    /// A table populated with the built-in macro set.
    pub fn standard() -> Self {
        let mut table = Self::default();
        builtins::install(&mut table);
        table
    }

    pub fn register(&mut self, name: &str, func: MacroFn) {
        self.macros.insert(name.to_string(), func);
    }

    pub fn lookup(&self, name: &str) -> Option<MacroFn> {
        self.macros.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }
}

/// Applies one layer of rewriting. Returns the form unchanged when no rule
/// fires.
pub fn expand1(
    registry: &mut NamespaceRegistry,
    table: &MacroTable,
    env: &Env,
    form: &Form,
) -> Result<Form, YantraError> {
    // Annotated calls expand underneath their metadata.
    if let Form::Annotated(meta, inner) = form {
        let expanded = expand1(registry, table, env, inner)?;
        return Ok(Form::Annotated(meta.clone(), Box::new(expanded)));
    }

    let Form::List(items) = form else {
        return Ok(form.clone());
    };
    let Some(head) = items.first().and_then(Form::as_symbol) else {
        return Ok(form.clone());
    };
    if head.is_simple() {
        if env.contains_key(&Symbol::simple(head.name.clone())) {
            return Ok(form.clone());
        }
        if is_special(&head.name) {
            return Ok(form.clone());
        }
    }

    // (X. args) => (new X args); the class may be alias-qualified.
    if head.name.len() > 1 && head.name.ends_with('.') {
        let class = Symbol {
            ns: head.ns.clone(),
            name: head.name[..head.name.len() - 1].to_string(),
        };
        let mut rewritten = vec![Form::Symbol(Symbol::simple("new")), Form::Symbol(class)];
        rewritten.extend_from_slice(&items[1..]);
        return Ok(Form::List(rewritten));
    }

    // (.m o args) => (. o m args); requires a receiver.
    if head.is_simple() && head.name.len() > 1 && head.name.starts_with('.') && head.name != ".&" {
        let Some(receiver) = items.get(1) else {
            return Err(err_msg!(
                Expand,
                "method call form '{}' is missing a receiver",
                head
            ));
        };
        let member = Symbol::simple(&head.name[1..]);
        let mut rewritten = vec![
            Form::Symbol(Symbol::simple(".")),
            receiver.clone(),
            Form::Symbol(member),
        ];
        rewritten.extend_from_slice(&items[2..]);
        return Ok(Form::List(rewritten));
    }

    if !head.is_simple() {
        return Ok(form.clone());
    }

    if let Some(func) = table.lookup(&head.name) {
        return func(registry, &items[1..]);
    }

    Ok(form.clone())
}

/// Expands a form to a fixpoint of [`expand1`].
pub fn expand(
    registry: &mut NamespaceRegistry,
    table: &MacroTable,
    env: &Env,
    form: &Form,
) -> Result<Form, YantraError> {
    let mut current = form.clone();
    for _ in 0..MAX_EXPANSION_DEPTH {
        let next = expand1(registry, table, env, &current)?;
        if next == current {
            return Ok(current);
        }
        current = next;
    }
    let head = form
        .head_symbol()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<non-call>".to_string());
    Err(err_msg!(
        Internal,
        "macro expansion of '{}' did not reach a fixpoint within {} steps",
        head,
        MAX_EXPANSION_DEPTH
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ir::Ident;
    use crate::form::build::*;

    fn expand_str(form: Form) -> String {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        let table = MacroTable::standard();
        expand(&mut reg, &table, &Env::default(), &form)
            .unwrap()
            .pretty()
    }

    #[test]
    fn non_lists_and_specials_pass_through() {
        assert_eq!(expand_str(sym("x")), "x");
        assert_eq!(expand_str(int(3)), "3");
        let special = call("let*", vec![vector(vec![sym("x"), int(1)]), sym("x")]);
        assert_eq!(expand_str(special.clone()), special.pretty());
    }

    #[test]
    fn trailing_dot_becomes_new() {
        let form = call("Widget.", vec![sym("a")]);
        assert_eq!(expand_str(form), "(new Widget a)");
    }

    #[test]
    fn leading_dot_becomes_dot_form() {
        let form = call(".render", vec![sym("o"), int(1)]);
        assert_eq!(expand_str(form), "(. o render 1)");
    }

    #[test]
    fn shadowed_heads_are_left_alone() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        let table = MacroTable::standard();
        let mut env = Env::default();
        env.insert(
            Symbol::simple("case"),
            Ident::local("case$1".to_string()),
        );
        let form = call("case", vec![sym("x"), int(1)]);
        let expanded = expand(&mut reg, &table, &env, &form).unwrap();
        assert_eq!(expanded, form);
    }
}
