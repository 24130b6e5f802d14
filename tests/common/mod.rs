//! Shared helpers for the integration test suite.
//!
//! Tests drive the compiler the way the driver does: build surface forms,
//! run them through expansion and analysis against a registry seeded with a
//! working namespace, and assert on the IR shape or the emitted Dart text.

#![allow(dead_code)]

use yantra::analyzer::ir::Ir;
use yantra::analyzer::{Analyzer, Env};
use yantra::form::Form;
use yantra::macros::MacroTable;
use yantra::registry::{CallConv, DefKind, Definition, NamespaceRegistry};
use yantra::YantraError;

/// A registry with a plain working namespace selected.
pub fn test_registry() -> NamespaceRegistry {
    let mut reg = NamespaceRegistry::new();
    reg.set_current("app.main");
    reg
}

/// Declares a native Dart function so call forms resolve.
pub fn declare_fn(reg: &mut NamespaceRegistry, name: &str) {
    reg.define_current(
        name,
        Definition::declare(name, DefKind::DartFn, CallConv::Native),
    );
}

/// Analyzes one form in an empty lexical environment.
pub fn analyze(reg: &mut NamespaceRegistry, form: &Form) -> Result<Ir, YantraError> {
    let table = MacroTable::standard();
    let mut analyzer = Analyzer::new(reg, &table, "top");
    analyzer.analyze(&Env::default(), form)
}

/// Analyzes and emits a form in statement position.
pub fn emit_statement(reg: &mut NamespaceRegistry, form: &Form) -> String {
    let ir = analyze(reg, form).expect("analysis should succeed");
    yantra::emitter::statement_text(reg, &ir).expect("emission should succeed")
}

/// Analyzes and emits a form in return position.
pub fn emit_return(reg: &mut NamespaceRegistry, form: &Form) -> String {
    let ir = analyze(reg, form).expect("analysis should succeed");
    yantra::emitter::return_text(reg, &ir).expect("emission should succeed")
}

/// Expands a form to its fixpoint and pretty-prints the result.
pub fn expand_pretty(reg: &mut NamespaceRegistry, form: &Form) -> String {
    let table = MacroTable::standard();
    yantra::macros::expand(reg, &table, &Env::default(), form)
        .expect("expansion should succeed")
        .pretty()
}

/// Runs a top-level `def` form through analysis and emission, returning the
/// rendered Dart source.
pub fn render_def(reg: &mut NamespaceRegistry, form: &Form) -> Result<String, YantraError> {
    let table = MacroTable::standard();
    let items = form.as_list().expect("def form must be a list");
    let top = yantra::analyzer::analyze_top_def(reg, &table, items)?;
    yantra::emitter::render_top_def(reg, &top)
}
