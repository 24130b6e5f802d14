//! The namespace registry: the single mutable store every pipeline stage
//! reads and writes.
//!
//! A [`Namespace`] records imports, aliases, symbol mappings, and definitions
//! (with their pre-rendered Dart source). The registry owns all namespaces,
//! tracks the one currently being compiled, and seeds the `yantra.core`
//! namespace with the built-in Dart type mappings at construction.
//!
//! Mutation is serialized by the single-threaded driver; the registry is not
//! thread-safe and does not try to be.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::form::Symbol;
use crate::mangle::munge;
use crate::{err_msg, YantraError};

/// The seeded core namespace.
pub const CORE_NS: &str = "yantra.core";

/// The Dart runtime library backing emitted code.
pub const RUNTIME_LIB: &str = "package:yantra/runtime.dart";

/// Built-in Dart type names resolvable from any namespace without imports.
const BUILTIN_TYPES: &[&str] = &[
    "String", "bool", "int", "double", "num", "Object", "List", "Map", "Set", "Function",
    "dynamic", "void", "Never", "Null", "Iterable", "Future", "Stream", "Duration", "Error",
    "Exception", "StateError", "ArgumentError", "AssertionError", "UnsupportedError",
    "StackTrace", "Type", "Symbol", "Comparable", "BigInt", "RegExp", "Uri", "DateTime",
];

// ============================================================================
// RECORDS
// ============================================================================

/// A library imported into a namespace under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibImport {
    /// Target library path (`package:...` or a relative `.dart` path).
    pub lib: String,
    /// Source namespace name, when the library is compiled output.
    pub ns: Option<String>,
}

/// What a definition becomes in the emitted Dart file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefKind {
    Field,
    DartFn,
    Class,
}

/// How call sites must treat a resolved callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallConv {
    /// A real Dart function: call directly.
    Native,
    /// An invoke-style function object: dispatch through its arity methods.
    Invoke,
    /// Statically unknown: emit the runtime `is IFn` branch.
    Unknown,
}

/// One arity of a protocol method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMethod {
    /// Target method name (`munged$<arity-1>`).
    pub dart_name: String,
    /// Parameter names including the receiver.
    pub params: Vec<String>,
}

/// Protocol record attached to the defining symbol: method short name →
/// arity → target method.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub methods: HashMap<String, HashMap<usize, ProtocolMethod>>,
}

/// A definition within a namespace, carrying its emitted source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub dart_name: String,
    pub kind: DefKind,
    pub conv: CallConv,
    pub doc: Option<String>,
    /// Set by `deftest`; consulted by `defrunner-main`.
    pub test: bool,
    pub protocol: Option<ProtocolInfo>,
    /// Pre-rendered Dart source, written verbatim by the driver.
    pub source: String,
}

impl Definition {
    /// An empty pre-declaration, so recursive references resolve while the
    /// body is still being analyzed.
    pub fn declare(dart_name: impl Into<String>, kind: DefKind, conv: CallConv) -> Self {
        Self {
            dart_name: dart_name.into(),
            kind,
            conv,
            doc: None,
            test: false,
            protocol: None,
            source: String::new(),
        }
    }
}

/// The outcome of resolving a symbol against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Emittable reference (possibly `alias.`-qualified).
    pub dart_name: String,
    pub kind: DefKind,
    pub conv: CallConv,
}

/// A resolved type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub dart_name: String,
    /// Parameter name trailing the tag, when present (`^w.Widget child`).
    pub param: Option<String>,
}

// ============================================================================
// NAMESPACE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    /// Target library path other namespaces import this one by.
    pub lib_path: String,
    /// Import alias → imported library.
    pub imports: HashMap<String, LibImport>,
    /// User-declared alias → import alias.
    pub aliases: HashMap<String, String>,
    /// Short name → fully qualified symbol (`:refer` mappings).
    pub mappings: HashMap<String, Symbol>,
    defs: HashMap<String, Definition>,
    def_order: Vec<String>,
    import_counter: u32,
}

impl Namespace {
    fn new(name: &str) -> Self {
        let lib_path = if name == CORE_NS {
            RUNTIME_LIB.to_string()
        } else {
            format!("{}.dart", name.replace('.', "/").replace('-', "_"))
        };
        Self {
            name: name.to_string(),
            lib_path,
            imports: HashMap::new(),
            aliases: HashMap::new(),
            mappings: HashMap::new(),
            defs: HashMap::new(),
            def_order: Vec::new(),
            import_counter: 0,
        }
    }

    /// Idempotent write with last-writer semantics.
    pub fn define(&mut self, short_name: &str, def: Definition) {
        if !self.defs.contains_key(short_name) {
            self.def_order.push(short_name.to_string());
        }
        self.defs.insert(short_name.to_string(), def);
    }

    pub fn lookup(&self, short_name: &str) -> Option<&Definition> {
        self.defs.get(short_name)
    }

    /// Definitions in first-definition order, as written to the output file.
    pub fn defs_in_order(&self) -> impl Iterator<Item = (&str, &Definition)> {
        self.def_order
            .iter()
            .filter_map(|name| self.defs.get(name).map(|d| (name.as_str(), d)))
    }

    /// Returns the existing alias for `lib` or allocates a fresh one.
    pub fn ensure_import(&mut self, lib: &str, ns: Option<&str>) -> String {
        if let Some((alias, _)) = self.imports.iter().find(|(_, imp)| imp.lib == lib) {
            return alias.clone();
        }
        let alias = format!("lib{}", self.import_counter);
        self.import_counter += 1;
        self.imports.insert(
            alias.clone(),
            LibImport {
                lib: lib.to_string(),
                ns: ns.map(String::from),
            },
        );
        alias
    }

    /// Import lines sorted by alias, for deterministic output.
    pub fn render_imports(&self) -> String {
        let mut entries: Vec<_> = self.imports.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut out = String::new();
        for (alias, imp) in entries {
            out.push_str(&format!("import \"{}\" as {};\n", imp.lib, alias));
        }
        out
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug)]
pub struct NamespaceRegistry {
    namespaces: HashMap<String, Namespace>,
    current: String,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    /// Creates a registry seeded with the `yantra.core` namespace.
    pub fn new() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(CORE_NS.to_string(), Namespace::new(CORE_NS));
        Self {
            namespaces,
            current: CORE_NS.to_string(),
        }
    }

    pub fn current_ns_name(&self) -> &str {
        &self.current
    }

    /// True when `name` is a built-in Dart type resolvable without imports.
    pub fn is_builtin_type(name: &str) -> bool {
        BUILTIN_TYPES.contains(&name)
    }

    pub fn current_ns(&self) -> &Namespace {
        self.namespaces
            .get(&self.current)
            .expect("current namespace always exists")
    }

    pub fn current_ns_mut(&mut self) -> &mut Namespace {
        self.namespaces
            .get_mut(&self.current)
            .expect("current namespace always exists")
    }

    /// Switches the current namespace, creating it if needed.
    pub fn set_current(&mut self, name: &str) {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace::new(name));
        self.current = name.to_string();
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    /// Defines `short_name` in the named namespace (last-writer wins).
    pub fn define(&mut self, ns: &str, short_name: &str, def: Definition) {
        self.namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Namespace::new(ns))
            .define(short_name, def);
    }

    /// Defines `short_name` in the current namespace.
    pub fn define_current(&mut self, short_name: &str, def: Definition) {
        let ns = self.current.clone();
        self.define(&ns, short_name, def);
    }

    /// A qualified reference into the runtime library, importing it into the
    /// current namespace on first use.
    pub fn runtime_ref(&mut self, name: &str) -> String {
        let alias = self
            .current_ns_mut()
            .ensure_import(RUNTIME_LIB, Some(CORE_NS));
        format!("{alias}.{name}")
    }

    // ------------------------------------------------------------------------
    // Symbol resolution
    // ------------------------------------------------------------------------

    /// Resolves a symbol that is not lexically bound.
    ///
    /// Order: current-namespace definition, alias-qualified reference,
    /// referred mapping, then known-namespace qualification. Anything else is
    /// an unknown-symbol failure.
    pub fn resolve_global(&mut self, sym: &Symbol) -> Result<Resolved, YantraError> {
        self.resolve_global_depth(sym, 0)
    }

    fn resolve_global_depth(&mut self, sym: &Symbol, depth: usize) -> Result<Resolved, YantraError> {
        if depth > 16 {
            return Err(err_msg!(
                Internal,
                "symbol mapping cycle while resolving '{}'",
                sym
            ));
        }
        let current = self.current_ns();

        if sym.is_simple() {
            if let Some(def) = current.lookup(&sym.name) {
                return Ok(Resolved {
                    dart_name: def.dart_name.clone(),
                    kind: def.kind,
                    conv: def.conv,
                });
            }
            if let Some(mapped) = current.mappings.get(&sym.name).cloned() {
                return self.resolve_global_depth(&mapped, depth + 1);
            }
            return Err(err_msg!(Resolve, "unknown symbol '{}'", sym));
        }

        let ns_part = sym.ns.as_deref().expect("qualified symbol");

        // Alias declared in this namespace.
        if let Some(import_alias) = current.aliases.get(ns_part).cloned() {
            let import = current.imports.get(&import_alias).cloned();
            if let Some(LibImport { ns: Some(src_ns), .. }) = &import {
                if let Some(def) = self.namespaces.get(src_ns).and_then(|n| n.lookup(&sym.name)) {
                    return Ok(Resolved {
                        dart_name: format!("{import_alias}.{}", def.dart_name),
                        kind: def.kind,
                        conv: def.conv,
                    });
                }
            }
            // Dart interop: the member is taken on faith, munged.
            return Ok(Resolved {
                dart_name: format!("{import_alias}.{}", munge(&sym.name)),
                kind: DefKind::DartFn,
                conv: CallConv::Native,
            });
        }

        // Fully qualified reference to a known namespace.
        if let Some(target) = self.namespaces.get(ns_part) {
            let Some(def) = target.lookup(&sym.name).cloned() else {
                return Err(err_msg!(
                    Resolve,
                    "unknown symbol '{}' in namespace '{}'",
                    sym.name,
                    ns_part
                ));
            };
            if ns_part == self.current {
                return Ok(Resolved {
                    dart_name: def.dart_name,
                    kind: def.kind,
                    conv: def.conv,
                });
            }
            let lib = target.lib_path.clone();
            let ns_name = target.name.clone();
            let alias = self.current_ns_mut().ensure_import(&lib, Some(&ns_name));
            return Ok(Resolved {
                dart_name: format!("{alias}.{}", def.dart_name),
                kind: def.kind,
                conv: def.conv,
            });
        }

        Err(err_msg!(Resolve, "unknown symbol '{}'", sym))
    }

    // ------------------------------------------------------------------------
    // Type tags
    // ------------------------------------------------------------------------

    /// Resolves a type tag: optional `alias.` prefix, an identifier, an
    /// optional `?` nullability suffix, and an optional trailing parameter
    /// name.
    pub fn resolve_type(&mut self, tag: &str) -> Result<TypeRef, YantraError> {
        let mut parts = tag.split_whitespace();
        let Some(token) = parts.next() else {
            return Err(err_msg!(Resolve, "unknown type tag '{}' (empty)", tag));
        };
        let param = parts.next().map(String::from);
        if parts.next().is_some() {
            return Err(err_msg!(Resolve, "unknown type tag '{}' (malformed)", tag));
        }

        let (base, nullable) = match token.strip_suffix('?') {
            Some(base) => (base, true),
            None => (token, false),
        };

        let dart_name = match base.split_once('.') {
            Some((alias, ident)) => {
                let current = self.current_ns();
                let Some(import_alias) = current.aliases.get(alias).cloned() else {
                    return Err(err_msg!(
                        Resolve,
                        "unknown type tag '{}': alias '{}' is not declared in namespace '{}'",
                        tag,
                        alias,
                        current.name
                    ));
                };
                format!("{import_alias}.{ident}")
            }
            None => {
                if BUILTIN_TYPES.contains(&base) {
                    base.to_string()
                } else if let Some(def) = self.current_ns().lookup(base) {
                    if def.kind != DefKind::Class {
                        return Err(err_msg!(
                            Resolve,
                            "unknown type tag '{}': '{}' does not name a class",
                            tag,
                            base
                        ));
                    }
                    def.dart_name.clone()
                } else {
                    return Err(err_msg!(Resolve, "unknown type tag '{}'", tag));
                }
            }
        };

        Ok(TypeRef {
            dart_name: if nullable {
                format!("{dart_name}?")
            } else {
                dart_name
            },
            param,
        })
    }

    // ------------------------------------------------------------------------
    // Protocols
    // ------------------------------------------------------------------------

    /// Records a protocol method table on the protocol's definition.
    pub fn record_protocol(&mut self, short_name: &str, info: ProtocolInfo) {
        let ns = self.current.clone();
        let dart_name = munge(short_name);
        let mut def = self
            .namespaces
            .get(&ns)
            .and_then(|n| n.lookup(short_name))
            .cloned()
            .unwrap_or_else(|| Definition::declare(dart_name, DefKind::Class, CallConv::Unknown));
        def.protocol = Some(info);
        self.define(&ns, short_name, def);
    }

    /// Looks up the target method name for a protocol method at a call arity
    /// (receiver included in `arg_count`).
    pub fn resolve_protocol_method(
        &mut self,
        protocol: &Symbol,
        method: &str,
        arg_count: usize,
    ) -> Result<ProtocolMethod, YantraError> {
        let ns_name = match &protocol.ns {
            Some(ns) => ns.clone(),
            None => self.current.clone(),
        };
        let info = self
            .namespaces
            .get(&ns_name)
            .and_then(|n| n.lookup(&protocol.name))
            .and_then(|d| d.protocol.as_ref())
            .ok_or_else(|| err_msg!(Resolve, "'{}' does not name a protocol", protocol))?;
        info.methods
            .get(method)
            .and_then(|arities| arities.get(&arg_count))
            .cloned()
            .ok_or_else(|| {
                err_msg!(
                    Resolve,
                    "protocol '{}' has no method '{}' of arity {}",
                    protocol,
                    method,
                    arg_count
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_is_last_writer_and_keeps_order() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        reg.define_current("a", Definition::declare("a", DefKind::Field, CallConv::Unknown));
        reg.define_current("b", Definition::declare("b", DefKind::Field, CallConv::Unknown));
        let mut def = Definition::declare("a", DefKind::DartFn, CallConv::Native);
        def.source = "dynamic a() {}\n".to_string();
        reg.define_current("a", def);

        let names: Vec<_> = reg.current_ns().defs_in_order().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reg.current_ns().lookup("a").unwrap().kind, DefKind::DartFn);
    }

    #[test]
    fn ensure_import_reuses_existing_alias() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        let a1 = reg.current_ns_mut().ensure_import("dart:math", None);
        let a2 = reg.current_ns_mut().ensure_import("dart:math", None);
        assert_eq!(a1, a2);
        let a3 = reg.current_ns_mut().ensure_import("dart:io", None);
        assert_ne!(a1, a3);
    }

    #[test]
    fn resolve_prefers_current_namespace_definitions() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        reg.define_current(
            "run",
            Definition::declare("run", DefKind::DartFn, CallConv::Native),
        );
        let resolved = reg.resolve_global(&Symbol::simple("run")).unwrap();
        assert_eq!(resolved.dart_name, "run");
        assert_eq!(resolved.conv, CallConv::Native);
    }

    #[test]
    fn resolve_qualified_imports_the_target_namespace() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.util");
        reg.define_current(
            "helper",
            Definition::declare("helper", DefKind::DartFn, CallConv::Native),
        );
        reg.set_current("app.main");
        let resolved = reg
            .resolve_global(&Symbol::qualified("app.util", "helper"))
            .unwrap();
        assert_eq!(resolved.dart_name, "lib0.helper");
        let imports = &reg.current_ns().imports;
        assert_eq!(imports.get("lib0").unwrap().lib, "app/util.dart");
    }

    #[test]
    fn unknown_symbols_fail_resolution() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        let err = reg.resolve_global(&Symbol::simple("nope")).unwrap_err();
        assert!(err.message().contains("unknown symbol"));
    }

    #[test]
    fn type_tags_resolve_builtins_aliases_and_fail_loudly() {
        let mut reg = NamespaceRegistry::new();
        reg.set_current("app.main");
        assert_eq!(reg.resolve_type("String").unwrap().dart_name, "String");
        assert_eq!(reg.resolve_type("int?").unwrap().dart_name, "int?");

        let alias = reg
            .current_ns_mut()
            .ensure_import("package:flutter/widgets.dart", None);
        reg.current_ns_mut()
            .aliases
            .insert("w".to_string(), alias.clone());
        let t = reg.resolve_type("w.Widget child").unwrap();
        assert_eq!(t.dart_name, format!("{alias}.Widget"));
        assert_eq!(t.param.as_deref(), Some("child"));

        let err = reg.resolve_type("Widget").unwrap_err();
        assert!(err.message().contains("unknown type tag"));
    }
}
