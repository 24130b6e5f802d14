//! The file driver.
//!
//! Owns the compilation loop around the core: resolves namespaces to source
//! files on the configured search path, feeds top-level forms through
//! expansion and analysis, and writes each namespace's emitted definitions
//! (imports first) into the destination tree.
//!
//! The driver is strictly single-threaded; it owns the namespace registry
//! and serializes every mutation. Errors from the core are fatal to the
//! current compilation and are reported by the caller.

use std::fs;
use std::path::PathBuf;

use walkdir::WalkDir;

use crate::analyzer::{self, Env};
use crate::emitter;
use crate::form::Form;
use crate::macros::{expand, MacroTable};
use crate::reader::FormSource;
use crate::registry::{Definition, NamespaceRegistry};
use crate::{err_msg, YantraError};

/// Language-source extension, tried first.
pub const SOURCE_EXT: &str = "yn";
/// Cross-platform variant, tried second.
pub const SOURCE_EXT_CROSS: &str = "ync";

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Ordered directories namespaces are resolved against.
    pub search_paths: Vec<PathBuf>,
    /// Destination directory for generated artifacts.
    pub dest: PathBuf,
    /// Subdirectory of `dest` the generated Dart files land in.
    pub out_subdir: String,
}

impl DriverConfig {
    pub fn new(search_paths: Vec<PathBuf>, dest: PathBuf) -> Self {
        Self {
            search_paths,
            dest,
            out_subdir: "yn_out".to_string(),
        }
    }
}

/// Per-namespace compile summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    pub namespace: String,
    pub definitions: usize,
    pub output: PathBuf,
}

pub struct Driver {
    pub config: DriverConfig,
    pub registry: NamespaceRegistry,
    macros: MacroTable,
    top_counter: u32,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            registry: NamespaceRegistry::new(),
            macros: MacroTable::standard(),
            top_counter: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Source resolution
    // ------------------------------------------------------------------------

    /// Resolves a namespace name to a source file: for `a.b.c`, `a/b/c.yn`
    /// is tried before `a/b/c.ync` in each search directory; the first match
    /// wins.
    pub fn resolve_ns_file(&self, ns_name: &str) -> Option<PathBuf> {
        let rel = ns_name.replace('.', "/");
        for dir in &self.config.search_paths {
            for ext in [SOURCE_EXT, SOURCE_EXT_CROSS] {
                let candidate = dir.join(format!("{rel}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Enumerates every compilable namespace under the search path, sorted
    /// for deterministic order. Earlier search directories shadow later ones.
    pub fn enumerate_namespaces(&self) -> Vec<(String, PathBuf)> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for dir in &self.config.search_paths {
            let mut files: Vec<PathBuf> = WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext == SOURCE_EXT || ext == SOURCE_EXT_CROSS)
                })
                .collect();
            files.sort();
            for file in files {
                let Ok(rel) = file.strip_prefix(dir) else {
                    continue;
                };
                let ns_name = rel
                    .with_extension("")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(".");
                if seen.insert(ns_name.clone()) {
                    out.push((ns_name, file));
                }
            }
        }
        out.sort();
        out
    }

    // ------------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------------

    /// Consumes every form the source yields and compiles it, then writes
    /// the namespace left current and reports on it.
    pub fn compile_and_write(
        &mut self,
        source: &mut dyn FormSource,
    ) -> Result<CompileReport, YantraError> {
        self.compile_source(source)?;
        let ns_name = self.registry.current_ns_name().to_string();
        self.write_namespace(&ns_name)
    }

    /// Compiles all forms from a source without writing output.
    pub fn compile_source(&mut self, source: &mut dyn FormSource) -> Result<(), YantraError> {
        while let Some(form) = source.next_form()? {
            self.compile_top_form(&form)?;
        }
        Ok(())
    }

    /// Compiles one top-level form, mutating the registry.
    pub fn compile_top_form(&mut self, form: &Form) -> Result<(), YantraError> {
        let expanded = expand(&mut self.registry, &self.macros, &Env::default(), form)?;
        let Some(items) = expanded.as_list() else {
            return self.compile_loose_form(&expanded);
        };
        match expanded.head_symbol().filter(|s| s.is_simple()).map(|s| s.name.as_str()) {
            Some("do") => {
                let children: Vec<Form> = items[1..].to_vec();
                for child in &children {
                    self.compile_top_form(child)?;
                }
                Ok(())
            }
            Some("ns") => self.process_ns(items),
            Some("def") => {
                let top = analyzer::analyze_top_def(&mut self.registry, &self.macros, items)?;
                self.finish_def(top)
            }
            Some("deftype*") => {
                let top = analyzer::analyze_top_deftype(&mut self.registry, &self.macros, items)?;
                self.finish_def(top)
            }
            _ => self.compile_loose_form(&expanded),
        }
    }

    /// A loose top-level expression becomes a synthetic private definition
    /// so its effects run at load time.
    fn compile_loose_form(&mut self, form: &Form) -> Result<(), YantraError> {
        self.top_counter += 1;
        let name = format!("top-init-{}", self.top_counter);
        let def_form = crate::form::build::call(
            "def",
            vec![crate::form::build::sym(&name), form.clone()],
        );
        let Some(items) = def_form.as_list() else {
            unreachable!("call builds a list");
        };
        let top = analyzer::analyze_top_def(&mut self.registry, &self.macros, items)?;
        self.finish_def(top)
    }

    /// Renders an analyzed definition and records it (last-writer) with its
    /// emitted source.
    fn finish_def(&mut self, top: analyzer::TopDef) -> Result<(), YantraError> {
        let source = emitter::render_top_def(&mut self.registry, &top)?;
        // Keep any protocol table recorded during expansion.
        let protocol = self
            .registry
            .current_ns()
            .lookup(&top.short_name)
            .and_then(|d| d.protocol.clone());
        let def = Definition {
            dart_name: top.dart_name.clone(),
            kind: top.kind,
            conv: top.conv,
            doc: top.doc.clone(),
            test: top.test,
            protocol,
            source,
        };
        self.registry.define_current(&top.short_name, def);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // The ns form
    // ------------------------------------------------------------------------

    /// `(ns my.app (:require [some.lib :as sl] ["package:x/y.dart" :as y]
    /// [other.ns :refer [f g]]))`
    fn process_ns(&mut self, items: &[Form]) -> Result<(), YantraError> {
        let Some(name_sym) = items.get(1).and_then(Form::as_symbol) else {
            return Err(err_msg!(Analyze, "ns requires a name symbol"));
        };
        if name_sym.ns.is_some() {
            return Err(err_msg!(Analyze, "ns name must be a simple symbol"));
        }
        self.registry.set_current(&name_sym.name);

        let mut clauses = &items[2..];
        // Optional doc string.
        if matches!(clauses.first().map(Form::unwrapped), Some(Form::Str(_))) {
            clauses = &clauses[1..];
        }

        for clause in clauses {
            let Some(parts) = clause.as_list() else {
                return Err(err_msg!(
                    Analyze,
                    "unsupported import spec: {}",
                    clause.pretty()
                ));
            };
            let head = parts.first().and_then(Form::as_keyword);
            match head.map(|k| k.name.as_str()) {
                Some("require") => {
                    for spec in &parts[1..] {
                        self.process_require_spec(spec)?;
                    }
                }
                _ => {
                    return Err(err_msg!(
                        Analyze,
                        "unsupported import spec: {}",
                        clause.pretty()
                    ));
                }
            }
        }
        Ok(())
    }

    fn process_require_spec(&mut self, spec: &Form) -> Result<(), YantraError> {
        // A bare symbol imports a source namespace with no alias.
        if let Some(sym) = spec.as_symbol() {
            let (lib, ns) = source_ns_import(&sym.name);
            self.registry.current_ns_mut().ensure_import(&lib, ns.as_deref());
            return Ok(());
        }

        let Some(entries) = spec.as_vector() else {
            return Err(err_msg!(Analyze, "unsupported import spec: {}", spec.pretty()));
        };
        let Some((designator, opts)) = entries.split_first() else {
            return Err(err_msg!(Analyze, "unsupported import spec: empty require vector"));
        };

        let (lib, src_ns): (String, Option<String>) = match designator.unwrapped() {
            Form::Str(lib) => (lib.clone(), None),
            Form::Symbol(sym) if sym.is_simple() => {
                let (lib, ns) = source_ns_import(&sym.name);
                (lib, ns)
            }
            other => {
                return Err(err_msg!(
                    Analyze,
                    "unsupported import spec: {}",
                    other.pretty()
                ));
            }
        };
        let alias = self
            .registry
            .current_ns_mut()
            .ensure_import(&lib, src_ns.as_deref());

        let mut i = 0;
        while i < opts.len() {
            let Some(option) = opts[i].as_keyword() else {
                return Err(err_msg!(
                    Analyze,
                    "unsupported import spec option: {}",
                    opts[i].pretty()
                ));
            };
            let Some(value) = opts.get(i + 1) else {
                return Err(err_msg!(
                    Analyze,
                    "unsupported import spec: :{} is missing a value",
                    option.name
                ));
            };
            match option.name.as_str() {
                "as" => {
                    let Some(user_alias) = value.as_symbol() else {
                        return Err(err_msg!(Analyze, "unsupported import spec: :as expects a symbol"));
                    };
                    self.registry
                        .current_ns_mut()
                        .aliases
                        .insert(user_alias.name.clone(), alias.clone());
                }
                "refer" => {
                    let Some(ns_name) = &src_ns else {
                        return Err(err_msg!(
                            Analyze,
                            "unsupported import spec: :refer requires a source namespace"
                        ));
                    };
                    let Some(syms) = value.as_vector() else {
                        return Err(err_msg!(Analyze, "unsupported import spec: :refer expects a vector"));
                    };
                    for s in syms {
                        let Some(sym) = s.as_symbol() else {
                            return Err(err_msg!(
                                Analyze,
                                "unsupported import spec: :refer expects symbols"
                            ));
                        };
                        self.registry.current_ns_mut().mappings.insert(
                            sym.name.clone(),
                            crate::form::Symbol::qualified(ns_name.clone(), sym.name.clone()),
                        );
                    }
                }
                other => {
                    return Err(err_msg!(Analyze, "unsupported import spec option: :{}", other));
                }
            }
            i += 2;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// The output path for a namespace: dots become directory separators,
    /// dashes become underscores, and the Dart extension is appended.
    pub fn output_path(&self, ns_name: &str) -> PathBuf {
        let rel = format!("{}.dart", ns_name.replace('.', "/").replace('-', "_"));
        self.config.dest.join(&self.config.out_subdir).join(rel)
    }

    /// Writes a namespace's import directives and definition sources to its
    /// output file. The file handle closes on every exit path.
    pub fn write_namespace(&mut self, ns_name: &str) -> Result<CompileReport, YantraError> {
        let Some(ns) = self.registry.namespace(ns_name) else {
            return Err(err_msg!(Io, "cannot write unknown namespace '{}'", ns_name));
        };

        let mut content = ns.render_imports();
        if !content.is_empty() {
            content.push('\n');
        }
        let mut definitions = 0;
        for (_, def) in ns.defs_in_order() {
            if def.source.is_empty() {
                continue;
            }
            content.push_str(&def.source);
            definitions += 1;
        }

        let output = self.output_path(ns_name);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| err_msg!(Io, "failed to create {}: {}", parent.display(), e))?;
        }
        fs::write(&output, content)
            .map_err(|e| err_msg!(Io, "failed to write {}: {}", output.display(), e))?;

        Ok(CompileReport {
            namespace: ns_name.to_string(),
            definitions,
            output,
        })
    }
}

/// Library path and namespace name for a source-namespace import.
fn source_ns_import(ns_name: &str) -> (String, Option<String>) {
    let lib = format!("{}.dart", ns_name.replace('.', "/").replace('-', "_"));
    (lib, Some(ns_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(root: &Path) -> DriverConfig {
        DriverConfig::new(vec![root.join("src")], root.join("out"))
    }

    #[test]
    fn namespace_file_resolution_prefers_yn_over_ync() {
        let root = std::env::temp_dir().join("yantra-driver-resolve");
        let src = root.join("src/app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.ync"), "").unwrap();
        let driver = Driver::new(test_config(&root));
        assert_eq!(
            driver.resolve_ns_file("app.main").unwrap(),
            src.join("main.ync")
        );

        fs::write(src.join("main.yn"), "").unwrap();
        assert_eq!(
            driver.resolve_ns_file("app.main").unwrap(),
            src.join("main.yn")
        );
        assert!(driver.resolve_ns_file("app.missing").is_none());
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn output_paths_replace_dots_and_dashes() {
        let root = std::env::temp_dir().join("yantra-driver-out");
        let driver = Driver::new(test_config(&root));
        assert_eq!(
            driver.output_path("my-app.core"),
            root.join("out/yn_out/my_app/core.dart")
        );
    }
}
