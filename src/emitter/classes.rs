//! The class writer.
//!
//! Renders an assembled [`ClassDef`] as a Dart class declaration: header
//! with `extends`/`with`/`implements` clauses, typed fields, the initializing
//! constructor with an optional super-constructor call, methods (including
//! `get`/`set` forms and abstract bodies), and the delegating `noSuchMethod`
//! stub when required.

use crate::analyzer::classes::{ClassDef, CtorParam, MethodDef, MethodKind};
use crate::YantraError;

use super::locus::Locus;
use super::{param_text, Emitter};

impl Emitter<'_> {
    pub fn class_text(&mut self, class: &ClassDef) -> Result<String, YantraError> {
        let mut out = String::new();
        if class.abstract_ {
            out.push_str("abstract ");
        }
        out.push_str(&format!("class {}", class.name));
        if let Some(parent) = &class.extends {
            out.push_str(&format!(" extends {parent}"));
        }
        if !class.mixins.is_empty() {
            out.push_str(&format!(" with {}", class.mixins.join(", ")));
        }
        if !class.implements.is_empty() {
            out.push_str(&format!(" implements {}", class.implements.join(", ")));
        }
        out.push_str(" {\n");

        for field in &class.fields {
            let ty = field.ty.as_ref().map(|t| t.0.as_str()).unwrap_or("dynamic");
            if field.mutable {
                out.push_str(&format!("{ty} {};\n", field.name));
            } else {
                out.push_str(&format!("final {ty} {};\n", field.name));
            }
        }

        if !class.ctor_params.is_empty() || class.super_ctor.is_some() {
            out.push_str(&self.ctor_text(class)?);
        }

        for method in &class.methods {
            out.push_str(&self.method_text(method)?);
        }

        if class.need_nsm {
            out.push_str(
                "dynamic noSuchMethod(Invocation invocation) => super.noSuchMethod(invocation);\n",
            );
        }

        out.push_str("}\n");
        Ok(out)
    }

    fn ctor_text(&mut self, class: &ClassDef) -> Result<String, YantraError> {
        let params = class
            .ctor_params
            .iter()
            .map(|p| match p {
                CtorParam::Field(name) => format!("this.{name}"),
                CtorParam::Plain(ident) => param_text(ident),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let super_part = match &class.super_ctor {
            None => String::new(),
            Some(sc) => {
                let args = sc
                    .args
                    .iter()
                    .map(|a| self.emit_expr(a))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(", ");
                match &sc.ctor {
                    Some(name) => format!(" : super.{name}({args})"),
                    None => format!(" : super({args})"),
                }
            }
        };

        Ok(format!("{}({params}){super_part};\n", class.name))
    }

    fn method_text(&mut self, method: &MethodDef) -> Result<String, YantraError> {
        let ret = method.ret.as_ref().map(|t| t.0.as_str()).unwrap_or("dynamic");
        match method.kind {
            MethodKind::Getter => match &method.body {
                None => Ok(format!("{ret} get {};\n", method.name)),
                Some(body) => {
                    let body = self.nested(|em| em.emit(body, &Locus::Return))?;
                    Ok(format!("{ret} get {} {{\n{body}}}\n", method.name))
                }
            },
            MethodKind::Setter => {
                let param = method
                    .params
                    .first()
                    .map(param_text)
                    .unwrap_or_else(|| "dynamic value".to_string());
                match &method.body {
                    None => Ok(format!("set {}({param});\n", method.name)),
                    Some(body) => {
                        let body = self.nested(|em| em.emit(body, &Locus::Statement))?;
                        Ok(format!("set {}({param}) {{\n{body}}}\n", method.name))
                    }
                }
            }
            MethodKind::Normal => {
                let sig =
                    self.fn_signature(&method.params, method.opt_kind, &method.opt_params)?;
                match &method.body {
                    None => Ok(format!("{ret} {}({sig});\n", method.name)),
                    Some(body) => {
                        let body = self.nested(|em| em.emit(body, &Locus::Return))?;
                        Ok(format!("{ret} {}({sig}) {{\n{body}}}\n", method.name))
                    }
                }
            }
        }
    }
}
