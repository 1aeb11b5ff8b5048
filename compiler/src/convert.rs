//! Conversion: AST declarations become class table entries.
use std::sync::Arc;

use ahash::AHashMap;
use parser::Span;
use parser::ast::{
    Block, ClassDecl, Item, Member, MethodDecl, Module, Name, Stmt, TypeRef,
};

use crate::class_node::{ClassNode, FieldNode, MethodNode, TypeEnv};
use crate::error::CompileError;
use crate::message::{Message, MessageKind};
use crate::source::SourceUnit;
use crate::unit::{PhaseContext, PhaseOperation};

pub(crate) struct Convert;

impl PhaseOperation for Convert {
    fn name(&self) -> &str {
        "convert"
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        let script_name = unit.script_name().clone();
        let classes = ctx.classes_mut();
        let declared = unit.with_ast(|module, messages, source| {
            let scripted = module.has_script_body();
            if scripted {
                wrap_script(module, &script_name);
            }
            let env = Arc::new(type_env(module));
            let mut declared = Vec::new();
            for item in &module.items {
                let Item::Class(decl) = item else { continue };
                let is_script = scripted && decl.name == script_name;
                let node = class_node(decl, &env, source, is_script, messages);
                let name = node.name.clone();
                match classes.insert(node) {
                    Ok(()) => declared.push(name),
                    Err(other) => {
                        let text = if &*other == &**source {
                            format!("invalid duplicate definition of class {name}")
                        } else {
                            format!("invalid duplicate definition of class {name}, already defined in {other}")
                        };
                        messages.push(Message::error(
                            MessageKind::Semantic,
                            source.clone(),
                            Some(decl.name_span),
                            text,
                        ));
                    }
                }
            }
            declared
        })?;
        log::debug!("{}: declared {:?}", unit.name(), declared);
        unit.classes = declared;
        Ok(())
    }
}

fn type_env(module: &Module) -> TypeEnv {
    let mut imports = AHashMap::new();
    for import in &module.imports {
        imports.insert(import.visible_name().clone(), import.path.to_string());
    }
    TypeEnv {
        package: module.package.as_ref().map(|p| p.to_string()),
        imports,
    }
}

/// Move top-level statements into a `run()` method, and top-level
/// methods alongside it, of a class named after the source unit.
fn wrap_script(module: &mut Module, name: &Name) {
    let mut members = Vec::new();
    let mut stmts: Vec<Stmt> = Vec::new();
    let mut items = Vec::new();
    for item in module.items.drain(..) {
        match item {
            Item::Class(_) => items.push(item),
            Item::Method(m) => members.push(Member::Method(m)),
            Item::Stmt(s) => stmts.push(s),
        }
    }
    let body_span = match (stmts.first(), stmts.last()) {
        (Some(first), Some(last)) => first.span.merge(last.span),
        _ => Span::point(module.span.start),
    };
    members.insert(
        0,
        Member::Method(MethodDecl {
            name: "run".into(),
            name_span: Span::point(body_span.start),
            params: Vec::new(),
            return_type: None,
            is_static: false,
            body: Block {
                stmts,
                span: body_span,
            },
            doc: Vec::new(),
            locals: Vec::new(),
            span: body_span,
        }),
    );
    items.insert(
        0,
        Item::Class(ClassDecl {
            name: name.clone(),
            name_span: Span::point(module.span.start),
            superclass: None,
            members,
            doc: Vec::new(),
            span: module.span,
        }),
    );
    module.items = items;
}

fn written(ty: &Option<TypeRef>) -> Option<String> {
    ty.as_ref().map(|t| t.name.to_string())
}

fn method_node(m: &MethodDecl) -> MethodNode {
    let written_params: Vec<Option<String>> = m.params.iter().map(|p| written(&p.ty)).collect();
    MethodNode {
        name: m.name.clone(),
        params: vec![None; written_params.len()],
        written_params,
        is_static: m.is_static,
        span: m.name_span,
    }
}

fn class_node(
    decl: &ClassDecl,
    env: &Arc<TypeEnv>,
    source: &Arc<str>,
    is_script: bool,
    messages: &mut Vec<Message>,
) -> ClassNode {
    let mut node = ClassNode {
        name: env.qualify(&decl.name).into(),
        simple_name: decl.name.clone(),
        source: source.clone(),
        span: decl.span,
        env: env.clone(),
        written_super: written(&decl.superclass),
        super_span: decl.superclass.as_ref().map(|s| s.span),
        superclass: None,
        fields: Vec::new(),
        methods: Vec::new(),
        constructors: Vec::new(),
        is_script,
    };
    for member in &decl.members {
        match member {
            Member::Field(f) => {
                if node.field(&f.name).is_some() {
                    messages.push(Message::error(
                        MessageKind::Semantic,
                        source.clone(),
                        Some(f.span),
                        format!("the field '{}' is declared multiple times", f.name),
                    ));
                    continue;
                }
                node.fields.push(FieldNode {
                    name: f.name.clone(),
                    written_type: written(&f.ty),
                    ty: None,
                    is_static: f.is_static,
                    span: f.span,
                });
            }
            Member::Method(m) => node.methods.push(method_node(m)),
            Member::Constructor(m) => node.constructors.push(method_node(m)),
            Member::Error(_) => {}
        }
    }
    node
}
