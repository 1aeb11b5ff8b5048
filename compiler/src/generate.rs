//! Class generation: selected bodies and class symbols become
//! [`GeneratedClass`]es.
use ahash::AHashSet;
use bytecode::{BytecodeDecoder, CodeDesc, FieldDesc, GeneratedClass, Instruction};

use crate::class_node::ClassNode;
use crate::error::CompileError;
use crate::select::SelectedClass;
use crate::source::SourceUnit;
use crate::unit::{PhaseContext, PhaseOperation};

pub(crate) struct Generate;

impl PhaseOperation for Generate {
    fn name(&self) -> &str {
        "generate"
    }

    fn call(&mut self, ctx: &mut PhaseContext<'_>, unit: &mut SourceUnit) -> Result<(), CompileError> {
        let selected = std::mem::take(&mut unit.selected);
        let mut generated = Vec::with_capacity(selected.len());
        for class in selected {
            let node = ctx.classes().get(&class.name).ok_or_else(|| {
                CompileError::bug(format!("selected class {} has no symbol", class.name))
            })?;
            let out = generate_class(node, class);
            verify_class(&out)?;
            log::debug!(
                "generated {} ({} methods, {} closures)",
                out.name,
                out.methods.len(),
                out.closures.len()
            );
            generated.push(out);
        }
        unit.generated = generated;
        Ok(())
    }
}

fn generate_class(node: &ClassNode, selected: SelectedClass) -> GeneratedClass {
    let mut class = GeneratedClass::new(selected.name, node.source.clone());
    class.superclass = node.superclass.clone().filter(|s| &**s != "Object");
    class.fields = node
        .fields
        .iter()
        .map(|f| FieldDesc {
            name: f.name.clone(),
            ty: f.ty.clone(),
            is_static: f.is_static,
        })
        .collect();
    class.methods = selected.methods;
    class.constructors = selected.constructors;
    class.initializer = selected.initializer;
    class.static_initializer = selected.static_initializer;
    class.closures = selected.closures;
    class.is_script = node.is_script;
    class
}

/// Every body of `class` must decode completely, keep its jumps and
/// handlers on instruction boundaries and reference only existing
/// constants, registers and closures.
fn verify_class(class: &GeneratedClass) -> Result<(), CompileError> {
    let bodies = class
        .methods
        .iter()
        .chain(&class.constructors)
        .chain(&class.initializer)
        .chain(&class.static_initializer)
        .map(|m| (&*m.name, &m.code))
        .chain(class.closures.iter().map(|c| ("<closure>", &c.code)));
    for (name, code) in bodies {
        verify_code(code, class.closures.len())
            .map_err(|e| CompileError::bug(format!("{}.{name}: {e}", class.name)))?;
    }
    Ok(())
}

fn verify_code(code: &CodeDesc, closures: usize) -> Result<(), String> {
    let mut decoder = BytecodeDecoder::new(&code.code);
    let mut boundaries = AHashSet::new();
    let mut jumps = Vec::new();
    let regs = code.register_count;
    let check_reg = |reg: u16| {
        if reg < regs {
            Ok(())
        } else {
            Err(format!("register r{reg} out of range ({regs} registers)"))
        }
    };
    let check_const = |idx: u16| {
        if usize::from(idx) < code.constants.len() {
            Ok(())
        } else {
            Err(format!("constant #{idx} out of range"))
        }
    };
    loop {
        let pc = decoder.offset();
        boundaries.insert(pc);
        let inst = match decoder.decode_next() {
            Some(Ok(inst)) => inst,
            Some(Err(e)) => return Err(e.to_string()),
            None => break,
        };
        if let Some(offset) = inst.jump_offset() {
            jumps.push((pc, decoder.offset() as i64 + i64::from(offset)));
        }
        match inst {
            Instruction::LoadConstant { idx } => check_const(idx)?,
            Instruction::LoadLocal { reg }
            | Instruction::StoreLocal { reg }
            | Instruction::MakeCell { reg }
            | Instruction::LoadCell { reg }
            | Instruction::StoreCell { reg }
            | Instruction::GetIndex { reg }
            | Instruction::Binary { reg, .. } => check_reg(reg)?,
            Instruction::Mov { dst, src } => {
                check_reg(dst)?;
                check_reg(src)?;
            }
            Instruction::SetIndex { reg, index_reg } => {
                check_reg(reg)?;
                check_reg(index_reg)?;
            }
            Instruction::LoadField { name_idx }
            | Instruction::StoreField { name_idx }
            | Instruction::LoadDynamic { name_idx }
            | Instruction::StoreDynamic { name_idx }
            | Instruction::LoadClass { name_idx }
            | Instruction::GetProperty { name_idx }
            | Instruction::SafeGetProperty { name_idx } => check_const(name_idx)?,
            Instruction::LoadStatic { class_idx, name_idx }
            | Instruction::StoreStatic { class_idx, name_idx } => {
                check_const(class_idx)?;
                check_const(name_idx)?;
            }
            Instruction::SetProperty { name_idx, reg } => {
                check_const(name_idx)?;
                check_reg(reg)?;
            }
            Instruction::Call { name_idx, reg, argc, site }
            | Instruction::SafeCall { name_idx, reg, argc, site } => {
                check_const(name_idx)?;
                check_reg(reg + u16::from(argc))?;
                if site >= code.call_sites {
                    return Err(format!("call site ~{site} out of range"));
                }
            }
            Instruction::New { class_idx, reg, argc } => {
                check_const(class_idx)?;
                if argc > 0 {
                    check_reg(reg + u16::from(argc) - 1)?;
                }
            }
            Instruction::InstanceOf { class_idx } | Instruction::CheckCast { class_idx } => {
                check_const(class_idx)?
            }
            Instruction::MakeList { reg, count } | Instruction::MakeGString { reg, count } => {
                if count > 0 {
                    check_reg(reg + count - 1)?;
                }
            }
            Instruction::MakeClosure { idx } => {
                if usize::from(idx) >= closures {
                    return Err(format!("closure {idx} out of range"));
                }
            }
            _ => {}
        }
    }
    let end = code.code.len();
    for (pc, target) in jumps {
        if target < 0 || !boundaries.contains(&(target as usize)) {
            return Err(format!("jump at {pc} lands at {target}, not an instruction"));
        }
    }
    for h in &code.handlers {
        let on_boundary = |pc: u32| boundaries.contains(&(pc as usize)) || pc as usize == end;
        if h.start >= h.end || !on_boundary(h.start) || !on_boundary(h.end) {
            return Err(format!("handler range {}..{} is malformed", h.start, h.end));
        }
        if !boundaries.contains(&(h.target as usize)) || h.target as usize == end {
            return Err(format!("handler target {} is not an instruction", h.target));
        }
        check_reg(h.exception_reg)?;
        if let Some(ty) = h.catch_type {
            check_const(ty)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytecode::{BytecodeBuilder, Handler};

    use super::*;
    use crate::unit::compile_source;

    #[test]
    fn class_shape() {
        let classes = compile_source(
            "shapes.kst",
            "package geo\nclass Shape {\n def name = 'shape'\n static int count = 0\n def area() { 0 }\n}\nclass Square extends Shape {\n def side\n Square(s) { side = s }\n def area() { side * side }\n}\n",
        )
        .unwrap();
        assert_eq!(classes.len(), 2);
        let shape = &classes[0];
        assert_eq!(&*shape.name, "geo.Shape");
        assert_eq!(shape.superclass, None);
        assert_eq!(shape.fields.len(), 2);
        assert!(shape.fields[1].is_static);
        assert_eq!(shape.fields[1].ty.as_deref(), Some("Integer"));
        assert!(shape.initializer.is_some());
        assert!(shape.static_initializer.is_some());
        let square = &classes[1];
        assert_eq!(square.superclass.as_deref(), Some("geo.Shape"));
        assert_eq!(square.constructors.len(), 1);
        assert_eq!(square.initializer, None);
        assert!(!square.is_script);
    }

    #[test]
    fn package_and_name_round_trip() {
        let classes = compile_source("w.kst", "package com.acme\nclass Widget {}\n").unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(&*classes[0].name, "com.acme.Widget");
        assert_eq!(classes[0].package(), "com.acme");
        assert_eq!(classes[0].simple_name(), "Widget");
    }

    #[test]
    fn script_class_is_marked() {
        let classes = compile_source("hello.kst", "println 'hi'").unwrap();
        assert_eq!(classes.len(), 1);
        assert!(classes[0].is_script);
        assert_eq!(classes[0].method("run").count(), 1);
    }

    #[test]
    fn verifier_rejects_bad_handlers() {
        let mut b = BytecodeBuilder::new();
        b.load_null();
        b.return_();
        let mut code = CodeDesc {
            code: b.into_bytes(),
            register_count: 1,
            ..CodeDesc::default()
        };
        assert!(verify_code(&code, 0).is_ok());
        code.handlers.push(Handler {
            start: 0,
            end: 1,
            target: 7,
            catch_type: None,
            exception_reg: 0,
        });
        assert!(verify_code(&code, 0).unwrap_err().contains("target"));
    }

    #[test]
    fn verifier_rejects_out_of_range_registers() {
        let mut b = BytecodeBuilder::new();
        b.store_local(3);
        let code = CodeDesc {
            code: b.into_bytes(),
            register_count: 2,
            ..CodeDesc::default()
        };
        assert!(verify_code(&code, 0).unwrap_err().contains("r3"));
    }
}
