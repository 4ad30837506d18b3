//! Code-segment disassembly.
//!
//! Driven entirely by `OPTABLE`, so the listing and the decoder can never
//! disagree about argument layouts. Used by the `vmListing` option and by
//! the structural compile/disassemble comparison tests.

use shn_core::{to_quoted, VarTag};

use crate::codeseg::CodeSeg;
use crate::opcodes::{ArgKind, Op};
use crate::types::{StateId, TypeId};
use crate::world::World;

/// One decoded instruction: offset, opcode, and rendered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisInstr {
    pub offs: usize,
    pub op: Op,
    pub args: String,
}

/// Decode a closed segment into instruction records.
pub fn decode(world: &World, seg: &CodeSeg) -> Vec<DisInstr> {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < seg.len() {
        let offs = ip;
        let op = seg.op_at(ip);
        ip += 1;
        let args = match op.arg() {
            ArgKind::None => String::new(),
            ArgKind::Type => {
                let t = TypeId(seg.u32_at(ip));
                world.type_name(t)
            }
            ArgKind::UInt8 => {
                let b = seg.u8_at(ip);
                format!("{} ({})", to_quoted(&[b]), b)
            }
            ArgKind::Int => format!("{}", seg.i64_at(ip)),
            ArgKind::Str => to_quoted(seg.string(seg.u32_at(ip)).as_bytes()),
            ArgKind::VarType8 => VarTag::from_u8(seg.u8_at(ip))
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| "?".into()),
            ArgKind::Definition => {
                let sid = StateId(seg.u32_at(ip));
                let didx = seg.u32_at(ip + 4) as usize;
                format!("const {}", world.state(sid).defs[didx].name)
            }
            ArgKind::SelfIdx => {
                let idx = seg.u8_at(ip) as usize;
                match seg.state {
                    Some(sid) => format!("self.{}", world.state(sid).self_vars[idx].name),
                    None => format!("self.{}", idx),
                }
            }
            ArgKind::StkIdx => {
                let offs = seg.i8_at(ip);
                if offs < 0 {
                    format!("arg.{}", offs)
                } else {
                    format!("local.{}", offs)
                }
            }
            ArgKind::MemberIdx => format!("member.{}", seg.u8_at(ip)),
            ArgKind::Jump16 => {
                let rel = seg.i16_at(ip) as i64;
                let target = (ip as i64 + 2 + rel) as usize;
                format!("{:04x}", target)
            }
            ArgKind::State => {
                let sid = StateId(seg.u32_at(ip));
                world.state(sid).name.clone()
            }
            ArgKind::LineNum => format!("#{}", seg.u32_at(ip)),
            ArgKind::Assert => format!(
                "\"{}\" line {}",
                seg.string(seg.u32_at(ip)),
                seg.u32_at(ip + 4)
            ),
            ArgKind::Dump => {
                let t = TypeId(seg.u32_at(ip + 4));
                format!("{}: {}", seg.string(seg.u32_at(ip)), world.type_name(t))
            }
        };
        ip += op.arg().size();
        out.push(DisInstr { offs, op, args });
        if op == Op::End {
            break;
        }
    }
    out
}

/// Render the listing text for a segment.
pub fn listing(world: &World, seg: &CodeSeg) -> String {
    let mut out = String::new();
    for instr in decode(world, seg) {
        if instr.op == Op::LineNum {
            out.push_str(&format!("#LINENUM {}\n", &instr.args[1..]));
            continue;
        }
        if instr.args.is_empty() {
            out.push_str(&format!("{:04x}:\t{}\n", instr.offs, instr.op.name()));
        } else {
            let pad = if instr.op.name().len() < 8 { "\t\t" } else { "\t" };
            out.push_str(&format!(
                "{:04x}:\t{}{}{}\n",
                instr.offs,
                instr.op.name(),
                pad,
                instr.args
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shn_core::Str;

    #[test]
    fn test_decode_walks_arguments() {
        let world = World::new();
        let mut seg = CodeSeg::new(None);
        seg.append_op(Op::LoadByte);
        seg.append_u8(42);
        let s = seg.add_string(Str::from("hi"));
        seg.append_op(Op::LoadStr);
        seg.append_u32(s);
        seg.append_op(Op::Add);
        seg.close();

        let instrs = decode(&world, &seg);
        let ops: Vec<Op> = instrs.iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::LoadByte, Op::LoadStr, Op::Add, Op::End]);
        assert_eq!(instrs[0].offs, 0);
        assert_eq!(instrs[1].offs, 2);
        assert_eq!(instrs[2].offs, 7);
    }

    #[test]
    fn test_listing_renders() {
        let world = World::new();
        let mut seg = CodeSeg::new(None);
        seg.append_op(Op::Load0);
        seg.close();
        let text = listing(&world, &seg);
        assert!(text.contains("Load0"));
        assert!(text.contains("End"));
    }
}
