//! The virtual machine.
//!
//! One dispatch function interprets a code segment against the current
//! self object and the operand stack. It is reentrant: constant folding
//! runs it at compile time on a scratch activation, and `Call` recurses
//! into it for function activations. Bytecode semantics are strictly
//! sequential; every failure unwinds the invocation as a `RuntimeError`.

use std::cell::Cell;
use std::sync::Arc;

use shn_core::{Obj, Place, RtStack, RuntimeError, Str, VarTag, Variant};

use crate::codeseg::CodeSeg;
use crate::opcodes::Op;
use crate::stateobj::StateObj;
use crate::world::World;

thread_local! {
    // Updated by LineNum; read when composing diagnostics.
    static CUR_LINE: Cell<u32> = const { Cell::new(0) };
}

/// The most recent source line recorded by a `LineNum` opcode on this
/// thread, for error formatting.
pub fn current_line() -> u32 {
    CUR_LINE.with(|l| l.get())
}

fn byte_of(v: i64) -> Result<u8, RuntimeError> {
    u8::try_from(v).map_err(|_| RuntimeError::OutOfRange)
}

fn index_of(v: i64) -> Result<usize, RuntimeError> {
    usize::try_from(v).map_err(|_| RuntimeError::Index)
}

/// Apply a mutation through a place. The place holds the owning handle,
/// so the target outlives the store; copy-on-write inside the containers
/// keeps other handles reading the pre-store state.
fn with_place<F>(stack: &mut RtStack, place: &Place, f: F) -> Result<(), RuntimeError>
where
    F: FnOnce(&mut Variant) -> Result<(), RuntimeError>,
{
    match place {
        Place::Stack(abs) => f(stack.at_mut(*abs)?),
        Place::ObjSlot { obj, index } => {
            let slot = obj.var_slot(*index as usize).ok_or(RuntimeError::Index)?;
            f(&mut slot.borrow_mut())
        }
        Place::Ref(r) => f(&mut r.borrow_mut()),
    }
}

fn cmp_to_ord(o: std::cmp::Ordering) -> i64 {
    match o {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// Execute a closed code segment. Returns normally at `End`; `Exit` and
/// errors unwind through the `Err` path.
pub fn run(
    world: &mut World,
    self_obj: &Arc<StateObj>,
    stack: &mut RtStack,
    seg: &CodeSeg,
) -> Result<(), RuntimeError> {
    let code = seg.code();
    let mut ip: usize = 0;

    macro_rules! imm_u8 {
        () => {{
            let v = code[ip];
            ip += 1;
            v
        }};
    }
    macro_rules! imm_i8 {
        () => {{
            let v = code[ip] as i8;
            ip += 1;
            v
        }};
    }
    macro_rules! imm_u32 {
        () => {{
            let v = seg.u32_at(ip);
            ip += 4;
            v
        }};
    }
    macro_rules! imm_i16 {
        () => {{
            let v = seg.i16_at(ip);
            ip += 2;
            v
        }};
    }
    macro_rules! imm_i64 {
        () => {{
            let v = seg.i64_at(ip);
            ip += 8;
            v
        }};
    }
    // Binary ordinal operation on the two topmost slots.
    macro_rules! arith {
        (|$l:ident, $r:ident| $e:expr) => {{
            let $r = stack.pop().as_ord()?;
            let $l = stack.pop().as_ord()?;
            stack.push(Variant::Ord($e))?;
        }};
    }

    loop {
        let op = Op::decode(code[ip]).ok_or(RuntimeError::Type)?;
        ip += 1;
        match op {
            // --- 1. misc control
            Op::End => return Ok(()),
            Op::Nop => {}
            Op::ConstExprErr => return Err(RuntimeError::ConstExpr),
            Op::Exit => {
                let v = stack.pop();
                world.set_sresult(v.clone());
                return Err(RuntimeError::Exit(v));
            }

            // --- 2. const loaders
            Op::LoadTypeRef => {
                let t = crate::types::TypeId(imm_u32!());
                stack.push(Variant::RtObj(world.type_obj(t)))?;
            }
            Op::LoadNull => stack.push(Variant::Void)?,
            Op::Load0 => stack.push(Variant::Ord(0))?,
            Op::Load1 => stack.push(Variant::Ord(1))?,
            Op::LoadByte => {
                let b = imm_u8!();
                stack.push(Variant::Ord(b as i64))?;
            }
            Op::LoadOrd => {
                let v = imm_i64!();
                stack.push(Variant::Ord(v))?;
            }
            Op::LoadStr => {
                let idx = imm_u32!();
                stack.push(Variant::Str(seg.string(idx).clone()))?;
            }
            Op::LoadEmptyVar => {
                let tag = VarTag::from_u8(imm_u8!()).ok_or(RuntimeError::Type)?;
                stack.push(Variant::empty_of(tag))?;
            }
            Op::LoadConst => {
                let sid = crate::types::StateId(imm_u32!());
                let didx = imm_u32!() as usize;
                let value = world.state(sid).defs[didx].value.clone();
                stack.push(value)?;
            }

            // --- 3. designator loaders
            Op::LoadSelfVar => {
                let idx = imm_u8!() as usize;
                let v = self_obj.get(idx).ok_or(RuntimeError::Index)?;
                stack.push(v)?;
            }
            Op::LeaSelfVar => {
                let index = imm_u8!();
                let obj: Obj = self_obj.clone();
                stack.push(Variant::VarPtr(Place::ObjSlot { obj, index }))?;
            }
            Op::LoadStkVar => {
                let offs = imm_i8!();
                let abs = stack.abs_index(offs as i32)?;
                let v = stack.at(abs)?.clone();
                stack.push(v)?;
            }
            Op::LeaStkVar => {
                let offs = imm_i8!();
                let abs = stack.abs_index(offs as i32)?;
                stack.push(Variant::VarPtr(Place::Stack(abs)))?;
            }
            Op::LoadMember => {
                let idx = imm_u8!() as usize;
                let obj = stack.pop();
                let obj = obj.as_obj()?;
                let v = obj
                    .var_slot(idx)
                    .ok_or(RuntimeError::Index)?
                    .borrow()
                    .clone();
                stack.push(v)?;
            }
            Op::LeaMember => {
                let index = imm_u8!();
                let v = stack.pop();
                let obj = v.as_obj()?.clone();
                stack.push(Variant::VarPtr(Place::ObjSlot { obj, index }))?;
            }
            Op::Deref => {
                let v = stack.pop();
                let r = v.as_ref_box()?;
                let inner = r.borrow().clone();
                stack.push(inner)?;
            }
            Op::LeaRef => {
                let v = stack.pop();
                let r = v.as_ref_box()?.clone();
                stack.push(Variant::VarPtr(Place::Ref(r)))?;
            }

            // --- 4. storers
            Op::InitSelfVar | Op::StoreSelfVar => {
                let idx = imm_u8!() as usize;
                let v = stack.pop();
                if !self_obj.set(idx, v) {
                    return Err(RuntimeError::Index);
                }
            }
            Op::InitStkVar | Op::StoreStkVar => {
                let offs = imm_i8!();
                let v = stack.pop();
                let abs = stack.abs_index(offs as i32)?;
                *stack.at_mut(abs)? = v;
            }
            Op::StoreMember => {
                let idx = imm_u8!() as usize;
                let v = stack.pop();
                let objv = stack.pop();
                let obj = objv.as_obj()?;
                let slot = obj.var_slot(idx).ok_or(RuntimeError::Index)?;
                *slot.borrow_mut() = v;
            }
            Op::StoreRef => {
                let v = stack.pop();
                let refv = stack.pop();
                *refv.as_ref_box()?.borrow_mut() = v;
            }
            Op::StoreStrElem => {
                let c = byte_of(stack.pop().as_ord()?)?;
                let i = index_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_str_mut()?.set_at(i, c))?;
            }
            Op::StoreVecElem => {
                let v = stack.pop();
                let i = index_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_vec_mut()?.set_elem(i, v))?;
            }
            Op::StoreDictElem => {
                let v = stack.pop();
                let key = stack.pop();
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    let d = t.as_dict_mut()?;
                    // Storing an empty value deletes the key.
                    if v.empty() {
                        d.find_erase(&key);
                    } else {
                        d.find_replace(key, v);
                    }
                    Ok(())
                })?;
            }
            Op::StoreByteDictElem => {
                let v = stack.pop();
                let i = byte_of(stack.pop().as_ord()?)? as usize;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    let vec = t.as_vec_mut()?;
                    vec.grow_to(i + 1);
                    vec.set_elem(i, v)
                })?;
            }

            // --- 5. designator misc
            Op::MkSubrange => {
                let base = crate::types::TypeId(imm_u32!());
                let right = stack.pop().as_ord()?;
                let left = stack.pop().as_ord()?;
                let owner = world.type_(base).owner;
                let sub = world.create_subrange(base, left, right, owner)?;
                stack.push(Variant::RtObj(world.type_obj(sub)))?;
            }
            Op::MkRef => {
                let v = stack.pop();
                stack.push(Variant::Ref(shn_core::RefBox::new(v)))?;
            }
            Op::NonEmpty => {
                let v = stack.pop();
                stack.push(Variant::Ord(i64::from(!v.empty())))?;
            }
            Op::Pop | Op::PopPod => {
                stack.pop();
            }
            Op::Cast => {
                let t = crate::types::TypeId(imm_u32!());
                let mut v = stack.pop();
                world.runtime_typecast(t, &mut v)?;
                stack.push(v)?;
            }
            Op::IsType => {
                let t = crate::types::TypeId(imm_u32!());
                let v = stack.pop();
                stack.push(Variant::Ord(i64::from(world.is_my_type(t, &v))))?;
            }

            // --- 6. strings, vectors
            Op::ChrToStr => {
                let c = byte_of(stack.pop().as_ord()?)?;
                stack.push(Variant::Str(Str::from_char(c)))?;
            }
            Op::ChrCat => {
                let c = byte_of(stack.pop().as_ord()?)?;
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_str_mut()?.push(c)?;
            }
            Op::StrCat => {
                let r = stack.pop();
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_str_mut()?.append(r.as_str()?)?;
            }
            Op::VarToVec => {
                let v = stack.pop();
                stack.push(Variant::Vec(shn_core::VarVec::from_one(v)))?;
            }
            Op::VarCat => {
                let v = stack.pop();
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_vec_mut()?.push(v);
            }
            Op::VecCat => {
                let r = stack.pop();
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_vec_mut()?.cat(r.as_vec()?);
            }
            Op::StrLen => {
                let s = stack.pop();
                stack.push(Variant::Ord(s.as_str()?.len() as i64))?;
            }
            Op::VecLen => {
                let v = stack.pop();
                stack.push(Variant::Ord(v.as_vec()?.len() as i64))?;
            }
            Op::StrElem => {
                let i = index_of(stack.pop().as_ord()?)?;
                let s = stack.pop();
                let c = s.as_str()?.at(i)?;
                stack.push(Variant::Ord(c as i64))?;
            }
            Op::VecElem => {
                let i = index_of(stack.pop().as_ord()?)?;
                let v = stack.pop();
                stack.push(v.as_vec()?.elem(i)?)?;
            }

            // --- 7. sets
            Op::ElemToSet => {
                let v = stack.pop();
                stack.push(Variant::Set(shn_core::VarSet::from_one(v)))?;
            }
            Op::SetAddElem => {
                let v = stack.pop();
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_set_mut()?.find_insert(v);
            }
            Op::ElemToByteSet => {
                let b = byte_of(stack.pop().as_ord()?)?;
                stack.push(Variant::OrdSet(shn_core::OrdSet::from_elem(b)))?;
            }
            Op::RngToByteSet => {
                let r = byte_of(stack.pop().as_ord()?)?;
                let l = byte_of(stack.pop().as_ord()?)?;
                stack.push(Variant::OrdSet(shn_core::OrdSet::from_range(l, r)))?;
            }
            Op::ByteSetAddElem => {
                let b = byte_of(stack.pop().as_ord()?)?;
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_ordset_mut()?.include(b);
            }
            Op::ByteSetAddRng => {
                let r = byte_of(stack.pop().as_ord()?)?;
                let l = byte_of(stack.pop().as_ord()?)?;
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_ordset_mut()?.include_range(l, r);
            }
            Op::InSet => {
                let s = stack.pop();
                let v = stack.pop();
                stack.push(Variant::Ord(i64::from(s.as_set()?.contains(&v))))?;
            }
            Op::InByteSet => {
                let s = stack.pop();
                let v = stack.pop().as_ord()?;
                stack.push(Variant::Ord(i64::from(s.as_ordset()?.contains(v))))?;
            }
            Op::InBounds => {
                let t = crate::types::TypeId(imm_u32!());
                let v = stack.pop().as_ord()?;
                let (l, r) = world.type_(t).ord_range().ok_or(RuntimeError::Type)?;
                stack.push(Variant::Ord(i64::from(v >= l && v <= r)))?;
            }
            Op::InRange => {
                let r = stack.pop().as_ord()?;
                let l = stack.pop().as_ord()?;
                let v = stack.pop().as_ord()?;
                stack.push(Variant::Ord(i64::from(v >= l && v <= r)))?;
            }
            Op::SetElem | Op::ByteSetElem => {
                // Set element selection yields the void element; these
                // exist to be rewritten into deleters.
                stack.pop();
                stack.pop();
                stack.push(Variant::Void)?;
            }

            // --- 8. dictionaries
            Op::PairToDict => {
                let v = stack.pop();
                let k = stack.pop();
                stack.push(Variant::Dict(shn_core::VarDict::from_pair(k, v)))?;
            }
            Op::DictAddPair => {
                let v = stack.pop();
                let k = stack.pop();
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                top.as_dict_mut()?.find_replace(k, v);
            }
            Op::PairToByteDict => {
                let v = stack.pop();
                let i = byte_of(stack.pop().as_ord()?)? as usize;
                let mut vec = shn_core::VarVec::new();
                vec.grow_to(i + 1);
                vec.set_elem(i, v)?;
                stack.push(Variant::Vec(vec))?;
            }
            Op::ByteDictAddPair => {
                let v = stack.pop();
                let i = byte_of(stack.pop().as_ord()?)? as usize;
                let top = stack.top_mut().ok_or(RuntimeError::Index)?;
                let vec = top.as_vec_mut()?;
                vec.grow_to(i + 1);
                vec.set_elem(i, v)?;
            }
            Op::DictElem => {
                let k = stack.pop();
                let d = stack.pop();
                let v = d.as_dict()?.find(&k).ok_or(RuntimeError::Index)?;
                stack.push(v)?;
            }
            Op::ByteDictElem => {
                let i = byte_of(stack.pop().as_ord()?)? as usize;
                let d = stack.pop();
                let vec = d.as_vec()?;
                let v = if i < vec.len() { vec.elem(i)? } else { Variant::Void };
                stack.push(v)?;
            }
            Op::InDict => {
                let d = stack.pop();
                let k = stack.pop();
                stack.push(Variant::Ord(i64::from(d.as_dict()?.contains(&k))))?;
            }
            Op::InByteDict => {
                let d = stack.pop();
                let i = stack.pop().as_ord()?;
                let vec = d.as_vec()?;
                let present = match usize::try_from(i) {
                    Ok(i) if i < vec.len() => !vec.elem(i)?.empty(),
                    _ => false,
                };
                stack.push(Variant::Ord(i64::from(present)))?;
            }

            // --- 9. in-place operations
            Op::AddAssign | Op::SubAssign | Op::MulAssign | Op::DivAssign | Op::ModAssign => {
                let r = stack.pop().as_ord()?;
                let place = stack.pop();
                if (op == Op::DivAssign || op == Op::ModAssign) && r == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                with_place(stack, place.as_place()?, |t| {
                    let l = t.as_ord()?;
                    let v = match op {
                        Op::AddAssign => l.wrapping_add(r),
                        Op::SubAssign => l.wrapping_sub(r),
                        Op::MulAssign => l.wrapping_mul(r),
                        Op::DivAssign => l.wrapping_div(r),
                        _ => l.wrapping_rem(r),
                    };
                    *t = Variant::Ord(v);
                    Ok(())
                })?;
            }
            Op::ChrCatAssign => {
                let c = byte_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_str_mut()?.push(c))?;
            }
            Op::StrCatAssign => {
                let s = stack.pop();
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_str_mut()?.append(s.as_str()?))?;
            }
            Op::VarCatAssign => {
                let v = stack.pop();
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    t.as_vec_mut()?.push(v);
                    Ok(())
                })?;
            }
            Op::VecCatAssign => {
                let v = stack.pop();
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    t.as_vec_mut()?.cat(v.as_vec()?);
                    Ok(())
                })?;
            }
            Op::StrIns => {
                let c = byte_of(stack.pop().as_ord()?)?;
                let i = index_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_str_mut()?.insert(i, c))?;
            }
            Op::VecIns => {
                let v = stack.pop();
                let i = index_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_vec_mut()?.insert(i, v))?;
            }
            Op::DelStrElem => {
                let i = index_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_str_mut()?.erase(i, 1))?;
            }
            Op::DelVecElem => {
                let i = index_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| t.as_vec_mut()?.erase(i))?;
            }
            Op::DelDictElem => {
                let k = stack.pop();
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    t.as_dict_mut()?.find_erase(&k);
                    Ok(())
                })?;
            }
            Op::DelByteDictElem => {
                let i = byte_of(stack.pop().as_ord()?)? as usize;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    let vec = t.as_vec_mut()?;
                    if i < vec.len() {
                        vec.set_elem(i, Variant::Void)?;
                    }
                    Ok(())
                })?;
            }
            Op::DelSetElem => {
                let k = stack.pop();
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    t.as_set_mut()?.find_erase(&k);
                    Ok(())
                })?;
            }
            Op::DelByteSetElem => {
                let b = byte_of(stack.pop().as_ord()?)?;
                let place = stack.pop();
                with_place(stack, place.as_place()?, |t| {
                    t.as_ordset_mut()?.exclude(b);
                    Ok(())
                })?;
            }

            // --- 10. arithmetic
            Op::Add => arith!(|l, r| l.wrapping_add(r)),
            Op::Sub => arith!(|l, r| l.wrapping_sub(r)),
            Op::Mul => arith!(|l, r| l.wrapping_mul(r)),
            Op::Div => {
                let r = stack.pop().as_ord()?;
                let l = stack.pop().as_ord()?;
                if r == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                stack.push(Variant::Ord(l.wrapping_div(r)))?;
            }
            Op::Mod => {
                let r = stack.pop().as_ord()?;
                let l = stack.pop().as_ord()?;
                if r == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                stack.push(Variant::Ord(l.wrapping_rem(r)))?;
            }
            Op::BitAnd => arith!(|l, r| l & r),
            Op::BitOr => arith!(|l, r| l | r),
            Op::BitXor => arith!(|l, r| l ^ r),
            // Shift counts reduce modulo the bit width.
            Op::BitShl => arith!(|l, r| l.wrapping_shl(r as u32)),
            Op::BitShr => arith!(|l, r| l.wrapping_shr(r as u32)),
            Op::Neg => {
                let v = stack.pop().as_ord()?;
                stack.push(Variant::Ord(v.wrapping_neg()))?;
            }
            Op::BitNot => {
                let v = stack.pop().as_ord()?;
                stack.push(Variant::Ord(!v))?;
            }
            Op::Not => {
                let v = stack.pop().as_ord()?;
                stack.push(Variant::Ord(i64::from(v == 0)))?;
            }

            // --- 11. comparisons
            Op::CmpOrd => {
                let r = stack.pop().as_ord()?;
                let l = stack.pop().as_ord()?;
                stack.push(Variant::Ord(cmp_to_ord(l.cmp(&r))))?;
            }
            Op::CmpStr => {
                let r = stack.pop();
                let l = stack.pop();
                stack.push(Variant::Ord(cmp_to_ord(l.as_str()?.compare(r.as_str()?))))?;
            }
            Op::CmpVar => {
                // Yields 0 for equal so the Equal/NotEq collapse below
                // applies uniformly.
                let r = stack.pop();
                let l = stack.pop();
                stack.push(Variant::Ord(i64::from(l != r)))?;
            }
            Op::Equal | Op::NotEq | Op::LessThan | Op::LessEq | Op::GreaterThan
            | Op::GreaterEq => {
                let c = stack.pop().as_ord()?;
                let b = match op {
                    Op::Equal => c == 0,
                    Op::NotEq => c != 0,
                    Op::LessThan => c < 0,
                    Op::LessEq => c <= 0,
                    Op::GreaterThan => c > 0,
                    _ => c >= 0,
                };
                stack.push(Variant::Ord(i64::from(b)))?;
            }
            Op::CaseOrd => {
                let label = stack.pop().as_ord()?;
                let subj = stack.top().as_ord()?;
                stack.push(Variant::Ord(i64::from(subj == label)))?;
            }
            Op::CaseRange => {
                let hi = stack.pop().as_ord()?;
                let lo = stack.pop().as_ord()?;
                let subj = stack.top().as_ord()?;
                stack.push(Variant::Ord(i64::from(subj >= lo && subj <= hi)))?;
            }
            Op::CaseStr => {
                let label = stack.pop();
                let eq = stack.top().as_str()? == label.as_str()?;
                stack.push(Variant::Ord(i64::from(eq)))?;
            }
            Op::CaseVar => {
                let label = stack.pop();
                let eq = *stack.top() == label;
                stack.push(Variant::Ord(i64::from(eq)))?;
            }

            // --- 12. jumps
            Op::Jump => {
                let offs = imm_i16!();
                ip = (ip as i64 + offs as i64) as usize;
            }
            Op::JumpFalse => {
                let offs = imm_i16!();
                if stack.pop().as_ord()? == 0 {
                    ip = (ip as i64 + offs as i64) as usize;
                }
            }
            Op::JumpTrue => {
                let offs = imm_i16!();
                if stack.pop().as_ord()? != 0 {
                    ip = (ip as i64 + offs as i64) as usize;
                }
            }
            Op::JumpAnd => {
                // Pop iff no jump: a false operand survives as the result.
                let offs = imm_i16!();
                if stack.top().as_ord()? == 0 {
                    ip = (ip as i64 + offs as i64) as usize;
                } else {
                    stack.pop();
                }
            }
            Op::JumpOr => {
                let offs = imm_i16!();
                if stack.top().as_ord()? != 0 {
                    ip = (ip as i64 + offs as i64) as usize;
                } else {
                    stack.pop();
                }
            }

            // --- 13. calls
            Op::Call => {
                let sid = crate::types::StateId(imm_u32!());
                let (callee_code, argc) = {
                    let st = world.state(sid);
                    (st.code.clone(), st.prototype.arg_count())
                };
                let saved_base = stack.base();
                stack.set_base(stack.len());
                let result = run(world, self_obj, stack, &callee_code);
                // The callee's locals may remain above its base; drop
                // them, then the arguments, leaving the return slot.
                stack.truncate(stack.base());
                stack.set_base(saved_base);
                result?;
                for _ in 0..argc {
                    stack.pop();
                }
            }

            // --- 14. debug
            Op::LineNum => {
                let line = imm_u32!();
                CUR_LINE.with(|l| l.set(line));
            }
            Op::Assert => {
                let cond_idx = imm_u32!();
                let line = imm_u32!();
                if stack.pop().as_ord()? == 0 {
                    let module = seg
                        .state
                        .map(|s| world.state(s).name.clone())
                        .unwrap_or_else(|| "<const>".into());
                    return Err(RuntimeError::Assertion {
                        cond: seg.string(cond_idx).to_string(),
                        module,
                        line,
                    });
                }
            }
            Op::Dump => {
                let expr_idx = imm_u32!();
                let t = crate::types::TypeId(imm_u32!());
                let v = stack.pop();
                let mut text = String::new();
                let _ = v.dump(&mut text);
                let msg = format!(
                    "{}: {} = {}\n",
                    seg.string(expr_idx),
                    world.type_name(t),
                    text
                );
                if let Some(serr) = world.serr_obj() {
                    serr.enq_bytes(msg.as_bytes());
                }
            }

            Op::Inv => return Err(RuntimeError::Type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codeseg::CodeSeg;

    fn exec(seg: &CodeSeg) -> (World, RtStack) {
        let mut world = World::new();
        let scratch = StateObj::scratch();
        let mut stack = RtStack::new(128);
        run(&mut world, &scratch, &mut stack, seg).unwrap();
        (world, stack)
    }

    fn closed(build: impl FnOnce(&mut CodeSeg)) -> CodeSeg {
        let mut seg = CodeSeg::new(None);
        build(&mut seg);
        seg.close();
        seg
    }

    #[test]
    fn test_arithmetic() {
        // 2 * (3 + 4)
        let seg = closed(|s| {
            s.append_op(Op::LoadByte);
            s.append_u8(2);
            s.append_op(Op::LoadByte);
            s.append_u8(3);
            s.append_op(Op::LoadByte);
            s.append_u8(4);
            s.append_op(Op::Add);
            s.append_op(Op::Mul);
        });
        let (_, mut stack) = exec(&seg);
        assert_eq!(stack.pop(), Variant::Ord(14));
    }

    #[test]
    fn test_division_by_zero() {
        let seg = closed(|s| {
            s.append_op(Op::Load1);
            s.append_op(Op::Load0);
            s.append_op(Op::Div);
        });
        let mut world = World::new();
        let scratch = StateObj::scratch();
        let mut stack = RtStack::new(16);
        assert!(matches!(
            run(&mut world, &scratch, &mut stack, &seg),
            Err(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn test_string_concat_and_len() {
        let seg = {
            let mut s = CodeSeg::new(None);
            let a = s.add_string(Str::from("ab"));
            let b = s.add_string(Str::from("cd"));
            s.append_op(Op::LoadStr);
            s.append_u32(a);
            s.append_op(Op::LoadStr);
            s.append_u32(b);
            s.append_op(Op::StrCat);
            s.append_op(Op::StrLen);
            s.close();
            s
        };
        let (_, mut stack) = exec(&seg);
        assert_eq!(stack.pop(), Variant::Ord(4));
    }

    #[test]
    fn test_byte_set_membership() {
        // {1..3, 7}: 2 in set, 5 not in set
        let seg = closed(|s| {
            s.append_op(Op::LoadByte);
            s.append_u8(2); // subject
            s.append_op(Op::Load1);
            s.append_op(Op::LoadByte);
            s.append_u8(3);
            s.append_op(Op::RngToByteSet);
            s.append_op(Op::LoadByte);
            s.append_u8(7);
            s.append_op(Op::ByteSetAddElem);
            s.append_op(Op::InByteSet);
        });
        let (_, mut stack) = exec(&seg);
        assert_eq!(stack.pop(), Variant::Ord(1));
    }

    #[test]
    fn test_jump_and_short_circuit() {
        // false and <divide by zero>: must not evaluate the rhs
        let mut seg = CodeSeg::new(None);
        seg.append_op(Op::Load0); // false
        seg.append_op(Op::JumpAnd);
        let patch = seg.len();
        seg.append_i16(0);
        seg.append_op(Op::Load1);
        seg.append_op(Op::Load0);
        seg.append_op(Op::Div);
        let target = seg.len();
        seg.set_jump_offs_at(patch, (target - (patch + 2)) as i16);
        seg.close();
        let (_, mut stack) = exec(&seg);
        assert_eq!(stack.pop(), Variant::Ord(0));
    }

    #[test]
    fn test_store_through_place_copy_on_write() {
        // A dict on the stack, another handle kept aside; store through a
        // place and verify the snapshot is untouched.
        let mut world = World::new();
        let scratch = StateObj::scratch();
        let mut stack = RtStack::new(16);

        let dict = shn_core::VarDict::from_pair(Variant::Ord(1), Variant::Str(Str::from("x")));
        let snapshot = dict.clone();
        stack.push(Variant::Dict(dict)).unwrap();

        let seg = closed(|s| {
            s.append_op(Op::LeaStkVar);
            s.append_i8(0);
            s.append_op(Op::Load1);
            let z = s.add_string(Str::from("z"));
            s.append_op(Op::LoadStr);
            s.append_u32(z);
            s.append_op(Op::StoreDictElem);
        });
        run(&mut world, &scratch, &mut stack, &seg).unwrap();

        let stored = stack.pop();
        assert_eq!(
            stored.as_dict().unwrap().find(&Variant::Ord(1)).unwrap(),
            Variant::Str(Str::from("z"))
        );
        assert_eq!(snapshot.find(&Variant::Ord(1)).unwrap(), Variant::Str(Str::from("x")));
    }

    #[test]
    fn test_dict_store_empty_deletes() {
        let mut world = World::new();
        let scratch = StateObj::scratch();
        let mut stack = RtStack::new(16);
        let dict = shn_core::VarDict::from_pair(Variant::Ord(1), Variant::Str(Str::from("x")));
        stack.push(Variant::Dict(dict)).unwrap();

        let seg = closed(|s| {
            s.append_op(Op::LeaStkVar);
            s.append_i8(0);
            s.append_op(Op::Load1);
            s.append_op(Op::LoadNull);
            s.append_op(Op::StoreDictElem);
        });
        run(&mut world, &scratch, &mut stack, &seg).unwrap();
        let stored = stack.pop();
        assert_eq!(stored.as_dict().unwrap().len(), 0);
    }

    #[test]
    fn test_exit_sets_sresult() {
        let mut world = World::new();
        let sio = crate::fifo::MemFifo::new();
        let serr = crate::fifo::MemFifo::new();
        world.instantiate_queenbee(sio, serr);
        let scratch = StateObj::scratch();
        let mut stack = RtStack::new(16);
        let seg = closed(|s| {
            s.append_op(Op::LoadByte);
            s.append_u8(42);
            s.append_op(Op::Exit);
        });
        match run(&mut world, &scratch, &mut stack, &seg) {
            Err(RuntimeError::Exit(v)) => assert_eq!(v, Variant::Ord(42)),
            other => panic!("expected exit, got {:?}", other),
        }
        assert_eq!(world.sresult(), Variant::Ord(42));
    }

    #[test]
    fn test_ref_make_deref_store() {
        let seg = closed(|s| {
            s.append_op(Op::LoadByte);
            s.append_u8(5);
            s.append_op(Op::MkRef);
            s.append_op(Op::Deref);
        });
        let (_, mut stack) = exec(&seg);
        assert_eq!(stack.pop(), Variant::Ord(5));
    }

    #[test]
    fn test_case_helpers_preserve_subject() {
        let seg = closed(|s| {
            s.append_op(Op::LoadByte);
            s.append_u8(7); // subject
            s.append_op(Op::LoadByte);
            s.append_u8(7);
            s.append_op(Op::CaseOrd);
        });
        let (_, mut stack) = exec(&seg);
        assert_eq!(stack.pop(), Variant::Ord(1)); // match result
        assert_eq!(stack.pop(), Variant::Ord(7)); // subject preserved
    }
}
