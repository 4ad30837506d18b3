//! The code generator.
//!
//! Emits opcodes while simulating the operand stack at compile time: every
//! value-producing opcode pushes a (type, offset) pair onto the simulated
//! stack, every consumer pops and type-checks. The offsets of "primary
//! loaders" (pure value loads that can begin a sub-expression) bound the
//! code regions that can be truncated wholesale (`undo_subexpr`), which is
//! what makes designator chains, implicit-cast rewrites and constant
//! folding work without an AST.
//!
//! L-values are compiled by first emitting the loader chain, then
//! rewriting: the trailing loader becomes its storer form and is cut out
//! of the stream to be re-appended after the RHS; any loader before it
//! becomes its load-effective-address form so the storer receives a place
//! instead of a value.

use shn_core::{RtStack, VarTag, Variant};
use shn_runtime::codeseg::CodeSeg;
use shn_runtime::opcodes::{
    is_bool_jump, is_cmp_op, is_grounded_loader, is_jump, is_primary_loader, Op,
};
use shn_runtime::stateobj::StateObj;
use shn_runtime::types::{StateId, TypeId, TypeKind};
use shn_runtime::vm;
use shn_runtime::world::World;

use crate::error::CompileError;

type CResult<T> = Result<T, CompileError>;

fn loader_to_storer(op: Op) -> CResult<Op> {
    Ok(match op {
        Op::LoadSelfVar => Op::StoreSelfVar,
        Op::LoadStkVar => Op::StoreStkVar,
        Op::LoadMember => Op::StoreMember,
        Op::Deref => Op::StoreRef,
        // end grounded loaders
        Op::StrElem => Op::StoreStrElem,
        Op::VecElem => Op::StoreVecElem,
        Op::DictElem => Op::StoreDictElem,
        Op::ByteDictElem => Op::StoreByteDictElem,
        _ => return Err(CompileError::NotAnLValue("Not an l-value".into())),
    })
}

fn loader_to_lea(op: Op) -> CResult<Op> {
    Ok(match op {
        Op::LoadSelfVar => Op::LeaSelfVar,
        Op::LoadStkVar => Op::LeaStkVar,
        Op::LoadMember => Op::LeaMember,
        Op::Deref => Op::LeaRef,
        _ => return Err(CompileError::NotAnLValue("Not an l-value".into())),
    })
}

fn loader_to_inserter(op: Op) -> CResult<Op> {
    Ok(match op {
        Op::StrElem => Op::StrIns,
        Op::VecElem => Op::VecIns,
        _ => return Err(CompileError::NotAnLValue("Not an insertable location".into())),
    })
}

fn loader_to_deleter(op: Op) -> CResult<Op> {
    Ok(match op {
        Op::StrElem => Op::DelStrElem,
        Op::VecElem => Op::DelVecElem,
        Op::DictElem => Op::DelDictElem,
        Op::ByteDictElem => Op::DelByteDictElem,
        Op::SetElem => Op::DelSetElem,
        Op::ByteSetElem => Op::DelByteSetElem,
        _ => return Err(CompileError::NotAnLValue("Not an addressable container element".into())),
    })
}

/// One simulated operand-stack slot: its static type and the offset of
/// the instruction that produced it.
#[derive(Debug, Clone, Copy)]
struct SimItem {
    ty: TypeId,
    loader_offs: usize,
}

pub struct CodeGen {
    /// Module being compiled (resolution fallback and const folding).
    pub module: StateId,
    /// State whose code this is; None while compiling a const expression.
    code_owner: Option<StateId>,
    /// State that registers derived types.
    type_reg: StateId,
    seg: CodeSeg,
    sim: Vec<SimItem>,
    /// Offsets of primary loaders, one live entry per simulated slot
    /// whose sub-expression can be truncated.
    primary_loaders: Vec<usize>,
    /// Producing offset of the most recently popped slot, for l-value
    /// chain rewriting.
    prev_loader_offs: Option<usize>,
    locals: usize,
}

impl CodeGen {
    pub fn new(module: StateId, code_owner: StateId) -> CodeGen {
        CodeGen {
            module,
            code_owner: Some(code_owner),
            type_reg: code_owner,
            seg: CodeSeg::new(Some(code_owner)),
            sim: Vec::new(),
            primary_loaders: Vec::new(),
            prev_loader_offs: None,
            locals: 0,
        }
    }

    /// A compile-time generator: emitted code runs immediately on the VM
    /// and must not touch variables.
    pub fn new_const(module: StateId, type_reg: StateId) -> CodeGen {
        CodeGen {
            module,
            code_owner: None,
            type_reg,
            seg: CodeSeg::new(None),
            sim: Vec::new(),
            primary_loaders: Vec::new(),
            prev_loader_offs: None,
            locals: 0,
        }
    }

    pub fn is_compile_time(&self) -> bool {
        self.code_owner.is_none()
    }

    pub fn stack_level(&self) -> usize {
        self.sim.len()
    }

    pub fn locals(&self) -> usize {
        self.locals
    }

    pub fn cur_offs(&self) -> usize {
        self.seg.len()
    }

    // --- simulated stack --------------------------------------------------- //

    fn stk_push(&mut self, ty: TypeId, offs: usize) {
        self.sim.push(SimItem { ty, loader_offs: offs });
        if is_primary_loader(self.seg.op_at(offs)) {
            self.primary_loaders.push(offs);
        }
        if self.sim.len() > self.seg.stack_size {
            self.seg.stack_size = self.sim.len();
        }
    }

    fn stk_pop(&mut self) -> TypeId {
        let item = self.sim.pop().expect("simulated stack underflow");
        self.prev_loader_offs = Some(item.loader_offs);
        if let Some(&last) = self.primary_loaders.last() {
            if item.loader_offs < last {
                self.primary_loaders.pop();
            }
        }
        item.ty
    }

    /// Type of the i-th slot from the top (1 is the top itself).
    pub fn stk_type_at(&self, i: usize) -> TypeId {
        self.sim[self.sim.len() - i].ty
    }

    pub fn stk_type(&self) -> TypeId {
        self.stk_type_at(1)
    }

    fn stk_replace_type(&mut self, ty: TypeId) {
        self.sim.last_mut().expect("simulated stack underflow").ty = ty;
    }

    fn stk_loader_offs(&self) -> usize {
        self.sim.last().expect("simulated stack underflow").loader_offs
    }

    fn stk_prev_loader_offs(&self) -> CResult<usize> {
        self.prev_loader_offs
            .ok_or_else(|| CompileError::NotAnLValue("Not an l-value".into()))
    }

    /// Drop the top simulated slot without touching the emitted code;
    /// used at branch joins where another branch supplies the value.
    pub fn just_forget(&mut self) {
        self.stk_pop();
    }

    /// Discard the whole sub-expression that produced the top slot: the
    /// code is truncated back to its primary loader.
    pub fn undo_subexpr(&mut self) {
        let from = self.primary_loaders.pop().expect("no primary loader to undo");
        self.seg.erase_from(from);
        self.sim.pop().expect("simulated stack underflow");
        self.prev_loader_offs = None;
    }

    // --- emission helpers --------------------------------------------------- //

    fn add_op(&mut self, op: Op) {
        self.seg.append_op(op);
    }

    fn add_op_push(&mut self, ty: TypeId, op: Op) {
        let offs = self.cur_offs();
        self.seg.append_op(op);
        self.stk_push(ty, offs);
    }

    fn add_op_u8_push(&mut self, ty: TypeId, op: Op, arg: u8) {
        let offs = self.cur_offs();
        self.seg.append_op(op);
        self.seg.append_u8(arg);
        self.stk_push(ty, offs);
    }

    fn add_op_i8_push(&mut self, ty: TypeId, op: Op, arg: i8) {
        let offs = self.cur_offs();
        self.seg.append_op(op);
        self.seg.append_i8(arg);
        self.stk_push(ty, offs);
    }

    fn add_op_u32_push(&mut self, ty: TypeId, op: Op, arg: u32) {
        let offs = self.cur_offs();
        self.seg.append_op(op);
        self.seg.append_u32(arg);
        self.stk_push(ty, offs);
    }

    fn is_pod(&self, w: &World, ty: TypeId) -> bool {
        matches!(w.var_tag(ty), VarTag::Void | VarTag::Ord | VarTag::Real)
    }

    // --- casts -------------------------------------------------------------- //

    /// The implicit-cast ladder. True when the top slot now has type `to`.
    pub fn try_implicit_cast(&mut self, w: &mut World, to: TypeId) -> CResult<bool> {
        let from = self.stk_type();

        if from == to {
            return Ok(true);
        }

        if w.is_variant_kind(to) || w.can_assign(from, to) {
            self.stk_replace_type(to);
            return Ok(true);
        }

        // Vector elements convert to one-element vectors when a vector is
        // wanted, e.g. char -> str.
        if w.is_any_vec(to) && w.identical(from, w.elem_of(to)) {
            self.elem_to_vec(w, Some(to))?;
            return Ok(true);
        }

        // The empty container literal takes the type its context wants.
        if w.is_nullcont(from) {
            self.undo_subexpr();
            self.load_empty_const(w, to);
            return Ok(true);
        }

        // A state name loaded as a function pointer reverts to a plain
        // type reference when a type context asks for one.
        if w.is_typeref(to) {
            if let TypeKind::FuncPtr(proto) = &w.type_(from).kind {
                let ret = proto.ret;
                self.undo_subexpr();
                self.load_typeref_const(w, ret);
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub fn implicit_cast(&mut self, w: &mut World, to: TypeId, errmsg: &str) -> CResult<()> {
        if self.try_implicit_cast(w, to)? {
            Ok(())
        } else {
            Err(CompileError::Type(errmsg.into()))
        }
    }

    pub fn explicit_cast(&mut self, w: &mut World, to: TypeId) -> CResult<()> {
        if self.try_implicit_cast(w, to)? {
            return Ok(());
        }
        let from = self.stk_type();
        if self.types_any_ord(w, from, to) {
            self.stk_replace_type(to);
            Ok(())
        } else if w.is_variant_kind(from) {
            self.stk_pop();
            self.add_op_u32_push(to, Op::Cast, to.0);
            Ok(())
        } else {
            Err(CompileError::InvalidCast("Invalid explicit typecast".into()))
        }
    }

    fn types_any_ord(&self, w: &World, a: TypeId, b: TypeId) -> bool {
        w.type_(a).is_any_ord() && w.type_(b).is_any_ord()
    }

    pub fn is_type(&mut self, w: &mut World, to: TypeId) {
        let from = self.stk_type();
        if w.can_assign(from, to) {
            self.undo_subexpr();
            self.load_const(w, w.def_bool, &Variant::Ord(1)).expect("bool const");
        } else if w.type_(from).is_any_state() || w.is_variant_kind(from) {
            self.stk_pop();
            self.add_op_u32_push(w.def_bool, Op::IsType, to.0);
        } else {
            self.undo_subexpr();
            self.load_const(w, w.def_bool, &Variant::Ord(0)).expect("bool const");
        }
    }

    // --- values and frame -------------------------------------------------- //

    pub fn pop_value(&mut self, w: &World) {
        let ty = self.stk_pop();
        self.add_op(if self.is_pod(w, ty) { Op::PopPod } else { Op::Pop });
    }

    pub fn deinit_local_var(&mut self, w: &World) {
        assert_eq!(self.locals, self.stack_level(), "local var is not on top");
        self.pop_value(w);
        self.locals -= 1;
    }

    /// Recover the type immediate of a `LoadTypeRef` the top slot came
    /// from, discarding that load.
    pub fn undo_type_ref(&mut self, w: &mut World) -> CResult<TypeId> {
        let tr = w.def_typeref;
        self.implicit_cast(w, tr, "Const type reference expected")?;
        let offs = self.stk_loader_offs();
        if self.seg.op_at(offs) != Op::LoadTypeRef {
            return Err(CompileError::Type("Const type reference expected".into()));
        }
        let ty = TypeId(self.seg.type_arg_at(offs));
        self.undo_subexpr();
        Ok(ty)
    }

    pub fn undo_ord_type_ref(&mut self, w: &mut World) -> CResult<TypeId> {
        let ty = self.undo_type_ref(w)?;
        if !w.type_(ty).is_any_ord() {
            return Err(CompileError::Type("Ordinal type reference expected".into()));
        }
        Ok(ty)
    }

    /// Auto-dereference: loads the referent when the top is a reference.
    pub fn deref(&mut self, w: &World) -> CResult<bool> {
        let ty = self.stk_type();
        if let TypeKind::Ref(to) = w.type_(ty).kind {
            if !w.type_(to).is_derefable() {
                return Err(CompileError::Type("Can't dereference this type".into()));
            }
            self.stk_pop();
            self.add_op_push(to, Op::Deref);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn mkref(&mut self, w: &mut World) -> CResult<()> {
        let ty = self.stk_type();
        if w.is_reference(ty) {
            return Ok(());
        }
        if self.seg.op_at(self.stk_loader_offs()) == Op::Deref {
            return Err(CompileError::Type("Superfluous automatic dereference".into()));
        }
        if !w.type_(ty).is_derefable() {
            return Err(CompileError::Type("Can't convert to reference".into()));
        }
        self.stk_pop();
        let rt = w.ref_type(ty, self.type_reg);
        self.add_op_push(rt, Op::MkRef);
        Ok(())
    }

    pub fn non_empty(&mut self, w: &World) {
        let ty = self.stk_type();
        if !w.is_bool(ty) {
            self.stk_pop();
            self.add_op_push(w.def_bool, Op::NonEmpty);
        }
    }

    // --- loaders ------------------------------------------------------------ //

    /// The simulated type of a type reference is `typeref`; the
    /// referenced type travels as the immediate.
    pub fn load_typeref_const(&mut self, w: &World, ty: TypeId) {
        self.add_op_u32_push(w.def_typeref, Op::LoadTypeRef, ty.0);
    }

    pub fn load_const(&mut self, w: &World, ty: TypeId, value: &Variant) -> CResult<()> {
        match value {
            Variant::Void => self.add_op_push(ty, Op::LoadNull),
            Variant::Ord(i) => {
                let i = *i;
                if i == 0 {
                    self.add_op_push(ty, Op::Load0);
                } else if i == 1 {
                    self.add_op_push(ty, Op::Load1);
                } else if (0..=255).contains(&i) {
                    self.add_op_u8_push(ty, Op::LoadByte, i as u8);
                } else {
                    let offs = self.cur_offs();
                    self.seg.append_op(Op::LoadOrd);
                    self.seg.append_i64(i);
                    self.stk_push(ty, offs);
                }
            }
            Variant::Str(s) => {
                let idx = self.seg.add_string(s.clone());
                self.add_op_u32_push(ty, Op::LoadStr, idx);
            }
            Variant::RtObj(o) => match w.type_id_of_obj(o) {
                Some(t) => self.load_typeref_const(w, t),
                None => return Err(CompileError::Type("Unknown constant literal".into())),
            },
            _ => return Err(CompileError::Type("Unknown constant literal".into())),
        }
        Ok(())
    }

    pub fn load_empty_const(&mut self, w: &World, ty: TypeId) {
        let tag = w.var_tag(ty);
        self.add_op_u8_push(ty, Op::LoadEmptyVar, tag as u8);
    }

    pub fn load_definition(&mut self, w: &mut World, sid: StateId, didx: u32) -> CResult<()> {
        let def = &w.state(sid).defs[didx as usize];
        let (def_ty, value) = (def.ty, def.value.clone());
        if let Some(aliased) = w.aliased_type(def) {
            self.load_typeref_const(w, aliased);
            return Ok(());
        }
        let simple = w.is_void(def_ty)
            || w.type_(def_ty).is_any_ord()
            || w.is_byte_vec(def_ty)
            || w.is_typeref(def_ty);
        if simple {
            self.load_const(w, def_ty, &value)
        } else {
            let offs = self.cur_offs();
            self.seg.append_op(Op::LoadConst);
            self.seg.append_u32(sid.0);
            self.seg.append_u32(didx);
            self.stk_push(def_ty, offs);
            Ok(())
        }
    }

    /// Inner-variable load. In const expressions a trap opcode stands in
    /// so the fold fails only if the value is actually needed.
    pub fn load_self_var(&mut self, w: &World, id: u8) {
        let ty = self.self_var_type(w, id);
        if self.is_compile_time() {
            self.add_op_push(ty, Op::ConstExprErr);
        } else {
            self.add_op_u8_push(ty, Op::LoadSelfVar, id);
        }
    }

    fn self_var_type(&self, w: &World, id: u8) -> TypeId {
        let owner = self.code_owner.unwrap_or(self.module);
        w.state(owner).self_vars[id as usize].ty
    }

    /// Stack-variable load: positive offsets are locals, negative are
    /// arguments of the enclosing function.
    pub fn load_stk_var(&mut self, ty: TypeId, offs: i8) {
        if self.is_compile_time() {
            self.add_op_push(ty, Op::ConstExprErr);
        } else {
            self.add_op_i8_push(ty, Op::LoadStkVar, offs);
        }
    }

    /// Member load from a state object on the stack.
    pub fn load_member(&mut self, w: &mut World, id: u8) -> CResult<()> {
        let obj_ty = self.stk_pop();
        let sid = match w.type_(obj_ty).kind {
            TypeKind::State(sid) => sid,
            _ => return Err(CompileError::Type("Invalid member selection".into())),
        };
        let ty = w.state(sid).self_vars[id as usize].ty;
        if self.is_compile_time() {
            self.add_op_push(ty, Op::ConstExprErr);
        } else {
            self.add_op_u8_push(ty, Op::LoadMember, id);
        }
        Ok(())
    }

    // --- storers ------------------------------------------------------------ //

    /// A new local simply stays on the operand stack; only the type is
    /// checked and the local count advanced.
    pub fn init_stk_var(&mut self, w: &mut World, ty: TypeId) -> CResult<()> {
        assert_eq!(
            self.locals,
            self.stack_level() - 1,
            "local var initializer out of sequence"
        );
        self.implicit_cast(w, ty, "Variable type mismatch")?;
        self.locals += 1;
        Ok(())
    }

    pub fn init_self_var(&mut self, w: &mut World, id: u8) -> CResult<()> {
        let ty = self.self_var_type(w, id);
        self.implicit_cast(w, ty, "Variable type mismatch")?;
        self.stk_pop();
        self.add_op(Op::StoreSelfVar);
        self.seg.append_u8(id);
        Ok(())
    }

    // --- containers ---------------------------------------------------------- //

    /// Square-bracket selection on a string, vector, dictionary or set.
    pub fn load_container_elem(&mut self, w: &mut World) -> CResult<()> {
        let cont = self.stk_type_at(2);
        let op = if w.is_any_vec(cont) {
            let int = w.def_int;
            self.implicit_cast(w, int, "Vector index must be integer")?;
            if w.is_byte_vec(cont) {
                Op::StrElem
            } else {
                Op::VecElem
            }
        } else if w.is_any_dict(cont) {
            let idx = w.index_of(cont);
            self.implicit_cast(w, idx, "Dictionary key type mismatch")?;
            if w.is_byte_dict(cont) {
                Op::ByteDictElem
            } else {
                Op::DictElem
            }
        } else if w.is_any_set(cont) {
            // Selection on a set yields the void element; it exists to be
            // rewritten by `del`.
            let idx = w.index_of(cont);
            self.implicit_cast(w, idx, "Set element type mismatch")?;
            if w.is_byte_set(cont) {
                Op::ByteSetElem
            } else {
                Op::SetElem
            }
        } else {
            return Err(CompileError::Type("Vector/dictionary/set expected".into()));
        };
        self.stk_pop();
        self.stk_pop();
        let elem = w.elem_of(cont);
        self.add_op_push(elem, op);
        Ok(())
    }

    /// `#` length.
    pub fn length(&mut self, w: &mut World) -> CResult<()> {
        let ty = self.stk_type();
        if w.is_nullcont(ty) {
            self.undo_subexpr();
            return self.load_const(w, w.def_int, &Variant::Ord(0));
        }
        let op = if w.is_byte_vec(ty) {
            Op::StrLen
        } else if w.is_any_vec(ty) || w.is_byte_dict(ty) {
            Op::VecLen
        } else {
            return Err(CompileError::Type("'#' expects vector or string".into()));
        };
        self.stk_pop();
        self.add_op_push(w.def_int, op);
        Ok(())
    }

    /// Wrap the top element into a one-element vector (possibly of a
    /// requested vector type).
    pub fn elem_to_vec(&mut self, w: &mut World, vec_type: Option<TypeId>) -> CResult<TypeId> {
        let elem = self.stk_type();
        let vec_type = match vec_type {
            Some(v) => {
                if !w.is_any_vec(v) {
                    return Err(CompileError::Type("Vector type expected".into()));
                }
                let e = w.elem_of(v);
                self.implicit_cast(w, e, "Vector/string element type mismatch")?;
                v
            }
            None => w.derive_vec(elem, self.type_reg),
        };
        self.stk_pop();
        let op = if w.is_byte_vec(vec_type) { Op::ChrToStr } else { Op::VarToVec };
        self.add_op_push(vec_type, op);
        Ok(vec_type)
    }

    /// Append an element to the vector under it.
    pub fn elem_cat(&mut self, w: &mut World) -> CResult<()> {
        let vec_type = self.stk_type_at(2);
        if !w.is_any_vec(vec_type) {
            return Err(CompileError::Type("Vector/string type expected".into()));
        }
        let e = w.elem_of(vec_type);
        self.implicit_cast(w, e, "Vector/string element type mismatch")?;
        self.stk_pop();
        self.add_op(if w.is_byte_vec(vec_type) { Op::ChrCat } else { Op::VarCat });
        Ok(())
    }

    /// Concatenate two vectors of the same type.
    pub fn cat(&mut self, w: &mut World) -> CResult<()> {
        let vec_type = self.stk_type_at(2);
        if !w.is_any_vec(vec_type) {
            return Err(CompileError::Type("Left operand is not a vector".into()));
        }
        self.implicit_cast(w, vec_type, "Vector/string types do not match")?;
        self.stk_pop();
        self.add_op(if w.is_byte_vec(vec_type) { Op::StrCat } else { Op::VecCat });
        Ok(())
    }

    pub fn elem_to_set(&mut self, w: &mut World) -> CResult<TypeId> {
        let elem = self.stk_type();
        let set_type = w.derive_set(elem, self.type_reg);
        self.stk_pop();
        let op = if w.is_byte_set(set_type) { Op::ElemToByteSet } else { Op::ElemToSet };
        self.add_op_push(set_type, op);
        Ok(set_type)
    }

    /// `{a..b}`: a range of small ordinals becomes a bitset.
    pub fn range_to_set(&mut self, w: &mut World) -> CResult<TypeId> {
        let left = self.stk_type_at(2);
        if !w.type_(left).is_any_ord() {
            return Err(CompileError::Type("Non-ordinal range bounds".into()));
        }
        if !w.can_assign(left, self.stk_type()) {
            return Err(CompileError::Type("Incompatible range bounds".into()));
        }
        let set_type = w.derive_set(left, self.type_reg);
        if !w.is_byte_set(set_type) {
            return Err(CompileError::Type("Invalid element type for ordinal set".into()));
        }
        self.stk_pop();
        self.stk_pop();
        self.add_op_push(set_type, Op::RngToByteSet);
        Ok(set_type)
    }

    pub fn set_add_elem(&mut self, w: &mut World) -> CResult<()> {
        let set_type = self.stk_type_at(2);
        if !w.is_any_set(set_type) {
            return Err(CompileError::Type("Set type expected".into()));
        }
        let idx = w.index_of(set_type);
        self.implicit_cast(w, idx, "Set element type mismatch")?;
        self.stk_pop();
        self.add_op(if w.is_byte_set(set_type) { Op::ByteSetAddElem } else { Op::SetAddElem });
        Ok(())
    }

    pub fn check_range_left(&mut self, w: &mut World) -> CResult<()> {
        let set_type = self.stk_type_at(2);
        if !w.is_byte_set(set_type) {
            return Err(CompileError::Type("Byte set type expected".into()));
        }
        let idx = w.index_of(set_type);
        self.implicit_cast(w, idx, "Set element type mismatch")
    }

    pub fn set_add_range(&mut self, w: &mut World) -> CResult<()> {
        let set_type = self.stk_type_at(3);
        if !w.is_byte_set(set_type) {
            return Err(CompileError::Type("Byte set type expected".into()));
        }
        let idx = w.index_of(set_type);
        self.implicit_cast(w, idx, "Set element type mismatch")?;
        self.stk_pop();
        self.stk_pop();
        self.add_op(Op::ByteSetAddRng);
        Ok(())
    }

    pub fn pair_to_dict(&mut self, w: &mut World) -> CResult<TypeId> {
        let val = self.stk_type();
        let key = self.stk_type_at(2);
        let dict_type = w.derive_container(val, key, self.type_reg);
        self.stk_pop();
        self.stk_pop();
        let op = if w.is_byte_dict(dict_type) { Op::PairToByteDict } else { Op::PairToDict };
        self.add_op_push(dict_type, op);
        Ok(dict_type)
    }

    pub fn check_dict_key(&mut self, w: &mut World) -> CResult<()> {
        let dict_type = self.stk_type_at(2);
        if !w.is_any_dict(dict_type) {
            return Err(CompileError::Type("Dictionary type expected".into()));
        }
        let idx = w.index_of(dict_type);
        self.implicit_cast(w, idx, "Dictionary key type mismatch")
    }

    pub fn dict_add_pair(&mut self, w: &mut World) -> CResult<()> {
        let dict_type = self.stk_type_at(3);
        if !w.is_any_dict(dict_type) {
            return Err(CompileError::Type("Dictionary type expected".into()));
        }
        let elem = w.elem_of(dict_type);
        self.implicit_cast(w, elem, "Dictionary element type mismatch")?;
        self.stk_pop();
        self.stk_pop();
        self.add_op(if w.is_byte_dict(dict_type) { Op::ByteDictAddPair } else { Op::DictAddPair });
        Ok(())
    }

    /// `x in cont` for sets and dictionaries.
    pub fn in_cont(&mut self, w: &mut World) -> CResult<()> {
        let cont = self.stk_pop();
        let elem = self.stk_pop();
        let op = if w.is_any_set(cont) {
            if w.is_byte_set(cont) {
                Op::InByteSet
            } else {
                Op::InSet
            }
        } else if w.is_any_dict(cont) {
            if w.is_byte_dict(cont) {
                Op::InByteDict
            } else {
                Op::InDict
            }
        } else {
            return Err(CompileError::Type("Set/dict type expected".into()));
        };
        if !w.can_assign(elem, w.index_of(cont)) {
            return Err(CompileError::Type("Key type mismatch".into()));
        }
        self.add_op_push(w.def_bool, op);
        Ok(())
    }

    /// `x in T` where T is an ordinal type reference.
    pub fn in_bounds(&mut self, w: &mut World) -> CResult<()> {
        let ty = self.undo_ord_type_ref(w)?;
        let elem = self.stk_pop();
        if !w.type_(elem).is_any_ord() {
            return Err(CompileError::Type("Ordinal type expected".into()));
        }
        self.add_op_u32_push(w.def_bool, Op::InBounds, ty.0);
        Ok(())
    }

    /// `x in a..b`; for a case label the subject stays on the stack.
    pub fn in_range(&mut self, w: &mut World, is_case_label: bool) -> CResult<()> {
        let right = self.stk_pop();
        let left = self.stk_pop();
        let elem = if is_case_label { self.stk_type() } else { self.stk_pop() };
        if !w.can_assign(left, right) {
            return Err(CompileError::Type("Incompatible range bounds".into()));
        }
        if !w.can_assign(elem, left) {
            return Err(CompileError::Type("Element type mismatch".into()));
        }
        let all_ord = w.type_(elem).is_any_ord()
            && w.type_(left).is_any_ord()
            && w.type_(right).is_any_ord();
        if !all_ord {
            return Err(CompileError::Type("Ordinal type expected".into()));
        }
        let op = if is_case_label { Op::CaseRange } else { Op::InRange };
        self.add_op_push(w.def_bool, op);
        Ok(())
    }

    /// Compile-time subrange construction: the bounds run on the VM and
    /// the resulting type reference is left on the stack.
    pub fn mk_subrange(&mut self, w: &mut World) -> CResult<()> {
        if !self.is_compile_time() {
            return Err(CompileError::Type("Subrange types are compile-time only".into()));
        }
        let right = self.stk_pop();
        let left = self.stk_pop();
        if !w.type_(left).is_any_ord() {
            return Err(CompileError::Type("Non-ordinal range bounds".into()));
        }
        if !w.can_assign(right, left) {
            return Err(CompileError::Type("Incompatible range bounds".into()));
        }
        self.add_op_u32_push(w.def_typeref, Op::MkSubrange, left.0);
        Ok(())
    }

    // --- arithmetic and comparisons ------------------------------------------ //

    pub fn arithm_binary(&mut self, w: &World, op: Op) -> CResult<()> {
        debug_assert!(op >= Op::Add && op <= Op::BitShr);
        let right = self.stk_pop();
        let left = self.stk_pop();
        if !w.is_int_kind(right) || !w.is_int_kind(left) {
            return Err(CompileError::Type("Operand types do not match binary operator".into()));
        }
        let result = if w.identical(left, right) { left } else { w.def_int };
        self.add_op_push(result, op);
        Ok(())
    }

    pub fn arithm_unary(&mut self, w: &World, op: Op) -> CResult<()> {
        debug_assert!(op == Op::Neg || op == Op::BitNot);
        let ty = self.stk_type();
        if !w.is_int_kind(ty) {
            return Err(CompileError::Type("Operand type doesn't match unary operator".into()));
        }
        // Type and simulated depth are unchanged.
        self.add_op(op);
        Ok(())
    }

    pub fn cmp(&mut self, w: &mut World, op: Op) -> CResult<()> {
        debug_assert!(is_cmp_op(op));
        let left = self.stk_type_at(2);
        self.implicit_cast(w, left, "Type mismatch in comparison")?;
        let right = self.stk_type();
        if w.type_(left).is_any_ord() && w.type_(right).is_any_ord() {
            self.add_op(Op::CmpOrd);
        } else if w.is_byte_vec(left) && w.is_byte_vec(right) {
            self.add_op(Op::CmpStr);
        } else {
            if op != Op::Equal && op != Op::NotEq {
                return Err(CompileError::Type(
                    "Only equality can be tested for this type".into(),
                ));
            }
            self.add_op(Op::CmpVar);
        }
        self.stk_pop();
        self.stk_pop();
        self.add_op_push(w.def_bool, op);
        Ok(())
    }

    /// Case-label comparison: the subject stays under the result.
    pub fn case_cmp(&mut self, w: &mut World) -> CResult<()> {
        let left = self.stk_type_at(2);
        self.implicit_cast(w, left, "Type mismatch in comparison")?;
        let right = self.stk_pop();
        let op = if w.type_(left).is_any_ord() && w.type_(right).is_any_ord() {
            Op::CaseOrd
        } else if w.is_byte_vec(left) && w.is_byte_vec(right) {
            Op::CaseStr
        } else {
            Op::CaseVar
        };
        self.add_op_push(w.def_bool, op);
        Ok(())
    }

    /// `not`: logical on bools, bitwise on integers.
    pub fn not_op(&mut self, w: &mut World) -> CResult<()> {
        let ty = self.stk_type();
        if w.is_int_kind(ty) {
            self.add_op(Op::BitNot);
        } else {
            let b = w.def_bool;
            self.implicit_cast(w, b, "Boolean or integer operand expected")?;
            self.add_op(Op::Not);
        }
        Ok(())
    }

    // --- jumps --------------------------------------------------------------- //

    /// Emit a forward jump with an unresolved offset; returns the patch
    /// site for `resolve_jump`.
    pub fn jump_forward(&mut self, op: Op) -> usize {
        debug_assert!(is_jump(op));
        let pos = self.cur_offs();
        self.add_op(op);
        self.seg.append_i16(0);
        pos
    }

    pub fn bool_jump_forward(&mut self, w: &mut World, op: Op) -> CResult<usize> {
        debug_assert!(is_bool_jump(op));
        let b = w.def_bool;
        self.implicit_cast(w, b, "Boolean expression expected")?;
        self.stk_pop();
        Ok(self.jump_forward(op))
    }

    /// Patch a forward jump to land here. The stored offset is relative
    /// to the end of the jump instruction.
    pub fn resolve_jump(&mut self, jump_offs: usize) -> CResult<()> {
        let rel = self.cur_offs() as i64 - (jump_offs + self.seg.op_len_at(jump_offs)) as i64;
        if rel > i16::MAX as i64 || rel < i16::MIN as i64 {
            return Err(CompileError::JumpTooFar);
        }
        self.seg.set_jump_offs_at(jump_offs + 1, rel as i16);
        Ok(())
    }

    // --- statements ------------------------------------------------------------ //

    pub fn linenum(&mut self, line: u32) {
        self.add_op(Op::LineNum);
        self.seg.append_u32(line);
    }

    pub fn assertion(&mut self, w: &mut World, line: u32, cond: &str) -> CResult<()> {
        let b = w.def_bool;
        self.implicit_cast(w, b, "Boolean expression expected for 'assert'")?;
        self.stk_pop();
        let idx = self.seg.add_string(cond.into());
        self.add_op(Op::Assert);
        self.seg.append_u32(idx);
        self.seg.append_u32(line);
        Ok(())
    }

    pub fn dump_var(&mut self, expr: &str) {
        let ty = self.stk_pop();
        let idx = self.seg.add_string(expr.into());
        self.add_op(Op::Dump);
        self.seg.append_u32(idx);
        self.seg.append_u32(ty.0);
    }

    pub fn program_exit(&mut self) {
        self.stk_pop();
        self.add_op(Op::Exit);
    }

    // --- assignments ------------------------------------------------------------ //

    /// Capture the designator on top of the stack as an assignment
    /// target: the trailing loader becomes a storer and is cut out, to be
    /// re-appended after the RHS; a preceding loader becomes its
    /// load-effective-address form.
    pub fn lvalue(&mut self) -> CResult<Vec<u8>> {
        let offs = self.stk_loader_offs();
        let loader = self.seg.op_at(offs);
        if !is_grounded_loader(loader) {
            let prev = self.stk_prev_loader_offs()?;
            let prev_op = self.seg.op_at(prev);
            self.seg.replace_op_at(prev, loader_to_lea(prev_op)?);
        }
        let storer = loader_to_storer(loader)?;
        self.seg.replace_op_at(offs, storer);
        Ok(self.seg.cut_op(offs))
    }

    /// Compound arithmetic assignment: the loader becomes a lea and the
    /// in-place opcode is returned as the storer suffix.
    pub fn arithm_lvalue(&mut self, w: &World, op: Op) -> CResult<Vec<u8>> {
        debug_assert!(op >= Op::AddAssign && op <= Op::ModAssign);
        let ty = self.stk_type();
        if !w.is_int_kind(ty) {
            return Err(CompileError::Type("Integer l-value expected".into()));
        }
        let offs = self.stk_loader_offs();
        let loader = self.seg.op_at(offs);
        self.seg.replace_op_at(offs, loader_to_lea(loader)?);
        let pos = self.cur_offs();
        self.add_op(op);
        Ok(self.seg.cut_op(pos))
    }

    /// `|=` keeps the lea'd container on the stack and appends in place.
    pub fn cat_lvalue(&mut self, w: &World) -> CResult<()> {
        if !w.is_any_vec(self.stk_type()) {
            return Err(CompileError::Type("'|=' expects vector/string type".into()));
        }
        let offs = self.stk_loader_offs();
        let loader = self.seg.op_at(offs);
        self.seg.replace_op_at(offs, loader_to_lea(loader)?);
        Ok(())
    }

    pub fn cat_assign(&mut self, w: &mut World) -> CResult<()> {
        let left = self.stk_type_at(2);
        if !w.is_any_vec(left) {
            return Err(CompileError::Type("'|=' expects vector/string type".into()));
        }
        let right = self.stk_type();
        let elem = w.elem_of(left);
        if w.can_assign(right, elem) {
            self.add_op(if w.is_byte_vec(left) { Op::ChrCatAssign } else { Op::VarCatAssign });
        } else {
            self.implicit_cast(w, left, "Type mismatch in in-place concatenation")?;
            self.add_op(if w.is_byte_vec(left) { Op::StrCatAssign } else { Op::VecCatAssign });
        }
        self.stk_pop();
        self.stk_pop();
        Ok(())
    }

    /// `ins v[i] = x`: the element loader becomes an inserter and the
    /// container loader a lea.
    pub fn ins_lvalue(&mut self) -> CResult<Vec<u8>> {
        let offs = self.stk_loader_offs();
        let inserter = loader_to_inserter(self.seg.op_at(offs))?;
        let prev = self.stk_prev_loader_offs()?;
        let prev_op = self.seg.op_at(prev);
        self.seg.replace_op_at(prev, loader_to_lea(prev_op)?);
        self.seg.replace_op_at(offs, inserter);
        Ok(self.seg.cut_op(offs))
    }

    /// `del d[k]`: the element loader is rewritten in place to a deleter.
    pub fn delete_elem(&mut self) -> CResult<()> {
        let offs = self.stk_loader_offs();
        let deleter = loader_to_deleter(self.seg.op_at(offs))?;
        let prev = self.stk_prev_loader_offs()?;
        let prev_op = self.seg.op_at(prev);
        self.seg.replace_op_at(prev, loader_to_lea(prev_op)?);
        self.seg.replace_op_at(offs, deleter);
        self.stk_pop();
        Ok(())
    }

    /// Append the cut storer code after the RHS has been compiled.
    pub fn assignment(&mut self, w: &mut World, storer_code: &[u8]) -> CResult<()> {
        debug_assert!(!storer_code.is_empty());
        let dest = self.stk_type_at(2);
        if w.is_void(dest) {
            return Err(CompileError::Type("Destination is void type".into()));
        }
        self.implicit_cast(w, dest, "Type mismatch in assignment")?;
        self.seg.append_bytes(storer_code);
        self.stk_pop();
        self.stk_pop();
        Ok(())
    }

    // --- calls ------------------------------------------------------------------- //

    /// Direct call of a function state. The caller has already pushed the
    /// empty return slot (non-void callees) and the arguments in
    /// declaration order.
    pub fn call_direct(&mut self, w: &mut World, sid: StateId) -> CResult<()> {
        let proto = w.state(sid).prototype.clone();
        for formal in proto.args.iter().rev() {
            let at = self.stk_type();
            if !w.can_assign(at, formal.ty) {
                return Err(CompileError::Type("Argument type mismatch".into()));
            }
            self.stk_pop();
        }
        let is_void = w.is_void(proto.ret);
        if is_void {
            self.add_op(Op::Call);
            self.seg.append_u32(sid.0);
        } else {
            self.stk_pop(); // the pre-pushed return slot
            let offs = self.cur_offs();
            self.seg.append_op(Op::Call);
            self.seg.append_u32(sid.0);
            self.stk_push(proto.ret, offs);
        }
        Ok(())
    }

    // --- finish ------------------------------------------------------------------ //

    /// Close the segment. On a well-formed body the simulated depth
    /// equals the number of locals left on the stack.
    pub fn finish(mut self) -> CodeSeg {
        assert_eq!(
            self.sim.len(),
            self.locals,
            "simulated stack depth does not match local count"
        );
        self.seg.close();
        self.seg
    }

    /// Run a freshly generated constant expression on the VM against a
    /// scratch activation and a private stack; returns the value and its
    /// static type.
    pub fn run_const_expr(
        mut self,
        w: &mut World,
        expect: Option<TypeId>,
    ) -> CResult<(Variant, TypeId)> {
        debug_assert!(self.is_compile_time());
        if let Some(t) = expect {
            self.implicit_cast(w, t, "Type mismatch in const expression")?;
        }
        let ty = self.stk_type();
        self.stk_pop();
        self.seg.close();
        let scratch = StateObj::scratch();
        let mut stack = RtStack::new(self.seg.stack_size + 8);
        vm::run(w, &scratch, &mut stack, &self.seg)?;
        Ok((stack.pop(), ty))
    }

    /// Hand the closed segment to its owner.
    pub fn install(self, w: &mut World) {
        let owner = self.code_owner.expect("const segments are not installed");
        let seg = self.finish();
        w.install_code(owner, seg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shn_runtime::dis;

    fn setup() -> (World, StateId) {
        let mut w = World::new();
        let m = w.add_module("test");
        (w, m)
    }

    #[test]
    fn test_const_fold_arithmetic() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new_const(m, m);
        // 2 * (3 + 4)
        g.load_const(&w, w.def_int, &Variant::Ord(2)).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(3)).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(4)).unwrap();
        g.arithm_binary(&w, Op::Add).unwrap();
        g.arithm_binary(&w, Op::Mul).unwrap();
        let (v, ty) = g.run_const_expr(&mut w, None).unwrap();
        assert_eq!(v, Variant::Ord(14));
        assert_eq!(ty, w.def_int);
    }

    #[test]
    fn test_variable_load_in_const_context_traps() {
        let (mut w, m) = setup();
        w.add_self_var(m, "x", w.def_int).unwrap();
        let mut g = CodeGen::new_const(m, m);
        g.load_self_var(&w, 0);
        g.load_const(&w, w.def_int, &Variant::Ord(1)).unwrap();
        g.arithm_binary(&w, Op::Add).unwrap();
        match g.run_const_expr(&mut w, None) {
            Err(CompileError::Runtime(shn_core::RuntimeError::ConstExpr)) => {}
            other => panic!("expected const-expr trap, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_undo_subexpr_truncates() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new(m, m);
        g.load_const(&w, w.def_int, &Variant::Ord(7)).unwrap();
        let before = g.cur_offs();
        g.load_const(&w, w.def_int, &Variant::Ord(3)).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(4)).unwrap();
        g.arithm_binary(&w, Op::Add).unwrap();
        assert_eq!(g.stack_level(), 2);
        g.undo_subexpr();
        assert_eq!(g.stack_level(), 1);
        assert_eq!(g.cur_offs(), before);
        let _ = w;
    }

    #[test]
    fn test_simulated_depth_tracks_ops() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new(m, m);
        g.load_const(&w, w.def_int, &Variant::Ord(1)).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(2)).unwrap();
        assert_eq!(g.stack_level(), 2);
        // Add consumes 2, produces 1
        g.arithm_binary(&w, Op::Add).unwrap();
        assert_eq!(g.stack_level(), 1);
        g.pop_value(&w);
        assert_eq!(g.stack_level(), 0);
        let _ = w;
    }

    #[test]
    fn test_implicit_cast_char_to_str() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new(m, m);
        g.load_const(&w, w.def_char, &Variant::Ord(b'a' as i64)).unwrap();
        let str_t = w.def_str;
        assert!(g.try_implicit_cast(&mut w, str_t).unwrap());
        assert_eq!(g.stk_type(), w.def_str);
        // the emitted tail is the element-to-vector op
        let seg = {
            g.pop_value(&w);
            g.finish()
        };
        let instrs = dis::decode(&w, &seg);
        assert!(instrs.iter().any(|i| i.op == Op::ChrToStr));
    }

    #[test]
    fn test_implicit_cast_null_container() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new(m, m);
        g.load_empty_const(&w, w.def_nullcont);
        let str_t = w.def_str;
        assert!(g.try_implicit_cast(&mut w, str_t).unwrap());
        assert_eq!(g.stk_type(), w.def_str);
        g.pop_value(&w);
        let seg = g.finish();
        // the null-container load was undone and replaced
        let instrs = dis::decode(&w, &seg);
        assert_eq!(instrs[0].op, Op::LoadEmptyVar);
    }

    #[test]
    fn test_lvalue_rewrites_self_var() {
        let (mut w, m) = setup();
        w.add_self_var(m, "n", w.def_int).unwrap();
        let mut g = CodeGen::new(m, m);
        // n = 5
        g.load_self_var(&w, 0);
        let storer = g.lvalue().unwrap();
        assert_eq!(storer[0], Op::StoreSelfVar as u8);
        g.load_const(&w, w.def_int, &Variant::Ord(5)).unwrap();
        g.assignment(&mut w, &storer).unwrap();
        let seg = g.finish();
        let ops: Vec<Op> = dis::decode(&w, &seg).iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::LoadByte, Op::StoreSelfVar, Op::End]);
    }

    #[test]
    fn test_lvalue_rewrites_element_chain() {
        let (mut w, m) = setup();
        let int_vec = w.derive_vec(w.def_int, m);
        w.add_self_var(m, "v", int_vec).unwrap();
        let mut g = CodeGen::new(m, m);
        // v[0] = 9
        g.load_self_var(&w, 0);
        g.load_const(&w, w.def_int, &Variant::Ord(0)).unwrap();
        g.load_container_elem(&mut w).unwrap();
        let storer = g.lvalue().unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(9)).unwrap();
        g.assignment(&mut w, &storer).unwrap();
        let seg = g.finish();
        let ops: Vec<Op> = dis::decode(&w, &seg).iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![Op::LeaSelfVar, Op::Load0, Op::LoadByte, Op::StoreVecElem, Op::End]
        );
    }

    #[test]
    fn test_del_rewrites_to_deleter() {
        let (mut w, m) = setup();
        let dict = w.derive_container(w.def_str, w.def_int, m);
        w.add_self_var(m, "d", dict).unwrap();
        let mut g = CodeGen::new(m, m);
        g.load_self_var(&w, 0);
        g.load_const(&w, w.def_int, &Variant::Ord(1)).unwrap();
        g.load_container_elem(&mut w).unwrap();
        g.delete_elem().unwrap();
        let seg = g.finish();
        let ops: Vec<Op> = dis::decode(&w, &seg).iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::LeaSelfVar, Op::Load1, Op::DelDictElem, Op::End]);
    }

    #[test]
    fn test_jump_resolution_and_range() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new(m, m);
        g.load_const(&w, w.def_bool, &Variant::Ord(1)).unwrap();
        let site = g.bool_jump_forward(&mut w, Op::JumpFalse).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(1)).unwrap();
        g.pop_value(&w);
        g.resolve_jump(site).unwrap();
        let seg = g.finish();
        // JumpFalse lands just before End
        let instrs = dis::decode(&w, &seg);
        let jf = instrs.iter().find(|i| i.op == Op::JumpFalse).unwrap();
        let end = instrs.iter().find(|i| i.op == Op::End).unwrap();
        assert_eq!(jf.args, format!("{:04x}", end.offs));
    }

    #[test]
    fn test_case_cmp_keeps_subject() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new(m, m);
        g.load_const(&w, w.def_int, &Variant::Ord(7)).unwrap(); // subject
        g.load_const(&w, w.def_int, &Variant::Ord(7)).unwrap(); // label
        g.case_cmp(&mut w).unwrap();
        // subject plus the match result are both simulated
        assert_eq!(g.stack_level(), 2);
        assert_eq!(g.stk_type(), w.def_bool);
        g.pop_value(&w);
        g.pop_value(&w);
        let seg = g.finish();
        let ops: Vec<Op> = dis::decode(&w, &seg).iter().map(|i| i.op).collect();
        assert!(ops.contains(&Op::CaseOrd));
    }

    #[test]
    fn test_mk_subrange_folds_to_type() {
        let (mut w, m) = setup();
        let mut g = CodeGen::new_const(m, m);
        g.load_const(&w, w.def_int, &Variant::Ord(1)).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(10)).unwrap();
        g.mk_subrange(&mut w).unwrap();
        let (v, ty) = g.run_const_expr(&mut w, None).unwrap();
        assert_eq!(ty, w.def_typeref);
        let sub = match &v {
            Variant::RtObj(o) => w.type_id_of_obj(o).unwrap(),
            other => panic!("expected a type reference, got {:?}", other),
        };
        assert_eq!(w.type_(sub).ord_range(), Some((1, 10)));
    }

    #[test]
    fn test_call_direct_frame_round_trip() {
        // fn add(a: int, b: int): int { return a + b }  (hand-built body)
        let (mut w, m) = setup();
        let f = w.add_function(
            "add",
            m,
            w.def_int,
            vec![
                shn_runtime::types::FormalArg { name: "a".into(), ty: w.def_int },
                shn_runtime::types::FormalArg { name: "b".into(), ty: w.def_int },
            ],
        );
        // body: ret := a + b, stored into the return slot
        let proto = w.state(f).prototype.clone();
        let mut body = CodeGen::new(m, f);
        body.load_stk_var(w.def_int, proto.arg_var_offs(0) as i8);
        body.load_stk_var(w.def_int, proto.arg_var_offs(1) as i8);
        body.arithm_binary(&w, Op::Add).unwrap();
        let ret_offs = proto.ret_var_offs() as i8;
        // store into the return slot through the stack-var storer
        body.stk_pop();
        body.add_op(Op::StoreStkVar);
        body.seg.append_i8(ret_offs);
        body.install(&mut w);

        // caller: push empty ret, args 30 and 12, call
        let mut g = CodeGen::new(m, m);
        g.load_empty_const(&w, w.def_int);
        g.load_const(&w, w.def_int, &Variant::Ord(30)).unwrap();
        g.load_const(&w, w.def_int, &Variant::Ord(12)).unwrap();
        g.call_direct(&mut w, f).unwrap();
        g.pop_value(&w);
        let seg = g.finish();

        let inst = w.new_instance(m);
        let mut stack = RtStack::new(64);
        // keep the result visible: rerun without the pop
        vm::run(&mut w, &inst, &mut stack, &seg).unwrap();
        assert_eq!(stack.len(), 0);

        let mut g2 = CodeGen::new(m, m);
        g2.load_empty_const(&w, w.def_int);
        g2.load_const(&w, w.def_int, &Variant::Ord(30)).unwrap();
        g2.load_const(&w, w.def_int, &Variant::Ord(12)).unwrap();
        g2.call_direct(&mut w, f).unwrap();
        g2.stk_pop();
        let seg2 = g2.finish();
        let mut stack2 = RtStack::new(64);
        vm::run(&mut w, &inst, &mut stack2, &seg2).unwrap();
        assert_eq!(stack2.pop(), Variant::Ord(42));
    }
}
