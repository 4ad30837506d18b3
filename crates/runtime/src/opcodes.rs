//! The opcode set and its argument-layout metadata.
//!
//! The relative order of many instructions within their groups is
//! significant: the classification predicates below are range checks, and
//! the comparison collapse ops are indexed arithmetically by the code
//! generator. `OPTABLE` must list every opcode in enum order; a unit test
//! enforces the agreement.

/// Argument layout kinds. Every kind has a fixed byte size so the decoder,
/// the l-value rewriter and the disassembler can walk instructions without
/// interpreting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    None,
    /// Type id, u32.
    Type,
    /// Unsigned byte immediate.
    UInt8,
    /// Host-endian i64 ordinal.
    Int,
    /// u32 index into the segment's literal string pool.
    Str,
    /// Variant tag byte (`LoadEmptyVar`).
    VarType8,
    /// (state id u32, definition index u32).
    Definition,
    /// Inner-variable index, u8.
    SelfIdx,
    /// Stack-variable offset, i8 (arguments are negative).
    StkIdx,
    /// Member slot index of a state object on the stack, u8.
    MemberIdx,
    /// Relative jump offset, i16.
    Jump16,
    /// State id, u32.
    State,
    /// Line number, u32.
    LineNum,
    /// (condition string u32, line u32).
    Assert,
    /// (expression string u32, type id u32).
    Dump,
}

impl ArgKind {
    pub const fn size(self) -> usize {
        match self {
            ArgKind::None => 0,
            ArgKind::UInt8 | ArgKind::VarType8 | ArgKind::SelfIdx | ArgKind::StkIdx
            | ArgKind::MemberIdx => 1,
            ArgKind::Jump16 => 2,
            ArgKind::Type | ArgKind::Str | ArgKind::State | ArgKind::LineNum => 4,
            ArgKind::Int | ArgKind::Definition | ArgKind::Assert | ArgKind::Dump => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Op {
    // --- 1. misc control
    End,
    Nop,
    ConstExprErr,
    Exit,

    // --- 2. const loaders (begin undoable loaders)
    LoadTypeRef,
    LoadNull,
    Load0,
    Load1,
    LoadByte,
    LoadOrd,
    LoadStr,
    LoadEmptyVar,
    LoadConst,

    // --- 3. designator loaders
    LoadSelfVar,
    LeaSelfVar,
    LoadStkVar,
    LeaStkVar,
    // --- end undoable loaders
    LoadMember,
    LeaMember,
    Deref,
    LeaRef,

    // --- 4. storers
    InitSelfVar,
    InitStkVar,
    // begin final storers
    StoreSelfVar,
    StoreStkVar,
    StoreMember,
    StoreRef,
    // end final storers
    StoreStrElem,
    StoreVecElem,
    StoreDictElem,
    StoreByteDictElem,

    // --- 5. designator misc
    MkSubrange,
    MkRef,
    NonEmpty,
    Pop,
    PopPod,
    Cast,
    IsType,

    // --- 6. strings, vectors
    ChrToStr,
    ChrCat,
    StrCat,
    VarToVec,
    VarCat,
    VecCat,
    StrLen,
    VecLen,
    StrElem,
    VecElem,

    // --- 7. sets
    ElemToSet,
    SetAddElem,
    ElemToByteSet,
    RngToByteSet,
    ByteSetAddElem,
    ByteSetAddRng,
    InSet,
    InByteSet,
    InBounds,
    InRange,
    SetElem,
    ByteSetElem,

    // --- 8. dictionaries
    PairToDict,
    DictAddPair,
    PairToByteDict,
    ByteDictAddPair,
    DictElem,
    ByteDictElem,
    InDict,
    InByteDict,

    // --- 9. in-place operations through a place
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    ChrCatAssign,
    StrCatAssign,
    VarCatAssign,
    VecCatAssign,
    StrIns,
    VecIns,
    DelStrElem,
    DelVecElem,
    DelDictElem,
    DelByteDictElem,
    DelSetElem,
    DelByteSetElem,

    // --- 10. arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    BitShl,
    BitShr,
    Neg,
    BitNot,
    Not,

    // --- 11. comparisons
    CmpOrd,
    CmpStr,
    CmpVar,
    // see is_cmp_op()
    Equal,
    NotEq,
    LessThan,
    LessEq,
    GreaterThan,
    GreaterEq,
    // case label helpers: preserve the subject on the stack
    CaseOrd,
    CaseRange,
    CaseStr,
    CaseVar,

    // --- 12. jumps; [dst] is a relative 16-bit offset
    Jump,
    JumpFalse,
    JumpTrue,
    // short-circuit: pop iff no jump, leave the bool otherwise
    JumpAnd,
    JumpOr,

    // --- 13. calls
    Call,

    // --- 14. debug
    LineNum,
    Assert,
    Dump,

    Inv,
}

pub const OP_COUNT: usize = Op::Inv as usize + 1;

pub struct OpInfo {
    pub name: &'static str,
    pub op: Op,
    pub arg: ArgKind,
}

macro_rules! op {
    ($name:ident, $arg:ident) => {
        OpInfo { name: stringify!($name), op: Op::$name, arg: ArgKind::$arg }
    };
}

pub static OPTABLE: [OpInfo; OP_COUNT] = [
    op!(End, None),
    op!(Nop, None),
    op!(ConstExprErr, None),
    op!(Exit, None),
    op!(LoadTypeRef, Type),
    op!(LoadNull, None),
    op!(Load0, None),
    op!(Load1, None),
    op!(LoadByte, UInt8),
    op!(LoadOrd, Int),
    op!(LoadStr, Str),
    op!(LoadEmptyVar, VarType8),
    op!(LoadConst, Definition),
    op!(LoadSelfVar, SelfIdx),
    op!(LeaSelfVar, SelfIdx),
    op!(LoadStkVar, StkIdx),
    op!(LeaStkVar, StkIdx),
    op!(LoadMember, MemberIdx),
    op!(LeaMember, MemberIdx),
    op!(Deref, None),
    op!(LeaRef, None),
    op!(InitSelfVar, SelfIdx),
    op!(InitStkVar, StkIdx),
    op!(StoreSelfVar, SelfIdx),
    op!(StoreStkVar, StkIdx),
    op!(StoreMember, MemberIdx),
    op!(StoreRef, None),
    op!(StoreStrElem, None),
    op!(StoreVecElem, None),
    op!(StoreDictElem, None),
    op!(StoreByteDictElem, None),
    op!(MkSubrange, Type),
    op!(MkRef, None),
    op!(NonEmpty, None),
    op!(Pop, None),
    op!(PopPod, None),
    op!(Cast, Type),
    op!(IsType, Type),
    op!(ChrToStr, None),
    op!(ChrCat, None),
    op!(StrCat, None),
    op!(VarToVec, None),
    op!(VarCat, None),
    op!(VecCat, None),
    op!(StrLen, None),
    op!(VecLen, None),
    op!(StrElem, None),
    op!(VecElem, None),
    op!(ElemToSet, None),
    op!(SetAddElem, None),
    op!(ElemToByteSet, None),
    op!(RngToByteSet, None),
    op!(ByteSetAddElem, None),
    op!(ByteSetAddRng, None),
    op!(InSet, None),
    op!(InByteSet, None),
    op!(InBounds, Type),
    op!(InRange, None),
    op!(SetElem, None),
    op!(ByteSetElem, None),
    op!(PairToDict, None),
    op!(DictAddPair, None),
    op!(PairToByteDict, None),
    op!(ByteDictAddPair, None),
    op!(DictElem, None),
    op!(ByteDictElem, None),
    op!(InDict, None),
    op!(InByteDict, None),
    op!(AddAssign, None),
    op!(SubAssign, None),
    op!(MulAssign, None),
    op!(DivAssign, None),
    op!(ModAssign, None),
    op!(ChrCatAssign, None),
    op!(StrCatAssign, None),
    op!(VarCatAssign, None),
    op!(VecCatAssign, None),
    op!(StrIns, None),
    op!(VecIns, None),
    op!(DelStrElem, None),
    op!(DelVecElem, None),
    op!(DelDictElem, None),
    op!(DelByteDictElem, None),
    op!(DelSetElem, None),
    op!(DelByteSetElem, None),
    op!(Add, None),
    op!(Sub, None),
    op!(Mul, None),
    op!(Div, None),
    op!(Mod, None),
    op!(BitAnd, None),
    op!(BitOr, None),
    op!(BitXor, None),
    op!(BitShl, None),
    op!(BitShr, None),
    op!(Neg, None),
    op!(BitNot, None),
    op!(Not, None),
    op!(CmpOrd, None),
    op!(CmpStr, None),
    op!(CmpVar, None),
    op!(Equal, None),
    op!(NotEq, None),
    op!(LessThan, None),
    op!(LessEq, None),
    op!(GreaterThan, None),
    op!(GreaterEq, None),
    op!(CaseOrd, None),
    op!(CaseRange, None),
    op!(CaseStr, None),
    op!(CaseVar, None),
    op!(Jump, Jump16),
    op!(JumpFalse, Jump16),
    op!(JumpTrue, Jump16),
    op!(JumpAnd, Jump16),
    op!(JumpOr, Jump16),
    op!(Call, State),
    op!(LineNum, LineNum),
    op!(Assert, Assert),
    op!(Dump, Dump),
    op!(Inv, None),
];

impl Op {
    pub fn decode(b: u8) -> Option<Op> {
        if (b as usize) < OP_COUNT - 1 {
            Some(OPTABLE[b as usize].op)
        } else {
            None
        }
    }

    pub fn arg(self) -> ArgKind {
        OPTABLE[self as usize].arg
    }

    pub fn name(self) -> &'static str {
        OPTABLE[self as usize].name
    }

    /// Total instruction length: one opcode byte plus its arguments.
    pub fn len(self) -> usize {
        1 + self.arg().size()
    }
}

/// Loaders whose whole sub-expression can be truncated by `undo_subexpr`.
pub fn is_undoable_loader(op: Op) -> bool {
    op >= Op::LoadTypeRef && op <= Op::LeaStkVar
}

/// Pure value loaders that can begin a sub-expression; their offsets bound
/// truncation of that sub-expression.
pub fn is_primary_loader(op: Op) -> bool {
    is_undoable_loader(op)
}

/// Loaders that designate a variable directly (storer and lea rewrites
/// apply to these without a preceding designator).
pub fn is_grounded_loader(op: Op) -> bool {
    matches!(op, Op::LoadSelfVar | Op::LoadStkVar | Op::LoadMember | Op::Deref)
}

pub fn is_final_storer(op: Op) -> bool {
    op >= Op::StoreSelfVar && op <= Op::StoreRef
}

pub fn is_cmp_op(op: Op) -> bool {
    op >= Op::Equal && op <= Op::GreaterEq
}

pub fn is_jump(op: Op) -> bool {
    op >= Op::Jump && op <= Op::JumpOr
}

pub fn is_bool_jump(op: Op) -> bool {
    op >= Op::JumpFalse && op <= Op::JumpOr
}

pub fn is_caller(op: Op) -> bool {
    op == Op::Call
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_enum() {
        for (i, info) in OPTABLE.iter().enumerate() {
            assert_eq!(
                info.op as usize, i,
                "OPTABLE entry {} ({}) out of order",
                i, info.name
            );
        }
    }

    #[test]
    fn test_decode_bounds() {
        assert_eq!(Op::decode(0), Some(Op::End));
        assert_eq!(Op::decode(Op::Dump as u8), Some(Op::Dump));
        assert_eq!(Op::decode(Op::Inv as u8), None);
        assert_eq!(Op::decode(255), None);
    }

    #[test]
    fn test_instruction_lengths() {
        assert_eq!(Op::End.len(), 1);
        assert_eq!(Op::LoadByte.len(), 2);
        assert_eq!(Op::LoadOrd.len(), 9);
        assert_eq!(Op::Jump.len(), 3);
        assert_eq!(Op::Dump.len(), 9);
    }

    #[test]
    fn test_classification_ranges() {
        assert!(is_primary_loader(Op::LoadTypeRef));
        assert!(is_primary_loader(Op::LeaStkVar));
        assert!(!is_primary_loader(Op::LoadMember));
        assert!(is_grounded_loader(Op::Deref));
        assert!(!is_grounded_loader(Op::VecElem));
        assert!(is_cmp_op(Op::GreaterEq));
        assert!(!is_cmp_op(Op::CmpOrd));
        assert!(is_bool_jump(Op::JumpOr));
        assert!(!is_bool_jump(Op::Jump));
    }
}
