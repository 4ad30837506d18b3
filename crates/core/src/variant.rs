//! `Variant`: the tagged dynamic value.
//!
//! Equality is structural for ordinals, reals and strings, and by handle
//! identity for every other refcounted kind: containers are canonicalized
//! through copy-on-write, so two handles are "the same value" exactly when
//! they share a payload. Ordering is lexicographic by (tag, payload).
//!
//! `VarPtr` holds a [`Place`]: an owning handle plus an interior offset,
//! pushed by the `Lea*` opcodes and consumed by the storers. This is the
//! safe rendering of an interior pointer; holding the owner in the place
//! keeps the target alive for the duration of the store.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::charset::CharSet;
use crate::error::RuntimeError;
use crate::strbase::{to_quoted, Str};

/// Runtime objects: type descriptors, state objects, fifos. Stored in
/// variants as shared trait objects and compared by handle.
pub trait RtObj: std::fmt::Debug + Send + Sync {
    /// Deep emptiness test, used by `NonEmpty` and `empty()`.
    fn is_empty_obj(&self) -> bool;

    /// Human-readable value form for `dump` and listings.
    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result;

    /// Slot access for state objects; everything else has no slots.
    fn var_slot(&self, index: usize) -> Option<&RefCell<Variant>> {
        let _ = index;
        None
    }

    /// Character enqueue for fifo objects; `None` means the object is not
    /// a writable character fifo.
    fn enq_bytes(&self, data: &[u8]) -> Option<usize> {
        let _ = data;
        None
    }

    fn as_any(&self) -> &dyn Any;
}

pub type Obj = Arc<dyn RtObj>;

fn obj_addr(o: &Obj) -> usize {
    Arc::as_ptr(o) as *const () as usize
}

/// Variant tag; the byte form is an opcode immediate (`LoadEmptyVar`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum VarTag {
    Void,
    Ord,
    Real,
    VarPtr,
    Str,
    Vec,
    Set,
    OrdSet,
    Dict,
    Ref,
    RtObj,
}

impl VarTag {
    pub fn from_u8(b: u8) -> Option<VarTag> {
        use VarTag::*;
        const ALL: [VarTag; 11] = [Void, Ord, Real, VarPtr, Str, Vec, Set, OrdSet, Dict, Ref, RtObj];
        ALL.get(b as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            VarTag::Void => "VOID",
            VarTag::Ord => "ORD",
            VarTag::Real => "REAL",
            VarTag::VarPtr => "VARPTR",
            VarTag::Str => "STR",
            VarTag::Vec => "VEC",
            VarTag::Set => "SET",
            VarTag::OrdSet => "ORDSET",
            VarTag::Dict => "DICT",
            VarTag::Ref => "REF",
            VarTag::RtObj => "RTOBJ",
        }
    }
}

/// The tagged dynamic value.
#[derive(Debug, Clone, Default)]
pub enum Variant {
    #[default]
    Void,
    Ord(i64),
    Real(f64),
    VarPtr(Place),
    Str(Str),
    Vec(VarVec),
    Set(VarSet),
    OrdSet(OrdSet),
    Dict(VarDict),
    Ref(RefBox),
    RtObj(Obj),
}

// Variants travel between the compiler and VM invocations, and module
// instances may be handed to another thread once initialization completes.
//
// Send/Sync here mirrors the contract of the C-layout value types in
// stack-language runtimes: payloads are shared through atomically
// refcounted handles, mutation happens only inside a single-threaded VM
// invocation, and any cross-thread sharing of mutable module state
// requires external synchronization (interior RefCells are never borrowed
// across an opcode boundary).
unsafe impl Send for Variant {}
unsafe impl Sync for Variant {}

impl Variant {
    pub fn tag(&self) -> VarTag {
        match self {
            Variant::Void => VarTag::Void,
            Variant::Ord(_) => VarTag::Ord,
            Variant::Real(_) => VarTag::Real,
            Variant::VarPtr(_) => VarTag::VarPtr,
            Variant::Str(_) => VarTag::Str,
            Variant::Vec(_) => VarTag::Vec,
            Variant::Set(_) => VarTag::Set,
            Variant::OrdSet(_) => VarTag::OrdSet,
            Variant::Dict(_) => VarTag::Dict,
            Variant::Ref(_) => VarTag::Ref,
            Variant::RtObj(_) => VarTag::RtObj,
        }
    }

    /// The canonical empty value of a given tag.
    pub fn empty_of(tag: VarTag) -> Variant {
        match tag {
            VarTag::Void => Variant::Void,
            VarTag::Ord => Variant::Ord(0),
            VarTag::Real => Variant::Real(0.0),
            VarTag::VarPtr => Variant::Void,
            VarTag::Str => Variant::Str(Str::new()),
            VarTag::Vec => Variant::Vec(VarVec::new()),
            VarTag::Set => Variant::Set(VarSet::new()),
            VarTag::OrdSet => Variant::OrdSet(OrdSet::new()),
            VarTag::Dict => Variant::Dict(VarDict::new()),
            VarTag::Ref => Variant::Ref(RefBox::new(Variant::Void)),
            VarTag::RtObj => Variant::Void,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Variant::Void)
    }

    /// Deep empty test, defined for every tag.
    pub fn empty(&self) -> bool {
        match self {
            Variant::Void => true,
            Variant::Ord(v) => *v == 0,
            Variant::Real(v) => *v == 0.0,
            Variant::VarPtr(_) => false,
            Variant::Str(s) => s.is_empty(),
            Variant::Vec(v) => v.is_empty(),
            Variant::Set(s) => s.is_empty(),
            Variant::OrdSet(s) => s.is_empty(),
            Variant::Dict(d) => d.is_empty(),
            Variant::Ref(r) => r.borrow().empty(),
            Variant::RtObj(o) => o.is_empty_obj(),
        }
    }

    // Checked accessors; the unchecked forms are a pattern match away.

    pub fn as_ord(&self) -> Result<i64, RuntimeError> {
        match self {
            Variant::Ord(v) => Ok(*v),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        Ok(self.as_ord()? != 0)
    }

    pub fn as_str(&self) -> Result<&Str, RuntimeError> {
        match self {
            Variant::Str(s) => Ok(s),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_str_mut(&mut self) -> Result<&mut Str, RuntimeError> {
        match self {
            Variant::Str(s) => Ok(s),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_vec(&self) -> Result<&VarVec, RuntimeError> {
        match self {
            Variant::Vec(v) => Ok(v),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_vec_mut(&mut self) -> Result<&mut VarVec, RuntimeError> {
        match self {
            Variant::Vec(v) => Ok(v),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut VarSet, RuntimeError> {
        match self {
            Variant::Set(s) => Ok(s),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_set(&self) -> Result<&VarSet, RuntimeError> {
        match self {
            Variant::Set(s) => Ok(s),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_ordset(&self) -> Result<&OrdSet, RuntimeError> {
        match self {
            Variant::OrdSet(s) => Ok(s),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_ordset_mut(&mut self) -> Result<&mut OrdSet, RuntimeError> {
        match self {
            Variant::OrdSet(s) => Ok(s),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_dict(&self) -> Result<&VarDict, RuntimeError> {
        match self {
            Variant::Dict(d) => Ok(d),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_dict_mut(&mut self) -> Result<&mut VarDict, RuntimeError> {
        match self {
            Variant::Dict(d) => Ok(d),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_ref_box(&self) -> Result<&RefBox, RuntimeError> {
        match self {
            Variant::Ref(r) => Ok(r),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_obj(&self) -> Result<&Obj, RuntimeError> {
        match self {
            Variant::RtObj(o) => Ok(o),
            _ => Err(RuntimeError::Type),
        }
    }

    pub fn as_place(&self) -> Result<&Place, RuntimeError> {
        match self {
            Variant::VarPtr(p) => Ok(p),
            _ => Err(RuntimeError::Type),
        }
    }

    /// Lexicographic comparison by (tag, payload). Same-tag refcounted
    /// kinds compare by handle address, which gives a stable total order
    /// within one process run (the dictionary key order).
    pub fn compare(&self, other: &Variant) -> Ordering {
        if self.tag() != other.tag() {
            return self.tag().cmp(&other.tag());
        }
        match (self, other) {
            (Variant::Void, Variant::Void) => Ordering::Equal,
            (Variant::Ord(a), Variant::Ord(b)) => a.cmp(b),
            (Variant::Real(a), Variant::Real(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Variant::Str(a), Variant::Str(b)) => a.compare(b),
            (Variant::Vec(a), Variant::Vec(b)) => a.addr().cmp(&b.addr()),
            (Variant::Set(a), Variant::Set(b)) => a.addr().cmp(&b.addr()),
            (Variant::OrdSet(a), Variant::OrdSet(b)) => a.addr().cmp(&b.addr()),
            (Variant::Dict(a), Variant::Dict(b)) => a.addr().cmp(&b.addr()),
            (Variant::Ref(a), Variant::Ref(b)) => a.addr().cmp(&b.addr()),
            (Variant::RtObj(a), Variant::RtObj(b)) => obj_addr(a).cmp(&obj_addr(b)),
            (Variant::VarPtr(_), Variant::VarPtr(_)) => Ordering::Equal,
            _ => Ordering::Equal,
        }
    }

    pub fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        match self {
            Variant::Void => write!(out, "null"),
            Variant::Ord(v) => write!(out, "{}", v),
            Variant::Real(v) => write!(out, "{}", v),
            Variant::VarPtr(_) => write!(out, "<ptr>"),
            Variant::Str(s) => write!(out, "{}", to_quoted(s.as_bytes())),
            Variant::Vec(v) => {
                write!(out, "[")?;
                for i in 0..v.len() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    v.get(i).dump(out)?;
                }
                write!(out, "]")
            }
            Variant::Set(s) => {
                write!(out, "{{")?;
                for i in 0..s.len() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    s.get(i).dump(out)?;
                }
                write!(out, "}}")
            }
            Variant::OrdSet(s) => {
                write!(out, "{{")?;
                let mut first = true;
                for b in s.iter() {
                    if !first {
                        write!(out, ", ")?;
                    }
                    first = false;
                    write!(out, "{}", b)?;
                }
                write!(out, "}}")
            }
            Variant::Dict(d) => {
                write!(out, "{{")?;
                for i in 0..d.len() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    d.key(i).dump(out)?;
                    write!(out, " = ")?;
                    d.value(i).dump(out)?;
                }
                write!(out, "}}")
            }
            Variant::Ref(r) => {
                write!(out, "@")?;
                r.borrow().dump(out)
            }
            Variant::RtObj(o) => o.dump(out),
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Variant) -> bool {
        match (self, other) {
            (Variant::Void, Variant::Void) => true,
            (Variant::Ord(a), Variant::Ord(b)) => a == b,
            (Variant::Real(a), Variant::Real(b)) => a == b,
            (Variant::Str(a), Variant::Str(b)) => a == b,
            (Variant::Vec(a), Variant::Vec(b)) => a.addr() == b.addr(),
            (Variant::Set(a), Variant::Set(b)) => a.addr() == b.addr(),
            (Variant::OrdSet(a), Variant::OrdSet(b)) => a.addr() == b.addr(),
            (Variant::Dict(a), Variant::Dict(b)) => a.addr() == b.addr(),
            (Variant::Ref(a), Variant::Ref(b)) => a.addr() == b.addr(),
            (Variant::RtObj(a), Variant::RtObj(b)) => obj_addr(a) == obj_addr(b),
            _ => false,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.dump(f)
    }
}

// --- places --------------------------------------------------------------- //

/// A designated storage location: the owning handle plus an interior
/// offset. Produced by `Lea*` opcodes, consumed by storers and in-place
/// operations.
#[derive(Debug, Clone)]
pub enum Place {
    /// Absolute slot index on the operand stack.
    Stack(usize),
    /// Inner-variable slot of a state object (or any slotted runtime
    /// object).
    ObjSlot { obj: Obj, index: u8 },
    /// The single slot of a reference box.
    Ref(RefBox),
}

// --- container handles ---------------------------------------------------- //

/// Vector of variants.
#[derive(Debug, Clone, Default)]
pub struct VarVec {
    obj: Option<Arc<Vec<Variant>>>,
}

impl VarVec {
    pub fn new() -> VarVec {
        VarVec { obj: None }
    }

    pub fn from_one(v: Variant) -> VarVec {
        VarVec { obj: Some(Arc::new(vec![v])) }
    }

    pub fn len(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| o.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn addr(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| Arc::as_ptr(o) as usize)
    }

    fn data_mut(&mut self) -> &mut Vec<Variant> {
        let arc = self.obj.get_or_insert_with(|| Arc::new(Vec::new()));
        Arc::make_mut(arc)
    }

    /// Borrowing element view; index must be in range.
    pub fn get(&self, i: usize) -> &Variant {
        &self.obj.as_ref().expect("index out of range")[i]
    }

    pub fn elem(&self, i: usize) -> Result<Variant, RuntimeError> {
        match &self.obj {
            Some(o) if i < o.len() => Ok(o[i].clone()),
            _ => Err(RuntimeError::Index),
        }
    }

    pub fn set_elem(&mut self, i: usize, v: Variant) -> Result<(), RuntimeError> {
        if i >= self.len() {
            return Err(RuntimeError::Index);
        }
        self.data_mut()[i] = v;
        Ok(())
    }

    pub fn push(&mut self, v: Variant) {
        self.data_mut().push(v);
    }

    pub fn insert(&mut self, i: usize, v: Variant) -> Result<(), RuntimeError> {
        if i > self.len() {
            return Err(RuntimeError::Index);
        }
        self.data_mut().insert(i, v);
        Ok(())
    }

    pub fn erase(&mut self, i: usize) -> Result<(), RuntimeError> {
        if i >= self.len() {
            return Err(RuntimeError::Index);
        }
        self.data_mut().remove(i);
        if self.len() == 0 {
            self.obj = None;
        }
        Ok(())
    }

    pub fn cat(&mut self, other: &VarVec) {
        if let Some(o) = &other.obj {
            self.data_mut().extend(o.iter().cloned());
        }
    }

    /// Grow to `len` slots, filling new slots with Void.
    pub fn grow_to(&mut self, len: usize) {
        let d = self.data_mut();
        while d.len() < len {
            d.push(Variant::Void);
        }
    }
}

/// Sorted set of variants, kept as a vector ordered by the variant
/// comparator.
#[derive(Debug, Clone, Default)]
pub struct VarSet {
    obj: Option<Arc<Vec<Variant>>>,
}

impl VarSet {
    pub fn new() -> VarSet {
        VarSet { obj: None }
    }

    pub fn from_one(v: Variant) -> VarSet {
        VarSet { obj: Some(Arc::new(vec![v])) }
    }

    pub fn len(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| o.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn addr(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| Arc::as_ptr(o) as usize)
    }

    pub fn get(&self, i: usize) -> &Variant {
        &self.obj.as_ref().expect("index out of range")[i]
    }

    fn bsearch(&self, key: &Variant) -> Result<usize, usize> {
        match &self.obj {
            None => Err(0),
            Some(o) => o.binary_search_by(|probe| probe.compare(key)),
        }
    }

    pub fn contains(&self, key: &Variant) -> bool {
        self.bsearch(key).is_ok()
    }

    pub fn find_insert(&mut self, v: Variant) {
        if let Err(pos) = self.bsearch(&v) {
            let arc = self.obj.get_or_insert_with(|| Arc::new(Vec::new()));
            Arc::make_mut(arc).insert(pos, v);
        }
    }

    pub fn find_erase(&mut self, key: &Variant) {
        if let Ok(pos) = self.bsearch(key) {
            let arc = self.obj.as_mut().expect("found in empty set");
            Arc::make_mut(arc).remove(pos);
            if self.len() == 0 {
                self.obj = None;
            }
        }
    }
}

/// Dictionary: parallel sorted key and value vectors.
#[derive(Debug, Default)]
pub struct DictData {
    keys: Vec<Variant>,
    values: Vec<Variant>,
}

impl Clone for DictData {
    fn clone(&self) -> DictData {
        DictData { keys: self.keys.clone(), values: self.values.clone() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VarDict {
    obj: Option<Arc<DictData>>,
}

impl VarDict {
    pub fn new() -> VarDict {
        VarDict { obj: None }
    }

    pub fn from_pair(key: Variant, value: Variant) -> VarDict {
        VarDict {
            obj: Some(Arc::new(DictData { keys: vec![key], values: vec![value] })),
        }
    }

    pub fn len(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| o.keys.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn addr(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| Arc::as_ptr(o) as usize)
    }

    pub fn key(&self, i: usize) -> &Variant {
        &self.obj.as_ref().expect("index out of range").keys[i]
    }

    pub fn value(&self, i: usize) -> &Variant {
        &self.obj.as_ref().expect("index out of range").values[i]
    }

    fn bsearch(&self, key: &Variant) -> Result<usize, usize> {
        match &self.obj {
            None => Err(0),
            Some(o) => o.keys.binary_search_by(|probe| probe.compare(key)),
        }
    }

    pub fn find(&self, key: &Variant) -> Option<Variant> {
        let i = self.bsearch(key).ok()?;
        Some(self.obj.as_ref()?.values[i].clone())
    }

    pub fn contains(&self, key: &Variant) -> bool {
        self.bsearch(key).is_ok()
    }

    pub fn find_replace(&mut self, key: Variant, value: Variant) {
        match self.bsearch(&key) {
            Ok(i) => {
                let arc = self.obj.as_mut().expect("found in empty dict");
                Arc::make_mut(arc).values[i] = value;
            }
            Err(i) => {
                let arc = self.obj.get_or_insert_with(|| Arc::new(DictData::default()));
                let d = Arc::make_mut(arc);
                d.keys.insert(i, key);
                d.values.insert(i, value);
            }
        }
        debug_assert!(self.is_sorted());
    }

    pub fn find_erase(&mut self, key: &Variant) {
        if let Ok(i) = self.bsearch(key) {
            let arc = self.obj.as_mut().expect("found in empty dict");
            let d = Arc::make_mut(arc);
            d.keys.remove(i);
            d.values.remove(i);
            if d.keys.is_empty() {
                self.obj = None;
            }
        }
    }

    /// The keys vector is strictly sorted and parallel to the values.
    pub fn is_sorted(&self) -> bool {
        match &self.obj {
            None => true,
            Some(o) => {
                o.keys.len() == o.values.len()
                    && o.keys.windows(2).all(|w| w[0].compare(&w[1]) == Ordering::Less)
            }
        }
    }
}

/// 256-bit ordinal set with a shared handle.
#[derive(Debug, Clone, Default)]
pub struct OrdSet {
    obj: Option<Arc<CharSet>>,
}

impl OrdSet {
    pub fn new() -> OrdSet {
        OrdSet { obj: None }
    }

    pub fn from_elem(v: u8) -> OrdSet {
        let mut cs = CharSet::new();
        cs.include(v);
        OrdSet { obj: Some(Arc::new(cs)) }
    }

    pub fn from_range(lo: u8, hi: u8) -> OrdSet {
        let mut cs = CharSet::new();
        if lo <= hi {
            cs.include_range(lo, hi);
        }
        OrdSet { obj: Some(Arc::new(cs)) }
    }

    pub fn is_empty(&self) -> bool {
        self.obj.as_ref().map_or(true, |o| o.is_empty())
    }

    fn addr(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| Arc::as_ptr(o) as usize)
    }

    pub fn contains(&self, v: i64) -> bool {
        match u8::try_from(v) {
            Ok(b) => self.obj.as_ref().map_or(false, |o| o.contains(b)),
            Err(_) => false,
        }
    }

    fn make_mut(&mut self) -> &mut CharSet {
        let arc = self.obj.get_or_insert_with(|| Arc::new(CharSet::new()));
        Arc::make_mut(arc)
    }

    pub fn include(&mut self, v: u8) {
        self.make_mut().include(v);
    }

    pub fn include_range(&mut self, lo: u8, hi: u8) {
        if lo <= hi {
            self.make_mut().include_range(lo, hi);
        }
    }

    pub fn exclude(&mut self, v: u8) {
        self.make_mut().exclude(v);
    }

    pub fn charset(&self) -> CharSet {
        self.obj.as_ref().map(|o| (**o).clone()).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        let cs = self.obj.as_deref();
        (0u16..256)
            .map(|b| b as u8)
            .filter(move |b| cs.map_or(false, |c| c.contains(*b)))
    }
}

/// Refcounted single-slot box over a variant; the representation of
/// reference values.
#[derive(Debug, Clone)]
pub struct RefBox {
    obj: Arc<RefCell<Variant>>,
}

impl RefBox {
    pub fn new(v: Variant) -> RefBox {
        RefBox { obj: Arc::new(RefCell::new(v)) }
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.obj) as usize
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, Variant> {
        self.obj.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, Variant> {
        self.obj.borrow_mut()
    }
}

// Same single-threaded-mutation contract as Variant above.
unsafe impl Send for RefBox {}
unsafe impl Sync for RefBox {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_per_tag() {
        assert!(Variant::Void.empty());
        assert!(Variant::Ord(0).empty());
        assert!(!Variant::Ord(3).empty());
        assert!(Variant::Str(Str::new()).empty());
        assert!(!Variant::Str(Str::from("x")).empty());
        assert!(Variant::Ref(RefBox::new(Variant::Ord(0))).empty());
        assert!(!Variant::Ref(RefBox::new(Variant::Ord(1))).empty());
    }

    #[test]
    fn test_equality_rules() {
        // structural for strings
        assert_eq!(Variant::Str(Str::from("ab")), Variant::Str(Str::from("ab")));
        // identity for vectors
        let v1 = VarVec::from_one(Variant::Ord(1));
        let v2 = v1.clone();
        let v3 = VarVec::from_one(Variant::Ord(1));
        assert_eq!(Variant::Vec(v1.clone()), Variant::Vec(v2));
        assert_ne!(Variant::Vec(v1), Variant::Vec(v3));
        // no cross-tag numeric equality
        assert_ne!(Variant::Ord(1), Variant::Real(1.0));
    }

    #[test]
    fn test_compare_by_tag_then_payload() {
        assert_eq!(Variant::Ord(1).compare(&Variant::Ord(2)), Ordering::Less);
        // Ord tag sorts before Str tag
        assert_eq!(
            Variant::Ord(1_000_000).compare(&Variant::Str(Str::from("a"))),
            Ordering::Less
        );
    }

    #[test]
    fn test_dict_sorted_parallel() {
        let mut d = VarDict::new();
        d.find_replace(Variant::Ord(3), Variant::Str(Str::from("c")));
        d.find_replace(Variant::Ord(1), Variant::Str(Str::from("a")));
        d.find_replace(Variant::Ord(2), Variant::Str(Str::from("b")));
        d.find_replace(Variant::Ord(2), Variant::Str(Str::from("B")));
        assert_eq!(d.len(), 3);
        assert!(d.is_sorted());
        assert_eq!(d.find(&Variant::Ord(2)).unwrap(), Variant::Str(Str::from("B")));
        d.find_erase(&Variant::Ord(1));
        assert_eq!(d.len(), 2);
        assert!(d.is_sorted());
    }

    #[test]
    fn test_dict_copy_on_write() {
        let mut a = VarDict::from_pair(Variant::Ord(1), Variant::Str(Str::from("x")));
        let b = a.clone();
        a.find_replace(Variant::Ord(1), Variant::Str(Str::from("z")));
        assert_eq!(a.find(&Variant::Ord(1)).unwrap(), Variant::Str(Str::from("z")));
        assert_eq!(b.find(&Variant::Ord(1)).unwrap(), Variant::Str(Str::from("x")));
    }

    #[test]
    fn test_set_find_insert_erase() {
        let mut s = VarSet::new();
        s.find_insert(Variant::Ord(5));
        s.find_insert(Variant::Ord(2));
        s.find_insert(Variant::Ord(5));
        assert_eq!(s.len(), 2);
        assert!(s.contains(&Variant::Ord(2)));
        s.find_erase(&Variant::Ord(2));
        assert!(!s.contains(&Variant::Ord(2)));
    }

    #[test]
    fn test_ordset_range() {
        let mut s = OrdSet::from_range(1, 3);
        s.include(7);
        assert!(s.contains(2));
        assert!(s.contains(7));
        assert!(!s.contains(5));
        assert!(!s.contains(300));
        let snapshot = s.clone();
        s.exclude(2);
        assert!(!s.contains(2));
        assert!(snapshot.contains(2));
    }

    #[test]
    fn test_vec_cow_through_variant() {
        let mut a = Variant::Vec(VarVec::from_one(Variant::Ord(1)));
        let b = a.clone();
        a.as_vec_mut().unwrap().push(Variant::Ord(2));
        assert_eq!(a.as_vec().unwrap().len(), 2);
        assert_eq!(b.as_vec().unwrap().len(), 1);
    }

    #[test]
    fn test_dump_forms() {
        let mut out = String::new();
        Variant::Vec(VarVec::from_one(Variant::Str(Str::from("a"))))
            .dump(&mut out)
            .unwrap();
        assert_eq!(out, "['a']");
    }
}
