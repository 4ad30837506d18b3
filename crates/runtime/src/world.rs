//! The world: type store, state store, and the built-in system module.
//!
//! The "queen bee" is the parentless module that owns the primitive type
//! descriptors and the standard I/O slots (`sio`, `serr`, `sresult`). It
//! is process-wide state in spirit, but owned by the driver and passed
//! explicitly to the compiler and the VM.

use std::any::Any;
use std::sync::Arc;

use shn_core::{Obj, RtObj, RuntimeError, Str, VarTag, Variant};

use crate::codeseg::CodeSeg;
use crate::stateobj::StateObj;
use crate::types::{
    Definition, FormalArg, Prototype, SelfVar, StateDef, StateId, Symbol, TypeDef, TypeId,
    TypeKind,
};

/// Symbol-table failures surfaced to the compiler.
#[derive(Debug)]
pub enum SymbolError {
    Duplicate(String),
    Unknown(String),
}

impl std::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolError::Duplicate(n) => write!(f, "'{}' is already defined", n),
            SymbolError::Unknown(n) => write!(f, "Unknown identifier '{}'", n),
        }
    }
}

impl std::error::Error for SymbolError {}

/// The canonical runtime object of a type descriptor, so `typeref` is a
/// first-class variant value. One per descriptor: typeref equality is
/// handle equality.
#[derive(Debug)]
pub struct TypeRefObj {
    pub id: TypeId,
    name: String,
}

impl RtObj for TypeRefObj {
    fn is_empty_obj(&self) -> bool {
        false
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<type {}>", self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct World {
    types: Vec<TypeDef>,
    type_objs: Vec<Obj>,
    states: Vec<StateDef>,

    pub def_typeref: TypeId,
    pub def_void: TypeId,
    pub def_variant: TypeId,
    pub def_bool: TypeId,
    pub def_char: TypeId,
    pub def_byte: TypeId,
    pub def_int: TypeId,
    pub def_nullcont: TypeId,
    pub def_str: TypeId,
    pub def_charset: TypeId,
    pub def_charfifo: TypeId,

    pub queenbee: StateId,
    pub sio_var: u8,
    pub serr_var: u8,
    pub sresult_var: u8,
    queenbee_obj: Option<Arc<StateObj>>,
}

impl World {
    pub fn new() -> World {
        let mut w = World {
            types: Vec::new(),
            type_objs: Vec::new(),
            states: Vec::new(),
            def_typeref: TypeId(0),
            def_void: TypeId(0),
            def_variant: TypeId(0),
            def_bool: TypeId(0),
            def_char: TypeId(0),
            def_byte: TypeId(0),
            def_int: TypeId(0),
            def_nullcont: TypeId(0),
            def_str: TypeId(0),
            def_charset: TypeId(0),
            def_charfifo: TypeId(0),
            queenbee: StateId(0),
            sio_var: 0,
            serr_var: 0,
            sresult_var: 0,
            queenbee_obj: None,
        };
        w.init_queenbee();
        w
    }

    fn init_queenbee(&mut self) {
        // The system module exists before its own prototype type can; the
        // placeholder return type is patched right after `void` is
        // registered.
        let qb = self.push_state("system", None, Arc::new(Prototype { ret: TypeId(0), args: vec![] }));
        self.queenbee = qb;

        self.def_typeref = self.register_type(qb, TypeKind::TypeRef, "typeref");
        self.def_void = self.register_type(qb, TypeKind::Void, "void");
        self.def_variant = self.register_type(qb, TypeKind::Variant, "variant");
        self.states[qb.0 as usize].prototype = Arc::new(Prototype { ret: self.def_void, args: vec![] });

        self.def_bool = self.register_type(qb, TypeKind::Bool, "bool");
        self.def_char = self.register_type(qb, TypeKind::Char { left: 0, right: 255 }, "char");
        self.def_byte = self.register_type(qb, TypeKind::Int { left: 0, right: 255 }, "byte");
        self.def_int = self.register_type(
            qb,
            TypeKind::Int { left: i64::MIN, right: i64::MAX },
            "int",
        );
        self.def_nullcont = self.register_type(qb, TypeKind::NullCont, "<null container>");
        self.def_str = self.derive_vec(self.def_char, qb);
        self.types[self.def_str.0 as usize].name = "str".into();
        self.def_charset = self.derive_set(self.def_char, qb);
        self.types[self.def_charset.0 as usize].name = "charset".into();
        self.def_charfifo = self.derive_fifo(self.def_char, qb);
        self.types[self.def_charfifo.0 as usize].name = "charfifo".into();

        self.add_definition(qb, "false", self.def_bool, Variant::Ord(0))
            .expect("fresh scope");
        self.add_definition(qb, "true", self.def_bool, Variant::Ord(1))
            .expect("fresh scope");
        for (name, ty) in [
            ("typeref", self.def_typeref),
            ("void", self.def_void),
            ("variant", self.def_variant),
            ("bool", self.def_bool),
            ("char", self.def_char),
            ("byte", self.def_byte),
            ("int", self.def_int),
            ("str", self.def_str),
            ("charset", self.def_charset),
            ("charfifo", self.def_charfifo),
        ] {
            self.add_type_alias(qb, name, ty).expect("fresh scope");
        }

        self.sio_var = self.add_self_var(qb, "sio", self.def_charfifo).expect("fresh scope");
        self.serr_var = self.add_self_var(qb, "serr", self.def_charfifo).expect("fresh scope");
        self.sresult_var =
            self.add_self_var(qb, "sresult", self.def_variant).expect("fresh scope");
    }

    // --- states ----------------------------------------------------------- //

    fn push_state(
        &mut self,
        name: impl Into<String>,
        parent: Option<StateId>,
        prototype: Arc<Prototype>,
    ) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(StateDef {
            name: name.into(),
            parent,
            prototype,
            self_vars: Vec::new(),
            defs: Vec::new(),
            symbols: std::collections::HashMap::new(),
            types: Vec::new(),
            code: Arc::new(CodeSeg::new(None)),
            const_strings: Vec::new(),
        });
        id
    }

    /// A module is a parentless state with a void prototype.
    pub fn add_module(&mut self, name: impl Into<String>) -> StateId {
        let proto = Arc::new(Prototype { ret: self.def_void, args: vec![] });
        self.push_state(name, None, proto)
    }

    /// A function state nested in `parent`.
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        parent: StateId,
        ret: TypeId,
        args: Vec<FormalArg>,
    ) -> StateId {
        let proto = Arc::new(Prototype { ret, args });
        self.push_state(name, Some(parent), proto)
    }

    pub fn state(&self, id: StateId) -> &StateDef {
        &self.states[id.0 as usize]
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut StateDef {
        &mut self.states[id.0 as usize]
    }

    pub fn install_code(&mut self, id: StateId, seg: CodeSeg) {
        self.state_mut(id).code = Arc::new(seg);
    }

    pub fn new_instance(&self, id: StateId) -> Arc<StateObj> {
        let st = self.state(id);
        StateObj::new(id, st.name.clone(), st.self_var_count())
    }

    /// Instantiate the system module with its pre-initialized I/O slots.
    pub fn instantiate_queenbee(&mut self, sio: Obj, serr: Obj) -> Arc<StateObj> {
        let obj = self.new_instance(self.queenbee);
        obj.set(self.sio_var as usize, Variant::RtObj(sio));
        obj.set(self.serr_var as usize, Variant::RtObj(serr));
        self.queenbee_obj = Some(obj.clone());
        obj
    }

    pub fn queenbee_obj(&self) -> Option<&Arc<StateObj>> {
        self.queenbee_obj.as_ref()
    }

    /// The program result slot, set by `exit`.
    pub fn sresult(&self) -> Variant {
        self.queenbee_obj
            .as_ref()
            .and_then(|o| o.get(self.sresult_var as usize))
            .unwrap_or_default()
    }

    pub fn set_sresult(&self, v: Variant) {
        if let Some(o) = &self.queenbee_obj {
            o.set(self.sresult_var as usize, v);
        }
    }

    /// The `serr` fifo of the system module instance, for diagnostics.
    pub fn serr_obj(&self) -> Option<Obj> {
        match self.queenbee_obj.as_ref()?.get(self.serr_var as usize)? {
            Variant::RtObj(o) => Some(o),
            _ => None,
        }
    }

    pub fn sio_obj(&self) -> Option<Obj> {
        match self.queenbee_obj.as_ref()?.get(self.sio_var as usize)? {
            Variant::RtObj(o) => Some(o),
            _ => None,
        }
    }

    // --- symbols ---------------------------------------------------------- //

    pub fn add_definition(
        &mut self,
        state: StateId,
        name: &str,
        ty: TypeId,
        value: Variant,
    ) -> Result<u32, SymbolError> {
        let st = self.state_mut(state);
        if st.symbols.contains_key(name) {
            return Err(SymbolError::Duplicate(name.into()));
        }
        let idx = st.defs.len() as u32;
        st.defs.push(Definition { name: name.into(), ty, value });
        st.symbols.insert(name.into(), Symbol::Def(idx));
        Ok(idx)
    }

    /// A type alias is a definition whose value is the type's own
    /// canonical runtime object.
    pub fn add_type_alias(
        &mut self,
        state: StateId,
        name: &str,
        ty: TypeId,
    ) -> Result<u32, SymbolError> {
        let obj = self.type_obj(ty);
        self.add_definition(state, name, self.def_typeref, Variant::RtObj(obj))
    }

    pub fn add_self_var(
        &mut self,
        state: StateId,
        name: &str,
        ty: TypeId,
    ) -> Result<u8, SymbolError> {
        let st = self.state_mut(state);
        if st.symbols.contains_key(name) {
            return Err(SymbolError::Duplicate(name.into()));
        }
        let id = st.self_vars.len();
        // Inner vars are addressed by a byte index.
        if id > 254 {
            return Err(SymbolError::Duplicate(name.into()));
        }
        let id = id as u8;
        st.self_vars.push(SelfVar { name: name.into(), ty, id });
        st.symbols.insert(name.into(), Symbol::SelfVar(id));
        Ok(id)
    }

    pub fn find_symbol(&self, state: StateId, name: &str) -> Option<Symbol> {
        self.state(state).find(name)
    }

    /// If this definition aliases a type, the aliased type id.
    pub fn aliased_type(&self, def: &Definition) -> Option<TypeId> {
        if def.ty != self.def_typeref {
            return None;
        }
        match &def.value {
            Variant::RtObj(o) => o.as_any().downcast_ref::<TypeRefObj>().map(|t| t.id),
            _ => None,
        }
    }

    // --- type store ------------------------------------------------------- //

    fn register_type(&mut self, owner: StateId, kind: TypeKind, name: &str) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDef::new(kind, owner, name));
        self.type_objs.push(Arc::new(TypeRefObj { id, name: name.into() }));
        self.states[owner.0 as usize].types.push(id);
        id
    }

    pub fn type_(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    /// The canonical runtime object for a descriptor (typeref values).
    pub fn type_obj(&self, id: TypeId) -> Obj {
        self.type_objs[id.0 as usize].clone()
    }

    pub fn type_id_of_obj(&self, obj: &Obj) -> Option<TypeId> {
        obj.as_any().downcast_ref::<TypeRefObj>().map(|t| t.id)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    // --- classification helpers ------------------------------------------- //

    pub fn is_bool(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Bool)
    }

    pub fn is_int_kind(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Int { .. })
    }

    pub fn is_void(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Void)
    }

    pub fn is_typeref(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::TypeRef)
    }

    pub fn is_variant_kind(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Variant)
    }

    pub fn is_nullcont(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::NullCont)
    }

    pub fn is_reference(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Ref(_))
    }

    pub fn is_any_vec(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Vec { .. })
    }

    pub fn is_any_set(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Set { .. })
    }

    pub fn is_any_dict(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Dict { .. })
    }

    pub fn is_func_ptr(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::FuncPtr(_))
    }

    pub fn is_fifo(&self, t: TypeId) -> bool {
        matches!(self.type_(t).kind, TypeKind::Fifo { .. })
    }

    pub fn is_byte_vec(&self, t: TypeId) -> bool {
        match &self.type_(t).kind {
            TypeKind::Vec { elem } => self.type_(*elem).is_byte_ord(),
            _ => false,
        }
    }

    pub fn is_byte_set(&self, t: TypeId) -> bool {
        match &self.type_(t).kind {
            TypeKind::Set { index } => self.type_(*index).is_byte_ord(),
            _ => false,
        }
    }

    pub fn is_byte_dict(&self, t: TypeId) -> bool {
        match &self.type_(t).kind {
            TypeKind::Dict { index, .. } => self.type_(*index).is_byte_ord(),
            _ => false,
        }
    }

    /// Element type of a container (`void` for sets).
    pub fn elem_of(&self, t: TypeId) -> TypeId {
        match &self.type_(t).kind {
            TypeKind::Vec { elem } => *elem,
            TypeKind::Dict { elem, .. } => *elem,
            TypeKind::Set { .. } => self.def_void,
            TypeKind::Fifo { elem } => *elem,
            _ => self.def_void,
        }
    }

    /// Index (key) type of a container (`int` for vectors).
    pub fn index_of(&self, t: TypeId) -> TypeId {
        match &self.type_(t).kind {
            TypeKind::Vec { .. } => self.def_int,
            TypeKind::Set { index } => *index,
            TypeKind::Dict { index, .. } => *index,
            _ => self.def_void,
        }
    }

    /// The variant tag a value of this type carries at run time.
    pub fn var_tag(&self, t: TypeId) -> VarTag {
        match &self.type_(t).kind {
            TypeKind::TypeRef => VarTag::RtObj,
            TypeKind::Void | TypeKind::NullCont | TypeKind::Variant => VarTag::Void,
            TypeKind::Ref(_) => VarTag::Ref,
            TypeKind::Bool | TypeKind::Char { .. } | TypeKind::Int { .. }
            | TypeKind::Enum { .. } => VarTag::Ord,
            TypeKind::Vec { .. } => {
                if self.is_byte_vec(t) {
                    VarTag::Str
                } else {
                    VarTag::Vec
                }
            }
            TypeKind::Set { .. } => {
                if self.is_byte_set(t) {
                    VarTag::OrdSet
                } else {
                    VarTag::Set
                }
            }
            TypeKind::Dict { .. } => {
                if self.is_byte_dict(t) {
                    VarTag::Vec
                } else {
                    VarTag::Dict
                }
            }
            TypeKind::Fifo { .. } | TypeKind::FuncPtr(_) | TypeKind::State(_) => VarTag::RtObj,
        }
    }

    // --- identity and assignability --------------------------------------- //

    pub fn identical(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let (ta, tb) = (self.type_(a), self.type_(b));
        match (&ta.kind, &tb.kind) {
            (TypeKind::TypeRef, TypeKind::TypeRef)
            | (TypeKind::Void, TypeKind::Void)
            | (TypeKind::Variant, TypeKind::Variant)
            | (TypeKind::NullCont, TypeKind::NullCont)
            | (TypeKind::Bool, TypeKind::Bool) => true,
            (TypeKind::Char { left: l1, right: r1 }, TypeKind::Char { left: l2, right: r2 })
            | (TypeKind::Int { left: l1, right: r1 }, TypeKind::Int { left: l2, right: r2 }) => {
                l1 == l2 && r1 == r2
            }
            // Enumerations are identical only as the same descriptor.
            (TypeKind::Enum { .. }, TypeKind::Enum { .. }) => false,
            (TypeKind::Ref(x), TypeKind::Ref(y)) => self.identical(*x, *y),
            (TypeKind::Vec { elem: e1 }, TypeKind::Vec { elem: e2 }) => self.identical(*e1, *e2),
            (TypeKind::Set { index: i1 }, TypeKind::Set { index: i2 }) => self.identical(*i1, *i2),
            (
                TypeKind::Dict { index: i1, elem: e1 },
                TypeKind::Dict { index: i2, elem: e2 },
            ) => self.identical(*i1, *i2) && self.identical(*e1, *e2),
            (TypeKind::Fifo { elem: e1 }, TypeKind::Fifo { elem: e2 }) => {
                self.identical(*e1, *e2)
            }
            (TypeKind::FuncPtr(p1), TypeKind::FuncPtr(p2)) => {
                self.identical(p1.ret, p2.ret)
                    && p1.args.len() == p2.args.len()
                    && p1
                        .args
                        .iter()
                        .zip(p2.args.iter())
                        .all(|(x, y)| self.identical(x.ty, y.ty))
            }
            (TypeKind::State(s1), TypeKind::State(s2)) => s1 == s2,
            _ => false,
        }
    }

    /// Implicit assignability; ordinal ranges are not checked here (the
    /// runtime cast does that), only kind compatibility.
    pub fn can_assign(&self, from: TypeId, to: TypeId) -> bool {
        if self.identical(from, to) {
            return true;
        }
        let (tf, tt) = (self.type_(from), self.type_(to));
        match (&tf.kind, &tt.kind) {
            (TypeKind::Char { .. }, TypeKind::Char { .. }) => true,
            (TypeKind::Int { .. }, TypeKind::Int { .. }) => true,
            // A subrange enumeration shares its base's value list.
            (TypeKind::Enum { values: v1, .. }, TypeKind::Enum { values: v2, .. }) => {
                Arc::ptr_eq(v1, v2)
            }
            (TypeKind::Ref(x), TypeKind::Ref(y)) => self.can_assign(*x, *y),
            _ => false,
        }
    }

    /// Runtime type check of a value against a descriptor.
    pub fn is_my_type(&self, t: TypeId, v: &Variant) -> bool {
        let td = self.type_(t);
        match &td.kind {
            TypeKind::Variant => true,
            TypeKind::Void => v.is_void(),
            TypeKind::Bool | TypeKind::Char { .. } | TypeKind::Int { .. }
            | TypeKind::Enum { .. } => matches!(v, Variant::Ord(_)),
            TypeKind::State(sid) => match v {
                Variant::RtObj(o) => o
                    .as_any()
                    .downcast_ref::<StateObj>()
                    .map_or(false, |s| s.state() == *sid),
                _ => false,
            },
            TypeKind::TypeRef => match v {
                Variant::RtObj(o) => o.as_any().downcast_ref::<TypeRefObj>().is_some(),
                _ => false,
            },
            _ => v.tag() == self.var_tag(t),
        }
    }

    /// Mutate a value into the target representation where legal.
    pub fn runtime_typecast(&self, t: TypeId, v: &mut Variant) -> Result<(), RuntimeError> {
        let td = self.type_(t);
        match &td.kind {
            TypeKind::Variant => Ok(()),
            TypeKind::Bool => {
                *v = Variant::Ord(i64::from(!v.empty()));
                Ok(())
            }
            TypeKind::Char { left, right }
            | TypeKind::Int { left, right }
            | TypeKind::Enum { left, right, .. } => {
                let ord = v.as_ord()?;
                if ord < *left || ord > *right {
                    return Err(RuntimeError::OutOfRange);
                }
                Ok(())
            }
            _ => {
                if self.is_my_type(t, v) {
                    Ok(())
                } else {
                    Err(RuntimeError::Type)
                }
            }
        }
    }

    // --- derivations ------------------------------------------------------- //

    /// Derived types are cached on the source descriptor; the cache is
    /// single-assignment and the derivative has the same owner.
    pub fn derive_vec(&mut self, elem: TypeId, reg: StateId) -> TypeId {
        if let Some(v) = self.type_(elem).vec_of {
            return v;
        }
        let name = format!("{}[]", self.type_name(elem));
        let v = self.register_type(reg, TypeKind::Vec { elem }, &name);
        self.types[elem.0 as usize].vec_of = Some(v);
        v
    }

    pub fn derive_set(&mut self, index: TypeId, reg: StateId) -> TypeId {
        if let Some(s) = self.type_(index).set_of {
            return s;
        }
        let name = format!("{}{{}}", self.type_name(index));
        let s = self.register_type(reg, TypeKind::Set { index }, &name);
        self.types[index.0 as usize].set_of = Some(s);
        s
    }

    pub fn derive_fifo(&mut self, elem: TypeId, reg: StateId) -> TypeId {
        if let Some(f) = self.type_(elem).fifo_of {
            return f;
        }
        let name = format!("{}<>", self.type_name(elem));
        let f = self.register_type(reg, TypeKind::Fifo { elem }, &name);
        self.types[elem.0 as usize].fifo_of = Some(f);
        f
    }

    pub fn ref_type(&mut self, to: TypeId, reg: StateId) -> TypeId {
        if let Some(r) = self.type_(to).ref_type {
            return r;
        }
        let name = format!("{}^", self.type_name(to));
        let r = self.register_type(reg, TypeKind::Ref(to), &name);
        self.types[to.0 as usize].ref_type = Some(r);
        r
    }

    /// General container derivation: a void index makes a vector, a void
    /// element a set, anything else a dictionary.
    pub fn derive_container(&mut self, elem: TypeId, index: TypeId, reg: StateId) -> TypeId {
        if matches!(self.type_(index).kind, TypeKind::Void) {
            self.derive_vec(elem, reg)
        } else if matches!(self.type_(elem).kind, TypeKind::Void) {
            self.derive_set(index, reg)
        } else {
            // Dictionaries are not cached per-elem; reuse an identical one
            // already registered with this state.
            for t in self.state(reg).types.clone() {
                if let TypeKind::Dict { index: i2, elem: e2 } = self.type_(t).kind {
                    if self.identical(index, i2) && self.identical(elem, e2) {
                        return t;
                    }
                }
            }
            let name = format!("{}[{}]", self.type_name(elem), self.type_name(index));
            self.register_type(reg, TypeKind::Dict { index, elem }, &name)
        }
    }

    /// Subrange construction. `left == right + 1` is the explicit empty
    /// range; anything further inverted is an error.
    pub fn create_subrange(
        &mut self,
        base: TypeId,
        left: i64,
        right: i64,
        reg: StateId,
    ) -> Result<TypeId, RuntimeError> {
        let td = self.type_(base);
        let (bl, br) = td.ord_range().ok_or(RuntimeError::Type)?;
        if left == bl && right == br {
            return Ok(base);
        }
        if left > right + 1 {
            return Err(RuntimeError::OutOfRange);
        }
        let name = format!("{}..{}", left, right);
        match &td.kind {
            TypeKind::Bool => Err(RuntimeError::Type),
            TypeKind::Char { .. } => {
                Ok(self.register_type(reg, TypeKind::Char { left, right }, &name))
            }
            TypeKind::Int { .. } => {
                Ok(self.register_type(reg, TypeKind::Int { left, right }, &name))
            }
            TypeKind::Enum { values, .. } => {
                if left < bl || right > br {
                    return Err(RuntimeError::OutOfRange);
                }
                let values = values.clone();
                Ok(self.register_type(reg, TypeKind::Enum { values, left, right }, &name))
            }
            _ => Err(RuntimeError::Type),
        }
    }

    /// Readable form of a type for listings and error messages.
    pub fn type_name(&self, t: TypeId) -> String {
        let td = self.type_(t);
        if !td.name.is_empty() {
            return td.name.clone();
        }
        match &td.kind {
            TypeKind::Char { left, right } | TypeKind::Int { left, right } => {
                format!("{}..{}", left, right)
            }
            TypeKind::Enum { values, left, right } => {
                let names: Vec<&str> = values
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i as i64 >= *left && *i as i64 <= *right)
                    .map(|(_, v)| v.name.as_str())
                    .collect();
                format!("({})", names.join(", "))
            }
            TypeKind::State(sid) => self.state(*sid).name.clone(),
            _ => "<anonymous>".into(),
        }
    }

    /// Register a string literal for run-time use by a module.
    pub fn register_string(&mut self, module: StateId, s: Str) {
        self.state_mut(module).const_strings.push(s);
    }
}

impl Default for World {
    fn default() -> World {
        World::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumValue;

    #[test]
    fn test_primitives_owned_by_queenbee() {
        let w = World::new();
        assert_eq!(w.type_(w.def_int).owner, w.queenbee);
        assert_eq!(w.type_(w.def_str).owner, w.queenbee);
        assert!(w.type_(w.def_byte).is_byte_ord());
        assert!(!w.type_(w.def_int).is_byte_ord());
    }

    #[test]
    fn test_derivation_cache_single_assignment() {
        let mut w = World::new();
        let qb = w.queenbee;
        let v1 = w.derive_vec(w.def_int, qb);
        let v2 = w.derive_vec(w.def_int, qb);
        assert_eq!(v1, v2);
        // The derivative's owner matches the registering state.
        assert_eq!(w.type_(v1).owner, qb);
        // str is the cached vec-of-char.
        let s = w.derive_vec(w.def_char, qb);
        assert_eq!(s, w.def_str);
    }

    #[test]
    fn test_container_classification() {
        let mut w = World::new();
        let qb = w.queenbee;
        assert!(w.is_byte_vec(w.def_str));
        assert!(w.is_byte_set(w.def_charset));
        let int_vec = w.derive_vec(w.def_int, qb);
        assert!(!w.is_byte_vec(int_vec));
        let byte_dict = w.derive_container(w.def_str, w.def_byte, qb);
        assert!(w.is_byte_dict(byte_dict));
        let gen_dict = w.derive_container(w.def_str, w.def_int, qb);
        assert!(!w.is_byte_dict(gen_dict));
        assert_eq!(w.var_tag(byte_dict), VarTag::Vec);
        assert_eq!(w.var_tag(gen_dict), VarTag::Dict);
    }

    #[test]
    fn test_derive_container_void_rules() {
        let mut w = World::new();
        let qb = w.queenbee;
        let vec = w.derive_container(w.def_int, w.def_void, qb);
        assert!(matches!(w.type_(vec).kind, TypeKind::Vec { .. }));
        let set = w.derive_container(w.def_void, w.def_int, qb);
        assert!(matches!(w.type_(set).kind, TypeKind::Set { .. }));
    }

    #[test]
    fn test_assignability() {
        let mut w = World::new();
        let qb = w.queenbee;
        // any int subrange assigns to int
        let sub = w.create_subrange(w.def_int, 0, 9, qb).unwrap();
        assert!(w.can_assign(sub, w.def_int));
        assert!(w.can_assign(w.def_int, sub));
        // char does not assign to int
        assert!(!w.can_assign(w.def_char, w.def_int));
        // identical containers assign
        let v1 = w.derive_vec(w.def_int, qb);
        assert!(w.can_assign(v1, v1));
    }

    #[test]
    fn test_subrange_edges() {
        let mut w = World::new();
        let qb = w.queenbee;
        // left == right + 1: explicitly empty
        let empty = w.create_subrange(w.def_int, 5, 4, qb).unwrap();
        assert_eq!(w.type_(empty).ord_range(), Some((5, 4)));
        // left > right + 1: error
        assert!(w.create_subrange(w.def_int, 6, 4, qb).is_err());
        // bool has no subranges
        assert!(w.create_subrange(w.def_bool, 0, 0, qb).is_err());
    }

    #[test]
    fn test_runtime_typecast() {
        let w = World::new();
        let mut v = Variant::Str(Str::from("x"));
        w.runtime_typecast(w.def_bool, &mut v).unwrap();
        assert_eq!(v, Variant::Ord(1));
        let mut v = Variant::Ord(300);
        assert!(matches!(
            w.runtime_typecast(w.def_byte, &mut v),
            Err(RuntimeError::OutOfRange)
        ));
        let mut v = Variant::Str(Str::from("x"));
        assert!(matches!(w.runtime_typecast(w.def_int, &mut v), Err(RuntimeError::Type)));
    }

    #[test]
    fn test_symbols_duplicate_rejected() {
        let mut w = World::new();
        let m = w.add_module("m");
        w.add_self_var(m, "x", w.def_int).unwrap();
        assert!(matches!(
            w.add_self_var(m, "x", w.def_int),
            Err(SymbolError::Duplicate(_))
        ));
        assert!(matches!(w.find_symbol(m, "x"), Some(Symbol::SelfVar(0))));
        assert!(w.find_symbol(m, "y").is_none());
    }

    #[test]
    fn test_typeref_objects_canonical() {
        let w = World::new();
        let a = w.type_obj(w.def_int);
        let b = w.type_obj(w.def_int);
        assert_eq!(Variant::RtObj(a), Variant::RtObj(b));
    }

    #[test]
    fn test_enum_subrange_shares_values() {
        let mut w = World::new();
        let qb = w.queenbee;
        // bool is an enum; subranges of enums share the value list but
        // bool itself refuses subranging.
        let colors = {
            let values = Arc::new(vec![
                EnumValue { name: "red".into() },
                EnumValue { name: "green".into() },
                EnumValue { name: "blue".into() },
            ]);
            w.register_type(qb, TypeKind::Enum { values, left: 0, right: 2 }, "color")
        };
        let sub = w.create_subrange(colors, 0, 1, qb).unwrap();
        assert!(w.can_assign(sub, colors));
        assert!(w.can_assign(colors, sub));
        assert!(!w.identical(sub, colors));
        assert!(w.create_subrange(colors, 0, 5, qb).is_err());
    }
}
