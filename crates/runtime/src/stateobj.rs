//! State objects: heap records of inner-variable slots.
//!
//! A new instance is all-Void, so destruction works even when an
//! initializer fails halfway. Slots are finalized from the highest to the
//! lowest, the reverse of initialization order.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use shn_core::{RtObj, Variant};

use crate::types::StateId;

pub struct StateObj {
    state: StateId,
    /// Diagnostic name of the state, captured at instantiation.
    state_name: String,
    slots: Vec<RefCell<Variant>>,
}

// Module instances may be handed across threads once initialization is
// done; slot mutation happens only inside a single-threaded VM invocation
// and never holds a borrow across an opcode boundary. Cross-thread
// mutation of a shared instance requires external synchronization.
unsafe impl Send for StateObj {}
unsafe impl Sync for StateObj {}

impl StateObj {
    pub fn new(state: StateId, state_name: impl Into<String>, var_count: usize) -> Arc<StateObj> {
        let mut slots = Vec::with_capacity(var_count);
        for _ in 0..var_count {
            slots.push(RefCell::new(Variant::Void));
        }
        Arc::new(StateObj { state, state_name: state_name.into(), slots })
    }

    /// Zero-slot instance used as the activation for const-expression
    /// evaluation; any slot access there is a compile error anyway.
    pub fn scratch() -> Arc<StateObj> {
        StateObj::new(StateId(u32::MAX), "<const>", 0)
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    pub fn var_count(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<Variant> {
        self.slots.get(index).map(|s| s.borrow().clone())
    }

    pub fn set(&self, index: usize, v: Variant) -> bool {
        match self.slots.get(index) {
            Some(slot) => {
                *slot.borrow_mut() = v;
                true
            }
            None => false,
        }
    }
}

impl Drop for StateObj {
    fn drop(&mut self) {
        // Finalize from the highest slot down.
        while let Some(s) = self.slots.pop() {
            drop(s);
        }
    }
}

impl std::fmt::Debug for StateObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateObj({}, {} vars)", self.state_name, self.var_count())
    }
}

impl RtObj for StateObj {
    fn is_empty_obj(&self) -> bool {
        false
    }

    fn dump(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(out, "<{}>", self.state_name)
    }

    fn var_slot(&self, index: usize) -> Option<&RefCell<Variant>> {
        self.slots.get(index)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_is_zeroed() {
        let obj = StateObj::new(StateId(0), "m", 3);
        assert_eq!(obj.var_count(), 3);
        assert_eq!(obj.get(2).unwrap(), Variant::Void);
        assert!(obj.get(3).is_none());
    }

    #[test]
    fn test_slot_write_read() {
        let obj = StateObj::new(StateId(0), "m", 2);
        assert!(obj.set(1, Variant::Ord(9)));
        assert_eq!(obj.get(1).unwrap(), Variant::Ord(9));
        let slot = obj.var_slot(1).unwrap();
        *slot.borrow_mut() = Variant::Ord(10);
        assert_eq!(obj.get(1).unwrap(), Variant::Ord(10));
    }
}
