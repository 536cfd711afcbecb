//! Lexical environments
//!
//! A pool of frames indexed by handle, each mapping names to storage slots
//! and pointing at its lexical parent. Function scopes parent to the global
//! frame (no dynamic scoping, no closures); block scopes parent to the
//! current frame. Scopes are strictly LIFO, so leaving a scope truncates the
//! pool back to where it was on entry.

use std::collections::HashMap;
use volt_core::VarType;

pub type FrameId = usize;

/// What a name is bound to: a cell (or array base) in the simulated memory
/// arena plus the static facts the evaluator needs about it.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Arena address of the cell, or of the first element for arrays
    pub addr: u32,
    pub ty: VarType,
    pub volatile: bool,
    /// Declared as a pointer (`uint32* p`), so arithmetic on it scales by 4
    pub pointer: bool,
    /// `Some(len)` iff the binding is an array
    pub array_len: Option<u32>,
}

impl Slot {
    pub fn scalar(addr: u32, ty: VarType, volatile: bool) -> Self {
        Slot {
            addr,
            ty,
            volatile,
            pointer: false,
            array_len: None,
        }
    }

    pub fn pointer(addr: u32, ty: VarType) -> Self {
        Slot {
            addr,
            ty,
            volatile: false,
            pointer: true,
            array_len: None,
        }
    }

    pub fn array(addr: u32, ty: VarType, len: u32) -> Self {
        Slot {
            addr,
            ty,
            volatile: false,
            pointer: false,
            array_len: Some(len),
        }
    }
}

struct Frame {
    parent: Option<FrameId>,
    bindings: HashMap<String, Slot>,
}

pub struct Environment {
    frames: Vec<Frame>,
    current: FrameId,
}

pub const GLOBAL_FRAME: FrameId = 0;

impl Environment {
    pub fn new() -> Self {
        Environment {
            frames: vec![Frame {
                parent: None,
                bindings: HashMap::new(),
            }],
            current: GLOBAL_FRAME,
        }
    }

    pub fn current(&self) -> FrameId {
        self.current
    }

    /// Enter a block scope chained to the current frame.
    pub fn enter_block(&mut self) -> FrameId {
        self.push(Some(self.current))
    }

    /// Enter a function scope chained to the global frame. Returns the
    /// caller's frame so `leave` can restore it.
    pub fn enter_function(&mut self) -> FrameId {
        let caller = self.current;
        self.push(Some(GLOBAL_FRAME));
        caller
    }

    fn push(&mut self, parent: Option<FrameId>) -> FrameId {
        let id = self.frames.len();
        self.frames.push(Frame {
            parent,
            bindings: HashMap::new(),
        });
        self.current = id;
        id
    }

    /// Leave the current scope, restoring `to` (a frame id saved at entry)
    /// and discarding every frame created since.
    pub fn leave(&mut self, to: FrameId) {
        debug_assert!(to < self.frames.len());
        self.frames.truncate(to + 1);
        self.current = to;
    }

    /// Bind `name` in the current frame. Returns false if the frame already
    /// has a binding of that name (redeclaration in the same scope).
    pub fn declare(&mut self, name: &str, slot: Slot) -> bool {
        let frame = &mut self.frames[self.current];
        if frame.bindings.contains_key(name) {
            return false;
        }
        frame.bindings.insert(name.to_string(), slot);
        true
    }

    /// Find the nearest enclosing binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<&Slot> {
        let mut frame = Some(self.current);
        while let Some(id) = frame {
            let f = &self.frames[id];
            if let Some(slot) = f.bindings.get(name) {
                return Some(slot);
            }
            frame = f.parent;
        }
        None
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(addr: u32) -> Slot {
        Slot::scalar(addr, VarType::U32, false)
    }

    #[test]
    fn test_block_scope_shadowing() {
        let mut env = Environment::new();
        assert!(env.declare("x", slot(4)));

        let outer = env.current();
        env.enter_block();
        assert!(env.declare("x", slot(8)));
        assert_eq!(env.lookup("x").unwrap().addr, 8);

        env.leave(outer);
        assert_eq!(env.lookup("x").unwrap().addr, 4);
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let mut env = Environment::new();
        assert!(env.declare("x", slot(4)));
        assert!(!env.declare("x", slot(8)));
    }

    #[test]
    fn test_function_scope_skips_caller_locals() {
        let mut env = Environment::new();
        env.declare("global", slot(4));

        let outer = env.current();
        env.enter_block();
        env.declare("caller_local", slot(8));

        let caller = env.enter_function();
        // Callee sees globals but not the caller's locals
        assert!(env.lookup("global").is_some());
        assert!(env.lookup("caller_local").is_none());

        env.leave(caller);
        assert!(env.lookup("caller_local").is_some());
        env.leave(outer);
    }

    #[test]
    fn test_visibility_ends_at_block_exit() {
        let mut env = Environment::new();
        let outer = env.current();
        env.enter_block();
        env.declare("inner", slot(4));
        env.leave(outer);
        assert!(env.lookup("inner").is_none());
    }
}
