//! Compile-time scopes
//!
//! A stack of function scopes, each holding a stack of block scopes.
//! Locals map to frame slots; names not found locally are looked up in
//! enclosing functions and become upvalues, and names found nowhere are
//! globals. Labels and pending forward gotos are tracked per block.

use crate::lua::error::{LuaResult, SyntaxError, SyntaxErrorKind};
use crate::lua::lexer::SourceSpan;

/// Identifies a jump target inside a compiled function
pub type LabelId = u32;

/// Where a function finds one of its upvalues when a closure is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    /// A local slot of the directly enclosing function
    ParentLocal(usize),

    /// An upvalue of the directly enclosing function
    ParentUpvalue(usize),
}

/// Result of resolving a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Local(usize),
    Upvalue(usize),
    Global,
}

struct LocalVar {
    name: String,
    slot: usize,
}

struct LabelInfo {
    name: String,
    id: LabelId,
}

struct PendingGoto {
    name: String,
    id: LabelId,

    /// Active locals at the goto (clamped as blocks close)
    active: usize,
    span: SourceSpan,
}

struct BlockScope {
    active_on_entry: usize,
    slot_on_entry: usize,
    is_loop: bool,
    labels: Vec<LabelInfo>,
    gotos: Vec<PendingGoto>,

    /// Jump table handed to the compiled block: label id to statement index
    targets: Vec<(LabelId, usize)>,
}

impl BlockScope {
    fn new(active_on_entry: usize, slot_on_entry: usize, is_loop: bool) -> Self {
        BlockScope {
            active_on_entry,
            slot_on_entry,
            is_loop,
            labels: Vec::new(),
            gotos: Vec::new(),
            targets: Vec::new(),
        }
    }
}

struct FunctionScope {
    blocks: Vec<BlockScope>,
    active: Vec<LocalVar>,
    next_slot: usize,
    max_slots: usize,
    upvalues: Vec<(String, UpvalueDesc)>,
    is_vararg: bool,
}

impl FunctionScope {
    fn find_local(&self, name: &str) -> Option<usize> {
        self.active.iter().rev().find(|l| l.name == name).map(|l| l.slot)
    }

    fn find_upvalue(&self, name: &str) -> Option<usize> {
        self.upvalues.iter().position(|(n, _)| n == name)
    }

    fn add_upvalue(&mut self, name: &str, desc: UpvalueDesc) -> usize {
        self.upvalues.push((name.to_string(), desc));
        self.upvalues.len() - 1
    }
}

/// What a closed function scope leaves behind
#[derive(Debug)]
pub struct FunctionLayout {
    pub frame_size: usize,
    pub upvalues: Vec<UpvalueDesc>,
    pub targets: Vec<(LabelId, usize)>,
}

/// The scope stack used while generating one chunk
#[derive(Default)]
pub struct ScopeStack {
    functions: Vec<FunctionScope>,
    next_label: LabelId,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack::default()
    }

    fn current(&mut self) -> &mut FunctionScope {
        if self.functions.is_empty() {
            // The generator always opens the chunk function first
            self.functions.push(FunctionScope {
                blocks: vec![BlockScope::new(0, 0, false)],
                active: Vec::new(),
                next_slot: 0,
                max_slots: 0,
                upvalues: Vec::new(),
                is_vararg: true,
            });
        }
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn block(&mut self) -> &mut BlockScope {
        let function = self.current();
        if function.blocks.is_empty() {
            function.blocks.push(BlockScope::new(0, 0, false));
        }
        let last = function.blocks.len() - 1;
        &mut function.blocks[last]
    }

    fn fresh_label(&mut self) -> LabelId {
        self.next_label += 1;
        self.next_label
    }

    /// Open a function scope with its root block
    pub fn open_function(&mut self, is_vararg: bool) {
        self.functions.push(FunctionScope {
            blocks: vec![BlockScope::new(0, 0, false)],
            active: Vec::new(),
            next_slot: 0,
            max_slots: 0,
            upvalues: Vec::new(),
            is_vararg,
        });
    }

    /// Close the innermost function scope. Gotos still pending have no
    /// visible label.
    pub fn close_function(&mut self) -> LuaResult<FunctionLayout> {
        let targets = self.close_block()?;
        let function = match self.functions.pop() {
            Some(function) => function,
            None => {
                return Ok(FunctionLayout {
                    frame_size: 0,
                    upvalues: Vec::new(),
                    targets,
                })
            }
        };
        Ok(FunctionLayout {
            frame_size: function.max_slots,
            upvalues: function.upvalues.into_iter().map(|(_, desc)| desc).collect(),
            targets,
        })
    }

    /// Open a nested block; loops are break targets
    pub fn open_block(&mut self, is_loop: bool) {
        let function = self.current();
        let block = BlockScope::new(function.active.len(), function.next_slot, is_loop);
        function.blocks.push(block);
    }

    /// Close the innermost block, returning its jump table. Its locals go
    /// out of scope and unresolved gotos move to the enclosing block.
    pub fn close_block(&mut self) -> LuaResult<Vec<(LabelId, usize)>> {
        let function = self.current();
        let block = match function.blocks.pop() {
            Some(block) => block,
            None => return Ok(Vec::new()),
        };

        function.active.truncate(block.active_on_entry);
        function.next_slot = block.slot_on_entry;

        match function.blocks.last_mut() {
            Some(parent) => {
                for mut goto in block.gotos {
                    goto.active = goto.active.min(block.active_on_entry);
                    parent.gotos.push(goto);
                }
            }
            None => {
                if let Some(goto) = block.gotos.into_iter().next() {
                    return Err(SyntaxError::new(SyntaxErrorKind::UndefinedLabel(goto.name), &goto.span).into());
                }
            }
        }

        Ok(block.targets)
    }

    /// Declare a local in the innermost block, shadowing earlier bindings
    pub fn declare_local(&mut self, name: &str) -> usize {
        let function = self.current();
        let slot = function.next_slot;
        function.next_slot += 1;
        function.max_slots = function.max_slots.max(function.next_slot);
        function.active.push(LocalVar {
            name: name.to_string(),
            slot,
        });
        slot
    }

    /// Resolve a name, creating upvalue entries along the way
    pub fn resolve(&mut self, name: &str) -> Resolved {
        if self.functions.is_empty() {
            return Resolved::Global;
        }
        let level = self.functions.len() - 1;
        self.resolve_at(level, name)
    }

    fn resolve_at(&mut self, level: usize, name: &str) -> Resolved {
        let function = &self.functions[level];
        if let Some(slot) = function.find_local(name) {
            return Resolved::Local(slot);
        }
        if let Some(index) = function.find_upvalue(name) {
            return Resolved::Upvalue(index);
        }
        if level == 0 {
            return Resolved::Global;
        }

        let desc = match self.resolve_at(level - 1, name) {
            Resolved::Local(slot) => UpvalueDesc::ParentLocal(slot),
            Resolved::Upvalue(index) => UpvalueDesc::ParentUpvalue(index),
            Resolved::Global => return Resolved::Global,
        };
        Resolved::Upvalue(self.functions[level].add_upvalue(name, desc))
    }

    /// Whether `break` has a loop to leave in the current function
    pub fn in_loop(&self) -> bool {
        self.functions
            .last()
            .map_or(false, |f| f.blocks.iter().any(|b| b.is_loop))
    }

    /// Whether `...` is allowed in the current function
    pub fn is_vararg(&self) -> bool {
        self.functions.last().map_or(true, |f| f.is_vararg)
    }

    /// Declare a label at statement `index` of the innermost block and
    /// resolve pending gotos to it. A label that ends its block is treated
    /// as outside the scope of the block's locals.
    pub fn declare_label(&mut self, name: &str, index: usize, at_block_end: bool, span: &SourceSpan) -> LuaResult<()> {
        let function = self.current();
        if function.blocks.iter().any(|b| b.labels.iter().any(|l| l.name == name)) {
            return Err(SyntaxError::new(SyntaxErrorKind::DuplicateLabel(name.to_string()), span).into());
        }

        let id = self.fresh_label();
        let function = self.current();
        let last = function.blocks.len() - 1;
        let active = if at_block_end {
            function.blocks[last].active_on_entry
        } else {
            function.active.len()
        };

        let pending = std::mem::take(&mut function.blocks[last].gotos);
        let mut unresolved = Vec::new();
        for goto in pending {
            if goto.name != name {
                unresolved.push(goto);
                continue;
            }
            if goto.active < active {
                let local = function.active[goto.active].name.clone();
                return Err(SyntaxError::new(
                    SyntaxErrorKind::JumpIntoLocalScope {
                        label: name.to_string(),
                        local,
                    },
                    &goto.span,
                )
                .into());
            }
            function.blocks[last].targets.push((goto.id, index));
        }

        let block = &mut function.blocks[last];
        block.gotos = unresolved;
        block.targets.push((id, index));
        block.labels.push(LabelInfo {
            name: name.to_string(),
            id,
        });
        Ok(())
    }

    /// Compile a goto: a visible label resolves immediately (backward
    /// jump), otherwise the goto waits for a later label.
    pub fn goto(&mut self, name: &str, span: &SourceSpan) -> LabelId {
        let function = self.current();
        let visible = function
            .blocks
            .iter()
            .rev()
            .flat_map(|b| b.labels.iter())
            .find(|l| l.name == name)
            .map(|l| l.id);
        if let Some(id) = visible {
            return id;
        }

        let id = self.fresh_label();
        let function = self.current();
        let active = function.active.len();
        let pending = PendingGoto {
            name: name.to_string(),
            id,
            active,
            span: span.clone(),
        };
        self.block().gotos.push(pending);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::error::LuaError;
    use std::sync::Arc;

    fn span() -> SourceSpan {
        SourceSpan::new(Arc::from("test"), 1, 1)
    }

    fn syntax_kind(err: LuaError) -> SyntaxErrorKind {
        match err {
            LuaError::Syntax(e) => e.kind,
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_declare_before_open_function() {
        let mut scopes = ScopeStack::new();
        let x = scopes.declare_local("x");
        assert_eq!(scopes.resolve("x"), Resolved::Local(x));
        assert_eq!(scopes.resolve("y"), Resolved::Global);
    }

    #[test]
    fn test_shadowing_and_block_exit() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        let a = scopes.declare_local("x");
        scopes.open_block(false);
        let b = scopes.declare_local("x");
        assert_ne!(a, b);
        assert_eq!(scopes.resolve("x"), Resolved::Local(b));
        scopes.close_block().unwrap();
        assert_eq!(scopes.resolve("x"), Resolved::Local(a));
        assert_eq!(scopes.resolve("y"), Resolved::Global);
    }

    #[test]
    fn test_slots_reused_after_block() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(false);
        scopes.open_block(false);
        let inner = scopes.declare_local("a");
        scopes.close_block().unwrap();
        let next = scopes.declare_local("b");
        assert_eq!(inner, next);
        let layout = scopes.close_function().unwrap();
        assert_eq!(layout.frame_size, 1);
    }

    #[test]
    fn test_upvalue_chaining() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        let slot = scopes.declare_local("counter");

        scopes.open_function(false);
        scopes.open_function(false);
        assert_eq!(scopes.resolve("counter"), Resolved::Upvalue(0));
        // Resolving again reuses the entry
        assert_eq!(scopes.resolve("counter"), Resolved::Upvalue(0));
        let innermost = scopes.close_function().unwrap();
        assert_eq!(innermost.upvalues, vec![UpvalueDesc::ParentUpvalue(0)]);

        let middle = scopes.close_function().unwrap();
        assert_eq!(middle.upvalues, vec![UpvalueDesc::ParentLocal(slot)]);
    }

    #[test]
    fn test_break_needs_loop() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        assert!(!scopes.in_loop());
        scopes.open_block(true);
        scopes.open_block(false);
        assert!(scopes.in_loop());

        // A nested function does not see the enclosing loop
        scopes.open_function(false);
        assert!(!scopes.in_loop());
    }

    #[test]
    fn test_forward_goto_resolves() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        scopes.open_block(false);
        let id = scopes.goto("done", &span());
        scopes.close_block().unwrap();
        scopes.declare_label("done", 3, false, &span()).unwrap();
        let layout = scopes.close_function().unwrap();
        assert!(layout.targets.contains(&(id, 3)));
    }

    #[test]
    fn test_backward_goto_uses_label_id() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        scopes.declare_label("top", 0, false, &span()).unwrap();
        let id = scopes.goto("top", &span());
        let layout = scopes.close_function().unwrap();
        assert_eq!(layout.targets, vec![(id, 0)]);
    }

    #[test]
    fn test_undefined_label() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        scopes.goto("nowhere", &span());
        let err = scopes.close_function().unwrap_err();
        assert_eq!(syntax_kind(err), SyntaxErrorKind::UndefinedLabel("nowhere".to_string()));
    }

    #[test]
    fn test_duplicate_label() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        scopes.declare_label("l", 0, false, &span()).unwrap();
        scopes.open_block(false);
        let err = scopes.declare_label("l", 0, false, &span()).unwrap_err();
        assert_eq!(syntax_kind(err), SyntaxErrorKind::DuplicateLabel("l".to_string()));
    }

    #[test]
    fn test_jump_into_local_scope() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        scopes.goto("skip", &span());
        scopes.declare_local("x");
        let err = scopes.declare_label("skip", 2, false, &span()).unwrap_err();
        assert!(matches!(syntax_kind(err), SyntaxErrorKind::JumpIntoLocalScope { ref local, .. } if local == "x"));
    }

    #[test]
    fn test_label_at_block_end_is_outside_locals() {
        let mut scopes = ScopeStack::new();
        scopes.open_function(true);
        scopes.open_block(true);
        scopes.goto("continue", &span());
        scopes.declare_local("x");
        assert!(scopes.declare_label("continue", 2, true, &span()).is_ok());
    }
}
