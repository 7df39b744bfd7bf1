//! Functions, blocks and the positioned builder.
//!
//! A [`Function`] stores its instructions in one arena indexed by
//! [`InstId`]; each [`Block`] lists the ids it executes in order and ends in
//! an optional [`Terminator`] (optional only while the function is being
//! built). Blocks also carry a *layout* order, independent of their ids,
//! which printers follow.

use tracing::debug;

use crate::ir::{BlockId, InstData, InstId, InstKind, Terminator, Value};
use crate::name::Name;
use crate::types::TypeId;

/// A basic block: ordered instructions plus a terminator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
}

/// A function body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: Name,
    pub entry: BlockId,
    blocks: Vec<Block>,
    insts: Vec<InstData>,
    layout: Vec<BlockId>,
}

impl Function {
    /// Create a function with an empty entry block.
    pub fn new(name: Name) -> Self {
        let entry = BlockId::new(0);
        Function {
            name,
            entry,
            blocks: vec![Block::default()],
            insts: Vec::new(),
            layout: vec![entry],
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────

    /// Allocate a new empty block at the end of the layout.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::from_index(self.blocks.len());
        self.blocks.push(Block::default());
        self.layout.push(id);
        id
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Block ids in allocation order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId::from_index)
    }

    /// Block ids in layout order.
    #[inline]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Move a block to the end of the layout.
    pub fn move_to_end(&mut self, id: BlockId) {
        self.layout.retain(|&b| b != id);
        self.layout.push(id);
    }

    #[inline]
    pub fn terminator(&self, id: BlockId) -> Option<&Terminator> {
        self.blocks[id.index()].terminator.as_ref()
    }

    pub fn set_terminator(&mut self, id: BlockId, terminator: Terminator) {
        let block = &mut self.blocks[id.index()];
        debug_assert!(
            block.terminator.is_none(),
            "block {} already terminated",
            id.raw()
        );
        block.terminator = Some(terminator);
    }

    /// Successor blocks of `id` (empty while unterminated).
    pub fn successors(&self, id: BlockId) -> smallvec::SmallVec<[BlockId; 2]> {
        self.terminator(id)
            .map(Terminator::successors)
            .unwrap_or_default()
    }

    /// Leading phi instructions of a block.
    pub fn phis(&self, id: BlockId) -> impl Iterator<Item = InstId> + '_ {
        self.blocks[id.index()]
            .insts
            .iter()
            .copied()
            .take_while(|&inst| self.insts[inst.index()].kind.is_phi())
    }

    // ── Instructions ────────────────────────────────────────────────

    #[inline]
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    #[inline]
    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id.index()]
    }

    /// Instruction ids in allocation order.
    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> {
        (0..self.insts.len()).map(InstId::from_index)
    }

    fn alloc(&mut self, block: BlockId, ty: TypeId, kind: InstKind) -> InstId {
        let id = InstId::from_index(self.insts.len());
        self.insts.push(InstData { kind, ty, block });
        id
    }

    /// Append an instruction at the end of `block` (before its terminator).
    pub fn append(&mut self, block: BlockId, ty: TypeId, kind: InstKind) -> InstId {
        let id = self.alloc(block, ty, kind);
        self.blocks[block.index()].insts.push(id);
        id
    }

    /// Insert an instruction at position `pos` of `block`.
    pub fn insert(&mut self, block: BlockId, pos: usize, ty: TypeId, kind: InstKind) -> InstId {
        let id = self.alloc(block, ty, kind);
        let insts = &mut self.blocks[block.index()].insts;
        let pos = pos.min(insts.len());
        insts.insert(pos, id);
        id
    }

    /// Insert an instruction immediately before `anchor`, in its block.
    pub fn insert_before(&mut self, anchor: InstId, ty: TypeId, kind: InstKind) -> InstId {
        let block = self.insts[anchor.index()].block;
        let pos = self.blocks[block.index()]
            .insts
            .iter()
            .position(|&i| i == anchor)
            .unwrap_or(0);
        self.insert(block, pos, ty, kind)
    }

    /// Replace the payload of an existing instruction.
    pub fn set_kind(&mut self, id: InstId, kind: InstKind) {
        self.insts[id.index()].kind = kind;
    }
}

// ── FunctionBuilder ─────────────────────────────────────────────────

/// Builder for an in-progress function.
///
/// Follows the "position at a block, emit instructions, terminate" pattern
/// of LLVM's `IRBuilder`. Consumed by [`finish`](FunctionBuilder::finish).
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
}

impl FunctionBuilder {
    /// Create a builder positioned at a fresh entry block.
    pub fn new(name: Name) -> Self {
        let func = Function::new(name);
        let current = func.entry;
        FunctionBuilder { func, current }
    }

    // Block management

    pub fn new_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    pub fn position_at(&mut self, block: BlockId) {
        debug_assert!(
            block.index() < self.func.num_blocks(),
            "BlockId {} out of bounds (have {} blocks)",
            block.raw(),
            self.func.num_blocks(),
        );
        self.current = block;
    }

    #[inline]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    #[inline]
    pub fn entry_block(&self) -> BlockId {
        self.func.entry
    }

    /// Check whether `block` already has a terminator.
    #[inline]
    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.func.terminator(block).is_some()
    }

    #[inline]
    pub fn function(&self) -> &Function {
        &self.func
    }

    #[inline]
    pub fn function_mut(&mut self) -> &mut Function {
        &mut self.func
    }

    // Instruction emission

    /// Emit an instruction at the end of the current block.
    pub fn emit(&mut self, ty: TypeId, kind: InstKind) -> Value {
        Value::Inst(self.func.append(self.current, ty, kind))
    }

    /// Emit a store (or any other `void` instruction) and return its id.
    pub fn emit_void(&mut self, kind: InstKind) -> InstId {
        self.func.append(self.current, TypeId::VOID, kind)
    }

    // Terminators

    pub fn jump(&mut self, target: BlockId) {
        self.func.set_terminator(self.current, Terminator::Jump(target));
    }

    pub fn branch(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) {
        self.func.set_terminator(
            self.current,
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            },
        );
    }

    pub fn ret(&mut self) {
        self.func.set_terminator(self.current, Terminator::Return);
    }

    /// Finish building. Blocks left without a terminator receive an empty
    /// return.
    pub fn finish(mut self) -> Function {
        for id in 0..self.func.num_blocks() {
            let block = BlockId::from_index(id);
            if self.func.terminator(block).is_none() {
                debug!(block = block.raw(), "implicit return for unterminated block");
                self.func.set_terminator(block, Terminator::Return);
            }
        }
        self.func
    }
}
