//! CFG replay.
//!
//! [`Replay::walk`] visits the blocks of a function in program order,
//! starting at a block and stopping at a designated *stop* block. Jumps are
//! followed in a loop; at a two-way branch the driver locates the join (the
//! nearest common post-dominator of both successors) and hands the branch to
//! the visitor, which decides how often and under which context to replay
//! each arm by calling back into [`Replay::walk`]. The driver then continues
//! at the join with an unknown static predecessor.

use smallvec::SmallVec;
use tessel_ir::{BlockId, Function, InstId, PostDominatorTree, Terminator, Value};
use tracing::trace;

use crate::problem::SplitError;

/// A two-way branch reached during replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchSite {
    /// Block whose terminator is the branch.
    pub block: BlockId,
    pub cond: Value,
    pub then_block: BlockId,
    pub else_block: BlockId,
    /// Where both arms reunite; `None` when they only meet at function exit.
    pub join: Option<BlockId>,
    /// Where arm walks must stop: the join, or the enclosing stop block.
    pub stop: Option<BlockId>,
}

/// Callbacks driven by [`Replay`].
pub trait ReplayVisitor {
    /// An instruction, with the block control arrived from if it is
    /// statically known.
    fn on_instruction(&mut self, pred: Option<BlockId>, inst: InstId) -> Result<(), SplitError>;

    /// A conditional branch. The visitor replays the arms itself.
    fn on_branch(&mut self, replay: &mut Replay<'_>, site: &BranchSite) -> Result<(), SplitError>;

    /// A walk reached its stop block, arriving from `pred`.
    fn on_join(&mut self, pred: Option<BlockId>, join: BlockId) -> Result<(), SplitError>;

    /// A walk reached a return.
    fn on_return(&mut self, block: BlockId) -> Result<(), SplitError>;

    /// A walk jumped back into a block it is still inside of.
    fn on_loop(&mut self, block: BlockId) -> Result<(), SplitError>;
}

/// The replay driver for one function.
pub struct Replay<'a> {
    func: &'a Function,
    postdom: &'a PostDominatorTree,
    /// Blocks on the current walk path, for back-edge detection.
    active: Vec<bool>,
}

impl<'a> Replay<'a> {
    pub fn new(func: &'a Function, postdom: &'a PostDominatorTree) -> Self {
        Replay {
            func,
            postdom,
            active: vec![false; func.num_blocks()],
        }
    }

    #[inline]
    pub fn function(&self) -> &'a Function {
        self.func
    }

    /// Replay from `block` until `stop` (or the end of every path).
    pub fn walk<V: ReplayVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        pred: Option<BlockId>,
        block: BlockId,
        stop: Option<BlockId>,
    ) -> Result<(), SplitError> {
        let mut entered: SmallVec<[BlockId; 8]> = SmallVec::new();
        let result = self.walk_chain(visitor, pred, block, stop, &mut entered);
        for block in entered {
            self.active[block.index()] = false;
        }
        result
    }

    fn walk_chain<V: ReplayVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        mut pred: Option<BlockId>,
        mut block: BlockId,
        stop: Option<BlockId>,
        entered: &mut SmallVec<[BlockId; 8]>,
    ) -> Result<(), SplitError> {
        let func = self.func;
        loop {
            if Some(block) == stop {
                return visitor.on_join(pred, block);
            }
            if self.active[block.index()] {
                trace!(block = block.raw(), "back edge");
                return visitor.on_loop(block);
            }
            self.active[block.index()] = true;
            entered.push(block);

            for &inst in &func.block(block).insts {
                visitor.on_instruction(pred, inst)?;
            }

            match func.terminator(block) {
                Some(Terminator::Jump(target)) => {
                    pred = Some(block);
                    block = *target;
                }
                Some(&Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                }) => {
                    let join = self
                        .postdom
                        .nearest_common_post_dominator(then_block, else_block);
                    let site = BranchSite {
                        block,
                        cond,
                        then_block,
                        else_block,
                        join,
                        stop: join.or(stop),
                    };
                    trace!(block = block.raw(), join = ?join.map(BlockId::raw), "branch");
                    visitor.on_branch(self, &site)?;
                    match join {
                        // Arms already arrived at an enclosing stop block.
                        Some(join) if Some(join) == stop => return Ok(()),
                        Some(join) => {
                            pred = None;
                            block = join;
                        }
                        None => return Ok(()),
                    }
                }
                Some(Terminator::Return) | None => return visitor.on_return(block),
            }
        }
    }
}
