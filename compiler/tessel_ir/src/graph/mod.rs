//! CFG utilities and the post-dominance oracle.
//!
//! The partitioner needs exactly two questions answered about a function's
//! control flow: "does A post-dominate B?" and "where do the two arms of a
//! conditional reunite?". Both are served by [`PostDominatorTree`], built
//! once per function before partitioning starts.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::function::Function;
use crate::ir::{BlockId, Terminator};

/// Compute the predecessor list for each block (deduplicated).
///
/// Returns a vector indexed by block index. Predecessors appear in block id
/// order.
pub fn compute_predecessors(func: &Function) -> Vec<SmallVec<[BlockId; 2]>> {
    let num_blocks = func.num_blocks();
    let mut predecessors: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); num_blocks];

    for block in func.block_ids() {
        let mut seen = FxHashSet::default();
        for succ in func.successors(block) {
            if succ.index() < num_blocks && seen.insert(succ) {
                predecessors[succ.index()].push(block);
            }
        }
    }

    predecessors
}

/// Compute the control-dependence parents of each block.
///
/// Block `b` is control dependent on branch block `p` when one arm of `p`
/// always leads to `b` but `p` itself can bypass it: `b` post-dominates a
/// successor of `p` and does not strictly post-dominate `p`. Walking up the
/// post-dominator tree from each successor until the branch's immediate
/// post-dominator visits exactly those blocks.
///
/// Reference: Ferrante, Ottenstein and Warren, "The Program Dependence
/// Graph and Its Use in Optimization" (1987)
pub fn compute_control_dependence(
    func: &Function,
    postdom: &PostDominatorTree,
) -> Vec<SmallVec<[BlockId; 2]>> {
    let mut parents: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); func.num_blocks()];

    for block in func.block_ids() {
        let Some(Terminator::Branch {
            then_block,
            else_block,
            ..
        }) = func.terminator(block)
        else {
            continue;
        };
        let stop = postdom.immediate_post_dominator(block);
        for succ in [*then_block, *else_block] {
            let mut runner = Some(succ);
            while let Some(current) = runner {
                if Some(current) == stop {
                    break;
                }
                let deps = &mut parents[current.index()];
                if !deps.contains(&block) {
                    deps.push(block);
                }
                runner = postdom.immediate_post_dominator(current);
            }
        }
    }

    parents
}

/// Post-dominator tree.
///
/// Cooper-Harvey-Kennedy on the reverse CFG. Every block ending in
/// [`Terminator::Return`] is joined to a virtual exit node, which is the
/// root of the tree; two blocks whose only common post-dominator is that
/// virtual exit have no join block.
///
/// Blocks that cannot reach a return (infinite loops) have no immediate
/// post-dominator and post-dominate nothing but themselves.
///
/// Reference: Cooper, Harvey and Kennedy, "A Simple, Fast Dominance Algorithm" (2001)
pub struct PostDominatorTree {
    /// Immediate post-dominator for each node, indexed by block index; the
    /// extra last slot is the virtual exit. `ipdom[exit] == Some(exit)`.
    ipdom: Vec<Option<usize>>,
    /// Reverse-CFG RPO position per node (`usize::MAX` when unreachable
    /// from the exit). A node's post-dominators precede it in this order.
    rpo_pos: Vec<usize>,
}

impl PostDominatorTree {
    /// Build the post-dominator tree for a function.
    pub fn build(func: &Function) -> Self {
        let n = func.num_blocks();
        let exit = n;

        // Reverse-graph predecessors are forward successors; returns feed
        // the virtual exit.
        let rev_preds: Vec<SmallVec<[usize; 2]>> = func
            .block_ids()
            .map(|block| match func.terminator(block) {
                Some(Terminator::Return) => smallvec::smallvec![exit],
                _ => func.successors(block).iter().map(|s| s.index()).collect(),
            })
            .collect();

        let rpo = Self::reverse_postorder(func, exit);
        let mut rpo_pos = vec![usize::MAX; n + 1];
        for (pos, &node) in rpo.iter().enumerate() {
            rpo_pos[node] = pos;
        }

        let mut ipdom: Vec<Option<usize>> = vec![None; n + 1];
        ipdom[exit] = Some(exit);

        let mut changed = true;
        while changed {
            changed = false;
            // Iterate in RPO (skip the exit at position 0)
            for &node in &rpo[1..] {
                let mut new_ipdom = None;
                for &pred in &rev_preds[node] {
                    if ipdom[pred].is_none() {
                        continue;
                    }
                    new_ipdom = Some(match new_ipdom {
                        None => pred,
                        Some(current) => Self::intersect(pred, current, &ipdom, &rpo_pos),
                    });
                }

                let Some(new_ipdom) = new_ipdom else {
                    continue;
                };
                if ipdom[node] != Some(new_ipdom) {
                    ipdom[node] = Some(new_ipdom);
                    changed = true;
                }
            }
        }

        PostDominatorTree { ipdom, rpo_pos }
    }

    fn exit(&self) -> usize {
        self.ipdom.len() - 1
    }

    /// Does block `a` post-dominate block `b`?
    ///
    /// A block post-dominates itself.
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let target = a.index();
        let mut current = b.index();
        loop {
            if current == target {
                return true;
            }
            match self.ipdom.get(current).copied().flatten() {
                Some(next) if next != current => current = next,
                _ => return false,
            }
        }
    }

    /// Immediate post-dominator of a block, `None` when it is the virtual
    /// exit or the block cannot reach a return.
    pub fn immediate_post_dominator(&self, block: BlockId) -> Option<BlockId> {
        let next = self.ipdom.get(block.index()).copied().flatten()?;
        (next != self.exit()).then(|| BlockId::from_index(next))
    }

    /// Nearest block post-dominating both `a` and `b`.
    ///
    /// `None` when the two only meet at function exit.
    pub fn nearest_common_post_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let (a, b) = (a.index(), b.index());
        if self.ipdom.get(a).copied().flatten().is_none()
            || self.ipdom.get(b).copied().flatten().is_none()
        {
            return None;
        }
        let common = Self::intersect(a, b, &self.ipdom, &self.rpo_pos);
        (common != self.exit()).then(|| BlockId::from_index(common))
    }

    /// Reverse postorder of the reverse CFG, starting at the virtual exit.
    ///
    /// Iterative DFS so deeply nested CFGs cannot overflow the stack.
    fn reverse_postorder(func: &Function, exit: usize) -> Vec<usize> {
        let n = func.num_blocks();
        let preds = compute_predecessors(func);
        let returns: Vec<usize> = func
            .block_ids()
            .filter(|&b| matches!(func.terminator(b), Some(Terminator::Return)))
            .map(BlockId::index)
            .collect();

        let mut visited = vec![false; n + 1];
        let mut postorder = Vec::with_capacity(n + 1);
        let mut stack: Vec<(usize, bool)> = vec![(exit, false)];

        while let Some(&mut (node, ref mut children_done)) = stack.last_mut() {
            if *children_done {
                postorder.push(node);
                stack.pop();
                continue;
            }
            *children_done = true;

            if visited[node] {
                stack.pop();
                continue;
            }
            visited[node] = true;

            let next: &[usize] = if node == exit {
                &returns
            } else {
                &[]
            };
            for &succ in next {
                if !visited[succ] {
                    stack.push((succ, false));
                }
            }
            if node != exit {
                for pred in &preds[node] {
                    if !visited[pred.index()] {
                        stack.push((pred.index(), false));
                    }
                }
            }
        }

        postorder.reverse();
        postorder
    }

    /// CHK intersect: walk two fingers upward until they meet.
    fn intersect(mut a: usize, mut b: usize, ipdom: &[Option<usize>], order: &[usize]) -> usize {
        while a != b {
            while order[a] > order[b] {
                let Some(next) = ipdom[a] else {
                    debug_assert!(false, "intersect: broken ipdom chain at {a}");
                    return a;
                };
                a = next;
            }
            while order[b] > order[a] {
                let Some(next) = ipdom[b] else {
                    debug_assert!(false, "intersect: broken ipdom chain at {b}");
                    return b;
                };
                b = next;
            }
        }
        a
    }
}
