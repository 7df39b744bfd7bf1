//! Scope classification.
//!
//! Assigns every instruction, global binding and basic block of a function
//! a [`ScopeLabel`], seeded from root bindings (fixed scopes) and sinks
//! (writes that must happen in a given scope).
//!
//! # Algorithm
//!
//! Classification runs two work-list fixed points after every seeding
//! operation:
//!
//! 1. **Propagation** (backward). Usage flags flow from a node to everything
//!    it depends on: operands, the binding and indices of a load, the
//!    incoming values *and blocks* of a phi, the condition of a block's
//!    branch, and the branches a block or instruction is control dependent
//!    on. Forced scopes travel along the same control-dependence edges and
//!    mark each branch they cross as guarding a write in that scope. A node
//!    is only revisited when it gains a flag bit or a forced scope.
//! 2. **Resolution** (forward). Each reached node's scope becomes the
//!    maximum over the scopes it depends on, filtered through
//!    [`ScopeStrategy::set_value_scope`] for instructions, until no scope
//!    changes. A block's scope is the scope in which its path condition is
//!    known; forced scopes never enter it, so a later forced write cannot
//!    raise a phi resolved for an earlier sink.
//!
//! Flags, forced sets and scopes only grow over finite lattices, so both
//! loops terminate, cycles through phis included.

use smallvec::SmallVec;
use tessel_ir::{
    compute_control_dependence, Address, BlockId, Callee, Function, GlobalId, InstId, InstKind,
    Module, PostDominatorTree, StringInterner, Terminator, Value,
};
use tracing::{debug, trace};

use crate::problem::{SplitError, SplitProblem};
use crate::scope::{ScopeLabel, ScopeSet, UsageFlags, ValueInfo};
use crate::strategy::{CallSite, ScopeStrategy};

/// A node of the dependency graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    Inst(InstId),
    Global(GlobalId),
    Block(BlockId),
    /// The terminator of a block, classified for control dependence.
    Terminator(BlockId),
}

#[derive(Clone, Copy, Debug)]
struct Work {
    node: Node,
    flags: UsageFlags,
    force: ScopeSet,
}

/// The classification tables of one function.
///
/// Read by the partition emitter once classification is complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    insts: Vec<ValueInfo>,
    globals: Vec<ValueInfo>,
    blocks: Vec<ValueInfo>,
    terminators: Vec<ValueInfo>,
    /// Scopes a block must exist in because of effect or conditional sinks
    /// inside it or under it.
    forced: Vec<ScopeSet>,
    /// Scopes a branch block must be reproduced in.
    guards: Vec<ScopeSet>,
    /// Sink writes whose info was set directly and is never recomputed.
    pinned: Vec<bool>,
}

impl Classification {
    fn new(func: &Function, module: &Module) -> Self {
        Classification {
            insts: vec![ValueInfo::default(); func.num_insts()],
            globals: vec![ValueInfo::default(); module.num_globals()],
            blocks: vec![ValueInfo::default(); func.num_blocks()],
            terminators: vec![ValueInfo::default(); func.num_blocks()],
            forced: vec![ScopeSet::EMPTY; func.num_blocks()],
            guards: vec![ScopeSet::EMPTY; func.num_blocks()],
            pinned: vec![false; func.num_insts()],
        }
    }

    #[inline]
    pub fn inst(&self, id: InstId) -> ValueInfo {
        self.insts[id.index()]
    }

    #[inline]
    pub fn global(&self, id: GlobalId) -> ValueInfo {
        self.globals[id.index()]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> ValueInfo {
        self.blocks[id.index()]
    }

    #[inline]
    pub fn terminator(&self, id: BlockId) -> ValueInfo {
        self.terminators[id.index()]
    }

    /// Scopes a block must exist in, because an effect or conditional sink
    /// writes in it or in a block control dependent on it.
    #[inline]
    pub fn forced(&self, id: BlockId) -> ScopeSet {
        self.forced[id.index()]
    }

    /// Scopes whose partitions must reproduce the branch ending `id`.
    #[inline]
    pub fn guards(&self, id: BlockId) -> ScopeSet {
        self.guards[id.index()]
    }

    /// Scope an instruction is emitted into; `None` when it is dead.
    pub fn inst_scope(&self, id: InstId) -> Option<ScopeLabel> {
        let info = self.insts[id.index()];
        if info.flags.is_empty() {
            None
        } else {
            info.scope
        }
    }

    /// Scope of a binding; `None` for bindings no live value reads.
    pub fn global_scope(&self, id: GlobalId) -> Option<ScopeLabel> {
        let info = self.globals[id.index()];
        if info.flags.is_empty() {
            None
        } else {
            info.scope
        }
    }

    /// Scope of an operand. Constants have none.
    pub fn value_scope(&self, value: Value) -> Option<ScopeLabel> {
        match value {
            Value::Inst(id) => self.inst_scope(id),
            Value::Global(id) => self.global_scope(id),
            Value::Const(_) => None,
        }
    }
}

/// A tentative classification state, see [`Classifier::snapshot`].
#[derive(Clone, Debug)]
pub struct Snapshot {
    table: Classification,
    problems: usize,
}

/// The value written by a sink and where it ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkWrite {
    /// The last value stored to the sink, or the effect call itself.
    pub value: Value,
    pub scope: Option<ScopeLabel>,
}

/// Work-list classifier for one function.
pub struct Classifier<'a> {
    module: &'a Module,
    func: &'a Function,
    interner: &'a StringInterner,
    strategy: &'a dyn ScopeStrategy,
    postdom: &'a PostDominatorTree,
    /// Control-dependence parents of each block.
    control: Vec<SmallVec<[BlockId; 2]>>,
    table: Classification,
    problems: Vec<SplitProblem>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        module: &'a Module,
        func: &'a Function,
        interner: &'a StringInterner,
        strategy: &'a dyn ScopeStrategy,
        postdom: &'a PostDominatorTree,
    ) -> Self {
        Classifier {
            module,
            func,
            interner,
            strategy,
            postdom,
            control: compute_control_dependence(func, postdom),
            table: Classification::new(func, module),
            problems: Vec::new(),
        }
    }

    #[inline]
    pub fn table(&self) -> &Classification {
        &self.table
    }

    #[inline]
    pub fn problems(&self) -> &[SplitProblem] {
        &self.problems
    }

    /// Finish classification, returning the tables and the problems seen.
    pub fn finish(self) -> (Classification, Vec<SplitProblem>) {
        (self.table, self.problems)
    }

    /// Capture the current state so a tentative classification can be
    /// undone with [`restore`](Classifier::restore).
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            table: self.table.clone(),
            problems: self.problems.len(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.table = snapshot.table;
        self.problems.truncate(snapshot.problems);
    }

    // ── Seeding ─────────────────────────────────────────────────────

    /// Fix the scope of a root binding. Must precede sink classification.
    pub fn declare_root(&mut self, global: GlobalId, scope: ScopeLabel, flags: UsageFlags) {
        self.table.globals[global.index()] = ValueInfo::new(Some(scope), flags);
    }

    /// Fix the scope of the binding called `name`, if the module has one.
    pub fn declare_root_named(&mut self, name: &str, scope: ScopeLabel, flags: UsageFlags) {
        let global = self
            .interner
            .get(name)
            .and_then(|name| self.module.global_named(name));
        match global {
            Some(global) => self.declare_root(global, scope, flags),
            None => trace!(root = name, "root binding not present"),
        }
    }

    /// Classify every write to the sink called `name` into `required`.
    ///
    /// Writes are stores whose address names the sink binding (directly,
    /// through constant member selection or through runtime indices) and
    /// calls to a declared effect function of that name. Returns the last
    /// write found, or `None` (with a [`SplitProblem::SinkNotFound`]) when
    /// the function never writes the sink.
    pub fn classify_sink(
        &mut self,
        name: &str,
        required: ScopeLabel,
        flags: UsageFlags,
    ) -> Result<Option<SinkWrite>, SplitError> {
        let interned = self.interner.intern(name);
        let global = self.module.global_named(interned);
        let effect = self.module.decl_named(interned);

        let func = self.func;
        let mut work = Vec::new();
        let mut last = None;
        for inst in func.inst_ids() {
            let data = func.inst(inst);
            match &data.kind {
                InstKind::Store { value, addr } if global.is_some() && addr.global() == global => {
                    self.push_value(&mut work, *value, flags);
                    for index in addr.index_values() {
                        self.push_value(&mut work, index, flags);
                    }
                    if !self.postdom.post_dominates(data.block, func.entry) {
                        work.push(Work {
                            node: Node::Block(data.block),
                            flags,
                            force: ScopeSet::single(required),
                        });
                    }
                    self.pin(inst, required, flags);
                    last = Some(*value);
                }
                InstKind::Call {
                    callee: Callee::Direct(callee),
                    args,
                } if effect == Some(*callee) => {
                    for &arg in args {
                        self.push_value(&mut work, arg, flags);
                    }
                    work.push(Work {
                        node: Node::Block(data.block),
                        flags,
                        force: ScopeSet::single(required),
                    });
                    self.pin(inst, required, flags);
                    last = Some(Value::Inst(inst));
                }
                _ => {}
            }
        }

        let Some(value) = last else {
            debug!(sink = name, "sink not written");
            self.problems.push(SplitProblem::SinkNotFound { name: interned });
            return Ok(None);
        };

        self.propagate(work);
        self.resolve()?;
        let scope = match value {
            Value::Inst(id) if self.table.pinned[id.index()] => Some(required),
            other => self.table.value_scope(other),
        };
        debug!(sink = name, ?required, ?scope, "classified sink");
        Ok(Some(SinkWrite { value, scope }))
    }

    /// Classify an operand with `flags`, returning its scope.
    pub fn classify_value(
        &mut self,
        value: Value,
        flags: UsageFlags,
    ) -> Result<Option<ScopeLabel>, SplitError> {
        let mut work = Vec::new();
        self.push_value(&mut work, value, flags);
        self.propagate(work);
        self.resolve()?;
        Ok(self.table.value_scope(value))
    }

    /// Classify an instruction with `flags`, returning its scope.
    pub fn classify_instruction(
        &mut self,
        inst: InstId,
        flags: UsageFlags,
    ) -> Result<Option<ScopeLabel>, SplitError> {
        self.classify_value(Value::Inst(inst), flags)
    }

    /// Classify a block (and, transitively, the branches deciding whether
    /// it runs), optionally forcing it to exist in `force`.
    pub fn classify_block(
        &mut self,
        block: BlockId,
        flags: UsageFlags,
        force: Option<ScopeLabel>,
    ) -> Result<Option<ScopeLabel>, SplitError> {
        self.propagate(vec![Work {
            node: Node::Block(block),
            flags,
            force: force.map_or(ScopeSet::EMPTY, ScopeSet::single),
        }]);
        self.resolve()?;
        Ok(self.table.blocks[block.index()].scope)
    }

    fn pin(&mut self, inst: InstId, scope: ScopeLabel, flags: UsageFlags) {
        self.table.insts[inst.index()] = ValueInfo::new(Some(scope), flags);
        self.table.pinned[inst.index()] = true;
    }

    fn report(&mut self, problem: SplitProblem) {
        if !self.problems.contains(&problem) {
            tracing::warn!(?problem, "classification problem");
            self.problems.push(problem);
        }
    }

    // ── Propagation ─────────────────────────────────────────────────

    fn push_value(&self, work: &mut Vec<Work>, value: Value, flags: UsageFlags) {
        let node = match value {
            Value::Inst(id) => Node::Inst(id),
            Value::Global(id) => Node::Global(id),
            Value::Const(_) => return,
        };
        work.push(Work {
            node,
            flags,
            force: ScopeSet::EMPTY,
        });
    }

    /// Push the terminators of the branches `block` is control dependent on.
    fn push_control_dependence(&self, work: &mut Vec<Work>, block: BlockId, flags: UsageFlags) {
        for &parent in &self.control[block.index()] {
            work.push(Work {
                node: Node::Terminator(parent),
                flags,
                force: ScopeSet::EMPTY,
            });
        }
    }

    fn propagate(&mut self, mut work: Vec<Work>) {
        let mut steps = 0usize;
        while let Some(Work { node, flags, force }) = work.pop() {
            steps += 1;
            match node {
                Node::Global(id) => {
                    self.table.globals[id.index()].flags |= flags;
                }
                Node::Inst(id) => {
                    if self.table.pinned[id.index()] {
                        continue;
                    }
                    let info = &mut self.table.insts[id.index()];
                    if info.flags.contains(flags) {
                        continue;
                    }
                    info.flags |= flags;
                    let flags = info.flags;
                    trace!(inst = id.raw(), ?flags, "propagate");
                    self.push_inst_deps(&mut work, id, flags);
                    self.push_control_dependence(&mut work, self.func.inst(id).block, flags);
                }
                Node::Terminator(block) => {
                    let info = &mut self.table.terminators[block.index()];
                    if info.flags.contains(flags) {
                        continue;
                    }
                    info.flags |= flags;
                    let flags = info.flags;
                    if let Some(Terminator::Branch { cond, .. }) = self.func.terminator(block) {
                        self.push_value(&mut work, *cond, flags);
                    }
                    self.push_control_dependence(&mut work, block, flags);
                }
                Node::Block(block) => {
                    let index = block.index();
                    let raised = !force.difference(self.table.forced[index]).is_empty();
                    let info = &mut self.table.blocks[index];
                    if info.flags.contains(flags) && !raised {
                        continue;
                    }
                    info.flags |= flags;
                    let flags = info.flags;
                    let force = self.table.forced[index].union(force);
                    self.table.forced[index] = force;
                    if let Some(Terminator::Branch { cond, .. }) = self.func.terminator(block) {
                        self.push_value(&mut work, *cond, flags);
                    }
                    for &parent in &self.control[index] {
                        let guards = &mut self.table.guards[parent.index()];
                        *guards = guards.union(force);
                        work.push(Work {
                            node: Node::Block(parent),
                            flags,
                            force,
                        });
                    }
                }
            }
        }
        trace!(steps, "propagation settled");
    }

    fn push_inst_deps(&mut self, work: &mut Vec<Work>, id: InstId, flags: UsageFlags) {
        let func = self.func;
        match &func.inst(id).kind {
            InstKind::Load { addr } => match addr {
                Address::Member { global, .. } | Address::Element { global, .. } => {
                    work.push(Work {
                        node: Node::Global(*global),
                        flags,
                        force: ScopeSet::EMPTY,
                    });
                    for index in addr.index_values() {
                        self.push_value(work, index, flags);
                    }
                }
                Address::Pending => self.report(SplitProblem::UnsupportedAddress { inst: id }),
            },
            InstKind::Phi { incoming } => {
                for &(block, value) in incoming {
                    self.push_value(work, value, flags);
                    work.push(Work {
                        node: Node::Block(block),
                        flags,
                        force: ScopeSet::EMPTY,
                    });
                }
            }
            InstKind::Call {
                callee: Callee::Direct(callee),
                args,
            } => {
                let name = self.interner.lookup(self.module.decl(*callee).name);
                let site = CallSite {
                    inst: id,
                    name,
                    args,
                };
                let rule = self.strategy.classify_call(&site, flags);
                for &arg in args {
                    self.push_value(work, arg, rule.arg_flags);
                }
            }
            InstKind::Call {
                callee: Callee::Indirect(_),
                ..
            } => self.report(SplitProblem::IndirectCall { inst: id }),
            kind => {
                for value in kind.operands() {
                    self.push_value(work, value, flags);
                }
            }
        }
    }

    // ── Resolution ──────────────────────────────────────────────────

    fn resolve(&mut self) -> Result<(), SplitError> {
        // A load carries the usage of every other load of its binding, and
        // the binding's own input flags.
        let func = self.func;
        for id in func.inst_ids() {
            if self.table.insts[id.index()].flags.is_empty() {
                continue;
            }
            if let InstKind::Load { addr } = &func.inst(id).kind {
                if let Some(global) = addr.global() {
                    let global_flags = self.table.globals[global.index()].flags;
                    self.table.insts[id.index()].flags |= global_flags;
                }
            }
        }

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;

            for block in self.func.block_ids() {
                let info = self.table.blocks[block.index()];
                if info.flags.is_empty() {
                    continue;
                }
                let mut scope = info.scope;
                if let Some(Terminator::Branch { cond, .. }) = self.func.terminator(block) {
                    scope = scope.max(self.table.value_scope(*cond));
                }
                for parent in &self.control[block.index()] {
                    scope = scope.max(self.table.blocks[parent.index()].scope);
                }
                if scope != info.scope {
                    self.table.blocks[block.index()].scope = scope;
                    changed = true;
                }
            }

            for block in self.func.block_ids() {
                let info = self.table.terminators[block.index()];
                if info.flags.is_empty() {
                    continue;
                }
                if let Some(Terminator::Branch { cond, .. }) = self.func.terminator(block) {
                    let scope = info.scope.max(self.table.value_scope(*cond));
                    if scope != info.scope {
                        self.table.terminators[block.index()].scope = scope;
                        changed = true;
                    }
                }
            }

            for id in self.func.inst_ids() {
                let info = self.table.insts[id.index()];
                if info.flags.is_empty() || self.table.pinned[id.index()] {
                    continue;
                }
                let computed = self.operand_scope(id, info.flags);
                let scope = self.strategy.set_value_scope(&info, computed);
                if scope < info.scope || scope < computed {
                    return Err(SplitError::ScopeLowered {
                        inst: id,
                        from: info.scope.max(computed),
                        to: scope,
                    });
                }
                if scope != info.scope {
                    self.table.insts[id.index()].scope = scope;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        debug!(
            function = self.interner.lookup(self.func.name),
            rounds, "scopes converged"
        );
        Ok(())
    }

    /// Scope an instruction needs given the scopes of what it reads.
    fn operand_scope(&self, id: InstId, flags: UsageFlags) -> Option<ScopeLabel> {
        let table = &self.table;
        match &self.func.inst(id).kind {
            InstKind::Load { addr } => {
                let Some(global) = addr.global() else {
                    return None;
                };
                addr.index_values()
                    .map(|index| table.value_scope(index))
                    .fold(table.globals[global.index()].scope, Ord::max)
            }
            InstKind::Phi { incoming } => incoming
                .iter()
                .map(|&(block, value)| {
                    table
                        .value_scope(value)
                        .max(table.blocks[block.index()].scope)
                })
                .fold(None, Ord::max),
            InstKind::Call {
                callee: Callee::Direct(callee),
                args,
            } => {
                let name = self.interner.lookup(self.module.decl(*callee).name);
                let site = CallSite {
                    inst: id,
                    name,
                    args,
                };
                let rule = self.strategy.classify_call(&site, flags);
                args.iter()
                    .map(|&arg| table.value_scope(arg))
                    .fold(rule.floor, Ord::max)
            }
            InstKind::Call {
                callee: Callee::Indirect(_),
                ..
            } => None,
            kind => kind
                .operands()
                .into_iter()
                .map(|value| table.value_scope(value))
                .fold(None, Ord::max),
        }
    }
}
