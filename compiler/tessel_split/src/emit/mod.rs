//! Partition emission.
//!
//! The [`Emitter`] replays the source function once (see [`Replay`]) and
//! copies every live instruction into the partition of its scope. Each
//! partition owns a [`FunctionBuilder`] positioned at its own current block;
//! scopes advance independently, and only meet at conditional branches.
//!
//! # Fan-out
//!
//! At a branch the emitter computes the *wanted* scopes: the scopes of the
//! live phis at the join, plus every scope a forced write under the branch
//! needs it in. Every wanted scope that the current replay context covers
//! receives its own copy of the branch, and both arms are replayed once per
//! such scope with the context narrowed to that scope. Scopes of the context
//! that do not want the branch ride along with the first replay and receive
//! the arms' work unconditionally. A context only emits instructions whose
//! scope it covers, so each instruction is copied into exactly one
//! partition.
//!
//! # Cross-scope reads
//!
//! A value produced in an earlier scope is read through a placeholder load
//! in the consumer's entry block and registered with the transfer records;
//! [`Emitter::fix_and_get_transfer`](crate::transfer) later turns the
//! placeholders into reads of a packed transfer record.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tessel_ir::{
    Address, BlockId, Callee, Constant, FuncId, Function, FunctionBuilder, GlobalId, Index,
    InstId, InstKind, Module, Name, PostDominatorTree, StringInterner, TypeId, TypePool, Value,
};
use tracing::{debug, trace, warn};

use crate::classify::Classification;
use crate::problem::{SplitError, SplitProblem};
use crate::replay::{BranchSite, Replay, ReplayVisitor};
use crate::scope::{ScopeLabel, ScopeSet};
use crate::transfer::{ArrayRead, TransferRecords, ValueSlot};

/// One scope's output program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub scope: ScopeLabel,
    /// Holds exactly one function: the source function restricted to this
    /// scope.
    pub module: Module,
}

impl Partition {
    pub fn function(&self) -> Option<&Function> {
        self.module.functions.first()
    }
}

/// A source branch and the scopes it was duplicated into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanOut {
    pub block: BlockId,
    pub scopes: ScopeSet,
}

/// In-progress partition.
pub(crate) struct PartitionBuilder {
    pub(crate) scope: ScopeLabel,
    pub(crate) module: Module,
    pub(crate) fb: FunctionBuilder,
    /// Source instruction to its value in this partition.
    pub(crate) copies: FxHashMap<InstId, Value>,
    /// Source global to its redeclaration.
    globals: FxHashMap<GlobalId, GlobalId>,
    /// Source block to the copied block control left it from.
    exits: FxHashMap<BlockId, BlockId>,
    /// Source block to its copy, for join blocks.
    joins: FxHashMap<BlockId, BlockId>,
    /// Values transferred in, by producing instruction.
    reads: FxHashMap<InstId, Value>,
}

impl PartitionBuilder {
    fn new(scope: ScopeLabel, module: Name, function: Name) -> Self {
        PartitionBuilder {
            scope,
            module: Module::new(module),
            fb: FunctionBuilder::new(function),
            copies: FxHashMap::default(),
            globals: FxHashMap::default(),
            exits: FxHashMap::default(),
            joins: FxHashMap::default(),
            reads: FxHashMap::default(),
        }
    }

    /// Redeclare a source global here, once.
    pub(crate) fn global(&mut self, source: &Module, global: GlobalId) -> GlobalId {
        if let Some(&copy) = self.globals.get(&global) {
            return copy;
        }
        let copy = self
            .module
            .get_or_insert_global(source.global(global).clone());
        self.globals.insert(global, copy);
        copy
    }

    fn join_block(&mut self, join: BlockId) -> BlockId {
        if let Some(&block) = self.joins.get(&join) {
            return block;
        }
        let block = self.fb.new_block();
        self.joins.insert(join, block);
        block
    }

    fn finish(mut self) -> Partition {
        self.module.functions.push(self.fb.finish());
        Partition {
            scope: self.scope,
            module: self.module,
        }
    }
}

/// Copies a classified function into per-scope partitions.
pub struct Emitter<'a> {
    pub(crate) source: &'a Module,
    pub(crate) func: &'a Function,
    pub(crate) types: &'a TypePool,
    pub(crate) interner: &'a StringInterner,
    table: &'a Classification,
    pub(crate) partitions: Vec<PartitionBuilder>,
    pub(crate) records: TransferRecords,
    pub(crate) problems: Vec<SplitProblem>,
    fanout: Vec<FanOut>,
    /// Scopes the current replay context emits into.
    filter: ScopeSet,
    /// Scopes whose partition mirrors the current source path exactly.
    exact: ScopeSet,
}

impl<'a> Emitter<'a> {
    /// Prepare one partition per entry of `scopes` (used in module names).
    pub fn new(
        source: &'a Module,
        func: &'a Function,
        types: &'a TypePool,
        interner: &'a StringInterner,
        table: &'a Classification,
        scopes: &[&str],
    ) -> Self {
        let module = interner.lookup(source.name);
        let partitions = scopes
            .iter()
            .zip(0u8..)
            .map(|(name, raw)| {
                let name = interner.intern(&format!("{module}.{name}"));
                PartitionBuilder::new(ScopeLabel::new(raw), name, func.name)
            })
            .collect::<Vec<_>>();
        let all = ScopeSet::first(partitions.len());
        Emitter {
            source,
            func,
            types,
            interner,
            table,
            partitions,
            records: TransferRecords::default(),
            problems: Vec::new(),
            fanout: Vec::new(),
            filter: all,
            exact: all,
        }
    }

    /// Replay the whole function.
    pub fn emit(&mut self, postdom: &PostDominatorTree) -> Result<(), SplitError> {
        let entry = self.func.entry;
        let mut replay = Replay::new(self.func, postdom);
        replay.walk(self, None, entry, None)?;
        debug!(
            function = self.interner.lookup(self.func.name),
            branches = self.fanout.len(),
            "partitions emitted"
        );
        Ok(())
    }

    /// Finish every partition, returning them with the problems seen and
    /// the fan-out of each duplicated branch (in source block order).
    pub fn finish(self) -> (Vec<Partition>, Vec<SplitProblem>, Vec<FanOut>) {
        let mut fanout = self.fanout;
        fanout.sort_by_key(|f| f.block);
        let partitions = self
            .partitions
            .into_iter()
            .map(PartitionBuilder::finish)
            .collect();
        (partitions, self.problems, fanout)
    }

    pub(crate) fn report(&mut self, problem: SplitProblem) {
        if !self.problems.contains(&problem) {
            warn!(?problem, "emission problem");
            self.problems.push(problem);
        }
    }

    pub(crate) fn partition(&mut self, scope: ScopeLabel) -> Result<&mut PartitionBuilder, SplitError> {
        let count = self.partitions.len();
        self.partitions
            .get_mut(scope.index())
            .ok_or(SplitError::ScopeOutOfRange { scope, count })
    }

    fn undef(&self, inst: InstId) -> Value {
        Value::Const(Constant::undef(self.func.inst(inst).ty))
    }

    // ── Values ──────────────────────────────────────────────────────

    /// Resolve a source operand for use in `scope`.
    pub fn get_value(&mut self, scope: ScopeLabel, value: Value) -> Result<Value, SplitError> {
        let inst = match value {
            Value::Const(_) => return Ok(value),
            Value::Global(global) => return Ok(Value::Global(self.get_global(scope, global)?)),
            Value::Inst(inst) => inst,
        };
        match self.table.inst_scope(inst) {
            None => {
                self.report(SplitProblem::UndefinedValue { inst });
                Ok(self.undef(inst))
            }
            Some(owner) if owner == scope => self
                .partition(scope)?
                .copies
                .get(&inst)
                .copied()
                .ok_or(SplitError::MissingCopy { inst, scope }),
            Some(owner) if owner < scope => self.transfer_value(owner, scope, inst),
            Some(owner) => {
                self.report(SplitProblem::BackwardTransfer {
                    inst,
                    from: owner,
                    to: scope,
                });
                Ok(self.undef(inst))
            }
        }
    }

    /// Redeclare a source global in `scope`'s module.
    pub fn get_global(&mut self, scope: ScopeLabel, global: GlobalId) -> Result<GlobalId, SplitError> {
        let source = self.source;
        Ok(self.partition(scope)?.global(source, global))
    }

    /// Read of `inst` (produced in `src`) from `dst`, through a transfer
    /// slot registered on first use.
    fn transfer_value(
        &mut self,
        src: ScopeLabel,
        dst: ScopeLabel,
        inst: InstId,
    ) -> Result<Value, SplitError> {
        if let Some(&read) = self.partition(dst)?.reads.get(&inst) {
            return Ok(read);
        }
        let ty = self.func.inst(inst).ty;
        let splat = self.is_splat(inst);
        let field_ty = if splat {
            self.types.element(ty).unwrap_or(ty)
        } else {
            ty
        };
        let lanes = self.types.len_of(ty).unwrap_or(1) as usize;

        let part = self.partition(dst)?;
        let entry = part.fb.entry_block();
        let func = part.fb.function_mut();
        let placeholder = func.append(
            entry,
            field_ty,
            InstKind::Load {
                addr: Address::Pending,
            },
        );
        let value = if splat {
            let undef = Value::Const(Constant::undef(ty));
            let lane = func.append(
                entry,
                ty,
                InstKind::InsertElement {
                    vector: undef,
                    scalar: Value::Inst(placeholder),
                    index: Value::Const(Constant::int(TypeId::INT, 0)),
                },
            );
            let broadcast = func.append(
                entry,
                ty,
                InstKind::Shuffle {
                    lhs: Value::Inst(lane),
                    rhs: undef,
                    mask: SmallVec::from_elem(0, lanes),
                },
            );
            Value::Inst(broadcast)
        } else {
            Value::Inst(placeholder)
        };
        part.reads.insert(inst, value);

        trace!(inst = inst.raw(), ?src, ?dst, splat, "transfer value");
        self.records.add_value(
            src,
            dst,
            ValueSlot {
                source: inst,
                ty: field_ty,
                scalarized: splat,
                read: placeholder,
            },
        );
        Ok(value)
    }

    /// Whether `inst` broadcasts lane 0 into every lane.
    fn is_splat(&self, inst: InstId) -> bool {
        let data = self.func.inst(inst);
        matches!(&data.kind, InstKind::Shuffle { mask, .. } if mask.iter().all(|&lane| lane == 0))
            && self.types.is_vector(data.ty)
    }

    // ── Instructions ────────────────────────────────────────────────

    fn copy_instruction(
        &mut self,
        scope: ScopeLabel,
        pred: Option<BlockId>,
        inst: InstId,
    ) -> Result<(), SplitError> {
        let func = self.func;
        let data = func.inst(inst);
        let ty = data.ty;
        let value = match &data.kind {
            InstKind::Phi { incoming } => self.copy_phi(scope, pred, inst, incoming)?,
            InstKind::Load { addr } => self.copy_load(scope, inst, addr)?,
            InstKind::Store { value, addr } => {
                let value = self.get_value(scope, *value)?;
                let Some(addr) = self.copy_address(scope, inst, addr)? else {
                    return Ok(());
                };
                Value::Inst(
                    self.partition(scope)?
                        .fb
                        .emit_void(InstKind::Store { value, addr }),
                )
            }
            InstKind::Call {
                callee: Callee::Direct(callee),
                args,
            } => {
                let callee = self.declare(scope, *callee)?;
                let args = args
                    .iter()
                    .map(|&arg| self.get_value(scope, arg))
                    .collect::<Result<SmallVec<[Value; 4]>, _>>()?;
                self.partition(scope)?.fb.emit(
                    ty,
                    InstKind::Call {
                        callee: Callee::Direct(callee),
                        args,
                    },
                )
            }
            InstKind::Call {
                callee: Callee::Indirect(_),
                ..
            } => {
                self.report(SplitProblem::IndirectCall { inst });
                return Ok(());
            }
            kind => {
                let operands = kind
                    .operands()
                    .into_iter()
                    .map(|operand| self.get_value(scope, operand))
                    .collect::<Result<SmallVec<[Value; 4]>, _>>()?;
                let mut kind = kind.clone();
                kind.set_operands(&operands);
                self.partition(scope)?.fb.emit(ty, kind)
            }
        };
        trace!(inst = inst.raw(), ?scope, "copied");
        self.partition(scope)?.copies.insert(inst, value);
        Ok(())
    }

    fn copy_phi(
        &mut self,
        scope: ScopeLabel,
        pred: Option<BlockId>,
        inst: InstId,
        incoming: &[(BlockId, Value)],
    ) -> Result<Value, SplitError> {
        if let Some(pred) = pred {
            // Static predecessor: the phi is just the matching incoming value.
            return match incoming.iter().find(|(block, _)| *block == pred) {
                Some(&(_, value)) => self.get_value(scope, value),
                None => {
                    self.report(SplitProblem::MissingIncoming { inst, block: pred });
                    Ok(self.undef(inst))
                }
            };
        }

        let mut resolved = SmallVec::new();
        for &(block, value) in incoming {
            let Some(&exit) = self.partition(scope)?.exits.get(&block) else {
                self.report(SplitProblem::MissingIncoming { inst, block });
                continue;
            };
            resolved.push((exit, self.get_value(scope, value)?));
        }
        let ty = self.func.inst(inst).ty;
        Ok(self
            .partition(scope)?
            .fb
            .emit(ty, InstKind::Phi { incoming: resolved }))
    }

    fn copy_load(
        &mut self,
        scope: ScopeLabel,
        inst: InstId,
        addr: &Address,
    ) -> Result<Value, SplitError> {
        let ty = self.func.inst(inst).ty;
        let owner = addr
            .global()
            .and_then(|global| self.table.global_scope(global))
            .filter(|&owner| owner < scope);

        match (addr, owner) {
            (Address::Member { global, path }, Some(owner)) => {
                // Load where the binding lives, then hand the value over.
                let global = self.get_global(owner, *global)?;
                let part = self.partition(owner)?;
                let entry = part.fb.entry_block();
                let copy = part.fb.function_mut().append(
                    entry,
                    ty,
                    InstKind::Load {
                        addr: Address::Member {
                            global,
                            path: path.clone(),
                        },
                    },
                );
                part.copies.insert(inst, Value::Inst(copy));
                self.transfer_value(owner, scope, inst)
            }
            (Address::Element { global, indices }, Some(owner)) => {
                self.copy_array_read(owner, scope, inst, *global, indices)
            }
            _ => match self.copy_address(scope, inst, addr)? {
                Some(addr) => Ok(self.partition(scope)?.fb.emit(ty, InstKind::Load { addr })),
                None => Ok(self.undef(inst)),
            },
        }
    }

    /// A runtime-indexed read of an array owned by an earlier scope.
    fn copy_array_read(
        &mut self,
        owner: ScopeLabel,
        scope: ScopeLabel,
        inst: InstId,
        global: GlobalId,
        indices: &[Index],
    ) -> Result<Value, SplitError> {
        let ty = self.func.inst(inst).ty;
        let mut dynamic = indices.iter().filter_map(|index| match index {
            Index::Dynamic(value) => Some(*value),
            Index::Const(_) => None,
        });
        let (Some(index), None) = (dynamic.next(), dynamic.next()) else {
            self.report(SplitProblem::UnsupportedAddress { inst });
            return Ok(self.undef(inst));
        };

        let path: SmallVec<[Option<u32>; 4]> = indices.iter().map(|index| index.as_const()).collect();
        let prefix: SmallVec<[u32; 4]> = path.iter().map_while(|step| *step).collect();
        let array = self
            .types
            .member_path(self.source.global(global).ty, &prefix);
        let Some(len) = array.and_then(|array| self.types.len_of(array)) else {
            self.report(SplitProblem::UnsupportedAddress { inst });
            return Ok(self.undef(inst));
        };

        let index = self.get_value(scope, index)?;
        let placeholder = self.partition(scope)?.fb.emit(
            ty,
            InstKind::Load {
                addr: Address::Pending,
            },
        );
        let Value::Inst(read) = placeholder else {
            return Ok(placeholder);
        };
        trace!(inst = inst.raw(), ?owner, ?scope, len, "transfer array read");
        self.records.add_array_read(
            owner,
            scope,
            ArrayRead {
                global,
                path,
                elem: ty,
                len,
                read,
                index,
            },
        );
        Ok(placeholder)
    }

    /// Copy a memory address into `scope`. `None` for placeholder
    /// addresses, which cannot be copied.
    fn copy_address(
        &mut self,
        scope: ScopeLabel,
        inst: InstId,
        addr: &Address,
    ) -> Result<Option<Address>, SplitError> {
        Ok(Some(match addr {
            Address::Member { global, path } => Address::Member {
                global: self.get_global(scope, *global)?,
                path: path.clone(),
            },
            Address::Element { global, indices } => {
                let global = self.get_global(scope, *global)?;
                let indices = indices
                    .iter()
                    .map(|index| match *index {
                        Index::Const(step) => Ok(Index::Const(step)),
                        Index::Dynamic(value) => self.get_value(scope, value).map(Index::Dynamic),
                    })
                    .collect::<Result<_, _>>()?;
                Address::Element { global, indices }
            }
            Address::Pending => {
                self.report(SplitProblem::UnsupportedAddress { inst });
                return Ok(None);
            }
        }))
    }

    /// Redeclare a callee in `scope`'s module.
    fn declare(&mut self, scope: ScopeLabel, callee: FuncId) -> Result<FuncId, SplitError> {
        let decl = self.source.decl(callee).clone();
        Ok(self.partition(scope)?.module.declare(decl))
    }

    // ── Branches ────────────────────────────────────────────────────

    fn wanted_scopes(&self, site: &BranchSite) -> ScopeSet {
        let mut wanted = ScopeSet::EMPTY;
        if let Some(join) = site.join {
            for phi in self.func.phis(join) {
                if let Some(scope) = self.table.inst_scope(phi) {
                    wanted.insert(scope);
                }
            }
        }
        wanted.union(self.table.guards(site.block))
    }

    fn record_fanout(&mut self, block: BlockId, scopes: ScopeSet) {
        match self.fanout.iter_mut().find(|f| f.block == block) {
            Some(existing) => existing.scopes = existing.scopes.union(scopes),
            None => self.fanout.push(FanOut { block, scopes }),
        }
    }

    /// Replay both arms of `site` in the current context.
    fn walk_arms(&mut self, replay: &mut Replay<'_>, site: &BranchSite) -> Result<(), SplitError> {
        replay.walk(self, Some(site.block), site.then_block, site.stop)?;
        replay.walk(self, Some(site.block), site.else_block, site.stop)
    }

    /// Duplicate `site` into `scope` and replay its arms there.
    fn fan_out(
        &mut self,
        replay: &mut Replay<'_>,
        site: &BranchSite,
        scope: ScopeLabel,
    ) -> Result<(), SplitError> {
        let cond = self.get_value(scope, site.cond)?;
        let part = self.partition(scope)?;
        let join = site.join.map(|join| part.join_block(join));
        let mut arm_block = |arm: BlockId| match join {
            Some(join) if Some(arm) == site.join => (join, false),
            _ => (part.fb.new_block(), true),
        };
        let then_arm = arm_block(site.then_block);
        let else_arm = arm_block(site.else_block);
        part.fb.branch(cond, then_arm.0, else_arm.0);
        let branch = part.fb.current_block();

        for (arm, (target, fresh)) in [(site.then_block, then_arm), (site.else_block, else_arm)] {
            self.partition(scope)?
                .fb
                .position_at(if fresh { target } else { branch });
            replay.walk(self, Some(site.block), arm, site.stop)?;
            if let Some(join) = join {
                let fb = &mut self.partition(scope)?.fb;
                let current = fb.current_block();
                if current != join && !fb.is_terminated(current) {
                    fb.jump(join);
                }
            }
        }

        if let Some(join) = join {
            let fb = &mut self.partition(scope)?.fb;
            fb.function_mut().move_to_end(join);
            fb.position_at(join);
        }
        Ok(())
    }
}

impl ReplayVisitor for Emitter<'_> {
    fn on_instruction(&mut self, pred: Option<BlockId>, inst: InstId) -> Result<(), SplitError> {
        match self.table.inst_scope(inst) {
            Some(scope) if self.filter.contains(scope) => self.copy_instruction(scope, pred, inst),
            _ => Ok(()),
        }
    }

    fn on_branch(&mut self, replay: &mut Replay<'_>, site: &BranchSite) -> Result<(), SplitError> {
        let wanted = self.wanted_scopes(site);
        let (filter, exact) = (self.filter, self.exact);
        let fanned = wanted.intersection(filter);
        if fanned.is_empty() {
            // No scope of this context needs the branch; its arms' live
            // work is emitted unconditionally.
            trace!(block = site.block.raw(), ?wanted, "branch not copied");
            self.exact = ScopeSet::EMPTY;
            let result = self.walk_arms(replay, site);
            self.exact = exact;
            return result;
        }

        debug!(block = site.block.raw(), ?fanned, "fan out branch");
        self.record_fanout(site.block, fanned);
        let mut riders = filter.difference(fanned);
        for scope in fanned.iter() {
            let narrowed = ScopeSet::single(scope);
            self.filter = narrowed.union(riders);
            self.exact = exact.intersection(narrowed);
            let result = self.fan_out(replay, site, scope);
            riders = ScopeSet::EMPTY;
            if result.is_err() {
                self.filter = filter;
                self.exact = exact;
                return result;
            }
        }
        self.filter = filter;
        self.exact = exact;
        Ok(())
    }

    fn on_join(&mut self, pred: Option<BlockId>, _join: BlockId) -> Result<(), SplitError> {
        let Some(pred) = pred else {
            return Ok(());
        };
        for scope in self.filter.iter() {
            let part = self.partition(scope)?;
            let current = part.fb.current_block();
            part.exits.insert(pred, current);
        }
        Ok(())
    }

    fn on_return(&mut self, _block: BlockId) -> Result<(), SplitError> {
        for scope in self.filter.intersection(self.exact).iter() {
            let fb = &mut self.partition(scope)?.fb;
            if !fb.is_terminated(fb.current_block()) {
                fb.ret();
            }
        }
        Ok(())
    }

    fn on_loop(&mut self, block: BlockId) -> Result<(), SplitError> {
        self.report(SplitProblem::UnsupportedLoop { block });
        Ok(())
    }
}
