//! Splitting scenarios over two or three scopes.

use pretty_assertions::assert_eq;
use tessel_ir::{Address, BinaryOp, Function, GlobalId, Index, InstKind, Terminator, TypeId, Value};
use tessel_split::{
    FanOut, Partition, ScopeSet, ScopeTable, SlotKind, SlotType, SplitOutput, UsageFlags,
};

use crate::common::{float, ops, s, Program, ProgramBuilder, USED};

/// `A` feeds the early scope, `B` the late one; `result` is late.
fn table() -> ScopeTable {
    ScopeTable::new(&["early", "late"])
        .root("A", s(0), UsageFlags::empty())
        .root("B", s(1), UsageFlags::empty())
        .sink("result", s(1), USED)
        .transfer(s(0), s(1), "e2l")
}

fn global(part: &Partition, program: &Program, name: &str) -> Option<GlobalId> {
    part.module.global_named(program.interner.intern(name))
}

/// Loads of the binding called `name`, over all partitions.
fn loads_of(parts: &[Partition], program: &Program, name: &str) -> usize {
    parts
        .iter()
        .map(|part| {
            let Some(global) = global(part, program, name) else {
                return 0;
            };
            let func = part.function().unwrap();
            func.inst_ids()
                .filter(|&id| {
                    matches!(
                        &func.inst(id).kind,
                        InstKind::Load { addr } if addr.global() == Some(global)
                    )
                })
                .count()
        })
        .sum()
}

/// `x=load A; y=x+1; z=load B; w=z+y; store w→result`
fn straight_line() -> Program {
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let result = p.global("result", TypeId::FLOAT);
    let x = p.load(a, TypeId::FLOAT);
    let y = p.add(x, float(1.0));
    let z = p.load(b, TypeId::FLOAT);
    let w = p.add(z, y);
    p.store(w, result);
    p.finish()
}

/// `x=load A; if (x>0) { z=load B; w=z } else { w=0 }; store w→result`
fn branch_for_late_scope() -> Program {
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let result = p.global("result", TypeId::FLOAT);
    let then_block = p.block();
    let else_block = p.block();
    let join = p.block();

    let x = p.load(a, TypeId::FLOAT);
    let cond = p.gt(x, float(0.0));
    p.branch(cond, then_block, else_block);
    p.at(then_block);
    let z = p.load(b, TypeId::FLOAT);
    p.jump(join);
    p.at(else_block);
    p.jump(join);
    p.at(join);
    let w = p.phi(&[(then_block, z), (else_block, float(0.0))]);
    p.store(w, result);
    p.ret();
    p.finish()
}

struct DeadCode {
    program: Program,
    live: Vec<Value>,
    dead: Vec<Value>,
}

/// `x=load A; d=x*3; e=load B; f=e+d; w=e+1; store w→result`, where only
/// `e`, `w` and the store reach the sink.
fn dead_code() -> DeadCode {
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let result = p.global("result", TypeId::FLOAT);
    let x = p.load(a, TypeId::FLOAT);
    let d = p.binary(BinaryOp::Mul, x, float(3.0));
    let e = p.load(b, TypeId::FLOAT);
    let f = p.add(e, d);
    let w = p.add(e, float(1.0));
    let store = p.store(w, result);
    DeadCode {
        program: p.finish(),
        live: vec![e, w, Value::Inst(store)],
        dead: vec![x, d, f],
    }
}

/// Two outputs, one per scope, each possibly written under its own branch.
fn two_outputs() -> ScopeTable {
    ScopeTable::new(&["early", "late"])
        .root("A", s(0), UsageFlags::empty())
        .root("B", s(1), UsageFlags::empty())
        .sink("out0", s(0), USED)
        .sink("out1", s(1), USED)
        .transfer(s(0), s(1), "e2l")
}

/// `if (x>5) { y=load B; store y→out1 }` at the current block, then return.
fn late_guarded_write(p: &mut ProgramBuilder, x: Value, b: GlobalId, out1: GlobalId) {
    let late = p.block();
    let exit = p.block();
    let cond = p.gt(x, float(5.0));
    p.branch(cond, late, exit);
    p.at(late);
    let y = p.load(b, TypeId::FLOAT);
    p.store(y, out1);
    p.jump(exit);
    p.at(exit);
    p.ret();
}

fn branch_count(func: &Function) -> usize {
    func.layout()
        .iter()
        .filter(|&&block| matches!(func.terminator(block), Some(Terminator::Branch { .. })))
        .count()
}

fn branches_per_partition(out: &SplitOutput) -> Vec<usize> {
    out.partitions
        .iter()
        .map(|part| branch_count(part.function().unwrap()))
        .collect()
}

#[test]
fn straight_line_values_cross_through_one_field() {
    let program = straight_line();
    let out = program.split(&table());
    assert!(out.problems.is_empty(), "{:?}", out.problems);

    let f0 = out.partitions[0].function().unwrap();
    assert_eq!(ops(f0, f0.entry), ["load", "binary", "store"]);
    let f1 = out.partitions[1].function().unwrap();
    assert_eq!(ops(f1, f1.entry), ["load", "load", "binary", "store"]);

    assert_eq!(out.transfers.len(), 1);
    let record = &out.transfers[0];
    assert_eq!(record.name, "e2l");
    assert_eq!(record.fields, [TypeId::FLOAT]);
    assert_eq!(record.slots, [SlotType::new(SlotKind::Float, 1, 0)]);

    // The late scope reads field 0 of the record.
    let read = f1.block(f1.entry).insts[1];
    let Some(e2l) = global(&out.partitions[1], &program, "e2l") else {
        panic!("record not declared in the late partition");
    };
    assert!(matches!(
        &f1.inst(read).kind,
        InstKind::Load { addr: Address::Member { global, path } } if *global == e2l && path[..] == [0]
    ));
}

#[test]
fn branch_is_reproduced_only_where_its_phi_lives() {
    let program = branch_for_late_scope();
    let out = program.split(&table());
    assert!(out.problems.is_empty(), "{:?}", out.problems);
    assert_eq!(
        out.fanout,
        [FanOut {
            block: program.func().entry,
            scopes: ScopeSet::single(s(1)),
        }]
    );

    // The early scope computes and exports the condition.
    let f0 = out.partitions[0].function().unwrap();
    assert_eq!(f0.layout(), [f0.entry]);
    assert_eq!(ops(f0, f0.entry), ["load", "compare", "store"]);
    assert_eq!(out.transfers[0].fields, [TypeId::BOOL]);

    let f1 = out.partitions[1].function().unwrap();
    let layout = f1.layout().to_vec();
    assert_eq!(layout.len(), 4);
    let (entry, then_arm, else_arm, join) = (layout[0], layout[1], layout[2], layout[3]);
    assert_eq!(ops(f1, entry), ["load"]);
    let cond = Value::Inst(f1.block(entry).insts[0]);
    assert_eq!(
        f1.terminator(entry),
        Some(&Terminator::Branch {
            cond,
            then_block: then_arm,
            else_block: else_arm,
        })
    );
    assert_eq!(ops(f1, then_arm), ["load"]);
    assert!(ops(f1, else_arm).is_empty());
    assert_eq!(ops(f1, join), ["phi", "store"]);
}

#[test]
fn dead_values_are_dropped_everywhere() {
    let DeadCode { program, dead, .. } = dead_code();
    let out = program.split(&table());

    for value in dead {
        assert_eq!(out.classification.value_scope(value), None);
    }
    assert!(out.transfers.is_empty());
    let f0 = out.partitions[0].function().unwrap();
    assert!(ops(f0, f0.entry).is_empty());
    let f1 = out.partitions[1].function().unwrap();
    assert_eq!(ops(f1, f1.entry), ["load", "binary", "store"]);
    assert!(out
        .partitions
        .iter()
        .all(|part| global(part, &program, "e2l").is_none()));
}

#[test]
fn every_value_reaching_a_sink_gets_a_scope() {
    let DeadCode { program, live, dead } = dead_code();
    let out = program.split(&table());
    let scoped: Vec<_> = program
        .func()
        .inst_ids()
        .filter(|&id| out.classification.inst_scope(id).is_some())
        .map(Value::Inst)
        .collect();
    assert_eq!(scoped, live);
    assert_eq!(scoped.len() + dead.len(), program.func().num_insts());
}

#[test]
fn splitting_is_deterministic() {
    for program in [straight_line(), branch_for_late_scope(), dead_code().program] {
        let first = program.split(&table());
        let second = program.split(&table());
        assert_eq!(first, second);
    }
}

#[test]
fn branches_are_copied_once_per_scope_that_needs_them() {
    // x=load A; if (x>0) { y=load B; z=load C }; r1=phi(y, 0); r2=phi(z, 0)
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let c = p.global("C", TypeId::FLOAT);
    let r1 = p.global("r1", TypeId::FLOAT);
    let r2 = p.global("r2", TypeId::FLOAT);
    let then_block = p.block();
    let else_block = p.block();
    let join = p.block();

    let x = p.load(a, TypeId::FLOAT);
    let cond = p.gt(x, float(0.0));
    p.branch(cond, then_block, else_block);
    p.at(then_block);
    let y = p.load(b, TypeId::FLOAT);
    let z = p.load(c, TypeId::FLOAT);
    p.jump(join);
    p.at(else_block);
    p.jump(join);
    p.at(join);
    let first = p.phi(&[(then_block, y), (else_block, float(0.0))]);
    let second = p.phi(&[(then_block, z), (else_block, float(0.0))]);
    p.store(first, r1);
    p.store(second, r2);
    p.ret();
    let program = p.finish();

    let table = ScopeTable::new(&["s0", "s1", "s2"])
        .root("A", s(0), UsageFlags::empty())
        .root("B", s(1), UsageFlags::empty())
        .root("C", s(2), UsageFlags::empty())
        .sink("r1", s(1), USED)
        .sink("r2", s(2), USED)
        .transfer(s(0), s(1), "t01")
        .transfer(s(0), s(2), "t02");
    let out = program.split(&table);
    assert!(out.problems.is_empty(), "{:?}", out.problems);

    let scopes: ScopeSet = [s(1), s(2)].into_iter().collect();
    assert_eq!(
        out.fanout,
        [FanOut {
            block: program.func().entry,
            scopes,
        }]
    );
    let branches: usize = branches_per_partition(&out).iter().sum();
    assert_eq!(branches, scopes.len() as usize);

    // Everything else exists exactly once.
    for name in ["A", "B", "C"] {
        assert_eq!(loads_of(&out.partitions, &program, name), 1, "loads of {name}");
    }
    let names: Vec<_> = out.transfers.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["t01", "t02"]);
}

#[test]
fn values_used_in_their_own_scope_need_no_record() {
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let early_out = p.global("early_out", TypeId::FLOAT);
    let x = p.load(a, TypeId::FLOAT);
    let y = p.add(x, float(1.0));
    p.store(y, early_out);
    let program = p.finish();

    let table = ScopeTable::new(&["early", "late"])
        .root("A", s(0), UsageFlags::empty())
        .sink("early_out", s(0), USED)
        .transfer(s(0), s(1), "e2l");
    let out = program.split(&table);
    assert!(out.transfers.is_empty());
    assert!(out
        .partitions
        .iter()
        .all(|part| global(part, &program, "e2l").is_none()));
    let f1 = out.partitions[1].function().unwrap();
    assert!(ops(f1, f1.entry).is_empty());
}

#[test]
fn indexed_array_reads_transfer_only_the_observed_member() {
    // bones: [struct { vec3, float }; 8] early, read as bones[i].1 late
    let mut p = ProgramBuilder::new("main");
    let vec3 = p.types.vector(TypeId::FLOAT, 3);
    let bone_ty = p.types.structure(vec![vec3, TypeId::FLOAT]);
    let bones_ty = p.types.array(bone_ty, 8);
    let bones = p.global("bones", bones_ty);
    let index = p.global("index", TypeId::INT);
    let result = p.global("result", TypeId::FLOAT);
    let i = p.load(index, TypeId::INT);
    let weight = p.load_element(bones, &[Index::Dynamic(i), Index::Const(1)], TypeId::FLOAT);
    p.store(weight, result);
    let program = p.finish();

    let table = ScopeTable::new(&["early", "late"])
        .root("bones", s(0), UsageFlags::empty())
        .root("index", s(1), UsageFlags::empty())
        .sink("result", s(1), USED)
        .transfer(s(0), s(1), "e2l");
    let out = program.split(&table);
    assert!(out.problems.is_empty(), "{:?}", out.problems);

    let record = &out.transfers[0];
    assert_eq!(record.fields, [program.types.array(TypeId::FLOAT, 8)]);
    assert_eq!(record.slots, [SlotType::new(SlotKind::Float, 1, 8)]);

    let f0 = out.partitions[0].function().unwrap();
    assert_eq!(ops(f0, f0.entry).len(), 16);
    assert_eq!(loads_of(&out.partitions, &program, "bones"), 8);
}

#[test]
fn later_guarded_write_leaves_an_earlier_phi_in_its_scope() {
    // x=load A; if (x>0) {} else {}; w=phi(1, 2); store w→out0;
    // if (x>5) { store load B→out1 }
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let out0 = p.global("out0", TypeId::FLOAT);
    let out1 = p.global("out1", TypeId::FLOAT);
    let then_block = p.block();
    let else_block = p.block();
    let join = p.block();
    let x = p.load(a, TypeId::FLOAT);
    let cond = p.gt(x, float(0.0));
    p.branch(cond, then_block, else_block);
    p.at(then_block);
    p.jump(join);
    p.at(else_block);
    p.jump(join);
    p.at(join);
    let w = p.phi(&[(then_block, float(1.0)), (else_block, float(2.0))]);
    p.store(w, out0);
    late_guarded_write(&mut p, x, b, out1);
    let program = p.finish();

    let out = program.split(&two_outputs());
    assert!(out.problems.is_empty(), "{:?}", out.problems);
    assert_eq!(out.classification.value_scope(w), Some(s(0)));
    assert_eq!(
        out.fanout,
        [
            FanOut {
                block: program.func().entry,
                scopes: ScopeSet::single(s(0)),
            },
            FanOut {
                block: join,
                scopes: ScopeSet::single(s(1)),
            },
        ]
    );

    let f0 = out.partitions[0].function().unwrap();
    let layout = f0.layout().to_vec();
    assert_eq!(layout.len(), 4);
    assert_eq!(ops(f0, layout[3]), ["phi", "store", "compare", "store"]);
    assert_eq!(branches_per_partition(&out), [1, 1]);
}

#[test]
fn guarded_writes_of_each_scope_keep_their_branch() {
    // x=load A; if (x>0) { store x→out0 }; if (x>5) { store load B→out1 }
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let out0 = p.global("out0", TypeId::FLOAT);
    let out1 = p.global("out1", TypeId::FLOAT);
    let early = p.block();
    let join = p.block();
    let x = p.load(a, TypeId::FLOAT);
    let cond = p.gt(x, float(0.0));
    p.branch(cond, early, join);
    p.at(early);
    p.store(x, out0);
    p.jump(join);
    p.at(join);
    late_guarded_write(&mut p, x, b, out1);
    let program = p.finish();

    let out = program.split(&two_outputs());
    assert!(out.problems.is_empty(), "{:?}", out.problems);
    assert_eq!(
        out.fanout,
        [
            FanOut {
                block: program.func().entry,
                scopes: ScopeSet::single(s(0)),
            },
            FanOut {
                block: join,
                scopes: ScopeSet::single(s(1)),
            },
        ]
    );
    assert_eq!(branches_per_partition(&out), [1, 1]);

    // The early write stays behind its condition.
    let f0 = out.partitions[0].function().unwrap();
    let layout = f0.layout().to_vec();
    assert_eq!(layout.len(), 3);
    assert_eq!(ops(f0, layout[0]), ["load", "compare"]);
    assert_eq!(ops(f0, layout[1]), ["store"]);
    assert_eq!(ops(f0, layout[2]), ["compare", "store"]);

    let f1 = out.partitions[1].function().unwrap();
    let layout = f1.layout().to_vec();
    assert_eq!(layout.len(), 3);
    assert_eq!(ops(f1, layout[0]), ["load"]);
    assert_eq!(ops(f1, layout[1]), ["load", "store"]);
    assert!(ops(f1, layout[2]).is_empty());
}

#[test]
fn discard_copies_its_branch_into_the_late_scope() {
    // x=load A; if (x>0.5) { discard() }; y=load B; store y→result
    let mut p = ProgramBuilder::new("main");
    let a = p.global("A", TypeId::FLOAT);
    let b = p.global("B", TypeId::FLOAT);
    let result = p.global("result", TypeId::FLOAT);
    let discard = p.effect("discard");
    let kill = p.block();
    let join = p.block();
    let x = p.load(a, TypeId::FLOAT);
    let cond = p.gt(x, float(0.5));
    p.branch(cond, kill, join);
    p.at(kill);
    p.call(discard);
    p.jump(join);
    p.at(join);
    let y = p.load(b, TypeId::FLOAT);
    p.store(y, result);
    p.ret();
    let program = p.finish();

    let out = program.split(&table().sink("discard", s(1), USED));
    assert!(out.problems.is_empty(), "{:?}", out.problems);
    assert_eq!(
        out.fanout,
        [FanOut {
            block: program.func().entry,
            scopes: ScopeSet::single(s(1)),
        }]
    );
    assert_eq!(branches_per_partition(&out), [0, 1]);

    let f0 = out.partitions[0].function().unwrap();
    assert_eq!(ops(f0, f0.entry), ["load", "compare", "store"]);
    let f1 = out.partitions[1].function().unwrap();
    let layout = f1.layout().to_vec();
    assert_eq!(layout.len(), 3);
    assert_eq!(ops(f1, layout[0]), ["load"]);
    assert_eq!(ops(f1, layout[1]), ["call"]);
    assert_eq!(ops(f1, layout[2]), ["load", "store"]);
}
