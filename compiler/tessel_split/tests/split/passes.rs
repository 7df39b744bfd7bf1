//! Program kinds and batch splitting.

use pretty_assertions::assert_eq;
use tessel_ir::{BinaryOp, TypeId};
use tessel_split::passes::{
    DeformerPass, ParticlePass, Pass, ShaderOptions, ShaderPass, ShapeParticlePass, SortMode,
};
use tessel_split::{split_batch, split_program, SplitOutput, SplitProblem};

use crate::common::{float, ops, s, Program, ProgramBuilder};

fn transfer_names(out: &SplitOutput) -> Vec<&str> {
    out.transfers.iter().map(|t| t.name.as_str()).collect()
}

/// `d=load deformer; k=d*scale; v=load vertex; store v*k→result`
fn deformer(scale: f64) -> Program {
    let mut p = ProgramBuilder::new("main");
    let deformer = p.global("deformer", TypeId::FLOAT);
    let vertex = p.global("vertex", TypeId::FLOAT);
    let result = p.global("result", TypeId::FLOAT);
    let d = p.load(deformer, TypeId::FLOAT);
    let k = p.binary(BinaryOp::Mul, d, float(scale));
    let v = p.load(vertex, TypeId::FLOAT);
    let moved = p.binary(BinaryOp::Mul, v, k);
    p.store(moved, result);
    p.finish()
}

#[test]
fn shader_work_lands_in_four_stages() {
    // tint (material), position (vertex) and colour (pixel)
    let mut p = ProgramBuilder::new("main");
    let material = p.global("material", TypeId::FLOAT);
    let vertex = p.global("vertex", TypeId::FLOAT);
    let frag = p.global("fragCoord", TypeId::FLOAT);
    let position = p.global("pPosition", TypeId::FLOAT);
    let output = p.global("output", TypeId::FLOAT);
    let m = p.load(material, TypeId::FLOAT);
    let tint = p.binary(BinaryOp::Mul, m, float(0.5));
    let v = p.load(vertex, TypeId::FLOAT);
    let pos = p.binary(BinaryOp::Mul, v, float(2.0));
    p.store(pos, position);
    let f = p.load(frag, TypeId::FLOAT);
    let colour = p.binary(BinaryOp::Mul, f, tint);
    p.store(colour, output);
    let program = p.finish();

    let pass = ShaderPass::new(ShaderOptions::default());
    let mut splits = split_program(&pass, program.input()).unwrap();
    assert_eq!(splits.len(), 1);
    let split = splits.remove(0);
    assert_eq!(split.sort, SortMode::Never);

    let out = &split.output;
    assert_eq!(out.partitions.len(), 4);
    assert_eq!(transfer_names(out), ["m2p"]);
    assert_eq!(
        out.sink("pPosition").and_then(|sink| sink.write).and_then(|write| write.scope),
        Some(s(2))
    );
    let stage_ops: Vec<_> = out
        .partitions
        .iter()
        .map(|part| {
            let func = part.function().unwrap();
            ops(func, func.entry)
        })
        .collect();
    assert_eq!(
        stage_ops,
        [
            vec!["load", "binary", "store"],
            vec![],
            vec!["load", "binary", "store"],
            vec!["load", "load", "binary", "store"],
        ]
    );
}

#[test]
fn branchy_vertex_output_survives_a_later_discard() {
    // v=load vertex; pos = v>0 ? 1 : 2; store pos→pPosition;
    // f=load fragCoord; if (f>0.5) { discard() }; store f→output
    let mut p = ProgramBuilder::new("main");
    let vertex = p.global("vertex", TypeId::FLOAT);
    let frag = p.global("fragCoord", TypeId::FLOAT);
    let position = p.global("pPosition", TypeId::FLOAT);
    let output = p.global("output", TypeId::FLOAT);
    let discard = p.effect("discard");
    let then_block = p.block();
    let else_block = p.block();
    let join = p.block();
    let kill = p.block();
    let exit = p.block();

    let v = p.load(vertex, TypeId::FLOAT);
    let facing = p.gt(v, float(0.0));
    p.branch(facing, then_block, else_block);
    p.at(then_block);
    p.jump(join);
    p.at(else_block);
    p.jump(join);
    p.at(join);
    let pos = p.phi(&[(then_block, float(1.0)), (else_block, float(2.0))]);
    p.store(pos, position);
    let f = p.load(frag, TypeId::FLOAT);
    let discarded = p.gt(f, float(0.5));
    p.branch(discarded, kill, exit);
    p.at(kill);
    p.call(discard);
    p.jump(exit);
    p.at(exit);
    p.store(f, output);
    p.ret();
    let program = p.finish();

    let mut splits = split_program(&ShaderPass::default(), program.input()).unwrap();
    let out = splits.remove(0).output;
    assert!(
        !out.problems.iter().any(|problem| matches!(
            problem,
            SplitProblem::BackwardTransfer { .. } | SplitProblem::UndefinedValue { .. }
        )),
        "{:?}",
        out.problems
    );
    assert_eq!(out.classification.value_scope(pos), Some(s(2)));
    assert_eq!(
        out.sink("pPosition").and_then(|sink| sink.write).and_then(|write| write.scope),
        Some(s(2))
    );

    let phis = |scope: usize| {
        let func = out.partitions[scope].function().unwrap();
        func.inst_ids()
            .filter(|&id| func.inst(id).kind.opcode() == "phi")
            .count()
    };
    assert_eq!((phis(2), phis(3)), (1, 0));
    let pixel = out.partitions[3].function().unwrap();
    assert!(pixel
        .inst_ids()
        .any(|id| pixel.inst(id).kind.opcode() == "call"));
}

#[test]
fn deformer_and_particle_tables_name_their_records() {
    let out = deformer(0.5).split(&DeformerPass::table());
    assert_eq!(transfer_names(&out), ["u2v"]);

    let mut p = ProgramBuilder::new("create");
    let emitter = p.global("emitter", TypeId::FLOAT);
    let seed = p.global("seed", TypeId::FLOAT);
    let particle = p.global("particle", TypeId::FLOAT);
    let rate = p.load(emitter, TypeId::FLOAT);
    let jitter = p.load(seed, TypeId::FLOAT);
    let start = p.binary(BinaryOp::Mul, rate, jitter);
    p.store(start, particle);
    p.store(jitter, seed);
    let program = p.finish();
    let outputs = split_program(&ParticlePass, program.input()).unwrap();
    assert_eq!(transfer_names(&outputs[0]), ["create_u2p"]);
    assert!(outputs[0].problems.is_empty(), "{:?}", outputs[0].problems);

    let mut p = ProgramBuilder::new("main");
    let parent = p.global("parentMatrix", TypeId::FLOAT);
    let matrix = p.global("particleMatrix", TypeId::FLOAT);
    let m = p.load(matrix, TypeId::FLOAT);
    let world = p.binary(BinaryOp::Mul, m, float(1.0));
    let parent = p.load(parent, TypeId::FLOAT);
    let placed = p.add(world, parent);
    p.store(placed, matrix);
    let program = p.finish();
    let outputs = split_program(&ShapeParticlePass, program.input()).unwrap();
    assert_eq!(transfer_names(&outputs[0]), ["u2p"]);
}

#[test]
fn unknown_functions_yield_nothing() {
    let mut p = ProgramBuilder::new("helper");
    let result = p.global("result", TypeId::FLOAT);
    p.store(float(1.0), result);
    let program = p.finish();

    assert_eq!(split_program(&DeformerPass, program.input()), Ok(vec![]));
    assert_eq!(ShaderPass::default().kind(), "shader");
    assert!(split_program(&ShaderPass::default(), program.input())
        .unwrap()
        .is_empty());
}

#[test]
fn batch_matches_sequential_splitting() {
    let programs: Vec<_> = (1..=6).map(|i| deformer(f64::from(i))).collect();
    let inputs: Vec<_> = programs.iter().map(Program::input).collect();

    let batch = split_batch(&DeformerPass, &inputs);
    let sequential: Vec<_> = inputs
        .iter()
        .map(|&input| split_program(&DeformerPass, input))
        .collect();
    assert_eq!(batch, sequential);
    assert!(batch
        .iter()
        .all(|split| split.as_ref().is_ok_and(|outputs| outputs.len() == 1)));
}
