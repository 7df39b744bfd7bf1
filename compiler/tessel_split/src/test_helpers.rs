//! Shared helpers for unit tests: a compact program builder.

use smallvec::SmallVec;
use tessel_ir::{
    Address, BinaryOp, BlockId, Callee, CmpPred, Constant, FuncId, Function, FunctionBuilder,
    FunctionDecl, GlobalDecl, GlobalId, Index, InstId, InstKind, Module, StringInterner, TypeId,
    TypePool, Value,
};

/// A finished single-function program with its shared pools.
pub(crate) struct Program {
    pub module: Module,
    pub types: TypePool,
    pub interner: StringInterner,
}

pub(crate) struct ProgramBuilder {
    pub types: TypePool,
    pub interner: StringInterner,
    module: Module,
    fb: FunctionBuilder,
}

pub(crate) fn float(value: f64) -> Value {
    Value::Const(Constant::float(TypeId::FLOAT, value))
}

pub(crate) fn int(value: i64) -> Value {
    Value::Const(Constant::int(TypeId::INT, value))
}

pub(crate) fn inst(value: Value) -> InstId {
    value.as_inst().unwrap_or(InstId::new(u32::MAX))
}

/// Opcodes of a block, with placeholder reads shown as `pending`.
pub(crate) fn ops(func: &Function, block: BlockId) -> Vec<&'static str> {
    func.block(block)
        .insts
        .iter()
        .map(|&id| match &func.inst(id).kind {
            InstKind::Load {
                addr: Address::Pending,
            } => "pending",
            kind => kind.opcode(),
        })
        .collect()
}

impl ProgramBuilder {
    pub fn new(function: &str) -> Self {
        let interner = StringInterner::new();
        let module = Module::new(interner.intern("program"));
        let fb = FunctionBuilder::new(interner.intern(function));
        ProgramBuilder {
            types: TypePool::new(),
            interner,
            module,
            fb,
        }
    }

    pub fn global(&mut self, name: &str, ty: TypeId) -> GlobalId {
        let name = self.interner.intern(name);
        self.module.add_global(GlobalDecl::new(name, ty))
    }

    pub fn decl(&mut self, name: &str, params: Vec<TypeId>, ret: TypeId) -> FuncId {
        let name = self.interner.intern(name);
        self.module.declare(FunctionDecl { name, params, ret })
    }

    // Blocks

    pub fn entry(&self) -> BlockId {
        self.fb.entry_block()
    }

    pub fn block(&mut self) -> BlockId {
        self.fb.new_block()
    }

    pub fn at(&mut self, block: BlockId) {
        self.fb.position_at(block);
    }

    pub fn jump(&mut self, target: BlockId) {
        self.fb.jump(target);
    }

    pub fn branch(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) {
        self.fb.branch(cond, then_block, else_block);
    }

    pub fn ret(&mut self) {
        self.fb.ret();
    }

    // Instructions

    pub fn load(&mut self, global: GlobalId, ty: TypeId) -> Value {
        self.load_member(global, &[], ty)
    }

    pub fn load_member(&mut self, global: GlobalId, path: &[u32], ty: TypeId) -> Value {
        self.fb.emit(
            ty,
            InstKind::Load {
                addr: Address::Member {
                    global,
                    path: SmallVec::from_slice(path),
                },
            },
        )
    }

    pub fn load_element(&mut self, global: GlobalId, indices: &[Index], ty: TypeId) -> Value {
        self.fb.emit(
            ty,
            InstKind::Load {
                addr: Address::Element {
                    global,
                    indices: SmallVec::from_slice(indices),
                },
            },
        )
    }

    pub fn store(&mut self, value: Value, global: GlobalId) -> InstId {
        self.store_member(value, global, &[])
    }

    pub fn store_member(&mut self, value: Value, global: GlobalId, path: &[u32]) -> InstId {
        self.fb.emit_void(InstKind::Store {
            value,
            addr: Address::Member {
                global,
                path: SmallVec::from_slice(path),
            },
        })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value, ty: TypeId) -> Value {
        self.fb.emit(ty, InstKind::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Add, lhs, rhs, TypeId::FLOAT)
    }

    pub fn gt(&mut self, lhs: Value, rhs: Value) -> Value {
        self.fb.emit(
            TypeId::BOOL,
            InstKind::Compare {
                pred: CmpPred::Gt,
                lhs,
                rhs,
            },
        )
    }

    pub fn call(&mut self, callee: FuncId, args: &[Value], ty: TypeId) -> Value {
        self.fb.emit(
            ty,
            InstKind::Call {
                callee: Callee::Direct(callee),
                args: SmallVec::from_slice(args),
            },
        )
    }

    pub fn phi(&mut self, ty: TypeId, incoming: &[(BlockId, Value)]) -> Value {
        self.fb.emit(
            ty,
            InstKind::Phi {
                incoming: SmallVec::from_slice(incoming),
            },
        )
    }

    pub fn emit(&mut self, ty: TypeId, kind: InstKind) -> Value {
        self.fb.emit(ty, kind)
    }

    pub fn finish(mut self) -> Program {
        self.module.functions.push(self.fb.finish());
        Program {
            module: self.module,
            types: self.types,
            interner: self.interner,
        }
    }
}
