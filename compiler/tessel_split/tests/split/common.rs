//! Program construction shared by the end-to-end tests.

use smallvec::SmallVec;
use tessel_ir::{
    Address, BinaryOp, BlockId, Callee, CmpPred, Constant, FuncId, Function, FunctionBuilder,
    FunctionDecl, GlobalDecl, GlobalId, Index, InstId, InstKind, Module, StringInterner, TypeId,
    TypePool, Value,
};
use tessel_split::{
    split_function, DefaultStrategy, ScopeLabel, ScopeTable, SplitInput, SplitOutput, UsageFlags,
};

pub const USED: UsageFlags = UsageFlags::from_bits_retain(1);

pub fn s(n: u8) -> ScopeLabel {
    ScopeLabel::new(n)
}

pub fn float(value: f64) -> Value {
    Value::Const(Constant::float(TypeId::FLOAT, value))
}

/// Opcodes of a block in order.
pub fn ops(func: &Function, block: BlockId) -> Vec<&'static str> {
    func.block(block)
        .insts
        .iter()
        .map(|&id| func.inst(id).kind.opcode())
        .collect()
}

/// A single-function program with its pools.
pub struct Program {
    pub module: Module,
    pub types: TypePool,
    pub interner: StringInterner,
}

impl Program {
    pub fn input(&self) -> SplitInput<'_> {
        SplitInput::new(&self.module, &self.types, &self.interner)
    }

    pub fn func(&self) -> &Function {
        &self.module.functions[0]
    }

    pub fn split(&self, table: &ScopeTable) -> SplitOutput {
        split_function(self.input(), self.func(), table, &DefaultStrategy).unwrap()
    }
}

pub struct ProgramBuilder {
    pub types: TypePool,
    interner: StringInterner,
    module: Module,
    fb: FunctionBuilder,
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

    /// Declare an effect function taking no arguments.
    pub fn effect(&mut self, name: &str) -> FuncId {
        let name = self.interner.intern(name);
        self.module.declare(FunctionDecl {
            name,
            params: vec![],
            ret: TypeId::VOID,
        })
    }

    pub fn call(&mut self, callee: FuncId) -> InstId {
        self.fb.emit_void(InstKind::Call {
            callee: Callee::Direct(callee),
            args: SmallVec::new(),
        })
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

    pub fn load(&mut self, global: GlobalId, ty: TypeId) -> Value {
        self.fb.emit(
            ty,
            InstKind::Load {
                addr: Address::Member {
                    global,
                    path: SmallVec::new(),
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
        self.fb.emit_void(InstKind::Store {
            value,
            addr: Address::Member {
                global,
                path: SmallVec::new(),
            },
        })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        self.fb.emit(TypeId::FLOAT, InstKind::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Add, lhs, rhs)
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

    pub fn phi(&mut self, incoming: &[(BlockId, Value)]) -> Value {
        self.fb.emit(
            TypeId::FLOAT,
            InstKind::Phi {
                incoming: SmallVec::from_slice(incoming),
            },
        )
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
