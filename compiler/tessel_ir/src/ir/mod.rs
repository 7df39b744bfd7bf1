//! Program IR: SSA basic blocks over named external bindings.
//!
//! The partitioner consumes one [`Function`](crate::Function) of this IR and
//! produces one per scope. The representation follows LLVM's shape closely
//! enough that a front-end can lower into it directly:
//!
//! - **[`Value`]**: an instruction result, a global binding, or a constant
//! - **[`InstKind`]**: a single instruction (arithmetic, memory, phi, call)
//! - **[`Address`]**: where a load reads or a store writes: a global
//!   binding reached through constant member selection or runtime indices
//! - **[`Terminator`]**: block exit (jump, two-way branch, return)
//!
//! Instructions and blocks are identified by dense ids allocated per
//! function, so every side table is a plain vector.

use smallvec::SmallVec;

use crate::types::TypeId;

// ── ID newtypes ─────────────────────────────────────────────────────

macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from a raw index.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw `u32` value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Get the index as `usize` (for indexing into `Vec`s).
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[expect(
                clippy::cast_possible_truncation,
                reason = "IR tables never exceed u32 entries"
            )]
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }
    };
}

dense_id! {
    /// Instruction id within a [`Function`](crate::Function).
    InstId
}

dense_id! {
    /// Basic block id within a [`Function`](crate::Function).
    BlockId
}

dense_id! {
    /// Global binding id within a [`Module`](crate::Module).
    GlobalId
}

dense_id! {
    /// Declared (external) function id within a [`Module`](crate::Module).
    FuncId
}

// ── Constants ───────────────────────────────────────────────────────

/// Payload of a [`Constant`].
///
/// For vector types the scalar payload is splat across every lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstKind {
    Int(i64),
    /// IEEE-754 bit pattern, so constants stay `Eq + Hash`.
    Float(u64),
    Bool(bool),
    Zero,
    Undef,
}

/// A typed literal. Compared by value, never scoped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: TypeId,
    pub kind: ConstKind,
}

impl Constant {
    pub const fn int(ty: TypeId, value: i64) -> Self {
        Constant {
            ty,
            kind: ConstKind::Int(value),
        }
    }

    pub fn float(ty: TypeId, value: f64) -> Self {
        Constant {
            ty,
            kind: ConstKind::Float(value.to_bits()),
        }
    }

    pub const fn bool(value: bool) -> Self {
        Constant {
            ty: TypeId::BOOL,
            kind: ConstKind::Bool(value),
        }
    }

    pub const fn zero(ty: TypeId) -> Self {
        Constant {
            ty,
            kind: ConstKind::Zero,
        }
    }

    pub const fn undef(ty: TypeId) -> Self {
        Constant {
            ty,
            kind: ConstKind::Undef,
        }
    }

    /// Numeric value of the (first lane of the) constant.
    ///
    /// `None` for undefined values.
    #[expect(
        clippy::cast_precision_loss,
        reason = "shader integers are 32-bit, exact in f64"
    )]
    pub fn as_f64(self) -> Option<f64> {
        match self.kind {
            ConstKind::Int(value) => Some(value as f64),
            ConstKind::Float(bits) => Some(f64::from_bits(bits)),
            ConstKind::Bool(value) => Some(if value { 1.0 } else { 0.0 }),
            ConstKind::Zero => Some(0.0),
            ConstKind::Undef => None,
        }
    }
}

// ── Values ──────────────────────────────────────────────────────────

/// An operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// Result of an instruction in the same function.
    Inst(InstId),
    /// A global binding used as a whole (e.g. a texture handle argument).
    Global(GlobalId),
    Const(Constant),
}

impl Value {
    #[inline]
    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_const(self) -> Option<Constant> {
        match self {
            Value::Const(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        Value::Const(c)
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

// ── Operators ───────────────────────────────────────────────────────

/// Binary arithmetic/bitwise operator. Integer or float semantics follow
/// the operand type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    ZeroExtend,
    SignExtend,
    Truncate,
    FloatExtend,
    FloatTruncate,
    SignedToFloat,
    UnsignedToFloat,
    FloatToSigned,
    FloatToUnsigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

// ── Addresses ───────────────────────────────────────────────────────

/// One step of a runtime-indexed access path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    Const(u32),
    Dynamic(Value),
}

impl Index {
    /// Constant index value, if this step is a constant.
    #[inline]
    pub fn as_const(self) -> Option<u32> {
        match self {
            Index::Const(i) => Some(i),
            Index::Dynamic(_) => None,
        }
    }
}

/// Memory operand of a load or store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// A global binding, optionally narrowed by constant member selection.
    /// An empty `path` addresses the whole binding.
    Member {
        global: GlobalId,
        path: SmallVec<[u32; 4]>,
    },
    /// An element of a global reached through at least one runtime index.
    Element {
        global: GlobalId,
        indices: SmallVec<[Index; 4]>,
    },
    /// Dummy target of a cross-scope read, patched once the transfer
    /// record for the scope pair is laid out.
    Pending,
}

impl Address {
    /// The addressed global binding, if any.
    pub fn global(&self) -> Option<GlobalId> {
        match self {
            Address::Member { global, .. } | Address::Element { global, .. } => Some(*global),
            Address::Pending => None,
        }
    }

    /// Runtime index operands, in path order.
    pub fn index_values(&self) -> impl Iterator<Item = Value> + '_ {
        let indices: &[Index] = match self {
            Address::Element { indices, .. } => indices,
            _ => &[],
        };
        indices.iter().filter_map(|index| match index {
            Index::Dynamic(value) => Some(*value),
            Index::Const(_) => None,
        })
    }
}

// ── Instructions ────────────────────────────────────────────────────

/// Target of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Callee {
    Direct(FuncId),
    /// Computed function pointer; the partitioner cannot resolve these.
    Indirect(Value),
}

/// Instruction payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Unary {
        op: UnaryOp,
        value: Value,
    },
    Cast {
        op: CastOp,
        value: Value,
    },
    Compare {
        pred: CmpPred,
        lhs: Value,
        rhs: Value,
    },
    Select {
        cond: Value,
        then_value: Value,
        else_value: Value,
    },
    InsertElement {
        vector: Value,
        scalar: Value,
        index: Value,
    },
    ExtractElement {
        vector: Value,
        index: Value,
    },
    /// Lane shuffle with a constant mask over the concatenation of both
    /// inputs.
    Shuffle {
        lhs: Value,
        rhs: Value,
        mask: SmallVec<[u32; 4]>,
    },
    Load {
        addr: Address,
    },
    Store {
        value: Value,
        addr: Address,
    },
    Phi {
        incoming: SmallVec<[(BlockId, Value); 2]>,
    },
    Call {
        callee: Callee,
        args: SmallVec<[Value; 4]>,
    },
}

impl InstKind {
    /// All value operands, including store values, runtime indices and
    /// phi incomings, in a stable order.
    pub fn operands(&self) -> SmallVec<[Value; 4]> {
        let mut out = SmallVec::new();
        self.for_each_operand(|v| out.push(*v));
        out
    }

    /// Replace value operands in the order yielded by [`operands`].
    ///
    /// [`operands`]: InstKind::operands
    pub fn set_operands(&mut self, values: &[Value]) {
        debug_assert_eq!(values.len(), self.operands().len());
        let mut next = values.iter();
        self.for_each_operand_mut(|slot| {
            if let Some(&value) = next.next() {
                *slot = value;
            }
        });
    }

    fn for_each_operand(&self, mut f: impl FnMut(&Value)) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Unary { value, .. } | InstKind::Cast { value, .. } => f(value),
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                f(cond);
                f(then_value);
                f(else_value);
            }
            InstKind::InsertElement {
                vector,
                scalar,
                index,
            } => {
                f(vector);
                f(scalar);
                f(index);
            }
            InstKind::ExtractElement { vector, index } => {
                f(vector);
                f(index);
            }
            InstKind::Shuffle { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Load { addr } => addr_operands(addr, &mut f),
            InstKind::Store { value, addr } => {
                f(value);
                addr_operands(addr, &mut f);
            }
            InstKind::Phi { incoming } => {
                for (_, value) in incoming {
                    f(value);
                }
            }
            InstKind::Call { callee, args } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
        }
    }

    fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Unary { value, .. } | InstKind::Cast { value, .. } => f(value),
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                f(cond);
                f(then_value);
                f(else_value);
            }
            InstKind::InsertElement {
                vector,
                scalar,
                index,
            } => {
                f(vector);
                f(scalar);
                f(index);
            }
            InstKind::ExtractElement { vector, index } => {
                f(vector);
                f(index);
            }
            InstKind::Shuffle { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Load { addr } => addr_operands_mut(addr, &mut f),
            InstKind::Store { value, addr } => {
                f(value);
                addr_operands_mut(addr, &mut f);
            }
            InstKind::Phi { incoming } => {
                for (_, value) in incoming {
                    f(value);
                }
            }
            InstKind::Call { callee, args } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
        }
    }

    /// Short opcode name for diagnostics.
    pub fn opcode(&self) -> &'static str {
        match self {
            InstKind::Binary { .. } => "binary",
            InstKind::Unary { .. } => "unary",
            InstKind::Cast { .. } => "cast",
            InstKind::Compare { .. } => "compare",
            InstKind::Select { .. } => "select",
            InstKind::InsertElement { .. } => "insertelement",
            InstKind::ExtractElement { .. } => "extractelement",
            InstKind::Shuffle { .. } => "shufflevector",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Phi { .. } => "phi",
            InstKind::Call { .. } => "call",
        }
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }
}

fn addr_operands(addr: &Address, f: &mut impl FnMut(&Value)) {
    if let Address::Element { indices, .. } = addr {
        for index in indices {
            if let Index::Dynamic(value) = index {
                f(value);
            }
        }
    }
}

fn addr_operands_mut(addr: &mut Address, f: &mut impl FnMut(&mut Value)) {
    if let Address::Element { indices, .. } = addr {
        for index in indices {
            if let Index::Dynamic(value) = index {
                f(value);
            }
        }
    }
}

/// An instruction together with its result type and owning block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstData {
    pub kind: InstKind,
    /// Result type; `VOID` for stores and effect calls.
    pub ty: TypeId,
    pub block: BlockId,
}

// ── Terminators ─────────────────────────────────────────────────────

/// Block terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return,
}

impl Terminator {
    /// Successor blocks in edge order.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match *self {
            Terminator::Jump(target) => smallvec::smallvec![target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => smallvec::smallvec![then_block, else_block],
            Terminator::Return => SmallVec::new(),
        }
    }
}
