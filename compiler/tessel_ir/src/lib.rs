//! Program representation for the tessel scope splitter.
//!
//! A front-end lowers one unified shader-like program into a [`Module`]; the
//! splitter in `tessel_split` reads it and produces one [`Module`] per
//! pipeline scope, in the same representation. This crate provides:
//!
//! - [`TypePool`] / [`TypeId`]: interned types, shared across partitions
//! - [`StringInterner`] / [`Name`]: interned identifiers
//! - [`Value`], [`InstKind`], [`Address`], [`Terminator`]: SSA instructions
//! - [`Function`], [`FunctionBuilder`], [`Module`]: containers
//! - [`PostDominatorTree`]: the dominance oracle used to find join blocks

mod function;
mod graph;
mod ir;
mod module;
mod name;
mod types;

pub use function::{Block, Function, FunctionBuilder};
pub use graph::{compute_control_dependence, compute_predecessors, PostDominatorTree};
pub use ir::{
    Address, BinaryOp, BlockId, Callee, CastOp, CmpPred, ConstKind, Constant, FuncId, GlobalId,
    Index, InstData, InstId, InstKind, Terminator, UnaryOp, Value,
};
pub use module::{FunctionDecl, GlobalDecl, Module};
pub use name::{Name, StringInterner};
pub use types::{TextureKind, Type, TypeId, TypePool};
