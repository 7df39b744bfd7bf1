//! Deformers: per-shape uniform setup and per-vertex deformation.

use tessel_ir::Function;

use crate::problem::SplitError;
use crate::scope::{ScopeLabel, UsageFlags};
use crate::split::{split_function, SplitInput, SplitOutput};
use crate::strategy::DefaultStrategy;
use crate::table::ScopeTable;

use super::{unexpected, Pass};

/// Splits a deformer `main` into uniform and vertex parts.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeformerPass;

impl DeformerPass {
    pub const UNIFORM: ScopeLabel = ScopeLabel::new(0);
    pub const VERTEX: ScopeLabel = ScopeLabel::new(1);

    pub const USED_BY_VERTEX: UsageFlags = UsageFlags::from_bits_retain(1);

    pub fn table() -> ScopeTable {
        ScopeTable::new(&["uniform", "vertex"])
            .root("deformer", Self::UNIFORM, UsageFlags::empty())
            .root("vertex", Self::VERTEX, UsageFlags::empty())
            .sink("result", Self::VERTEX, Self::USED_BY_VERTEX)
            .transfer(Self::UNIFORM, Self::VERTEX, "u2v")
    }
}

impl Pass for DeformerPass {
    type Output = SplitOutput;

    fn kind(&self) -> &'static str {
        "deformer"
    }

    fn split(
        &self,
        input: SplitInput<'_>,
        func: &Function,
    ) -> Result<Option<SplitOutput>, SplitError> {
        if input.interner.lookup(func.name) != "main" {
            return Ok(unexpected(self.kind(), input, func));
        }
        split_function(input, func, &Self::table(), &DefaultStrategy).map(Some)
    }
}
