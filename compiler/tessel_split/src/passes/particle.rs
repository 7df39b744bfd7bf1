//! Particle systems and shape-particle instancers.

use tessel_ir::Function;

use crate::problem::SplitError;
use crate::scope::{ScopeLabel, UsageFlags};
use crate::split::{split_function, SplitInput, SplitOutput};
use crate::strategy::DefaultStrategy;
use crate::table::ScopeTable;

use super::{unexpected, Pass};

pub const UNIFORM: ScopeLabel = ScopeLabel::new(0);
pub const PARTICLE: ScopeLabel = ScopeLabel::new(1);

pub const USED_BY_PARTICLE: UsageFlags = UsageFlags::from_bits_retain(1);

const SCOPES: [&str; 2] = ["uniform", "particle"];

/// Splits the `create` and `update` functions of a particle system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParticlePass;

impl ParticlePass {
    pub fn create_table() -> ScopeTable {
        ScopeTable::new(&SCOPES)
            .root("emitter", UNIFORM, UsageFlags::empty())
            .root("uniform", UNIFORM, UsageFlags::empty())
            .root("particle", PARTICLE, UsageFlags::empty())
            .root("index", PARTICLE, UsageFlags::empty())
            .root("id", PARTICLE, UsageFlags::empty())
            .root("seed", PARTICLE, UsageFlags::empty())
            .sink("particle", PARTICLE, USED_BY_PARTICLE)
            .sink("seed", PARTICLE, USED_BY_PARTICLE)
            .transfer(UNIFORM, PARTICLE, "create_u2p")
    }

    pub fn update_table() -> ScopeTable {
        ScopeTable::new(&SCOPES)
            .root("uniform", UNIFORM, UsageFlags::empty())
            .root("particle", PARTICLE, UsageFlags::empty())
            .root("index", PARTICLE, UsageFlags::empty())
            .root("id", PARTICLE, UsageFlags::empty())
            .root("seed", PARTICLE, UsageFlags::empty())
            .sink("particle", PARTICLE, USED_BY_PARTICLE)
            .sink("seed", PARTICLE, USED_BY_PARTICLE)
            .sink("alive", PARTICLE, USED_BY_PARTICLE)
            .transfer(UNIFORM, PARTICLE, "update_u2p")
    }
}

impl Pass for ParticlePass {
    type Output = SplitOutput;

    fn kind(&self) -> &'static str {
        "particle"
    }

    fn split(
        &self,
        input: SplitInput<'_>,
        func: &Function,
    ) -> Result<Option<SplitOutput>, SplitError> {
        let table = match input.interner.lookup(func.name) {
            "create" => Self::create_table(),
            "update" => Self::update_table(),
            _ => return Ok(unexpected(self.kind(), input, func)),
        };
        split_function(input, func, &table, &DefaultStrategy).map(Some)
    }
}

/// Splits the `main` of a shape-particle instancer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShapeParticlePass;

impl ShapeParticlePass {
    pub fn table() -> ScopeTable {
        ScopeTable::new(&SCOPES)
            .root("transform", UNIFORM, UsageFlags::empty())
            .root("parentMatrix", UNIFORM, UsageFlags::empty())
            .root("uniform", UNIFORM, UsageFlags::empty())
            .root("particle", PARTICLE, UsageFlags::empty())
            .root("index", PARTICLE, UsageFlags::empty())
            .root("particleMatrix", PARTICLE, UsageFlags::empty())
            .sink("index", PARTICLE, USED_BY_PARTICLE)
            .sink("particleMatrix", PARTICLE, USED_BY_PARTICLE)
            .transfer(UNIFORM, PARTICLE, "u2p")
    }
}

impl Pass for ShapeParticlePass {
    type Output = SplitOutput;

    fn kind(&self) -> &'static str {
        "shape particle"
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
