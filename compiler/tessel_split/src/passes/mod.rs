//! Program kinds.
//!
//! Each pass pairs a [`ScopeTable`](crate::ScopeTable) with a
//! [`ScopeStrategy`](crate::ScopeStrategy) and knows which functions of a
//! program it splits:
//!
//! | Pass | Scopes | Functions |
//! |------|--------|-----------|
//! | [`ShaderPass`] | material, transform, vertex, pixel | `main` |
//! | [`DeformerPass`] | uniform, vertex | `main` |
//! | [`ParticlePass`] | uniform, particle | `create`, `update` |
//! | [`ShapeParticlePass`] | uniform, particle | `main` |

mod deformer;
mod particle;
mod shader;

pub use deformer::DeformerPass;
pub use particle::{ParticlePass, ShapeParticlePass};
pub use shader::{flip_y, ShaderOptions, ShaderPass, ShaderSplit, ShaderStrategy, SortMode};

use tessel_ir::Function;
use tracing::warn;

use crate::problem::SplitError;
use crate::split::SplitInput;

/// A program kind that can split some of a module's functions.
pub trait Pass: Sync {
    type Output: Send;

    /// Name of the program kind, for diagnostics.
    fn kind(&self) -> &'static str;

    /// Split `func`, or return `None` if this kind has no use for it.
    fn split(
        &self,
        input: SplitInput<'_>,
        func: &Function,
    ) -> Result<Option<Self::Output>, SplitError>;
}

/// Warn about a function the pass does not know.
fn unexpected<T>(kind: &str, input: SplitInput<'_>, func: &Function) -> Option<T> {
    warn!(
        kind,
        function = input.interner.lookup(func.name),
        "unexpected function encountered"
    );
    None
}
