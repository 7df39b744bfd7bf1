//! Scope-splitting program partitioner.
//!
//! Takes one function operating on named external bindings and splits it
//! into one function per pipeline stage ("scope"), moving values between
//! stages through generated transfer records.
//!
//! # Pipeline
//!
//! 1. **Classification** ([`Classifier`]): roots fix the scope of external
//!    inputs, sinks fix the scope of outputs; flags flow backwards and
//!    scopes resolve forwards until both settle.
//! 2. **Replay** ([`Replay`], [`Emitter`]): the control-flow graph is walked
//!    once, branches are reproduced only in the scopes that need them, and
//!    each live instruction is copied into the partition of its scope.
//! 3. **Transfer synthesis**: every value crossing scopes becomes a field
//!    of a packed record per ordered scope pair ([`TransferLayout`]).
//!
//! [`split_function`] runs all three for one [`ScopeTable`]; the program
//! kinds in [`passes`] supply the tables, and [`split_batch`] runs a pass
//! over many programs in parallel.
//!
//! # Debugging
//!
//! - `RUST_LOG=tessel_split=debug`: convergence, fan-out and transfer layout.
//! - `RUST_LOG=tessel_split=trace`: per-node propagation.

mod batch;
mod classify;
mod emit;
pub mod passes;
mod problem;
mod replay;
mod scope;
mod split;
mod strategy;
mod table;
mod transfer;

#[cfg(test)]
mod test_helpers;

use std::sync::Once;

pub use batch::{split_batch, split_program, ProgramSplit};
pub use classify::{Classification, Classifier, SinkWrite, Snapshot};
pub use emit::{Emitter, FanOut, Partition};
pub use problem::{SplitError, SplitProblem};
pub use replay::{BranchSite, Replay, ReplayVisitor};
pub use scope::{ScopeLabel, ScopeSet, UsageFlags, ValueInfo};
pub use split::{split_function, split_with, SinkResult, SplitInput, SplitOutput};
pub use strategy::{CallRule, CallSite, DefaultStrategy, ScopeStrategy};
pub use table::{RootDef, ScopeTable, SinkDef, TransferDef};
pub use transfer::{SlotKind, SlotType, TransferLayout};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
