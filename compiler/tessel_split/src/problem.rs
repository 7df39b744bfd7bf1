//! Diagnostics and hard errors.
//!
//! Recoverable problems (unsupported constructs, sinks absent from the
//! program, values that cannot reach their consumer) are collected as
//! [`SplitProblem`]s and never abort a run: the partitions are still
//! produced, with the affected values replaced by undefined placeholders.
//! Violations of the partitioner's own invariants are [`SplitError`]s and
//! fail the run, since continuing would silently produce a wrong partition.

use tessel_ir::{BlockId, InstId, Name};
use thiserror::Error;

use crate::scope::ScopeLabel;

/// Problem encountered while splitting a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitProblem {
    /// A declared sink is neither written nor called in the function.
    SinkNotFound { name: Name },
    /// A call through a computed function pointer.
    IndirectCall { inst: InstId },
    /// A cross-scope read whose address shape cannot be transferred.
    UnsupportedAddress { inst: InstId },
    /// A live instruction reads a value that never received a scope.
    UndefinedValue { inst: InstId },
    /// A value would have to flow from a later scope to an earlier one.
    BackwardTransfer {
        inst: InstId,
        from: ScopeLabel,
        to: ScopeLabel,
    },
    /// Control flow jumps back into a block still being replayed.
    UnsupportedLoop { block: BlockId },
    /// A phi has no incoming value for the predecessor it is resolved
    /// against.
    MissingIncoming { inst: InstId, block: BlockId },
}

/// Fatal invariant violation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SplitError {
    /// A value classified into a scope was requested there before it was
    /// copied.
    #[error("{inst:?} is classified into {scope:?} but was never copied there")]
    MissingCopy { inst: InstId, scope: ScopeLabel },
    /// A scope strategy tried to move a node to an earlier scope.
    #[error("scope strategy lowered {inst:?} from {from:?} to {to:?}")]
    ScopeLowered {
        inst: InstId,
        from: Option<ScopeLabel>,
        to: Option<ScopeLabel>,
    },
    /// A scope label outside the table it was used with.
    #[error("scope {scope:?} is out of range for a table of {count} scopes")]
    ScopeOutOfRange { scope: ScopeLabel, count: usize },
    /// The requested function does not exist in the module.
    #[error("function `{name}` not found in module")]
    FunctionNotFound { name: String },
}
