//! Splitting many programs at once.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::passes::Pass;
use crate::problem::SplitError;
use crate::split::SplitInput;

/// Result of running a pass over one program: an output for every function
/// the pass split, in module order.
pub type ProgramSplit<T> = Result<Vec<T>, SplitError>;

/// Run `pass` over every function of one program.
pub fn split_program<P: Pass>(pass: &P, input: SplitInput<'_>) -> ProgramSplit<P::Output> {
    let mut outputs = Vec::new();
    for func in &input.module.functions {
        if let Some(output) = pass.split(input, func)? {
            outputs.push(output);
        }
    }
    Ok(outputs)
}

/// Run `pass` over independent programs in parallel.
///
/// Runs share nothing but the read-only inputs, so results are identical
/// to running [`split_program`] on each input in turn. Uses a scoped
/// thread pool so no worker outlives the call; if the pool cannot be
/// built, the programs are split sequentially.
pub fn split_batch<P: Pass>(pass: &P, inputs: &[SplitInput<'_>]) -> Vec<ProgramSplit<P::Output>> {
    debug!(kind = pass.kind(), programs = inputs.len(), "splitting batch");
    rayon::ThreadPoolBuilder::new()
        .build_scoped(rayon::ThreadBuilder::run, |pool| {
            pool.install(|| {
                inputs
                    .par_iter()
                    .map(|&input| split_program(pass, input))
                    .collect::<Vec<_>>()
            })
        })
        .unwrap_or_else(|e| {
            warn!("failed to create thread pool ({e}), splitting sequentially");
            inputs
                .iter()
                .map(|&input| split_program(pass, input))
                .collect()
        })
}
