//! Running a split end to end.
//!
//! [`split_function`] classifies a function against a [`ScopeTable`],
//! emits one partition per scope and lays out every transfer record the
//! emission registered. [`split_with`] additionally lets a caller work on
//! the classifier between root declaration and sink classification, which
//! the shader pass uses to classify its sort key tentatively.

use tessel_ir::{Function, Module, PostDominatorTree, StringInterner, TypePool};
use tracing::{debug, warn};

use crate::classify::{Classification, Classifier, SinkWrite};
use crate::emit::{Emitter, FanOut, Partition};
use crate::problem::{SplitError, SplitProblem};
use crate::strategy::ScopeStrategy;
use crate::table::ScopeTable;
use crate::transfer::TransferLayout;

/// The shared, read-only inputs of a split.
#[derive(Clone, Copy)]
pub struct SplitInput<'a> {
    pub module: &'a Module,
    pub types: &'a TypePool,
    pub interner: &'a StringInterner,
}

impl<'a> SplitInput<'a> {
    pub fn new(module: &'a Module, types: &'a TypePool, interner: &'a StringInterner) -> Self {
        SplitInput {
            module,
            types,
            interner,
        }
    }

    /// Look up a function of the module by name.
    pub fn function(&self, name: &str) -> Result<&'a Function, SplitError> {
        self.interner
            .get(name)
            .and_then(|interned| self.module.function_named(interned))
            .ok_or_else(|| SplitError::FunctionNotFound {
                name: name.to_owned(),
            })
    }
}

/// What a sink resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkResult {
    pub name: &'static str,
    /// `None` when the function never writes the sink.
    pub write: Option<SinkWrite>,
}

/// Result of splitting one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitOutput {
    /// One partition per scope of the table, in scope order.
    pub partitions: Vec<Partition>,
    /// Laid-out transfer records, table entries first.
    pub transfers: Vec<TransferLayout>,
    pub problems: Vec<SplitProblem>,
    /// Branches duplicated into more than their natural scope.
    pub fanout: Vec<FanOut>,
    pub sinks: Vec<SinkResult>,
    pub classification: Classification,
}

impl SplitOutput {
    pub fn sink(&self, name: &str) -> Option<&SinkResult> {
        self.sinks.iter().find(|sink| sink.name == name)
    }
}

/// Split `func` according to `table`.
pub fn split_function(
    input: SplitInput<'_>,
    func: &Function,
    table: &ScopeTable,
    strategy: &dyn ScopeStrategy,
) -> Result<SplitOutput, SplitError> {
    split_with(input, func, table, strategy, |_| Ok(())).map(|(output, ())| output)
}

/// Split `func`, calling `before_sinks` once every root is declared.
pub fn split_with<T>(
    input: SplitInput<'_>,
    func: &Function,
    table: &ScopeTable,
    strategy: &dyn ScopeStrategy,
    before_sinks: impl FnOnce(&mut Classifier<'_>) -> Result<T, SplitError>,
) -> Result<(SplitOutput, T), SplitError> {
    table.validate()?;
    let function = input.interner.lookup(func.name);
    debug!(function, scopes = table.len(), "splitting");

    let postdom = PostDominatorTree::build(func);
    let mut classifier =
        Classifier::new(input.module, func, input.interner, strategy, &postdom);
    for root in &table.roots {
        classifier.declare_root_named(root.name, root.scope, root.flags);
    }
    let extra = before_sinks(&mut classifier)?;
    let mut sinks = Vec::with_capacity(table.sinks.len());
    for sink in &table.sinks {
        let write = classifier.classify_sink(sink.name, sink.scope, sink.flags)?;
        sinks.push(SinkResult {
            name: sink.name,
            write,
        });
    }
    let (classification, mut problems) = classifier.finish();

    let mut emitter = Emitter::new(
        input.module,
        func,
        input.types,
        input.interner,
        &classification,
        &table.scopes,
    );
    emitter.emit(&postdom)?;

    let mut transfers = Vec::new();
    for def in &table.transfers {
        if let Some(layout) = emitter.fix_and_get_transfer(def.src, def.dst, def.name, def.objects)? {
            transfers.push(layout);
        }
    }
    for (src, dst, objects) in emitter.pending_transfers() {
        let name = format!(
            "{}_to_{}{}",
            table.scope_name(src),
            table.scope_name(dst),
            if objects { "_objects" } else { "" }
        );
        warn!(function, %name, "transfer record missing from the scope table");
        if let Some(layout) = emitter.fix_and_get_transfer(src, dst, &name, objects)? {
            transfers.push(layout);
        }
    }

    let (partitions, emit_problems, fanout) = emitter.finish();
    problems.extend(emit_problems);
    debug!(
        function,
        transfers = transfers.len(),
        problems = problems.len(),
        "split finished"
    );
    Ok((
        SplitOutput {
            partitions,
            transfers,
            problems,
            fanout,
            sinks,
            classification,
        },
        extra,
    ))
}
