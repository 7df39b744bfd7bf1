//! Per-program-kind classification hooks.
//!
//! The classifier is generic; everything that differs between shaders,
//! deformers and particle programs beyond their scope tables goes through a
//! [`ScopeStrategy`].

use tessel_ir::{InstId, Value};

use crate::scope::{ScopeLabel, UsageFlags, ValueInfo};

/// A direct call seen by the classifier.
#[derive(Clone, Copy, Debug)]
pub struct CallSite<'a> {
    pub inst: InstId,
    /// Name of the called declaration.
    pub name: &'a str,
    pub args: &'a [Value],
}

/// How a call is classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallRule {
    /// Flags propagated to every argument.
    pub arg_flags: UsageFlags,
    /// Lowest scope the call may be placed in, before argument scopes are
    /// merged in. `None` lets a call with only constant arguments stay
    /// unscoped.
    pub floor: Option<ScopeLabel>,
}

/// Hooks a program kind plugs into the classifier.
pub trait ScopeStrategy {
    /// Classify a direct call. The default passes flags through unchanged
    /// and places argument-free calls in the first scope.
    fn classify_call(&self, call: &CallSite<'_>, flags: UsageFlags) -> CallRule {
        let _ = call;
        CallRule {
            arg_flags: flags,
            floor: Some(ScopeLabel::new(0)),
        }
    }

    /// Decide the scope of an instruction given its current info and the
    /// scope derived from its operands.
    ///
    /// The result may raise the scope but never lower it below either
    /// input; the classifier rejects a lowering with
    /// [`SplitError::ScopeLowered`](crate::SplitError::ScopeLowered).
    fn set_value_scope(&self, info: &ValueInfo, scope: Option<ScopeLabel>) -> Option<ScopeLabel> {
        info.scope.max(scope)
    }
}

/// Plain dependency-driven classification.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultStrategy;

impl ScopeStrategy for DefaultStrategy {}
