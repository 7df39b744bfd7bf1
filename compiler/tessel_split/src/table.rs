//! Scope tables.
//!
//! A [`ScopeTable`] is everything that distinguishes one program kind from
//! another besides its [`ScopeStrategy`](crate::ScopeStrategy): the scope
//! names, which external bindings are roots of which scope, which outputs
//! are sinks of which scope, and the names of the transfer records.

use crate::problem::SplitError;
use crate::scope::{ScopeLabel, UsageFlags};

/// An external input with a fixed scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootDef {
    pub name: &'static str,
    pub scope: ScopeLabel,
    pub flags: UsageFlags,
}

/// An output (store target or effect function) required in a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkDef {
    pub name: &'static str,
    pub scope: ScopeLabel,
    pub flags: UsageFlags,
}

/// Name of the record carrying values from `src` to `dst`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferDef {
    pub src: ScopeLabel,
    pub dst: ScopeLabel,
    pub name: &'static str,
    /// Whether the record carries object handles instead of plain data.
    pub objects: bool,
}

/// Configuration of one split.
///
/// Sinks are classified in declaration order, which matters for strategies
/// whose decisions depend on flags seen so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeTable {
    pub scopes: Vec<&'static str>,
    pub roots: Vec<RootDef>,
    pub sinks: Vec<SinkDef>,
    pub transfers: Vec<TransferDef>,
}

impl ScopeTable {
    pub fn new(scopes: &[&'static str]) -> Self {
        ScopeTable {
            scopes: scopes.to_vec(),
            ..ScopeTable::default()
        }
    }

    #[must_use]
    pub fn root(mut self, name: &'static str, scope: ScopeLabel, flags: UsageFlags) -> Self {
        self.roots.push(RootDef { name, scope, flags });
        self
    }

    #[must_use]
    pub fn sink(mut self, name: &'static str, scope: ScopeLabel, flags: UsageFlags) -> Self {
        self.sinks.push(SinkDef { name, scope, flags });
        self
    }

    #[must_use]
    pub fn transfer(mut self, src: ScopeLabel, dst: ScopeLabel, name: &'static str) -> Self {
        self.transfers.push(TransferDef {
            src,
            dst,
            name,
            objects: false,
        });
        self
    }

    /// Like [`transfer`](ScopeTable::transfer), for object handles.
    #[must_use]
    pub fn object_transfer(mut self, src: ScopeLabel, dst: ScopeLabel, name: &'static str) -> Self {
        self.transfers.push(TransferDef {
            src,
            dst,
            name,
            objects: true,
        });
        self
    }

    /// Number of scopes.
    #[inline]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Name of a scope, for diagnostics and generated names.
    pub fn scope_name(&self, scope: ScopeLabel) -> &'static str {
        self.scopes.get(scope.index()).copied().unwrap_or("?")
    }

    /// Check that every label used by the table names one of its scopes.
    pub fn validate(&self) -> Result<(), SplitError> {
        let count = self.scopes.len();
        let check = |scope: ScopeLabel| {
            if scope.index() < count && count <= ScopeLabel::MAX_SCOPES {
                Ok(())
            } else {
                Err(SplitError::ScopeOutOfRange { scope, count })
            }
        };
        for root in &self.roots {
            check(root.scope)?;
        }
        for sink in &self.sinks {
            check(sink.scope)?;
        }
        for transfer in &self.transfers {
            check(transfer.src)?;
            check(transfer.dst)?;
        }
        Ok(())
    }
}
