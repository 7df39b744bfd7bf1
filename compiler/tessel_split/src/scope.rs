//! Scope labels, scope sets and usage flags.

use std::fmt;

use bitflags::bitflags;

/// A pipeline stage, densely numbered `0..N` in pipeline order.
///
/// Merging requirements takes the maximum: a value needed by a later stage
/// can always be computed there from data produced earlier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ScopeLabel(u8);

impl ScopeLabel {
    /// Largest number of scopes a table may declare.
    pub const MAX_SCOPES: usize = 32;

    /// Labels from [`MAX_SCOPES`](Self::MAX_SCOPES) up are rejected by
    /// [`ScopeTable::validate`](crate::ScopeTable::validate) and never
    /// belong to a [`ScopeSet`].
    #[inline]
    pub const fn new(raw: u8) -> Self {
        ScopeLabel(raw)
    }

    /// This label's bit in a [`ScopeSet`], zero when out of range.
    #[inline]
    const fn bit(self) -> u32 {
        match 1u32.checked_shl(self.0 as u32) {
            Some(bit) => bit,
            None => 0,
        }
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ScopeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

/// A set of scopes, iterated in pipeline order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(u32);

impl ScopeSet {
    pub const EMPTY: ScopeSet = ScopeSet(0);

    /// The first `n` scopes.
    pub fn first(n: usize) -> Self {
        if n >= ScopeLabel::MAX_SCOPES {
            ScopeSet(u32::MAX)
        } else {
            ScopeSet((1u32 << n) - 1)
        }
    }

    pub const fn single(scope: ScopeLabel) -> Self {
        ScopeSet(scope.bit())
    }

    #[inline]
    pub fn insert(&mut self, scope: ScopeLabel) {
        self.0 |= scope.bit();
    }

    #[inline]
    pub const fn contains(self, scope: ScopeLabel) -> bool {
        self.0 & scope.bit() != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub const fn union(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 | other.0)
    }

    #[inline]
    pub const fn intersection(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 & other.0)
    }

    #[inline]
    pub const fn difference(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 & !other.0)
    }

    /// Member scopes in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ScopeLabel> {
        (0..ScopeLabel::MAX_SCOPES)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .map(|i| ScopeLabel(u8::try_from(i).unwrap_or(u8::MAX)))
    }
}

impl fmt::Debug for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<ScopeLabel> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = ScopeLabel>>(iter: I) -> Self {
        let mut set = ScopeSet::EMPTY;
        for scope in iter {
            set.insert(scope);
        }
        set
    }
}

bitflags! {
    /// Monotonically growing taint bits: "this value is used by stage X",
    /// "this value is an external input".
    ///
    /// The bit meanings belong to each program kind (see
    /// [`crate::passes`]); the classifier only ever unions them.
    #[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug)]
    pub struct UsageFlags: u32 {
        const _ = !0;
    }
}

/// Classification result for one value, block or terminator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ValueInfo {
    /// `None` until a sink reaches the node; dead when still `None` after
    /// classification.
    pub scope: Option<ScopeLabel>,
    pub flags: UsageFlags,
}

impl ValueInfo {
    pub const fn new(scope: Option<ScopeLabel>, flags: UsageFlags) -> Self {
        ValueInfo { scope, flags }
    }

    /// Whether this node was reached by classification and given a scope.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.flags.is_empty() && self.scope.is_some()
    }
}
