//! Type pool for program values.
//!
//! Every type is interned once in a [`TypePool`] and referenced by its
//! 32-bit [`TypeId`]. Type equality is index equality. The pool is shared by
//! the source program and all of its partitions; the partitioner interns the
//! packed transfer records it synthesizes into the same pool.
//!
//! # Design
//!
//! - Scalar primitives have fixed indices so they are usable as constants.
//! - Aggregates (`Vector`, `Array`, `Struct`) are structurally interned.
//! - `Texture` (and arrays of textures) are the *object kind*: opaque handles
//!   that never share a transfer record with scalar data.

use std::fmt;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// A 32-bit index into the type pool.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    // === Primitive Types (indices 0-3) ===

    /// The `void` type (results of stores and effect calls).
    pub const VOID: Self = Self(0);
    /// The `bool` type.
    pub const BOOL: Self = Self(1);
    /// The `int` type (32-bit signed integer).
    pub const INT: Self = Self(2);
    /// The `float` type (32-bit floating point).
    pub const FLOAT: Self = Self(3);

    /// Get the raw `u32` value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::VOID => write!(f, "TypeId::VOID"),
            Self::BOOL => write!(f, "TypeId::BOOL"),
            Self::INT => write!(f, "TypeId::INT"),
            Self::FLOAT => write!(f, "TypeId::FLOAT"),
            _ => write!(f, "TypeId({})", self.0),
        }
    }
}

/// Dimensionality of a texture handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Texture2D,
    Texture3D,
    Cube,
}

/// Structural description of a type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int,
    Float,
    /// Fixed-length SIMD vector of a scalar element.
    Vector { elem: TypeId, len: u32 },
    /// Fixed-length array.
    Array { elem: TypeId, len: u32 },
    /// Record with ordered fields. Transfer records are `packed`.
    Struct { fields: Vec<TypeId>, packed: bool },
    /// Opaque texture handle.
    Texture(TextureKind),
}

struct PoolData {
    types: Vec<Type>,
    map: FxHashMap<Type, TypeId>,
}

/// Interning pool for [`Type`]s.
///
/// Shared read-mostly across concurrently split programs.
pub struct TypePool {
    data: RwLock<PoolData>,
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

impl TypePool {
    /// Create a pool with the primitive types pre-interned.
    pub fn new() -> Self {
        let pool = TypePool {
            data: RwLock::new(PoolData {
                types: Vec::with_capacity(64),
                map: FxHashMap::default(),
            }),
        };
        for ty in [Type::Void, Type::Bool, Type::Int, Type::Float] {
            pool.intern(ty);
        }
        debug_assert_eq!(pool.len(), 4);
        pool
    }

    /// Intern a type, returning its id.
    pub fn intern(&self, ty: Type) -> TypeId {
        if let Some(&id) = self.data.read().map.get(&ty) {
            return id;
        }

        let mut data = self.data.write();
        if let Some(&id) = data.map.get(&ty) {
            return id;
        }
        let id = TypeId(u32::try_from(data.types.len()).unwrap_or(u32::MAX));
        data.types.push(ty.clone());
        data.map.insert(ty, id);
        id
    }

    /// Get the structure of an interned type.
    ///
    /// Unknown ids resolve to `Void`.
    pub fn get(&self, id: TypeId) -> Type {
        self.data
            .read()
            .types
            .get(id.index())
            .cloned()
            .unwrap_or(Type::Void)
    }

    /// Number of interned types.
    pub fn len(&self) -> usize {
        self.data.read().types.len()
    }

    /// Whether the pool holds nothing but the primitives.
    pub fn is_empty(&self) -> bool {
        self.len() <= 4
    }

    // ── Constructors ────────────────────────────────────────────────

    pub fn vector(&self, elem: TypeId, len: u32) -> TypeId {
        self.intern(Type::Vector { elem, len })
    }

    pub fn array(&self, elem: TypeId, len: u32) -> TypeId {
        self.intern(Type::Array { elem, len })
    }

    pub fn structure(&self, fields: Vec<TypeId>) -> TypeId {
        self.intern(Type::Struct {
            fields,
            packed: false,
        })
    }

    /// Intern a packed record, the layout used for transfer records.
    pub fn packed_record(&self, fields: Vec<TypeId>) -> TypeId {
        self.intern(Type::Struct {
            fields,
            packed: true,
        })
    }

    pub fn texture(&self, kind: TextureKind) -> TypeId {
        self.intern(Type::Texture(kind))
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Element type of a vector or array.
    pub fn element(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Vector { elem, .. } | Type::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Number of lanes of a vector, or elements of an array.
    pub fn len_of(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            Type::Vector { len, .. } | Type::Array { len, .. } => Some(len),
            _ => None,
        }
    }

    /// Whether `id` is a SIMD vector type.
    pub fn is_vector(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Vector { .. })
    }

    /// Type selected by one step of member access.
    ///
    /// Struct fields are selected by position; arrays and vectors by element
    /// (the index value itself is irrelevant to the result type).
    pub fn member(&self, id: TypeId, index: u32) -> Option<TypeId> {
        match self.get(id) {
            Type::Struct { fields, .. } => fields.get(index as usize).copied(),
            Type::Vector { elem, .. } | Type::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Type reached by following a whole member-access path.
    pub fn member_path(&self, id: TypeId, path: &[u32]) -> Option<TypeId> {
        path.iter()
            .try_fold(id, |current, &index| self.member(current, index))
    }

    /// Whether values of this type are opaque object handles.
    pub fn is_object(&self, id: TypeId) -> bool {
        match self.get(id) {
            Type::Texture(_) => true,
            Type::Array { elem, .. } => self.is_object(elem),
            _ => false,
        }
    }
}
