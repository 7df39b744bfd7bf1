//! Transfer records.
//!
//! Every value read across scopes is registered here, keyed by the ordered
//! (producer, consumer) scope pair, while the emitter runs. Once emission is
//! complete, [`Emitter::fix_and_get_transfer`] lays out one packed record per
//! pair and object kind, declares it in both partitions, appends the stores
//! on the producer side and patches the consumer's placeholder reads.
//!
//! Two kinds of slot exist:
//!
//! - **Value slots** carry one instruction result. Broadcast vectors travel
//!   as their scalar lane and are re-broadcast by the consumer.
//! - **Array slots** serve runtime-indexed reads of an array owned by an
//!   earlier scope. Only the element selected by the constant part of the
//!   access path is copied, for every position of the runtime dimension.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};
use tessel_ir::{
    Address, Constant, GlobalDecl, GlobalId, Index, InstId, InstKind, TextureKind, Type, TypeId,
    TypePool, Value,
};
use tracing::debug;

use crate::emit::Emitter;
use crate::problem::SplitError;
use crate::scope::ScopeLabel;

/// One transferred instruction result.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ValueSlot {
    /// Producing instruction in the source function.
    pub(crate) source: InstId,
    /// Field type (the scalar lane when scalarized).
    pub(crate) ty: TypeId,
    pub(crate) scalarized: bool,
    /// Placeholder load in the consumer partition.
    pub(crate) read: InstId,
}

/// One runtime-indexed placeholder read, before it is grouped by path.
#[derive(Clone, Debug)]
pub(crate) struct ArrayRead {
    pub(crate) global: GlobalId,
    /// Constant steps of the access path, `None` at the runtime index.
    pub(crate) path: SmallVec<[Option<u32>; 4]>,
    pub(crate) elem: TypeId,
    pub(crate) len: u32,
    pub(crate) read: InstId,
    /// Runtime index, already resolved in the consumer partition.
    pub(crate) index: Value,
}

#[derive(Clone, Debug)]
struct ArraySlot {
    global: GlobalId,
    path: SmallVec<[Option<u32>; 4]>,
    elem: TypeId,
    len: u32,
    reads: Vec<(InstId, Value)>,
}

#[derive(Debug, Default)]
struct Transfer {
    values: Vec<ValueSlot>,
    arrays: Vec<ArraySlot>,
}

/// Slots registered during emission, per ordered scope pair.
#[derive(Debug, Default)]
pub(crate) struct TransferRecords {
    pairs: FxHashMap<(ScopeLabel, ScopeLabel), Transfer>,
    fixed: FxHashSet<(ScopeLabel, ScopeLabel, bool)>,
}

impl TransferRecords {
    pub(crate) fn add_value(&mut self, src: ScopeLabel, dst: ScopeLabel, slot: ValueSlot) {
        self.pairs.entry((src, dst)).or_default().values.push(slot);
    }

    /// Register a runtime-indexed read, sharing the slot of an earlier read
    /// with the same binding and access path.
    pub(crate) fn add_array_read(&mut self, src: ScopeLabel, dst: ScopeLabel, read: ArrayRead) {
        let arrays = &mut self.pairs.entry((src, dst)).or_default().arrays;
        match arrays
            .iter_mut()
            .find(|slot| slot.global == read.global && slot.path == read.path)
        {
            Some(slot) => slot.reads.push((read.read, read.index)),
            None => arrays.push(ArraySlot {
                global: read.global,
                path: read.path,
                elem: read.elem,
                len: read.len,
                reads: vec![(read.read, read.index)],
            }),
        }
    }
}

/// Base kind of a transfer field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SlotKind {
    #[default]
    Bool,
    Int,
    Float,
    Texture,
}

/// Printer-facing description of one record field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SlotType {
    pub kind: SlotKind,
    /// Vector rows, or texture dimension (2 = 2D, 3 = 3D, 4 = cube).
    pub rows: u32,
    /// Array length; 0 when the field is not an array.
    pub elements: u32,
}

impl SlotType {
    pub fn new(kind: SlotKind, rows: u32, elements: u32) -> Self {
        SlotType {
            kind,
            rows,
            elements,
        }
    }

    /// Describe `ty`. Types with no field representation yield the default.
    pub fn of(types: &TypePool, ty: TypeId) -> Self {
        let (ty, elements) = match types.get(ty) {
            Type::Array { elem, len } => (elem, len),
            _ => (ty, 0),
        };
        let (ty, rows) = match types.get(ty) {
            Type::Vector { elem, len } => (elem, len),
            _ => (ty, 1),
        };
        match types.get(ty) {
            Type::Bool => SlotType::new(SlotKind::Bool, rows, elements),
            Type::Int => SlotType::new(SlotKind::Int, rows, elements),
            Type::Float => SlotType::new(SlotKind::Float, rows, elements),
            Type::Texture(kind) => {
                let dims = match kind {
                    TextureKind::Texture2D => 2,
                    TextureKind::Texture3D => 3,
                    TextureKind::Cube => 4,
                };
                SlotType::new(SlotKind::Texture, dims, elements)
            }
            Type::Void | Type::Vector { .. } | Type::Array { .. } | Type::Struct { .. } => {
                SlotType::default()
            }
        }
    }
}

/// A laid-out transfer record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferLayout {
    /// Binding name of the record in both partitions.
    pub name: String,
    pub src: ScopeLabel,
    pub dst: ScopeLabel,
    /// Whether this record carries object handles.
    pub objects: bool,
    pub record: TypeId,
    /// Field types in record order.
    pub fields: Vec<TypeId>,
    pub slots: Vec<SlotType>,
}

impl Emitter<'_> {
    /// Lay out the record for `src → dst` (object handles only, or
    /// everything else), wire both sides to it and describe its fields.
    ///
    /// Returns `None` when no slot of that kind was registered; no binding
    /// is declared in that case.
    pub fn fix_and_get_transfer(
        &mut self,
        src: ScopeLabel,
        dst: ScopeLabel,
        name: &str,
        objects: bool,
    ) -> Result<Option<TransferLayout>, SplitError> {
        self.records.fixed.insert((src, dst, objects));
        let Some(transfer) = self.records.pairs.get(&(src, dst)) else {
            return Ok(None);
        };
        let types = self.types;
        let values: Vec<ValueSlot> = transfer
            .values
            .iter()
            .filter(|slot| types.is_object(slot.ty) == objects)
            .copied()
            .collect();
        let arrays: Vec<ArraySlot> = transfer
            .arrays
            .iter()
            .filter(|slot| types.is_object(slot.elem) == objects)
            .cloned()
            .collect();
        if values.is_empty() && arrays.is_empty() {
            return Ok(None);
        }

        let fields: Vec<TypeId> = values
            .iter()
            .map(|slot| slot.ty)
            .chain(arrays.iter().map(|slot| types.array(slot.elem, slot.len)))
            .collect();
        let record = types.packed_record(fields.clone());
        let decl = GlobalDecl::new(self.interner.intern(name), record);
        let src_global = self
            .partition(src)?
            .module
            .get_or_insert_global(decl.clone());
        let dst_global = self.partition(dst)?.module.get_or_insert_global(decl);

        let mut field = 0u32;
        for slot in &values {
            self.store_value_slot(src, src_global, field, slot)?;
            self.partition(dst)?.fb.function_mut().set_kind(
                slot.read,
                InstKind::Load {
                    addr: Address::Member {
                        global: dst_global,
                        path: smallvec![field],
                    },
                },
            );
            field += 1;
        }
        for slot in &arrays {
            self.copy_array_slot(src, src_global, field, slot)?;
            let func = self.partition(dst)?.fb.function_mut();
            for &(read, index) in &slot.reads {
                func.set_kind(
                    read,
                    InstKind::Load {
                        addr: Address::Element {
                            global: dst_global,
                            indices: smallvec![Index::Const(field), Index::Dynamic(index)],
                        },
                    },
                );
            }
            field += 1;
        }

        let slots = fields.iter().map(|&ty| SlotType::of(types, ty)).collect();
        debug!(
            name,
            ?src,
            ?dst,
            objects,
            values = values.len(),
            arrays = arrays.len(),
            "transfer laid out"
        );
        Ok(Some(TransferLayout {
            name: name.to_owned(),
            src,
            dst,
            objects,
            record,
            fields,
            slots,
        }))
    }

    /// Registered (src, dst, objects) records not yet laid out, in scope
    /// order.
    pub fn pending_transfers(&self) -> Vec<(ScopeLabel, ScopeLabel, bool)> {
        let mut pending = Vec::new();
        for (&(src, dst), transfer) in &self.records.pairs {
            for objects in [false, true] {
                let used = transfer
                    .values
                    .iter()
                    .any(|slot| self.types.is_object(slot.ty) == objects)
                    || transfer
                        .arrays
                        .iter()
                        .any(|slot| self.types.is_object(slot.elem) == objects);
                if used && !self.records.fixed.contains(&(src, dst, objects)) {
                    pending.push((src, dst, objects));
                }
            }
        }
        pending.sort_unstable();
        pending
    }

    /// Store a value slot at the end of the block producing it.
    fn store_value_slot(
        &mut self,
        src: ScopeLabel,
        transfer: GlobalId,
        field: u32,
        slot: &ValueSlot,
    ) -> Result<(), SplitError> {
        let part = self.partition(src)?;
        let value = part
            .copies
            .get(&slot.source)
            .copied()
            .ok_or(SplitError::MissingCopy {
                inst: slot.source,
                scope: src,
            })?;
        let block = match value {
            Value::Inst(id) => part.fb.function().inst(id).block,
            Value::Global(_) | Value::Const(_) => part.fb.entry_block(),
        };
        let func = part.fb.function_mut();
        let value = if slot.scalarized {
            Value::Inst(func.append(
                block,
                slot.ty,
                InstKind::ExtractElement {
                    vector: value,
                    index: Value::Const(Constant::int(TypeId::INT, 0)),
                },
            ))
        } else {
            value
        };
        func.append(
            block,
            TypeId::VOID,
            InstKind::Store {
                value,
                addr: Address::Member {
                    global: transfer,
                    path: smallvec![field],
                },
            },
        );
        Ok(())
    }

    /// Copy every position of an array slot at the start of the producer's
    /// entry block.
    fn copy_array_slot(
        &mut self,
        src: ScopeLabel,
        transfer: GlobalId,
        field: u32,
        slot: &ArraySlot,
    ) -> Result<(), SplitError> {
        let global = self.get_global(src, slot.global)?;
        let fb = &mut self.partition(src)?.fb;
        let entry = fb.entry_block();
        let func = fb.function_mut();
        let mut pos = 0;
        for position in 0..slot.len {
            let path = slot
                .path
                .iter()
                .map(|step| step.unwrap_or(position))
                .collect();
            let element = func.insert(
                entry,
                pos,
                slot.elem,
                InstKind::Load {
                    addr: Address::Member { global, path },
                },
            );
            func.insert(
                entry,
                pos + 1,
                TypeId::VOID,
                InstKind::Store {
                    value: Value::Inst(element),
                    addr: Address::Member {
                        global: transfer,
                        path: smallvec![field, position],
                    },
                },
            );
            pos += 2;
        }
        Ok(())
    }
}
