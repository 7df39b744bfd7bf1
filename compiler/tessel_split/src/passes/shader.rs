//! Shaders: material, transform, vertex and pixel stages.
//!
//! Besides its scope table the shader kind has three peculiarities:
//!
//! - The `sort` output is classified tentatively. If it can be computed by
//!   the material stage it stays there; otherwise its classification is
//!   undone and only a [`SortMode`] is reported.
//! - Arguments of `vs(...)` are vertex work even when a pixel value reads
//!   them, unless pixel work is avoided.
//! - Values only the pixel stage consumes are moved out of the vertex stage
//!   (see [`ShaderStrategy`]).

use smallvec::SmallVec;
use tessel_ir::{
    BinaryOp, Callee, Constant, Function, InstKind, Module, StringInterner, TypeId, TypePool,
    Value,
};
use tracing::debug;

use crate::classify::{Classifier, SinkWrite};
use crate::problem::SplitError;
use crate::scope::{ScopeLabel, UsageFlags, ValueInfo};
use crate::split::{split_with, SplitInput, SplitOutput};
use crate::strategy::{CallRule, CallSite, ScopeStrategy};
use crate::table::ScopeTable;

use super::{unexpected, Pass};

pub const MATERIAL: ScopeLabel = ScopeLabel::new(0);
pub const TRANSFORM: ScopeLabel = ScopeLabel::new(1);
pub const VERTEX: ScopeLabel = ScopeLabel::new(2);
pub const PIXEL: ScopeLabel = ScopeLabel::new(3);

pub const USED_BY_MATERIAL: UsageFlags = UsageFlags::from_bits_retain(1);
pub const USED_BY_TRANSFORM: UsageFlags = UsageFlags::from_bits_retain(2);
pub const USED_BY_VERTEX: UsageFlags = UsageFlags::from_bits_retain(4);
pub const USED_BY_PIXEL: UsageFlags = UsageFlags::from_bits_retain(8);
/// Set on external inputs and everything loaded from them.
pub const INPUT: UsageFlags = UsageFlags::from_bits_retain(16);

/// Name of the texture sample builtin rewritten by [`flip_y`].
const SAMPLE: &str = "sample";

/// Shader compilation switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderOptions {
    /// Keep as much work as possible out of the pixel stage.
    pub avoid_pixel_shader: bool,
    /// `frontFacing` is constant per draw call.
    pub front_facing_is_uniform: bool,
    /// Texture coordinates have their origin at the bottom left.
    pub flip_y: bool,
}

/// When a renderer has to depth-sort the shapes using a shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortMode {
    Never,
    Always,
    /// Decided per material, by the material stage.
    Material,
}

/// Classification hooks of the shader kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShaderStrategy {
    pub avoid_pixel_shader: bool,
}

impl ScopeStrategy for ShaderStrategy {
    fn classify_call(&self, call: &CallSite<'_>, flags: UsageFlags) -> CallRule {
        if self.avoid_pixel_shader {
            let floor = if call.name.starts_with(SAMPLE) {
                PIXEL
            } else {
                MATERIAL
            };
            return CallRule {
                arg_flags: flags,
                floor: Some(floor),
            };
        }
        let arg_flags = if call.name == "vs" {
            flags.difference(USED_BY_PIXEL) | USED_BY_VERTEX
        } else {
            flags
        };
        CallRule {
            arg_flags,
            floor: Some(MATERIAL),
        }
    }

    fn set_value_scope(&self, info: &ValueInfo, scope: Option<ScopeLabel>) -> Option<ScopeLabel> {
        let scope = info.scope.max(scope);
        if !self.avoid_pixel_shader && info.flags == USED_BY_PIXEL && scope == Some(VERTEX) {
            Some(PIXEL)
        } else {
            scope
        }
    }
}

/// Result of splitting a shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSplit {
    pub output: SplitOutput,
    pub sort: SortMode,
}

/// Splits a shader `main` into material, transform, vertex and pixel parts.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShaderPass {
    pub options: ShaderOptions,
}

impl ShaderPass {
    pub fn new(options: ShaderOptions) -> Self {
        ShaderPass { options }
    }

    pub fn strategy(&self) -> ShaderStrategy {
        ShaderStrategy {
            avoid_pixel_shader: self.options.avoid_pixel_shader,
        }
    }

    pub fn table(&self) -> ScopeTable {
        let front_facing = if self.options.avoid_pixel_shader && self.options.front_facing_is_uniform
        {
            VERTEX
        } else {
            PIXEL
        };
        ScopeTable::new(&["material", "transform", "vertex", "pixel"])
            .root("viewMatrix", MATERIAL, INPUT)
            .root("projectionMatrix", MATERIAL, INPUT)
            .root("viewProjectionMatrix", MATERIAL, INPUT)
            .root("viewport", MATERIAL, INPUT)
            .root("deformer", MATERIAL, INPUT)
            .root("material", MATERIAL, INPUT)
            .root("matrix", TRANSFORM, INPUT)
            .root("objectId", TRANSFORM, INPUT)
            .root("vertex", VERTEX, INPUT)
            .root("s_o", VERTEX, INPUT)
            .root("frontFacing", front_facing, INPUT)
            .root("pointCoord", PIXEL, INPUT)
            .root("fragCoord", PIXEL, INPUT)
            .sink("flip", TRANSFORM, USED_BY_TRANSFORM)
            .sink("pPosition", VERTEX, USED_BY_VERTEX)
            .sink("vPosition", VERTEX, USED_BY_VERTEX)
            .sink("pointSize", VERTEX, USED_BY_VERTEX)
            .sink("discard", PIXEL, USED_BY_PIXEL)
            .sink("output", PIXEL, USED_BY_PIXEL)
            .sink("outputs", PIXEL, USED_BY_PIXEL)
            .transfer(MATERIAL, TRANSFORM, "m2t")
            .transfer(MATERIAL, VERTEX, "m2v")
            .transfer(MATERIAL, PIXEL, "m2p")
            .object_transfer(MATERIAL, PIXEL, "m2po")
            .transfer(TRANSFORM, VERTEX, "t2v")
            .transfer(TRANSFORM, PIXEL, "t2p")
            .transfer(VERTEX, PIXEL, "v2p")
    }
}

/// Classify `sort` into the material stage, keeping the result only if it
/// lands there.
fn classify_sort(classifier: &mut Classifier<'_>) -> Result<SortMode, SplitError> {
    let snapshot = classifier.snapshot();
    let write = classifier.classify_sink("sort", MATERIAL, USED_BY_MATERIAL)?;
    if let Some(SinkWrite {
        scope: Some(MATERIAL),
        ..
    }) = write
    {
        return Ok(SortMode::Material);
    }
    classifier.restore(snapshot);
    let mode = match write {
        None => SortMode::Never,
        Some(SinkWrite {
            value: Value::Const(constant),
            ..
        }) => match constant.as_f64() {
            Some(value) if value == 0.0 => SortMode::Never,
            _ => SortMode::Always,
        },
        Some(_) => SortMode::Always,
    };
    Ok(mode)
}

impl Pass for ShaderPass {
    type Output = ShaderSplit;

    fn kind(&self) -> &'static str {
        "shader"
    }

    fn split(
        &self,
        input: SplitInput<'_>,
        func: &Function,
    ) -> Result<Option<ShaderSplit>, SplitError> {
        if input.interner.lookup(func.name) != "main" {
            return Ok(unexpected(self.kind(), input, func));
        }
        let flipped;
        let func = if self.options.flip_y {
            flipped = flip_y(input.module, func, input.types, input.interner);
            &flipped
        } else {
            func
        };
        let strategy = self.strategy();
        let (output, sort) = split_with(input, func, &self.table(), &strategy, classify_sort)?;
        debug!(?sort, "shader sort mode");
        Ok(Some(ShaderSplit { output, sort }))
    }
}

/// Copy of `func` with the `v` coordinate of every `sample` call replaced by
/// `1 - v`.
pub fn flip_y(
    module: &Module,
    func: &Function,
    types: &TypePool,
    interner: &StringInterner,
) -> Function {
    let mut out = func.clone();
    let Some(sample) = interner.get(SAMPLE).and_then(|name| module.decl_named(name)) else {
        return out;
    };
    let lane = Value::Const(Constant::int(TypeId::INT, 1));
    for id in func.inst_ids() {
        let InstKind::Call {
            callee: Callee::Direct(callee),
            args,
        } = &func.inst(id).kind
        else {
            continue;
        };
        if *callee != sample || args.len() < 2 {
            continue;
        }
        let coord = args[1];
        let coord_ty = module.value_type(func, coord);
        let elem = types.element(coord_ty).unwrap_or(TypeId::FLOAT);
        let v = out.insert_before(
            id,
            elem,
            InstKind::ExtractElement {
                vector: coord,
                index: lane,
            },
        );
        let flipped = out.insert_before(
            id,
            elem,
            InstKind::Binary {
                op: BinaryOp::Sub,
                lhs: Value::Const(Constant::float(elem, 1.0)),
                rhs: Value::Inst(v),
            },
        );
        let coord = out.insert_before(
            id,
            coord_ty,
            InstKind::InsertElement {
                vector: coord,
                scalar: Value::Inst(flipped),
                index: lane,
            },
        );
        let mut args: SmallVec<[Value; 4]> = args.clone();
        args[1] = Value::Inst(coord);
        out.set_kind(
            id,
            InstKind::Call {
                callee: Callee::Direct(*callee),
                args,
            },
        );
    }
    out
}
