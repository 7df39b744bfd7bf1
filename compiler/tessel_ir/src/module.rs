//! Modules: global bindings, external declarations and function bodies.

use crate::function::Function;
use crate::ir::{Constant, FuncId, GlobalId, Value};
use crate::name::Name;
use crate::types::TypeId;

/// A named, externally visible binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalDecl {
    pub name: Name,
    pub ty: TypeId,
    pub constant: bool,
    pub initializer: Option<Constant>,
}

impl GlobalDecl {
    /// A mutable binding without initializer.
    pub fn new(name: Name, ty: TypeId) -> Self {
        GlobalDecl {
            name,
            ty,
            constant: false,
            initializer: None,
        }
    }
}

/// Signature of an external function (math builtin, texture sample,
/// effect such as `discard`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: Name,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
}

/// A compilation unit: the source program, or one partition of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    pub name: Name,
    globals: Vec<GlobalDecl>,
    decls: Vec<FunctionDecl>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: Name) -> Self {
        Module {
            name,
            globals: Vec::new(),
            decls: Vec::new(),
            functions: Vec::new(),
        }
    }

    // ── Globals ─────────────────────────────────────────────────────

    /// Add a global binding. Names are not checked for uniqueness; use
    /// [`get_or_insert_global`](Module::get_or_insert_global) for that.
    pub fn add_global(&mut self, decl: GlobalDecl) -> GlobalId {
        let id = GlobalId::from_index(self.globals.len());
        self.globals.push(decl);
        id
    }

    /// Return the binding named `decl.name`, declaring it if absent.
    pub fn get_or_insert_global(&mut self, decl: GlobalDecl) -> GlobalId {
        match self.global_named(decl.name) {
            Some(id) => id,
            None => self.add_global(decl),
        }
    }

    #[inline]
    pub fn global(&self, id: GlobalId) -> &GlobalDecl {
        &self.globals[id.index()]
    }

    pub fn global_named(&self, name: Name) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(GlobalId::from_index)
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalDecl)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId::from_index(i), g))
    }

    #[inline]
    pub fn num_globals(&self) -> usize {
        self.globals.len()
    }

    // ── Declarations ────────────────────────────────────────────────

    /// Declare an external function, reusing an existing declaration of
    /// the same name.
    pub fn declare(&mut self, decl: FunctionDecl) -> FuncId {
        if let Some(id) = self.decl_named(decl.name) {
            return id;
        }
        let id = FuncId::from_index(self.decls.len());
        self.decls.push(decl);
        id
    }

    #[inline]
    pub fn decl(&self, id: FuncId) -> &FunctionDecl {
        &self.decls[id.index()]
    }

    pub fn decl_named(&self, name: Name) -> Option<FuncId> {
        self.decls
            .iter()
            .position(|d| d.name == name)
            .map(FuncId::from_index)
    }

    pub fn decls(&self) -> impl Iterator<Item = (FuncId, &FunctionDecl)> {
        self.decls
            .iter()
            .enumerate()
            .map(|(i, d)| (FuncId::from_index(i), d))
    }

    // ── Bodies ──────────────────────────────────────────────────────

    pub fn function_named(&self, name: Name) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Result type of an operand of `func`.
    pub fn value_type(&self, func: &Function, value: Value) -> TypeId {
        match value {
            Value::Inst(id) => func.inst(id).ty,
            Value::Global(id) => self.global(id).ty,
            Value::Const(c) => c.ty,
        }
    }
}
