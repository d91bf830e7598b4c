use indexmap::IndexMap;

use eql_ir::{Expr, FunArgRetType, ModuleName, ObjectTp, QualifiedName, RawName, TpCastKind};

use crate::error::SemanticError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    /// `constraint exclusive` on the named field. Delegated constraints
    /// apply to each subtype separately.
    Exclusive { name: String, delegated: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeBody {
    Object(ObjectTp),
    Scalar,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub body: TypeBody,
    pub is_abstract: bool,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Vec<String>>,
}

impl TypeDef {
    pub fn object(&self) -> Option<&ObjectTp> {
        match &self.body {
            TypeBody::Object(o) => Some(o),
            TypeBody::Scalar => None,
        }
    }

    pub fn is_exclusive(&self, field: &str) -> bool {
        self.constraints
            .iter()
            .any(|Constraint::Exclusive { name, .. }| name == field)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FuncImpl {
    Builtin,
    /// One nested `Expr::Binding` per parameter, outermost first.
    Defined(Expr),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncDef {
    pub tp: FunArgRetType,
    pub body: FuncImpl,
    /// Default argument expressions keyed by parameter label.
    pub defaults: IndexMap<String, Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleEntity {
    TypeDef(TypeDef),
    FuncDefs(Vec<FuncDef>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DBModule {
    pub defs: IndexMap<String, ModuleEntity>,
}

/// Modules move from `Unchecked` to `Checked` once the validity pass
/// succeeds, and back only through [`DBSchema::reopen_module`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleState {
    Unchecked(DBModule),
    Checked(DBModule),
}

impl ModuleState {
    pub fn module(&self) -> &DBModule {
        match self {
            ModuleState::Unchecked(m) | ModuleState::Checked(m) => m,
        }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self, ModuleState::Checked(_))
    }
}

/// A cast declared in a module that has not been validated yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UncheckedCast {
    pub module: ModuleName,
    pub from: RawName,
    pub to: RawName,
    pub kind: TpCastKind,
}

#[derive(Clone, Debug, Default)]
pub struct DBSchema {
    modules: IndexMap<ModuleName, ModuleState>,
    /// Direct supertypes of every type in a checked module.
    pub subtyping: IndexMap<QualifiedName, Vec<QualifiedName>>,
    /// Declared bases of unchecked types; resolved relative to the module
    /// of the key.
    pub unchecked_subtyping: IndexMap<QualifiedName, Vec<RawName>>,
    pub casts: IndexMap<(QualifiedName, QualifiedName), TpCastKind>,
    pub unchecked_casts: Vec<UncheckedCast>,
}

impl DBSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self, name: &[String]) -> Option<&DBModule> {
        self.modules.get(name).map(ModuleState::module)
    }

    pub fn module_state(&self, name: &[String]) -> Option<&ModuleState> {
        self.modules.get(name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &ModuleName> {
        self.modules.keys()
    }

    pub fn unchecked_module_names(&self) -> Vec<ModuleName> {
        self.modules
            .iter()
            .filter(|(_, st)| !st.is_checked())
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Opens (or creates) a module for adding declarations.
    pub fn unchecked_module_mut(&mut self, name: &[String]) -> Result<&mut DBModule, SemanticError> {
        let state = self
            .modules
            .entry(name.to_vec())
            .or_insert_with(|| ModuleState::Unchecked(DBModule::default()));
        match state {
            ModuleState::Unchecked(m) => Ok(m),
            ModuleState::Checked(_) => Err(SemanticError::schema(format!(
                "module {} is already checked; reopen it before adding declarations",
                name.join("::")
            ))),
        }
    }

    pub(crate) fn set_module(&mut self, name: ModuleName, state: ModuleState) {
        self.modules.insert(name, state);
    }

    /// Marks an unchecked module as validated.
    pub(crate) fn mark_checked(&mut self, name: &[String]) {
        if let Some(state) = self.modules.get_mut(name) {
            if let ModuleState::Unchecked(m) = state {
                *state = ModuleState::Checked(std::mem::take(m));
            }
        }
    }

    pub(crate) fn unchecked_type_def_mut(&mut self, name: &QualifiedName) -> Option<&mut TypeDef> {
        match self.modules.get_mut(name.module())? {
            ModuleState::Unchecked(m) => match m.defs.get_mut(name.last())? {
                ModuleEntity::TypeDef(t) => Some(t),
                ModuleEntity::FuncDefs(_) => None,
            },
            ModuleState::Checked(_) => None,
        }
    }

    pub(crate) fn unchecked_func_defs_mut(&mut self, name: &QualifiedName) -> Option<&mut Vec<FuncDef>> {
        match self.modules.get_mut(name.module())? {
            ModuleState::Unchecked(m) => match m.defs.get_mut(name.last())? {
                ModuleEntity::FuncDefs(fs) => Some(fs),
                ModuleEntity::TypeDef(_) => None,
            },
            ModuleState::Checked(_) => None,
        }
    }

    /// Moves a checked module back to the unchecked partition so that it
    /// can be extended and validated again.
    pub fn reopen_module(&mut self, name: &[String]) -> Result<(), SemanticError> {
        let Some(state) = self.modules.get_mut(name) else {
            return Err(SemanticError::resolve(format!(
                "no module named {}",
                name.join("::")
            )));
        };
        if let ModuleState::Checked(m) = state {
            let module = std::mem::take(m);
            for (tname, _) in module.defs.iter().filter(|(_, e)| matches!(e, ModuleEntity::TypeDef(_))) {
                let qn = QualifiedName::in_module(name, tname);
                if let Some(bases) = self.subtyping.shift_remove(&qn) {
                    self.unchecked_subtyping
                        .insert(qn, bases.into_iter().map(RawName::Qualified).collect());
                }
            }
            *state = ModuleState::Unchecked(module);
        }
        Ok(())
    }

    pub fn lookup(&self, name: &QualifiedName) -> Option<&ModuleEntity> {
        self.module(name.module())?.defs.get(name.last())
    }

    pub fn type_def(&self, name: &QualifiedName) -> Option<&TypeDef> {
        match self.lookup(name)? {
            ModuleEntity::TypeDef(t) => Some(t),
            ModuleEntity::FuncDefs(_) => None,
        }
    }

    pub fn object_fields(&self, name: &QualifiedName) -> Option<&ObjectTp> {
        self.type_def(name)?.object()
    }

    pub fn func_defs(&self, name: &QualifiedName) -> Option<&[FuncDef]> {
        match self.lookup(name)? {
            ModuleEntity::FuncDefs(fs) => Some(fs),
            ModuleEntity::TypeDef(_) => None,
        }
    }

    /// Every type definition across all modules, checked or not.
    pub fn type_defs(&self) -> impl Iterator<Item = (QualifiedName, &TypeDef)> {
        self.modules.iter().flat_map(|(mname, st)| {
            st.module().defs.iter().filter_map(move |(n, e)| match e {
                ModuleEntity::TypeDef(t) => Some((QualifiedName::in_module(mname, n), t)),
                ModuleEntity::FuncDefs(_) => None,
            })
        })
    }

    pub fn is_object_type(&self, name: &QualifiedName) -> bool {
        self.object_fields(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_modules_reject_new_declarations_until_reopened() {
        let mut schema = DBSchema::new();
        let m = vec!["default".to_string()];
        schema.unchecked_module_mut(&m).unwrap();
        let module = schema.module(&m).cloned().unwrap();
        schema.set_module(m.clone(), ModuleState::Checked(module));
        assert!(schema.unchecked_module_mut(&m).is_err());
        schema.reopen_module(&m).unwrap();
        assert!(schema.unchecked_module_mut(&m).is_ok());
    }
}
