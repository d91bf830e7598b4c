use std::path::{Path, PathBuf};

use miette::{IntoDiagnostic, miette};
use tracing::{debug, info};

use eql_core::{DBSchema, DEFAULT_MODULE, DEFAULT_OPEN_SCOPES, Prepared, std_schema};
use eql_ir::{MultiSet, NameGen};
use eql_storage::{EdgeDatabase, SqliteStorage};

use crate::eval::{Variables, run_expr};
use crate::json::{json_to_variables, multiset_to_json};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    /// A database file, or `:memory:` for a private in-memory SQLite database.
    Sqlite { path: PathBuf },
}

#[derive(Clone, Debug)]
pub struct InterpreterConfig {
    pub default_module: String,
    pub open_scopes: Vec<String>,
    pub factor_paths: bool,
    /// Render singular results as one-element arrays.
    pub top_level_array: bool,
    pub storage: StorageConfig,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            default_module: DEFAULT_MODULE.to_string(),
            open_scopes: DEFAULT_OPEN_SCOPES.iter().map(|s| s.to_string()).collect(),
            factor_paths: true,
            top_level_array: false,
            storage: StorageConfig::Memory,
        }
    }
}

/// A schema plus a database, and the prepare/run pipeline between them.
pub struct Session {
    config: InterpreterConfig,
    schema: DBSchema,
    db: EdgeDatabase,
    names: NameGen,
}

impl Session {
    /// Opens a session with the standard library loaded and `sdl`, if
    /// given, added to the default module.
    ///
    /// A SQLite database remembers the schema it was created with: reopening
    /// it with `None` reuses the stored schema, and reopening it with a
    /// different one fails.
    pub fn new(config: InterpreterConfig, sdl: Option<&str>) -> miette::Result<Session> {
        if config.open_scopes.iter().map(String::as_str).ne(DEFAULT_OPEN_SCOPES.iter().copied()) {
            return Err(miette!(
                "unsupported open scopes {:?}; only {:?} can be opened implicitly",
                config.open_scopes,
                DEFAULT_OPEN_SCOPES
            ));
        }
        let names = NameGen::new();
        let mut schema = std_schema(&names)?;
        let module = vec![config.default_module.clone()];

        let db = match &config.storage {
            StorageConfig::Memory => {
                if let Some(sdl) = sdl {
                    eql_core::add_sdl(&mut schema, &names, &module, sdl)?;
                }
                EdgeDatabase::in_memory()
            }
            StorageConfig::Sqlite { path } => {
                let opener = SqliteStorage::open(path, sdl)?;
                if !opener.sdl().trim().is_empty() {
                    eql_core::add_sdl(&mut schema, &names, &module, opener.sdl())?;
                }
                EdgeDatabase::new(Box::new(opener.finish(&schema)?))
            }
        };
        info!(storage = ?config.storage, module = %config.default_module, "session opened");
        Ok(Session {
            config,
            schema,
            db,
            names,
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn schema(&self) -> &DBSchema {
        &self.schema
    }

    pub fn database(&self) -> &EdgeDatabase {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut EdgeDatabase {
        &mut self.db
    }

    fn module(&self) -> Vec<String> {
        vec![self.config.default_module.clone()]
    }

    fn ensure_schema_mutable(&self) -> miette::Result<()> {
        match &self.config.storage {
            StorageConfig::Memory => Ok(()),
            StorageConfig::Sqlite { path } => Err(miette!(
                "the schema of {} is fixed once the database is open",
                path.display()
            )),
        }
    }

    pub fn add_sdl(&mut self, sdl: &str) -> miette::Result<()> {
        self.ensure_schema_mutable()?;
        let module = self.module();
        eql_core::add_sdl(&mut self.schema, &self.names, &module, sdl)
    }

    pub fn add_ddl(&mut self, ddl: &str) -> miette::Result<()> {
        self.ensure_schema_mutable()?;
        eql_core::add_ddl(&mut self.schema, &self.names, ddl)
    }

    pub fn add_ddl_file(&mut self, path: &Path) -> miette::Result<()> {
        debug!(path = %path.display(), "loading ddl");
        let text = std::fs::read_to_string(path).into_diagnostic()?;
        self.add_ddl(&text)
    }

    /// Loads every `*.edgeql` file of `dir` in name order. Files whose name
    /// starts with `_` are skipped.
    pub fn add_ddl_dir(&mut self, dir: &Path) -> miette::Result<()> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).into_diagnostic()? {
            let path = entry.into_diagnostic()?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.extension().is_some_and(|e| e == "edgeql") && !name.starts_with('_') {
                files.push(path);
            }
        }
        files.sort();
        for f in files {
            self.add_ddl_file(&f)?;
        }
        Ok(())
    }

    /// Moves a checked module back to the unchecked state so that further
    /// declarations can be added to it.
    pub fn reopen_module(&mut self, module: &[String]) -> miette::Result<()> {
        self.ensure_schema_mutable()?;
        self.schema.reopen_module(module)?;
        Ok(())
    }

    pub fn prepare_statement(&self, query: &eql_ast::Query) -> miette::Result<Prepared> {
        let prepared = eql_core::prepare(
            &self.schema,
            &self.names,
            &self.module(),
            self.config.factor_paths,
            query,
        )?;
        Ok(prepared)
    }

    /// Evaluates a prepared statement and commits its writes.
    pub fn run_prepared_statement(
        &mut self,
        prepared: &Prepared,
        variables: &Variables,
    ) -> miette::Result<MultiSet> {
        Ok(run_expr(&self.schema, &mut self.db, &prepared.expr, variables)?)
    }

    /// Runs a `;`-separated script, one statement after another. Each
    /// statement sees the committed writes of the ones before it.
    pub fn run_str(&mut self, src: &str) -> miette::Result<Vec<MultiSet>> {
        self.run_str_with(src, &Variables::new())
            .map(|rs| rs.into_iter().map(|(_, vals)| vals).collect())
    }

    /// Like [`Session::run_str`], rendering each result as JSON.
    pub fn run_str_json(
        &mut self,
        src: &str,
        variables: &serde_json::Value,
    ) -> miette::Result<Vec<serde_json::Value>> {
        let variables = json_to_variables(variables)?;
        let top_level_array = self.config.top_level_array;
        Ok(self
            .run_str_with(src, &variables)?
            .into_iter()
            .map(|(prepared, vals)| multiset_to_json(&vals, &prepared.tp, top_level_array))
            .collect())
    }

    fn run_str_with(
        &mut self,
        src: &str,
        variables: &Variables,
    ) -> miette::Result<Vec<(Prepared, MultiSet)>> {
        let script = eql_parse::parse_script(src)?;
        let mut out = Vec::with_capacity(script.stmts.len());
        for stmt in &script.stmts {
            let prepared = self.prepare_statement(stmt)?;
            let vals = self.run_prepared_statement(&prepared, variables)?;
            out.push((prepared, vals));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_open_std_in_the_default_module() {
        let config = InterpreterConfig::default();
        assert_eq!(config.default_module, "default");
        assert_eq!(config.open_scopes, vec!["std".to_string()]);
        assert!(config.factor_paths);
        assert!(!config.top_level_array);
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn other_open_scopes_are_rejected() {
        let config = InterpreterConfig {
            open_scopes: vec!["std".into(), "math".into()],
            ..Default::default()
        };
        assert!(Session::new(config, None).is_err());
    }

    #[test]
    fn scripts_see_earlier_statements() {
        let mut s = Session::new(InterpreterConfig::default(), Some("type Item { name: str; }")).unwrap();
        let out = s
            .run_str("INSERT Item { name := 'a' }; INSERT Item { name := 'b' }; SELECT count(Item);")
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], vec![eql_ir::Val::int(2)]);
    }
}
