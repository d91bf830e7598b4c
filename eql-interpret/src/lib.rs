#![forbid(unsafe_code)]

//! Evaluation of checked EdgeQL against a storage backend.

mod builtins;
mod error;
mod eval;
mod json;
mod session;

pub use builtins::{Builtin, builtin, cast_val};
pub use error::{EvalError, Result};
pub use eval::{Evaluator, Variables, run_expr};
pub use json::{json_to_variables, multiset_to_json, val_to_json};
pub use session::{InterpreterConfig, Session, StorageConfig};
