#![forbid(unsafe_code)]

pub mod card;
pub mod debug;
pub mod expr;
pub mod ops;
pub mod tp;
pub mod val;

pub use card::*;
pub use debug::*;
pub use expr::*;
pub use ops::*;
pub use tp::*;
pub use val::*;

/// Free variable standing for the implicit subject of a leading-dot path.
/// It is replaced during elaboration and must not survive it.
pub const PARTIAL_PATH_NAME: &str = "~dot";

/// Variable-environment key of the query parameter `$name`.
pub fn param_var_name(name: &str) -> String {
    format!("param~{name}")
}
