//! The embedded `std` module.

use tracing::debug;

use eql_ir::NameGen;

use crate::builder::add_decls;
use crate::schema::DBSchema;
use crate::validity::check_unchecked_modules;

/// DDL source of the standard library.
pub const STD_DDL: &str = include_str!("std.edgeql");

/// A schema holding only the checked `std` module.
pub fn std_schema(names: &NameGen) -> miette::Result<DBSchema> {
    let ddl = eql_parse::parse_ddl(STD_DDL)?;
    let mut schema = DBSchema::new();
    add_decls(&mut schema, names, &["std".to_string()], &ddl)?;
    check_unchecked_modules(&mut schema, names)?;
    debug!(
        entities = schema.module(&["std".to_string()]).map_or(0, |m| m.defs.len()),
        "loaded std"
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModuleState;
    use eql_ir::QualifiedName;

    #[test]
    fn std_loads_and_checks() {
        let names = NameGen::new();
        let s = std_schema(&names).unwrap();
        assert!(matches!(
            s.module_state(&["std".to_string()]),
            Some(ModuleState::Checked(_))
        ));
        assert!(s.func_defs(&QualifiedName::std("count")).is_some());
        assert_eq!(s.func_defs(&QualifiedName::std("+")).map(<[_]>::len), Some(2));
    }

    #[test]
    fn integer_literals_widen_to_float() {
        let names = NameGen::new();
        let s = std_schema(&names).unwrap();
        assert_eq!(
            crate::casts::check_castable(&s, &eql_ir::Tp::int_tp(), &eql_ir::Tp::float_tp()),
            Some(eql_ir::TpCastKind::Implicit)
        );
    }
}
