//! Join construction and key validation

use std::sync::Arc;

use crate::ast::JoinDecl;
use crate::checker::check_expr;
use crate::diagnostics::{DiagnosticCode, DiagnosticLog};
use crate::model::types::DataType;
use crate::model::{FieldDef, JoinField, StructDef};
use crate::resolver::Scope;

/// Resolve one join declaration against the partially-built parent.
/// Returns None (after reporting) when the join is unusable; the parent
/// keeps building without it.
pub fn build_join(
    parent: &StructDef,
    decl: &JoinDecl,
    target: Arc<StructDef>,
    log: &mut DiagnosticLog,
) -> Option<JoinField> {
    let mut join = JoinField {
        name: decl.name.clone(),
        source: target,
        kind: decl.kind,
        on: None,
        with: None,
        range: decl.range,
    };

    if let Some(on_expr) = &decl.on {
        // The condition sees both sides: parent fields directly, target
        // fields through the join name (or unqualified when unambiguous).
        let mut both_sides = parent.clone();
        both_sides.add_field(FieldDef::Join(join.clone()));
        let scope = Scope::of_source(&both_sides);
        match check_expr(on_expr, &scope) {
            Ok(typed) if typed.ty.data_type == DataType::Boolean => {
                join.on = Some(typed.ir);
            }
            Ok(typed) => {
                log.error(
                    DiagnosticCode::TypeMismatch,
                    format!(
                        "Join condition for '{}' must be boolean, found {}",
                        decl.name, typed.ty.data_type
                    ),
                    on_expr.range,
                );
                return None;
            }
            Err(err) => {
                log.report(err.into_diagnostic());
                return None;
            }
        }
    }

    if let Some(with_expr) = &decl.with {
        let pk_name = match &join.source.primary_key {
            Some(pk) => pk.clone(),
            None => {
                log.error(
                    DiagnosticCode::JoinKeyInvalid,
                    format!(
                        "Join '{}' uses 'with', but source '{}' declares no primary key",
                        decl.name, join.source.name
                    ),
                    decl.range,
                );
                return None;
            }
        };
        let pk_type = match join.source.get_field(&pk_name) {
            Some(field) => field.type_desc().data_type,
            None => {
                log.error(
                    DiagnosticCode::JoinKeyInvalid,
                    format!(
                        "Primary key '{}' is not a field of '{}'",
                        pk_name, join.source.name
                    ),
                    decl.range,
                );
                return None;
            }
        };

        // The key expression is evaluated on the parent side only
        let scope = Scope::of_source(parent);
        match check_expr(with_expr, &scope) {
            Ok(typed) if typed.ty.data_type == pk_type => {
                join.with = Some(typed.ir);
            }
            Ok(typed) => {
                log.error(
                    DiagnosticCode::JoinKeyInvalid,
                    format!(
                        "Join key for '{}' is {}, but primary key '{}' is {}",
                        decl.name, typed.ty.data_type, pk_name, pk_type
                    ),
                    with_expr.range,
                );
                return None;
            }
            Err(err) => {
                log.report(err.into_diagnostic());
                return None;
            }
        }
    }

    Some(join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::diagnostics::SourceRange;
    use crate::model::{JoinKind, StructBase};
    use crate::schema::{ColumnShape, RowShape, TableRef};

    fn struct_of(name: &str, columns: &[(&str, DataType)]) -> StructDef {
        let shape = RowShape::new(
            columns
                .iter()
                .map(|(n, t)| ColumnShape::new(*n, *t))
                .collect(),
        );
        StructDef::from_row_shape(
            name,
            StructBase::Table(TableRef::parse(name)),
            "standard",
            &shape,
        )
    }

    fn decl(name: &str, source: &str) -> JoinDecl {
        JoinDecl {
            name: name.to_string(),
            source: source.to_string(),
            kind: JoinKind::One,
            on: None,
            with: None,
            range: SourceRange::none(),
        }
    }

    #[test]
    fn test_on_condition_sees_both_sides() {
        let flights = struct_of("flights", &[("carrier", DataType::String)]);
        let carriers = struct_of("carriers", &[("code", DataType::String)]);
        let mut d = decl("carriers", "carriers");
        d.on = Some(Expr::field(["carrier"]).eq(Expr::field(["carriers", "code"])));

        let mut log = DiagnosticLog::new();
        let join = build_join(&flights, &d, Arc::new(carriers), &mut log).unwrap();
        assert!(!log.has_errors());
        assert!(join.on.is_some());
    }

    #[test]
    fn test_non_boolean_condition_rejected() {
        let flights = struct_of("flights", &[("carrier", DataType::String)]);
        let carriers = struct_of("carriers", &[("code", DataType::String)]);
        let mut d = decl("carriers", "carriers");
        d.on = Some(Expr::field(["carrier"]));

        let mut log = DiagnosticLog::new();
        assert!(build_join(&flights, &d, Arc::new(carriers), &mut log).is_none());
        assert_eq!(log.entries()[0].code, DiagnosticCode::TypeMismatch);
    }

    #[test]
    fn test_with_requires_primary_key() {
        let flights = struct_of("flights", &[("carrier", DataType::String)]);
        let carriers = struct_of("carriers", &[("code", DataType::String)]);
        let mut d = decl("carriers", "carriers");
        d.with = Some(Expr::field(["carrier"]));

        let mut log = DiagnosticLog::new();
        assert!(build_join(&flights, &d, Arc::new(carriers), &mut log).is_none());
        assert_eq!(log.entries()[0].code, DiagnosticCode::JoinKeyInvalid);
    }

    #[test]
    fn test_with_key_type_must_match_primary_key() {
        let flights = struct_of("flights", &[("carrier_id", DataType::Number)]);
        let mut carriers = struct_of("carriers", &[("code", DataType::String)]);
        carriers.primary_key = Some("code".to_string());
        let mut d = decl("carriers", "carriers");
        d.with = Some(Expr::field(["carrier_id"]));

        let mut log = DiagnosticLog::new();
        assert!(build_join(&flights, &d, Arc::new(carriers), &mut log).is_none());
        assert_eq!(log.entries()[0].code, DiagnosticCode::JoinKeyInvalid);
    }

    #[test]
    fn test_with_key_accepted() {
        let flights = struct_of("flights", &[("carrier", DataType::String)]);
        let mut carriers = struct_of("carriers", &[("code", DataType::String)]);
        carriers.primary_key = Some("code".to_string());
        let mut d = decl("carriers", "carriers");
        d.with = Some(Expr::field(["carrier"]));

        let mut log = DiagnosticLog::new();
        let join = build_join(&flights, &d, Arc::new(carriers), &mut log).unwrap();
        assert!(!log.has_errors());
        assert!(join.with.is_some());
        assert!(join.on.is_none());
    }
}
