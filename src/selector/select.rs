//! Branch selection
//!
//! A query against a composite source pins down which branch runs by the
//! fields it touches: the first branch in declaration order whose public
//! field set covers every required field wins. When none does, the error
//! names the fields no branch could supply, so the author sees the real
//! gap instead of the last branch's complaint.

use crate::diagnostics::SourceRange;
use crate::model::{CompositeBranch, CompositeSource};

use super::error::SelectError;

/// Pick the branch a query runs against. `required` is the set of source
/// field names the query references, in first-use order.
pub fn select_branch<'a>(
    composite: &'a CompositeSource,
    required: &[String],
    range: SourceRange,
) -> Result<&'a CompositeBranch, SelectError> {
    for branch in &composite.branches {
        if required.iter().all(|field| branch.exposes(field)) {
            return Ok(branch);
        }
    }

    let missing = required
        .iter()
        .filter(|field| !composite.any_branch_exposes(field))
        .cloned()
        .collect();
    Err(SelectError::NoSatisfyingBranch {
        source: composite.name.clone(),
        missing,
        range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::DataType;
    use crate::model::{StructBase, StructDef};
    use crate::schema::{ColumnShape, RowShape, TableRef};
    use std::sync::Arc;

    fn branch(name: &str, columns: &[&str]) -> CompositeBranch {
        let shape = RowShape::new(
            columns
                .iter()
                .map(|c| ColumnShape::new(*c, DataType::String))
                .collect(),
        );
        CompositeBranch::new(
            Arc::new(StructDef::from_row_shape(
                name,
                StructBase::Table(TableRef::parse(name)),
                "standard",
                &shape,
            )),
            &[],
        )
    }

    fn geo() -> CompositeSource {
        CompositeSource {
            name: "geo".to_string(),
            dialect: "standard".to_string(),
            branches: vec![
                branch("by_state", &["state", "population"]),
                branch("by_county", &["state", "county", "population"]),
            ],
            range: SourceRange::none(),
        }
    }

    fn required(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_later_branch_selected_when_needed() {
        let geo = geo();
        let chosen = select_branch(&geo, &required(&["state", "county"]), SourceRange::none())
            .unwrap();
        assert_eq!(chosen.source.name, "by_county");
    }

    #[test]
    fn test_first_branch_wins_when_both_satisfy() {
        let geo = geo();
        let chosen = select_branch(&geo, &required(&["state"]), SourceRange::none()).unwrap();
        assert_eq!(chosen.source.name, "by_state");
    }

    #[test]
    fn test_no_branch_error_names_unsupplied_fields() {
        let geo = geo();
        let err = select_branch(
            &geo,
            &required(&["state", "city", "population"]),
            SourceRange::none(),
        )
        .unwrap_err();
        match err {
            SelectError::NoSatisfyingBranch { source, missing, .. } => {
                assert_eq!(source, "geo");
                // Only the field no branch exposes is reported
                assert_eq!(missing, vec!["city"]);
            }
        }
    }

    #[test]
    fn test_empty_requirement_selects_first() {
        let geo = geo();
        let chosen = select_branch(&geo, &[], SourceRange::none()).unwrap();
        assert_eq!(chosen.source.name, "by_state");
    }
}
