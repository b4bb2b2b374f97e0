//! Model building
//!
//! Walks a document's source definitions and resolves each into a
//! `StructDef` or `CompositeSource`, in dependency order via the source
//! arena. Building never fail-fasts: a source that cannot be resolved is
//! marked failed, its diagnostics are reported once, and later references
//! to it skip quietly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{FieldDecl, SourceBase, SourceDef, Statement};
use crate::checker::check_expr;
use crate::diagnostics::{DiagnosticCode, DiagnosticLog, SourceRange};
use crate::dialect::DialectRegistry;
use crate::model::{
    CompositeBranch, CompositeSource, ExprField, FieldDef, Model, SourceArena, SourceEntry,
    SourceId, SourceSlot, StructBase, StructDef, TurtleField,
};
use crate::resolver::Scope;
use crate::schema::SchemaStore;

use super::join::build_join;

/// Resolve every source and query declaration into a `Model`.
///
/// All table shapes the statements need must already be settled in the
/// schema store; the translation driver guarantees that before calling.
pub fn build_model(
    statements: &[Statement],
    store: &SchemaStore,
    dialects: &DialectRegistry,
    log: &mut DiagnosticLog,
) -> Model {
    let mut builder = ModelBuilder {
        arena: SourceArena::new(),
        defs: HashMap::new(),
        order: vec![],
        store,
        dialects,
        log,
    };

    let mut queries = vec![];
    for statement in statements {
        match statement {
            Statement::Import { .. } => {
                // Imports were flattened into the statement list by the driver
            }
            Statement::Source(def) => builder.declare(def),
            Statement::Query(query) => {
                if queries.iter().any(|q: &crate::ast::QueryDef| q.name == query.name) {
                    builder.log.error(
                        DiagnosticCode::NameCollision,
                        format!("Query '{}' is already defined", query.name),
                        query.range,
                    );
                } else {
                    queries.push(query.clone());
                }
            }
        }
    }

    for name in builder.order.clone() {
        builder.ensure(&name);
    }

    let mut model = Model::new();
    for name in &builder.order {
        let id = match builder.arena.id_of(name) {
            Some(id) => id,
            None => continue,
        };
        match builder.arena.slot(id) {
            SourceSlot::Struct(s) => model.sources.push(SourceEntry::Struct(s.clone())),
            SourceSlot::Composite(c) => model.sources.push(SourceEntry::Composite(c.clone())),
            // Failed sources stay known by name so queries over them do
            // not pile unknown-source errors on top of the build failure
            SourceSlot::Failed => model.failed_sources.push(name.clone()),
            SourceSlot::Pending | SourceSlot::InProgress => {}
        }
    }
    model.queries = queries;
    model
}

struct ModelBuilder<'a> {
    arena: SourceArena,
    defs: HashMap<String, SourceDef>,
    /// Declaration order of successfully registered names
    order: Vec<String>,
    store: &'a SchemaStore,
    dialects: &'a DialectRegistry,
    log: &'a mut DiagnosticLog,
}

impl ModelBuilder<'_> {
    fn declare(&mut self, def: &SourceDef) {
        match self.arena.register(&def.name) {
            Some(_) => {
                self.defs.insert(def.name.clone(), def.clone());
                self.order.push(def.name.clone());
            }
            None => {
                self.log.error(
                    DiagnosticCode::NameCollision,
                    format!("Source '{}' is already defined", def.name),
                    def.range,
                );
            }
        }
    }

    /// Build a source by name if it is not settled yet. Forward references
    /// recurse; re-entering an in-progress slot is a definition cycle.
    fn ensure(&mut self, name: &str) -> Option<SourceId> {
        let id = self.arena.id_of(name)?;
        if self.arena.is_settled(id) {
            return Some(id);
        }
        let def = match self.defs.get(name) {
            Some(def) => def.clone(),
            None => return Some(id),
        };
        if !self.arena.begin(id) {
            self.log.error(
                DiagnosticCode::CircularSourceDefinition,
                format!("Source '{}' is defined in terms of itself", name),
                def.range,
            );
            self.arena.fail(id);
            return Some(id);
        }

        match &def.base {
            SourceBase::Composite(branches) => {
                match self.build_composite(&def, branches) {
                    Some(composite) => {
                        tracing::debug!(source = %def.name, branches = composite.branches.len(), "built composite source");
                        self.arena.finish_composite(id, Arc::new(composite));
                    }
                    None => self.arena.fail(id),
                }
            }
            _ => match self.build_struct(&def) {
                Some(struct_def) => {
                    tracing::debug!(source = %def.name, fields = struct_def.fields.len(), "built source struct");
                    self.arena.finish_struct(id, Arc::new(struct_def));
                }
                None => self.arena.fail(id),
            },
        }
        Some(id)
    }

    /// Look up a finished plain struct, building it on demand. None when
    /// the name is unknown, failed, or names a composite.
    fn built_struct(&mut self, name: &str, range: SourceRange) -> Option<Arc<StructDef>> {
        match self.ensure(name) {
            Some(id) => match self.arena.slot(id) {
                SourceSlot::Struct(s) => Some(s.clone()),
                // Failed sources already reported their diagnostics
                SourceSlot::Failed => None,
                SourceSlot::Composite(_) => {
                    self.log.error(
                        DiagnosticCode::NameNotFound,
                        format!("'{}' is a composite source and cannot be used here", name),
                        range,
                    );
                    None
                }
                _ => None,
            },
            None => {
                self.log.error(
                    DiagnosticCode::NameNotFound,
                    format!("Source '{}' is not defined", name),
                    range,
                );
                None
            }
        }
    }

    fn dialect_tag(&self, def: &SourceDef, inherited: Option<&str>) -> String {
        def.dialect
            .clone()
            .or_else(|| inherited.map(|s| s.to_string()))
            .unwrap_or_else(|| self.dialects.default_tag().to_string())
    }

    fn build_struct(&mut self, def: &SourceDef) -> Option<StructDef> {
        let mut struct_def = match &def.base {
            SourceBase::Table(table) => {
                if let Some(message) = self.store.fetch_error(table) {
                    let message = message.to_string();
                    self.log.error(
                        DiagnosticCode::SchemaFetchFailed,
                        format!("Could not fetch schema for table '{}': {}", table, message),
                        def.range,
                    );
                    return None;
                }
                let shape = match self.store.get(table) {
                    Some(shape) => shape.clone(),
                    None => {
                        self.log.error(
                            DiagnosticCode::SchemaFetchFailed,
                            format!("No schema available for table '{}'", table),
                            def.range,
                        );
                        return None;
                    }
                };
                StructDef::from_row_shape(
                    &def.name,
                    StructBase::Table(table.clone()),
                    self.dialect_tag(def, None),
                    &shape,
                )
            }
            SourceBase::Sql {
                connection,
                select,
                columns,
            } => {
                let shape = crate::schema::RowShape::new(columns.clone());
                StructDef::from_row_shape(
                    &def.name,
                    StructBase::Sql {
                        connection: connection.clone(),
                        select: select.clone(),
                    },
                    self.dialect_tag(def, None),
                    &shape,
                )
            }
            SourceBase::Extend(parent_name) => {
                let parent = self.built_struct(parent_name, def.range)?;
                let mut child = StructDef::new(
                    &def.name,
                    parent.base.clone(),
                    self.dialect_tag(def, Some(&parent.dialect)),
                );
                child.primary_key = parent.primary_key.clone();
                child.fields = parent.fields.clone();
                child
            }
            SourceBase::Composite(_) => unreachable!("composites built separately"),
        };

        self.apply_wildcards(&mut struct_def, def);
        self.apply_fields(&mut struct_def, def);

        match &def.primary_key {
            Some(pk) if struct_def.has_field(pk) => {
                struct_def.primary_key = Some(pk.clone());
            }
            Some(pk) => {
                self.log.error(
                    DiagnosticCode::NameNotFound,
                    format!("Primary key '{}' is not a field of '{}'", pk, def.name),
                    def.range,
                );
            }
            None => {}
        }

        Some(struct_def)
    }

    /// Apply the accept/except keep and drop lists to the base or
    /// inherited fields, before local declarations land.
    fn apply_wildcards(&mut self, struct_def: &mut StructDef, def: &SourceDef) {
        if let Some(accept) = &def.accept {
            for name in accept {
                if !struct_def.has_field(name) {
                    self.log.warn(
                        DiagnosticCode::NameNotFound,
                        format!("accept names '{}', which is not a field of '{}'", name, def.name),
                        def.range,
                    );
                }
            }
            struct_def.fields.retain(|f| accept.iter().any(|a| a == f.name()));
        }
        if let Some(except) = &def.except {
            for name in except {
                if !struct_def.has_field(name) {
                    self.log.warn(
                        DiagnosticCode::NameNotFound,
                        format!("except names '{}', which is not a field of '{}'", name, def.name),
                        def.range,
                    );
                }
            }
            struct_def.fields.retain(|f| !except.iter().any(|e| e == f.name()));
        }
    }

    /// Apply local field declarations in order. Each declaration sees the
    /// fields declared before it.
    fn apply_fields(&mut self, struct_def: &mut StructDef, def: &SourceDef) {
        for decl in &def.fields {
            match decl {
                FieldDecl::Rename { to, from, range } => {
                    if struct_def.has_field(to) {
                        self.log.error(
                            DiagnosticCode::NameCollision,
                            format!("Cannot rename '{}' to '{}': '{}' is already defined", from, to, to),
                            *range,
                        );
                        continue;
                    }
                    if !rename_field(struct_def, from, to) {
                        self.log.error(
                            DiagnosticCode::NameNotFound,
                            format!("Cannot rename '{}': it is not a field of '{}'", from, def.name),
                            *range,
                        );
                    }
                }
                FieldDecl::Dimension(field) => {
                    self.add_expr_field(struct_def, field, false);
                }
                FieldDecl::Measure(field) => {
                    self.add_expr_field(struct_def, field, true);
                }
                FieldDecl::Join(join_decl) => {
                    let target = match self.built_struct(&join_decl.source, join_decl.range) {
                        Some(target) => target,
                        None => continue,
                    };
                    if let Some(join) = build_join(struct_def, join_decl, target, self.log) {
                        if !struct_def.add_field(FieldDef::Join(join)) {
                            self.log.error(
                                DiagnosticCode::NameCollision,
                                format!("'{}' is already defined in '{}'", join_decl.name, def.name),
                                join_decl.range,
                            );
                        }
                    }
                }
                FieldDecl::Turtle(turtle) => {
                    let added = struct_def.add_field(FieldDef::Turtle(TurtleField {
                        name: turtle.name.clone(),
                        stages: turtle.stages.clone(),
                        range: turtle.range,
                    }));
                    if !added {
                        self.log.error(
                            DiagnosticCode::NameCollision,
                            format!("'{}' is already defined in '{}'", turtle.name, def.name),
                            turtle.range,
                        );
                    }
                }
            }
        }
    }

    fn add_expr_field(
        &mut self,
        struct_def: &mut StructDef,
        field: &crate::ast::ExprFieldDecl,
        measure: bool,
    ) {
        let scope = Scope::of_source(struct_def);
        let typed = match check_expr(&field.expr, &scope) {
            Ok(typed) => typed,
            Err(err) => {
                self.log.report(err.into_diagnostic());
                return;
            }
        };

        if measure && !typed.ty.is_aggregate() {
            self.log.error(
                DiagnosticCode::TypeMismatch,
                format!("Measure '{}' must be an aggregate expression", field.name),
                field.range,
            );
            return;
        }
        if !measure && typed.ty.is_aggregate() {
            self.log.error(
                DiagnosticCode::TypeMismatch,
                format!("Dimension '{}' cannot be an aggregate expression", field.name),
                field.range,
            );
            return;
        }

        let expr_field = ExprField {
            name: field.name.clone(),
            expr: Some(typed.ir),
            ty: typed.ty,
            range: field.range,
        };
        let added = struct_def.add_field(if measure {
            FieldDef::Measure(expr_field)
        } else {
            FieldDef::Dimension(expr_field)
        });
        if !added {
            self.log.error(
                DiagnosticCode::NameCollision,
                format!("'{}' is already defined in '{}'", field.name, struct_def.name),
                field.range,
            );
        }
    }

    fn build_composite(
        &mut self,
        def: &SourceDef,
        branch_defs: &[crate::ast::BranchDef],
    ) -> Option<CompositeSource> {
        let mut branches = vec![];
        for branch_def in branch_defs {
            let target = match self.built_struct(&branch_def.source, branch_def.range) {
                Some(target) => target,
                None => continue,
            };
            branches.push(CompositeBranch::new(target, &branch_def.internal));
        }
        if branches.is_empty() {
            self.log.error(
                DiagnosticCode::NameNotFound,
                format!("Composite source '{}' has no usable branches", def.name),
                def.range,
            );
            return None;
        }

        // Shared public names must agree on data type across branches, so
        // a query means the same thing no matter which branch is selected.
        for (i, left) in branches.iter().enumerate() {
            for right in &branches[i + 1..] {
                for name in &left.public_fields {
                    if !right.exposes(name) {
                        continue;
                    }
                    let lt = left.source.get_field(name).map(|f| f.type_desc().data_type);
                    let rt = right.source.get_field(name).map(|f| f.type_desc().data_type);
                    if let (Some(lt), Some(rt)) = (lt, rt) {
                        if lt != rt {
                            self.log.error(
                                DiagnosticCode::TypeMismatch,
                                format!(
                                    "Composite '{}': field '{}' is {} in '{}' but {} in '{}'",
                                    def.name, name, lt, left.source.name, rt, right.source.name
                                ),
                                def.range,
                            );
                        }
                    }
                }
            }
        }

        let dialect = def
            .dialect
            .clone()
            .unwrap_or_else(|| branches[0].source.dialect.clone());
        Some(CompositeSource {
            name: def.name.clone(),
            dialect,
            branches,
            range: def.range,
        })
    }
}

/// Rename a field in place, preserving declaration order. False when
/// `from` does not exist.
///
/// A physical field keeps reading its original column, and definitions
/// declared before the rename are rewritten to the new name.
fn rename_field(struct_def: &mut StructDef, from: &str, to: &str) -> bool {
    let mut found = false;
    for field in &mut struct_def.fields {
        if field.name() != from {
            continue;
        }
        match field {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => {
                if f.expr.is_none() {
                    f.expr = Some(crate::model::ExprIr::Column(from.to_string()));
                }
                f.name = to.to_string();
            }
            FieldDef::Join(j) => j.name = to.to_string(),
            FieldDef::Turtle(t) => t.name = to.to_string(),
            FieldDef::Repeated(r) => r.name = to.to_string(),
        }
        found = true;
        break;
    }
    if !found {
        return false;
    }

    if struct_def.primary_key.as_deref() == Some(from) {
        struct_def.primary_key = Some(to.to_string());
    }
    for field in &mut struct_def.fields {
        match field {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => {
                if let Some(expr) = &mut f.expr {
                    expr.rename_head(from, to);
                }
            }
            FieldDef::Join(j) => {
                if let Some(on) = &mut j.on {
                    on.rename_head(from, to);
                }
                if let Some(with) = &mut j.with {
                    with.rename_head(from, to);
                }
            }
            FieldDef::Turtle(_) | FieldDef::Repeated(_) => {}
        }
    }
    true
}
