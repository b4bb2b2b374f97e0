//! Stage compilation
//!
//! Each stage is compiled against exactly one input: the source struct for
//! the first stage, the previous stage's minted output struct after that.
//! Row filters (where) see only the input; group filters (having) and
//! order_by see the stage output first, then the input. Compilation is
//! best-effort: a stage that reports errors is marked failed but still
//! mints an output so later stages can keep checking.

use std::sync::Arc;

use crate::ast::{NestDecl, OpAst, OrderByKey, OrderBySpec, QueryDef, QueryItem, StageAst};
use crate::checker::check_expr;
use crate::diagnostics::{DiagnosticCode, DiagnosticLog, SourceRange};
use crate::model::types::{DataType, TypeDesc};
use crate::model::{ExprField, FieldDef, Model, RepeatedField, SourceEntry, StructBase, StructDef};
use crate::pipeline::{
    CompiledItem, CompiledNest, CompiledOrderBy, CompiledQuery, CompiledStage, StageKind,
    StageStatus,
};
use crate::resolver::{Frame, Scope};
use crate::selector::select_branch;

use super::refine::resolve_refinement;

/// Compile a named query into a pipeline. None (after reporting) when the
/// input source cannot be resolved at all; otherwise a pipeline whose
/// stages record their own success or failure.
pub fn compile_query(
    query: &QueryDef,
    model: &Model,
    log: &mut DiagnosticLog,
) -> Option<CompiledQuery> {
    let query = resolve_refinement(query, model, log)?;

    let input = match model.get_source(&query.source) {
        Some(SourceEntry::Struct(s)) => s.clone(),
        Some(SourceEntry::Composite(composite)) => {
            let mut required = vec![];
            if let Some(first) = query.stages.first() {
                collect_required_fields(first, &mut required);
            }
            match select_branch(composite, &required, query.range) {
                Ok(branch) => branch.source.clone(),
                Err(err) => {
                    log.report(err.into_diagnostic());
                    return None;
                }
            }
        }
        None => {
            // A failed source already reported its own build diagnostics
            if !model.is_failed_source(&query.source) {
                log.error(
                    DiagnosticCode::NameNotFound,
                    format!("Query '{}' runs on unknown source '{}'", query.name, query.source),
                    query.range,
                );
            }
            return None;
        }
    };

    let mut stages = vec![];
    let mut stage_input = input.clone();
    for (i, stage_ast) in query.stages.iter().enumerate() {
        let compiled = compile_stage(stage_ast, stage_input.clone(), i, &query.name, model, log);
        stage_input = compiled.output.clone();
        stages.push(compiled);
    }

    if stages.is_empty() {
        log.error(
            DiagnosticCode::InvalidStage,
            format!("Query '{}' has no stages", query.name),
            query.range,
        );
        return None;
    }

    tracing::debug!(query = %query.name, stages = stages.len(), "compiled query pipeline");
    Some(CompiledQuery {
        name: query.name.clone(),
        input,
        stages,
        range: query.range,
    })
}

/// Source field names a stage touches, in first-use order. Drives branch
/// selection for queries against composite sources.
///
/// Names the stage itself mints (group_by, aggregate, project, and nest
/// output names) are not source fields; a having that references them is
/// reading the stage output, so they never count as required.
pub fn collect_required_fields(stage: &StageAst, out: &mut Vec<String>) {
    let mut minted = vec![];
    for op in &stage.ops {
        match op {
            OpAst::GroupBy(items) | OpAst::Aggregate(items) | OpAst::Project(items) => {
                for item in items {
                    if let Some(name) = item.output_name() {
                        minted.push(name.to_string());
                    }
                }
            }
            OpAst::Nest(nests) => {
                for nest in nests {
                    minted.push(nest.name.clone());
                }
            }
            _ => {}
        }
    }

    let mut push = |name: &str| {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    };
    for op in &stage.ops {
        match op {
            OpAst::GroupBy(items) | OpAst::Aggregate(items) | OpAst::Project(items) => {
                for item in items {
                    let mut heads = vec![];
                    item.expr.collect_field_heads(&mut heads);
                    for head in heads {
                        push(head);
                    }
                }
            }
            OpAst::Where(expr) => {
                let mut heads = vec![];
                expr.collect_field_heads(&mut heads);
                for head in heads {
                    push(head);
                }
            }
            OpAst::Having(expr) => {
                let mut heads = vec![];
                expr.collect_field_heads(&mut heads);
                for head in heads {
                    if !minted.iter().any(|n| n == head) {
                        push(head);
                    }
                }
            }
            OpAst::Nest(nests) => {
                for nest in nests {
                    if let Some(turtle) = &nest.turtle {
                        push(turtle);
                    }
                    for inner in &nest.stages {
                        let mut nested = vec![];
                        collect_required_fields(inner, &mut nested);
                        for name in nested {
                            push(&name);
                        }
                    }
                }
            }
            OpAst::Index(spec) => {
                for field in &spec.fields {
                    push(field);
                }
                if let Some(weight) = &spec.weight {
                    push(weight);
                }
            }
            OpAst::OrderBy(_) | OpAst::Limit(_) => {}
        }
    }
}

struct StageCompiler<'a> {
    input: Arc<StructDef>,
    query_name: &'a str,
    stage_index: usize,
    model: &'a Model,
    log: &'a mut DiagnosticLog,
    failed: bool,
    group_by: Vec<CompiledItem>,
    aggregates: Vec<CompiledItem>,
    projects: Vec<CompiledItem>,
    nests: Vec<CompiledNest>,
    wheres: Vec<crate::model::ExprIr>,
    havings: Vec<(crate::ast::Expr, SourceRange)>,
    order_specs: Vec<OrderBySpec>,
    limit: Option<u64>,
    index_fields: Vec<String>,
    index_weight: Option<String>,
}

fn compile_stage(
    stage: &StageAst,
    input: Arc<StructDef>,
    stage_index: usize,
    query_name: &str,
    model: &Model,
    log: &mut DiagnosticLog,
) -> CompiledStage {
    let compiler = StageCompiler {
        input,
        query_name,
        stage_index,
        model,
        log,
        failed: false,
        group_by: vec![],
        aggregates: vec![],
        projects: vec![],
        nests: vec![],
        wheres: vec![],
        havings: vec![],
        order_specs: vec![],
        limit: None,
        index_fields: vec![],
        index_weight: None,
    };
    compiler.run(stage)
}

impl StageCompiler<'_> {
    fn error(&mut self, code: DiagnosticCode, message: String, range: SourceRange) {
        self.log.error(code, message, range);
        self.failed = true;
    }

    fn run(mut self, stage: &StageAst) -> CompiledStage {
        let kind = self.classify(stage);

        for op in &stage.ops {
            match op {
                OpAst::GroupBy(items) => self.compile_items(items, ItemRole::GroupBy, kind),
                OpAst::Aggregate(items) => self.compile_items(items, ItemRole::Aggregate, kind),
                OpAst::Project(items) => self.compile_items(items, ItemRole::Project, kind),
                OpAst::Nest(nests) => self.compile_nests(nests, kind),
                OpAst::Where(expr) => self.compile_where(expr),
                OpAst::Having(expr) => {
                    if kind != StageKind::Reduce {
                        self.error(
                            DiagnosticCode::InvalidStage,
                            "having requires a grouped stage".to_string(),
                            expr.range,
                        );
                        continue;
                    }
                    // Deferred until the output struct exists
                    self.havings.push((expr.clone(), expr.range));
                }
                OpAst::OrderBy(specs) => {
                    // Last order_by wins, matching refinement semantics
                    self.order_specs = specs.clone();
                }
                OpAst::Limit(n) => self.limit = Some(*n),
                OpAst::Index(spec) => self.compile_index(spec),
            }
        }

        if self.group_by.is_empty()
            && self.aggregates.is_empty()
            && self.projects.is_empty()
            && self.nests.is_empty()
            && self.index_fields.is_empty()
        {
            self.error(
                DiagnosticCode::InvalidStage,
                format!("Stage {} of '{}' produces no output", self.stage_index + 1, self.query_name),
                stage.range,
            );
        }

        let output = Arc::new(self.mint_output(kind));
        let havings = self.check_havings(&output);
        let order_by = self.resolve_order_by(&output);

        CompiledStage {
            kind,
            status: if self.failed {
                StageStatus::Failed
            } else {
                StageStatus::Resolved
            },
            group_by: self.group_by,
            aggregates: self.aggregates,
            projects: self.projects,
            nests: self.nests,
            wheres: self.wheres,
            havings,
            order_by,
            limit: self.limit,
            index_fields: self.index_fields,
            index_weight: self.index_weight,
            input: self.input,
            output,
            range: stage.range,
        }
    }

    /// A stage is exactly one of reduce, project, or index. Mixing forms
    /// is reported once and the dominant form keeps compiling.
    fn classify(&mut self, stage: &StageAst) -> StageKind {
        let mut has_reduce = false;
        let mut has_project = false;
        let mut has_index = false;
        for op in &stage.ops {
            match op {
                OpAst::GroupBy(_) | OpAst::Aggregate(_) | OpAst::Nest(_) => has_reduce = true,
                OpAst::Project(_) => has_project = true,
                OpAst::Index(_) => has_index = true,
                _ => {}
            }
        }
        let forms = has_reduce as u8 + has_project as u8 + has_index as u8;
        if forms > 1 {
            self.error(
                DiagnosticCode::InvalidStage,
                format!(
                    "Stage {} of '{}' mixes grouped, projected, and index operations",
                    self.stage_index + 1,
                    self.query_name
                ),
                stage.range,
            );
        }
        if has_index {
            StageKind::Index
        } else if has_project {
            StageKind::Project
        } else {
            StageKind::Reduce
        }
    }

    fn claim_name(&self, name: &str) -> bool {
        !self.group_by.iter().any(|i| i.name == name)
            && !self.aggregates.iter().any(|i| i.name == name)
            && !self.projects.iter().any(|i| i.name == name)
            && !self.nests.iter().any(|n| n.name == name)
    }

    fn compile_items(&mut self, items: &[QueryItem], role: ItemRole, kind: StageKind) {
        if kind == StageKind::Index {
            return;
        }
        for item in items {
            let name = match item.output_name() {
                Some(name) => name.to_string(),
                None => {
                    self.error(
                        DiagnosticCode::InvalidStage,
                        format!("{} item needs a name (use `name is expr`)", role.keyword()),
                        item.range,
                    );
                    continue;
                }
            };
            if !self.claim_name(&name) {
                self.error(
                    DiagnosticCode::NameCollision,
                    format!("Output field '{}' is already defined in this stage", name),
                    item.range,
                );
                continue;
            }

            // Model queries are in scope so using one as a value reports
            // the dedicated error instead of an unknown name
            let scope = Scope::new()
                .with_inner(Frame::Model(self.model))
                .with_inner(Frame::Source(&self.input));
            let typed = match check_expr(&item.expr, &scope) {
                Ok(typed) => typed,
                Err(err) => {
                    self.log.report(err.into_diagnostic());
                    self.failed = true;
                    continue;
                }
            };

            match role {
                ItemRole::GroupBy | ItemRole::Project if typed.ty.is_aggregate() => {
                    self.error(
                        DiagnosticCode::TypeMismatch,
                        format!("{} item '{}' cannot be an aggregate", role.keyword(), name),
                        item.range,
                    );
                    continue;
                }
                ItemRole::Aggregate if !typed.ty.is_aggregate() => {
                    self.error(
                        DiagnosticCode::TypeMismatch,
                        format!("aggregate item '{}' must be an aggregate expression", name),
                        item.range,
                    );
                    continue;
                }
                _ => {}
            }

            let compiled = CompiledItem {
                name,
                ir: typed.ir,
                ty: typed.ty,
                range: item.range,
            };
            match role {
                ItemRole::GroupBy => self.group_by.push(compiled),
                ItemRole::Aggregate => self.aggregates.push(compiled),
                ItemRole::Project => self.projects.push(compiled),
            }
        }
    }

    fn compile_nests(&mut self, nests: &[NestDecl], kind: StageKind) {
        if kind != StageKind::Reduce {
            return;
        }
        for nest in nests {
            if !self.claim_name(&nest.name) {
                self.error(
                    DiagnosticCode::NameCollision,
                    format!("Output field '{}' is already defined in this stage", nest.name),
                    nest.range,
                );
                continue;
            }

            let stages_ast: Vec<StageAst> = if let Some(turtle_name) = &nest.turtle {
                match self.input.get_field(turtle_name) {
                    Some(FieldDef::Turtle(turtle)) => turtle.stages.clone(),
                    Some(_) => {
                        self.error(
                            DiagnosticCode::TypeMismatch,
                            format!("'{}' is not a named view of '{}'", turtle_name, self.input.name),
                            nest.range,
                        );
                        continue;
                    }
                    None => {
                        self.error(
                            DiagnosticCode::NameNotFound,
                            format!("'{}' is not defined in '{}'", turtle_name, self.input.name),
                            nest.range,
                        );
                        continue;
                    }
                }
            } else {
                nest.stages.clone()
            };

            if stages_ast.is_empty() {
                self.error(
                    DiagnosticCode::InvalidStage,
                    format!("nest '{}' has no stages", nest.name),
                    nest.range,
                );
                continue;
            }

            // Nests run against the same input rows as the enclosing stage
            let mut compiled_stages = vec![];
            let mut nest_input = self.input.clone();
            for (i, stage_ast) in stages_ast.iter().enumerate() {
                let compiled = compile_stage(
                    stage_ast,
                    nest_input.clone(),
                    i,
                    self.query_name,
                    self.model,
                    self.log,
                );
                if compiled.status == StageStatus::Failed {
                    self.failed = true;
                }
                nest_input = compiled.output.clone();
                compiled_stages.push(compiled);
            }
            self.nests.push(CompiledNest {
                name: nest.name.clone(),
                stages: compiled_stages,
                range: nest.range,
            });
        }
    }

    fn compile_where(&mut self, expr: &crate::ast::Expr) {
        // Row filters see only the stage input, never the output locals
        let scope = Scope::new()
            .with_inner(Frame::Model(self.model))
            .with_inner(Frame::Source(&self.input));
        match check_expr(expr, &scope) {
            Ok(typed) if typed.ty.data_type == DataType::Boolean => {
                if typed.ty.is_aggregate() {
                    self.error(
                        DiagnosticCode::InvalidStage,
                        "where cannot contain an aggregate; use having".to_string(),
                        expr.range,
                    );
                    return;
                }
                self.wheres.push(typed.ir);
            }
            Ok(typed) => {
                self.error(
                    DiagnosticCode::TypeMismatch,
                    format!("where condition must be boolean, found {}", typed.ty.data_type),
                    expr.range,
                );
            }
            Err(err) => {
                self.log.report(err.into_diagnostic());
                self.failed = true;
            }
        }
    }

    fn compile_index(&mut self, spec: &crate::ast::IndexSpec) {
        for field in &spec.fields {
            match self.input.get_field(field) {
                Some(f) if f.is_dimension() => self.index_fields.push(field.clone()),
                Some(_) => {
                    self.error(
                        DiagnosticCode::TypeMismatch,
                        format!("index field '{}' must be a dimension", field),
                        spec.range,
                    );
                }
                None => {
                    self.error(
                        DiagnosticCode::NameNotFound,
                        format!("index field '{}' is not defined in '{}'", field, self.input.name),
                        spec.range,
                    );
                }
            }
        }
        if let Some(weight) = &spec.weight {
            match self.input.get_field(weight) {
                Some(f) if f.type_desc().data_type.is_numeric() => {
                    self.index_weight = Some(weight.clone());
                }
                Some(f) => {
                    self.error(
                        DiagnosticCode::TypeMismatch,
                        format!(
                            "index weight '{}' must be numeric, found {}",
                            weight,
                            f.type_desc().data_type
                        ),
                        spec.range,
                    );
                }
                None => {
                    self.error(
                        DiagnosticCode::NameNotFound,
                        format!("index weight '{}' is not defined in '{}'", weight, self.input.name),
                        spec.range,
                    );
                }
            }
        }
    }

    /// Mint the stage's output struct. Every output column is a plain
    /// scalar from the next stage's point of view.
    fn mint_output(&self, kind: StageKind) -> StructDef {
        let name = format!("{}__stage{}", self.query_name, self.stage_index);
        let mut output = StructDef::new(name, StructBase::QueryStage, self.input.dialect.clone());

        let scalar_field = |item: &CompiledItem| {
            FieldDef::Dimension(ExprField {
                name: item.name.clone(),
                expr: None,
                ty: TypeDesc::scalar(item.ty.data_type),
                range: item.range,
            })
        };

        match kind {
            StageKind::Reduce => {
                for item in &self.group_by {
                    output.add_field(scalar_field(item));
                }
                for item in &self.aggregates {
                    output.add_field(scalar_field(item));
                }
                for nest in &self.nests {
                    if let Some(shape) = nest.output() {
                        output.add_field(FieldDef::Repeated(RepeatedField {
                            name: nest.name.clone(),
                            shape: shape.clone(),
                            range: nest.range,
                        }));
                    }
                }
            }
            StageKind::Project => {
                for item in &self.projects {
                    output.add_field(scalar_field(item));
                }
            }
            StageKind::Index => {
                // The fixed index shape, regardless of the fields scanned
                for (name, data_type) in [
                    ("field_name", DataType::String),
                    ("field_value", DataType::String),
                    ("weight", DataType::Number),
                ] {
                    output.add_field(FieldDef::Dimension(ExprField {
                        name: name.to_string(),
                        expr: None,
                        ty: TypeDesc::scalar(data_type),
                        range: SourceRange::none(),
                    }));
                }
            }
        }
        output
    }

    /// Group filters see the output locals first, then the input.
    fn check_havings(&mut self, output: &Arc<StructDef>) -> Vec<crate::model::ExprIr> {
        let havings = std::mem::take(&mut self.havings);
        let mut compiled = vec![];
        for (expr, range) in havings {
            let input = self.input.clone();
            let scope = Scope::new()
                .with_inner(Frame::Model(self.model))
                .with_inner(Frame::Source(&input))
                .with_inner(Frame::Stage(output));
            match check_expr(&expr, &scope) {
                Ok(typed) if typed.ty.data_type == DataType::Boolean => compiled.push(typed.ir),
                Ok(typed) => {
                    self.error(
                        DiagnosticCode::TypeMismatch,
                        format!("having condition must be boolean, found {}", typed.ty.data_type),
                        range,
                    );
                }
                Err(err) => {
                    self.log.report(err.into_diagnostic());
                    self.failed = true;
                }
            }
        }
        compiled
    }

    /// Resolve order_by names and positions against the output columns.
    fn resolve_order_by(&mut self, output: &Arc<StructDef>) -> Vec<CompiledOrderBy> {
        let columns = output.row_schema();
        let specs = std::mem::take(&mut self.order_specs);
        let mut resolved = vec![];
        for spec in specs {
            match &spec.key {
                OrderByKey::Name(name) => {
                    match columns.iter().position(|(n, _)| n == name) {
                        Some(index) => resolved.push(CompiledOrderBy {
                            name: name.clone(),
                            position: index + 1,
                            direction: spec.direction,
                        }),
                        None => {
                            self.error(
                                DiagnosticCode::NameNotFound,
                                format!("order_by names '{}', which is not an output field", name),
                                spec.range,
                            );
                        }
                    }
                }
                OrderByKey::Position(position) => {
                    if *position == 0 || *position > columns.len() {
                        self.error(
                            DiagnosticCode::InvalidStage,
                            format!(
                                "order_by position {} is out of range (stage outputs {} columns)",
                                position,
                                columns.len()
                            ),
                            spec.range,
                        );
                        continue;
                    }
                    resolved.push(CompiledOrderBy {
                        name: columns[position - 1].0.clone(),
                        position: *position,
                        direction: spec.direction,
                    });
                }
            }
        }
        resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemRole {
    GroupBy,
    Aggregate,
    Project,
}

impl ItemRole {
    fn keyword(&self) -> &'static str {
        match self {
            ItemRole::GroupBy => "group_by",
            ItemRole::Aggregate => "aggregate",
            ItemRole::Project => "project",
        }
    }
}
