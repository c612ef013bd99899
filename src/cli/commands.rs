//! CLI command implementations
//!
//! Both commands load the schema, read one query description from stdin
//! and write one JSON object to stdout. Compilation failures are reported
//! in the response, not as a process failure.

use std::path::Path;

use serde_json::Value;

use crate::observability::{ObservationScope, Severity};
use crate::query::{ExplainPlan, Query, QueryDescription, QueryError};
use crate::schema::{DatabaseSchema, SchemaLoader};

use super::args::{Command, Target};
use super::errors::{CliError, CliResult};
use super::io::{error_response, ok_response, read_request, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Compile { schema, target } => compile(&schema, target),
        Command::Explain { schema, target } => explain(&schema, target),
    }
}

pub fn compile(schema_path: &Path, target: Target) -> CliResult<()> {
    let scope = ObservationScope::with_fields(
        "CLI_COMPILE",
        Severity::Trace,
        &[("target", target.as_str())],
    );
    let schema = SchemaLoader::load(schema_path)?;
    let request = read_request()?;

    let response = compile_request(&schema, request, target);
    write_response(&response)?;
    scope.complete();
    Ok(())
}

pub fn explain(schema_path: &Path, target: Target) -> CliResult<()> {
    let scope = ObservationScope::with_fields(
        "CLI_EXPLAIN",
        Severity::Trace,
        &[("target", target.as_str())],
    );
    let schema = SchemaLoader::load(schema_path)?;
    let request = read_request()?;

    let response = explain_request(&schema, request, target)?;
    write_response(&response)?;
    scope.complete();
    Ok(())
}

fn build(request: Value) -> Result<Query, QueryError> {
    QueryDescription::from_json(request)?.to_query()
}

fn compile_plan(
    schema: &DatabaseSchema,
    query: &Query,
    target: Target,
) -> Result<Value, QueryError> {
    let plan = match target {
        Target::Cursor => serde_json::to_value(query.to_cursor(schema)?),
        Target::Statement => serde_json::to_value(query.to_statement(schema)?),
    };
    plan.map_err(|e| QueryError::invalid_operation(format!("plan not serializable: {}", e)))
}

/// Compiles one description to the `target` plan, as a response object.
pub fn compile_request(schema: &DatabaseSchema, request: Value, target: Target) -> Value {
    let plan = build(request).and_then(|query| compile_plan(schema, &query, target));
    match plan {
        Ok(plan) => ok_response(plan),
        Err(err) => error_response(err.code(), &err.to_string()),
    }
}

/// Explains how one description compiles. Rejections are explained too.
pub fn explain_request(
    schema: &DatabaseSchema,
    request: Value,
    target: Target,
) -> CliResult<Value> {
    let compiled = build(request).and_then(|query| match target {
        Target::Cursor => query.to_cursor(schema).map(|c| ExplainPlan::from_cursor(&c)),
        Target::Statement => query.to_statement(schema).map(|s| ExplainPlan::from_statement(&s)),
    });
    let plan = match compiled {
        Ok(plan) => plan,
        Err(err) => ExplainPlan::from_error(target.as_str(), &err),
    };

    let text = plan.to_string();
    let mut data = serde_json::to_value(&plan).map_err(|e| CliError::io_error(e.to_string()))?;
    if let Some(obj) = data.as_object_mut() {
        obj.insert("text".to_string(), Value::String(text));
    }
    Ok(ok_response(data))
}
