//! JSON I/O handling for the CLI
//!
//! - Input: one JSON object on stdin
//! - Output: one JSON object on stdout

use std::io::{self, Read, Write};

use serde_json::{json, Value};

use super::errors::{CliError, CliResult};

/// Read a JSON request from stdin
pub fn read_request() -> CliResult<Value> {
    let mut content = String::new();
    io::stdin().lock().read_to_string(&mut content)?;
    parse_request(&content)
}

/// Parses request text; it must hold exactly one JSON object.
pub fn parse_request(content: &str) -> CliResult<Value> {
    if content.trim().is_empty() {
        return Err(CliError::request_error("Empty input"));
    }
    let value: Value = serde_json::from_str(content)?;
    if !value.is_object() {
        return Err(CliError::request_error("Request must be a JSON object"));
    }
    Ok(value)
}

pub fn ok_response(data: Value) -> Value {
    json!({
        "status": "ok",
        "data": data
    })
}

pub fn error_response(code: &str, message: &str) -> Value {
    json!({
        "status": "error",
        "code": code,
        "message": message
    })
}

/// Write a response object to stdout
pub fn write_response(response: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, response)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
