pub mod csv_out;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("JSON serialization error: {}", e),
        },
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// A ticker -> number mapping such as a weight or volatility vector.
pub(crate) fn as_number_map(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) if !map.is_empty() && map.values().all(Value::is_number) => Some(map),
        _ => None,
    }
}

/// A ticker -> ticker -> number mapping such as a correlation matrix.
pub(crate) fn as_matrix(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) if !map.is_empty() && map.values().all(|v| as_number_map(v).is_some()) => {
            Some(map)
        }
        _ => None,
    }
}

pub(crate) fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => format!("{:.6}", f),
        _ => n.to_string(),
    }
}
