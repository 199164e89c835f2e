use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{as_matrix, as_number_map, format_number};

/// Format output as tables: scalar fields first, then one table per
/// ticker mapping or matrix in the result.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => match map.get("result") {
            Some(Value::Object(result)) => {
                print_result(result);
                print_envelope(map);
            }
            _ => print_result(map),
        },
        Value::Array(arr) => print_array_table(arr),
        _ => println!("{}", value),
    }
}

fn print_result(result: &Map<String, Value>) {
    let mut scalars = Builder::default();
    scalars.push_record(["Field", "Value"]);
    let mut sections: Vec<(&str, &Value)> = Vec::new();
    let mut has_scalars = false;

    for (key, val) in result {
        if as_number_map(val).is_some() || as_matrix(val).is_some() || is_object_array(val) {
            sections.push((key.as_str(), val));
        } else {
            scalars.push_record([key.clone(), format_value(val)]);
            has_scalars = true;
        }
    }
    if has_scalars {
        println!("{}", Table::from(scalars));
    }

    for (key, val) in sections {
        println!("\n{}", key);
        if let Some(map) = as_number_map(val) {
            let mut builder = Builder::default();
            builder.push_record(["Ticker", "Value"]);
            for (t, v) in map {
                builder.push_record([t.clone(), format_value(v)]);
            }
            println!("{}", Table::from(builder));
        } else if let Some(matrix) = as_matrix(val) {
            print_matrix(matrix);
        } else if let Value::Array(arr) = val {
            print_array_table(arr);
        }
    }
}

fn print_matrix(matrix: &Map<String, Value>) {
    let columns: Vec<String> = matrix
        .values()
        .next()
        .and_then(Value::as_object)
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default();
    let mut builder = Builder::default();
    let mut header = vec![String::new()];
    header.extend(columns.iter().cloned());
    builder.push_record(header);

    for (row, cells) in matrix {
        let mut record = vec![row.clone()];
        record.extend(
            columns
                .iter()
                .map(|c| cells.get(c.as_str()).map(format_value).unwrap_or_default()),
        );
        builder.push_record(record);
    }
    println!("{}", Table::from(builder));
}

fn print_envelope(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_array_table(arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            println!("{}", format_value(item));
        }
        return;
    };

    let headers: Vec<String> = first.keys().cloned().collect();
    let mut builder = Builder::default();
    builder.push_record(&headers);
    for map in arr.iter().filter_map(Value::as_object) {
        builder.push_record(
            headers
                .iter()
                .map(|h| map.get(h.as_str()).map(format_value).unwrap_or_default()),
        );
    }
    println!("{}", Table::from(builder));
}

fn is_object_array(value: &Value) -> bool {
    matches!(value, Value::Array(arr) if arr.first().is_some_and(Value::is_object))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => arr.iter().map(format_value).collect::<Vec<_>>().join(", "),
        Value::Object(map) => match as_number_map(value) {
            Some(_) => map
                .iter()
                .map(|(k, v)| format!("{}={}", k, format_value(v)))
                .collect::<Vec<_>>()
                .join(", "),
            None => serde_json::to_string(value).unwrap_or_default(),
        },
    }
}
