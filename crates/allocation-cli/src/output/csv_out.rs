use serde_json::{Map, Value};
use std::io;

use super::{as_matrix, as_number_map, format_number};

type Writer<'a> = csv::Writer<io::StdoutLock<'a>>;

/// Write output as CSV to stdout.
///
/// A ticker mapping becomes `ticker,value` rows, a matrix becomes a square
/// table with a leading ticker column, an array of objects becomes one row
/// per object. Anything else is written as `field,value` pairs.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let body = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);
    let body = primary_section(body).unwrap_or(body);

    if let Some(map) = as_number_map(body) {
        let _ = wtr.write_record(["ticker", "value"]);
        for (t, v) in map {
            let _ = wtr.write_record([t.clone(), format_csv_value(v)]);
        }
    } else if let Some(matrix) = as_matrix(body) {
        write_matrix(&mut wtr, matrix);
    } else {
        match body {
            Value::Array(arr) => write_array_csv(&mut wtr, arr),
            Value::Object(map) => {
                let _ = wtr.write_record(["field", "value"]);
                for (key, val) in map {
                    let _ = wtr.write_record([key.clone(), format_csv_value(val)]);
                }
            }
            _ => {
                let _ = wtr.write_record([&format_csv_value(body)]);
            }
        }
    }

    let _ = wtr.flush();
}

/// Optimizer results are mostly about their weights; emit those rather than
/// a flattened dump of the whole report.
fn primary_section(body: &Value) -> Option<&Value> {
    let map = body.as_object()?;
    ["weights", "optimized_weights"]
        .iter()
        .find_map(|k| map.get(*k))
}

fn write_matrix(wtr: &mut Writer<'_>, matrix: &Map<String, Value>) {
    let columns: Vec<&str> = matrix
        .values()
        .next()
        .and_then(Value::as_object)
        .map(|first| first.keys().map(String::as_str).collect())
        .unwrap_or_default();
    let mut header = vec!["ticker"];
    header.extend(columns.iter().copied());
    let _ = wtr.write_record(&header);
    for (row, cells) in matrix {
        let mut record = vec![row.clone()];
        record.extend(
            columns
                .iter()
                .map(|c| cells.get(*c).map(format_csv_value).unwrap_or_default()),
        );
        let _ = wtr.write_record(&record);
    }
}

fn write_array_csv(wtr: &mut Writer<'_>, arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            let _ = wtr.write_record([&format_csv_value(item)]);
        }
        return;
    };

    let headers: Vec<&str> = first.keys().map(String::as_str).collect();
    let _ = wtr.write_record(&headers);
    for map in arr.iter().filter_map(Value::as_object) {
        let row: Vec<String> = headers
            .iter()
            .map(|h| map.get(*h).map(format_csv_value).unwrap_or_default())
            .collect();
        let _ = wtr.write_record(&row);
    }
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
