use serde_json::Value;

use super::{as_number_map, format_number};

/// Print only the headline of a result: the weights when there are any,
/// otherwise the first well-known metric.
pub fn print_minimal(value: &Value) {
    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let Value::Object(map) = result else {
        println!("{}", format_minimal(result));
        return;
    };

    if let Some(weights) = map.get("weights").and_then(as_number_map) {
        for (t, w) in weights {
            println!("{} {}", t, format_minimal(w));
        }
        return;
    }

    let priority_keys = [
        "sharpe_ratio",
        "expected_return",
        "volatility",
        "portfolio_return",
        "advice",
    ];
    for key in &priority_keys {
        if let Some(val) = map.get(*key).filter(|v| !v.is_null()) {
            println!("{}", format_minimal(val));
            return;
        }
    }

    if let Some((key, val)) = map.iter().next() {
        println!("{}: {}", key, format_minimal(val));
    }
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
