pub mod csv_in;
pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Deserialise a JSON request from `--input <file>` or, failing that, from
/// piped stdin.
pub fn read_request<T: DeserializeOwned>(
    path: Option<&str>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return file::read_json(path);
    }
    match stdin::read_stdin()? {
        Some(value) => Ok(value),
        None => Err(format!("--input <file.json>, --prices <file.csv> or stdin required for {what}").into()),
    }
}
