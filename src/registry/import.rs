//! Packaged format description files.
//!
//! Free-form `key value` lines. Keys are case-insensitive; the first
//! occurrence of a key wins and unknown keys are carried along unused.

use std::collections::HashMap;
use std::path::Path;

/// Parse an import file into lowercased keys and trimmed values.
pub fn parse_import(contents: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };
        fields.entry(key.to_lowercase()).or_insert_with(|| value.to_string());
    }

    fields
}

pub fn read_import(path: &Path) -> std::io::Result<HashMap<String, String>> {
    Ok(parse_import(&std::fs::read_to_string(path)?))
}
