//! Helpers to convert telemetry payloads into human-readable formats.
//!
//! Both renderings carry the same information: a "Metadata" section listing
//! every top-level scalar field of the payload except the raw generation
//! timestamp, and a "Data" section with the active-user count. Pure functions
//! of the payload, no side effects.

use serde_json::Value;

use super::Telemetry;

/// Top-level fields excluded from the metadata listing
const METADATA_EXCLUDED: &[&str] = &["generationTime", "data"];

/// Fixed label of the active-user count in the "Data" section
const RMAU_LABEL: &str = "rmau.allUsers";

fn metadata_rows(telemetry: &Telemetry) -> Vec<String> {
    let Ok(Value::Object(fields)) = serde_json::to_value(telemetry) else {
        return Vec::new();
    };

    fields
        .iter()
        .filter(|(name, value)| {
            !METADATA_EXCLUDED.contains(&name.as_str()) && !value.is_object() && !value.is_array()
        })
        .map(|(name, value)| match value {
            Value::String(s) => format!("{}: {}", name, s),
            other => format!("{}: {}", name, other),
        })
        .collect()
}

/// Render a payload as Markdown for the plain message body
pub fn telemetry_to_markdown(telemetry: &Telemetry) -> String {
    let mut lines = vec!["# Metadata".to_string(), String::new()];
    lines.extend(metadata_rows(telemetry).into_iter().map(|row| format!("- {}", row)));
    lines.extend([
        String::new(),
        "# Data".to_string(),
        String::new(),
        format!("- {}: {}", RMAU_LABEL, telemetry.data.rmau.all_users),
        String::new(),
    ]);
    lines.join("\n")
}

/// Render a payload as HTML for the formatted message body
pub fn telemetry_to_html(telemetry: &Telemetry) -> String {
    let mut lines = vec!["<h1>Metadata</h1>".to_string(), "<ul>".to_string()];
    lines.extend(
        metadata_rows(telemetry)
            .into_iter()
            .map(|row| format!("  <li>{}</li>", row)),
    );
    lines.extend([
        "</ul>".to_string(),
        "<h1>Data</h1>".to_string(),
        "<ul>".to_string(),
        format!("  <li>{}: {}</li>", RMAU_LABEL, telemetry.data.rmau.all_users),
        "</ul>".to_string(),
    ]);
    lines.join("\n")
}
