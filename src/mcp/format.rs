//! Display formatting for `tools/call` results
//!
//! Results are rendered as Markdown keyed by the capability that produced
//! them, with pretty JSON for anything not recognized.

use serde_json::Value;

/// Render a capability result as a single text block
pub fn format_tool_result(capability: &str, result: &Value) -> String {
    let rendered = match capability {
        "vault.listNotes" => bullet_list("Notes in Vault", result),
        "vault.search" => bullet_list("Search Results", result),
        "plugins.list" => bullet_list("Loaded Plugins", result),
        "tasks.list" | "tasks.query" => task_list(result),
        "vault.getNote" | "dataview.query" | "templater.render" => Some(plain(result)),
        _ => None,
    };

    rendered.unwrap_or_else(|| pretty_json(result))
}

fn bullet_list(title: &str, result: &Value) -> Option<String> {
    let items = result.as_array()?;
    let lines: Vec<String> = items.iter().map(|item| format!("- {}", plain(item))).collect();
    Some(format!("# {} ({})\n\n{}", title, items.len(), lines.join("\n")))
}

fn task_list(result: &Value) -> Option<String> {
    let tasks = result.as_array()?;
    let lines: Vec<String> = tasks
        .iter()
        .map(|task| {
            let mark = if task["completed"].as_bool().unwrap_or(false) { "x" } else { " " };
            let text = task["description"].as_str().unwrap_or_default();
            match (task["file"].as_str(), task["lineNumber"].as_u64()) {
                (Some(file), Some(line)) => format!("- [{}] {} ({}:{})", mark, text, file, line),
                _ => format!("- [{}] {}", mark, text),
            }
        })
        .collect();
    Some(format!("# Tasks ({})\n\n{}", tasks.len(), lines.join("\n")))
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
