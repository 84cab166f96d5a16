//! Task lines in vault notes
//!
//! A task is a Markdown checklist line, `- [ ] text` or `- [x] text`, with
//! optional `[key:: value]` inline fields and `#tag` tags.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::vault::notes::Vault;

fn task_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\s*)- \[([ xX])\]\s*(.*)$").expect("valid task pattern"))
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\w+)::\s*([^\]]+)\]").expect("valid field pattern"))
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#(\w+)").expect("valid tag pattern"))
}

/// One task line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Text with inline fields and tags removed
    pub description: String,
    pub completed: bool,
    /// Raw status character between the brackets
    pub status: String,
    pub indent: String,
    pub tags: Vec<String>,
    pub inline_metadata: BTreeMap<String, String>,
    /// The line as written
    pub line: String,
    pub file: String,
    /// 1-based
    pub line_number: usize,
}

/// Which tasks `tasks.list` returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Done,
    #[default]
    All,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct TaskListArgs {
    /// `todo`, `done` or `all` (default)
    #[serde(default)]
    pub status: TaskStatus,

    /// Only tasks in this note
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TaskQueryArgs {
    /// Text to look for in task descriptions, or `#tag`
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskToggleArgs {
    /// Note containing the task
    pub file: String,

    /// 1-based line number of the task
    pub line_number: usize,
}

/// Parse a single line; `None` when it is not a task
pub fn parse_line(line: &str, file: &str, line_number: usize) -> Option<Task> {
    let captures = task_pattern().captures(line)?;
    let indent = captures.get(1).map_or("", |m| m.as_str());
    let status = captures.get(2).map_or(" ", |m| m.as_str());
    let content = captures.get(3).map_or("", |m| m.as_str());

    let inline_metadata: BTreeMap<String, String> = field_pattern()
        .captures_iter(content)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect();
    let tags: Vec<String> = tag_pattern()
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();

    let without_fields = field_pattern().replace_all(content, "");
    let without_tags = tag_pattern().replace_all(&without_fields, "");
    let description = without_tags.split_whitespace().collect::<Vec<_>>().join(" ");

    Some(Task {
        description,
        completed: status.eq_ignore_ascii_case("x"),
        status: status.to_string(),
        indent: indent.to_string(),
        tags,
        inline_metadata,
        line: line.to_string(),
        file: file.to_string(),
        line_number,
    })
}

/// Every task in a note's contents
pub fn parse_note(contents: &str, file: &str) -> Vec<Task> {
    contents
        .split('\n')
        .enumerate()
        .filter_map(|(index, line)| parse_line(line, file, index + 1))
        .collect()
}

/// Every task in the vault, in note order then line order
pub fn scan(vault: &Vault) -> Result<Vec<Task>, VaultError> {
    let mut tasks = Vec::new();
    for path in vault.list_notes()? {
        let contents = vault.read_note(&path)?;
        tasks.extend(parse_note(&contents, &path));
    }
    Ok(tasks)
}

pub fn list(vault: &Vault, args: &TaskListArgs) -> Result<Vec<Task>, VaultError> {
    let tasks = match args.path.as_deref() {
        Some(path) => parse_note(&vault.read_note(path)?, path),
        None => scan(vault)?,
    };
    Ok(tasks
        .into_iter()
        .filter(|task| match args.status {
            TaskStatus::Todo => !task.completed,
            TaskStatus::Done => task.completed,
            TaskStatus::All => true,
        })
        .collect())
}

/// Tasks matching a `#tag`, or whose description contains the query
/// (case-insensitive)
pub fn query(vault: &Vault, query: &str) -> Result<Vec<Task>, VaultError> {
    let query = query.trim();
    let tasks = scan(vault)?;
    if let Some(tag) = query.strip_prefix('#') {
        return Ok(tasks
            .into_iter()
            .filter(|task| task.tags.iter().any(|t| t == tag))
            .collect());
    }
    let needle = query.to_lowercase();
    Ok(tasks
        .into_iter()
        .filter(|task| task.description.to_lowercase().contains(&needle))
        .collect())
}

/// Flip a task between open and done; returns the updated task
pub fn toggle(vault: &Vault, file: &str, line_number: usize) -> Result<Task, VaultError> {
    let contents = vault.read_note(file)?;
    let mut lines: Vec<String> = contents.split('\n').map(str::to_string).collect();

    let invalid_line = || VaultError::InvalidLine {
        path: file.to_string(),
        line_number,
    };
    if line_number == 0 {
        return Err(invalid_line());
    }
    let line = lines.get_mut(line_number - 1).ok_or_else(invalid_line)?;
    let task = parse_line(line, file, line_number).ok_or_else(|| VaultError::NotATask {
        path: file.to_string(),
        line_number,
    })?;

    let marker = format!("{}- [{}]", task.indent, task.status);
    let replacement = format!("{}- [{}]", task.indent, if task.completed { " " } else { "x" });
    *line = line.replacen(&marker, &replacement, 1);
    let updated = line.clone();

    vault.write_note(file, &lines.join("\n"))?;
    parse_line(&updated, file, line_number).ok_or(VaultError::NotATask {
        path: file.to_string(),
        line_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Vault) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("todo.md"),
            "# Todo\n- [ ] buy milk #errand\n  - [x] call bob [due:: 2024-05-01]\nplain line\n",
        )
        .unwrap();
        fs::write(dir.path().join("work.md"), "- [X] ship release #work\n").unwrap();
        let vault = Vault::new(dir.path());
        (dir, vault)
    }

    #[test]
    fn test_parse_line() {
        let task = parse_line("  - [x] call bob [due:: 2024-05-01] #phone", "todo.md", 3).unwrap();
        assert_eq!(task.description, "call bob");
        assert!(task.completed);
        assert_eq!(task.indent, "  ");
        assert_eq!(task.tags, vec!["phone"]);
        assert_eq!(task.inline_metadata["due"], "2024-05-01");
        assert_eq!(task.line_number, 3);

        assert!(parse_line("- not a task", "todo.md", 1).is_none());
        assert!(parse_line("-[ ] missing space", "todo.md", 1).is_none());
    }

    #[test]
    fn test_list_filters_by_status_and_path() {
        let (_dir, vault) = fixture();
        let all = list(&vault, &TaskListArgs::default()).unwrap();
        assert_eq!(all.len(), 3);

        let todo = list(
            &vault,
            &TaskListArgs {
                status: TaskStatus::Todo,
                path: None,
            },
        )
        .unwrap();
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].description, "buy milk");

        let work = list(
            &vault,
            &TaskListArgs {
                status: TaskStatus::Done,
                path: Some("work.md".to_string()),
            },
        )
        .unwrap();
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].file, "work.md");
    }

    #[test]
    fn test_query_by_tag_and_text() {
        let (_dir, vault) = fixture();
        let errands = query(&vault, "#errand").unwrap();
        assert_eq!(errands.len(), 1);
        assert_eq!(errands[0].line_number, 2);

        let calls = query(&vault, "CALL").unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].description, "call bob");
    }

    #[test]
    fn test_toggle_rewrites_only_the_marker() {
        let (dir, vault) = fixture();
        let task = toggle(&vault, "todo.md", 2).unwrap();
        assert!(task.completed);
        let contents = fs::read_to_string(dir.path().join("todo.md")).unwrap();
        assert_eq!(
            contents,
            "# Todo\n- [x] buy milk #errand\n  - [x] call bob [due:: 2024-05-01]\nplain line\n"
        );

        let task = toggle(&vault, "todo.md", 3).unwrap();
        assert!(!task.completed);
        assert!(fs::read_to_string(dir.path().join("todo.md"))
            .unwrap()
            .contains("  - [ ] call bob"));
    }

    #[test]
    fn test_toggle_rejects_bad_lines() {
        let (_dir, vault) = fixture();
        assert!(matches!(
            toggle(&vault, "todo.md", 4),
            Err(VaultError::NotATask { .. })
        ));
        assert!(matches!(
            toggle(&vault, "todo.md", 0),
            Err(VaultError::InvalidLine { .. })
        ));
        assert!(matches!(
            toggle(&vault, "todo.md", 99),
            Err(VaultError::InvalidLine { .. })
        ));
    }
}
