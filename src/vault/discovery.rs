//! Capability discovery over a host environment
//!
//! [`discover`] is a pure function of the loaded environment: the core vault
//! capabilities are always present, the rest depend on which extensions are
//! installed.

use std::future::Future;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ConfigError, InvocationError};
use crate::mcp::registry::{Capability, CapabilityRegistry};
use crate::vault::notes::Vault;
use crate::vault::plugins::{load_plugins, InstalledPlugin};
use crate::vault::tasks::{self, TaskListArgs, TaskQueryArgs, TaskToggleArgs};
use crate::vault::templates::{self, RenderArgs};

/// Extension ids that enable the task capabilities
pub const TASKS_PLUGIN_IDS: &[&str] = &["obsidian-tasks-plugin", "tasks"];

/// Extension ids that enable template rendering
pub const TEMPLATER_PLUGIN_IDS: &[&str] = &["templater-obsidian", "templater"];

/// A vault and the extensions installed in it
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    pub vault: Vault,
    pub plugins: Vec<InstalledPlugin>,
}

impl HostEnvironment {
    /// Load the environment rooted at `root`
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        if !root.is_dir() {
            return Err(ConfigError::VaultNotFound {
                path: root.display().to_string(),
            });
        }
        let plugins = load_plugins(root);
        info!(
            vault = %root.display(),
            plugins = plugins.len(),
            "Loaded host environment"
        );
        Ok(Self {
            vault: Vault::new(PathBuf::from(root)),
            plugins,
        })
    }

    /// Whether any of `ids` is installed
    pub fn has_plugin(&self, ids: &[&str]) -> bool {
        self.plugins.iter().any(|plugin| ids.contains(&plugin.id.as_str()))
    }

    pub fn plugin(&self, id: &str) -> Option<&InstalledPlugin> {
        self.plugins.iter().find(|plugin| plugin.id == id)
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.iter().map(|plugin| plugin.id.clone()).collect()
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
struct NotePathArgs {
    /// Path of the note inside the vault
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchArgs {
    /// Substring to match in the note path or basename
    query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InspectArgs {
    /// Extension id; omit to list every id
    #[serde(default)]
    plugin: Option<String>,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

fn to_result<T: Serialize>(value: T) -> Result<Value, InvocationError> {
    serde_json::to_value(value).map_err(|e| InvocationError::new(e.to_string()))
}

/// Run filesystem work off the async workers
fn blocking<F>(work: F) -> impl Future<Output = Result<Value, InvocationError>>
where
    F: FnOnce() -> Result<Value, InvocationError> + Send + 'static,
{
    async move {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| InvocationError::new(format!("capability task failed: {}", e)))?
    }
}

/// Build a capability whose body gets a clone of the environment and the
/// deserialized arguments
fn capability<A, F>(env: &HostEnvironment, name: &str, description: &str, run: F) -> Capability
where
    A: for<'de> Deserialize<'de> + JsonSchema + 'static,
    F: Fn(&HostEnvironment, A) -> Result<Value, InvocationError> + Copy + Send + Sync + 'static,
{
    let env = env.clone();
    Capability::new(name, description, schema_of::<A>(), move |params| {
        let env = env.clone();
        blocking(move || {
            let args: A = serde_json::from_value(params)?;
            run(&env, args)
        })
    })
}

/// Capabilities offered by `env`
pub fn discover(env: &HostEnvironment) -> Vec<Capability> {
    let mut capabilities = vec![
        capability(env, "vault.listNotes", "List all markdown note paths in the vault", |env, _: NoArgs| {
            to_result(env.vault.list_notes()?)
        }),
        capability(
            env,
            "vault.getNote",
            "Return the full markdown content of a note by path",
            |env, args: NotePathArgs| Ok(Value::String(env.vault.read_note(&args.path)?)),
        ),
        capability(
            env,
            "vault.search",
            "Search note paths containing the query substring (case-sensitive) in path or basename",
            |env, args: SearchArgs| to_result(env.vault.search(&args.query)?),
        ),
        capability(
            env,
            "vault.getFileMetadata",
            "Get basic metadata (path, basename, size) for a markdown file",
            |env, args: NotePathArgs| to_result(env.vault.metadata(&args.path)?),
        ),
        capability(env, "plugins.list", "Return a list of installed plugin ids", |env, _: NoArgs| {
            to_result(env.plugin_ids())
        }),
        capability(
            env,
            "plugins.inspect",
            "Inspect a plugin by id or list available plugin ids when none provided",
            |env, args: InspectArgs| match args.plugin {
                None => to_result(env.plugin_ids()),
                Some(id) => match env.plugin(&id) {
                    Some(plugin) => to_result(plugin),
                    None => Err(InvocationError::new(format!("Plugin not found: {}", id))),
                },
            },
        ),
    ];

    if env.has_plugin(TASKS_PLUGIN_IDS) {
        capabilities.push(capability(
            env,
            "tasks.list",
            "List task lines, optionally filtered by status (todo, done, all) and note path",
            |env, args: TaskListArgs| to_result(tasks::list(&env.vault, &args)?),
        ));
        capabilities.push(capability(
            env,
            "tasks.query",
            "Find tasks whose text contains the query, or that carry a #tag",
            |env, args: TaskQueryArgs| to_result(tasks::query(&env.vault, &args.query)?),
        ));
        capabilities.push(capability(
            env,
            "tasks.toggle",
            "Toggle a task between open and done",
            |env, args: TaskToggleArgs| {
                to_result(tasks::toggle(&env.vault, &args.file, args.line_number)?)
            },
        ));
    }

    if env.has_plugin(TEMPLATER_PLUGIN_IDS) {
        capabilities.push(capability(
            env,
            "templater.render",
            "Render a template with an optional context object",
            |env, args: RenderArgs| Ok(Value::String(templates::render(&env.vault, &args)?)),
        ));
    }

    capabilities
}

/// Registry holding everything `env` offers
pub fn registry_for(env: &HostEnvironment) -> CapabilityRegistry {
    CapabilityRegistry::from_capabilities(discover(env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault_with_plugins(ids: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("note.md"), "- [ ] first #todo\nbody").unwrap();
        for id in ids {
            let plugin_dir = dir.path().join(".obsidian/plugins").join(id);
            fs::create_dir_all(&plugin_dir).unwrap();
            fs::write(
                plugin_dir.join("manifest.json"),
                format!(r#"{{"id":"{}","name":"{}","version":"1.0.0"}}"#, id, id),
            )
            .unwrap();
        }
        dir
    }

    fn names(capabilities: &[Capability]) -> Vec<&str> {
        capabilities.iter().map(|c| c.name()).collect()
    }

    #[test]
    fn test_missing_vault() {
        let dir = TempDir::new().unwrap();
        let result = HostEnvironment::load(&dir.path().join("nope"));
        assert!(matches!(result, Err(ConfigError::VaultNotFound { .. })));
    }

    #[test]
    fn test_core_capabilities_always_present() {
        let dir = vault_with_plugins(&[]);
        let env = HostEnvironment::load(dir.path()).unwrap();
        assert_eq!(
            names(&discover(&env)),
            vec![
                "vault.listNotes",
                "vault.getNote",
                "vault.search",
                "vault.getFileMetadata",
                "plugins.list",
                "plugins.inspect",
            ]
        );
    }

    #[test]
    fn test_extension_capabilities_follow_installed_plugins() {
        let dir = vault_with_plugins(&["obsidian-tasks-plugin", "templater-obsidian"]);
        let env = HostEnvironment::load(dir.path()).unwrap();
        let discovered = discover(&env);
        let names = names(&discovered);
        assert!(names.contains(&"tasks.list"));
        assert!(names.contains(&"tasks.query"));
        assert!(names.contains(&"tasks.toggle"));
        assert!(names.contains(&"templater.render"));
    }

    #[test]
    fn test_schemas_describe_arguments() {
        let dir = vault_with_plugins(&[]);
        let env = HostEnvironment::load(dir.path()).unwrap();
        let registry = registry_for(&env);
        let schema = registry.get("vault.getNote").unwrap().input_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
        assert_eq!(schema["required"], json!(["path"]));
    }

    #[tokio::test]
    async fn test_invoke_through_registry() {
        let dir = vault_with_plugins(&["tasks"]);
        let env = HostEnvironment::load(dir.path()).unwrap();
        let registry = registry_for(&env);

        let notes = registry.invoke("vault.listNotes", json!({})).await.unwrap();
        assert_eq!(notes, json!(["note.md"]));

        let body = registry
            .invoke("vault.getNote", json!({"path": "note.md"}))
            .await
            .unwrap();
        assert_eq!(body, json!("- [ ] first #todo\nbody"));

        let tasks = registry.invoke("tasks.list", json!({})).await.unwrap();
        assert_eq!(tasks[0]["description"], "first");
        assert_eq!(tasks[0]["file"], "note.md");
        assert_eq!(tasks[0]["lineNumber"], 1);
    }

    #[tokio::test]
    async fn test_invocation_errors_are_verbatim() {
        let dir = vault_with_plugins(&[]);
        let env = HostEnvironment::load(dir.path()).unwrap();
        let registry = registry_for(&env);

        let err = registry
            .invoke("vault.getNote", json!({"path": "missing.md"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "file not found: missing.md");

        let err = registry.invoke("vault.getNote", json!({})).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid arguments"));

        let err = registry
            .invoke("plugins.inspect", json!({"plugin": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Plugin not found: nope");
    }
}
