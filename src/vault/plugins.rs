//! Installed extensions
//!
//! An extension is installed when `<vault>/.obsidian/plugins/<dir>/manifest.json`
//! parses. `.obsidian/community-plugins.json`, when present, lists the enabled
//! ones.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Fields of an extension manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_app_version: Option<String>,

    /// Anything else the manifest carries
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An installed extension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledPlugin {
    pub id: String,
    pub enabled: bool,
    pub manifest: PluginManifest,
    #[serde(skip)]
    pub dir: PathBuf,
}

pub fn plugins_dir(vault_root: &Path) -> PathBuf {
    vault_root.join(".obsidian").join("plugins")
}

/// Load every installed extension, sorted by id
///
/// Unreadable or malformed manifests are skipped with a warning. A vault
/// without a plugins directory has no extensions.
pub fn load_plugins(vault_root: &Path) -> Vec<InstalledPlugin> {
    let dir = plugins_dir(vault_root);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "No plugins directory: {}", e);
            return Vec::new();
        }
    };
    let enabled = load_enabled(vault_root);

    let mut plugins: Vec<InstalledPlugin> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            let manifest_path = path.join("manifest.json");
            let contents = fs::read_to_string(&manifest_path).ok()?;
            match serde_json::from_str::<PluginManifest>(&contents) {
                Ok(manifest) => Some(InstalledPlugin {
                    id: manifest.id.clone(),
                    enabled: enabled.iter().any(|id| *id == manifest.id),
                    manifest,
                    dir: path,
                }),
                Err(e) => {
                    warn!(manifest = %manifest_path.display(), "Skipping malformed manifest: {}", e);
                    None
                }
            }
        })
        .collect();

    plugins.sort_by(|a, b| a.id.cmp(&b.id));
    plugins
}

fn load_enabled(vault_root: &Path) -> Vec<String> {
    let path = vault_root.join(".obsidian").join("community-plugins.json");
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(root: &Path, dir: &str, manifest: &str) {
        let plugin_dir = plugins_dir(root).join(dir);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("manifest.json"), manifest).unwrap();
    }

    #[test]
    fn test_load_plugins() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            "tasks",
            r#"{"id":"obsidian-tasks-plugin","name":"Tasks","version":"7.0.0","fundingUrl":"x"}"#,
        );
        write_manifest(dir.path(), "dataview", r#"{"id":"dataview","name":"Dataview","version":"0.5.0"}"#);
        write_manifest(dir.path(), "broken", "{not json");
        fs::write(
            dir.path().join(".obsidian/community-plugins.json"),
            r#"["dataview"]"#,
        )
        .unwrap();

        let plugins = load_plugins(dir.path());
        let ids: Vec<&str> = plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["dataview", "obsidian-tasks-plugin"]);
        assert!(plugins[0].enabled);
        assert!(!plugins[1].enabled);
        assert_eq!(plugins[1].manifest.extra["fundingUrl"], "x");
    }

    #[test]
    fn test_missing_plugins_dir() {
        let dir = TempDir::new().unwrap();
        assert!(load_plugins(dir.path()).is_empty());
    }
}
