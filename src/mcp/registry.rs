//! Capability registry
//!
//! Holds the named operations contributed by capability providers. The
//! registry is filled once at startup and is read-only afterwards, so it is
//! shared behind an `Arc` without a lock.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{InvocationError, RegistryError};
use crate::mcp::types::Tool;

type InvokeFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value, InvocationError>> + Send + Sync;

/// A named operation the registry can invoke on behalf of a client
#[derive(Clone)]
pub struct Capability {
    name: String,
    description: String,
    input_schema: Value,
    invoke: Arc<InvokeFn>,
}

impl Capability {
    /// Create a capability from its metadata and an async invocation function
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        invoke: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvocationError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            invoke: Arc::new(move |params| Box::pin(invoke(params))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Tool metadata as exposed by `tools/list`
    pub fn tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
        }
    }

    pub async fn invoke(&self, params: Value) -> Result<Value, InvocationError> {
        (self.invoke)(params).await
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Registry of capabilities, looked up by exact (case-sensitive) name
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    /// Capabilities in registration order
    entries: Vec<Capability>,

    /// Name -> position in `entries`
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from discovered capabilities; later entries win on
    /// name collisions
    pub fn from_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        let mut registry = Self::new();
        for capability in capabilities {
            registry.register_or_replace(capability);
        }
        registry
    }

    /// Register a capability, failing if the name is taken
    pub fn register(&mut self, capability: Capability) -> Result<(), RegistryError> {
        if self.index.contains_key(capability.name()) {
            return Err(RegistryError::DuplicateName {
                name: capability.name().to_string(),
            });
        }
        self.index
            .insert(capability.name().to_string(), self.entries.len());
        self.entries.push(capability);
        Ok(())
    }

    /// Register a capability, overwriting an existing one of the same name
    ///
    /// The replacement keeps the listing position of the entry it replaces.
    /// Returns `true` when an entry was replaced.
    pub fn register_or_replace(&mut self, capability: Capability) -> bool {
        match self.index.get(capability.name()) {
            Some(&position) => {
                self.entries[position] = capability;
                true
            }
            None => {
                self.index
                    .insert(capability.name().to_string(), self.entries.len());
                self.entries.push(capability);
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.index.get(name).map(|&position| &self.entries[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke a capability by name, propagating its result unchanged
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value, RegistryError> {
        let capability = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCapability {
                name: name.to_string(),
            })?;
        Ok(capability.invoke(params).await?)
    }

    /// Capability metadata in registration order
    ///
    /// The iterator is lazy; call again to restart.
    pub fn list(&self) -> impl Iterator<Item = Tool> + '_ {
        self.entries.iter().map(Capability::tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(name: &str) -> Capability {
        let owned = name.to_string();
        Capability::new(name, format!("echo {}", name), json!({"type": "object"}), move |params| {
            let owned = owned.clone();
            async move { Ok(json!({"from": owned, "params": params})) }
        })
    }

    fn failing(name: &str) -> Capability {
        Capability::new(name, "always fails", json!({"type": "object"}), |_| async {
            Err(InvocationError::new("file not found"))
        })
    }

    #[tokio::test]
    async fn test_invoke_registered() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo("vault.listNotes")).unwrap();

        let result = registry
            .invoke("vault.listNotes", json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(result["from"], "vault.listNotes");
        assert_eq!(result["params"]["a"], 1);
    }

    #[tokio::test]
    async fn test_lookup_is_case_sensitive() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo("vault.listNotes")).unwrap();

        let err = registry.invoke("vault.listnotes", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownCapability {
                name: "vault.listnotes".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invocation_error_propagates_unchanged() {
        let mut registry = CapabilityRegistry::new();
        registry.register(failing("vault.getNote")).unwrap();

        let err = registry.invoke("vault.getNote", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::Invocation(InvocationError::new("file not found"))
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo("plugins.list")).unwrap();
        let err = registry.register(echo("plugins.list")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_position_and_newest_wins() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo("a")).unwrap();
        registry.register(echo("b")).unwrap();
        assert!(registry.register_or_replace(failing("a")));

        let names: Vec<String> = registry.list().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(registry.invoke("a", json!({})).await.is_err());
    }

    #[test]
    fn test_list_is_restartable() {
        let registry = CapabilityRegistry::from_capabilities(vec![echo("x"), echo("y"), echo("z")]);
        let first: Vec<String> = registry.list().map(|t| t.name).collect();
        let second: Vec<String> = registry.list().map(|t| t.name).collect();
        assert_eq!(first, vec!["x", "y", "z"]);
        assert_eq!(first, second);
        assert_eq!(registry.list().next().unwrap().description.as_deref(), Some("echo x"));
    }
}
