//! Tool System
//!
//! Tools are registered explicitly with a name, a description, an argument
//! schema and a handler. The registry keeps them in registration order so the
//! catalogue advertised to the model is the same on every run.

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::schema::ArgumentSchema;
use crate::validate::ValidatedArgs;

/// The callable behind a tool.
///
/// Any error returned here is reported back to the model as the call's result;
/// it never aborts the turn.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ValidatedArgs) -> anyhow::Result<serde_json::Value>;
}

/// Async closure adapter, see [`handler_fn`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ValidatedArgs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn call(&self, args: ValidatedArgs) -> anyhow::Result<serde_json::Value> {
        (self.0)(args).await
    }
}

/// Sync closure adapter, see [`sync_handler`]
pub struct SyncHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for SyncHandler<F>
where
    F: Fn(ValidatedArgs) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    async fn call(&self, args: ValidatedArgs) -> anyhow::Result<serde_json::Value> {
        (self.0)(args)
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ValidatedArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap a synchronous closure as a handler
pub fn sync_handler<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ValidatedArgs) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
{
    Arc::new(SyncHandler(f))
}

/// A registered tool
pub struct ToolDefinition {
    name: String,
    description: String,
    schema: ArgumentSchema,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ArgumentSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub const fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    pub fn handler(&self) -> &dyn ToolHandler {
        self.handler.as_ref()
    }

    /// Advertisement for the model
    pub fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.to_json_schema(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Tool as advertised to the model (function-calling format)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: serde_json::Value,
}

/// Registry for available tools.
///
/// Lookups take a read lock, so one `Arc<ToolRegistry>` can back any number
/// of sessions.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, Arc<ToolDefinition>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Arc<ToolDefinition>>> {
        self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Arc<ToolDefinition>>> {
        self.tools.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a new tool
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTool` if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ArgumentSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        self.register_definition(ToolDefinition::new(name, description, schema, handler))
    }

    /// Register a prepared definition
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTool` if the name is taken.
    pub fn register_definition(&self, definition: ToolDefinition) -> Result<()> {
        let mut tools = self.write();
        if tools.contains_key(definition.name()) {
            return Err(ChatError::DuplicateTool(definition.name().to_string()));
        }
        tracing::debug!(tool = %definition.name(), "Registered tool");
        tools.insert(definition.name().to_string(), Arc::new(definition));
        Ok(())
    }

    /// Remove a tool; absent names are ignored.
    ///
    /// Returns `true` if something was removed.
    pub fn unregister(&self, name: &str) -> bool {
        self.write().shift_remove(name).is_some()
    }

    /// Look up a tool by name
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool` if nothing is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<ToolDefinition>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| ChatError::UnknownTool(name.to_string()))
    }

    /// All tools in registration order, ready to advertise
    pub fn describe_all(&self) -> Vec<ToolDescriptor> {
        self.read().values().map(|t| t.describe()).collect()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParameterSchema;
    use serde_json::json;

    fn echo() -> Arc<dyn ToolHandler> {
        sync_handler(|args| Ok(args.to_value()))
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = ToolRegistry::new();
        registry
            .register("what_time", "Current time", ArgumentSchema::empty(), echo())
            .unwrap();

        let err = registry
            .register("what_time", "Again", ArgumentSchema::empty(), echo())
            .unwrap_err();
        assert!(matches!(err, ChatError::DuplicateTool(name) if name == "what_time"));
    }

    #[test]
    fn test_unregister_then_register_again() {
        let registry = ToolRegistry::new();
        registry
            .register("what_time", "Current time", ArgumentSchema::empty(), echo())
            .unwrap();

        assert!(registry.unregister("what_time"));
        assert!(!registry.unregister("what_time"));
        registry
            .register("what_time", "Current time", ArgumentSchema::empty(), echo())
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_describe_all_keeps_registration_order() {
        let registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(name, "", ArgumentSchema::empty(), echo())
                .unwrap();
        }
        registry.unregister("alpha");
        registry
            .register("alpha", "", ArgumentSchema::empty(), echo())
            .unwrap();

        let names: Vec<String> = registry.describe_all().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "mid", "alpha"]);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("translate_text").unwrap_err();
        assert!(matches!(err, ChatError::UnknownTool(name) if name == "translate_text"));
    }

    #[test]
    fn test_descriptor_carries_json_schema() {
        let registry = ToolRegistry::new();
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::string("tz").optional())
            .build()
            .unwrap();
        registry
            .register("what_time", "Current time", schema, echo())
            .unwrap();

        let descriptor = &registry.describe_all()[0];
        assert_eq!(descriptor.parameters["properties"]["tz"], json!({"type": "string"}));
        assert_eq!(descriptor.parameters["required"], json!([]));
    }

    #[tokio::test]
    async fn test_async_handler() {
        let handler = handler_fn(|args: ValidatedArgs| async move {
            Ok(json!(args.str("name").unwrap_or("nobody")))
        });
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::string("name"))
            .build()
            .unwrap();
        let args = crate::validate::validate(&schema, r#"{"name": "ada"}"#).unwrap();

        assert_eq!(handler.call(args).await.unwrap(), json!("ada"));
    }
}
