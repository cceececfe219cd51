//! Tool registry with schema-checked invocation
//!
//! Every tool declares a JSON schema for its parameters. Arguments proposed
//! by the oracle are validated against that schema before the handler runs,
//! so handlers only ever see well-formed input.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::oracle::ToolSpec;

/// Errors from tool lookup, validation and execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    Execution { tool: String, reason: String },
}

/// Result type for tool operations
pub type ToolResult<T> = Result<T, ToolError>;

/// Code run when a tool is invoked
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, String>;
}

/// Adapter turning an async closure into a [`ToolHandler`]
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, String> {
        (self.0)(arguments).await
    }
}

/// A callable tool with its parameter schema
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: Value,
    validator: Arc<jsonschema::Validator>,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl Tool {
    /// Build a tool from an explicit JSON schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolResult<Self> {
        let name = name.into();
        let validator =
            jsonschema::validator_for(&parameters).map_err(|e| ToolError::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            name,
            description: description.into(),
            parameters,
            validator: Arc::new(validator),
            handler,
        })
    }

    /// Build a tool from an async closure over raw JSON arguments
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> ToolResult<Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self::new(name, description, parameters, Arc::new(FnHandler(f)))
    }

    /// Build a tool whose schema is derived from the argument type
    pub fn typed<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> ToolResult<Self>
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let name = name.into();
        let parameters = serde_json::to_value(schemars::schema_for!(A)).map_err(|e| {
            ToolError::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            }
        })?;
        let f = Arc::new(f);
        Self::from_fn(name, description, parameters, move |arguments: Value| {
            let f = Arc::clone(&f);
            async move {
                let typed: A = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
                f(typed).await
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Check arguments against the parameter schema
    pub fn validate(&self, arguments: &Value) -> ToolResult<()> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolError::InvalidArguments {
                tool: self.name.clone(),
                reason: errors.join("; "),
            })
        }
    }

    /// Validate, then invoke the handler
    pub async fn invoke(&self, arguments: Value) -> ToolResult<Value> {
        self.validate(&arguments)?;
        self.handler
            .call(arguments)
            .await
            .map_err(|reason| ToolError::Execution {
                tool: self.name.clone(),
                reason,
            })
    }
}

/// Named collection of tools owned by an agent
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, returning any tool it replaced
    pub fn register(&mut self, tool: Tool) -> Option<Tool> {
        self.tools.insert(tool.name.clone(), tool)
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Catalog offered to the oracle
    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.tools.values().map(Tool::spec).collect()
    }

    pub async fn execute(&self, name: &str, arguments: Value) -> ToolResult<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn lookup_tool() -> Tool {
        Tool::from_fn(
            "lookup_article",
            "Fetch an article of the civil code",
            json!({
                "type": "object",
                "properties": {"article": {"type": "integer"}},
                "required": ["article"]
            }),
            |args| async move { Ok(json!(format!("Article {}", args["article"]))) },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_valid_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(lookup_tool());

        let out = registry
            .execute("lookup_article", json!({"article": 1101}))
            .await
            .unwrap();
        assert_eq!(out, json!("Article 1101"));
        assert_eq!(registry.catalog()[0].name, "lookup_article");
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_handler() {
        let mut registry = ToolRegistry::new();
        registry.register(lookup_tool());

        let err = registry
            .execute("lookup_article", json!({"article": "eleven"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = registry
            .execute("lookup_article", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_handler_failure_is_execution_error() {
        let tool = Tool::from_fn("fail", "Always fails", json!({"type": "object"}), |_| async {
            Err("registry offline".to_string())
        })
        .unwrap();
        let err = tool.invoke(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("registry offline"));
    }

    #[derive(Deserialize, JsonSchema)]
    struct Deadline {
        days: u32,
    }

    #[tokio::test]
    async fn test_typed_tool_derives_schema() {
        let tool = Tool::typed("deadline", "Compute a deadline", |d: Deadline| async move {
            Ok(json!({"days": d.days * 2}))
        })
        .unwrap();

        assert!(tool.parameters()["properties"]["days"].is_object());
        assert_eq!(tool.invoke(json!({"days": 15})).await.unwrap()["days"], 30);
        assert!(tool.invoke(json!({"days": -1})).await.is_err());
    }
}
