//! Tool Registry
//!
//! Explicit catalog mapping tool names to descriptors and callable handlers.
//! Input and output schemas are compiled at registration so every call pays
//! only the validation cost.

use crate::mcp::context::ToolContext;
use crate::mcp::protocol::{CallToolResult, ContentBlock, Tool};
use crate::mcp::validation::compile_schema;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<ToolOutput>;
}

/// What a tool hands back to the executor
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    pub structured: Option<Value>,
}

impl ToolOutput {
    /// Output consisting of a single text block
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            structured: None,
        }
    }

    /// Output carrying a structured value alongside its JSON text rendering
    pub fn json(value: Value) -> Self {
        let text = value.to_string();
        // Non-object values are wrapped so clients always receive an object.
        let structured = if value.is_object() {
            value
        } else {
            serde_json::json!({ "result": value })
        };
        Self {
            content: vec![ContentBlock::text(text)],
            structured: Some(structured),
        }
    }

    /// Convert into the wire result, keeping structured content only when the
    /// tool declared an output schema.
    pub fn into_call_result(self, has_output_schema: bool) -> CallToolResult {
        CallToolResult {
            content: self.content,
            structured_content: if has_output_schema {
                self.structured
            } else {
                None
            },
            is_error: Some(false),
        }
    }
}

/// A registered tool: descriptor, compiled schemas, and handler
pub struct RegisteredTool {
    pub tool: Tool,
    input_schema: JSONSchema,
    output_schema: Option<JSONSchema>,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    /// Compiled input schema for argument validation
    #[inline]
    pub fn input_schema(&self) -> &JSONSchema {
        &self.input_schema
    }

    /// Compiled output schema, if the tool declared one
    #[inline]
    pub fn output_schema(&self) -> Option<&JSONSchema> {
        self.output_schema.as_ref()
    }

    /// The callable behind this tool
    #[inline]
    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }
}

/// Catalog of tools exposed over `tools/list` and `tools/call`.
///
/// Names are unique; re-registering a name replaces the previous entry.
/// Iteration order is by name so pagination cursors stay stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schemas
    pub async fn register<H>(&self, tool: Tool, handler: H) -> Result<()>
    where
        H: ToolHandler + 'static,
    {
        let input_schema = compile_schema(&tool.input_schema)
            .with_context(|| format!("input schema for tool '{}'", tool.name))?;
        let output_schema = match &tool.output_schema {
            Some(schema) => Some(
                compile_schema(schema)
                    .with_context(|| format!("output schema for tool '{}'", tool.name))?,
            ),
            None => None,
        };

        let name = tool.name.clone();
        let registered = Arc::new(RegisteredTool {
            tool,
            input_schema,
            output_schema,
            handler: Arc::new(handler),
        });

        self.tools.write().await.insert(name.clone(), registered);
        debug!("Registered tool: {}", name);
        Ok(())
    }

    /// Look up a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Ordered snapshot of tool descriptors
    pub async fn snapshot(&self) -> Vec<Tool> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| t.tool.clone())
            .collect()
    }

    /// Number of registered tools
    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Whether the catalog is empty
    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }
}
