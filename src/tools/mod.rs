//! Tool dispatch table.
//!
//! A fixed set of tools, each a [`ToolDefinition`] (protocol metadata plus an
//! input schema) paired with a [`ToolHandler`]. [`ToolRegistry::call`] checks
//! arguments against the schema before the handler ever sees them.

pub mod analysis;
pub mod fetch;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::Tool;

pub use fetch::{HttpFetcher, PageFetcher};
pub use schema::SchemaError;

/// Why a tool call failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No tool registered under that name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    /// Arguments failed schema or handler checks
    #[error("{0}")]
    InvalidParams(String),
    /// The tool ran and failed
    #[error("{0}")]
    Execution(String),
}

impl From<SchemaError> for ToolError {
    fn from(err: SchemaError) -> Self {
        Self::InvalidParams(err.to_string())
    }
}

impl From<crate::Error> for ToolError {
    fn from(err: crate::Error) -> Self {
        Self::Execution(err.to_string())
    }
}

/// Behaviour behind one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Run with schema-checked, coerced arguments and return the text payload.
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolError>;
}

/// A tool's protocol metadata and handler.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Metadata advertised in `tools/list`
    pub tool: Tool,
    /// Implementation
    pub handler: Arc<dyn ToolHandler>,
}

/// Name-keyed set of tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in analysis tools.
    #[must_use]
    pub fn with_builtin(fetcher: Arc<dyn PageFetcher>) -> Self {
        let mut registry = Self::new();
        for definition in analysis::definitions(fetcher) {
            registry.register(definition);
        }
        registry
    }

    /// Add (or replace) a tool.
    pub fn register(&mut self, definition: ToolDefinition) {
        self.tools.insert(definition.tool.name.clone(), definition);
    }

    /// Metadata for every tool, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.tools.values().map(|d| d.tool.clone()).collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `true` when no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `arguments` and invoke `name`.
    pub async fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        let definition = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = schema::validate(arguments, &definition.tool.input_schema)?;
        debug!(tool = name, "Invoking tool");
        definition.handler.call(args).await
    }
}
