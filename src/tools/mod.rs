//! Tool contract shared by both ends of the bridge.
//!
//! A tool is split along the process boundary. The dev server holds a
//! [`ToolDescriptor`]: name, description, schemas and the optional server
//! methods that only the server process can run. The page holds a
//! [`PageTool`]: the handler and an optional page-local component. Only data
//! crosses between them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::page::ServerProxy;
use crate::protocol::ToolDefinition;

pub mod read_console;
pub mod take_screenshot;

pub use read_console::{ConsoleCapture, ConsoleEntry, ConsoleLevel, ReadConsoleTool};
pub use take_screenshot::{CapturedScreenshot, ScreenCapture, TakeScreenshotTool};

/// A page-local component, downcast by handlers that know its type.
pub type Component = Arc<dyn Any + Send + Sync>;

// ============================================================================
// Server side
// ============================================================================

/// A method a page handler may invoke on the dev server.
#[async_trait]
pub trait ServerMethod: Send + Sync {
    /// Run the method with the params the page sent (`null` when absent).
    async fn call(&self, params: Value) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> ServerMethod for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, params: Value) -> Result<Value> {
        (self)(params).await
    }
}

/// Server-side registration record for one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Option<Value>,
    output_schema: Option<Value>,
    server: HashMap<String, Arc<dyn ServerMethod>>,
}

impl ToolDescriptor {
    /// Describe a tool with no schemas and no server methods.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
            server: HashMap::new(),
        }
    }

    /// Declare the JSON Schema tool arguments must satisfy.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Declare the JSON Schema `structuredContent` must satisfy.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Expose `method` to this tool's page handler.
    pub fn with_server_method(
        mut self,
        method: impl Into<String>,
        implementation: impl ServerMethod + 'static,
    ) -> Self {
        self.server.insert(method.into(), Arc::new(implementation));
        self
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tool description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Look up a server method by name.
    pub fn server_method(&self, method: &str) -> Option<Arc<dyn ServerMethod>> {
        self.server.get(method).cloned()
    }

    /// Names of the declared server methods, sorted.
    pub fn server_method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.server.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Definition as listed by `tools/list`.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            title: Some(self.name.clone()),
            description: self.description.clone(),
            input_schema: self
                .input_schema
                .clone()
                .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            output_schema: self.output_schema.clone(),
        }
    }

    /// Check call arguments against the input schema, if any.
    pub fn validate_input(&self, arguments: &Value) -> Result<()> {
        let Some(schema) = &self.input_schema else {
            return Ok(());
        };
        validate(schema, arguments).map_err(|reason| {
            Error::InvalidParams(format!("Invalid arguments for tool {}: {}", self.name, reason))
        })
    }

    /// Check a tool result against the output schema, if any.
    ///
    /// Error results are exempt; successful ones must then carry
    /// `structuredContent`.
    pub fn validate_output(&self, result: &Value) -> Result<()> {
        let Some(schema) = &self.output_schema else {
            return Ok(());
        };
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }
        let structured = result.get("structuredContent").ok_or_else(|| {
            Error::InvalidParams(format!(
                "Tool {} has an output schema but did not return structured content",
                self.name
            ))
        })?;
        validate(schema, structured).map_err(|reason| {
            Error::InvalidParams(format!(
                "Invalid structured content for tool {}: {}",
                self.name, reason
            ))
        })
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .field("server", &self.server_method_names())
            .finish()
    }
}

fn validate(schema: &Value, instance: &Value) -> std::result::Result<(), String> {
    let validator = jsonschema::validator_for(schema).map_err(|e| format!("bad schema: {e}"))?;
    let errors: Vec<String> = validator.iter_errors(instance).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// The tools a server was configured with, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    ordered: Vec<Arc<ToolDescriptor>>,
    by_name: HashMap<String, Arc<ToolDescriptor>>,
}

impl ToolSet {
    /// Index `tools`, rejecting duplicate names and names containing `:`,
    /// which is reserved for `tool:method` routing.
    pub fn new(tools: impl IntoIterator<Item = ToolDescriptor>) -> Result<Self> {
        let mut set = Self::default();
        for tool in tools {
            if tool.name.is_empty() || tool.name.contains(':') {
                return Err(Error::InvalidParams(format!(
                    "invalid tool name: {:?}",
                    tool.name
                )));
            }
            if set.by_name.contains_key(&tool.name) {
                return Err(Error::InvalidParams(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
            let tool = Arc::new(tool);
            set.by_name.insert(tool.name.clone(), Arc::clone(&tool));
            set.ordered.push(tool);
        }
        Ok(set)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.by_name.get(name)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.ordered.iter().map(|t| t.definition()).collect()
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.ordered.iter()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

// ============================================================================
// Page side
// ============================================================================

/// What a handler sees while it runs in the page.
#[derive(Clone)]
pub struct ToolContext {
    component: Option<Component>,
    server: ServerProxy,
}

impl ToolContext {
    /// Assemble a context for one invocation.
    pub fn new(component: Option<Component>, server: ServerProxy) -> Self {
        Self { component, server }
    }

    /// The tool's mounted component, if mounted and of type `T`.
    pub fn component<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.component.clone()?.downcast::<T>().ok()
    }

    /// Like [`ToolContext::component`] but fails when it is missing.
    pub fn require_component<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.component::<T>().ok_or_else(|| {
            Error::HandlerFailure(format!(
                "component {} is not mounted",
                crate::page::element_name(self.server.tool_name())
            ))
        })
    }

    /// Proxy for this tool's server methods.
    pub fn server(&self) -> &ServerProxy {
        &self.server
    }
}

/// A tool's page half.
#[async_trait]
pub trait PageTool: Send + Sync {
    /// Tool name; must match the server-side descriptor.
    fn name(&self) -> &str;

    /// Run the tool.
    async fn call(&self, ctx: ToolContext, params: Value) -> Result<Value>;

    /// Component to mount under `<name>-element` when the page activates.
    fn component(&self) -> Option<Component> {
        None
    }
}

/// A [`PageTool`] backed by a closure.
pub struct FnTool<F> {
    name: String,
    handler: F,
}

/// Build a page tool from a name and an async handler.
pub fn page_tool<F, Fut>(name: impl Into<String>, handler: F) -> Arc<dyn PageTool>
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnTool {
        name: name.into(),
        handler,
    })
}

#[async_trait]
impl<F, Fut> PageTool for FnTool<F>
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        (self.handler)(ctx, params).await
    }
}

/// Server halves of the built-in tools.
pub fn builtin_descriptors(config: &crate::config::BridgeConfig) -> Vec<ToolDescriptor> {
    vec![
        read_console::descriptor(),
        take_screenshot::descriptor(config.screenshots_dir.clone()),
    ]
}
