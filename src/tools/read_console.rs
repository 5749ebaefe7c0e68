//! `read-console`: return the page's captured console output.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::protocol::{ContentItem, ToolCallResult};
use crate::tools::{Component, PageTool, ToolContext, ToolDescriptor};

/// Tool name.
pub const NAME: &str = "read-console";

/// Server half of the tool.
pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(NAME, "Read the console log").with_input_schema(json!({
        "type": "object",
        "properties": {
            "tail": {
                // Some clients send numbers as strings; both are accepted.
                "type": ["number", "string"],
                "description": "Number (integer) of most recent console entries to return. If not specified, returns all entries."
            }
        }
    }))
}

/// Console method that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log`
    Log,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
    /// `console.info`
    Info,
}

impl ConsoleLevel {
    fn label(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "LOG",
            ConsoleLevel::Warn => "WARN",
            ConsoleLevel::Error => "ERROR",
            ConsoleLevel::Info => "INFO",
        }
    }
}

/// One captured console call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Level.
    pub level: ConsoleLevel,
    /// Arguments as passed to the console method.
    pub args: Vec<Value>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ConsoleEntry {
    /// `[YYYY-MM-DD HH:MM:SS.mmm] [LEVEL] args…` in local time.
    pub fn format(&self) -> String {
        let timestamp = Local
            .timestamp_millis_opt(self.timestamp)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| self.timestamp.to_string());
        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                Value::Object(_) | Value::Array(_) | Value::Null => {
                    serde_json::to_string_pretty(arg).unwrap_or_else(|_| arg.to_string())
                }
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("[{}] [{}] {}", timestamp, self.level.label(), args)
    }
}

/// Page component that records console output.
#[derive(Debug, Default)]
pub struct ConsoleCapture {
    entries: Mutex<Vec<ConsoleEntry>>,
}

impl ConsoleCapture {
    /// Empty capture buffer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a console call made now.
    pub fn record(&self, level: ConsoleLevel, args: Vec<Value>) {
        self.push(ConsoleEntry {
            level,
            args,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Record an entry with its own timestamp.
    pub fn push(&self, entry: ConsoleEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// All entries, or the most recent `tail`.
    pub fn logs(&self, tail: Option<usize>) -> Vec<ConsoleEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = tail.map_or(0, |n| entries.len().saturating_sub(n));
        entries[skip..].to_vec()
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReadConsoleArgs {
    #[serde(default)]
    tail: Option<Value>,
}

/// `tail` as a count: numbers and numeric strings, at least 1.
fn parse_tail(raw: Option<&Value>) -> Result<Option<usize>> {
    let number = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match number {
        Some(n) if n.is_finite() && n >= 1.0 => Ok(Some(n.trunc() as usize)),
        Some(_) => Err(Error::InvalidParams("tail must be at least 1".into())),
        None => Err(Error::InvalidParams("tail must be a number".into())),
    }
}

/// Page half of the tool.
pub struct ReadConsoleTool {
    capture: Arc<ConsoleCapture>,
}

impl ReadConsoleTool {
    /// Serve logs from `capture`, which the page host feeds.
    pub fn new(capture: Arc<ConsoleCapture>) -> Self {
        Self { capture }
    }
}

#[async_trait]
impl PageTool for ReadConsoleTool {
    fn name(&self) -> &str {
        NAME
    }

    async fn call(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let args: ReadConsoleArgs = if params.is_null() {
            ReadConsoleArgs::default()
        } else {
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?
        };
        let tail = parse_tail(args.tail.as_ref())?;
        let capture = ctx.require_component::<ConsoleCapture>()?;

        let logs = capture.logs(tail);
        let text = if logs.is_empty() {
            "No console logs found.".to_owned()
        } else {
            logs.iter()
                .map(ConsoleEntry::format)
                .collect::<Vec<_>>()
                .join("\n")
        };

        ToolCallResult::new(vec![ContentItem::text(text)]).into_value()
    }

    fn component(&self) -> Option<Component> {
        Some(Arc::clone(&self.capture) as Component)
    }
}
