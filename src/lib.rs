//! # page-mcp-bridge
//!
//! MCP (Model Context Protocol) bridge that lets an MCP client call tools
//! running inside a live development page.
//!
//! Three parties take part: the external MCP client, the dev-server process
//! and the page. The client talks JSON-RPC over HTTP to the dev server; the
//! dev server forwards each `tools/call` over a websocket to the page, which
//! runs the tool's handler and sends the result back. Handlers can in turn
//! call server methods that only the dev-server process can run (for example
//! writing a file), over the same channel.
//!
//! ## Channel topics
//!
//! | Topic | Direction |
//! |---|---|
//! | `mcp:bridge-ready` | page → server |
//! | `mcp:tool-call` | server → page |
//! | `mcp:tool-result` | page → server |
//! | `mcp:tool-server-call` | page → server |
//! | `mcp:tool-server-result` | server → page |
//!
//! Every request and response is correlated by a string `id` held in a
//! [`CallRegistry`] on the calling side. Results for unknown ids are logged
//! and dropped.
//!
//! ## Usage with an MCP client
//!
//! ```json
//! {
//!   "servers": {
//!     "dev-page": { "type": "http", "url": "http://127.0.0.1:3000/mcp" }
//!   }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod page;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tools;

pub use channel::{Channel, PageConnection};
pub use config::BridgeConfig;
pub use dispatcher::ServerDispatcher;
pub use envelope::{Envelope, Frame, Topic};
pub use error::{Error, Result};
#[cfg(feature = "http")]
pub use http::BridgeServer;
pub use page::{PageDispatcher, ServerProxy};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpMessage};
pub use registry::{CallRegistry, PendingCall};
pub use server::McpServer;
pub use tools::{PageTool, ToolContext, ToolDescriptor, ToolSet};
