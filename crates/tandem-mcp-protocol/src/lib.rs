//! # MCP protocol vocabulary
//!
//! Types the RPC core needs to understand: the initialize handshake, the
//! protocol version list, and the method names exchanged on the wire. Method
//! payloads beyond the handshake stay opaque JSON values.

pub mod initialize;
pub mod logging;
pub mod methods;
pub mod version;

pub use initialize::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, LoggingCapabilities,
    PromptsCapabilities, ResourcesCapabilities, RootsCapabilities, ServerCapabilities,
    ToolsCapabilities,
};
pub use logging::{LoggingLevel, Role};
pub use version::{McpVersion, UnsupportedProtocolVersion};
