//! Readwise (v2) and Reader (v3) API client plus the MCP tools that wrap it.
//!
//! The MCP core only knows the `ToolExecutor` contract; [`ReadwiseTools`] is
//! the implementation the server binary plugs in.

pub mod client;
pub mod tools;
pub mod types;

pub use client::{ReadwiseClient, ReadwiseClientOptions, ReadwiseError};
pub use tools::{ReadwiseTool, ReadwiseTools, tool_catalog};

/// Production API root. Both the v2 and v3 APIs hang off it.
pub const DEFAULT_BASE_URL: &str = "https://readwise.io";
