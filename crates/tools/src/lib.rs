//! Tool registry for Cortex.
//!
//! Tools are named callables with a JSON Schema for their arguments. The
//! registry validates arguments before invocation and bounds every call with
//! a timeout; the execution router owns retries and ordering.

pub mod builtin;
pub mod error;
pub mod registry;
pub mod schema;
pub mod tool;

pub use builtin::{register_builtins, Calculator, FileReader, HttpFetch, ToolsConfig};
pub use error::{ToolError, ToolResult};
pub use registry::{RegistryStats, ToolRegistry};
pub use tool::{schema_for, Tool, ToolMetadata};
