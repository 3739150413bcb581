//! Tools shipped with the server.
//!
//! - [`echo`]: returns its `text` argument unchanged

pub mod echo;

pub use echo::EchoTool;

use crate::error::McpError;
use crate::mcp::tools::ToolRegistry;

/// A registry holding every built-in tool, in listing order.
///
/// # Errors
///
/// Returns [`McpError::DuplicateTool`] if two built-ins share a name.
pub fn builtin_registry() -> Result<ToolRegistry, McpError> {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register() {
        let registry = builtin_registry().unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["echo"]);
    }
}
