//! Agent tool calls.
//!
//! The agent invokes local capabilities by name. Every call carries an
//! optional correlation id that is echoed on its result.

mod descriptor;
mod dispatcher;

use serde_json::{Value, json};
use thiserror::Error;

use crate::core::camera::CameraError;

pub use descriptor::{
    LOOK_AT, MOVE, ParameterType, RESET_VIEW, ToolDescriptor, ToolParameter, camera_tools,
};
pub use dispatcher::{SharedCamera, ToolCallDispatcher};

/// Failure of a single tool call. Reported to the agent as `{error}`.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("Tool handler panicked: {0}")]
    Panicked(String),
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
}

/// Outcome of one tool call, correlated by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

impl ToolResult {
    pub fn new(request: &ToolCallRequest, response: Value) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            response,
        }
    }

    pub fn error(request: &ToolCallRequest, message: &str) -> Self {
        Self::new(request, json!({ "error": message }))
    }

    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}
