use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::descriptor::{self, ToolDescriptor, camera_tools};
use super::{ToolCallRequest, ToolExecutionError, ToolResult};
use crate::core::camera::CameraCapabilities;

/// Camera shared between the render loop and tool execution.
pub type SharedCamera = Arc<Mutex<dyn CameraCapabilities>>;

type ToolHandler = fn(&mut dyn CameraCapabilities, &Value) -> Result<Value, ToolExecutionError>;

/// Executes agent tool calls against the camera.
///
/// The table is built once at construction. [`descriptors`](Self::descriptors)
/// feeds the session setup from the same table, so everything the agent is
/// told about can be executed.
pub struct ToolCallDispatcher {
    camera: SharedCamera,
    descriptors: Vec<ToolDescriptor>,
    handlers: HashMap<&'static str, ToolHandler>,
}

impl ToolCallDispatcher {
    pub fn new(camera: SharedCamera) -> Self {
        let descriptors = camera_tools();
        let mut handlers: HashMap<&'static str, ToolHandler> = HashMap::new();
        handlers.insert(descriptor::LOOK_AT, handle_look_at);
        handlers.insert(descriptor::RESET_VIEW, handle_reset_view);
        handlers.insert(descriptor::MOVE, handle_move);

        Self {
            camera,
            descriptors,
            handlers,
        }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Function declarations for the session setup.
    pub fn declarations(&self) -> Vec<Value> {
        self.descriptors.iter().map(|d| d.to_declaration()).collect()
    }

    /// Execute a batch of calls.
    ///
    /// Always returns one result per request, in request order. A failing
    /// or panicking handler only affects its own result.
    pub fn handle(&self, requests: &[ToolCallRequest]) -> Vec<ToolResult> {
        requests.iter().map(|req| self.handle_one(req)).collect()
    }

    fn handle_one(&self, request: &ToolCallRequest) -> ToolResult {
        let Some(handler) = self.handlers.get(request.name.as_str()) else {
            tracing::warn!(tool = %request.name, "Agent called unknown tool");
            return ToolResult::error(request, "Unknown tool");
        };

        tracing::debug!(
            tool = %request.name,
            call_id = ?request.id,
            args = %request.args,
            "Executing tool call"
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut camera = self.camera.lock();
            handler(&mut *camera, &request.args)
        }))
        .unwrap_or_else(|panic| Err(ToolExecutionError::Panicked(panic_message(&*panic))));

        match outcome {
            Ok(response) => ToolResult::new(request, response),
            Err(e) => {
                tracing::warn!(tool = %request.name, error = %e, "Tool call failed");
                ToolResult::error(request, &e.to_string())
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn number_arg(args: &Value, name: &str) -> Result<f64, ToolExecutionError> {
    let value = args
        .get(name)
        .ok_or_else(|| ToolExecutionError::MissingArgument(name.to_string()))?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.ok_or_else(|| {
        ToolExecutionError::InvalidArgument(format!("{name} must be a number, got {value}"))
    })
}

fn handle_look_at(
    camera: &mut dyn CameraCapabilities,
    args: &Value,
) -> Result<Value, ToolExecutionError> {
    let u = number_arg(args, "u")?;
    let v = number_arg(args, "v")?;
    let status = camera.look_at(u as f32, v as f32)?;
    Ok(json!({ "status": status, "u": u.clamp(0.0, 1.0), "v": v.clamp(0.0, 1.0) }))
}

fn handle_reset_view(
    camera: &mut dyn CameraCapabilities,
    _args: &Value,
) -> Result<Value, ToolExecutionError> {
    let status = camera.reset_view()?;
    Ok(json!({ "status": status }))
}

fn handle_move(
    camera: &mut dyn CameraCapabilities,
    args: &Value,
) -> Result<Value, ToolExecutionError> {
    let distance = number_arg(args, "distance")?;
    let status = camera.move_by(distance as f32)?;
    Ok(json!({ "status": status, "distance": distance }))
}
