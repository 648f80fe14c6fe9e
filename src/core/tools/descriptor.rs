use serde::Serialize;
use serde_json::{Map, Value, json};

/// Schema type of a tool parameter, in the provider's uppercase spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterType {
    Number,
    Integer,
    String,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: &'static str,
    pub kind: ParameterType,
    pub description: &'static str,
    pub required: bool,
}

/// A capability the agent may invoke. Fixed for the life of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    /// Function declaration as sent in the session setup.
    pub fn to_declaration(&self) -> Value {
        let mut decl = Map::new();
        decl.insert("name".to_string(), json!(self.name));
        decl.insert("description".to_string(), json!(self.description));

        if !self.parameters.is_empty() {
            let mut properties = Map::new();
            for p in &self.parameters {
                properties.insert(
                    p.name.to_string(),
                    json!({ "type": p.kind, "description": p.description }),
                );
            }
            let required: Vec<&str> = self
                .parameters
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name)
                .collect();
            decl.insert(
                "parameters".to_string(),
                json!({
                    "type": "OBJECT",
                    "properties": properties,
                    "required": required,
                }),
            );
        }
        Value::Object(decl)
    }
}

pub const LOOK_AT: &str = "look_at";
pub const RESET_VIEW: &str = "reset_view";
pub const MOVE: &str = "move";

/// Descriptors for the camera tools.
pub fn camera_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: LOOK_AT,
            description: "Turn the camera toward a point of the panorama. u runs left to right \
                          and v top to bottom, both from 0 to 1, with (0.5, 0.5) at the center.",
            parameters: vec![
                ToolParameter {
                    name: "u",
                    kind: ParameterType::Number,
                    description: "Horizontal panorama coordinate in [0, 1]",
                    required: true,
                },
                ToolParameter {
                    name: "v",
                    kind: ParameterType::Number,
                    description: "Vertical panorama coordinate in [0, 1]",
                    required: true,
                },
            ],
        },
        ToolDescriptor {
            name: RESET_VIEW,
            description: "Return the camera to its starting position and orientation.",
            parameters: vec![],
        },
        ToolDescriptor {
            name: MOVE,
            description: "Walk the camera forward along the current view direction. \
                          Negative distances walk backward.",
            parameters: vec![ToolParameter {
                name: "distance",
                kind: ParameterType::Number,
                description: "Distance to travel in scene units",
                required: true,
            }],
        },
    ]
}
