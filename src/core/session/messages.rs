//! Live protocol message types.
//!
//! Every frame is one JSON object whose single top-level field names the
//! message. Outbound frames are built from [`OutboundEnvelope`]. Inbound
//! frames are decoded exactly once, here, into a list of
//! [`InboundEnvelope`]s in the order they must be handled.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, generation config, instruction, tools. Always first.
//! - realtimeInput - Media chunks (microphone audio, vision frames)
//! - clientContent - Text turns
//! - toolResponse - Results for a batch of tool calls
//!
//! Server messages (received from server):
//! - setupComplete - Setup accepted
//! - serverContent - Model turn parts, interruption, turn completion, transcripts
//! - toolCall - Batch of function calls
//! - toolCallCancellation - Calls the server no longer needs
//! - sessionResumptionUpdate - New resumable session handle
//! - goAway - Server will close soon
//! - error - Server-side failure

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{SessionError, SessionResult};
use crate::core::audio::pcm;
use crate::core::tools::{ToolCallRequest, ToolResult};

// =============================================================================
// Wire Types: Client
// =============================================================================

/// A client frame as serialized on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupPayload),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_resumption: Option<SessionResumption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<EmptyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<Value>,
}

/// Resume a previous session. An absent handle opts into resumption updates.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionResumption {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

// =============================================================================
// Outbound Envelopes
// =============================================================================

/// Session setup, sent exactly once as the first message.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    /// Fully qualified model name
    pub model: String,
    pub system_instruction: Option<String>,
    pub tools: Vec<Value>,
    pub response_modalities: Vec<String>,
    pub voice: Option<String>,
    pub resume_handle: Option<String>,
    pub transcription: bool,
}

/// A message the session sends to the agent.
#[derive(Debug, Clone)]
pub enum OutboundEnvelope {
    Setup(SetupRequest),
    /// Base64 PCM16 microphone audio
    AudioChunk { mime_type: String, data: String },
    /// Base64 encoded still frame
    VisionFrame { mime_type: String, data: String },
    /// User text, optionally closing the user's turn
    TextContext { text: String, turn_complete: bool },
    /// Results for one batch of tool calls
    ToolResults(Vec<ToolResult>),
}

impl OutboundEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEnvelope::Setup(_) => "setup",
            OutboundEnvelope::AudioChunk { .. } => "audio_chunk",
            OutboundEnvelope::VisionFrame { .. } => "vision_frame",
            OutboundEnvelope::TextContext { .. } => "text_context",
            OutboundEnvelope::ToolResults(_) => "tool_results",
        }
    }

    pub fn to_client_message(&self) -> ClientMessage {
        match self {
            OutboundEnvelope::Setup(setup) => ClientMessage::Setup(setup.to_payload()),
            OutboundEnvelope::AudioChunk { mime_type, data }
            | OutboundEnvelope::VisionFrame { mime_type, data } => {
                ClientMessage::RealtimeInput(RealtimeInput {
                    media_chunks: vec![Blob {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    }],
                })
            }
            OutboundEnvelope::TextContext {
                text,
                turn_complete,
            } => ClientMessage::ClientContent(ClientContent {
                turns: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::text(text.clone())],
                }],
                turn_complete: *turn_complete,
            }),
            OutboundEnvelope::ToolResults(results) => ClientMessage::ToolResponse(ToolResponse {
                function_responses: results
                    .iter()
                    .map(|r| FunctionResponse {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        response: r.response.clone(),
                    })
                    .collect(),
            }),
        }
    }
}

impl SetupRequest {
    fn to_payload(&self) -> SetupPayload {
        SetupPayload {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: self.response_modalities.clone(),
                speech_config: self.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
            tools: if self.tools.is_empty() {
                Vec::new()
            } else {
                vec![ToolSet {
                    function_declarations: self.tools.clone(),
                }]
            },
            session_resumption: Some(SessionResumption {
                handle: self.resume_handle.clone(),
            }),
            input_audio_transcription: self.transcription.then(EmptyConfig::default),
            output_audio_transcription: self.transcription.then(EmptyConfig::default),
        }
    }
}

// =============================================================================
// Wire Types: Server
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    tool_call_cancellation: Option<RawToolCallCancellation>,
    session_resumption_update: Option<RawResumptionUpdate>,
    go_away: Option<RawGoAway>,
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawContent>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    input_transcription: Option<RawTranscription>,
    output_transcription: Option<RawTranscription>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    text: Option<String>,
    inline_data: Option<RawBlob>,
    function_call: Option<RawFunctionCall>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlob {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RawFunctionCall {
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<RawFunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct RawToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResumptionUpdate {
    new_handle: Option<String>,
    #[serde(default)]
    resumable: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    time_left: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

// =============================================================================
// Inbound Envelopes
// =============================================================================

/// Whose speech a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSource {
    User,
    Agent,
}

/// A decoded message from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    SetupComplete,
    /// Mono PCM16 agent speech
    AudioChunk { samples: Vec<i16>, sample_rate: u32 },
    TextFragment(String),
    /// A batch of tool calls to answer with one response
    ToolCallRequest(Vec<ToolCallRequest>),
    ToolCallCancellation(Vec<String>),
    /// The agent's turn was cut off; queued audio must be discarded
    Interrupted,
    TurnComplete,
    Transcription { source: TranscriptSource, text: String },
    SessionResumptionUpdate { handle: Option<String>, resumable: bool },
    GoAway { time_left: Option<String> },
    Error { code: Option<i64>, message: String },
}

impl InboundEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEnvelope::SetupComplete => "setup_complete",
            InboundEnvelope::AudioChunk { .. } => "audio_chunk",
            InboundEnvelope::TextFragment(_) => "text_fragment",
            InboundEnvelope::ToolCallRequest(_) => "tool_call_request",
            InboundEnvelope::ToolCallCancellation(_) => "tool_call_cancellation",
            InboundEnvelope::Interrupted => "interrupted",
            InboundEnvelope::TurnComplete => "turn_complete",
            InboundEnvelope::Transcription { .. } => "transcription",
            InboundEnvelope::SessionResumptionUpdate { .. } => "session_resumption_update",
            InboundEnvelope::GoAway { .. } => "go_away",
            InboundEnvelope::Error { .. } => "error",
        }
    }
}

fn to_request(call: RawFunctionCall) -> ToolCallRequest {
    ToolCallRequest {
        id: call.id,
        name: call.name,
        args: if call.args.is_null() {
            Value::Object(Default::default())
        } else {
            call.args
        },
    }
}

/// Decode one inbound frame.
///
/// Fields the protocol may add later are ignored. Within a `serverContent`
/// message the interruption comes first and turn completion last, so
/// playback is flushed before any audio in the same frame is queued.
pub fn decode_server_message(text: &str) -> SessionResult<Vec<InboundEnvelope>> {
    let raw: RawServerMessage =
        serde_json::from_str(text).map_err(|e| SessionError::ProtocolDecode(e.to_string()))?;
    let mut out = Vec::new();

    if raw.setup_complete.is_some() {
        out.push(InboundEnvelope::SetupComplete);
    }

    if let Some(content) = raw.server_content {
        if content.interrupted {
            out.push(InboundEnvelope::Interrupted);
        }

        let mut inline_calls = Vec::new();
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                inline_calls.push(to_request(call));
                continue;
            }
            if let Some(blob) = part.inline_data {
                if blob.mime_type.starts_with("audio/pcm") || blob.mime_type.is_empty() {
                    match pcm::decode_base64(&blob.data) {
                        Ok(samples) => {
                            let sample_rate = pcm::rate_from_mime(&blob.mime_type)
                                .unwrap_or(pcm::OUTPUT_SAMPLE_RATE);
                            out.push(InboundEnvelope::AudioChunk {
                                samples,
                                sample_rate,
                            });
                        }
                        Err(e) => {
                            tracing::warn!(mime_type = %blob.mime_type, "Skipping undecodable audio part: {}", e);
                        }
                    }
                } else {
                    tracing::trace!(mime_type = %blob.mime_type, "Ignoring non-audio inline data");
                }
            }
            if let Some(text) = part.text
                && !part.thought
                && !text.is_empty()
            {
                out.push(InboundEnvelope::TextFragment(text));
            }
        }
        if !inline_calls.is_empty() {
            out.push(InboundEnvelope::ToolCallRequest(inline_calls));
        }

        for (source, transcript) in [
            (TranscriptSource::User, content.input_transcription),
            (TranscriptSource::Agent, content.output_transcription),
        ] {
            if let Some(text) = transcript.and_then(|t| t.text)
                && !text.is_empty()
            {
                out.push(InboundEnvelope::Transcription { source, text });
            }
        }

        if content.turn_complete {
            out.push(InboundEnvelope::TurnComplete);
        }
    }

    if let Some(tool_call) = raw.tool_call {
        out.push(InboundEnvelope::ToolCallRequest(
            tool_call.function_calls.into_iter().map(to_request).collect(),
        ));
    }

    if let Some(cancel) = raw.tool_call_cancellation {
        out.push(InboundEnvelope::ToolCallCancellation(cancel.ids));
    }

    if let Some(update) = raw.session_resumption_update {
        out.push(InboundEnvelope::SessionResumptionUpdate {
            handle: update.new_handle,
            resumable: update.resumable,
        });
    }

    if let Some(go_away) = raw.go_away {
        out.push(InboundEnvelope::GoAway {
            time_left: go_away.time_left,
        });
    }

    if let Some(error) = raw.error {
        out.push(decode_error(error));
    }

    Ok(out)
}

fn decode_error(error: Value) -> InboundEnvelope {
    match error {
        Value::String(message) => InboundEnvelope::Error {
            code: None,
            message,
        },
        other => InboundEnvelope::Error {
            code: other.get("code").and_then(Value::as_i64),
            message: other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        },
    }
}
