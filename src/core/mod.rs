pub mod audio;
pub mod camera;
pub mod runtime;
pub mod session;
pub mod tools;
pub mod vision;

// Re-export commonly used types for convenience
pub use audio::{
    AudioCaptureStream, AudioError, AudioFrame, AudioPlaybackQueue, CaptureConfig,
    CaptureDeviceError, ClockedNullSink, PlaybackSink,
};
pub use camera::{CameraConfig, CameraControlSurface, CameraState, UserInput};
pub use runtime::{LiveSession, LiveSessionConfig, SessionEvent, SessionEvents, SessionMedia};
pub use session::{
    ConnectionState, Credential, EndpointConfig, InboundEnvelope, OutboundEnvelope, SessionConfig,
    SessionError, SessionResult, SessionTransport, TransportEvent,
};
pub use tools::{ToolCallDispatcher, ToolCallRequest, ToolExecutionError, ToolResult};
pub use vision::{FrameError, FrameSource, StillImageSource, VisionClient, VisionSampler};
