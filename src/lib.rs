pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod tools;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioCaptureEncoder, AudioDevices,
    AudioFile, AudioFrame, AudioOutput, AudioSource, ConfiguredDevices, PlaybackScheduler,
    VolumeMeter,
};
pub use config::Config;
pub use device::{BatterySensor, DeviceState, DeviceStateStore, DeviceStateView, SysfsBattery};
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use live::{LiveConnector, SessionTransport, WebSocketConnector};
pub use session::{
    ConnectionState, ConversationLog, LiveSession, LogEntry, Role, SessionConfig, SessionStatus,
    TranscriptAssembler,
};
pub use tools::{ToolCall, ToolDispatcher};
