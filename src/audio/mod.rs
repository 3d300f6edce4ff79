pub mod backend;
pub mod encoder;
pub mod file;
pub mod playback;
pub mod resample;
pub mod timeline;

#[cfg(feature = "device-audio")]
pub mod device;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioFrame, AudioOutput,
    AudioSource, ConfiguredDevices, OutputKind, PlaybackBuffer, SilenceBackend, SourceId,
    INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use encoder::{AudioCaptureEncoder, FrameAccumulator, VolumeMeter, FRAME_SIZE};
pub use file::{AudioFile, FileBackend};
pub use resample::{resample, StreamResampler};
pub use playback::{PlaybackScheduler, PlaybackSender, PlaybackTask, ScheduledChunk};
pub use timeline::VirtualOutput;
