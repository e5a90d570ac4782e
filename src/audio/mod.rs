//! Audio subsystem module

pub mod buffer;
#[cfg(feature = "device")]
pub mod device;
pub mod jitter;
pub mod sink;
pub mod source;

pub use buffer::{AudioBlock, PlaybackQueue, QueueEntry};
#[cfg(feature = "device")]
pub use device::{list_output_devices, OutputDeviceInfo};
pub use jitter::{JitterBuffer, SharedJitterBuffer};
#[cfg(feature = "device")]
pub use sink::CpalSink;
pub use sink::AudioSink;
pub use source::{CaptureSource, ReaderSource};
