//! Audio output sinks
//!
//! A sink accepts interleaved little-endian PCM and blocks while the device
//! is behind, which is what paces the playback thread at the real playback
//! rate.

use crate::error::AudioError;

/// Blocking PCM writer
pub trait AudioSink: Send {
    /// Write a block, returning once the device has room for it
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;
}

/// Convert little-endian PCM of the given width into f32 samples
///
/// 8-bit input is unsigned (offset binary); wider widths are signed. Trailing
/// bytes that do not form a whole sample are ignored.
pub fn pcm_to_f32(bits_per_sample: u16, pcm: &[u8]) -> Vec<f32> {
    match bits_per_sample {
        8 => pcm.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        16 => pcm
            .chunks_exact(2)
            .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32 / 32768.0)
            .collect(),
        24 => pcm
            .chunks_exact(3)
            .map(|s| {
                // Sign-extend by placing the sample in the top three bytes
                let v = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        32 => pcm
            .chunks_exact(4)
            .map(|s| i32::from_le_bytes([s[0], s[1], s[2], s[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(feature = "device")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "device")]
mod cpal_sink {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::StreamConfig;
    use crossbeam_channel::{bounded, Sender};

    use super::{pcm_to_f32, AudioSink};
    use crate::audio::device::find_output_device;
    use crate::config::AudioConfig;
    use crate::error::AudioError;

    /// Blocks buffered ahead of the device callback
    const QUEUED_BLOCKS: usize = 4;

    /// Live output device
    ///
    /// The cpal stream lives on its own thread (streams are not `Send` on
    /// every host); `write` converts PCM and hands it to the stream over a
    /// bounded channel, blocking while the channel is full.
    pub struct CpalSink {
        bits_per_sample: u16,
        bytes_per_sample: usize,
        /// Bytes of a sample split across two writes
        residual: Vec<u8>,
        samples_tx: Option<Sender<Vec<f32>>>,
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
        device_name: String,
    }

    impl CpalSink {
        /// Open the named (or default) output device with the given format
        pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
            let device = find_output_device(config.device.as_deref())?;
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let stream_config = StreamConfig {
                channels: config.channels,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (samples_tx, samples_rx) = bounded::<Vec<f32>>(QUEUED_BLOCKS);
            let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
            let running = Arc::new(AtomicBool::new(true));
            let running_for_loop = running.clone();

            let handle = thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || {
                    let mut pending: VecDeque<f32> = VecDeque::new();
                    let stream = device.build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            while pending.len() < data.len() {
                                match samples_rx.try_recv() {
                                    Ok(samples) => pending.extend(samples),
                                    Err(_) => break,
                                }
                            }
                            for out in data.iter_mut() {
                                *out = pending.pop_front().unwrap_or(0.0);
                            }
                        },
                        |err| tracing::error!("Output stream error: {}", err),
                        None,
                    );

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    while running_for_loop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    // Stream is dropped here, stopping output
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = handle.join();
                    return Err(e);
                }
                Err(_) => return Err(AudioError::SinkClosed),
            }

            Ok(Self {
                bits_per_sample: config.bits_per_sample,
                bytes_per_sample: config.bits_per_sample as usize / 8,
                residual: Vec::new(),
                samples_tx: Some(samples_tx),
                running,
                thread_handle: Some(handle),
                device_name,
            })
        }

        pub fn device_name(&self) -> &str {
            &self.device_name
        }
    }

    impl AudioSink for CpalSink {
        fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
            self.residual.extend_from_slice(pcm);
            let whole = self.residual.len() - self.residual.len() % self.bytes_per_sample;
            let samples = pcm_to_f32(self.bits_per_sample, &self.residual[..whole]);
            self.residual.drain(..whole);

            let tx = self.samples_tx.as_ref().ok_or(AudioError::SinkClosed)?;
            tx.send(samples).map_err(|_| AudioError::SinkClosed)
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            self.samples_tx.take();
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_conversion() {
        let samples = pcm_to_f32(16, &[0x00, 0x80, 0x00, 0x00, 0x00, 0x40]);
        assert_eq!(samples, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_pcm8_is_unsigned() {
        assert_eq!(pcm_to_f32(8, &[0, 128, 192]), vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_pcm24_sign_extension() {
        let samples = pcm_to_f32(24, &[0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x40]);
        assert_eq!(samples[0], -1.0 / 8_388_608.0);
        assert_eq!(samples[1], 0.5);
    }

    #[test]
    fn test_partial_sample_ignored() {
        assert_eq!(pcm_to_f32(32, &[0, 0, 0, 0x40, 1, 2]).len(), 1);
    }
}
