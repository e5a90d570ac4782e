//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Output device as shown to the operator
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all output devices on the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Voice-friendly rates the device can run at, and its channel counts
fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [8000u32, 16000, 22050, 32000, 44100, 48000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels)
}

/// Find an output device by name, or the host default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}
