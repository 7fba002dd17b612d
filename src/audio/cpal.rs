// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use tracing::{error, info, span, warn, Level};

use crate::audio::mixer::AudioMixer;
use crate::audio::thread_priority::{
    configure_render_thread_priority, render_thread_priority, rt_audio_enabled,
};
use crate::audio::Device as AudioDevice;
use crate::config;

/// Frames mixed per producer iteration.
const BLOCK_FRAMES: usize = 512;

/// Ring capacity as a fraction of a second. Keeps latency low enough to play.
const RING_DIVISOR: usize = 50;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The number of channels to open.
    num_channels: u16,
    /// The sample rate to open the device at.
    sample_rate: u32,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// Keeps the producer and output threads running until dropped.
struct OutputManager {
    /// Tells both threads to exit.
    stop: Arc<AtomicBool>,
    /// Handle to the producer thread (fills ring buffer).
    producer_thread: Option<thread::JoinHandle<()>>,
    /// Handle to the output thread (owns the cpal stream).
    output_thread: Option<thread::JoinHandle<()>>,
}

impl crate::audio::Output for OutputManager {}

impl Drop for OutputManager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        // Wait for threads to finish
        if let Some(thread) = self.producer_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

/// f32 callback: read directly into the cpal buffer.
fn create_f32_callback(
    mut ring: HeapCons<f32>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let read = ring.pop_slice(data);
        // Zero-fill any shortfall
        data[read..].fill(0.0);
    }
}

/// Integer callback: read from the ring and convert.
fn create_converting_callback<T>(
    mut ring: HeapCons<f32>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut temp: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        temp.resize(data.len(), 0.0);
        let read = ring.pop_slice(&mut temp);
        temp[read..].fill(0.0);

        for (dst, &src) in data.iter_mut().zip(temp.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl OutputManager {
    /// Starts the producer thread that mixes into the ring and the output
    /// thread that owns the cpal stream. Returns once the stream is playing.
    fn start(device: cpal::Device, mixer: AudioMixer) -> Result<OutputManager, Box<dyn Error>> {
        let num_channels = mixer.num_channels();
        let sample_rate = mixer.sample_rate();
        let sample_format = device.default_output_config()?.sample_format();
        let stop = Arc::new(AtomicBool::new(false));

        let block_samples = BLOCK_FRAMES * num_channels as usize;
        let capacity = (sample_rate as usize * num_channels as usize / RING_DIVISOR)
            .max(block_samples * 2);
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();

        // The output thread reports whether the stream started.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let output_stop = stop.clone();
        let output_thread = thread::spawn(move || {
            let config = cpal::StreamConfig {
                channels: num_channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let err_fn = |err| error!("CPAL output stream error: {}", err);

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => device.build_output_stream(
                    &config,
                    create_f32_callback(consumer),
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_output_stream(
                    &config,
                    create_converting_callback::<i16>(consumer),
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::I32 => device.build_output_stream(
                    &config,
                    create_converting_callback::<i32>(consumer),
                    err_fn,
                    None,
                ),
                other => {
                    let _ = ready_tx.send(Err(format!("unsupported sample format {:?}", other)));
                    return;
                }
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("failed to build stream: {}", e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("failed to start stream: {}", e)));
                return;
            }
            info!("CPAL output stream started successfully");
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until we're told to stop.
            while !output_stop.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(50));
            }
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                stop.store(true, Ordering::Release);
                let _ = output_thread.join();
                return Err(e.into());
            }
            Err(_) => {
                let _ = output_thread.join();
                return Err("output thread exited before the stream started".into());
            }
        }

        let producer_stop = stop.clone();
        let priority = render_thread_priority();
        let rt_audio = rt_audio_enabled();
        let producer_thread = thread::spawn(move || {
            configure_render_thread_priority(priority, rt_audio);

            // Pre-allocate scratch buffer (reused for all blocks)
            let mut scratch = vec![0.0f32; block_samples];
            while !producer_stop.load(Ordering::Acquire) {
                if producer.vacant_len() >= block_samples {
                    mixer.process_into_output(&mut scratch);
                    let written = producer.push_slice(&scratch);
                    if written < scratch.len() {
                        warn!(
                            dropped = scratch.len() - written,
                            "Ring buffer full, dropped samples"
                        );
                    }
                } else {
                    // Ring full, yield briefly
                    thread::sleep(Duration::from_micros(500));
                }
            }
        });

        Ok(OutputManager {
            stop,
            producer_thread: Some(producer_thread),
            output_thread: Some(output_thread),
        })
    }
}

impl AudioDevice for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> u16 {
        self.num_channels
    }

    fn start(&self, mixer: AudioMixer) -> Result<Box<dyn crate::audio::Output>, Box<dyn Error>> {
        let span = span!(Level::INFO, "cpal output", device = self.name);
        let _enter = span.enter();

        Ok(Box::new(OutputManager::start(self.device.clone(), mixer)?))
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                if let Some(device) = Device::from_cpal(host_id, device) {
                    devices.push(device);
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Wraps a cpal device, skipping devices without output channels.
    fn from_cpal(host_id: cpal::HostId, device: cpal::Device) -> Option<Device> {
        let max_channels = device
            .supported_output_configs()
            .ok()?
            .map(|config| config.channels())
            .max()
            .unwrap_or(0);
        if max_channels == 0 {
            return None;
        }

        let sample_rate = device
            .default_output_config()
            .map(|config| config.sample_rate().0)
            .unwrap_or(config::DEFAULT_SAMPLE_RATE);

        Some(Device {
            name: device.name().ok()?,
            max_channels,
            num_channels: max_channels.min(config::DEFAULT_CHANNELS),
            sample_rate,
            host_id,
            device,
        })
    }

    /// Gets the given cpal device. "default" selects the default output of
    /// the default host.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();
        let device = if name == "default" {
            let host = cpal::default_host();
            let host_id = host.id();
            host.default_output_device()
                .and_then(|device| Device::from_cpal(host_id, device))
        } else {
            Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name.trim() == name)
        };

        match device {
            Some(mut device) => {
                device.sample_rate = config.sample_rate();
                device.num_channels = config.channels();
                if device.num_channels > device.max_channels {
                    return Err(format!(
                        "device {} supports at most {} channels, {} requested",
                        device.name, device.max_channels, device.num_channels
                    )
                    .into());
                }
                Ok(device)
            }
            None => Err(format!("no device found with name {}", name).into()),
        }
    }
}
