// backend.rs — audio device abstraction
//
// The engine never talks to the device directly. Everything goes through
// AudioBackend, implemented elsewhere against the real driver. A null
// driver is provided here for tests and headless runs.

use std::collections::HashMap;

use arclight_common::math::Vec3;

/// Opaque handle to an uploaded PCM buffer on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Low-pass filter gain pair: overall gain and high-frequency gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterGain {
    pub gain: f32,
    pub gain_hf: f32,
}

impl FilterGain {
    pub const UNITY: Self = Self { gain: 1.0, gain_hf: 1.0 };
}

impl Default for FilterGain {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Audio format descriptor for buffer uploads.
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

/// Device abstraction. One source exists per engine channel; all calls
/// are addressed by channel index and never block. Driver errors are
/// surfaced through the polled `check_error` hook, not through return
/// values; the engine treats them as non-fatal logging events except
/// during init.
pub trait AudioBackend {
    /// Open the device and create one source per channel.
    /// Returning false is fatal at startup.
    fn init(&mut self, num_channels: usize) -> bool;
    fn shutdown(&mut self);

    /// Upload a PCM buffer, returning a handle usable on any channel.
    fn upload_buffer(&mut self, data: &[i16], format: &AudioFormat) -> Option<BufferHandle>;

    fn play_buffer(&mut self, channel: usize, buffer: BufferHandle, looping: bool);
    fn stop_channel(&mut self, channel: usize);

    fn set_gain(&mut self, channel: usize, gain: f32);
    fn set_pitch(&mut self, channel: usize, pitch: f32);
    fn set_position(&mut self, channel: usize, origin: &Vec3);
    fn set_velocity(&mut self, channel: usize, velocity: &Vec3);
    fn attach_filter(&mut self, channel: usize, dry: &FilterGain, wet: &FilterGain);
    /// Enable or disable the reverb send for a channel, with the wet-path
    /// gain the environmental preset asks for.
    fn set_reverb_send(&mut self, channel: usize, on: bool, gain: f32);

    /// Which buffer the channel's source is currently bound to.
    fn bound_buffer(&self, channel: usize) -> Option<BufferHandle>;
    fn is_channel_playing(&self, channel: usize) -> bool;

    fn update_listener(&mut self, origin: &Vec3, forward: &Vec3, up: &Vec3);

    /// Drain one pending driver error, if any.
    fn check_error(&mut self) -> Option<String>;
}

// ============================================================
// Null driver
// ============================================================

#[derive(Debug, Clone, Default)]
struct NullSource {
    playing: bool,
    looping: bool,
    buffer: Option<BufferHandle>,
    gain: f32,
    pitch: f32,
    position: Vec3,
    velocity: Vec3,
    dry: FilterGain,
    wet: FilterGain,
    reverb_on: bool,
    reverb_gain: f32,
}

/// Backend that records every call and plays nothing. Used by tests and
/// dedicated servers.
#[derive(Default)]
pub struct NullBackend {
    sources: Vec<NullSource>,
    buffers: HashMap<BufferHandle, usize>,
    next_buffer: u32,
    errors: Vec<String>,
    pub initialized: bool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the device reporting that a channel drained its buffer.
    pub fn finish_channel(&mut self, channel: usize) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.playing = false;
        }
    }

    /// Queue an error for the next `check_error` poll.
    pub fn inject_error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    pub fn channel_gain(&self, channel: usize) -> f32 {
        self.sources[channel].gain
    }

    pub fn channel_pitch(&self, channel: usize) -> f32 {
        self.sources[channel].pitch
    }

    pub fn channel_position(&self, channel: usize) -> Vec3 {
        self.sources[channel].position
    }

    pub fn channel_looping(&self, channel: usize) -> bool {
        self.sources[channel].looping
    }

    pub fn buffer_len(&self, buffer: BufferHandle) -> Option<usize> {
        self.buffers.get(&buffer).copied()
    }
}

impl AudioBackend for NullBackend {
    fn init(&mut self, num_channels: usize) -> bool {
        self.sources = vec![NullSource::default(); num_channels];
        self.initialized = true;
        true
    }

    fn shutdown(&mut self) {
        self.sources.clear();
        self.buffers.clear();
        self.initialized = false;
    }

    fn upload_buffer(&mut self, data: &[i16], _format: &AudioFormat) -> Option<BufferHandle> {
        self.next_buffer += 1;
        let handle = BufferHandle(self.next_buffer);
        self.buffers.insert(handle, data.len());
        Some(handle)
    }

    fn play_buffer(&mut self, channel: usize, buffer: BufferHandle, looping: bool) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.playing = true;
            src.looping = looping;
            src.buffer = Some(buffer);
        }
    }

    fn stop_channel(&mut self, channel: usize) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.playing = false;
            src.buffer = None;
        }
    }

    fn set_gain(&mut self, channel: usize, gain: f32) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.gain = gain;
        }
    }

    fn set_pitch(&mut self, channel: usize, pitch: f32) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.pitch = pitch;
        }
    }

    fn set_position(&mut self, channel: usize, origin: &Vec3) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.position = *origin;
        }
    }

    fn set_velocity(&mut self, channel: usize, velocity: &Vec3) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.velocity = *velocity;
        }
    }

    fn attach_filter(&mut self, channel: usize, dry: &FilterGain, wet: &FilterGain) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.dry = *dry;
            src.wet = *wet;
        }
    }

    fn set_reverb_send(&mut self, channel: usize, on: bool, gain: f32) {
        if let Some(src) = self.sources.get_mut(channel) {
            src.reverb_on = on;
            src.reverb_gain = gain;
        }
    }

    fn bound_buffer(&self, channel: usize) -> Option<BufferHandle> {
        self.sources.get(channel).and_then(|s| s.buffer)
    }

    fn is_channel_playing(&self, channel: usize) -> bool {
        self.sources.get(channel).map(|s| s.playing).unwrap_or(false)
    }

    fn update_listener(&mut self, _origin: &Vec3, _forward: &Vec3, _up: &Vec3) {}

    fn check_error(&mut self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.remove(0))
        }
    }
}
