// snd_registry.rs — decoded sound registry
//
// Maps an asset name to decoded PCM metadata, the precomputed amplitude
// envelope, and the device buffer handle. Append-only for the session;
// repeated loads of the same name hit the hash table.

use arclight_common::console::con_print;
use bitflags::bitflags;
use rayon::prelude::*;

use crate::backend::{AudioBackend, AudioFormat, BufferHandle};
use crate::snd_wav::{DecodedSample, SampleDecoder};

pub const MAX_SOUNDS: usize = 512;
const HASH_SIZE: usize = 256;

/// Amplitude envelope resolution: one value per this many milliseconds.
pub const AMPLITUDE_BUCKET_MS: u32 = 10;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SoundFlags: u32 {
        /// Engine-internal sound (menu beeps, defaults) rather than a
        /// level asset.
        const INTERNAL = 1 << 0;
    }
}

/// Immutable once loaded.
pub struct Sound {
    pub name: String,
    pub flags: SoundFlags,
    pub sample_rate: u32,
    pub sample_count: usize,
    pub duration_ms: u32,
    pub byte_size: usize,
    /// Sample index the loop restarts from, -1 for one-shots.
    pub loop_start: i32,
    /// Coarse rectified envelope, one value per AMPLITUDE_BUCKET_MS.
    pub amplitude: Vec<f32>,
    /// Device buffer; None until the batch load runs (or if decode failed
    /// during it).
    pub buffer: Option<BufferHandle>,
}

impl Sound {
    /// Envelope amplitude at a playback offset. Loops wrap around the
    /// table; one-shots clamp to silence past the end. Used by lip-sync
    /// and VU callers so raw PCM never needs touching at runtime.
    pub fn current_amplitude(&self, play_ms: u32, looping: bool) -> f32 {
        if self.amplitude.is_empty() || self.duration_ms == 0 {
            return 0.0;
        }
        let bucket = (play_ms / AMPLITUDE_BUCKET_MS) as usize;
        if bucket >= self.amplitude.len() {
            if looping {
                return self.amplitude[bucket % self.amplitude.len()];
            }
            return 0.0;
        }
        self.amplitude[bucket]
    }
}

/// Rectified average magnitude per bucket. Negative samples normalize by
/// 32768 and positive by 32767; the asymmetry is inherited from the
/// source format convention and external amplitude consumers depend on
/// it bit-exactly.
fn build_amplitude_table(samples: &[i16], rate: u32) -> Vec<f32> {
    if samples.is_empty() || rate == 0 {
        return Vec::new();
    }
    let bucket_len = ((rate * AMPLITUDE_BUCKET_MS) / 1000).max(1) as usize;
    let mut table = Vec::with_capacity(samples.len() / bucket_len + 1);
    for bucket in samples.chunks(bucket_len) {
        let mut sum = 0.0f32;
        for &s in bucket {
            if s < 0 {
                sum += s as f32 / -32768.0;
            } else {
                sum += s as f32 / 32767.0;
            }
        }
        table.push(sum / bucket.len() as f32);
    }
    table
}

fn hash_name(name: &str) -> usize {
    let mut hash = 0usize;
    for b in name.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(b.to_ascii_lowercase() as usize);
    }
    hash % HASH_SIZE
}

// ============================================================
// Registry
// ============================================================

pub struct SoundRegistry {
    sounds: Vec<Sound>,
    hash: Vec<Vec<usize>>,
    registering: bool,
    /// Indices created during registration, decoded at end_registration.
    pending: Vec<usize>,
}

impl Default for SoundRegistry {
    fn default() -> Self {
        Self {
            sounds: Vec::new(),
            hash: vec![Vec::new(); HASH_SIZE],
            registering: false,
            pending: Vec::new(),
        }
    }
}

impl SoundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, idx: usize) -> &Sound {
        &self.sounds[idx]
    }

    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        let bucket = &self.hash[hash_name(name)];
        bucket
            .iter()
            .copied()
            .find(|&i| self.sounds[i].name.eq_ignore_ascii_case(name))
    }

    fn insert(&mut self, sound: Sound) -> Option<usize> {
        if self.sounds.len() >= MAX_SOUNDS {
            con_print(&format!("find_sound: out of sound slots ({})\n", MAX_SOUNDS));
            return None;
        }
        let bucket = hash_name(&sound.name);
        let idx = self.sounds.len();
        self.sounds.push(sound);
        self.hash[bucket].push(idx);
        Some(idx)
    }

    /// Look up a sound by name, decoding and uploading it on first
    /// reference. Returns None if the asset cannot be decoded. A flag
    /// mismatch against a cached internal sound is only a diagnostic;
    /// the cached sound is returned unchanged.
    pub fn find_sound(
        &mut self,
        name: &str,
        flags: SoundFlags,
        decoder: &dyn SampleDecoder,
        backend: &mut dyn AudioBackend,
    ) -> Option<usize> {
        if name.is_empty() {
            con_print("find_sound: empty name\n");
            return None;
        }

        if let Some(idx) = self.lookup(name) {
            let cached = &self.sounds[idx];
            if cached.flags.contains(SoundFlags::INTERNAL) && cached.flags != flags {
                con_print(&format!(
                    "sound '{}' requested with inconsistent flags\n",
                    name
                ));
            }
            return Some(idx);
        }

        if self.registering {
            // Defer the decode; end_registration batches it.
            let idx = self.insert(Self::placeholder(name, flags))?;
            self.pending.push(idx);
            return Some(idx);
        }

        let decoded = decoder.decode(name)?;
        let mut sound = Self::from_decoded(name, flags, &decoded);
        sound.buffer = Self::upload(&sound, &decoded, backend);
        self.insert(sound)
    }

    /// Resolve a `#`-prefixed name against the caller's character model
    /// folder, falling back to the canonical male folder when the
    /// model-specific asset does not exist.
    pub fn find_sexed_sound(
        &mut self,
        name: &str,
        model_dir: &str,
        flags: SoundFlags,
        decoder: &dyn SampleDecoder,
        backend: &mut dyn AudioBackend,
    ) -> Option<usize> {
        let base = match name.strip_prefix('#') {
            Some(b) => b,
            None => return self.find_sound(name, flags, decoder, backend),
        };

        let model = if model_dir.is_empty() { "male" } else { model_dir };
        let sexed = format!("players/{}/{}", model, base);
        if decoder.exists(&sexed) {
            return self.find_sound(&sexed, flags, decoder, backend);
        }
        let fallback = format!("players/male/{}", base);
        self.find_sound(&fallback, flags, decoder, backend)
    }

    /// Begin deferred registration: find_sound records names without
    /// touching the decoder until end_registration.
    pub fn begin_registration(&mut self) {
        self.registering = true;
    }

    /// Decode every pending sound in parallel, then upload serially.
    /// Decode failures leave the entry bufferless and logged; the entry
    /// itself stays (the registry is append-only for the session).
    pub fn end_registration(&mut self, decoder: &dyn SampleDecoder, backend: &mut dyn AudioBackend) {
        if !self.registering {
            return;
        }
        self.registering = false;

        let pending = std::mem::take(&mut self.pending);
        let names: Vec<(usize, String)> =
            pending.iter().map(|&i| (i, self.sounds[i].name.clone())).collect();

        // Decoding is pure per-sound work; the registry and device
        // uploads stay on the calling thread.
        let decoded: Vec<(usize, Option<DecodedSample>)> = names
            .par_iter()
            .map(|(i, name)| (*i, decoder.decode(name)))
            .collect();

        for (idx, dec) in decoded {
            match dec {
                Some(dec) => {
                    let flags = self.sounds[idx].flags;
                    let name = self.sounds[idx].name.clone();
                    let mut sound = Self::from_decoded(&name, flags, &dec);
                    sound.buffer = Self::upload(&sound, &dec, backend);
                    self.sounds[idx] = sound;
                }
                None => {
                    con_print(&format!("Couldn't load {}\n", self.sounds[idx].name));
                }
            }
        }
    }

    /// Console diagnostic dump of every registered sound.
    pub fn sound_list(&self) {
        let mut total = 0usize;
        for sound in &self.sounds {
            if sound.buffer.is_some() {
                total += sound.byte_size;
                let loop_mark = if sound.loop_start >= 0 { "L" } else { " " };
                con_print(&format!(
                    "{}{:6} : {:5}ms {}\n",
                    loop_mark, sound.byte_size, sound.duration_ms, sound.name
                ));
            } else {
                con_print(&format!("  not loaded  : {}\n", sound.name));
            }
        }
        con_print(&format!("Total resident: {}\n", total));
    }

    fn placeholder(name: &str, flags: SoundFlags) -> Sound {
        Sound {
            name: name.to_string(),
            flags,
            sample_rate: 0,
            sample_count: 0,
            duration_ms: 0,
            byte_size: 0,
            loop_start: -1,
            amplitude: Vec::new(),
            buffer: None,
        }
    }

    fn from_decoded(name: &str, flags: SoundFlags, dec: &DecodedSample) -> Sound {
        let duration_ms = if dec.rate > 0 {
            (dec.samples.len() as u64 * 1000 / dec.rate as u64) as u32
        } else {
            0
        };
        Sound {
            name: name.to_string(),
            flags,
            sample_rate: dec.rate,
            sample_count: dec.samples.len(),
            duration_ms,
            byte_size: dec.samples.len() * 2,
            loop_start: dec.loop_start,
            amplitude: build_amplitude_table(&dec.samples, dec.rate),
            buffer: None,
        }
    }

    fn upload(sound: &Sound, dec: &DecodedSample, backend: &mut dyn AudioBackend) -> Option<BufferHandle> {
        let format = AudioFormat {
            sample_rate: sound.sample_rate,
            bits_per_sample: 16,
            channels: 1,
        };
        backend.upload_buffer(&dec.samples, &format)
    }
}

// ============================================================
// Tests
// ============================================================
