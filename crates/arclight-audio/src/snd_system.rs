// snd_system.rs — the sound system context
//
// Owns every pool: registries, emitters, channels, listener, reverb.
// Constructed at subsystem init, torn down at shutdown; there is no
// implicit global. All mutation happens frame-synchronously on the
// simulation thread.

use arclight_common::console::{con_error, con_print, ERR_FATAL};

use crate::backend::AudioBackend;
use crate::snd_channel::{select_sound, Channel, ChannelPool, ChannelState, MAX_CHANNELS};
use crate::snd_emitter::{EmitterHandle, EmitterSnapshot, EmitterTable, MAX_EMITTERS};
use crate::snd_listener::Listener;
use crate::snd_registry::SoundRegistry;
use crate::snd_reverb::ReverbTable;
use crate::snd_shader::{ShaderFlags, ShaderRegistry};
use crate::snd_spatial::{spatialize_channel, AreaGraph};

/// Nominal mixer rate used to convert shader sample counts to time.
pub const MIXER_RATE: u32 = 44100;

/// Console toggle surface. Read per computation; the game flips fields
/// between frames.
#[derive(Debug, Clone)]
pub struct SoundConfig {
    /// Master gain folded into every channel push.
    pub s_volume: f32,
    pub s_skip_spatialize: bool,
    pub s_skip_doppler: bool,
    pub s_skip_portals: bool,
    pub s_no_attenuation: bool,
    /// Whether a real low-pass stage exists; when false, dry filter
    /// gain folds into volume instead.
    pub s_use_filters: bool,
    pub s_use_cones: bool,
    pub s_no_reverb: bool,
    /// Dev profiling aid: drop emitter snapshot updates.
    pub s_skip_emitter_updates: bool,
    /// Dev filter: only this shader may start.
    pub s_single_shader: Option<String>,
    /// Dev filter: only this emitter id may start sounds; 0 = off.
    pub s_single_emitter: i32,
    /// Dump active channels every frame.
    pub s_show: bool,
    /// Poll the backend error hook after the frame pass.
    pub s_check_errors: bool,

    /// Real-world speed of sound, converted to game units via
    /// meters_per_unit for the doppler math.
    pub speed_of_sound_mps: f32,
    pub meters_per_unit: f32,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            s_volume: 0.5,
            s_skip_spatialize: false,
            s_skip_doppler: false,
            s_skip_portals: false,
            s_no_attenuation: false,
            s_use_filters: true,
            s_use_cones: true,
            s_no_reverb: false,
            s_skip_emitter_updates: false,
            s_single_shader: None,
            s_single_emitter: 0,
            s_show: false,
            s_check_errors: true,
            speed_of_sound_mps: 343.0,
            // ~40 game units per meter.
            meters_per_unit: 0.025,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SoundStats {
    pub frames: u64,
    pub sounds_started: u64,
    /// Requests refused because no channel could be taken. Expected
    /// under load, not an error.
    pub sounds_dropped: u64,
    pub channels_evicted: u64,
}

pub struct SoundSystem {
    pub config: SoundConfig,
    pub sounds: SoundRegistry,
    pub shaders: ShaderRegistry,
    pub emitters: EmitterTable,
    pub channels: ChannelPool,
    pub listener: Listener,
    pub reverb: ReverbTable,
    pub stats: SoundStats,
    /// Per-shader last start time for the trigger gap, lazily grown.
    last_shader_start: Vec<Option<i32>>,
    initialized: bool,
}

impl Default for SoundSystem {
    fn default() -> Self {
        Self::with_capacity(MAX_CHANNELS, MAX_EMITTERS)
    }
}

impl SoundSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(channels: usize, emitters: usize) -> Self {
        Self {
            config: SoundConfig::default(),
            sounds: SoundRegistry::new(),
            shaders: ShaderRegistry::new(),
            emitters: EmitterTable::new(emitters),
            channels: ChannelPool::new(channels),
            listener: Listener::new(),
            reverb: ReverbTable::new(),
            stats: SoundStats::default(),
            last_shader_start: Vec::new(),
            initialized: false,
        }
    }

    /// Open the device. A backend that cannot come up at startup is
    /// unrecoverable.
    pub fn init(&mut self, backend: &mut dyn AudioBackend) {
        con_print("\n------- sound initialization -------\n");
        if !backend.init(self.channels.capacity()) {
            con_error(ERR_FATAL, "audio backend failed to initialize");
        }
        self.initialized = true;
        con_print("------------------------------------\n");
    }

    pub fn shutdown(&mut self, backend: &mut dyn AudioBackend) {
        if !self.initialized {
            return;
        }
        self.stop_all_sounds(backend);
        backend.shutdown();
        // Sounds die with the session; shader policies are plain data
        // and can outlive the device.
        self.sounds = SoundRegistry::new();
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // ========================================================
    // Emitters
    // ========================================================

    pub fn add_emitter(&mut self, snapshot: EmitterSnapshot) -> EmitterHandle {
        self.emitters.add_emitter(snapshot)
    }

    pub fn update_emitter(&mut self, handle: EmitterHandle, snapshot: EmitterSnapshot) -> bool {
        self.emitters.update_emitter(handle, snapshot)
    }

    /// Remove an emitter. Channels still referencing it are either
    /// force-stopped or detached; a detached channel keeps playing
    /// from the emitter's last captured snapshot.
    pub fn remove_emitter(
        &mut self,
        backend: &mut dyn AudioBackend,
        handle: EmitterHandle,
        stop_all_sounds: bool,
    ) -> bool {
        if !self.emitters.is_valid(handle) {
            con_print(&format!("remove_emitter: stale handle {}\n", handle.0));
            return false;
        }
        for idx in 0..self.channels.capacity() {
            let ch = self.channels.get(idx);
            if ch.state.is_free() || ch.emitter != handle {
                continue;
            }
            if stop_all_sounds {
                self.stop_channel(backend, idx);
            } else {
                self.channels.get_mut(idx).emitter = EmitterHandle::NONE;
            }
        }
        self.emitters.release(handle)
    }

    // ========================================================
    // Play / stop
    // ========================================================

    /// Start a shader on a channel. Returns false when the request is
    /// dropped: missing shader, trigger gap, play-once, dev filters,
    /// or a full pool with nothing evictable.
    #[allow(clippy::too_many_arguments)]
    pub fn start_sound(
        &mut self,
        backend: &mut dyn AudioBackend,
        graph: &dyn AreaGraph,
        emitter: EmitterHandle,
        emitter_id: i32,
        channel_id: i32,
        shader_name: &str,
        now: i32,
    ) -> bool {
        if !self.initialized {
            return false;
        }

        let shader_idx = match self.shaders.find_shader(shader_name) {
            Some(idx) => idx,
            None => {
                con_print(&format!("start_sound: unknown shader '{}'\n", shader_name));
                return false;
            }
        };

        // Dev-only global filters, checked before anything else.
        if let Some(ref only) = self.config.s_single_shader {
            if !only.eq_ignore_ascii_case(shader_name) {
                return false;
            }
        }
        if self.config.s_single_emitter != 0 && emitter_id != self.config.s_single_emitter {
            return false;
        }

        let flags = self.shaders.get(shader_idx).flags;
        let priority = self.shaders.get(shader_idx).priority;

        if flags.contains(ShaderFlags::PLAY_ONCE)
            && self
                .channels
                .iter()
                .any(|c| !c.state.is_free() && c.shader == Some(shader_idx))
        {
            return false;
        }

        let gap_samples = self.shaders.get(shader_idx).min_trigger_gap_samples;
        if gap_samples > 0 {
            if self.last_shader_start.len() <= shader_idx {
                self.last_shader_start.resize(shader_idx + 1, None);
            }
            let gap_ms = (gap_samples as u64 * 1000 / MIXER_RATE as u64) as i32;
            if let Some(last) = self.last_shader_start[shader_idx] {
                if now - last < gap_ms {
                    return false;
                }
            }
        }

        let picked = self.channels.pick_channel(emitter_id, channel_id, priority, |s| {
            self.shaders.get(s).priority
        });
        let idx = match picked {
            Some(idx) => idx,
            None => {
                self.stats.sounds_dropped += 1;
                return false;
            }
        };

        // Taking over a busy channel, whether an identity override or an
        // eviction, silences it first.
        if !self.channels.get(idx).state.is_free() {
            let ch = self.channels.get(idx);
            let was_override =
                emitter_id != 0 && channel_id != 0 && ch.emitter_id == emitter_id && ch.channel_id == channel_id;
            if !was_override {
                self.stats.channels_evicted += 1;
            }
            self.stop_channel(backend, idx);
        }

        let shader = self.shaders.get(shader_idx);
        let lead_in = !shader.leadins.is_empty();
        let last = self.emitters.last_played(emitter, lead_in);
        let sound_idx = match select_sound(shader, lead_in, last) {
            Some(s) => s,
            None => {
                con_print(&format!("start_sound: shader '{}' has no sounds\n", shader_name));
                return false;
            }
        };
        let buffer = match self.sounds.get(sound_idx).buffer {
            Some(b) => b,
            None => {
                con_print(&format!(
                    "start_sound: sound '{}' not loaded\n",
                    self.sounds.get(sound_idx).name
                ));
                return false;
            }
        };
        self.emitters.note_played(emitter, lead_in, sound_idx);

        let state = ChannelState::for_shader(flags, lead_in);
        let snapshot = self.emitters.get(emitter).cloned().unwrap_or_default();
        {
            let ch = self.channels.get_mut(idx);
            ch.state = state;
            ch.emitter_id = emitter_id;
            ch.channel_id = channel_id;
            ch.alloc_time = now;
            ch.sound_start_time = now;
            ch.emitter = emitter;
            ch.shader = Some(shader_idx);
            ch.sound = Some(sound_idx);
            ch.e = snapshot;
        }

        backend.play_buffer(idx, buffer, state == ChannelState::Looped);
        // Spatialize immediately so the first audible frame is correct.
        self.refresh_channel(backend, graph, idx);

        if gap_samples > 0 {
            self.last_shader_start[shader_idx] = Some(now);
        }
        self.stats.sounds_started += 1;
        true
    }

    /// Stop every channel matching the identity; channel_id 0 matches
    /// all of the emitter's channels.
    pub fn stop_sound(&mut self, backend: &mut dyn AudioBackend, emitter_id: i32, channel_id: i32) {
        for idx in 0..self.channels.capacity() {
            let ch = self.channels.get(idx);
            if ch.state.is_free() || ch.emitter_id != emitter_id {
                continue;
            }
            if channel_id != 0 && ch.channel_id != channel_id {
                continue;
            }
            self.stop_channel(backend, idx);
        }
    }

    pub fn stop_channel(&mut self, backend: &mut dyn AudioBackend, idx: usize) {
        if idx >= self.channels.capacity() {
            con_error(ERR_FATAL, &format!("stop_channel: index {} out of range", idx));
        }
        backend.stop_channel(idx);
        self.channels.get_mut(idx).reset();
    }

    pub fn stop_all_sounds(&mut self, backend: &mut dyn AudioBackend) {
        for idx in 0..self.channels.capacity() {
            backend.stop_channel(idx);
            self.channels.get_mut(idx).reset();
        }
    }

    // ========================================================
    // Frame update
    // ========================================================

    /// The once-per-frame pass: refresh emitter snapshots, advance the
    /// channel state machines, respatialize everything, hand the
    /// results to the backend.
    pub fn update(&mut self, backend: &mut dyn AudioBackend, graph: &dyn AreaGraph, now: i32) {
        if !self.initialized {
            return;
        }

        self.emitters.skip_updates = self.config.s_skip_emitter_updates;
        backend.update_listener(
            &self.listener.origin,
            &self.listener.axis[0],
            &self.listener.axis[2],
        );

        for idx in 0..self.channels.capacity() {
            if self.channels.get(idx).state.is_free() {
                continue;
            }

            // Track the emitter while it lives; a detached channel keeps
            // its last captured snapshot.
            let handle = self.channels.get(idx).emitter;
            if !handle.is_none() && self.emitters.is_valid(handle) {
                if let Some(snapshot) = self.emitters.get(handle) {
                    self.channels.get_mut(idx).e = snapshot.clone();
                }
            }

            if !self.advance_channel(backend, idx, now) {
                continue; // channel completed and was freed
            }

            self.refresh_channel(backend, graph, idx);
            self.update_amplitude(idx, now);
        }

        if self.config.s_show {
            self.show_channels(backend);
        }
        if self.config.s_check_errors {
            while let Some(err) = backend.check_error() {
                con_print(&format!("sound backend: {}\n", err));
            }
        }
        self.stats.frames += 1;
    }

    /// Drive lead-in completion and natural end-of-playback. Returns
    /// false if the channel was freed.
    fn advance_channel(&mut self, backend: &mut dyn AudioBackend, idx: usize, now: i32) -> bool {
        let state = self.channels.get(idx).state;
        let playing = backend.is_channel_playing(idx);

        if state.is_lead_in() {
            // The lead-in drained if the source stopped or the bound
            // buffer is no longer the lead-in's.
            let leadin_buffer = self
                .channels
                .get(idx)
                .sound
                .and_then(|s| self.sounds.get(s).buffer);
            if playing && backend.bound_buffer(idx) == leadin_buffer {
                return true;
            }
            let steady = state.steady();
            if !self.rebind_entry(backend, idx, steady, now) {
                self.stop_channel(backend, idx);
                return false;
            }
            self.channels.get_mut(idx).state = steady;
            return true;
        }

        if playing {
            return true;
        }

        match state {
            ChannelState::Random => {
                // Continuous re-trigger from the entry pool.
                if !self.rebind_entry(backend, idx, ChannelState::Random, now) {
                    self.stop_channel(backend, idx);
                    return false;
                }
                true
            }
            ChannelState::Looped => {
                // The backend loops on its own; a stopped looped source
                // means the device restarted, so rebind.
                if !self.rebind_entry(backend, idx, ChannelState::Looped, now) {
                    self.stop_channel(backend, idx);
                    return false;
                }
                true
            }
            _ => {
                self.channels.get_mut(idx).reset();
                false
            }
        }
    }

    /// Select and start a steady-state entry on an already-owned
    /// channel.
    fn rebind_entry(
        &mut self,
        backend: &mut dyn AudioBackend,
        idx: usize,
        steady: ChannelState,
        now: i32,
    ) -> bool {
        let shader_idx = match self.channels.get(idx).shader {
            Some(s) => s,
            None => return false,
        };
        let emitter = self.channels.get(idx).emitter;
        let shader = self.shaders.get(shader_idx);
        let last = self.emitters.last_played(emitter, false);
        let sound_idx = match select_sound(shader, false, last) {
            Some(s) => s,
            None => return false,
        };
        let buffer = match self.sounds.get(sound_idx).buffer {
            Some(b) => b,
            None => return false,
        };
        self.emitters.note_played(emitter, false, sound_idx);

        let ch = self.channels.get_mut(idx);
        ch.sound = Some(sound_idx);
        ch.sound_start_time = now;
        backend.play_buffer(idx, buffer, steady == ChannelState::Looped);
        true
    }

    /// Respatialize one channel and push the results to the backend.
    fn refresh_channel(&mut self, backend: &mut dyn AudioBackend, graph: &dyn AreaGraph, idx: usize) {
        let shader_idx = match self.channels.get(idx).shader {
            Some(s) => s,
            None => return,
        };
        let ch = self.channels.get_mut(idx);
        spatialize_channel(
            ch,
            self.shaders.get(shader_idx),
            &self.listener,
            &self.reverb,
            graph,
            &self.config,
        );

        backend.set_position(idx, &ch.p.play_origin);
        backend.set_velocity(idx, &ch.e.velocity);
        backend.set_gain(idx, ch.p.volume * self.config.s_volume);
        backend.set_pitch(idx, ch.p.pitch);
        backend.attach_filter(idx, &ch.p.dry_filter, &ch.p.wet_filter);
        backend.set_reverb_send(idx, ch.p.feed_reverb, ch.p.reverb_gain);
    }

    fn update_amplitude(&mut self, idx: usize, now: i32) {
        let ch = self.channels.get(idx);
        let sound_idx = match ch.sound {
            Some(s) => s,
            None => return,
        };
        let elapsed = (now - ch.sound_start_time).max(0) as u32;
        let looping = ch.state == ChannelState::Looped;
        let amp = self.sounds.get(sound_idx).current_amplitude(elapsed, looping);
        self.channels.get_mut(idx).amplitude = amp;
    }

    /// Envelope amplitude of the channel matching an identity, for
    /// lip-sync and VU callers. 0.0 when nothing matches.
    pub fn channel_amplitude(&self, emitter_id: i32, channel_id: i32) -> f32 {
        for ch in self.channels.iter() {
            if !ch.state.is_free() && ch.emitter_id == emitter_id && ch.channel_id == channel_id {
                return ch.amplitude;
            }
        }
        0.0
    }

    fn show_channels(&self, backend: &mut dyn AudioBackend) {
        let mut total = 0;
        for ch in self.channels.iter() {
            if ch.state.is_free() || !backend.is_channel_playing(ch.index) {
                continue;
            }
            if let Some(shader_idx) = ch.shader {
                con_print(&format!(
                    "{:5.2} {:3}p {}\n",
                    ch.p.volume,
                    ch.p.portals_passed,
                    self.shaders.get(shader_idx).name
                ));
            }
            total += 1;
        }
        con_print(&format!("----({})----\n", total));
    }

    /// Console dump of the sound registry.
    pub fn sound_list(&self) {
        self.sounds.sound_list();
    }

    pub fn channel(&self, idx: usize) -> &Channel {
        self.channels.get(idx)
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::snd_registry::SoundFlags;
    use crate::snd_shader::{Priority, SoundShader};
    use crate::snd_spatial::TableAreaGraph;
    use crate::snd_wav::test_wav::build_wav_samples;
    use crate::snd_wav::WavDecoder;

    struct Rig {
        snd: SoundSystem,
        backend: NullBackend,
        graph: TableAreaGraph,
    }

    /// A small world: 4 channels, 8 emitters, two connected areas, a
    /// handful of loaded sounds.
    fn rig() -> Rig {
        let mut snd = SoundSystem::with_capacity(4, 8);
        let mut backend = NullBackend::new();
        snd.init(&mut backend);

        let decoder = WavDecoder::new(|path: &str| {
            // 100ms of quiet tone at 22050.
            if path.starts_with("sound/") {
                Some(build_wav_samples(1, 22050, 16, &[8000i16; 2205]))
            } else {
                None
            }
        });
        for name in ["fire.wav", "fire2.wav", "ignite.wav", "hum.wav"] {
            snd.sounds
                .find_sound(name, SoundFlags::empty(), &decoder, &mut backend)
                .unwrap();
        }

        let mut graph = TableAreaGraph::new(3);
        graph.connect(0, 1);

        snd.listener.update(1000, [0.0; 3], arclight_common::math::AXIS_IDENTITY, [0.0; 3], 0, false);

        Rig { snd, backend, graph }
    }

    fn sound_index(snd: &SoundSystem, name: &str) -> usize {
        (0..snd.sounds.len())
            .find(|&i| snd.sounds.get(i).name == name)
            .unwrap()
    }

    fn simple_shader(snd: &mut SoundSystem, name: &str, priority: Priority) -> usize {
        let fire = sound_index(snd, "fire.wav");
        let mut sh = SoundShader::new(name);
        sh.priority = priority;
        sh.entries = vec![fire];
        snd.shaders.register_shader(sh)
    }

    fn default_emitter(snd: &mut SoundSystem, area: i32) -> EmitterHandle {
        snd.add_emitter(EmitterSnapshot {
            origin: [100.0, 0.0, 0.0],
            area,
            ..EmitterSnapshot::default()
        })
    }

    #[test]
    fn test_start_sound_takes_free_channel() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        assert_eq!(snd.channels.active_count(), 1);
        assert!(backend.is_channel_playing(0));
        assert_eq!(snd.stats.sounds_started, 1);
        assert!(snd.channel(0).p.volume > 0.0);
    }

    #[test]
    fn test_unknown_shader_refused() {
        let Rig { mut snd, mut backend, graph } = rig();
        let em = default_emitter(&mut snd, 0);
        assert!(!snd.start_sound(&mut backend, &graph, em, 7, 1, "nope", 0));
        assert_eq!(snd.channels.active_count(), 0);
    }

    #[test]
    fn test_override_identity_reuses_channel() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        simple_shader(&mut snd, "idle", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 3, "fire", 0));
        let first = (0..4).find(|&i| !snd.channel(i).state.is_free()).unwrap();

        // Replacing channel 3 of entity 7 lands on the same slot, with
        // no second allocation.
        assert!(snd.start_sound(&mut backend, &graph, em, 7, 3, "idle", 10));
        assert_eq!(snd.channels.active_count(), 1);
        let second = (0..4).find(|&i| !snd.channel(i).state.is_free()).unwrap();
        assert_eq!(first, second);
        let idle = snd.shaders.find_shader("idle");
        assert_eq!(snd.channel(second).shader, idle);
    }

    #[test]
    fn test_priority_eviction_scenario() {
        // Pool of 4: [LOW, NORMAL, NORMAL, HIGH] all busy. A NORMAL
        // request evicts the LOW channel; an AMBIENT request is refused.
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "low", Priority::Low);
        simple_shader(&mut snd, "normal", Priority::Normal);
        simple_shader(&mut snd, "high", Priority::High);
        simple_shader(&mut snd, "ambient", Priority::Ambient);
        simple_shader(&mut snd, "fresh", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 1, 1, "low", 0));
        assert!(snd.start_sound(&mut backend, &graph, em, 2, 1, "normal", 1));
        assert!(snd.start_sound(&mut backend, &graph, em, 3, 1, "normal", 2));
        assert!(snd.start_sound(&mut backend, &graph, em, 4, 1, "high", 3));
        assert_eq!(snd.channels.active_count(), 4);

        // Refused: nothing is strictly below AMBIENT.
        assert!(!snd.start_sound(&mut backend, &graph, em, 5, 1, "ambient", 4));
        assert_eq!(snd.stats.sounds_dropped, 1);
        assert_eq!(snd.channels.active_count(), 4);

        // The NORMAL request takes the LOW channel's slot.
        let low_idx = (0..4)
            .find(|&i| snd.channel(i).shader == snd.shaders.find_shader("low"))
            .unwrap();
        assert!(snd.start_sound(&mut backend, &graph, em, 6, 1, "fresh", 5));
        assert_eq!(snd.channel(low_idx).shader, snd.shaders.find_shader("fresh"));
        assert_eq!(snd.stats.channels_evicted, 1);
        assert_eq!(snd.channels.active_count(), 4);
    }

    #[test]
    fn test_eviction_leaves_emitter_dedup_memory_alone() {
        let Rig { mut snd, mut backend, graph } = rig();
        let fire = sound_index(&snd, "fire.wav");
        simple_shader(&mut snd, "low", Priority::Low);
        simple_shader(&mut snd, "high", Priority::High);
        let em = default_emitter(&mut snd, 0);

        // Fill the pool with LOW sounds owned by `em`.
        for i in 0..4 {
            assert!(snd.start_sound(&mut backend, &graph, em, 10 + i, 1, "low", i));
        }
        assert_eq!(snd.emitters.last_played(em, false), Some(fire));

        // Evicting one of them must not clear the emitter's last-played
        // memory (the new start records its own pick afterwards).
        assert!(snd.start_sound(&mut backend, &graph, em, 99, 1, "high", 50));
        assert_eq!(snd.emitters.last_played(em, false), Some(fire));
    }

    #[test]
    fn test_remove_emitter_detaches_channels() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        assert!(snd.start_sound(&mut backend, &graph, em, 7, 2, "fire", 0));

        assert!(snd.remove_emitter(&mut backend, em, false));
        assert_eq!(snd.channels.active_count(), 2);
        for i in 0..2 {
            assert!(snd.channel(i).emitter.is_none());
        }

        // Spatializing detached channels uses the captured snapshot and
        // must not touch the freed emitter.
        snd.update(&mut backend, &graph, 16);
        assert_eq!(snd.channels.active_count(), 2);
        assert_eq!(snd.channel(0).e.origin, [100.0, 0.0, 0.0]);
    }

    #[test]
    fn test_remove_emitter_stop_all() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        assert!(snd.remove_emitter(&mut backend, em, true));
        assert_eq!(snd.channels.active_count(), 0);
        assert!(!backend.is_channel_playing(0));
    }

    #[test]
    fn test_stale_emitter_handle_rejected() {
        let Rig { mut snd, mut backend, graph: _ } = rig();
        let em = default_emitter(&mut snd, 0);
        assert!(snd.remove_emitter(&mut backend, em, false));
        assert!(!snd.remove_emitter(&mut backend, em, false));
        assert!(!snd.update_emitter(em, EmitterSnapshot::default()));
    }

    #[test]
    fn test_natural_completion_frees_channel() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        snd.update(&mut backend, &graph, 16);
        assert_eq!(snd.channels.active_count(), 1);

        backend.finish_channel(0);
        snd.update(&mut backend, &graph, 32);
        assert_eq!(snd.channels.active_count(), 0);
    }

    #[test]
    fn test_leadin_transitions_to_looped() {
        let Rig { mut snd, mut backend, graph } = rig();
        let ignite = sound_index(&snd, "ignite.wav");
        let hum = sound_index(&snd, "hum.wav");
        let mut sh = SoundShader::new("engine");
        sh.flags = ShaderFlags::LOOPING;
        sh.leadins = vec![ignite];
        sh.entries = vec![hum];
        snd.shaders.register_shader(sh);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "engine", 0));
        assert_eq!(snd.channel(0).state, ChannelState::LeadInLooped);
        assert_eq!(snd.channel(0).sound, Some(ignite));
        assert!(!backend.channel_looping(0));

        // While the lead-in plays, nothing changes.
        snd.update(&mut backend, &graph, 16);
        assert_eq!(snd.channel(0).state, ChannelState::LeadInLooped);

        // Lead-in drains: flip to the steady loop.
        backend.finish_channel(0);
        snd.update(&mut backend, &graph, 32);
        assert_eq!(snd.channel(0).state, ChannelState::Looped);
        assert_eq!(snd.channel(0).sound, Some(hum));
        assert!(backend.channel_looping(0));
        assert!(backend.is_channel_playing(0));
    }

    #[test]
    fn test_random_state_retriggers() {
        let Rig { mut snd, mut backend, graph } = rig();
        let fire = sound_index(&snd, "fire.wav");
        let fire2 = sound_index(&snd, "fire2.wav");
        let mut sh = SoundShader::new("crackle");
        sh.flags = ShaderFlags::RANDOMIZE;
        sh.entries = vec![fire, fire2];
        snd.shaders.register_shader(sh);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "crackle", 0));
        assert_eq!(snd.channel(0).state, ChannelState::Random);

        backend.finish_channel(0);
        snd.update(&mut backend, &graph, 100);
        // Still owned, re-triggered with a fresh entry.
        assert_eq!(snd.channel(0).state, ChannelState::Random);
        assert!(backend.is_channel_playing(0));
        assert_eq!(snd.channel(0).sound_start_time, 100);
    }

    #[test]
    fn test_play_once_refuses_second_start() {
        let Rig { mut snd, mut backend, graph } = rig();
        let fire = sound_index(&snd, "fire.wav");
        let mut sh = SoundShader::new("stinger");
        sh.flags = ShaderFlags::PLAY_ONCE;
        sh.entries = vec![fire];
        snd.shaders.register_shader(sh);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "stinger", 0));
        assert!(!snd.start_sound(&mut backend, &graph, em, 8, 1, "stinger", 10));

        // Once it completes, it may start again.
        backend.finish_channel(0);
        snd.update(&mut backend, &graph, 50);
        assert!(snd.start_sound(&mut backend, &graph, em, 8, 1, "stinger", 60));
    }

    #[test]
    fn test_trigger_gap_drops_rapid_restarts() {
        let Rig { mut snd, mut backend, graph } = rig();
        let fire = sound_index(&snd, "fire.wav");
        let mut sh = SoundShader::new("beep");
        sh.min_trigger_gap_samples = MIXER_RATE; // one second
        sh.entries = vec![fire];
        snd.shaders.register_shader(sh);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "beep", 0));
        assert!(!snd.start_sound(&mut backend, &graph, em, 8, 1, "beep", 500));
        assert!(snd.start_sound(&mut backend, &graph, em, 8, 1, "beep", 1001));
    }

    #[test]
    fn test_single_shader_dev_filter() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        simple_shader(&mut snd, "other", Priority::Normal);
        snd.config.s_single_shader = Some("fire".to_string());
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        assert!(!snd.start_sound(&mut backend, &graph, em, 7, 2, "other", 0));
    }

    #[test]
    fn test_single_emitter_dev_filter() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        snd.config.s_single_emitter = 7;
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        assert!(!snd.start_sound(&mut backend, &graph, em, 8, 1, "fire", 0));
    }

    #[test]
    fn test_stop_sound_by_identity() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        assert!(snd.start_sound(&mut backend, &graph, em, 7, 2, "fire", 0));
        assert!(snd.start_sound(&mut backend, &graph, em, 8, 1, "fire", 0));

        snd.stop_sound(&mut backend, 7, 2);
        assert_eq!(snd.channels.active_count(), 2);

        // channel_id 0 sweeps the emitter's remaining channels.
        snd.stop_sound(&mut backend, 7, 0);
        assert_eq!(snd.channels.active_count(), 1);
    }

    #[test]
    fn test_update_pushes_master_volume() {
        let Rig { mut snd, mut backend, graph } = rig();
        let mut sh = SoundShader::new("fire");
        sh.volume = 1.0;
        sh.entries = vec![sound_index(&snd, "fire.wav")];
        snd.shaders.register_shader(sh);
        snd.config.s_volume = 0.5;
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        snd.update(&mut backend, &graph, 16);
        assert!((backend.channel_gain(0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_amplitude_query_follows_playback() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);

        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
        snd.update(&mut backend, &graph, 50);
        // Mid-sample: the 8000-amplitude tone is audible on the meter.
        let amp = snd.channel_amplitude(7, 1);
        assert!(amp > 0.2, "amplitude {}", amp);

        // Unknown identity reads silent.
        assert_eq!(snd.channel_amplitude(99, 1), 0.0);
    }

    #[test]
    fn test_backend_errors_polled_not_fatal() {
        let Rig { mut snd, mut backend, graph } = rig();
        backend.inject_error("AL_INVALID_OPERATION");
        snd.update(&mut backend, &graph, 16);
        // Drained without panicking.
        assert!(backend.check_error().is_none());
        assert_eq!(snd.stats.frames, 1);
    }

    #[test]
    fn test_emitter_exhaustion_sentinel() {
        let Rig { mut snd, .. } = rig();
        for _ in 0..8 {
            assert!(!snd.add_emitter(EmitterSnapshot::default()).is_none());
        }
        assert!(snd.add_emitter(EmitterSnapshot::default()).is_none());
    }

    #[test]
    fn test_shutdown_clears_sounds_and_stops() {
        let Rig { mut snd, mut backend, graph } = rig();
        simple_shader(&mut snd, "fire", Priority::Normal);
        let em = default_emitter(&mut snd, 0);
        assert!(snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));

        snd.shutdown(&mut backend);
        assert!(!snd.is_initialized());
        assert_eq!(snd.sounds.len(), 0);
        assert!(!backend.initialized);
        // Post-shutdown requests are refused, not crashes.
        assert!(!snd.start_sound(&mut backend, &graph, em, 7, 1, "fire", 0));
    }
}
