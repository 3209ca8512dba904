// snd_shader.rs — sound shader policy records
//
// A sound shader is a named playback policy: volume/pitch/attenuation
// defaults, directional cone, filter defaults, behavior flags, and the
// candidate sample lists. Parsed once by the asset loader, immutable
// afterwards. Not a graphics shader.

use std::collections::HashMap;

use arclight_common::console::con_print;
use bitflags::bitflags;

use crate::backend::FilterGain;

/// Candidate sounds per list (lead-in and entry).
pub const MAX_SHADER_SOUNDS: usize = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShaderFlags: u32 {
        /// Audible everywhere reachable, no positional mixing.
        const GLOBAL          = 1 << 0;
        /// No directional cone regardless of cone parameters.
        const OMNIDIRECTIONAL = 1 << 1;
        /// Emitter occupies a volume rather than a point.
        const VOLUMETRIC      = 1 << 2;
        /// Steady-state sample loops until stopped.
        const LOOPING         = 1 << 3;
        /// Continuously re-trigger a random entry.
        const RANDOMIZE       = 1 << 4;
        /// Never pick the same entry twice in a row.
        const NO_DUPS         = 1 << 5;
        /// Audible only when the owning emitter is the listener.
        const PRIVATE_SOUND   = 1 << 6;
        /// Muted exactly when the owning emitter is the listener.
        const ANTI_PRIVATE    = 1 << 7;
        /// Refuse to restart while already playing somewhere.
        const PLAY_ONCE       = 1 << 8;
        /// Ignore portal gating entirely.
        const NO_PORTAL_FLOW  = 1 << 9;
        /// Ignore emitter dynamic parameter modulation.
        const NO_DYN_PARMS    = 1 << 10;
        /// Never feed the reverb send.
        const NO_REVERB       = 1 << 11;
        const NO_OCCLUSION    = 1 << 12;
        const NO_OBSTRUCTION  = 1 << 13;
        const NO_EXCLUSION    = 1 << 14;
    }
}

/// Channel competition tier. A new sound can only evict channels whose
/// shader sits strictly below its own tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Ambient = 0,
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct SoundShader {
    pub name: String,
    pub flags: ShaderFlags,
    pub priority: Priority,

    pub volume: f32,
    pub pitch: f32,
    pub dry_filter: FilterGain,
    pub wet_filter: FilterGain,

    /// Full-volume radius and audibility limit, in game units.
    pub min_distance: f32,
    pub max_distance: f32,

    /// Cone spread in degrees; a meaningful cone needs inner < outer and
    /// an outer volume below 1.
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_volume: f32,

    pub rolloff_factor: f32,
    pub room_rolloff_factor: f32,
    pub air_absorption_factor: f32,
    pub doppler_factor: f32,

    /// Minimum samples (at the mixer rate) between two starts of this
    /// shader; 0 disables the gap.
    pub min_trigger_gap_samples: u32,

    /// Registry indices of the one-shot samples played before the steady
    /// state begins, and of the steady-state candidates.
    pub leadins: Vec<usize>,
    pub entries: Vec<usize>,
}

impl Default for SoundShader {
    fn default() -> Self {
        Self {
            name: String::new(),
            flags: ShaderFlags::empty(),
            priority: Priority::Normal,
            volume: 1.0,
            pitch: 1.0,
            dry_filter: FilterGain::UNITY,
            wet_filter: FilterGain::UNITY,
            min_distance: 80.0,
            max_distance: 1250.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_volume: 1.0,
            rolloff_factor: 1.0,
            room_rolloff_factor: 0.0,
            air_absorption_factor: 0.0,
            doppler_factor: 0.0,
            min_trigger_gap_samples: 0,
            leadins: Vec::new(),
            entries: Vec::new(),
        }
    }
}

impl SoundShader {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    /// Whether the cone parameters describe an actual directional cone.
    pub fn has_cone(&self) -> bool {
        self.cone_inner_angle < self.cone_outer_angle && self.cone_outer_volume < 1.0
    }
}

// ============================================================
// Registry
// ============================================================

/// Name-keyed shader table. Append-only; duplicate registration keeps
/// the first definition.
#[derive(Default)]
pub struct ShaderRegistry {
    shaders: Vec<SoundShader>,
    by_name: HashMap<String, usize>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_shader(&mut self, mut shader: SoundShader) -> usize {
        let key = shader.name.to_ascii_lowercase();
        if let Some(&idx) = self.by_name.get(&key) {
            con_print(&format!("shader '{}' already registered\n", shader.name));
            return idx;
        }
        if shader.leadins.len() > MAX_SHADER_SOUNDS {
            con_print(&format!("shader '{}': too many lead-in sounds\n", shader.name));
            shader.leadins.truncate(MAX_SHADER_SOUNDS);
        }
        if shader.entries.len() > MAX_SHADER_SOUNDS {
            con_print(&format!("shader '{}': too many entry sounds\n", shader.name));
            shader.entries.truncate(MAX_SHADER_SOUNDS);
        }
        let idx = self.shaders.len();
        self.shaders.push(shader);
        self.by_name.insert(key, idx);
        idx
    }

    pub fn find_shader(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn get(&self, idx: usize) -> &SoundShader {
        &self.shaders[idx]
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}
