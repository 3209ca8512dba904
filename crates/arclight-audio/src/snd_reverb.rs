// snd_reverb.rs — area-indexed environmental reverb parameters
//
// Each world area can carry a reverb preset; the spatializer consults
// the table for the wet-path gain of any channel that feeds reverb.
// Preset editing and persistence live in the tools, not here.

/// Environmental reverb preset parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvPreset {
    pub density: f32,
    pub diffusion: f32,
    pub gain: f32,
    pub gain_hf: f32,
    pub decay_time: f32,
    pub decay_hf_ratio: f32,
    pub reflections_gain: f32,
    pub reflections_delay: f32,
    pub late_reverb_gain: f32,
    pub late_reverb_delay: f32,
}

impl EnvPreset {
    pub const GENERIC: Self = Self {
        density: 1.0,
        diffusion: 1.0,
        gain: 0.32,
        gain_hf: 0.89,
        decay_time: 1.49,
        decay_hf_ratio: 0.83,
        reflections_gain: 0.05,
        reflections_delay: 0.007,
        late_reverb_gain: 1.26,
        late_reverb_delay: 0.011,
    };

    pub const UNDERWATER: Self = Self {
        density: 0.36,
        diffusion: 1.0,
        gain: 0.32,
        gain_hf: 0.01,
        decay_time: 8.0,
        decay_hf_ratio: 0.2,
        reflections_gain: 0.4,
        reflections_delay: 0.02,
        late_reverb_gain: 1.0,
        late_reverb_delay: 0.04,
    };

    pub const CAVE: Self = Self {
        density: 1.0,
        diffusion: 1.0,
        gain: 0.32,
        gain_hf: 0.59,
        decay_time: 3.0,
        decay_hf_ratio: 0.6,
        reflections_gain: 0.14,
        reflections_delay: 0.015,
        late_reverb_gain: 1.0,
        late_reverb_delay: 0.022,
    };

    pub const HALLWAY: Self = Self {
        density: 0.36,
        diffusion: 1.0,
        gain: 0.32,
        gain_hf: 0.89,
        decay_time: 1.49,
        decay_hf_ratio: 0.59,
        reflections_gain: 0.25,
        reflections_delay: 0.007,
        late_reverb_gain: 1.26,
        late_reverb_delay: 0.011,
    };

    pub const ARENA: Self = Self {
        density: 1.0,
        diffusion: 1.0,
        gain: 0.32,
        gain_hf: 0.45,
        decay_time: 4.6,
        decay_hf_ratio: 0.5,
        reflections_gain: 0.2,
        reflections_delay: 0.02,
        late_reverb_gain: 0.8,
        late_reverb_delay: 0.03,
    };
}

/// Per-area preset table. Areas without an explicit preset use GENERIC;
/// a submerged listener always hears the underwater preset.
#[derive(Default)]
pub struct ReverbTable {
    areas: Vec<Option<EnvPreset>>,
}

impl ReverbTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_area_preset(&mut self, area: i32, preset: EnvPreset) {
        if area < 0 {
            return;
        }
        let idx = area as usize;
        if idx >= self.areas.len() {
            self.areas.resize(idx + 1, None);
        }
        self.areas[idx] = Some(preset);
    }

    pub fn clear(&mut self) {
        self.areas.clear();
    }

    pub fn preset_for_area(&self, area: i32) -> &EnvPreset {
        if area >= 0 {
            if let Some(Some(p)) = self.areas.get(area as usize) {
                return p;
            }
        }
        &EnvPreset::GENERIC
    }

    /// Preset the listener actually hears: area-indexed, with the
    /// underwater override.
    pub fn listener_preset(&self, area: i32, underwater: bool) -> &EnvPreset {
        if underwater {
            return &EnvPreset::UNDERWATER;
        }
        self.preset_for_area(area)
    }
}
