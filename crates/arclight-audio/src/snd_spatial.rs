// snd_spatial.rs — per-frame channel spatialization
//
// Recomputes a channel's audibility, attenuation, doppler, filtering
// and portal reachability from the emitter snapshot, the listener and
// the shader policy. Runs once per active channel per frame; no I/O.

use arclight_common::math::{
    dot_product, vector_clear, vector_ma, vector_normalize, vector_subtract, world_to_local,
};

use crate::backend::FilterGain;
use crate::snd_channel::Channel;
use crate::snd_emitter::SoundParm;
use crate::snd_listener::Listener;
use crate::snd_reverb::ReverbTable;
use crate::snd_shader::{ShaderFlags, SoundShader};
use crate::snd_system::SoundConfig;

/// Read-only area/portal connectivity queries supplied by the world
/// layer.
pub trait AreaGraph {
    fn num_areas(&self) -> i32;
    fn are_areas_connected(&self, a: i32, b: i32) -> bool;
}

/// Fixed connectivity table. Used by tests and offline tools; the game
/// supplies the real portal graph.
#[derive(Default)]
pub struct TableAreaGraph {
    num_areas: i32,
    connected: Vec<(i32, i32)>,
}

impl TableAreaGraph {
    pub fn new(num_areas: i32) -> Self {
        Self { num_areas, connected: Vec::new() }
    }

    pub fn connect(&mut self, a: i32, b: i32) {
        self.connected.push((a, b));
    }
}

impl AreaGraph for TableAreaGraph {
    fn num_areas(&self) -> i32 {
        self.num_areas
    }

    fn are_areas_connected(&self, a: i32, b: i32) -> bool {
        self.connected.iter().any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

// Sound crosses water boundaries differently than air: perceived
// distance shrinks, effective sound speed grows, by these factors.
const WATER_SCALE_BOTH: f32 = 4.4;
const WATER_SCALE_ONE: f32 = 2.2;

fn water_scale(listener_underwater: bool, emitter_underwater: bool) -> f32 {
    match (listener_underwater, emitter_underwater) {
        (true, true) => WATER_SCALE_BOTH,
        (true, false) | (false, true) => WATER_SCALE_ONE,
        (false, false) => 1.0,
    }
}

fn area_valid(area: i32, graph: &dyn AreaGraph) -> bool {
    area >= 0 && area < graph.num_areas()
}

/// Dynamic parameter modulation: a nonzero emitter parm scales the
/// shader default, when the shader allows dynamic parms at all.
fn modulated(base: f32, parm: f32, dyn_ok: bool) -> f32 {
    if dyn_ok && parm != 0.0 {
        base * parm
    } else {
        base
    }
}

/// Single-hop portal reachability. Multi-hop flow accumulation through
/// the graph hangs off this extension point; the shipping contract is
/// same-area / directly-connected / blocked.
fn portal_flow(
    listener_area: i32,
    emitter_area: i32,
    graph: &dyn AreaGraph,
) -> (bool, i32, i32) {
    if listener_area == emitter_area {
        (true, 0, 0)
    } else if graph.are_areas_connected(listener_area, emitter_area) {
        (true, 1, 0)
    } else {
        (false, 0, 1)
    }
}

/// Recompute `ch.p` from `ch.e`, the listener and the shader. The
/// emitter snapshot must already be refreshed for this frame.
pub fn spatialize_channel(
    ch: &mut Channel,
    shader: &SoundShader,
    listener: &Listener,
    reverb: &ReverbTable,
    graph: &dyn AreaGraph,
    config: &SoundConfig,
) {
    let dyn_ok = !shader.flags.contains(ShaderFlags::NO_DYN_PARMS);
    let is_listener_own = ch.emitter_id == listener.id;

    let bypass = config.s_skip_spatialize
        || ch.streaming
        || is_listener_own
        || shader.flags.contains(ShaderFlags::GLOBAL);

    ch.p.spatialized = !bypass;

    if bypass {
        // Audibility collapses to an area validity check; distance is
        // meaningless for globals and listener-own sounds.
        let emitter_area = if is_listener_own && ch.e.area < 0 {
            listener.area
        } else {
            ch.e.area
        };
        ch.p.reachable = area_valid(listener.area, graph) && area_valid(emitter_area, graph);
        vector_clear(&mut ch.p.dir_to_listener);
        vector_clear(&mut ch.p.play_dir);
        ch.p.dist_to_listener = 0.0;
        ch.p.portals_passed = 0;
        ch.p.portals_blocked = 0;
        ch.p.min_distance = shader.min_distance;
        ch.p.max_distance = shader.max_distance;
        ch.p.play_origin = listener.origin;
    } else {
        // Effective attenuation range: nonzero dynamic values override
        // the shader statics.
        let parm_min = ch.e.parm(SoundParm::MinDistance);
        let parm_max = ch.e.parm(SoundParm::MaxDistance);
        if dyn_ok && (parm_min != 0.0 || parm_max != 0.0) {
            ch.p.min_distance = if parm_min != 0.0 { parm_min } else { shader.min_distance };
            ch.p.max_distance = if parm_max != 0.0 { parm_max } else { shader.max_distance };
        } else {
            ch.p.min_distance = shader.min_distance;
            ch.p.max_distance = shader.max_distance;
        }

        let mut dir = vector_subtract(&listener.origin, &ch.e.origin);
        let raw_dist = vector_normalize(&mut dir);
        ch.p.dir_to_listener = dir;

        // Portal reachability; skipped checks degrade to "same area".
        let areas_known = area_valid(listener.area, graph) && area_valid(ch.e.area, graph);
        if config.s_skip_portals || shader.flags.contains(ShaderFlags::NO_PORTAL_FLOW) || !areas_known {
            ch.p.reachable = true;
            ch.p.portals_passed = 0;
            ch.p.portals_blocked = 0;
        } else {
            let (reachable, passed, blocked) = portal_flow(listener.area, ch.e.area, graph);
            ch.p.reachable = reachable;
            ch.p.portals_passed = passed;
            ch.p.portals_blocked = blocked;
        }

        let scale = water_scale(listener.underwater, ch.e.underwater);
        ch.p.dist_to_listener = raw_dist / scale;

        // Where the backend hears the sound from. Without attenuation
        // the channel plays head-relative; otherwise along the
        // listener→emitter axis at the perceived distance.
        if config.s_no_attenuation
            || ch.p.min_distance >= ch.p.max_distance
            || shader.rolloff_factor == 0.0
        {
            ch.p.play_origin = listener.origin;
        } else {
            ch.p.play_origin = vector_ma(&listener.origin, -ch.p.dist_to_listener, &dir);
        }

        // Cone input: the listener direction in the emitter's frame.
        if config.s_use_cones
            && !shader.flags.contains(ShaderFlags::OMNIDIRECTIONAL)
            && shader.has_cone()
        {
            ch.p.play_dir = world_to_local(&dir, &ch.e.axis);
        } else {
            vector_clear(&mut ch.p.play_dir);
        }
    }

    // Volume and pitch carry the emitter's dynamic modulation in both
    // branches.
    let mut volume = modulated(shader.volume, ch.e.parm(SoundParm::Volume), dyn_ok).clamp(0.0, 1.0);
    let mut pitch = modulated(shader.pitch, ch.e.parm(SoundParm::Pitch), dyn_ok).clamp(0.1, 10.0);

    if ch.p.spatialized && !config.s_skip_doppler && shader.doppler_factor != 0.0 {
        pitch = apply_doppler(pitch, ch, shader, listener, config);
    }

    // Filter pairs; unity when filtering is off or the path is blocked.
    let dry = FilterGain {
        gain: modulated(shader.dry_filter.gain, ch.e.parm(SoundParm::DryFilter), dyn_ok).clamp(0.0, 1.0),
        gain_hf: modulated(shader.dry_filter.gain_hf, ch.e.parm(SoundParm::DryFilterHf), dyn_ok)
            .clamp(0.0, 1.0),
    };
    let wet = FilterGain {
        gain: modulated(shader.wet_filter.gain, ch.e.parm(SoundParm::WetFilter), dyn_ok).clamp(0.0, 1.0),
        gain_hf: modulated(shader.wet_filter.gain_hf, ch.e.parm(SoundParm::WetFilterHf), dyn_ok)
            .clamp(0.0, 1.0),
    };
    if config.s_use_filters && ch.p.reachable {
        ch.p.dry_filter = dry;
        ch.p.wet_filter = wet;
    } else {
        ch.p.dry_filter = FilterGain::UNITY;
        ch.p.wet_filter = FilterGain::UNITY;
    }

    ch.p.feed_reverb = !config.s_no_reverb
        && !shader.flags.contains(ShaderFlags::NO_REVERB)
        && (!ch.p.spatialized || ch.p.reachable);
    ch.p.reverb_gain = if ch.p.feed_reverb {
        reverb.listener_preset(listener.area, listener.underwater).gain
    } else {
        0.0
    };

    // A blocked path is inaudible outright; occlusion-style partial
    // filtering would refine this using the portal counters.
    if !ch.p.reachable {
        volume = 0.0;
    }

    // Private sounds reach only their own emitter's ears; anti-private
    // ones everyone else's.
    if shader.flags.contains(ShaderFlags::PRIVATE_SOUND) && !is_listener_own {
        volume = 0.0;
    }
    if shader.flags.contains(ShaderFlags::ANTI_PRIVATE) && is_listener_own {
        volume = 0.0;
    }

    // Without a real low-pass stage, fold the dry gain into the volume
    // so occlusion keeps an audible effect.
    if !config.s_use_filters {
        volume *= dry.gain;
    }

    ch.p.volume = volume;
    ch.p.pitch = pitch;
}

/// Manual pitch-domain doppler. The backend cannot doppler-shift and
/// origin-warp at once without double counting, so the shift is folded
/// into pitch here.
fn apply_doppler(
    pitch: f32,
    ch: &Channel,
    shader: &SoundShader,
    listener: &Listener,
    config: &SoundConfig,
) -> f32 {
    // Speed of sound in game units, faster through water. Distance
    // shrinks by the reciprocal while speed grows directly; the
    // asymmetry is intentional.
    let scale = water_scale(listener.underwater, ch.e.underwater);
    let speed_of_sound = (config.speed_of_sound_mps / config.meters_per_unit) * scale;
    let factor = shader.doppler_factor;

    let ceiling = (speed_of_sound / factor - 1.0).max(0.0);
    let dir = &ch.p.dir_to_listener;
    let lv = dot_product(&listener.velocity, dir).clamp(-ceiling, ceiling);
    let ev = dot_product(&ch.e.velocity, dir).clamp(-ceiling, ceiling);

    let ratio = (speed_of_sound - lv * factor) / (speed_of_sound - ev * factor);
    (pitch * ratio).max(0.001)
}

// ============================================================
// Tests
// ============================================================
