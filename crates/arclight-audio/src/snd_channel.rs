// snd_channel.rs — playback channels and the acquisition algorithm
//
// A channel is a bounded playback slot: the unit of audibility and
// priority competition. The pool hands one out for every play request,
// evicting strictly-lower-priority channels when full.

use arclight_common::math::Vec3;

use crate::backend::FilterGain;
use crate::snd_emitter::{EmitterHandle, EmitterSnapshot};
use crate::snd_shader::{ShaderFlags, SoundShader};

pub const MAX_CHANNELS: usize = 128;

/// Channel lifecycle. Lead-in states play a one-shot intro sample and
/// flip to their steady counterpart when it drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Free,
    Normal,
    Looped,
    Random,
    LeadInNormal,
    LeadInLooped,
    LeadInRandom,
}

impl ChannelState {
    pub fn is_free(self) -> bool {
        self == ChannelState::Free
    }

    pub fn is_lead_in(self) -> bool {
        matches!(
            self,
            ChannelState::LeadInNormal | ChannelState::LeadInLooped | ChannelState::LeadInRandom
        )
    }

    /// The steady state a lead-in flips to once the intro drains.
    pub fn steady(self) -> Self {
        match self {
            ChannelState::LeadInNormal => ChannelState::Normal,
            ChannelState::LeadInLooped => ChannelState::Looped,
            ChannelState::LeadInRandom => ChannelState::Random,
            other => other,
        }
    }

    /// Initial state for a shader, given whether a lead-in sample runs
    /// first.
    pub fn for_shader(flags: ShaderFlags, lead_in: bool) -> Self {
        match (flags.contains(ShaderFlags::RANDOMIZE), flags.contains(ShaderFlags::LOOPING)) {
            (true, _) => {
                if lead_in {
                    ChannelState::LeadInRandom
                } else {
                    ChannelState::Random
                }
            }
            (false, true) => {
                if lead_in {
                    ChannelState::LeadInLooped
                } else {
                    ChannelState::Looped
                }
            }
            (false, false) => {
                if lead_in {
                    ChannelState::LeadInNormal
                } else {
                    ChannelState::Normal
                }
            }
        }
    }
}

/// Spatialization output recomputed for every active channel, every
/// frame, and handed to the backend.
#[derive(Debug, Clone)]
pub struct ChannelParms {
    pub spatialized: bool,
    pub reachable: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    pub dir_to_listener: Vec3,
    pub dist_to_listener: f32,
    pub portals_passed: i32,
    pub portals_blocked: i32,
    pub play_origin: Vec3,
    /// Direction toward the listener in the emitter's frame; zeroed for
    /// omnidirectional playback. Feeds the backend cone stage.
    pub play_dir: Vec3,
    pub volume: f32,
    pub pitch: f32,
    pub feed_reverb: bool,
    pub reverb_gain: f32,
    pub dry_filter: FilterGain,
    pub wet_filter: FilterGain,
}

impl Default for ChannelParms {
    fn default() -> Self {
        Self {
            spatialized: false,
            reachable: false,
            min_distance: 0.0,
            max_distance: 0.0,
            dir_to_listener: [0.0; 3],
            dist_to_listener: 0.0,
            portals_passed: 0,
            portals_blocked: 0,
            play_origin: [0.0; 3],
            play_dir: [0.0; 3],
            volume: 0.0,
            pitch: 1.0,
            feed_reverb: false,
            reverb_gain: 0.0,
            dry_filter: FilterGain::UNITY,
            wet_filter: FilterGain::UNITY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub state: ChannelState,
    pub index: usize,
    /// Fed externally (music/voice), skips positional mixing.
    pub streaming: bool,
    /// Envelope amplitude at the current playback position.
    pub amplitude: f32,

    // Identity triple used for override matching.
    pub emitter_id: i32,
    pub channel_id: i32,
    pub alloc_time: i32,

    /// When the currently bound sound started, for amplitude queries.
    pub sound_start_time: i32,

    /// Owning emitter; NONE once detached (the last captured snapshot
    /// keeps the channel positioned).
    pub emitter: EmitterHandle,
    pub shader: Option<usize>,
    pub sound: Option<usize>,

    /// Emitter state captured at spatialization time.
    pub e: EmitterSnapshot,
    /// Spatialization output.
    pub p: ChannelParms,
}

impl Channel {
    /// Release back to the pool. The owning emitter's dedup memory is
    /// deliberately not touched.
    pub fn reset(&mut self) {
        let index = self.index;
        *self = Channel { index, ..Channel::default() };
    }
}

// ============================================================
// Pool
// ============================================================

pub struct ChannelPool {
    channels: Vec<Channel>,
}

impl ChannelPool {
    pub fn new(capacity: usize) -> Self {
        let channels = (0..capacity)
            .map(|index| Channel { index, ..Channel::default() })
            .collect();
        Self { channels }
    }

    pub fn capacity(&self) -> usize {
        self.channels.len()
    }

    pub fn get(&self, idx: usize) -> &Channel {
        &self.channels[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Channel {
        &mut self.channels[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    pub fn active_count(&self) -> usize {
        self.channels.iter().filter(|c| !c.state.is_free()).count()
    }

    /// Pick the channel that will serve a new play request.
    ///
    /// 1. A nonzero (emitter_id, channel_id) pair that matches a live
    ///    channel selects it unconditionally: gameplay code replaces
    ///    "channel 3 of entity 7" deterministically.
    /// 2. Otherwise any free channel.
    /// 3. Otherwise evict the longest-playing channel whose priority is
    ///    strictly below the request's. If none qualifies the request is
    ///    refused; the drop is expected, not an error.
    pub fn pick_channel<P>(
        &self,
        emitter_id: i32,
        channel_id: i32,
        priority: crate::snd_shader::Priority,
        shader_priority: P,
    ) -> Option<usize>
    where
        P: Fn(usize) -> crate::snd_shader::Priority,
    {
        if emitter_id != 0 && channel_id != 0 {
            for ch in &self.channels {
                if !ch.state.is_free() && ch.emitter_id == emitter_id && ch.channel_id == channel_id {
                    return Some(ch.index);
                }
            }
        }

        for ch in &self.channels {
            if ch.state.is_free() {
                return Some(ch.index);
            }
        }

        let mut victim: Option<usize> = None;
        for ch in &self.channels {
            let ch_priority = match ch.shader {
                Some(s) => shader_priority(s),
                None => continue,
            };
            if ch_priority >= priority {
                continue;
            }
            match victim {
                Some(v) if self.channels[v].alloc_time <= ch.alloc_time => {}
                _ => victim = Some(ch.index),
            }
        }
        victim
    }
}

// ============================================================
// Sound selection
// ============================================================

/// Pick a concrete sample from the shader's lead-in or entry list.
///
/// A single candidate is used directly. Otherwise the pick is uniform
/// random; with NO_DUPS set, landing on the emitter's last-played
/// candidate advances one step instead (a rotation, not a re-roll), so
/// two candidates alternate deterministically.
pub fn select_sound(shader: &SoundShader, lead_in: bool, last_played: Option<usize>) -> Option<usize> {
    let list = if lead_in { &shader.leadins } else { &shader.entries };
    if list.is_empty() {
        return None;
    }
    if list.len() == 1 {
        return Some(list[0]);
    }

    let mut idx = rand::random::<usize>() % list.len();
    if shader.flags.contains(ShaderFlags::NO_DUPS) && last_played == Some(list[idx]) {
        idx = (idx + 1) % list.len();
    }
    Some(list[idx])
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snd_shader::Priority;

    fn busy(pool: &mut ChannelPool, idx: usize, shader: usize, alloc_time: i32) {
        let ch = pool.get_mut(idx);
        ch.state = ChannelState::Normal;
        ch.shader = Some(shader);
        ch.alloc_time = alloc_time;
    }

    #[test]
    fn test_state_machine_shape() {
        assert!(ChannelState::Free.is_free());
        assert!(ChannelState::LeadInLooped.is_lead_in());
        assert!(!ChannelState::Looped.is_lead_in());
        assert_eq!(ChannelState::LeadInNormal.steady(), ChannelState::Normal);
        assert_eq!(ChannelState::LeadInLooped.steady(), ChannelState::Looped);
        assert_eq!(ChannelState::LeadInRandom.steady(), ChannelState::Random);
        assert_eq!(ChannelState::Looped.steady(), ChannelState::Looped);
    }

    #[test]
    fn test_state_for_shader() {
        assert_eq!(ChannelState::for_shader(ShaderFlags::empty(), false), ChannelState::Normal);
        assert_eq!(ChannelState::for_shader(ShaderFlags::LOOPING, false), ChannelState::Looped);
        assert_eq!(ChannelState::for_shader(ShaderFlags::RANDOMIZE, true), ChannelState::LeadInRandom);
        assert_eq!(ChannelState::for_shader(ShaderFlags::LOOPING, true), ChannelState::LeadInLooped);
    }

    #[test]
    fn test_pick_free_channel() {
        let mut pool = ChannelPool::new(4);
        busy(&mut pool, 0, 0, 0);
        let got = pool.pick_channel(0, 0, Priority::Normal, |_| Priority::Normal);
        assert_eq!(got, Some(1));
    }

    #[test]
    fn test_override_identity_returns_same_channel() {
        let mut pool = ChannelPool::new(4);
        busy(&mut pool, 2, 0, 0);
        pool.get_mut(2).emitter_id = 7;
        pool.get_mut(2).channel_id = 3;

        let first = pool.pick_channel(7, 3, Priority::Low, |_| Priority::Critical);
        let second = pool.pick_channel(7, 3, Priority::Low, |_| Priority::Critical);
        // Matches unconditionally, before any free scan or eviction.
        assert_eq!(first, Some(2));
        assert_eq!(second, Some(2));
    }

    #[test]
    fn test_zero_ids_never_match_override() {
        let mut pool = ChannelPool::new(2);
        busy(&mut pool, 0, 0, 0);
        // Channel 0 has ids (0, 0); a (0, 0) request must not "match" it.
        let got = pool.pick_channel(0, 0, Priority::Normal, |_| Priority::Normal);
        assert_eq!(got, Some(1));
    }

    #[test]
    fn test_eviction_requires_strictly_lower_priority() {
        let mut pool = ChannelPool::new(2);
        busy(&mut pool, 0, 0, 10);
        busy(&mut pool, 1, 1, 20);
        let prio = |s: usize| if s == 0 { Priority::Low } else { Priority::High };

        // Equal priority is refused.
        assert_eq!(pool.pick_channel(0, 0, Priority::Low, prio), None);
        // Higher priority evicts the strictly lower one.
        assert_eq!(pool.pick_channel(0, 0, Priority::Normal, prio), Some(0));
    }

    #[test]
    fn test_eviction_prefers_oldest_eligible() {
        let mut pool = ChannelPool::new(3);
        busy(&mut pool, 0, 0, 300);
        busy(&mut pool, 1, 0, 100);
        busy(&mut pool, 2, 0, 200);
        let got = pool.pick_channel(0, 0, Priority::High, |_| Priority::Low);
        assert_eq!(got, Some(1));
    }

    #[test]
    fn test_full_pool_refusal_leaves_pool_unchanged() {
        let mut pool = ChannelPool::new(2);
        busy(&mut pool, 0, 0, 0);
        busy(&mut pool, 1, 0, 0);
        let before: Vec<ChannelState> = pool.iter().map(|c| c.state).collect();

        assert_eq!(pool.pick_channel(0, 0, Priority::Normal, |_| Priority::Normal), None);
        let after: Vec<ChannelState> = pool.iter().map(|c| c.state).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_mixed_priority_scenario() {
        // Pool [LOW, NORMAL, NORMAL, HIGH], all busy: a NORMAL request
        // evicts the LOW channel, the only strictly-lower one.
        let mut pool = ChannelPool::new(4);
        for (i, t) in [(0, 40), (1, 10), (2, 20), (3, 30)] {
            busy(&mut pool, i, i, t);
        }
        let prio = |s: usize| match s {
            0 => Priority::Low,
            3 => Priority::High,
            _ => Priority::Normal,
        };
        assert_eq!(pool.pick_channel(0, 0, Priority::Normal, prio), Some(0));
        // An Ambient request finds nothing strictly below it.
        assert_eq!(pool.pick_channel(0, 0, Priority::Ambient, prio), None);
    }

    #[test]
    fn test_reset_keeps_index() {
        let mut pool = ChannelPool::new(3);
        busy(&mut pool, 2, 5, 99);
        pool.get_mut(2).reset();
        let ch = pool.get(2);
        assert!(ch.state.is_free());
        assert_eq!(ch.index, 2);
        assert_eq!(ch.shader, None);
    }

    // ========== select_sound ==========

    fn shader_with_entries(entries: Vec<usize>, flags: ShaderFlags) -> SoundShader {
        let mut sh = SoundShader::new("test");
        sh.entries = entries;
        sh.flags = flags;
        sh
    }

    #[test]
    fn test_select_sound_empty_list() {
        let sh = shader_with_entries(vec![], ShaderFlags::empty());
        assert_eq!(select_sound(&sh, false, None), None);
    }

    #[test]
    fn test_select_sound_single_candidate() {
        let sh = shader_with_entries(vec![42], ShaderFlags::empty());
        assert_eq!(select_sound(&sh, false, None), Some(42));
        // Even when it was the last played one.
        assert_eq!(select_sound(&sh, false, Some(42)), Some(42));
    }

    #[test]
    fn test_select_sound_nodups_two_entries_alternates() {
        let sh = shader_with_entries(vec![10, 11], ShaderFlags::NO_DUPS);
        // With two candidates the rotation is deterministic: whatever
        // the random pick, the result is the one not played last.
        for _ in 0..32 {
            assert_eq!(select_sound(&sh, false, Some(10)), Some(11));
            assert_eq!(select_sound(&sh, false, Some(11)), Some(10));
        }
    }

    #[test]
    fn test_select_sound_nodups_never_repeats() {
        let sh = shader_with_entries(vec![1, 2, 3, 4], ShaderFlags::NO_DUPS);
        for last in [1usize, 2, 3, 4] {
            for _ in 0..64 {
                let got = select_sound(&sh, false, Some(last)).unwrap();
                assert_ne!(got, last);
            }
        }
    }

    #[test]
    fn test_select_sound_uses_leadin_list() {
        let mut sh = shader_with_entries(vec![1], ShaderFlags::empty());
        sh.leadins = vec![9];
        assert_eq!(select_sound(&sh, true, None), Some(9));
        assert_eq!(select_sound(&sh, false, None), Some(1));
    }

    #[test]
    fn test_select_sound_stays_in_list() {
        let sh = shader_with_entries(vec![5, 6, 7], ShaderFlags::empty());
        for _ in 0..64 {
            let got = select_sound(&sh, false, None).unwrap();
            assert!([5, 6, 7].contains(&got));
        }
    }
}
