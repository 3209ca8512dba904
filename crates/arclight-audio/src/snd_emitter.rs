// snd_emitter.rs — bounded pool of positional sound emitters
//
// Emitters are the moving world objects channels attach to. Slots are a
// fixed-capacity arena with a generation counter; a handle packs the
// 1-based slot in its low 16 bits and the slot generation above it, so
// a recycled slot invalidates every old handle without a search.

use arclight_common::console::{con_error, con_print, ERR_FATAL};
use arclight_common::math::{Axis, Vec3, AXIS_IDENTITY};

pub const MAX_EMITTERS: usize = 256;

/// Per-parameter dynamic modulation slots an emitter can drive each
/// frame. 0.0 means "unset", leaving the shader default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SoundParm {
    Volume = 0,
    Pitch,
    DryFilter,
    DryFilterHf,
    WetFilter,
    WetFilterHf,
    MinDistance,
    MaxDistance,
}

pub const SOUND_PARM_COUNT: usize = 8;

/// Positional state pushed by the game every frame.
#[derive(Debug, Clone)]
pub struct EmitterSnapshot {
    pub origin: Vec3,
    pub velocity: Vec3,
    pub axis: Axis,
    /// World area the emitter is in, -1 if unknown.
    pub area: i32,
    pub underwater: bool,
    pub parms: [f32; SOUND_PARM_COUNT],
}

impl Default for EmitterSnapshot {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            velocity: [0.0; 3],
            axis: AXIS_IDENTITY,
            area: -1,
            underwater: false,
            parms: [0.0; SOUND_PARM_COUNT],
        }
    }
}

impl EmitterSnapshot {
    pub fn parm(&self, p: SoundParm) -> f32 {
        self.parms[p as usize]
    }
}

/// Opaque emitter handle. 0 is "no emitter" (or the listener itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmitterHandle(pub u32);

impl EmitterHandle {
    pub const NONE: Self = Self(0);

    fn pack(slot: usize, generation: u16) -> Self {
        Self(((generation as u32) << 16) | (slot as u32 + 1))
    }

    /// 0-based slot index, if the handle is non-null.
    fn slot(self) -> Option<usize> {
        let low = self.0 & 0xffff;
        if low == 0 {
            None
        } else {
            Some(low as usize - 1)
        }
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

#[derive(Clone, Default)]
struct EmitterSlot {
    active: bool,
    generation: u16,
    snapshot: EmitterSnapshot,
    /// Last-played memory for the NO_DUPS rotation, tracked separately
    /// for lead-in and entry lists.
    last_leadin: Option<usize>,
    last_entry: Option<usize>,
}

pub struct EmitterTable {
    slots: Vec<EmitterSlot>,
    free: Vec<usize>,
    /// Dev profiling aid: drop snapshot updates on the floor.
    pub skip_updates: bool,
    /// Perf counter, reset externally.
    pub update_count: u64,
}

impl EmitterTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![EmitterSlot::default(); capacity],
            // Pop order matches slot order for predictable reuse.
            free: (0..capacity).rev().collect(),
            skip_updates: false,
            update_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// True iff the handle was returned by add_emitter and has not been
    /// removed since. Out-of-range slots are caller bugs and fatal.
    pub fn is_valid(&self, handle: EmitterHandle) -> bool {
        let slot = match handle.slot() {
            Some(s) => s,
            None => return false,
        };
        if slot >= self.slots.len() {
            con_error(ERR_FATAL, &format!("emitter handle {} out of range", handle.0));
        }
        let entry = &self.slots[slot];
        entry.active && entry.generation == handle.generation()
    }

    /// Allocate a slot. Exhaustion is recoverable: logs and returns the
    /// null handle.
    pub fn add_emitter(&mut self, snapshot: EmitterSnapshot) -> EmitterHandle {
        let slot = match self.free.pop() {
            Some(s) => s,
            None => {
                con_print("add_emitter: no free emitters\n");
                return EmitterHandle::NONE;
            }
        };
        let entry = &mut self.slots[slot];
        entry.active = true;
        entry.snapshot = snapshot;
        entry.last_leadin = None;
        entry.last_entry = None;
        EmitterHandle::pack(slot, entry.generation)
    }

    /// Overwrite the snapshot. Stale handles are rejected with a
    /// diagnostic; in skip mode the call is a silent no-op.
    pub fn update_emitter(&mut self, handle: EmitterHandle, snapshot: EmitterSnapshot) -> bool {
        if !self.is_valid(handle) {
            con_print(&format!("update_emitter: stale handle {}\n", handle.0));
            return false;
        }
        if self.skip_updates {
            return true;
        }
        let slot = handle.slot().unwrap();
        self.slots[slot].snapshot = snapshot;
        self.update_count += 1;
        true
    }

    /// Deactivate a slot and recycle it. The caller (the sound system)
    /// is responsible for detaching or stopping channels first.
    pub fn release(&mut self, handle: EmitterHandle) -> bool {
        if !self.is_valid(handle) {
            con_print(&format!("remove_emitter: stale handle {}\n", handle.0));
            return false;
        }
        let slot = handle.slot().unwrap();
        let entry = &mut self.slots[slot];
        entry.active = false;
        entry.generation = entry.generation.wrapping_add(1);
        entry.snapshot = EmitterSnapshot::default();
        entry.last_leadin = None;
        entry.last_entry = None;
        self.free.push(slot);
        true
    }

    pub fn get(&self, handle: EmitterHandle) -> Option<&EmitterSnapshot> {
        if !self.is_valid(handle) {
            return None;
        }
        Some(&self.slots[handle.slot().unwrap()].snapshot)
    }

    pub fn last_played(&self, handle: EmitterHandle, lead_in: bool) -> Option<usize> {
        if !self.is_valid(handle) {
            return None;
        }
        let entry = &self.slots[handle.slot().unwrap()];
        if lead_in {
            entry.last_leadin
        } else {
            entry.last_entry
        }
    }

    pub fn note_played(&mut self, handle: EmitterHandle, lead_in: bool, sound: usize) {
        if !self.is_valid(handle) {
            return;
        }
        let entry = &mut self.slots[handle.slot().unwrap()];
        if lead_in {
            entry.last_leadin = Some(sound);
        } else {
            entry.last_entry = Some(sound);
        }
    }
}
