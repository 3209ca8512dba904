// snd_listener.rs — the listener singleton

use arclight_common::math::{Axis, Vec3, AXIS_IDENTITY};

/// Camera/player state the spatializer reads. Refreshed once per frame
/// from the game; storage only.
#[derive(Debug, Clone)]
pub struct Listener {
    /// Emitter id whose sounds count as "our own"; channels test their
    /// identity against this for private/anti-private muting.
    pub id: i32,
    pub origin: Vec3,
    pub axis: Axis,
    pub velocity: Vec3,
    /// World area, -1 if unknown.
    pub area: i32,
    pub underwater: bool,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            id: 0,
            origin: [0.0; 3],
            axis: AXIS_IDENTITY,
            velocity: [0.0; 3],
            area: -1,
            underwater: false,
        }
    }
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(&mut self, id: i32, origin: Vec3, axis: Axis, velocity: Vec3, area: i32, underwater: bool) {
        self.id = id;
        self.origin = origin;
        self.axis = axis;
        self.velocity = velocity;
        self.area = area;
        self.underwater = underwater;
    }
}
