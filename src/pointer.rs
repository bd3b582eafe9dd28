//! Pointer state and its mapping to splat impulses.

use glam::{Vec2, Vec3};
use rand::Rng;

/// Identity given to the mouse; touches use their own identifiers.
pub const MOUSE_POINTER_ID: i64 = -1;

/// Deep blue-grey ink.
pub fn ink_color() -> Vec3 {
    Vec3::new(50.0 / 255.0, 50.0 / 255.0, 60.0 / 255.0)
}

/// Width over height of a canvas in device pixels.
pub fn aspect_ratio(canvas_width: u32, canvas_height: u32) -> f32 {
    canvas_width.max(1) as f32 / canvas_height.max(1) as f32
}

pub fn correct_delta_x(delta: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio < 1.0 {
        delta * aspect_ratio
    } else {
        delta
    }
}

pub fn correct_delta_y(delta: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio > 1.0 {
        delta / aspect_ratio
    } else {
        delta
    }
}

/// Widens the splat radius on landscape canvases so splats stay circular on screen.
pub fn correct_radius(radius: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio > 1.0 {
        radius * aspect_ratio
    } else {
        radius
    }
}

/// Small random push used when a contact first lands, instead of motion-derived force.
pub fn burst_force(rng: &mut impl Rng) -> Vec2 {
    Vec2::new(
        10.0 * rng.gen_range(-0.5..0.5),
        30.0 * rng.gen_range(-0.5..0.5),
    )
}

/// The single input contact. Created once, mutated in place by input events.
#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub id: i64,
    pub down: bool,
    /// Set by a move with non-zero delta, consumed by the next frame.
    pub moved: bool,
    /// Position in [0,1]², origin bottom-left.
    pub texcoord: Vec2,
    pub prev_texcoord: Vec2,
    pub delta: Vec2,
    pub color: Vec3,
}

impl Default for Pointer {
    fn default() -> Self {
        Self {
            id: MOUSE_POINTER_ID,
            down: false,
            moved: false,
            texcoord: Vec2::ZERO,
            prev_texcoord: Vec2::ZERO,
            delta: Vec2::ZERO,
            color: Vec3::ZERO,
        }
    }
}

fn normalize(pos: Vec2, canvas_width: u32, canvas_height: u32) -> Vec2 {
    Vec2::new(
        pos.x / canvas_width.max(1) as f32,
        1.0 - pos.y / canvas_height.max(1) as f32,
    )
}

impl Pointer {
    /// `pos` is in canvas pixels with the origin at the top-left.
    pub fn update_down(&mut self, id: i64, pos: Vec2, canvas_width: u32, canvas_height: u32) {
        self.id = id;
        self.down = true;
        self.moved = false;
        self.texcoord = normalize(pos, canvas_width, canvas_height);
        self.prev_texcoord = self.texcoord;
        self.delta = Vec2::ZERO;
        self.color = ink_color();
    }

    pub fn update_move(&mut self, pos: Vec2, canvas_width: u32, canvas_height: u32, color: Vec3) {
        let aspect = aspect_ratio(canvas_width, canvas_height);
        self.prev_texcoord = self.texcoord;
        self.texcoord = normalize(pos, canvas_width, canvas_height);
        let raw = self.texcoord - self.prev_texcoord;
        self.delta = Vec2::new(correct_delta_x(raw.x, aspect), correct_delta_y(raw.y, aspect));
        self.moved = self.delta.x.abs() > 0.0 || self.delta.y.abs() > 0.0;
        self.color = color;
    }

    pub fn update_up(&mut self) {
        self.down = false;
    }

    /// Returns the pending move and clears it.
    pub fn take_moved(&mut self) -> bool {
        std::mem::take(&mut self.moved)
    }
}
