//! Participants, roles and cursors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_millis;

/// Participant role inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Read, comment, reply and move the cursor. Never edits.
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub fn can_edit(&self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

/// Cursor/selection of a participant, in char offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub position: usize,
    /// Selection end, when a range is selected
    pub selection_end: Option<usize>,
    pub page_number: Option<u32>,
    pub element_id: Option<String>,
}

impl Cursor {
    pub fn at(position: usize) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// A session participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Empty for anonymous participants
    pub email: String,
    /// `#rrggbb` display color
    pub color: String,
    pub role: Role,
    pub is_online: bool,
    /// Milliseconds since the Unix epoch
    pub last_seen: u64,
    pub cursor: Option<Cursor>,
}

impl User {
    /// Create an online user with a color derived from its id.
    pub fn new(id: Uuid, name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            color: color_for(id),
            role,
            is_online: true,
            last_seen: now_millis(),
            cursor: None,
        }
    }

    /// Create an anonymous user (no email).
    pub fn anonymous(id: Uuid, role: Role) -> Self {
        Self::new(id, format!("Guest-{}", &id.to_string()[..8]), "", role)
    }

    pub fn is_anonymous(&self) -> bool {
        self.email.is_empty()
    }
}

/// Stable, visually distinct `#rrggbb` color for a user id.
///
/// The hue comes from the id hash; saturation and lightness are fixed for
/// vivid cursors on light backgrounds.
pub fn color_for(id: Uuid) -> String {
    let hue = ((id.as_u128() % 360) as f32) / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}
