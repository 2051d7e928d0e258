use serde::{Deserialize, Serialize};

use crate::{Element, ElementKind, Facing, Millis, Point};

/// A partial element carried by `UPDATE_ELEMENT`.
///
/// Only the fields present are written. Kind-specific fields that do not
/// belong to the target's kind are ignored; identity and provenance never
/// change through a patch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ElementPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<Millis>,

    // sticky
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    // music
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_time: Option<f64>,

    // path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,

    // character
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<Facing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_grounded: Option<bool>,
}

impl ElementPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn touched(mut self, at: Millis) -> Self {
        self.last_modified_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, element: &mut Element) {
        set(&mut element.x, self.x);
        set(&mut element.y, self.y);
        if let Some(content) = &self.content {
            element.content = content.clone();
        }
        set_opt(&mut element.width, self.width);
        set_opt(&mut element.height, self.height);
        set_opt(&mut element.rotation, self.rotation);
        set_opt(&mut element.scale, self.scale);
        set_opt(&mut element.last_modified_at, self.last_modified_at);

        match &mut element.kind {
            ElementKind::Text | ElementKind::Image => {}
            ElementKind::Sticky { color } => {
                if let Some(c) = &self.color {
                    *color = Some(c.clone());
                }
            }
            ElementKind::Music {
                is_playing,
                playback_time,
            } => {
                set(is_playing, self.is_playing);
                set(playback_time, self.playback_time);
            }
            ElementKind::Path {
                points,
                stroke_color,
                stroke_width,
            } => {
                if let Some(p) = &self.points {
                    *points = p.clone();
                }
                if let Some(c) = &self.stroke_color {
                    *stroke_color = c.clone();
                }
                set(stroke_width, self.stroke_width);
            }
            ElementKind::Character {
                vx,
                vy,
                facing,
                is_grounded,
            } => {
                set(vx, self.vx);
                set(vy, self.vy);
                set(facing, self.facing);
                set(is_grounded, self.is_grounded);
            }
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn set_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}
