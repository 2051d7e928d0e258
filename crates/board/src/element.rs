use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{now_millis, BoardError, Millis, Point};

/// Client-generated element identifier.
///
/// Locally created elements get a UUID v4; ids received from the wire are
/// taken verbatim, whatever their shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Left,
    #[default]
    Right,
}

/// Kind-specific payload of a board element, tagged by the element's `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ElementKind {
    Text,
    Image,
    Sticky {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    /// Audio/video widget; `content` holds the media URI.
    Music {
        #[serde(default)]
        is_playing: bool,
        #[serde(default)]
        playback_time: f64,
    },
    Path {
        #[serde(default)]
        points: Vec<Point>,
        #[serde(default = "default_stroke_color")]
        stroke_color: String,
        #[serde(default = "default_stroke_width")]
        stroke_width: f64,
    },
    Character {
        #[serde(default)]
        vx: f64,
        #[serde(default)]
        vy: f64,
        #[serde(default)]
        facing: Facing,
        #[serde(default)]
        is_grounded: bool,
    },
}

fn default_stroke_color() -> String {
    "#000000".to_string()
}

fn default_stroke_width() -> f64 {
    2.0
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::Image => "image",
            ElementKind::Sticky { .. } => "sticky",
            ElementKind::Music { .. } => "music",
            ElementKind::Path { .. } => "path",
            ElementKind::Character { .. } => "character",
        }
    }

    pub fn sticky(color: impl Into<String>) -> Self {
        ElementKind::Sticky {
            color: Some(color.into()),
        }
    }

    pub fn music() -> Self {
        ElementKind::Music {
            is_playing: false,
            playback_time: 0.0,
        }
    }

    pub fn path(points: Vec<Point>) -> Self {
        ElementKind::Path {
            points,
            stroke_color: default_stroke_color(),
            stroke_width: default_stroke_width(),
        }
    }

    pub fn character() -> Self {
        ElementKind::Character {
            vx: 0.0,
            vy: 0.0,
            facing: Facing::default(),
            is_grounded: false,
        }
    }
}

/// One item on the board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    #[serde(flatten)]
    pub kind: ElementKind,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<Millis>,
}

impl Element {
    /// A fresh element stamped with a new id and the current time.
    pub fn new(kind: ElementKind, x: f64, y: f64, created_by: impl Into<String>) -> Self {
        Self {
            id: ElementId::new(),
            kind,
            x,
            y,
            content: String::new(),
            width: None,
            height: None,
            rotation: None,
            scale: None,
            created_by: created_by.into(),
            created_at: Some(now_millis()),
            last_modified_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ElementId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_created_at(mut self, at: Option<Millis>) -> Self {
        self.created_at = at;
        self
    }

    pub fn with_last_modified_at(mut self, at: Option<Millis>) -> Self {
        self.last_modified_at = at;
        self
    }

    /// The ordering signal used when two replicas disagree about this element:
    /// `lastModifiedAt`, else `createdAt`, else 0.
    pub fn recency(&self) -> Millis {
        self.last_modified_at.or(self.created_at).unwrap_or(0)
    }

    /// Reject elements no replica could place on the board.
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.id.as_str().is_empty() {
            return Err(BoardError::InvalidElement("empty id".into()));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(BoardError::InvalidElement(format!(
                "{} has a non-finite position",
                self.id
            )));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if matches!(value, Some(v) if !v.is_finite() || v < 0.0) {
                return Err(BoardError::InvalidElement(format!(
                    "{} has an invalid {}",
                    self.id, name
                )));
            }
        }
        Ok(())
    }
}
