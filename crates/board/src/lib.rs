use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

mod element;
pub use element::*;
mod patch;
pub use patch::*;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("invalid element: {0}")]
    InvalidElement(String),
}

/// Milliseconds since the Unix epoch, the unit of every board timestamp.
pub type Millis = i64;

pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// The full board content of one room, keyed by element id.
///
/// Ordered so that snapshots serialize and compare deterministically.
pub type ElementMap = BTreeMap<ElementId, Element>;

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}
