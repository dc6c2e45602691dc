//! Spatial and temporal value types stored in the cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Build an envelope from two corners in any order
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Degenerate envelope of a single point
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    /// Grow this envelope so it also covers `other`
    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Bounding box of both envelopes
    pub fn union(&self, other: &Envelope) -> Envelope {
        let mut out = *self;
        out.expand_to_include(other);
        out
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Union of every envelope yielded, `None` for an empty iterator
    pub fn union_all<'a>(envelopes: impl IntoIterator<Item = &'a Envelope>) -> Option<Envelope> {
        envelopes.into_iter().fold(None, |acc: Option<Envelope>, e| match acc {
            Some(acc) => Some(acc.union(e)),
            None => Some(*e),
        })
    }
}

/// Envelope tagged with the EPSG code of its coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialEnvelope {
    pub envelope: Envelope,
    pub srid: i32,
}

impl SpatialEnvelope {
    pub fn new(envelope: Envelope, srid: i32) -> Self {
        Self { envelope, srid }
    }

    /// Grow the box, keeping the CRS of `self`
    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.envelope.expand_to_include(other);
    }
}

/// Closed time interval; an instant is the period `[t, t]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    /// Build a period from two bounds in any order
    pub fn new(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn instant(t: DateTime<Utc>) -> Self {
        Self { start: t, end: t }
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Widen this period to also cover `other`
    pub fn extend(&mut self, other: &TimePeriod) {
        if other.start < self.start {
            self.start = other.start;
        }
        if other.end > self.end {
            self.end = other.end;
        }
    }
}
