//! Space-filling curves mapping points to a single sortable `i64`.
//!
//! A point is indexed by its curve value ("derived value"): the position of
//! the curve cell holding the point when the CRS envelope is split into
//! `2^level` cells per axis. Nearby points mostly get nearby values, so a
//! bounding-box search becomes a handful of value ranges.
//!
//! ```text
//!  level 1, 2D:          level 2, 2D:
//!  ┌───┬───┐             ┌───┬───┬───┬───┐
//!  │ 1 │ 2 │             │ 5 │ 6 │ 9 │10 │
//!  ├───┼───┤             ├───┼───┼───┼───┤
//!  │ 0 │ 3 │             │ 4 │ 7 │ 8 │11 │
//!  └───┴───┘             ├───┼───┼───┼───┤
//!                        │ 3 │ 2 │13 │12 │
//!                        ├───┼───┼───┼───┤
//!                        │ 0 │ 1 │14 │15 │
//!                        └───┴───┴───┴───┘
//! ```

pub mod crs;
pub mod hilbert;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use crs::CoordinateReferenceSystem;
pub use hilbert::{HilbertCurve2D, HilbertCurve3D};

/// Levels searched below the level matching the search box size.
const SEARCH_EXTRA_LEVELS: u32 = 2;

/// An axis-aligned box with one `[min, max]` interval per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Envelope {
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Self {
        debug_assert_eq!(min.len(), max.len());
        Envelope { min, max }
    }

    pub fn new_2d(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Envelope::new(vec![x_min, y_min], vec![x_max, y_max])
    }

    pub fn new_3d(min: [f64; 3], max: [f64; 3]) -> Self {
        Envelope::new(min.to_vec(), max.to_vec())
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self, dim: usize) -> f64 {
        self.min[dim]
    }

    pub fn max(&self, dim: usize) -> f64 {
        self.max[dim]
    }

    pub fn width(&self, dim: usize) -> f64 {
        self.max[dim] - self.min[dim]
    }

    /// Inclusive on both sides, so boxes sharing an edge intersect.
    pub fn intersects(&self, other: &Envelope) -> bool {
        (0..self.dimensions()).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        (0..self.dimensions()).all(|d| self.min[d] <= other.min[d] && other.max[d] <= self.max[d])
    }

    pub fn intersection(&self, other: &Envelope) -> Option<Envelope> {
        if !self.intersects(other) {
            return None;
        }
        let dims = self.dimensions();
        let min = (0..dims).map(|d| self.min[d].max(other.min[d])).collect();
        let max = (0..dims).map(|d| self.max[d].min(other.max[d])).collect();
        Some(Envelope::new(min, max))
    }

    fn center(&self) -> Vec<f64> {
        (0..self.dimensions())
            .map(|d| self.min[d] + self.width(d) / 2.0)
            .collect()
    }

    /// Child box number `child` of the `2^dims` halves. Bit `d` picks the
    /// upper half along dimension `d`.
    fn quadrant(&self, child: usize) -> Envelope {
        let dims = self.dimensions();
        let mut min = self.min.clone();
        let mut max = self.max.clone();
        for d in 0..dims {
            let mid = self.min[d] + self.width(d) / 2.0;
            if child & (1 << d) != 0 {
                min[d] = mid;
            } else {
                max[d] = mid;
            }
        }
        Envelope::new(min, max)
    }
}

/// Inclusive range of derived values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LongRange {
    pub min: i64,
    pub max: i64,
}

impl LongRange {
    pub fn new(min: i64, max: i64) -> Self {
        LongRange { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// A curve over one CRS envelope.
pub trait SpaceFillingCurve: Send + Sync {
    fn envelope(&self) -> &Envelope;

    /// Number of halvings per axis. Derived values use `dimensions * max_level` bits.
    fn max_level(&self) -> u32;

    /// Curve position of a cell at `max_level`, given one cell index per axis.
    fn derived_value_for_cell(&self, cell: &[u64]) -> i64;

    fn dimensions(&self) -> usize {
        self.envelope().dimensions()
    }

    /// Cell index of `value` along `dim`. Values outside the envelope are
    /// clamped onto its border cells.
    fn normalize(&self, dim: usize, value: f64) -> u64 {
        let cells = 1u64 << self.max_level();
        let envelope = self.envelope();
        let (min, max) = (envelope.min(dim), envelope.max(dim));
        // NaN falls into the first cell
        if !(value > min) {
            return 0;
        }
        if value >= max {
            return cells - 1;
        }
        let index = ((value - min) / (max - min) * cells as f64) as u64;
        index.min(cells - 1)
    }

    /// Derived value of a point. Coordinates beyond the envelope are clamped.
    fn derived_value_for(&self, coordinates: &[f64]) -> i64 {
        let cell: Vec<u64> = coordinates
            .iter()
            .take(self.dimensions())
            .enumerate()
            .map(|(dim, &value)| self.normalize(dim, value))
            .collect();
        self.derived_value_for_cell(&cell)
    }

    /// Sorted, merged derived-value ranges that together cover every cell
    /// intersecting `search`. May include cells only partly inside it.
    fn tiles_intersecting_envelope(&self, search: &Envelope) -> Vec<LongRange> {
        let Some(search) = search.intersection(self.envelope()) else {
            return Vec::new();
        };
        let depth = self.search_depth(&search);
        let mut ranges = Vec::new();
        self.collect_tiles(&search, self.envelope().clone(), 0, depth, &mut ranges);
        merge_ranges(ranges)
    }

    /// Deepest level the decomposition descends to for a search of this size.
    fn search_depth(&self, search: &Envelope) -> u32 {
        let envelope = self.envelope();
        let ratio = (0..self.dimensions())
            .map(|d| envelope.width(d) / search.width(d).max(f64::MIN_POSITIVE))
            .fold(f64::INFINITY, f64::min);
        let base = if ratio.is_finite() {
            ratio.log2().floor().max(0.0) as u32
        } else {
            self.max_level()
        };
        (base + SEARCH_EXTRA_LEVELS).clamp(1, self.max_level())
    }

    fn collect_tiles(
        &self,
        search: &Envelope,
        cell: Envelope,
        depth: u32,
        max_depth: u32,
        ranges: &mut Vec<LongRange>,
    ) {
        if !search.intersects(&cell) {
            return;
        }
        if depth > 0 && (depth == max_depth || search.contains(&cell)) {
            let shift = self.dimensions() as u32 * (self.max_level() - depth);
            let prefix = self.derived_value_for(&cell.center()) >> shift;
            ranges.push(LongRange::new(prefix << shift, ((prefix + 1) << shift) - 1));
            return;
        }
        for child in 0..(1usize << self.dimensions()) {
            self.collect_tiles(search, cell.quadrant(child), depth + 1, max_depth, ranges);
        }
    }
}

/// Sort ranges and join the ones that touch or overlap.
fn merge_ranges(mut ranges: Vec<LongRange>) -> Vec<LongRange> {
    ranges.sort();
    let mut merged: Vec<LongRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.min <= last.max.saturating_add(1) => {
                last.max = last.max.max(range.max);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Envelopes and resolution used to build one curve per CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceFillingCurveSettings {
    /// Bits available for a derived value. Divided among the dimensions.
    pub max_bits: u32,
    envelopes: BTreeMap<CoordinateReferenceSystem, Envelope>,
}

impl Default for SpaceFillingCurveSettings {
    fn default() -> Self {
        let mut envelopes = BTreeMap::new();
        envelopes.insert(
            CoordinateReferenceSystem::Cartesian,
            Envelope::new_2d(-1_000_000.0, 1_000_000.0, -1_000_000.0, 1_000_000.0),
        );
        envelopes.insert(
            CoordinateReferenceSystem::Cartesian3D,
            Envelope::new_3d([-1_000_000.0; 3], [1_000_000.0; 3]),
        );
        envelopes.insert(
            CoordinateReferenceSystem::Wgs84,
            Envelope::new_2d(-180.0, 180.0, -90.0, 90.0),
        );
        envelopes.insert(
            CoordinateReferenceSystem::Wgs84_3D,
            Envelope::new_3d([-180.0, -90.0, -1_000_000.0], [180.0, 90.0, 1_000_000.0]),
        );
        SpaceFillingCurveSettings {
            max_bits: 60,
            envelopes,
        }
    }
}

impl SpaceFillingCurveSettings {
    /// Replace the envelope used for `crs`. The envelope must have one
    /// non-empty interval per CRS dimension.
    pub fn with_envelope(
        mut self,
        crs: CoordinateReferenceSystem,
        envelope: Envelope,
    ) -> Result<Self> {
        if envelope.dimensions() != crs.dimensions() {
            return Err(Error::InvalidArgument(format!(
                "{}-dimensional envelope for {} which has {} dimensions",
                envelope.dimensions(),
                crs.name(),
                crs.dimensions()
            )));
        }
        if (0..envelope.dimensions()).any(|d| !(envelope.width(d) > 0.0)) {
            return Err(Error::InvalidArgument(format!(
                "envelope for {} has an empty interval",
                crs.name()
            )));
        }
        self.envelopes.insert(crs, envelope);
        Ok(self)
    }

    pub fn envelope(&self, crs: CoordinateReferenceSystem) -> Envelope {
        match self.envelopes.get(&crs) {
            Some(envelope) => envelope.clone(),
            None => SpaceFillingCurveSettings::default().envelopes[&crs].clone(),
        }
    }

    pub fn curve(&self, crs: CoordinateReferenceSystem) -> Box<dyn SpaceFillingCurve> {
        let envelope = self.envelope(crs);
        let level = self.max_bits / crs.dimensions() as u32;
        match crs.dimensions() {
            2 => Box::new(HilbertCurve2D::new(
                envelope,
                level.min(HilbertCurve2D::MAX_LEVEL),
            )),
            _ => Box::new(HilbertCurve3D::new(
                envelope,
                level.min(HilbertCurve3D::MAX_LEVEL),
            )),
        }
    }

    pub fn derived_value_for(&self, crs: CoordinateReferenceSystem, coordinates: &[f64]) -> i64 {
        self.curve(crs).derived_value_for(coordinates)
    }
}

/// Bounding-box search over points of one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRangePredicate {
    pub crs: CoordinateReferenceSystem,
    pub envelope: Envelope,
}

impl GeometryRangePredicate {
    pub fn new(crs: CoordinateReferenceSystem, envelope: Envelope) -> Self {
        GeometryRangePredicate { crs, envelope }
    }

    /// Derived-value ranges to seek. Hits must still be checked against the
    /// box since border tiles stick out of it.
    pub fn ranges(&self, settings: &SpaceFillingCurveSettings) -> Vec<LongRange> {
        settings.curve(self.crs).tiles_intersecting_envelope(&self.envelope)
    }

    pub fn contains(&self, coordinates: &[f64]) -> bool {
        coordinates.iter().enumerate().all(|(d, &value)| {
            d >= self.envelope.dimensions()
                || (self.envelope.min(d) <= value && value <= self.envelope.max(d))
        })
    }
}
