//! Instrument geometry: detector positions, shapes and scattering angles.
//!
//! The rebinning code only needs a handful of geometry queries, expressed by
//! the [`GeometryService`] trait. [`Instrument`] is a plain in-memory
//! implementation suitable for tests and for instruments described in JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, Mul, Sub};

use crate::histogram::DetectorId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cartesian 3-vector (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct V3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl V3 {
    /// Creates a vector.
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    #[inline]
    pub fn dot(&self, other: &V3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product.
    #[inline]
    pub fn cross(&self, other: &V3) -> V3 {
        V3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Euclidean length.
    #[inline]
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &V3) -> f64 {
        (*self - *other).norm()
    }

    /// Angle to another vector in radians, in `[0, π]`.
    pub fn angle(&self, other: &V3) -> f64 {
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return 0.0;
        }
        (self.dot(other) / denom).clamp(-1.0, 1.0).acos()
    }

    /// Component along an axis.
    #[inline]
    pub fn component(&self, axis: PointingAlong) -> f64 {
        match axis {
            PointingAlong::X => self.x,
            PointingAlong::Y => self.y,
            PointingAlong::Z => self.z,
        }
    }
}

impl Add for V3 {
    type Output = V3;
    fn add(self, rhs: V3) -> V3 {
        V3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for V3 {
    type Output = V3;
    fn sub(self, rhs: V3) -> V3 {
        V3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for V3 {
    type Output = V3;
    fn mul(self, rhs: f64) -> V3 {
        V3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Unit quaternion describing a component rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quat {
    /// No rotation.
    pub const fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Rotation of `degrees` about `axis`.
    pub fn from_axis_angle(axis: V3, degrees: f64) -> Self {
        let norm = axis.norm();
        if norm == 0.0 {
            return Self::identity();
        }
        let half = 0.5 * degrees.to_radians();
        let s = half.sin() / norm;
        Self {
            w: half.cos(),
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
        }
    }

    /// Rotates `v` by this quaternion.
    pub fn rotate(&self, v: V3) -> V3 {
        let q = V3::new(self.x, self.y, self.z);
        let t = q.cross(&v) * 2.0;
        v + t * self.w + q.cross(&t)
    }
}

/// Axis-aligned bounding box of a component shape, in its local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub min: V3,
    pub max: V3,
}

impl BoundingBox {
    /// Box spanning `min..max`.
    pub fn new(min: V3, max: V3) -> Self {
        Self { min, max }
    }

    /// Box centred on the origin with the given full widths.
    pub fn centred(width: f64, height: f64, depth: f64) -> Self {
        let half = V3::new(0.5 * width, 0.5 * height, 0.5 * depth);
        Self {
            min: half * -1.0,
            max: half,
        }
    }

    /// `max - min`.
    pub fn span(&self) -> V3 {
        self.max - self.min
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::centred(0.01, 0.01, 0.01)
    }
}

/// Cartesian axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PointingAlong {
    X,
    #[default]
    Y,
    Z,
}

impl PointingAlong {
    /// Unit vector along the axis.
    pub fn unit(self) -> V3 {
        match self {
            PointingAlong::X => V3::new(1.0, 0.0, 0.0),
            PointingAlong::Y => V3::new(0.0, 1.0, 0.0),
            PointingAlong::Z => V3::new(0.0, 0.0, 1.0),
        }
    }
}

/// Orientation conventions of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferenceFrame {
    /// Axis pointing up.
    pub up: PointingAlong,
    /// Nominal beam axis.
    pub along_beam: PointingAlong,
}

impl Default for ReferenceFrame {
    fn default() -> Self {
        Self {
            up: PointingAlong::Y,
            along_beam: PointingAlong::Z,
        }
    }
}

/// A single detector pixel or monitor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Detector {
    /// Detector id.
    pub id: DetectorId,
    /// Absolute position.
    pub position: V3,
    /// Rotation applied to the shape.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rotation: Quat,
    /// Bounding box of the shape in its local frame.
    #[cfg_attr(feature = "serde", serde(default))]
    pub shape: BoundingBox,
    /// Beam monitor flag.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_monitor: bool,
    /// Masked flag.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_masked: bool,
    /// Per-detector fixed energy (meV) for indirect geometry.
    #[cfg_attr(feature = "serde", serde(default))]
    pub efixed: Option<f64>,
}

impl Detector {
    /// Creates an unrotated detector with the default shape.
    pub fn new(id: DetectorId, position: V3) -> Self {
        Self {
            id,
            position,
            rotation: Quat::identity(),
            shape: BoundingBox::default(),
            is_monitor: false,
            is_masked: false,
            efixed: None,
        }
    }

    /// Sets the shape bounding box.
    #[must_use]
    pub fn with_shape(mut self, shape: BoundingBox) -> Self {
        self.shape = shape;
        self
    }

    /// Sets the rotation.
    #[must_use]
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Flags the detector as a monitor.
    #[must_use]
    pub fn monitor(mut self) -> Self {
        self.is_monitor = true;
        self
    }

    /// Flags the detector as masked.
    #[must_use]
    pub fn masked(mut self) -> Self {
        self.is_masked = true;
        self
    }

    /// Sets a per-detector fixed energy.
    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.efixed = Some(efixed);
        self
    }

    /// Physical extent of the rotated shape along `axis`.
    pub fn extent_along(&self, axis: PointingAlong) -> f64 {
        self.rotation.rotate(self.shape.span()).component(axis).abs()
    }
}

/// Geometry queries needed by the rebinning algorithms.
pub trait GeometryService: Send + Sync {
    /// Looks up a detector; `None` when the id is unknown.
    fn detector(&self, id: DetectorId) -> Option<&Detector>;

    /// Sample position.
    fn sample_position(&self) -> V3;

    /// Source (moderator) position.
    fn source_position(&self) -> V3;

    /// Orientation conventions.
    fn reference_frame(&self) -> ReferenceFrame;

    /// Axis pointing up.
    fn pointing_up(&self) -> PointingAlong {
        self.reference_frame().up
    }

    /// Beam direction, from source to sample.
    fn beam_direction(&self) -> V3 {
        self.sample_position() - self.source_position()
    }

    /// Scattering angle (radians) of a point relative to the beam.
    fn two_theta(&self, position: V3) -> f64 {
        (position - self.sample_position()).angle(&self.beam_direction())
    }

    /// Scattering angle (radians), negative for points on the far side of the
    /// plane spanned by the beam and the up axis.
    fn signed_two_theta(&self, position: V3) -> f64 {
        let beam = self.beam_direction();
        let sample_to_det = position - self.sample_position();
        let angle = sample_to_det.angle(&beam);
        let cross = beam.cross(&sample_to_det);
        let normal = beam.cross(&self.pointing_up().unit());
        if normal.dot(&cross) < 0.0 {
            -angle
        } else {
            angle
        }
    }

    /// Sample-to-detector distance.
    fn l2(&self, detector: &Detector) -> f64 {
        detector.position.distance(&self.sample_position())
    }

    /// Resolves every known detector of a spectrum, in id order.
    fn resolve<'a>(&'a self, ids: &BTreeSet<DetectorId>) -> Vec<&'a Detector> {
        ids.iter().filter_map(|&id| self.detector(id)).collect()
    }
}

/// Mean position of a detector group.
#[allow(clippy::cast_precision_loss)]
pub fn group_position(detectors: &[&Detector]) -> Option<V3> {
    if detectors.is_empty() {
        return None;
    }
    let sum = detectors
        .iter()
        .fold(V3::default(), |acc, det| acc + det.position);
    Some(sum * (1.0 / detectors.len() as f64))
}

/// In-memory instrument description.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instrument {
    /// Instrument name.
    pub name: String,
    /// Source position.
    pub source: V3,
    /// Sample position.
    pub sample: V3,
    /// Orientation conventions.
    #[cfg_attr(feature = "serde", serde(default))]
    pub frame: ReferenceFrame,
    detectors: BTreeMap<DetectorId, Detector>,
}

impl Instrument {
    /// Creates an instrument with no detectors.
    pub fn new(name: impl Into<String>, source: V3, sample: V3) -> Self {
        Self {
            name: name.into(),
            source,
            sample,
            frame: ReferenceFrame::default(),
            detectors: BTreeMap::new(),
        }
    }

    /// Sets the reference frame.
    #[must_use]
    pub fn with_frame(mut self, frame: ReferenceFrame) -> Self {
        self.frame = frame;
        self
    }

    /// Adds a detector (builder form).
    #[must_use]
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.add_detector(detector);
        self
    }

    /// Adds or replaces a detector.
    pub fn add_detector(&mut self, detector: Detector) {
        self.detectors.insert(detector.id, detector);
    }

    /// Number of detectors (including monitors).
    pub fn num_detectors(&self) -> usize {
        self.detectors.len()
    }

    /// Iterates detectors in id order.
    pub fn detectors(&self) -> impl Iterator<Item = &Detector> {
        self.detectors.values()
    }
}

impl GeometryService for Instrument {
    fn detector(&self, id: DetectorId) -> Option<&Detector> {
        self.detectors.get(&id)
    }

    fn sample_position(&self) -> V3 {
        self.sample
    }

    fn source_position(&self) -> V3 {
        self.source
    }

    fn reference_frame(&self) -> ReferenceFrame {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn instrument() -> Instrument {
        Instrument::new("TEST", V3::new(0.0, 0.0, -10.0), V3::default())
            .with_detector(Detector::new(1, V3::new(0.0, 1.0, 1.0)))
            .with_detector(Detector::new(2, V3::new(0.0, -1.0, 1.0)))
            .with_detector(Detector::new(3, V3::new(0.0, 0.0, 5.0)).monitor())
    }

    #[test]
    fn test_two_theta() {
        let inst = instrument();
        let det = inst.detector(1).unwrap();
        assert_relative_eq!(inst.two_theta(det.position), 45.0_f64.to_radians());
        assert_relative_eq!(inst.two_theta(inst.detector(3).unwrap().position), 0.0);
    }

    #[test]
    fn test_signed_two_theta_flips_below_beam() {
        let inst = instrument();
        let up = inst.signed_two_theta(inst.detector(1).unwrap().position);
        let down = inst.signed_two_theta(inst.detector(2).unwrap().position);
        assert_relative_eq!(up.abs(), down.abs());
        assert!(up * down < 0.0);
    }

    #[test]
    fn test_quaternion_rotation() {
        let q = Quat::from_axis_angle(V3::new(0.0, 0.0, 1.0), 90.0);
        let v = q.rotate(V3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(v.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_extent_along_rotated_shape() {
        let det = Detector::new(7, V3::new(0.0, 0.0, 2.0))
            .with_shape(BoundingBox::centred(0.1, 0.02, 0.01))
            .with_rotation(Quat::from_axis_angle(V3::new(0.0, 0.0, 1.0), 90.0));
        // Width along x becomes height along y.
        assert_relative_eq!(det.extent_along(PointingAlong::Y), 0.1, epsilon = 1e-12);
        assert_relative_eq!(det.extent_along(PointingAlong::X), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_resolve_skips_unknown_ids() {
        let inst = instrument();
        let ids: BTreeSet<DetectorId> = [1, 2, 99].into_iter().collect();
        let found = inst.resolve(&ids);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, 1);
    }

    #[test]
    fn test_group_position() {
        let inst = instrument();
        let dets = inst.resolve(&[1, 2].into_iter().collect());
        let pos = group_position(&dets).unwrap();
        assert_relative_eq!(pos.y, 0.0);
        assert_relative_eq!(pos.z, 1.0);
        assert!(group_position(&[]).is_none());
    }
}
