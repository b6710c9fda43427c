//! Sparse two-dimensional event workspaces.
//!
//! Events live in a tree of boxes. A leaf box holding more than
//! `split_threshold` events is split into `split_into × split_into`
//! children, down to `max_depth`.

use crate::error::{Error, Result};
use crate::rebin::AxisBinning;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A weighted point event.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MdEvent {
    /// Event weight.
    pub signal: f64,
    /// Squared error of the weight.
    pub error_sq: f64,
    /// Coordinates (dimension 0, dimension 1).
    pub center: [f64; 2],
}

impl MdEvent {
    /// Creates an event.
    pub fn new(signal: f64, error_sq: f64, center: [f64; 2]) -> Self {
        Self {
            signal,
            error_sq,
            center,
        }
    }
}

/// Box-splitting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxController {
    /// Children per dimension when a box splits.
    pub split_into: usize,
    /// Events a leaf may hold before it splits.
    pub split_threshold: usize,
    /// Maximum tree depth (the root is depth 0).
    pub max_depth: usize,
}

impl Default for BoxController {
    fn default() -> Self {
        Self {
            split_into: 2,
            split_threshold: 1000,
            max_depth: 20,
        }
    }
}

impl BoxController {
    /// Sets the number of children per dimension.
    #[must_use]
    pub fn with_split_into(mut self, split_into: usize) -> Self {
        self.split_into = split_into;
        self
    }

    /// Sets the split threshold.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Sets the maximum depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Checks that splitting makes progress.
    pub fn validate(&self) -> Result<()> {
        if self.split_into < 2 {
            return Err(Error::ConfigError(format!(
                "split_into must be at least 2, found {}",
                self.split_into
            )));
        }
        if self.split_threshold == 0 {
            return Err(Error::ConfigError(
                "split_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct MdBox {
    extents: [(f64, f64); 2],
    depth: usize,
    events: Vec<MdEvent>,
    children: Vec<MdBox>,
}

impl MdBox {
    fn new(extents: [(f64, f64); 2], depth: usize) -> Self {
        Self {
            extents,
            depth,
            events: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn child_index(&self, center: [f64; 2], split_into: usize) -> usize {
        let mut index = 0;
        let mut stride = 1;
        for (dim, &(min, max)) in self.extents.iter().enumerate() {
            let width = (max - min) / split_into as f64;
            let slot = (((center[dim] - min) / width).floor().max(0.0) as usize).min(split_into - 1);
            index += slot * stride;
            stride *= split_into;
        }
        index
    }

    fn add(&mut self, event: MdEvent, controller: &BoxController) {
        if self.is_leaf() {
            self.events.push(event);
        } else {
            let index = self.child_index(event.center, controller.split_into);
            self.children[index].add(event, controller);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn split_if_needed(&mut self, controller: &BoxController) {
        if self.is_leaf() {
            if self.events.len() <= controller.split_threshold || self.depth >= controller.max_depth
            {
                return;
            }
            let n = controller.split_into;
            let [(x0, x1), (y0, y1)] = self.extents;
            let (dx, dy) = ((x1 - x0) / n as f64, (y1 - y0) / n as f64);
            self.children = (0..n * n)
                .map(|k| {
                    let (i, j) = (k % n, k / n);
                    MdBox::new(
                        [
                            (x0 + i as f64 * dx, x0 + (i + 1) as f64 * dx),
                            (y0 + j as f64 * dy, y0 + (j + 1) as f64 * dy),
                        ],
                        self.depth + 1,
                    )
                })
                .collect();
            for event in std::mem::take(&mut self.events) {
                let index = self.child_index(event.center, n);
                self.children[index].events.push(event);
            }
        }
        for child in &mut self.children {
            child.split_if_needed(controller);
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a MdBox)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

/// Sparse event representation of a 2D transform result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MdEventWorkspace {
    dimension_names: [String; 2],
    root: MdBox,
    controller: BoxController,
}

impl MdEventWorkspace {
    /// Creates an empty workspace spanning the two binnings.
    pub fn new(
        dimension_names: [String; 2],
        dim0: &AxisBinning,
        dim1: &AxisBinning,
        controller: BoxController,
    ) -> Result<Self> {
        dim0.validate()?;
        dim1.validate()?;
        controller.validate()?;
        Ok(Self {
            dimension_names,
            root: MdBox::new([(dim0.min, dim0.max), (dim1.min, dim1.max)], 0),
            controller,
        })
    }

    /// Dimension names.
    pub fn dimension_names(&self) -> &[String; 2] {
        &self.dimension_names
    }

    /// Extents `(min, max)` of each dimension.
    pub fn extents(&self) -> [(f64, f64); 2] {
        self.root.extents
    }

    /// The box controller.
    pub fn box_controller(&self) -> &BoxController {
        &self.controller
    }

    /// True when `center` lies inside the half-open extents.
    pub fn contains(&self, center: [f64; 2]) -> bool {
        self.root
            .extents
            .iter()
            .zip(center)
            .all(|(&(min, max), c)| c >= min && c < max)
    }

    /// Adds an event; returns false (and drops it) when outside the extents.
    pub fn add_event(&mut self, event: MdEvent) -> bool {
        if !self.contains(event.center) {
            return false;
        }
        self.root.add(event, &self.controller);
        true
    }

    /// Splits every over-full leaf.
    pub fn split_all_if_needed(&mut self) {
        let controller = self.controller;
        self.root.split_if_needed(&controller);
    }

    /// Number of events.
    pub fn num_events(&self) -> usize {
        let mut count = 0;
        self.root.visit(&mut |b| count += b.events.len());
        count
    }

    /// Number of boxes, including the root and intermediate boxes.
    pub fn num_boxes(&self) -> usize {
        let mut count = 0;
        self.root.visit(&mut |_| count += 1);
        count
    }

    /// Deepest level in the box tree.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        self.root.visit(&mut |b| depth = depth.max(b.depth));
        depth
    }

    /// Sum of event weights.
    pub fn total_signal(&self) -> f64 {
        self.events().iter().map(|e| e.signal).sum()
    }

    /// Sum of squared event errors.
    pub fn total_error_sq(&self) -> f64 {
        self.events().iter().map(|e| e.error_sq).sum()
    }

    /// All events, in box order.
    pub fn events(&self) -> Vec<&MdEvent> {
        let mut events = Vec::new();
        self.root.visit(&mut |b| events.extend(b.events.iter()));
        events
    }

    /// Events with centres inside `[min, max)` on both dimensions.
    pub fn events_in(&self, region: [(f64, f64); 2]) -> Vec<&MdEvent> {
        let mut events = Vec::new();
        self.root.visit(&mut |b| {
            let overlaps = b
                .extents
                .iter()
                .zip(region)
                .all(|(&(lo, hi), (rlo, rhi))| lo < rhi && rlo < hi);
            if overlaps {
                events.extend(b.events.iter().filter(|e| {
                    e.center
                        .iter()
                        .zip(region)
                        .all(|(&c, (rlo, rhi))| c >= rlo && c < rhi)
                }));
            }
        });
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn workspace(controller: BoxController) -> MdEventWorkspace {
        MdEventWorkspace::new(
            ["Qx".to_string(), "Qz".to_string()],
            &AxisBinning::new(0.0, 1.0, 10),
            &AxisBinning::new(0.0, 1.0, 10),
            controller,
        )
        .unwrap()
    }

    #[test]
    fn test_add_event_drops_outside_extents() {
        let mut ws = workspace(BoxController::default());
        assert!(ws.add_event(MdEvent::new(1.0, 1.0, [0.5, 0.5])));
        assert!(!ws.add_event(MdEvent::new(1.0, 1.0, [1.5, 0.5])));
        assert!(!ws.add_event(MdEvent::new(1.0, 1.0, [0.5, 1.0])));
        assert!(!ws.add_event(MdEvent::new(1.0, 1.0, [f64::NAN, 0.5])));
        assert_eq!(ws.num_events(), 1);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_split_preserves_events() {
        let controller = BoxController::default()
            .with_split_threshold(4)
            .with_max_depth(3);
        let mut ws = workspace(controller);
        for i in 0..50 {
            let t = f64::from(i) / 50.0;
            ws.add_event(MdEvent::new(2.0, 0.5, [t, 1.0 - t - 1e-6]));
        }
        ws.split_all_if_needed();
        assert_eq!(ws.num_events(), 50);
        assert!(ws.num_boxes() > 1);
        assert!(ws.depth() <= 3);
        assert_abs_diff_eq!(ws.total_signal(), 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ws.total_error_sq(), 25.0, epsilon = 1e-12);

        // Events added after splitting go to the leaves.
        assert!(ws.add_event(MdEvent::new(1.0, 0.0, [0.9, 0.9])));
        assert_eq!(ws.num_events(), 51);
    }

    #[test]
    fn test_events_in_region() {
        let mut ws = workspace(BoxController::default().with_split_threshold(1));
        ws.add_event(MdEvent::new(1.0, 1.0, [0.1, 0.1]));
        ws.add_event(MdEvent::new(1.0, 1.0, [0.6, 0.6]));
        ws.add_event(MdEvent::new(1.0, 1.0, [0.7, 0.2]));
        ws.split_all_if_needed();
        assert_eq!(ws.events_in([(0.5, 1.0), (0.0, 1.0)]).len(), 2);
        assert_eq!(ws.events_in([(0.0, 0.5), (0.0, 0.5)]).len(), 1);
    }

    #[test]
    fn test_controller_validation() {
        assert!(BoxController::default().with_split_into(1).validate().is_err());
        assert!(BoxController::default().with_split_threshold(0).validate().is_err());
        BoxController::default().validate().unwrap();
    }
}
