//! Collision detection between the dragged card and the drop targets.

use crate::drag::geometry::{Point, Rect};
use crate::drag::target::DropTargetId;
use std::cmp::Ordering;

/// A drop target as currently laid out on screen
#[derive(Debug, Clone, PartialEq)]
pub struct DropZone {
    pub id: DropTargetId,
    pub rect: Rect,
}

impl DropZone {
    pub fn new(id: DropTargetId, rect: Rect) -> Self {
        Self { id, rect }
    }
}

/// Geometry of the gesture at one `Over` event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragFrame {
    /// Absent for keyboard-driven drags
    pub pointer: Option<Point>,
    /// Current bounds of the dragged card
    pub active: Rect,
}

/// A candidate target with the score that ranked it (lower is better)
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub id: DropTargetId,
    pub score: f64,
}

/// Which detection strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    PointerWithin,
    RectIntersection,
    ClosestCorners,
    /// Pointer-within, then rect-intersection, then closest-corners;
    /// the first non-empty result wins
    #[default]
    Cascade,
}

impl CollisionPolicy {
    /// Returns matching targets, best first
    pub fn detect(&self, frame: &DragFrame, zones: &[DropZone]) -> Vec<Collision> {
        match self {
            Self::PointerWithin => pointer_within(frame, zones),
            Self::RectIntersection => rect_intersection(frame, zones),
            Self::ClosestCorners => closest_corners(frame, zones),
            Self::Cascade => [Self::PointerWithin, Self::RectIntersection, Self::ClosestCorners]
                .iter()
                .map(|policy| policy.detect(frame, zones))
                .find(|hits| !hits.is_empty())
                .unwrap_or_default(),
        }
    }
}

/// Zones containing the pointer; the smallest zone ranks first so a card
/// beats the column it sits in
fn pointer_within(frame: &DragFrame, zones: &[DropZone]) -> Vec<Collision> {
    let Some(pointer) = frame.pointer else {
        return Vec::new();
    };

    ranked(
        zones
            .iter()
            .filter(|zone| zone.rect.contains(&pointer))
            .map(|zone| Collision {
                id: zone.id.clone(),
                score: zone.rect.area(),
            }),
    )
}

fn rect_intersection(frame: &DragFrame, zones: &[DropZone]) -> Vec<Collision> {
    ranked(zones.iter().filter_map(|zone| {
        let ratio = frame.active.overlap_ratio(&zone.rect);
        (ratio > 0.0).then(|| Collision {
            id: zone.id.clone(),
            score: 1.0 - ratio,
        })
    }))
}

fn closest_corners(frame: &DragFrame, zones: &[DropZone]) -> Vec<Collision> {
    let active = frame.active.corners();
    ranked(zones.iter().map(|zone| {
        let distance: f64 = zone
            .rect
            .corners()
            .iter()
            .zip(active.iter())
            .map(|(a, b)| a.distance_to(b))
            .sum();
        Collision {
            id: zone.id.clone(),
            score: distance,
        }
    }))
}

fn ranked(hits: impl Iterator<Item = Collision>) -> Vec<Collision> {
    let mut hits: Vec<Collision> = hits.collect();
    hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn zone(id: &str, rect: Rect) -> DropZone {
        DropZone::new(DropTargetId::from_str(id).unwrap(), rect)
    }

    // Two columns side by side, one card in the first.
    fn layout() -> Vec<DropZone> {
        vec![
            zone("todo", Rect::new(0.0, 0.0, 100.0, 400.0)),
            zone("todo:a", Rect::new(10.0, 10.0, 80.0, 40.0)),
            zone("done", Rect::new(120.0, 0.0, 100.0, 400.0)),
        ]
    }

    #[test]
    fn test_pointer_within_prefers_card_over_column() {
        let frame = DragFrame {
            pointer: Some(Point::new(20.0, 20.0)),
            active: Rect::new(0.0, 0.0, 80.0, 40.0),
        };
        let hits = CollisionPolicy::PointerWithin.detect(&frame, &layout());

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.to_string(), "todo:a");
        assert_eq!(hits[1].id.to_string(), "todo");
    }

    #[test]
    fn test_cascade_falls_back_to_rect_intersection() {
        // Pointer sits in the gutter, card overlaps "done".
        let frame = DragFrame {
            pointer: Some(Point::new(110.0, 500.0)),
            active: Rect::new(105.0, 100.0, 80.0, 40.0),
        };
        let hits = CollisionPolicy::Cascade.detect(&frame, &layout());

        assert_eq!(hits[0].id.to_string(), "done");
    }

    #[test]
    fn test_cascade_falls_back_to_closest_corners() {
        let frame = DragFrame {
            pointer: None,
            active: Rect::new(300.0, 0.0, 80.0, 40.0),
        };
        assert!(CollisionPolicy::RectIntersection.detect(&frame, &layout()).is_empty());

        let hits = CollisionPolicy::Cascade.detect(&frame, &layout());
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id.to_string(), "done");
    }

    #[test]
    fn test_keyboard_drag_skips_pointer_detection() {
        let frame = DragFrame {
            pointer: None,
            active: Rect::new(10.0, 10.0, 80.0, 40.0),
        };
        assert!(CollisionPolicy::PointerWithin.detect(&frame, &layout()).is_empty());

        let hits = CollisionPolicy::Cascade.detect(&frame, &layout());
        assert_eq!(hits[0].id.to_string(), "todo:a");
    }

    #[test]
    fn test_no_zones_yields_nothing() {
        let frame = DragFrame {
            pointer: Some(Point::new(0.0, 0.0)),
            active: Rect::new(0.0, 0.0, 10.0, 10.0),
        };
        assert!(CollisionPolicy::Cascade.detect(&frame, &[]).is_empty());
    }
}
