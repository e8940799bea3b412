//! Turns one drag gesture into at most one [`MoveIntent`].
//!
//! The gesture is an explicit state machine:
//! `Idle -> Dragging -> (Over target)* -> Dropped | Cancelled`.

use crate::domain::{
    intent::MoveIntent,
    item::{ColumnId, ItemId},
    ordered_index::OrderedIndex,
};
use crate::drag::collision::{CollisionPolicy, DragFrame, DropZone};
use crate::drag::geometry::Point;
use crate::drag::target::DropTargetId;
use crate::error::{KanbanError, Result};
use tracing::{debug, warn};

/// Observable phase of the current gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    Dragging,
    Over,
}

#[derive(Debug, Clone)]
struct DragSession {
    item_id: ItemId,
    origin_column: ColumnId,
    baseline: DragFrame,
    over: Option<DropTargetId>,
}

impl DragSession {
    /// Frame of the card after the pointer moved to `pointer`
    ///
    /// The card keeps its offset from the pointer as captured at the start;
    /// a keyboard drag grabs the card by its center.
    fn frame_at(&self, pointer: Point) -> DragFrame {
        let origin = self
            .baseline
            .pointer
            .unwrap_or_else(|| self.baseline.active.center());
        DragFrame {
            pointer: Some(pointer),
            active: self
                .baseline
                .active
                .translated(pointer.x - origin.x, pointer.y - origin.y),
        }
    }
}

#[derive(Debug, Clone)]
enum GestureState {
    Idle,
    Dragging(DragSession),
}

#[derive(Debug, Clone)]
pub struct MoveResolver {
    policy: CollisionPolicy,
    state: GestureState,
}

impl Default for MoveResolver {
    fn default() -> Self {
        Self::new(CollisionPolicy::default())
    }
}

impl MoveResolver {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            state: GestureState::Idle,
        }
    }

    pub fn phase(&self) -> GesturePhase {
        match &self.state {
            GestureState::Idle => GesturePhase::Idle,
            GestureState::Dragging(session) if session.over.is_some() => GesturePhase::Over,
            GestureState::Dragging(_) => GesturePhase::Dragging,
        }
    }

    /// Item being dragged, if any
    pub fn active_item(&self) -> Option<&ItemId> {
        match &self.state {
            GestureState::Idle => None,
            GestureState::Dragging(session) => Some(&session.item_id),
        }
    }

    /// Target the gesture would currently drop on
    pub fn current_target(&self) -> Option<&DropTargetId> {
        match &self.state {
            GestureState::Idle => None,
            GestureState::Dragging(session) => session.over.as_ref(),
        }
    }

    /// Geometry captured when the drag started
    pub fn baseline(&self) -> Option<&DragFrame> {
        match &self.state {
            GestureState::Idle => None,
            GestureState::Dragging(session) => Some(&session.baseline),
        }
    }

    /// Starts a gesture. A gesture already in flight is abandoned.
    pub fn start(&mut self, item_id: ItemId, origin_column: ColumnId, baseline: DragFrame) {
        if let GestureState::Dragging(previous) = &self.state {
            warn!(item = %previous.item_id, "drag started while another was active, discarding it");
        }
        debug!(item = %item_id, column = %origin_column, "drag started");
        self.state = GestureState::Dragging(DragSession {
            item_id,
            origin_column,
            baseline,
            over: None,
        });
    }

    /// Runs collision detection for one pointer/keyboard update
    ///
    /// The best hit becomes the current target. When nothing is hit the
    /// previous target is kept.
    pub fn over(&mut self, frame: &DragFrame, zones: &[DropZone]) -> Option<&DropTargetId> {
        let GestureState::Dragging(session) = &mut self.state else {
            return None;
        };

        if let Some(best) = self.policy.detect(frame, zones).into_iter().next() {
            if session.over.as_ref() != Some(&best.id) {
                debug!(item = %session.item_id, target = %best.id, "drag over");
            }
            session.over = Some(best.id);
        }
        session.over.as_ref()
    }

    /// Like [`MoveResolver::over`] with the card's bounds derived from the
    /// pointer delta since the drag started
    pub fn pointer_moved(&mut self, pointer: Point, zones: &[DropZone]) -> Option<&DropTargetId> {
        let frame = match &self.state {
            GestureState::Idle => return None,
            GestureState::Dragging(session) => session.frame_at(pointer),
        };
        self.over(&frame, zones)
    }

    /// Finishes the gesture against the current board index
    ///
    /// Fails with [`KanbanError::InvalidDropTarget`] when no usable target was
    /// resolved; in that case nothing should be mutated.
    pub fn drop(&mut self, index: &OrderedIndex) -> Result<MoveIntent> {
        let state = std::mem::replace(&mut self.state, GestureState::Idle);
        let GestureState::Dragging(session) = state else {
            return Err(KanbanError::InvalidDropTarget(
                "no drag in progress".to_string(),
            ));
        };

        let Some(target) = session.over else {
            debug!(item = %session.item_id, "dropped outside any target");
            return Err(KanbanError::InvalidDropTarget(format!(
                "no drop target for {}",
                session.item_id
            )));
        };

        let Some(column) = index.column(target.column()) else {
            return Err(KanbanError::InvalidDropTarget(target.to_string()));
        };

        let target_index = target
            .sibling()
            .and_then(|sibling| column.iter().position(|id| id == sibling))
            .unwrap_or(column.len());

        let intent = MoveIntent::new(
            session.item_id,
            session.origin_column,
            target.column().clone(),
            target_index,
        );
        debug!(?intent, "drop resolved");
        Ok(intent)
    }

    /// Aborts the gesture (e.g. escape key); returns whether one was active
    pub fn cancel(&mut self) -> bool {
        match std::mem::replace(&mut self.state, GestureState::Idle) {
            GestureState::Idle => false,
            GestureState::Dragging(session) => {
                debug!(item = %session.item_id, "drag cancelled");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::BoardId;
    use crate::drag::geometry::{Point, Rect};
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn index() -> OrderedIndex {
        let mut columns = BTreeMap::new();
        columns.insert(
            ColumnId::new("todo"),
            vec![ItemId::new("a"), ItemId::new("b"), ItemId::new("c")],
        );
        columns.insert(ColumnId::new("done"), vec![ItemId::new("x")]);
        OrderedIndex::from_columns(BoardId::new("b1"), columns)
    }

    fn zones() -> Vec<DropZone> {
        let zone = |id: &str, rect| DropZone::new(DropTargetId::from_str(id).unwrap(), rect);
        vec![
            zone("todo", Rect::new(0.0, 0.0, 100.0, 400.0)),
            zone("todo:a", Rect::new(10.0, 10.0, 80.0, 40.0)),
            zone("todo:b", Rect::new(10.0, 60.0, 80.0, 40.0)),
            zone("todo:c", Rect::new(10.0, 110.0, 80.0, 40.0)),
            zone("done", Rect::new(120.0, 0.0, 100.0, 400.0)),
            zone("done:x", Rect::new(130.0, 10.0, 80.0, 40.0)),
        ]
    }

    fn frame_at(x: f64, y: f64) -> DragFrame {
        DragFrame {
            pointer: Some(Point::new(x, y)),
            active: Rect::new(x - 40.0, y - 20.0, 80.0, 40.0),
        }
    }

    fn start(resolver: &mut MoveResolver, item: &str) {
        resolver.start(ItemId::new(item), ColumnId::new("todo"), frame_at(50.0, 30.0));
    }

    #[test]
    fn test_phases() {
        let mut resolver = MoveResolver::default();
        assert_eq!(resolver.phase(), GesturePhase::Idle);

        start(&mut resolver, "a");
        assert_eq!(resolver.phase(), GesturePhase::Dragging);
        assert_eq!(resolver.active_item().map(|i| i.as_str()), Some("a"));

        resolver.over(&frame_at(170.0, 300.0), &zones());
        assert_eq!(resolver.phase(), GesturePhase::Over);

        resolver.drop(&index()).unwrap();
        assert_eq!(resolver.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_drop_on_sibling_takes_its_rank() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "c");
        resolver.over(&frame_at(170.0, 30.0), &zones());

        let intent = resolver.drop(&index()).unwrap();
        assert_eq!(intent.item_id.as_str(), "c");
        assert_eq!(intent.source_column.as_str(), "todo");
        assert_eq!(intent.target_column.as_str(), "done");
        assert_eq!(intent.target_index, 0);
    }

    #[test]
    fn test_drop_on_column_background_appends() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "a");
        let target = resolver.over(&frame_at(170.0, 300.0), &zones()).cloned();
        assert_eq!(target.map(|t| t.to_string()), Some("done".to_string()));

        let intent = resolver.drop(&index()).unwrap();
        assert_eq!(intent.target_index, 1);
    }

    #[test]
    fn test_reorder_within_column() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "a");
        resolver.over(&frame_at(50.0, 130.0), &zones());

        let intent = resolver.drop(&index()).unwrap();
        assert!(!intent.is_cross_column());
        assert_eq!(intent.target_index, 2);
    }

    #[test]
    fn test_last_resolved_target_is_kept() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "a");
        resolver.over(&frame_at(170.0, 30.0), &zones());
        resolver.over(&frame_at(170.0, 30.0), &[]);

        assert_eq!(
            resolver.current_target().map(|t| t.to_string()),
            Some("done:x".to_string())
        );
    }

    #[test]
    fn test_drop_without_target_is_cancelled() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "a");
        resolver.over(&frame_at(50.0, 30.0), &[]);

        let err = resolver.drop(&index()).unwrap_err();
        assert!(matches!(err, KanbanError::InvalidDropTarget(_)));
        assert!(err.is_benign());
        assert_eq!(resolver.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_drop_on_unknown_column_is_cancelled() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "a");
        let zone = DropZone::new(
            DropTargetId::from_str("archive").unwrap(),
            Rect::new(0.0, 0.0, 500.0, 500.0),
        );
        resolver.over(&frame_at(50.0, 30.0), &[zone]);

        assert!(matches!(
            resolver.drop(&index()),
            Err(KanbanError::InvalidDropTarget(_))
        ));
    }

    #[test]
    fn test_cancel_discards_gesture() {
        let mut resolver = MoveResolver::default();
        start(&mut resolver, "a");
        resolver.over(&frame_at(170.0, 30.0), &zones());

        assert!(resolver.cancel());
        assert_eq!(resolver.phase(), GesturePhase::Idle);
        assert!(resolver.current_target().is_none());
        assert!(!resolver.cancel());
        assert!(resolver.drop(&index()).is_err());
    }

    #[test]
    fn test_pointer_moved_carries_card_with_pointer() {
        let mut resolver = MoveResolver::default();
        // Grabbed 10px right of the card's left edge.
        resolver.start(
            ItemId::new("a"),
            ColumnId::new("todo"),
            DragFrame {
                pointer: Some(Point::new(20.0, 30.0)),
                active: Rect::new(10.0, 10.0, 80.0, 40.0),
            },
        );

        let target = resolver
            .pointer_moved(Point::new(150.0, 30.0), &zones())
            .cloned();
        assert_eq!(target.map(|t| t.to_string()), Some("done:x".to_string()));
        assert_eq!(resolver.drop(&index()).unwrap().target_index, 0);

        assert!(resolver.pointer_moved(Point::new(150.0, 30.0), &zones()).is_none());
    }

    #[test]
    fn test_keyboard_drag_moves_from_card_center() {
        let mut resolver = MoveResolver::default();
        resolver.start(
            ItemId::new("c"),
            ColumnId::new("todo"),
            DragFrame {
                pointer: None,
                active: Rect::new(10.0, 110.0, 80.0, 40.0),
            },
        );
        let session = match &resolver.state {
            GestureState::Dragging(session) => session.clone(),
            GestureState::Idle => panic!("drag should be active"),
        };

        let frame = session.frame_at(Point::new(170.0, 30.0));
        assert_eq!(frame.active, Rect::new(130.0, 10.0, 80.0, 40.0));
    }

    #[test]
    fn test_over_while_idle_is_ignored() {
        let mut resolver = MoveResolver::default();
        assert!(resolver.over(&frame_at(170.0, 30.0), &zones()).is_none());
        assert_eq!(resolver.phase(), GesturePhase::Idle);
    }
}
