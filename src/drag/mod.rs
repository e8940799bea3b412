pub mod collision;
pub mod geometry;
pub mod resolver;
pub mod target;

pub use collision::{Collision, CollisionPolicy, DragFrame, DropZone};
pub use geometry::{Point, Rect};
pub use resolver::{GesturePhase, MoveResolver};
pub use target::DropTargetId;
