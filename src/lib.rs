#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

#[macro_use]
mod cell_vec;

pub mod crack_edges;
mod euler;
mod geom;
mod label_image;
mod label_lut;
mod map;
mod position_index;
mod pyramid;

pub use euler::Hooks;
pub use geom::Polyline;
pub use kurbo::{Point, Rect, Vec2};
pub use label_image::{ImageSize, LabelImage, Pixel, Scanlines};
pub use label_lut::{LabelLut, MergedIter};
pub use map::{Dart, Edge, EdgeIdx, Face, FaceIdx, Node, NodeIdx, PhiOrbit, PlanarMap};
pub use position_index::PositionIndex;
pub use pyramid::{Level, OpKind, Operation, Pyramid};

/// The ways an operation on a planar map can fail.
///
/// All variants except [`Error::Corrupt`] are recoverable: the map is left
/// exactly as it was before the failing call. `Corrupt` is fatal; once it has
/// been reported from a mutating operation, the map refuses any further
/// mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The dart's edge has been uninitialized (or was never created).
    #[error("dart refers to an edge that is not initialized")]
    InvalidDart,
    /// A node label does not refer to an initialized node.
    #[error("label refers to a node that is not initialized")]
    InvalidNode,
    /// `remove_isolated_node` was called on a node that still has edges.
    #[error("node is not isolated")]
    NotIsolated,
    /// `merge_edges` needs its dart's start node to have degree exactly 2.
    #[error("start node of the dart does not have degree 2")]
    DegreeNotTwo,
    /// `merge_edges` would merge the two sides of one and the same edge.
    #[error("cannot merge an edge with itself")]
    SelfLoopMerge,
    /// `remove_bridge` was called on an edge with two distinct faces.
    #[error("edge is not a bridge")]
    NotABridge,
    /// `merge_faces` was called on a bridge.
    #[error("edge is a bridge")]
    IsBridge,
    /// A registered pre hook returned `false`; nothing was modified.
    #[error("operation cancelled by a pre hook")]
    HookCancelled,
    /// A pyramid level index beyond the recorded history was requested.
    #[error("level index is beyond the recorded history")]
    LevelOutOfRange,
    /// The infinite face has no bounding box.
    #[error("the infinite face has no bounding box")]
    InfiniteFaceNoBox,
    /// An internal inconsistency was detected; the map must not be mutated
    /// any further.
    #[error("map is corrupt")]
    Corrupt,
}
