//! The simplification pyramid: a replayable operation history over a planar
//! map, with sparse checkpoints for fast access to any level.

use std::collections::BTreeMap;

use crate::map::{Dart, EdgeIdx, FaceIdx, NodeIdx, PlanarMap};
use crate::Error;

/// The kind of a recorded primitive operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    /// [`PlanarMap::remove_isolated_node`]; the parameter is a node label.
    RemoveIsolatedNode,
    /// [`PlanarMap::merge_edges`].
    MergeEdges,
    /// [`PlanarMap::remove_bridge`].
    RemoveBridge,
    /// [`PlanarMap::merge_faces`].
    MergeFaces,
    /// [`PlanarMap::remove_edge`]; bridge-ness is re-decided at replay time.
    RemoveEdge,
    /// [`PlanarMap::remove_edge_with_ends`].
    RemoveEdgeWithEnds,
}

/// One entry of the pyramid history.
///
/// A primitive carries its serialized parameter: the signed edge label of the
/// dart, or the node label for [`OpKind::RemoveIsolatedNode`] (an isolated
/// node has no dart). This identification is only stable as long as labels
/// are not reused, which holds for a history that is replayed from a
/// checkpoint of the same pyramid.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    /// A single Euler operation.
    Primitive {
        /// Which operation to perform.
        kind: OpKind,
        /// Serialized dart (signed edge label) or node label.
        param: i32,
    },
    /// An owned list of operations executed atomically, counting as one
    /// level transition.
    Composite(Vec<Operation>),
}

/// What executing an operation produced.
enum Outcome {
    None,
    Edge(EdgeIdx),
    Face(FaceIdx),
}

/// A subdivision at a particular pyramid level.
///
/// Levels are detached copies: mutating the pyramid does not affect a level
/// already handed out, and a level's map carries no hooks.
#[derive(Clone, Debug)]
pub struct Level {
    index: usize,
    sub_index: usize,
    map: PlanarMap,
}

impl Level {
    /// The level index; level 0 is the initial subdivision.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The subdivision at this level.
    pub fn map(&self) -> &PlanarMap {
        &self.map
    }

    /// Consumes the level, returning its subdivision.
    pub fn into_map(self) -> PlanarMap {
        self.map
    }
}

/// A planar map together with the replayable history of the operations that
/// simplified it.
///
/// Every Euler operation issued through the pyramid is appended to the
/// history and executed on the top level. Checkpoints (full copies of the
/// subdivision) are stored every `max(total_cells / 4, 10)` primitives, so
/// [`Pyramid::get_level`] reaches any level by cloning the nearest earlier
/// checkpoint and replaying the operations in between.
#[derive(Debug)]
pub struct Pyramid {
    checkpoints: BTreeMap<usize, Level>,
    history: Vec<Operation>,
    top: Level,
    next_checkpoint_sub_index: usize,
    composing: u32,
}

impl Pyramid {
    /// Creates a pyramid over its level-0 subdivision.
    pub fn new(map: PlanarMap) -> Self {
        let mut pyramid = Self {
            checkpoints: BTreeMap::new(),
            history: Vec::new(),
            top: Level {
                index: 0,
                sub_index: 0,
                map,
            },
            next_checkpoint_sub_index: 0,
            composing: 0,
        };
        pyramid.store_checkpoint();
        pyramid
    }

    /// The number of levels, including level 0.
    pub fn level_count(&self) -> usize {
        self.history.len() + 1
    }

    /// The current top level.
    pub fn top_level(&self) -> &Level {
        &self.top
    }

    /// The subdivision at the top level.
    pub fn top_map(&self) -> &PlanarMap {
        &self.top.map
    }

    /// The hook collection of the top-level map.
    pub fn hooks_mut(&mut self) -> &mut crate::Hooks {
        self.top.map.hooks_mut()
    }

    /// The recorded operations, in order; entry `i` transforms level `i`
    /// into level `i + 1`.
    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    /// The level indices at which checkpoints are stored.
    pub fn checkpoint_levels(&self) -> impl Iterator<Item = usize> + '_ {
        self.checkpoints.keys().copied()
    }

    // --- recording ------------------------------------------------------

    /// Records and performs a node removal.
    pub fn remove_isolated_node(&mut self, node: NodeIdx) -> Result<(), Error> {
        self.record_and_perform(OpKind::RemoveIsolatedNode, node.label() as i32)?;
        Ok(())
    }

    /// Records and performs an edge merge, returning the surviving edge.
    pub fn merge_edges(&mut self, dart: Dart) -> Result<EdgeIdx, Error> {
        match self.record_and_perform(OpKind::MergeEdges, dart.label())? {
            Outcome::Edge(e) => Ok(e),
            _ => Err(Error::Corrupt),
        }
    }

    /// Records and performs a bridge removal, returning the surviving face.
    pub fn remove_bridge(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        match self.record_and_perform(OpKind::RemoveBridge, dart.label())? {
            Outcome::Face(f) => Ok(f),
            _ => Err(Error::Corrupt),
        }
    }

    /// Records and performs a face merge, returning the surviving face.
    pub fn merge_faces(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        match self.record_and_perform(OpKind::MergeFaces, dart.label())? {
            Outcome::Face(f) => Ok(f),
            _ => Err(Error::Corrupt),
        }
    }

    /// Records and performs an edge removal, returning the surviving face.
    pub fn remove_edge(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        match self.record_and_perform(OpKind::RemoveEdge, dart.label())? {
            Outcome::Face(f) => Ok(f),
            _ => Err(Error::Corrupt),
        }
    }

    /// Records and performs an edge-with-ends removal.
    pub fn remove_edge_with_ends(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        match self.record_and_perform(OpKind::RemoveEdgeWithEnds, dart.label())? {
            Outcome::Face(f) => Ok(f),
            _ => Err(Error::Corrupt),
        }
    }

    fn record_and_perform(&mut self, kind: OpKind, param: i32) -> Result<Outcome, Error> {
        let op = Operation::Primitive { kind, param };
        if self.composing == 0 {
            self.history.push(op.clone());
            match Self::perform(&mut self.top.map, &op, &mut self.top.sub_index) {
                Ok(outcome) => {
                    self.top.index += 1;
                    if self.top.sub_index >= self.next_checkpoint_sub_index {
                        self.store_checkpoint();
                    }
                    Ok(outcome)
                }
                Err(err) => {
                    // the failed operation left no trace; drop its record
                    self.history.pop();
                    Err(err)
                }
            }
        } else {
            let Some(Operation::Composite(list)) = self.history.last_mut() else {
                return Err(Error::Corrupt);
            };
            list.push(op.clone());
            match Self::perform(&mut self.top.map, &op, &mut self.top.sub_index) {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    if let Some(Operation::Composite(list)) = self.history.last_mut() {
                        list.pop();
                    }
                    Err(err)
                }
            }
        }
    }

    fn perform(
        map: &mut PlanarMap,
        op: &Operation,
        sub_index: &mut usize,
    ) -> Result<Outcome, Error> {
        match op {
            Operation::Composite(list) => {
                let mut outcome = Outcome::None;
                for child in list {
                    outcome = Self::perform(map, child, sub_index)?;
                }
                Ok(outcome)
            }
            Operation::Primitive { kind, param } => {
                let outcome = match kind {
                    OpKind::RemoveIsolatedNode => {
                        map.remove_isolated_node(NodeIdx::new(*param as u32))?;
                        Outcome::None
                    }
                    OpKind::MergeEdges => {
                        let dart = Dart::from_label(*param).ok_or(Error::InvalidDart)?;
                        Outcome::Edge(map.merge_edges(dart)?)
                    }
                    OpKind::RemoveBridge => {
                        let dart = Dart::from_label(*param).ok_or(Error::InvalidDart)?;
                        Outcome::Face(map.remove_bridge(dart)?)
                    }
                    OpKind::MergeFaces => {
                        let dart = Dart::from_label(*param).ok_or(Error::InvalidDart)?;
                        Outcome::Face(map.merge_faces(dart)?)
                    }
                    OpKind::RemoveEdge => {
                        let dart = Dart::from_label(*param).ok_or(Error::InvalidDart)?;
                        Outcome::Face(map.remove_edge(dart)?)
                    }
                    OpKind::RemoveEdgeWithEnds => {
                        let dart = Dart::from_label(*param).ok_or(Error::InvalidDart)?;
                        Outcome::Face(map.remove_edge_with_ends(dart)?)
                    }
                };
                *sub_index += 1;
                Ok(outcome)
            }
        }
    }

    // --- composites -----------------------------------------------------

    /// Opens a composite; until [`end_composite`](Self::end_composite),
    /// recorded operations are appended to it instead of the history root.
    /// Nested calls accumulate into the outermost composite.
    pub fn begin_composite(&mut self) {
        if self.composing == 0 {
            self.history.push(Operation::Composite(Vec::new()));
        }
        self.composing += 1;
    }

    /// Retroactively wraps the most recent operation into a composite and
    /// keeps it open for further operations.
    ///
    /// # Panics
    ///
    /// Panics if the history is empty.
    pub fn change_into_composite(&mut self) {
        if self.composing == 0 {
            let last = self.history.last_mut().expect("no operation to wrap");
            let wrapped = std::mem::replace(last, Operation::Composite(Vec::new()));
            if let Operation::Composite(list) = last {
                list.push(wrapped);
            }
            // the wrapped operation already advanced the top index; the
            // composite close below will account for the whole entry
            self.top.index -= 1;
        }
        self.composing += 1;
    }

    /// Closes a composite level. The outermost close advances the top level
    /// by one; a composite holding a single primitive collapses back into
    /// that primitive.
    ///
    /// # Panics
    ///
    /// Panics if no composite is open.
    pub fn end_composite(&mut self) {
        assert!(self.composing > 0, "end_composite() without begin_composite()");
        self.composing -= 1;
        if self.composing == 0 {
            // a composite of one primitive collapses back into the primitive
            let collapsed = match self.history.last_mut() {
                Some(Operation::Composite(list)) if list.len() == 1 => list.pop(),
                _ => None,
            };
            if let Some(only) = collapsed {
                *self.history.last_mut().expect("history non-empty") = only;
            }
            self.top.index += 1;
            if self.top.sub_index >= self.next_checkpoint_sub_index {
                self.store_checkpoint();
            }
        }
    }

    // --- checkpoints and level retrieval --------------------------------

    fn store_checkpoint(&mut self) {
        self.next_checkpoint_sub_index =
            self.top.sub_index + checkpoint_interval(&self.top.map);
        if !self.checkpoints.contains_key(&self.top.index) {
            tracing::debug!(
                level = self.top.index,
                sub_index = self.top.sub_index,
                "storing pyramid checkpoint"
            );
            self.checkpoints.insert(self.top.index, self.top.clone());
        }
    }

    /// Reconstructs the subdivision at `index` by cloning the nearest
    /// earlier checkpoint and replaying the history up to `index`.
    pub fn get_level(&self, index: usize) -> Result<Level, Error> {
        if index >= self.level_count() {
            return Err(Error::LevelOutOfRange);
        }
        let (_, checkpoint) = self
            .checkpoints
            .range(..=index)
            .next_back()
            .ok_or(Error::Corrupt)?;
        let mut level = checkpoint.clone();
        self.replay_to(&mut level, index)?;
        Ok(level)
    }

    /// Advances (or rewinds via a checkpoint) `level` until it is at
    /// `target`.
    pub fn goto_level(&self, level: &mut Level, target: usize) -> Result<(), Error> {
        if target >= self.level_count() {
            return Err(Error::LevelOutOfRange);
        }
        self.jump_to_checkpoint_before(level, target);
        self.replay_to(level, target)
    }

    /// Performs at most `max_steps` operations towards `target`, reporting
    /// whether the target was reached. Jumping back to a checkpoint counts
    /// as one step.
    pub fn approach_level(
        &self,
        level: &mut Level,
        target: usize,
        max_steps: usize,
    ) -> Result<bool, Error> {
        if target >= self.level_count() {
            return Err(Error::LevelOutOfRange);
        }
        let mut step = usize::from(self.jump_to_checkpoint_before(level, target));
        while level.index < target && step < max_steps {
            Self::perform(&mut level.map, &self.history[level.index], &mut level.sub_index)?;
            level.index += 1;
            step += 1;
        }
        Ok(level.index == target)
    }

    /// Jumps `level` back to the last checkpoint at or before `target`, if
    /// that is a better starting point than where the level already is.
    fn jump_to_checkpoint_before(&self, level: &mut Level, target: usize) -> bool {
        let Some((&cp_index, checkpoint)) = self.checkpoints.range(..=target).next_back() else {
            return false;
        };
        if level.index <= target && cp_index <= level.index {
            return false;
        }
        *level = checkpoint.clone();
        true
    }

    fn replay_to(&self, level: &mut Level, target: usize) -> Result<(), Error> {
        while level.index < target {
            Self::perform(&mut level.map, &self.history[level.index], &mut level.sub_index)?;
            level.index += 1;
        }
        Ok(())
    }

    /// Discards every level above `index`: truncates the history, drops
    /// later checkpoints, and makes `index` the top level again. Hooks
    /// registered on the top-level map are kept.
    pub fn cut_above(&mut self, index: usize) -> Result<(), Error> {
        if self.top.index != self.history.len() {
            return Err(Error::Corrupt);
        }
        if self.top.index <= index {
            return Ok(());
        }

        let hooks = std::mem::take(self.top.map.hooks_mut());
        let mut level = self.get_level(index)?;
        *level.map.hooks_mut() = hooks;
        self.top = level;

        self.history.truncate(index);
        let stale: Vec<usize> = self
            .checkpoints
            .range(index + 1..)
            .map(|(&k, _)| k)
            .collect();
        for key in stale {
            self.checkpoints.remove(&key);
        }

        // restore the checkpoint schedule from the last remaining checkpoint
        if let Some((_, checkpoint)) = self.checkpoints.iter().next_back() {
            self.next_checkpoint_sub_index =
                checkpoint.sub_index + checkpoint_interval(&checkpoint.map);
        }
        Ok(())
    }
}

/// How many primitives may pass before the next checkpoint.
fn checkpoint_interval(map: &PlanarMap) -> usize {
    let total_cells = map.node_count() + map.edge_count() + map.face_count();
    std::cmp::max(total_cells / 4, 10)
}
