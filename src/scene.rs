// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `Scene`: the node arena, output registry, and debug-damage configuration
//! that ties the node model, damage engine, output membership, and commit
//! pipeline together.

use std::rc::Rc;

use log::warn;

use crate::damage::DamageRing;
use crate::error::SceneError;
use crate::node::{
    BufferData, BufferId, Node, NodeHeader, NodeId, NodeKind, PointAcceptsInput, RectData,
    RectId, TreeData, TreeId,
};
use crate::output::{next_free_index, Output, OutputEvent, SceneOutput, SceneOutputId};
use crate::render::PlatformBuffer;

/// Which regions get rendered on top of the ordinary composited frame, for
/// visualizing the damage engine itself.
///
/// Controlled by the `WLR_SCENE_DEBUG_DAMAGE` environment variable, read
/// once in [`Scene::new`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DebugDamageMode {
    /// Normal operation: only damaged regions are repainted.
    #[default]
    None,
    /// Every output repaints its entire viewport every frame.
    Rerender,
    /// Normal damage-bounded repaint, with a fading red overlay marking
    /// where damage was over roughly the last quarter second.
    Highlight,
}

impl DebugDamageMode {
    fn from_env() -> Self {
        match std::env::var("WLR_SCENE_DEBUG_DAMAGE") {
            Ok(v) if v == "rerender" => Self::Rerender,
            Ok(v) if v == "highlight" => Self::Highlight,
            Ok(v) if v == "none" => Self::None,
            Ok(v) if v.is_empty() => Self::None,
            Ok(other) => {
                warn!("unrecognized WLR_SCENE_DEBUG_DAMAGE value {other:?}, ignoring");
                Self::None
            }
            Err(_) => Self::None,
        }
    }
}

/// A retained-mode scene graph: a tree of nodes, the set of outputs it is
/// presented on, and the damage/membership bookkeeping needed to drive a
/// per-output commit pipeline.
pub struct Scene {
    pub(crate) nodes: std::vec::Vec<Option<Node>>,
    pub(crate) generations: std::vec::Vec<u32>,
    free_list: std::vec::Vec<u32>,
    root: NodeId,
    pub(crate) outputs: std::vec::Vec<SceneOutput>,
    next_output_generation: u32,
    pub(crate) debug_damage: DebugDamageMode,
    pub(crate) presentation: Option<Rc<dyn crate::render::PresentationFeedback>>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("node_count", &self.nodes.iter().filter(|n| n.is_some()).count())
            .field("output_count", &self.outputs.len())
            .field("debug_damage", &self.debug_damage)
            .finish_non_exhaustive()
    }
}

impl Scene {
    /// Construct an empty scene with just a root tree node.
    ///
    /// Reads `WLR_SCENE_DEBUG_DAMAGE` once; see [`DebugDamageMode`].
    pub fn new() -> Self {
        Self::with_debug_damage_mode(DebugDamageMode::from_env())
    }

    /// Construct an empty scene with an explicit debug-damage mode,
    /// bypassing the environment variable (useful for tests).
    pub fn with_debug_damage_mode(debug_damage: DebugDamageMode) -> Self {
        let mut scene = Self {
            nodes: std::vec::Vec::new(),
            generations: std::vec::Vec::new(),
            free_list: std::vec::Vec::new(),
            root: NodeId::new(0, 0),
            outputs: std::vec::Vec::new(),
            next_output_generation: 0,
            debug_damage,
            presentation: None,
        };
        let root = scene.alloc_node(None, NodeKind::Tree(TreeData::default()));
        scene.root = root;
        scene
    }

    /// The scene's root tree node. Every other node is its descendant.
    pub fn root(&self) -> TreeId {
        TreeId(self.root)
    }

    // --- arena plumbing -----------------------------------------------

    fn alloc_node(&mut self, parent: Option<TreeId>, kind: NodeKind) -> NodeId {
        let header = NodeHeader::new(parent);
        let node = Node { header, kind };
        if let Some(slot) = self.free_list.pop() {
            let generation = self.generations[slot as usize];
            self.nodes[slot as usize] = Some(node);
            NodeId::new(slot, generation)
        } else {
            let slot = self.nodes.len() as u32;
            self.nodes.push(Some(node));
            self.generations.push(0);
            NodeId::new(slot, 0)
        }
    }

    pub(crate) fn node_opt(&self, id: NodeId) -> Option<&Node> {
        let slot = self.nodes.get(id.slot as usize)?.as_ref()?;
        if self.generations[id.slot as usize] != id.generation {
            return None;
        }
        Some(slot)
    }

    pub(crate) fn node_opt_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.generations.get(id.slot as usize).copied() != Some(id.generation) {
            return None;
        }
        self.nodes.get_mut(id.slot as usize)?.as_mut()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.node_opt(id)
            .expect("NodeId does not refer to a live node")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.node_opt_mut(id)
            .expect("NodeId does not refer to a live node")
    }

    /// This node's absolute position and effective-enabled state, or
    /// `None` if `id` doesn't refer to a live node.
    ///
    /// Effective-enabled is the AND of this node's own enabled bit and
    /// every ancestor's, matching `wlr_scene_node_coords`'s return value.
    pub fn node_coords(&self, id: NodeId) -> Option<(i32, i32, bool)> {
        let mut cur = self.node_opt(id)?;
        let mut x = 0;
        let mut y = 0;
        let mut enabled = true;
        loop {
            x += cur.header.x;
            y += cur.header.y;
            enabled &= cur.header.enabled();
            match cur.header.parent {
                Some(parent) => cur = self.node(parent.node()),
                None => break,
            }
        }
        Some((x, y, enabled))
    }

    // --- node construction ----------------------------------------------

    /// Create an empty container node under `parent`.
    ///
    /// There is no fallible variant: allocation failure is unmodeled (the
    /// global allocator aborts the process on OOM), matching how the
    /// arena this is grounded on returns `NodeId` directly rather than
    /// `Option<NodeId>`.
    pub fn tree_create(&mut self, parent: TreeId) -> TreeId {
        let id = self.alloc_node(Some(parent), NodeKind::Tree(TreeData::default()));
        self.attach_child(parent, id);
        TreeId(id)
    }

    /// Create a solid-color rect node under `parent`.
    pub fn rect_create(&mut self, parent: TreeId, width: i32, height: i32, color: [f32; 4]) -> RectId {
        let id = self.alloc_node(
            Some(parent),
            NodeKind::Rect(RectData {
                width,
                height,
                color,
            }),
        );
        self.attach_child(parent, id);
        let rect = RectId(id);
        self.damage_whole(rect.node());
        rect
    }

    /// Create a buffer node under `parent`, optionally already holding a
    /// client buffer.
    pub fn buffer_create(
        &mut self,
        parent: TreeId,
        buffer: Option<Rc<dyn PlatformBuffer>>,
    ) -> BufferId {
        let mut data = BufferData::default();
        data.buffer = buffer;
        let id = self.alloc_node(Some(parent), NodeKind::Buffer(std::boxed::Box::new(data)));
        self.attach_child(parent, id);
        let buffer_id = BufferId(id);
        self.update_node_outputs(buffer_id.node());
        self.damage_whole(buffer_id.node());
        buffer_id
    }

    fn attach_child(&mut self, parent: TreeId, child: NodeId) {
        let tree = self
            .node_mut(parent.node())
            .kind
            .as_tree_mut()
            .expect("parent must be a tree node");
        tree.children.push(child);
    }

    /// Destroy `node` and its whole subtree.
    ///
    /// A no-op if `node` is already destroyed (a stale or default-valued
    /// handle), matching the original's NULL-tolerant destroy. Fires each
    /// descendant's `destroy` signal bottom-up-by-subtree (children's
    /// signals fire as part of the recursive walk, before the node's own
    /// removal from its parent's child list), then frees its slot.
    pub fn node_destroy(&mut self, node: NodeId) {
        if self.node_opt(node).is_none() {
            return;
        }
        self.damage_whole(node);
        if let Some(parent) = self.node(node).header.parent {
            if let Some(tree) = self.node_opt_mut(parent.node()).and_then(|n| n.kind.as_tree_mut())
            {
                tree.children.retain(|c| *c != node);
            }
        }
        self.destroy_subtree(node);
    }

    fn destroy_subtree(&mut self, node: NodeId) {
        let children = self
            .node_opt(node)
            .and_then(|n| n.kind.as_tree())
            .map(|t| t.children.clone())
            .unwrap_or_default();
        for child in children {
            self.destroy_subtree(child);
        }

        let mut destroy = {
            let Some(slot) = self.node_opt_mut(node) else {
                return;
            };
            std::mem::take(&mut slot.header.destroy)
        };
        destroy.emit(&());

        let slot = node.slot as usize;
        self.nodes[slot] = None;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free_list.push(node.slot);
    }

    // --- node mutators ----------------------------------------------------

    /// Set `node`'s own enabled bit.
    pub fn set_enabled(&mut self, node: NodeId, enabled: bool) {
        if self.node(node).header.enabled() == enabled {
            return;
        }
        self.damage_whole(node);
        self.node_mut(node).header.flags.set(crate::node::NodeFlags::ENABLED, enabled);
        self.damage_whole(node);
    }

    /// Set `node`'s position relative to its parent.
    pub fn set_position(&mut self, node: NodeId, x: i32, y: i32) {
        let header = &self.node(node).header;
        if header.x == x && header.y == y {
            return;
        }
        self.damage_whole(node);
        let header = &mut self.node_mut(node).header;
        header.x = x;
        header.y = y;
        self.damage_whole(node);
        self.update_node_outputs(node);
    }

    fn siblings_mut(&mut self, node: NodeId) -> &mut std::vec::Vec<NodeId> {
        let parent = self
            .node(node)
            .header
            .parent
            .expect("node must have a parent to reorder");
        &mut self
            .node_mut(parent.node())
            .kind
            .as_tree_mut()
            .expect("parent must be a tree node")
            .children
    }

    /// Move `node` directly above `sibling` in paint order (later paints
    /// on top). Both must share the same parent.
    pub fn place_above(&mut self, node: NodeId, sibling: NodeId) {
        assert!(node != sibling, "a node cannot be placed relative to itself");
        assert_eq!(
            self.node(node).header.parent,
            self.node(sibling).header.parent,
            "place_above requires node and sibling to share a parent"
        );
        let siblings = self.siblings_mut(node);
        let sibling_pos = siblings.iter().position(|&n| n == sibling).unwrap();
        if siblings.get(sibling_pos + 1) == Some(&node) {
            return;
        }
        siblings.retain(|&n| n != node);
        let sibling_pos = siblings.iter().position(|&n| n == sibling).unwrap();
        siblings.insert(sibling_pos + 1, node);
        self.damage_whole(node);
        self.damage_whole(sibling);
    }

    /// Move `node` directly below `sibling` in paint order.
    pub fn place_below(&mut self, node: NodeId, sibling: NodeId) {
        assert!(node != sibling, "a node cannot be placed relative to itself");
        assert_eq!(
            self.node(node).header.parent,
            self.node(sibling).header.parent,
            "place_below requires node and sibling to share a parent"
        );
        let siblings = self.siblings_mut(node);
        let sibling_pos = siblings.iter().position(|&n| n == sibling).unwrap();
        if sibling_pos > 0 && siblings[sibling_pos - 1] == node {
            return;
        }
        siblings.retain(|&n| n != node);
        let sibling_pos = siblings.iter().position(|&n| n == sibling).unwrap();
        siblings.insert(sibling_pos, node);
        self.damage_whole(node);
        self.damage_whole(sibling);
    }

    /// Move `node` to the top of its parent's paint order.
    pub fn raise_to_top(&mut self, node: NodeId) {
        let siblings = self.siblings_mut(node);
        let Some(&top) = siblings.last() else {
            return;
        };
        if top == node {
            return;
        }
        self.place_above(node, top);
    }

    /// Move `node` to the bottom of its parent's paint order.
    pub fn lower_to_bottom(&mut self, node: NodeId) {
        let siblings = self.siblings_mut(node);
        let Some(&bottom) = siblings.first() else {
            return;
        };
        if bottom == node {
            return;
        }
        self.place_below(node, bottom);
    }

    /// Move `node` (and its subtree) under `new_parent`, appending it as
    /// the new topmost child.
    ///
    /// Panics if `new_parent` is `node` itself or one of its own
    /// descendants, which would create a cycle.
    pub fn reparent(&mut self, node: NodeId, new_parent: TreeId) {
        if self.node(node).header.parent == Some(new_parent) {
            return;
        }
        let mut ancestor = Some(new_parent);
        while let Some(a) = ancestor {
            assert!(
                a.node() != node,
                "reparent would make a node its own ancestor"
            );
            ancestor = self.node(a.node()).header.parent;
        }

        self.damage_whole(node);
        if let Some(old_parent) = self.node(node).header.parent {
            self.node_mut(old_parent.node())
                .kind
                .as_tree_mut()
                .expect("parent must be a tree node")
                .children
                .retain(|&n| n != node);
        }
        self.node_mut(node).header.parent = Some(new_parent);
        self.attach_child(new_parent, node);
        self.damage_whole(node);
        self.update_node_outputs(node);
    }

    // --- traversal ----------------------------------------------------

    /// Walk every enabled buffer node in `node`'s subtree, calling `visit`
    /// with its handle and absolute position.
    pub fn for_each_buffer(&self, node: NodeId, visit: &mut dyn FnMut(BufferId, i32, i32)) {
        self.for_each_buffer_at(node, 0, 0, visit);
    }

    fn for_each_buffer_at(
        &self,
        node: NodeId,
        lx: i32,
        ly: i32,
        visit: &mut dyn FnMut(BufferId, i32, i32),
    ) {
        let Some(n) = self.node_opt(node) else {
            return;
        };
        if !n.header.enabled() {
            return;
        }
        let lx = lx + n.header.x;
        let ly = ly + n.header.y;
        match &n.kind {
            NodeKind::Buffer(_) => visit(BufferId(node), lx, ly),
            NodeKind::Tree(tree) => {
                for &child in &tree.children {
                    self.for_each_buffer_at(child, lx, ly, visit);
                }
            }
            NodeKind::Rect(_) => {}
        }
    }

    /// Find the topmost enabled node under absolute point `(lx, ly)`,
    /// returning its handle and the point translated into its local
    /// coordinate space. Buffer nodes with a
    /// [`PointAcceptsInput`](crate::node::PointAcceptsInput) predicate use
    /// it instead of a plain bounds test.
    pub fn node_at(&self, node: NodeId, lx: f64, ly: f64) -> Option<(NodeId, f64, f64)> {
        let n = self.node_opt(node)?;
        if !n.header.enabled() {
            return None;
        }
        let lx = lx - f64::from(n.header.x);
        let ly = ly - f64::from(n.header.y);

        if let NodeKind::Tree(tree) = &n.kind {
            for &child in tree.children.iter().rev() {
                if let Some(hit) = self.node_at(child, lx, ly) {
                    return Some(hit);
                }
            }
            return None;
        }

        let intersects = match &n.kind {
            NodeKind::Buffer(b) => match &b.point_accepts_input {
                Some(predicate) => predicate(lx, ly),
                None => {
                    let bounds = n.local_bounds();
                    bounds.contains_point(lx.floor() as i32, ly.floor() as i32)
                }
            },
            NodeKind::Rect(_) => {
                let bounds = n.local_bounds();
                bounds.contains_point(lx.floor() as i32, ly.floor() as i32)
            }
            NodeKind::Tree(_) => unreachable!(),
        };

        intersects.then_some((node, lx, ly))
    }

    // --- buffer-only accessors/mutators --------------------------------

    fn buffer(&self, id: BufferId) -> &BufferData {
        self.node(id.node())
            .kind
            .as_buffer()
            .expect("node is not a buffer node")
    }

    fn buffer_mut(&mut self, id: BufferId) -> &mut BufferData {
        self.node_mut(id.node())
            .kind
            .as_buffer_mut()
            .expect("node is not a buffer node")
    }

    /// Replace a buffer node's client buffer, damaging its whole area.
    pub fn set_buffer(&mut self, id: BufferId, buffer: Option<Rc<dyn PlatformBuffer>>) {
        self.buffer_set_buffer_with_damage(id, buffer, &[]);
    }

    /// Restrict sampling to `src_box` of the attached buffer (or the whole
    /// buffer, if `src_box` is `None` or empty).
    pub fn set_source_box(&mut self, id: BufferId, src_box: Option<crate::geometry::FBox>) {
        let new = src_box.unwrap_or_default();
        if self.buffer(id).src_box.is_empty() && new.is_empty() {
            return;
        }
        if self.buffer(id).src_box == new {
            return;
        }
        self.buffer_mut(id).src_box = new;
        self.damage_whole(id.node());
    }

    /// Scale the sampled buffer to `width` x `height` (`0, 0` to use the
    /// buffer's intrinsic size).
    pub fn set_dest_size(&mut self, id: BufferId, width: i32, height: i32) {
        let b = self.buffer(id);
        if b.dst_width == width && b.dst_height == height {
            return;
        }
        self.damage_whole(id.node());
        let b = self.buffer_mut(id);
        b.dst_width = width;
        b.dst_height = height;
        self.damage_whole(id.node());
        self.update_node_outputs(id.node());
    }

    /// Set the transform relating this buffer's pixel orientation to
    /// display orientation.
    pub fn set_transform(&mut self, id: BufferId, transform: crate::geometry::Transform) {
        if self.buffer(id).transform == transform {
            return;
        }
        self.damage_whole(id.node());
        self.buffer_mut(id).transform = transform;
        self.damage_whole(id.node());
        self.update_node_outputs(id.node());
    }

    /// Install (or clear) a custom point hit-test predicate.
    pub fn set_point_accepts_input(&mut self, id: BufferId, predicate: Option<PointAcceptsInput>) {
        self.buffer_mut(id).point_accepts_input = predicate;
    }

    /// Subscribe to this node's destroy signal.
    pub fn on_destroy(&mut self, node: NodeId, listener: impl FnMut(&()) + 'static) {
        self.node_mut(node).header.destroy.connect(listener);
    }

    /// Subscribe to this buffer entering an output's active set.
    pub fn on_output_enter(&mut self, id: BufferId, listener: impl FnMut(&SceneOutputId) + 'static) {
        self.buffer_mut(id).output_enter.connect(listener);
    }

    /// Subscribe to this buffer leaving an output's active set.
    pub fn on_output_leave(&mut self, id: BufferId, listener: impl FnMut(&SceneOutputId) + 'static) {
        self.buffer_mut(id).output_leave.connect(listener);
    }

    /// Subscribe to this buffer being submitted to an output's renderer.
    pub fn on_output_present(
        &mut self,
        id: BufferId,
        listener: impl FnMut(&SceneOutputId) + 'static,
    ) {
        self.buffer_mut(id).output_present.connect(listener);
    }

    /// Subscribe to this buffer's frame-done notifications (fired once per
    /// commit on its primary output).
    pub fn on_frame_done(
        &mut self,
        id: BufferId,
        listener: impl FnMut(&std::time::Duration) + 'static,
    ) {
        self.buffer_mut(id).frame_done.connect(listener);
    }

    // --- output membership ---------------------------------------------

    /// Recompute which outputs `node`'s subtree intersects.
    ///
    /// Two passes over the registered outputs: first every buffer
    /// descendant's `primary_output` and `active_outputs` are updated,
    /// then `output_enter`/`output_leave` are fired from the diff against
    /// the previous `active_outputs`. This ordering means an observer
    /// reacting to enter/leave always sees an up-to-date `primary_output`.
    pub(crate) fn update_node_outputs(&mut self, node: NodeId) {
        let Some((lx, ly, _)) = self.node_coords(node) else {
            return;
        };
        self.update_node_outputs_at(node, lx, ly, None);
    }

    fn update_node_outputs_at(
        &mut self,
        node: NodeId,
        lx: i32,
        ly: i32,
        ignore: Option<SceneOutputId>,
    ) {
        let Some(n) = self.node_opt(node) else {
            return;
        };
        match &n.kind {
            NodeKind::Buffer(_) => self.update_buffer_outputs(BufferId(node), lx, ly, ignore),
            NodeKind::Tree(tree) => {
                let children = tree.children.clone();
                for child in children {
                    let (cx, cy) = self
                        .node_opt(child)
                        .map(|c| (c.header.x, c.header.y))
                        .unwrap_or_default();
                    self.update_node_outputs_at(child, lx + cx, ly + cy, ignore);
                }
            }
            NodeKind::Rect(_) => {}
        }
    }

    fn update_buffer_outputs(
        &mut self,
        id: BufferId,
        lx: i32,
        ly: i32,
        ignore: Option<SceneOutputId>,
    ) {
        let size = self.node(id.node()).local_bounds();
        let buffer_box = crate::geometry::Box::new(lx, ly, size.width, size.height);

        let mut largest_overlap: i64 = 0;
        let mut primary = None;
        let mut active: u64 = 0;
        for out in &self.outputs {
            if Some(out.id) == ignore {
                continue;
            }
            if let Some(intersection) = buffer_box.intersection(&out.viewport()) {
                let overlap = intersection.area();
                if overlap > largest_overlap {
                    largest_overlap = overlap;
                    primary = Some(out.id);
                }
                active |= 1u64 << out.id.index;
            }
        }

        let old_active = self.buffer(id).active_outputs;
        {
            let b = self.buffer_mut(id);
            b.active_outputs = active;
            b.primary_output = primary;
        }

        let ids: std::vec::Vec<SceneOutputId> = self.outputs.iter().map(|o| o.id).collect();
        for out_id in ids {
            let mask = 1u64 << out_id.index;
            let intersects = active & mask != 0;
            let intersected_before = old_active & mask != 0;
            if intersects && !intersected_before {
                let b = self.buffer_mut(id);
                b.output_enter.emit(&out_id);
            } else if !intersects && intersected_before {
                let b = self.buffer_mut(id);
                b.output_leave.emit(&out_id);
            }
        }
    }

    // --- output registry -------------------------------------------------

    /// Register a new output at scene position `(x, y)`, paired with the
    /// [`DamageRing`] that accumulates damage for it.
    ///
    /// Fails with [`SceneError::TooManyOutputs`] if 64 outputs are already
    /// registered — the one recoverable contract violation in this crate,
    /// since a host can't always statically bound how many displays it
    /// will see.
    pub fn create_output(
        &mut self,
        output: std::boxed::Box<dyn Output>,
        damage: std::boxed::Box<dyn DamageRing>,
        x: i32,
        y: i32,
    ) -> Result<SceneOutputId, SceneError> {
        let used: std::vec::Vec<SceneOutputId> = self.outputs.iter().map(|o| o.id).collect();
        let index = next_free_index(&used).ok_or(SceneError::TooManyOutputs)?;
        let id = SceneOutputId {
            index,
            generation: self.next_output_generation,
        };
        self.next_output_generation = self.next_output_generation.wrapping_add(1);

        let mut damage = damage;
        let viewport = {
            let (w, h) = output.effective_resolution();
            crate::geometry::Box::new(x, y, w, h)
        };
        damage.add_whole(viewport);

        self.outputs.push(SceneOutput {
            id,
            output,
            damage,
            x,
            y,
            prev_scanout: false,
            destroy: crate::node::Signal::default(),
            highlight_regions: std::collections::VecDeque::new(),
        });

        self.update_node_outputs(self.root);
        Ok(id)
    }

    /// Unregister `id`. Fires its destroy signal, then recomputes output
    /// membership (excluding `id`, which has already been removed by the
    /// time observers run) so buffers lose it from `active_outputs`.
    pub fn destroy_output(&mut self, id: SceneOutputId) {
        let Some(pos) = self.outputs.iter().position(|o| o.id == id) else {
            return;
        };
        let mut destroy = std::mem::take(&mut self.outputs[pos].destroy);
        destroy.emit(&id);

        self.update_node_outputs_excluding(id);
        self.outputs.retain(|o| o.id != id);
    }

    fn update_node_outputs_excluding(&mut self, ignore: SceneOutputId) {
        let root = self.root;
        let Some((lx, ly, _)) = self.node_coords(root) else {
            return;
        };
        self.update_node_outputs_at(root, lx, ly, Some(ignore));
    }

    /// Subscribe to `id`'s destruction.
    pub fn on_output_destroy(
        &mut self,
        id: SceneOutputId,
        listener: impl FnMut(&SceneOutputId) + 'static,
    ) {
        if let Some(out) = self.outputs.iter_mut().find(|o| o.id == id) {
            out.destroy.connect(listener);
        }
    }

    /// Move a registered output to a new scene position, damaging its
    /// whole viewport and recomputing membership.
    pub fn set_output_position(&mut self, id: SceneOutputId, x: i32, y: i32) {
        let Some(out) = self.outputs.iter_mut().find(|o| o.id == id) else {
            return;
        };
        if out.x == x && out.y == y {
            return;
        }
        out.x = x;
        out.y = y;
        let viewport = out.viewport();
        out.damage.add_whole(viewport);
        self.update_node_outputs(self.root);
    }

    /// Forward a commit/mode event the host observed on its own output
    /// object. Membership is recomputed when mode, transform, or scale
    /// changed, since those affect every buffer's intersection test.
    pub fn handle_output_event(&mut self, _id: SceneOutputId, event: OutputEvent) {
        let relevant = match event {
            OutputEvent::Commit { fields } => {
                fields.intersects(
                    crate::output::OutputCommitFields::MODE
                        | crate::output::OutputCommitFields::TRANSFORM
                        | crate::output::OutputCommitFields::SCALE,
                )
            }
            OutputEvent::Mode => true,
        };
        if relevant {
            self.update_node_outputs(self.root);
        }
    }

    /// Attach a one-time presentation-feedback observer for the whole
    /// scene. Panics if one is already set (the original asserts
    /// `scene->presentation == NULL`; this is set-once configuration, not
    /// a condition a caller recovers from).
    pub fn set_presentation(&mut self, presentation: Rc<dyn crate::render::PresentationFeedback>) {
        assert!(
            self.presentation.is_none(),
            "scene already has a presentation-feedback observer"
        );
        self.presentation = Some(presentation);
    }

    #[cfg(test)]
    pub(crate) fn output_damage_for_test(
        &self,
        id: SceneOutputId,
    ) -> std::vec::Vec<crate::geometry::Box> {
        self.outputs
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.damage.current())
            .unwrap_or_default()
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        let ids: std::vec::Vec<SceneOutputId> = self.outputs.iter().map(|o| o.id).collect();
        for id in ids {
            self.destroy_output(id);
        }
        let root = self.root;
        self.node_destroy(root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_structure_and_destroy() {
        let mut scene = Scene::new();
        let root = scene.root();
        let group = scene.tree_create(root);
        let rect = scene.rect_create(group, 10, 20, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(scene.node_coords(rect.node()), Some((0, 0, true)));

        scene.set_position(group.node(), 3, 4);
        assert_eq!(scene.node_coords(rect.node()), Some((3, 4, true)));

        scene.node_destroy(group.node());
        assert_eq!(scene.node_coords(rect.node()), None);
    }

    #[test]
    fn destroy_is_idempotent_on_stale_id() {
        let mut scene = Scene::new();
        let root = scene.root();
        let rect = scene.rect_create(root, 1, 1, [0.0, 0.0, 0.0, 1.0]);
        scene.node_destroy(rect.node());
        // Destroying an already-destroyed id is a no-op, not a panic.
        scene.node_destroy(rect.node());
    }

    #[test]
    fn generation_prevents_stale_id_aliasing() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.rect_create(root, 1, 1, [0.0, 0.0, 0.0, 1.0]);
        scene.node_destroy(a.node());
        let b = scene.rect_create(root, 1, 1, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(a.node().slot, b.node().slot);
        assert_ne!(a.node().generation, b.node().generation);
        assert!(scene.node_coords(a.node()).is_none());
        assert!(scene.node_coords(b.node()).is_some());
    }

    #[test]
    #[should_panic(expected = "own ancestor")]
    fn reparent_into_own_descendant_panics() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.tree_create(root);
        let b = scene.tree_create(a);
        scene.reparent(a.node(), b);
    }

    #[test]
    fn raise_and_lower_reorder_siblings() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.rect_create(root, 1, 1, [0.0; 4]);
        let b = scene.rect_create(root, 1, 1, [0.0; 4]);
        let c = scene.rect_create(root, 1, 1, [0.0; 4]);
        scene.raise_to_top(a.node());
        let children = &scene.node(root.node()).kind.as_tree().unwrap().children;
        assert_eq!(children.last(), Some(&a.node()));
        drop(children);
        scene.lower_to_bottom(c.node());
        let children = &scene.node(root.node()).kind.as_tree().unwrap().children;
        assert_eq!(children.first(), Some(&c.node()));
        let _ = b;
    }
}
