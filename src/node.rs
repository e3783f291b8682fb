// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The node model: a generational arena of tree/rect/buffer nodes, their
//! shared header, the addon map, and the signal type used for observer
//! callbacks.

use std::any::Any;
use std::boxed::Box as AllocBox;
use std::rc::Rc;
use std::vec::Vec;

use hashbrown::HashMap;

use crate::geometry::{Box, FBox, Transform};
use crate::output::SceneOutputId;

/// A handle to a node in a [`crate::Scene`].
///
/// Generational: a freed slot is reused with a bumped generation, so a
/// stale `NodeId` held past its node's destruction never aliases whatever
/// gets allocated into that slot next. Operations taking a `NodeId` that no
/// longer resolves to a live node are documented per-operation (usually a
/// silent no-op, matching a destroyed-node-used-again call in the original).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }
}

/// A handle to a tree node, returned by [`crate::Scene::tree_create`].
///
/// Newtype over [`NodeId`] so tree-only operations (`reparent` targets,
/// children iteration) are distinguished at the type level from rect/buffer
/// handles, the way the original distinguishes `wlr_scene_tree *` from
/// `wlr_scene_node *` by pointer type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) NodeId);

impl TreeId {
    /// The generic node handle underlying this tree handle.
    pub const fn node(self) -> NodeId {
        self.0
    }
}

/// A handle to a rect node, returned by [`crate::Scene::rect_create`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RectId(pub(crate) NodeId);

impl RectId {
    /// The generic node handle underlying this rect handle.
    pub const fn node(self) -> NodeId {
        self.0
    }
}

/// A handle to a buffer node, returned by [`crate::Scene::buffer_create`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) NodeId);

impl BufferId {
    /// The generic node handle underlying this buffer handle.
    pub const fn node(self) -> NodeId {
        self.0
    }
}

/// A caller-chosen key for an entry in a node's addon map.
///
/// The original keys addons by the address of a per-type interface table
/// (`const void *`); this crate has no stable pointer identity to hash
/// without `unsafe`, so callers mint their own small `Copy` key instead
/// (e.g. an enum discriminant or a counter).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AddonKey(pub u64);

/// Disposition a listener returns is implicit: listeners never unregister
/// themselves mid-dispatch in this crate (see [`Signal`]'s docs). Kept as a
/// unit type placeholder would be overkill; listeners are plain `FnMut`.
type Listener<T> = AllocBox<dyn FnMut(&T)>;

/// A multi-observer callback list, used for `destroy`, `output_enter`,
/// `output_leave`, `output_present`, and `frame_done` notifications.
///
/// `emit` drains the listener list into a local buffer before calling any of
/// them, then splices back in whatever landed in the (now otherwise empty)
/// list while a listener ran — this is the "one-shot linked-list
/// snapshotting" dispatch pattern: a listener that connects another listener
/// during dispatch doesn't lose it, and a listener can't observe a
/// half-mutated list of its siblings.
pub struct Signal<T> {
    listeners: Vec<Listener<T>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<T> Signal<T> {
    /// Register a listener, called every time this signal is emitted.
    pub fn connect(&mut self, listener: impl FnMut(&T) + 'static) {
        self.listeners.push(AllocBox::new(listener));
    }

    /// Number of currently-registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Call every listener with `payload`, in registration order.
    pub fn emit(&mut self, payload: &T) {
        let mut dispatch = std::mem::take(&mut self.listeners);
        for listener in &mut dispatch {
            listener(payload);
        }
        dispatch.append(&mut self.listeners);
        self.listeners = dispatch;
    }
}

bitflags::bitflags! {
    /// Per-node state flags mutated by `set_enabled`/node construction.
    ///
    /// Only `ENABLED` exists today; kept as `bitflags!` rather than a plain
    /// `bool` since the commit pipeline and effective-enabled computation
    /// (`enabled && parent.enabled && ...`) read more clearly as flag
    /// algebra once a second flag shows up, and it matches the style of
    /// `examples/endoli-understory/understory_box_tree/src/types.rs`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// This node's own `enabled` bit (independent of ancestors).
        const ENABLED = 0b01;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self::ENABLED
    }
}

/// Fields shared by every node kind: position, enabled bit, tree topology,
/// the destroy signal, and the addon map.
pub struct NodeHeader {
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) flags: NodeFlags,
    pub(crate) parent: Option<TreeId>,
    pub(crate) destroy: Signal<()>,
    pub(crate) addons: HashMap<AddonKey, AllocBox<dyn Any>>,
}

impl NodeHeader {
    pub(crate) fn new(parent: Option<TreeId>) -> Self {
        Self {
            x: 0,
            y: 0,
            flags: NodeFlags::default(),
            parent,
            destroy: Signal::default(),
            addons: HashMap::new(),
        }
    }

    /// This node's own enabled bit, ignoring ancestors.
    pub const fn enabled(&self) -> bool {
        self.flags.contains(NodeFlags::ENABLED)
    }
}

/// Data specific to a tree node: its ordered children.
///
/// Children are kept back-to-front (later entries paint over earlier ones),
/// matching the original's `wl_list` where `wlr_scene_node_raise_to_top`
/// moves a node to the list head, which iterates as "nearest the end of
/// rendering" — this crate keeps the equivalent ordering as a plain `Vec`
/// where the *last* element paints last (topmost).
#[derive(Default)]
pub struct TreeData {
    pub(crate) children: Vec<NodeId>,
}

/// Data specific to a rect node: a solid-color axis-aligned quad.
pub struct RectData {
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) color: [f32; 4],
}

/// A predicate a buffer node can install to customize point hit-testing,
/// e.g. to reject fully-transparent pixels. Receives buffer-local
/// coordinates.
pub type PointAcceptsInput = AllocBox<dyn Fn(f64, f64) -> bool>;

/// Data specific to a buffer node: a sampled client buffer plus its
/// presentation parameters and per-output bookkeeping.
pub struct BufferData {
    pub(crate) buffer: Option<Rc<dyn crate::render::PlatformBuffer>>,
    pub(crate) texture: Option<Rc<dyn crate::render::Texture>>,
    pub(crate) src_box: FBox,
    pub(crate) dst_width: i32,
    pub(crate) dst_height: i32,
    pub(crate) transform: Transform,
    pub(crate) point_accepts_input: Option<PointAcceptsInput>,
    pub(crate) active_outputs: u64,
    pub(crate) primary_output: Option<SceneOutputId>,
    pub(crate) output_enter: Signal<SceneOutputId>,
    pub(crate) output_leave: Signal<SceneOutputId>,
    pub(crate) output_present: Signal<SceneOutputId>,
    pub(crate) frame_done: Signal<std::time::Duration>,
}

impl BufferData {
    /// This buffer's effective width/height: `dst_width`/`dst_height` when
    /// set (non-zero), else the attached buffer's intrinsic size (with
    /// width/height swapped for a 90°/270° transform), else `(0, 0)` if no
    /// destination size and no buffer are set.
    pub(crate) fn get_size(&self) -> (i32, i32) {
        if self.dst_width > 0 && self.dst_height > 0 {
            return (self.dst_width, self.dst_height);
        }
        let Some(buffer) = self.buffer.as_ref() else {
            return (0, 0);
        };
        let (w, h) = (buffer.width(), buffer.height());
        if self.transform.swaps_wh() {
            (h, w)
        } else {
            (w, h)
        }
    }
}

impl Default for BufferData {
    fn default() -> Self {
        Self {
            buffer: None,
            texture: None,
            src_box: FBox::default(),
            dst_width: 0,
            dst_height: 0,
            transform: Transform::Normal,
            point_accepts_input: None,
            active_outputs: 0,
            primary_output: None,
            output_enter: Signal::default(),
            output_leave: Signal::default(),
            output_present: Signal::default(),
            frame_done: Signal::default(),
        }
    }
}

/// The kind-specific payload of a node, a tagged union over the three node
/// kinds the scene graph supports.
///
/// The tag is immutable after creation: there is no operation that turns a
/// rect node into a buffer node. Downcasting accessors
/// (`Scene::rect_data`/`Scene::buffer_data`, etc.) panic if called against
/// the wrong kind — the same contract violation class as an out-of-bounds
/// index, per the crate's error-handling design.
pub enum NodeKind {
    /// A container with no visual content of its own.
    Tree(TreeData),
    /// A solid-color quad.
    Rect(RectData),
    /// A sampled client buffer.
    Buffer(AllocBox<BufferData>),
}

impl NodeKind {
    pub(crate) fn as_tree(&self) -> Option<&TreeData> {
        match self {
            Self::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn as_tree_mut(&mut self) -> Option<&mut TreeData> {
        match self {
            Self::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn as_buffer(&self) -> Option<&BufferData> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn as_buffer_mut(&mut self) -> Option<&mut BufferData> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

/// A single slot in the scene's node arena.
pub struct Node {
    pub(crate) header: NodeHeader,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// The node's local, unscaled bounds relative to its own position —
    /// `(0, 0, width, height)` for rects and buffers, empty for trees (a
    /// tree's visual extent is the union of its children, computed on
    /// demand rather than cached). A buffer node with no explicit
    /// destination size falls back to its buffer's intrinsic size, per
    /// [`BufferData::get_size`].
    pub fn local_bounds(&self) -> Box {
        match &self.kind {
            NodeKind::Tree(_) => Box::ZERO,
            NodeKind::Rect(r) => Box::new(0, 0, r.width, r.height),
            NodeKind::Buffer(b) => {
                let (w, h) = b.get_size();
                Box::new(0, 0, w, h)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_dispatches_in_registration_order() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut signal: Signal<()> = Signal::default();
        let o1 = order.clone();
        signal.connect(move |()| o1.borrow_mut().push(1));
        let o2 = order.clone();
        signal.connect(move |()| o2.borrow_mut().push(2));
        signal.emit(&());
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn signal_listener_can_register_another_listener_during_emit() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let signal = Rc::new(std::cell::RefCell::new(Signal::<()>::default()));
        let o1 = order.clone();
        let sig_for_first = signal.clone();
        signal.borrow_mut().connect(move |()| {
            o1.borrow_mut().push(1);
            let o2 = o1.clone();
            sig_for_first
                .borrow_mut()
                .connect(move |()| o2.borrow_mut().push(2));
        });
        signal.borrow_mut().emit(&());
        assert_eq!(*order.borrow(), vec![1]);
        // The listener registered during the first emit fires on the next one.
        signal.borrow_mut().emit(&());
        assert_eq!(*order.borrow(), vec![1, 1, 2]);
    }

    #[test]
    fn node_flags_default_to_enabled() {
        let header = NodeHeader::new(None);
        assert!(header.enabled());
    }
}
