// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Damage propagation: marking whole-node regions dirty on structural
//! changes, and the finer-grained partial-buffer-damage path, both writing
//! into each output's injected [`DamageRing`].

use crate::geometry::{scale_box, scale_box_xy, transform_box, Box, FBox};
use crate::node::{BufferId, NodeId};
use crate::scene::Scene;

/// A per-output accumulator for pending damage, injected by the host rather
/// than owned by this crate (see `spec.md` §6: the damage ring lives with
/// the output's backend, which may already have one from its own swapchain
/// bookkeeping).
pub trait DamageRing {
    /// Merge `boxes` into the pending damage.
    fn add(&mut self, boxes: &[Box]);
    /// Merge a single box into the pending damage.
    fn add_box(&mut self, b: Box) {
        self.add(std::slice::from_ref(&b));
    }
    /// Mark the whole output as damaged.
    fn add_whole(&mut self, viewport: Box);
    /// Take the pending damage for the frame about to be rendered, as the
    /// renderer attaches its next buffer. Returns `None` if the backend
    /// can't attach a render target this frame (a transient failure, per
    /// the crate's error-handling design); otherwise `Some((needs_frame,
    /// damage))`, where `needs_frame` is `false` when there's nothing to
    /// paint and the caller should roll the frame back instead.
    fn attach_render(&mut self) -> Option<(bool, std::vec::Vec<Box>)>;
    /// The damage accumulated since the last `attach_render`, without
    /// consuming it — used by the debug-highlight path, which wants to know
    /// what just got damaged this frame in addition to committing it.
    fn current(&self) -> std::vec::Vec<Box>;
}

/// A minimal reference [`DamageRing`]: one pending rectangle list, drained
/// whole on `attach_render`.
///
/// Grounded in the accumulate-then-drain-on-attach shape of
/// `examples/other_examples/7885f690_Smithay-smithay__src-backend-renderer-damage.rs.rs`,
/// simplified to a flat rectangle list (no per-element commit counters —
/// this crate's damage model is whole-scene, not per-render-element).
#[derive(Default, Debug)]
pub struct FifoDamageRing {
    pending: std::vec::Vec<Box>,
}

impl DamageRing for FifoDamageRing {
    fn add(&mut self, boxes: &[Box]) {
        self.pending.extend_from_slice(boxes);
    }

    fn add_whole(&mut self, viewport: Box) {
        self.pending.clear();
        self.pending.push(viewport);
    }

    fn attach_render(&mut self) -> Option<(bool, std::vec::Vec<Box>)> {
        let needs_frame = !self.pending.is_empty();
        let damage = std::mem::take(&mut self.pending);
        Some((needs_frame, damage))
    }

    fn current(&self) -> std::vec::Vec<Box> {
        self.pending.clone()
    }
}

impl Scene {
    /// Mark `node` and its whole subtree damaged on every registered
    /// output, at their current positions.
    ///
    /// Matches the original's "one of these calls will short-circuit" idiom
    /// used around setters: called once before a geometric mutation and
    /// once after, so a no-op change (new value equals old) damages nothing
    /// so long as callers skip both calls when old == new.
    pub fn damage_whole(&mut self, node: NodeId) {
        if self.outputs.is_empty() {
            return;
        }
        let Some((lx, ly, enabled)) = self.node_coords(node) else {
            return;
        };
        if !enabled {
            return;
        }
        self.damage_whole_subtree(node, lx, ly);
    }

    fn damage_whole_subtree(&mut self, node: NodeId, lx: i32, ly: i32) {
        let Some(slot) = self.node_opt(node) else {
            return;
        };
        if !slot.header.enabled() {
            return;
        }

        if let Some(tree) = slot.kind.as_tree() {
            let children = tree.children.clone();
            for child in children {
                let (cx, cy) = self
                    .node_opt(child)
                    .map(|c| (c.header.x, c.header.y))
                    .unwrap_or_default();
                self.damage_whole_subtree(child, lx + cx, ly + cy);
            }
        }

        let Some(slot) = self.node_opt(node) else {
            return;
        };
        let size = slot.local_bounds();
        for out in &mut self.outputs {
            let b = scale_box(
                Box::new(lx - out.x, ly - out.y, size.width, size.height),
                out.output.scale(),
            );
            out.damage.add_box(b);
        }
    }

    /// Replace a buffer node's attached client buffer, damaging only
    /// `damage` (buffer-local pixel rectangles) rather than the whole node.
    ///
    /// `damage` is forward-transformed by the buffer's own `transform` (the
    /// transform describes how buffer pixels map to display orientation, so
    /// going from raw buffer-local damage to the node's logical/display
    /// space is the transform applied directly, not its inverse), then
    /// intersected with the effective source rect, scaled by the
    /// destination/source ratio composed with each output's scale, and
    /// translated into that output's space.
    pub fn buffer_set_buffer_with_damage(
        &mut self,
        id: BufferId,
        buffer: Option<std::rc::Rc<dyn crate::render::PlatformBuffer>>,
        damage: &[Box],
    ) {
        let node = id.node();
        let buffer_dims = buffer.as_ref().map(|b| (b.width(), b.height()));

        let changed = match (
            self.node_opt(node)
                .and_then(|n| n.kind.as_buffer())
                .and_then(|b| b.buffer.as_ref()),
            buffer.as_ref(),
        ) {
            (Some(old), Some(new)) => !std::rc::Rc::ptr_eq(old, new),
            (None, None) => false,
            _ => true,
        };

        if changed {
            self.damage_whole(node);
        }

        if let Some(slot) = self.node_opt_mut(node).and_then(|n| n.kind.as_buffer_mut()) {
            slot.buffer = buffer;
            if changed {
                slot.texture = None;
            }
        }
        if changed {
            self.update_node_outputs(node);
        }

        let Some((buf_w, buf_h)) = buffer_dims else {
            self.damage_whole(node);
            return;
        };
        if damage.is_empty() {
            self.damage_whole(node);
            return;
        }

        let Some((lx, ly, enabled)) = self.node_coords(node) else {
            return;
        };
        if !enabled {
            return;
        }

        let (transform, src_box, dst_w, dst_h) = {
            let Some(b) = self.node_opt(node).and_then(|n| n.kind.as_buffer()) else {
                return;
            };
            (b.transform, b.src_box, b.dst_width, b.dst_height)
        };

        let effective_src = if src_box.is_empty() {
            let (w, h) = if transform.swaps_wh() {
                (buf_h, buf_w)
            } else {
                (buf_w, buf_h)
            };
            FBox {
                x: 0.0,
                y: 0.0,
                width: f64::from(w),
                height: f64::from(h),
            }
        } else {
            src_box
        };

        let (scale_x, scale_y) = if dst_w > 0 || dst_h > 0 {
            (
                f64::from(dst_w) / effective_src.width,
                f64::from(dst_h) / effective_src.height,
            )
        } else {
            (
                f64::from(buf_w) / effective_src.width,
                f64::from(buf_h) / effective_src.height,
            )
        };

        let src_box_i = Box::new(
            effective_src.x.round() as i32,
            effective_src.y.round() as i32,
            effective_src.width.round() as i32,
            effective_src.height.round() as i32,
        );

        let trans_damage: std::vec::Vec<Box> = damage
            .iter()
            .filter_map(|b| {
                let transformed = transform_box(*b, transform, buf_w, buf_h);
                transformed.intersection(&src_box_i)
            })
            .collect();

        for out in &mut self.outputs {
            let output_scale = out.output.scale();
            let dx = ((lx - out.x) as f64 * output_scale).round() as i32;
            let dy = ((ly - out.y) as f64 * output_scale).round() as i32;
            let boxes: std::vec::Vec<Box> = trans_damage
                .iter()
                .map(|b| scale_box_xy(*b, output_scale * scale_x, output_scale * scale_y))
                .map(|b| b.translated(dx, dy))
                .collect();
            if !boxes.is_empty() {
                out.damage.add(&boxes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;
    use crate::render::RendererFrame;

    struct FakeOutput {
        width: i32,
        height: i32,
        scale: f64,
    }

    impl Output for FakeOutput {
        fn effective_resolution(&self) -> (i32, i32) {
            (self.width, self.height)
        }
        fn transformed_resolution(&self) -> (i32, i32) {
            (self.width, self.height)
        }
        fn transform(&self) -> crate::geometry::Transform {
            crate::geometry::Transform::Normal
        }
        fn scale(&self) -> f64 {
            self.scale
        }
        fn attach_buffer(&mut self, _buffer: &dyn crate::render::PlatformBuffer) -> bool {
            false
        }
        fn test(&mut self) -> bool {
            true
        }
        fn commit(&mut self) -> bool {
            true
        }
        fn rollback(&mut self) {}
        fn set_damage(&mut self, _damage: &[Box]) {}
        fn schedule_frame(&mut self) {}
        fn render_software_cursors(&mut self, _frame: &mut dyn RendererFrame, _damage: &[Box]) {}
    }

    #[test]
    fn damage_whole_scales_by_output_scale() {
        let mut scene = Scene::new();
        let root = scene.root();
        let rect = scene.rect_create(root, 10, 10, [1.0, 0.0, 0.0, 1.0]);
        scene.set_position(rect.node(), 5, 5);

        let output = std::boxed::Box::new(FakeOutput {
            width: 100,
            height: 100,
            scale: 2.0,
        });
        let out_id = scene
            .create_output(output, std::boxed::Box::new(FifoDamageRing::default()), 0, 0)
            .unwrap();
        scene.damage_whole(rect.node());

        let damage = scene.output_damage_for_test(out_id);
        assert!(damage.contains(&Box::new(10, 10, 20, 20)));
    }
}
