// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-output commit pipeline: scan-out, damage-bounded composited
//! rendering, the debug-damage highlight overlay, and frame-done dispatch.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::geometry::{scale_box, transform_box, Box, FBox};
use crate::node::{BufferId, NodeId, NodeKind};
use crate::output::SceneOutputId;
use crate::render::{Renderer, RendererFrame};
use crate::scene::{DebugDamageMode, Scene};

/// How long a highlighted damage region keeps fading in, in milliseconds,
/// before it's dropped from the overlay.
const HIGHLIGHT_DAMAGE_FADEOUT_MS: u64 = 250;

/// One rectangle that was damaged while [`DebugDamageMode::Highlight`] was
/// active, tracked so the overlay can fade it out over
/// [`HIGHLIGHT_DAMAGE_FADEOUT_MS`].
#[derive(Clone, Debug)]
pub(crate) struct HighlightRegion {
    region: Box,
    age: Duration,
}

impl Scene {
    /// Run the per-output commit pipeline: scan-out check, damage-bounded
    /// composited render (or nothing, if undamaged), and debug-highlight
    /// bookkeeping. `now` is the caller's current time, used to age
    /// highlight regions and stamp `frame_done`.
    ///
    /// Returns `false` if the backend rejected the commit; the scene's own
    /// state (damage ring, `prev_scanout`) is unaffected by a rejected
    /// commit so the caller can retry on the next frame.
    pub fn commit_output<R: Renderer>(
        &mut self,
        id: SceneOutputId,
        renderer: &mut R,
        now: Duration,
    ) -> bool {
        let Some(pos) = self.outputs.iter().position(|o| o.id == id) else {
            return false;
        };

        let scanned_out = self.try_scanout(id);
        let exited_scanout = self.outputs[pos].prev_scanout && !scanned_out;
        if scanned_out != self.outputs[pos].prev_scanout {
            if exited_scanout {
                debug!("scene output {:?} exiting scan-out, damaging whole output", id);
                let viewport = self.outputs[pos].viewport();
                self.outputs[pos].damage.add_whole(viewport);
            } else {
                trace!("scene output {:?} entering scan-out", id);
            }
            self.outputs[pos].prev_scanout = scanned_out;
        }

        if scanned_out {
            return true;
        }

        match self.debug_damage {
            DebugDamageMode::Rerender => {
                let viewport = self.outputs[pos].viewport();
                self.outputs[pos].damage.add_whole(viewport);
            }
            DebugDamageMode::Highlight => self.accumulate_highlight_damage(pos, now),
            DebugDamageMode::None => {}
        }

        let Some((needs_frame, damage)) = self.outputs[pos].damage.attach_render() else {
            warn!("scene output {:?} failed to attach a render target", id);
            return false;
        };
        if !needs_frame {
            trace!("scene output {:?} has no damage, skipping render", id);
            return true;
        }

        let (output_width, output_height) = self.outputs[pos].output.effective_resolution();
        let output_scale = self.outputs[pos].output.scale();
        let output_transform = self.outputs[pos].output.transform();
        let (ox, oy) = (self.outputs[pos].x, self.outputs[pos].y);

        let root = self.root().node();
        self.ensure_textures(root, renderer);

        {
            let mut frame = renderer.begin(output_width, output_height);
            for rect in &damage {
                frame.scissor(Some(*rect));
                frame.clear([0.0, 0.0, 0.0, 0.0]);
            }
            frame.scissor(None);

            self.render_subtree(root, -ox, -oy, &damage, output_scale, &mut frame, id);

            if self.debug_damage == DebugDamageMode::Highlight {
                for region in &self.outputs[pos].highlight_regions {
                    let age_ms = now.saturating_sub(region.age).as_millis() as f64;
                    let alpha = (1.0 - age_ms / HIGHLIGHT_DAMAGE_FADEOUT_MS as f64).max(0.0);
                    frame.scissor(Some(region.region));
                    frame.render_rect(region.region, [1.0, 0.0, 0.0, alpha as f32]);
                }
                frame.scissor(None);
            }

            self.outputs[pos]
                .output
                .render_software_cursors(&mut frame, &damage);
            renderer.end(frame);
        }

        let (transformed_w, transformed_h) = self.outputs[pos].output.transformed_resolution();
        let frame_damage: std::vec::Vec<Box> = damage
            .iter()
            .map(|b| transform_box(*b, output_transform.invert(), transformed_w, transformed_h))
            .collect();
        self.outputs[pos].output.set_damage(&frame_damage);

        if !self.outputs[pos].output.commit() {
            warn!("scene output {:?} rejected commit", id);
            return false;
        }

        self.send_frame_done(id, now);

        if let Some(presentation) = self.presentation.as_ref() {
            presentation.presented(id, now);
        }

        if self.debug_damage == DebugDamageMode::Highlight
            && !self.outputs[pos].highlight_regions.is_empty()
        {
            self.outputs[pos].output.schedule_frame();
        }

        true
    }

    /// Upload a renderer texture for every enabled buffer node that has a
    /// client buffer attached but no cached texture yet — lazily, the way
    /// the original resolves `scene_buffer->texture` from
    /// `client_buffer_get`/`texture_from_buffer` at render time rather than
    /// at `set_buffer` time.
    fn ensure_textures<R: Renderer>(&mut self, node: NodeId, renderer: &mut R) {
        let Some(n) = self.node_opt(node) else {
            return;
        };
        if !n.header.enabled() {
            return;
        }
        match &n.kind {
            NodeKind::Tree(tree) => {
                let children = tree.children.clone();
                for child in children {
                    self.ensure_textures(child, renderer);
                }
            }
            NodeKind::Buffer(b) => {
                if b.texture.is_some() {
                    return;
                }
                let Some(buffer) = b.buffer.clone() else {
                    return;
                };
                let texture = renderer.texture_from_buffer(buffer.as_ref());
                if let Some(slot) = self
                    .node_opt_mut(node)
                    .and_then(|n| n.kind.as_buffer_mut())
                {
                    slot.texture = Some(texture);
                }
            }
            NodeKind::Rect(_) => {}
        }
    }

    fn accumulate_highlight_damage(&mut self, pos: usize, now: Duration) {
        let pending = self.outputs[pos].damage.current();
        if !pending.is_empty() {
            for region in pending {
                self.outputs[pos]
                    .highlight_regions
                    .push_back(HighlightRegion { region, age: now });
            }
        }

        let mut survivors = std::collections::VecDeque::new();
        let mut newer_union: std::vec::Vec<Box> = std::vec::Vec::new();
        let regions: std::vec::Vec<HighlightRegion> =
            self.outputs[pos].highlight_regions.drain(..).collect();
        for region in regions.into_iter().rev() {
            let mut remaining = std::vec::Vec::new();
            let mut pieces = vec![region.region];
            for newer in &newer_union {
                pieces = pieces
                    .into_iter()
                    .flat_map(|p| subtract_box(p, *newer))
                    .collect();
            }
            remaining.append(&mut pieces);

            let age_ms = now.saturating_sub(region.age).as_millis() as u64;
            if age_ms >= HIGHLIGHT_DAMAGE_FADEOUT_MS || remaining.is_empty() {
                continue;
            }
            for r in &remaining {
                self.outputs[pos].damage.add_box(*r);
            }
            newer_union.push(region.region);
            survivors.push_front(HighlightRegion {
                region: region.region,
                age: region.age,
            });
        }
        self.outputs[pos].highlight_regions = survivors;
    }

    /// True if `id` can present its single visible buffer directly, without
    /// compositing. Requires the whole scene to reduce to exactly one
    /// buffer node whose bounds exactly fill the output's viewport,
    /// untransformed relative to the output, with no source-rect cropping.
    fn try_scanout(&mut self, id: SceneOutputId) -> bool {
        if self.debug_damage == DebugDamageMode::Highlight {
            return false;
        }
        let Some(pos) = self.outputs.iter().position(|o| o.id == id) else {
            return false;
        };
        let viewport = self.outputs[pos].viewport();
        let output_transform = self.outputs[pos].output.transform();

        let mut intersecting = 0u32;
        let mut sole_buffer: Option<(BufferId, std::rc::Rc<dyn crate::render::PlatformBuffer>)> =
            None;
        let root = self.root().node();
        self.collect_scanout_candidates(root, 0, 0, viewport, &mut intersecting, &mut sole_buffer);

        if intersecting != 1 {
            return false;
        }
        let Some((buffer_id, buffer)) = sole_buffer else {
            return false;
        };
        let b = self.node(buffer_id.node()).kind.as_buffer().unwrap();
        if !b.src_box.is_empty() || b.transform != output_transform {
            return false;
        }

        let out = &mut self.outputs[pos];
        if !out.output.attach_buffer(buffer.as_ref()) {
            return false;
        }
        if !out.output.test() {
            out.output.rollback();
            return false;
        }

        let mut present = std::mem::take(
            &mut self
                .node_opt_mut(buffer_id.node())
                .and_then(|n| n.kind.as_buffer_mut())
                .unwrap()
                .output_present,
        );
        present.emit(&id);
        if let Some(b) = self
            .node_opt_mut(buffer_id.node())
            .and_then(|n| n.kind.as_buffer_mut())
        {
            b.output_present = present;
        }
        true
    }

    /// Count every node whose bounds intersect `viewport` at all (rects
    /// included, since any of them disqualifies scan-out), and separately
    /// track the one buffer node — if any — whose bounds exactly equal
    /// `viewport`.
    fn collect_scanout_candidates(
        &self,
        node: NodeId,
        lx: i32,
        ly: i32,
        viewport: Box,
        intersecting: &mut u32,
        sole_buffer: &mut Option<(BufferId, std::rc::Rc<dyn crate::render::PlatformBuffer>)>,
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
            NodeKind::Tree(tree) => {
                for &child in &tree.children {
                    self.collect_scanout_candidates(
                        child,
                        lx,
                        ly,
                        viewport,
                        intersecting,
                        sole_buffer,
                    );
                }
            }
            NodeKind::Rect(_) => {
                let bounds = n.local_bounds().translated(lx, ly);
                if bounds.intersection(&viewport).is_some() {
                    *intersecting += 1;
                }
            }
            NodeKind::Buffer(b) => {
                let bounds = n.local_bounds().translated(lx, ly);
                let Some(intersection) = bounds.intersection(&viewport) else {
                    return;
                };
                *intersecting += 1;
                if intersection == viewport {
                    if let Some(buf) = &b.buffer {
                        *sole_buffer = Some((BufferId(node), buf.clone()));
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_subtree(
        &mut self,
        node: NodeId,
        lx: i32,
        ly: i32,
        damage: &[Box],
        output_scale: f64,
        frame: &mut dyn RendererFrame,
        output_id: SceneOutputId,
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
            NodeKind::Tree(tree) => {
                let children = tree.children.clone();
                for child in children {
                    self.render_subtree(child, lx, ly, damage, output_scale, frame, output_id);
                }
            }
            NodeKind::Rect(r) => {
                let dst = scale_box(Box::new(lx, ly, r.width, r.height), output_scale);
                if damage.iter().any(|d| dst.intersection(d).is_some()) {
                    frame.render_rect(dst, r.color);
                }
            }
            NodeKind::Buffer(b) => {
                let (width, height) = b.get_size();
                if width <= 0 || height <= 0 {
                    return;
                }
                let bounds = Box::new(lx, ly, width, height);
                let dst = scale_box(bounds, output_scale);
                if !damage.iter().any(|d| dst.intersection(d).is_some()) {
                    return;
                }
                let Some(texture) = &b.texture else {
                    return;
                };
                let src_box = if b.src_box.is_empty() {
                    FBox {
                        x: 0.0,
                        y: 0.0,
                        width: f64::from(texture.width()),
                        height: f64::from(texture.height()),
                    }
                } else {
                    b.src_box
                };
                frame.render_subtexture(texture.as_ref(), src_box, dst, b.transform.invert());

                let node_id = BufferId(node);
                let mut present = std::mem::take(
                    &mut self
                        .node_opt_mut(node_id.node())
                        .and_then(|n| n.kind.as_buffer_mut())
                        .unwrap()
                        .output_present,
                );
                present.emit(&output_id);
                if let Some(b) = self
                    .node_opt_mut(node_id.node())
                    .and_then(|n| n.kind.as_buffer_mut())
                {
                    b.output_present = present;
                }
            }
        }
    }

    /// Notify every enabled buffer node that a frame finished, but only
    /// once per buffer: a buffer visible on several outputs is notified
    /// only by its `primary_output` (the one with the largest overlap),
    /// mirroring the original's per-primary-output dedup.
    pub fn send_frame_done(&mut self, id: SceneOutputId, when: Duration) {
        let root = self.root().node();
        self.send_frame_done_subtree(root, id, when);
    }

    fn send_frame_done_subtree(&mut self, node: NodeId, id: SceneOutputId, when: Duration) {
        let Some(n) = self.node_opt(node) else {
            return;
        };
        if !n.header.enabled() {
            return;
        }
        match &n.kind {
            NodeKind::Tree(tree) => {
                let children = tree.children.clone();
                for child in children {
                    self.send_frame_done_subtree(child, id, when);
                }
            }
            NodeKind::Buffer(b) => {
                if b.primary_output == Some(id) {
                    let node_id = BufferId(node);
                    let mut done = std::mem::take(
                        &mut self
                            .node_opt_mut(node_id.node())
                            .and_then(|n| n.kind.as_buffer_mut())
                            .unwrap()
                            .frame_done,
                    );
                    done.emit(&when);
                    if let Some(b) = self
                        .node_opt_mut(node_id.node())
                        .and_then(|n| n.kind.as_buffer_mut())
                    {
                        b.frame_done = done;
                    }
                }
            }
            NodeKind::Rect(_) => {}
        }
    }
}

/// `a` minus `b`, as up to four non-overlapping rectangles (empty if `a` is
/// fully covered by `b`, just `[a]` if they don't overlap).
fn subtract_box(a: Box, b: Box) -> std::vec::Vec<Box> {
    let Some(i) = a.intersection(&b) else {
        return vec![a];
    };
    if i == a {
        return std::vec::Vec::new();
    }
    let mut out = std::vec::Vec::new();
    if i.y > a.y {
        out.push(Box::new(a.x, a.y, a.width, i.y - a.y));
    }
    let bottom = a.y + a.height;
    let i_bottom = i.y + i.height;
    if i_bottom < bottom {
        out.push(Box::new(a.x, i_bottom, a.width, bottom - i_bottom));
    }
    if i.x > a.x {
        out.push(Box::new(a.x, i.y, i.x - a.x, i.height));
    }
    let right = a.x + a.width;
    let i_right = i.x + i.width;
    if i_right < right {
        out.push(Box::new(i_right, i.y, right - i_right, i.height));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_box_disjoint_returns_whole() {
        let a = Box::new(0, 0, 10, 10);
        let b = Box::new(20, 20, 5, 5);
        assert_eq!(subtract_box(a, b), vec![a]);
    }

    #[test]
    fn subtract_box_full_cover_returns_empty() {
        let a = Box::new(0, 0, 10, 10);
        let b = Box::new(-5, -5, 20, 20);
        assert!(subtract_box(a, b).is_empty());
    }

    #[test]
    fn subtract_box_partial_overlap_returns_pieces() {
        let a = Box::new(0, 0, 10, 10);
        let b = Box::new(5, 0, 10, 10);
        let pieces = subtract_box(a, b);
        assert_eq!(pieces, vec![Box::new(0, 0, 5, 10)]);
    }
}
