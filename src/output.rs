// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Output membership: which outputs a buffer node's bounds currently
//! intersect, which one is "primary", and the collaborator trait a host's
//! output object implements to participate in the commit pipeline.

use crate::damage::DamageRing;
use crate::geometry::{Box, Transform};
use crate::node::Signal;
use crate::render::RendererFrame;

/// A handle to an output registered with a [`crate::Scene`] via
/// [`crate::Scene::create_output`].
///
/// Wraps the output's assigned bit index (`0..64`, the position it occupies
/// in every buffer node's `active_outputs` mask) plus a generation so a
/// stale handle can't alias a different output after the index is reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SceneOutputId {
    pub(crate) index: u8,
    pub(crate) generation: u32,
}

impl SceneOutputId {
    /// This output's bit position in `active_outputs` masks.
    pub const fn index(self) -> u8 {
        self.index
    }
}

bitflags::bitflags! {
    /// Which state an output's commit actually changed, mirroring
    /// `WLR_OUTPUT_STATE_*`: a named, fixed set of bits (unlike
    /// `active_outputs`, which assigns bits dynamically per output index).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OutputCommitFields: u32 {
        /// The output's attached buffer changed.
        const BUFFER = 1 << 0;
        /// The output's damage region changed.
        const DAMAGE = 1 << 1;
        /// The output's mode (pixel dimensions) changed.
        const MODE = 1 << 2;
        /// The output's transform changed.
        const TRANSFORM = 1 << 3;
        /// The output's scale changed.
        const SCALE = 1 << 4;
    }
}

/// An event a host forwards from its own output object into
/// [`crate::Scene::handle_output_event`].
///
/// The scene doesn't subscribe to a host's output signals itself (it has no
/// visibility into the host's event system); instead the host pushes the
/// two events that matter for output membership: a commit that changed
/// mode/transform/scale, or a mode change outside of a commit.
#[derive(Copy, Clone, Debug)]
pub enum OutputEvent {
    /// The output committed; `fields` names what changed.
    Commit {
        /// Which state changed in this commit.
        fields: OutputCommitFields,
    },
    /// The output's mode changed outside of a tracked commit.
    Mode,
}

/// A display output a host registers with a [`crate::Scene`].
///
/// Method names and grouping follow the operations `spec.md` lists for this
/// collaborator: geometry queries the commit pipeline needs every frame,
/// plus the attach/test/commit/rollback sequence a `wlr_output` exposes.
pub trait Output {
    /// Output-local logical resolution after transform and scale are
    /// applied — the size used for output-membership intersection tests.
    fn effective_resolution(&self) -> (i32, i32);
    /// Output-local physical resolution before `transform` is applied, used
    /// to map output-buffer-space damage back into the pre-transform frame
    /// the host's `set_damage` expects.
    fn transformed_resolution(&self) -> (i32, i32);
    /// This output's current transform.
    fn transform(&self) -> Transform;
    /// This output's current scale factor.
    fn scale(&self) -> f64;
    /// Attempt to attach `buffer` directly for scan-out, without
    /// compositing. Returns `false` if the backend can't scan it out as-is.
    fn attach_buffer(&mut self, buffer: &dyn crate::render::PlatformBuffer) -> bool;
    /// Validate the currently-attached state without presenting it.
    fn test(&mut self) -> bool;
    /// Present the currently-attached state.
    fn commit(&mut self) -> bool;
    /// Discard the currently-attached state without presenting it.
    fn rollback(&mut self);
    /// Tell the backend which regions of the next frame actually changed.
    fn set_damage(&mut self, damage: &[Box]);
    /// Ask the backend to schedule another frame callback.
    fn schedule_frame(&mut self);
    /// Paint any backend-managed software cursors over the rendered frame.
    fn render_software_cursors(&mut self, frame: &mut dyn RendererFrame, damage: &[Box]);
}

/// Engine-internal bookkeeping for one registered output: its collaborator,
/// position, and per-output debug-damage/scan-out state.
pub(crate) struct SceneOutput {
    pub(crate) id: SceneOutputId,
    pub(crate) output: std::boxed::Box<dyn Output>,
    pub(crate) damage: std::boxed::Box<dyn DamageRing>,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) prev_scanout: bool,
    pub(crate) destroy: Signal<SceneOutputId>,
    pub(crate) highlight_regions: std::collections::VecDeque<crate::commit::HighlightRegion>,
}

impl SceneOutput {
    /// This output's viewport in scene (layout) coordinates.
    pub(crate) fn viewport(&self) -> Box {
        let (w, h) = self.output.effective_resolution();
        Box::new(self.x, self.y, w, h)
    }
}

/// First unused bit index in `0..64`, or `None` if all are taken.
///
/// Mirrors the original's gap-scan over its sorted output list: both pick
/// the smallest available index, so a destroyed output's slot is reused by
/// the next one created rather than indices growing unbounded.
pub(crate) fn next_free_index(used: &[SceneOutputId]) -> Option<u8> {
    (0u8..64).find(|candidate| !used.iter().any(|id| id.index == *candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_free_index_fills_gaps_ascending() {
        let used = [
            SceneOutputId {
                index: 0,
                generation: 0,
            },
            SceneOutputId {
                index: 2,
                generation: 0,
            },
        ];
        assert_eq!(next_free_index(&used), Some(1));
    }

    #[test]
    fn next_free_index_none_when_full() {
        let used: std::vec::Vec<SceneOutputId> = (0u8..64)
            .map(|index| SceneOutputId {
                index,
                generation: 0,
            })
            .collect();
        assert_eq!(next_free_index(&used), None);
    }
}
