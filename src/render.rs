// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collaborator traits the commit pipeline renders and samples through.
//!
//! This crate owns no GPU or software rasterizer of its own — it drives one
//! through these traits, the way the original drives a `wlr_renderer`
//! vtable. A host compositor implements them against whatever backend it
//! has (Vulkan, GLES, pixman, ...).

use crate::geometry::{Box, FBox, Transform};

/// An opaque client buffer, reference-counted since the scene and the
/// renderer's texture cache both hold onto it for the buffer's lifetime.
pub trait PlatformBuffer {
    /// Width in pixels, prior to any scene-side transform or scaling.
    fn width(&self) -> i32;
    /// Height in pixels, prior to any scene-side transform or scaling.
    fn height(&self) -> i32;
}

/// A renderer-owned texture sampled from a [`PlatformBuffer`].
pub trait Texture {
    /// Width in pixels.
    fn width(&self) -> i32;
    /// Height in pixels.
    fn height(&self) -> i32;
}

/// Caches the renderer-side [`Texture`] for a [`PlatformBuffer`], so a
/// buffer re-submitted across frames without changing content doesn't pay
/// for re-upload.
pub trait ClientBufferCache {
    /// Return a cached texture for `buffer`, uploading it first if this is
    /// the first time this buffer has been seen.
    fn client_buffer_get(
        &mut self,
        buffer: &dyn PlatformBuffer,
    ) -> Option<std::rc::Rc<dyn Texture>>;
}

/// A single render pass over one output's frame buffer.
///
/// Obtained from [`Renderer::begin`] and consumed by [`Renderer::end`]; the
/// commit pipeline calls `clear`/`scissor`/`render_rect`/`render_subtexture`
/// in between to paint the damaged region.
pub trait RendererFrame {
    /// Restrict subsequent draw calls to `region`, in output-buffer pixels.
    fn scissor(&mut self, region: Option<Box>);
    /// Fill the current scissor region with a solid color.
    fn clear(&mut self, color: [f32; 4]);
    /// Paint a solid-color quad (a rect node).
    fn render_rect(&mut self, dst: Box, color: [f32; 4]);
    /// Sample `src_box` of `texture`, transformed by `transform`, into
    /// `dst` (a buffer node).
    fn render_subtexture(
        &mut self,
        texture: &dyn Texture,
        src_box: FBox,
        dst: Box,
        transform: Transform,
    );
}

/// Begins and ends render passes, and turns client buffers into textures.
pub trait Renderer {
    /// The concrete frame type this renderer hands out from `begin`.
    type Frame<'a>: RendererFrame
    where
        Self: 'a;

    /// Start a render pass over an output-sized frame buffer.
    fn begin(&mut self, width: i32, height: i32) -> Self::Frame<'_>;
    /// Finish a render pass, submitting its draw calls.
    fn end(&mut self, frame: Self::Frame<'_>);
    /// Upload `buffer` into a renderer-owned texture.
    fn texture_from_buffer(&mut self, buffer: &dyn PlatformBuffer) -> std::rc::Rc<dyn Texture>;
    /// Release a renderer-owned texture, e.g. when its buffer is replaced.
    fn texture_destroy(&mut self, texture: std::rc::Rc<dyn Texture>);
}

/// An optional observer a host attaches to a buffer node to learn when a
/// frame it contributed to was actually presented, for frame-timing
/// protocols layered on top of this crate.
pub trait PresentationFeedback {
    /// Called once the output this buffer contributed to has presented.
    fn presented(&self, output: crate::output::SceneOutputId, when: std::time::Duration);
    /// Tear down this feedback object, e.g. because its buffer was replaced
    /// before ever being presented.
    fn destroy(&self);
}
