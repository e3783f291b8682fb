// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Scene: a retained-mode scene graph for a display-server
//! compositor.
//!
//! A [`Scene`] holds a tree of nodes — containers, solid-color rects, and
//! sampled client buffers — and the set of outputs it's presented on. As
//! nodes move, get reparented, or change visual content, the scene tracks
//! which regions of which outputs need repainting, and which outputs each
//! buffer is currently visible on.
//!
//! ## Where this fits
//!
//! This crate is the retained-mode core of a compositor's rendering path,
//! not a renderer or a backend. It owns node topology, damage accounting,
//! and output membership; a host compositor supplies the actual GPU/software
//! renderer and output objects by implementing [`Renderer`] and [`Output`].
//!
//! - Node tree: [`Scene::tree_create`], [`Scene::rect_create`],
//!   [`Scene::buffer_create`], and the handles [`TreeId`]/[`RectId`]/
//!   [`BufferId`] they return.
//! - Damage: [`Scene::damage_whole`], [`Scene::buffer_set_buffer_with_damage`],
//!   and the [`DamageRing`] trait each output supplies.
//! - Output membership: [`Scene::create_output`], [`Scene::handle_output_event`],
//!   and the `output_enter`/`output_leave`/`output_present` signals buffer
//!   nodes expose via [`Scene::on_output_enter`] and friends.
//! - Commit: [`Scene::commit_output`] runs the scan-out-or-composite pipeline
//!   for one output per frame.
//!
//! ## Debug damage visualization
//!
//! Set `WLR_SCENE_DEBUG_DAMAGE` to `rerender` (repaint the whole output every
//! frame) or `highlight` (repaint only damaged regions, but also overlay a
//! fading red rectangle over what just changed) to help diagnose incorrect
//! or excessive damage. Unset or `none` is normal operation.

mod commit;
mod damage;
mod error;
mod geometry;
mod node;
mod output;
mod render;
mod scene;

pub use damage::{DamageRing, FifoDamageRing};
pub use error::SceneError;
pub use geometry::{
    point, scale_box, scale_box_xy, scale_length, transform_box, Box, FBox, Transform,
};
pub use node::{AddonKey, BufferId, NodeFlags, NodeId, PointAcceptsInput, RectId, Signal, TreeId};
pub use output::{Output, OutputCommitFields, OutputEvent, SceneOutputId};
pub use render::{
    ClientBufferCache, PlatformBuffer, PresentationFeedback, Renderer, RendererFrame, Texture,
};
pub use scene::{DebugDamageMode, Scene};
