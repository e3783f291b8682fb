// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for the few operations that fail recoverably.
//!
//! Most contract violations in this crate (destroying an already-destroyed
//! node twice, reparenting a node under its own descendant) panic: they are
//! programming errors, not conditions a caller is expected to handle. The
//! one documented exception is creating a 65th scene-output, which returns
//! `Result` because an output count is runtime data a compositor cannot
//! always bound in advance.

use std::fmt;

/// Errors a [`crate::Scene`] method can return.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SceneError {
    /// [`crate::Scene::create_output`] was called with all 64 output-index
    /// slots already assigned.
    TooManyOutputs,
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyOutputs => {
                write!(f, "scene already has the maximum of 64 outputs")
            }
        }
    }
}

impl std::error::Error for SceneError {}
