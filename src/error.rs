//! Error types shared by the render passes and the physics collaborator.
//!
//! Pass `draw` entry points never return these to the frame driver; they
//! log the failure and skip their contribution for the frame. The types exist
//! so that the device, the program cache and the target allocator can use `?`
//! internally.

use thiserror::Error;

/// Failures raised by a graphics device or by program generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// The generated source did not compile.
    #[error("Failed to compile program '{label}': {message}")]
    ProgramCompile { label: String, message: String },

    /// A template carried unbalanced or stray preprocessor directives.
    #[error("Preprocessor error in '{template}' at line {line}: {message}")]
    Preprocess {
        template: String,
        line: usize,
        message: String,
    },

    /// The device does not accept programs written in this language.
    #[error("Unsupported shader language '{0}'")]
    UnsupportedLanguage(String),

    /// A texture, target or buffer could not be created.
    #[error("Failed to create {kind} '{label}': {message}")]
    ResourceCreation {
        kind: &'static str,
        label: String,
        message: String,
    },

    /// A handle that is no longer (or never was) alive was used.
    #[error("Missing {kind}: {id}")]
    MissingResource { kind: &'static str, id: u32 },

    /// Reading a render target back to the CPU failed.
    #[error("Readback failed: {0}")]
    Readback(String),

    /// Acquiring the presentation surface failed.
    #[error("Surface error: {0}")]
    Surface(String),
}

/// Failures raised by the physics collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsError {
    /// The body handle refers to a destroyed body.
    #[error("Body not found (destroyed or never created)")]
    BodyNotFound,

    /// A static body cannot be moved by forces.
    #[error("Body has zero mass")]
    MasslessBody,
}

pub type Result<T> = std::result::Result<T, RenderError>;
