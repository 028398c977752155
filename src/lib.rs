//! Minimal Vulkan graphics-context bring-up and teardown.
//!
//! [`backend::ContextBuilder`] walks a fixed sequence of stages from an
//! empty [`backend::GraphicsContext`] to a ready one, and
//! [`backend::teardown`] releases whatever was created, newest first.

pub mod backend;
pub mod config;
pub mod error;
pub mod window;

pub use error::{BuildError, GfxError};
