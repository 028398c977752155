// Error kinds for graphics bring-up
//
// Every fallible stage of context construction maps its failure onto one of
// these kinds. The builder wraps the kind together with the stage that was
// being attempted so the caller knows where bring-up stopped.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::context::BuildStage;

/// Failure kinds surfaced by the graphics core
#[derive(Debug, Error)]
pub enum GfxError {
    /// A required validation layer or extension is not offered by the driver
    #[error("required {kind} `{name}` is not available")]
    ExtensionOrLayerUnavailable { kind: &'static str, name: String },

    /// No physical device scored above zero
    #[error("no suitable GPU found")]
    NoSuitableDevice,

    /// The selected device exposes no usable graphics + present families
    #[error("no queue family supports graphics and presentation")]
    NoQueueFamily,

    /// A native call returned a non-success code
    #[error("Vulkan call failed: {0}")]
    ApiCallFailed(vk::Result),

    /// The window could not be turned into a presentation surface
    #[error("failed to create presentation surface: {0}")]
    SurfaceCreationFailed(String),

    /// Shader source could not be turned into usable bytecode
    #[error("shader compilation failed for {path:?}: {reason}")]
    ShaderCompilationFailed { path: PathBuf, reason: String },
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        GfxError::ApiCallFailed(result)
    }
}

/// Construction failure carrying the stage that failed
#[derive(Debug, Error)]
#[error("graphics bring-up failed at {stage:?}: {source}")]
pub struct BuildError {
    pub stage: BuildStage,
    pub source: GfxError,
}

impl BuildError {
    pub fn new(stage: BuildStage, source: impl Into<GfxError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

pub type Result<T, E = GfxError> = std::result::Result<T, E>;
