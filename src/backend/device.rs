// Physical device selection
//
// Responsibilities:
// - Rate candidate GPUs against the required features and extensions
// - Map a candidate's queue families onto graphics / present roles
//
// Everything here works on immutable snapshots taken by the backend, so the
// selection rules can be exercised without a GPU.

use ash::vk;
use std::collections::HashSet;

use super::swapchain::SwapchainSupport;
use crate::error::{GfxError, Result};

/// Flat bonus for a discrete GPU over any other device class
pub const DISCRETE_GPU_BONUS: u64 = 1000;

/// Snapshot of one queue family on a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilySnapshot {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Whether this family can present to the context's surface
    pub present_supported: bool,
}

/// Immutable description of one available GPU
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
    pub extensions: Vec<String>,
    pub queue_families: Vec<QueueFamilySnapshot>,
    /// Present only when the candidate was queried against a surface
    pub swapchain_support: Option<SwapchainSupport>,
}

/// Hard requirements a device must meet to score above zero
#[derive(Debug, Clone, Default)]
pub struct DeviceRequirements {
    pub geometry_shader: bool,
    pub extensions: Vec<String>,
}

impl DeviceRequirements {
    /// Required extensions the candidate does not offer
    pub fn missing_extensions<'a>(&'a self, candidate: &PhysicalDeviceCandidate) -> Vec<&'a str> {
        let available: HashSet<&str> = candidate.extensions.iter().map(String::as_str).collect();
        self.extensions
            .iter()
            .map(String::as_str)
            .filter(|name| !available.contains(name))
            .collect()
    }
}

/// Rate a candidate. Zero means rejected.
pub fn score(candidate: &PhysicalDeviceCandidate, requirements: &DeviceRequirements) -> u64 {
    if requirements.geometry_shader && !candidate.geometry_shader {
        log::debug!("{}: rejected, no geometry shader support", candidate.name);
        return 0;
    }

    let missing = requirements.missing_extensions(candidate);
    if !missing.is_empty() {
        log::debug!("{}: rejected, missing extensions {:?}", candidate.name, missing);
        return 0;
    }

    if let Some(support) = &candidate.swapchain_support {
        if support.formats.is_empty() || support.present_modes.is_empty() {
            log::debug!("{}: rejected, inadequate swapchain support", candidate.name);
            return 0;
        }
    }

    if QueueFamilyIndices::resolve(candidate).is_err() {
        log::debug!("{}: rejected, no graphics/present queue families", candidate.name);
        return 0;
    }

    let mut score = 0;
    if candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_GPU_BONUS;
    }
    score += u64::from(candidate.max_image_dimension_2d);
    score
}

/// Pick the strictly best-scoring candidate; ties go to the first one seen
pub fn select_physical_device<'a>(
    candidates: &'a [PhysicalDeviceCandidate],
    requirements: &DeviceRequirements,
) -> Result<(&'a PhysicalDeviceCandidate, ResolvedQueueFamilies)> {
    let mut best: Option<(&PhysicalDeviceCandidate, u64)> = None;

    for candidate in candidates {
        let score = score(candidate, requirements);
        log::debug!("Candidate {} ({:?}) scored {}", candidate.name, candidate.device_type, score);

        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    let (candidate, _) = best.ok_or(GfxError::NoSuitableDevice)?;
    let families = QueueFamilyIndices::resolve(candidate)?;
    Ok((candidate, families))
}

/// Queue family roles found on a device; either may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan every family in index order.
    ///
    /// The first graphics-capable family wins the graphics role. The present
    /// role prefers that same family and otherwise goes to the first family
    /// that can present, wherever it sits in the list.
    pub fn scan(families: &[QueueFamilySnapshot]) -> Self {
        let mut indices = Self::default();
        let mut first_present = None;

        for (index, family) in (0u32..).zip(families) {
            if indices.graphics.is_none() && family.flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
                if family.present_supported {
                    indices.present = Some(index);
                }
            }
            if first_present.is_none() && family.present_supported {
                first_present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        if indices.present.is_none() {
            indices.present = first_present;
        }
        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Resolve both roles for a candidate or fail with `NoQueueFamily`
    pub fn resolve(candidate: &PhysicalDeviceCandidate) -> Result<ResolvedQueueFamilies> {
        match Self::scan(&candidate.queue_families) {
            Self {
                graphics: Some(graphics),
                present: Some(present),
            } => Ok(ResolvedQueueFamilies { graphics, present }),
            _ => Err(GfxError::NoQueueFamily),
        }
    }
}

/// Both queue roles, guaranteed set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl ResolvedQueueFamilies {
    /// One entry per distinct family, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Distinct families force concurrent image sharing
    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.graphics == self.present {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        }
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
