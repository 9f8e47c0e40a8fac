// Native window transform <-> Vulkan surface transform codec
//
// Austin Shafer - 2024
use ash::vk;

use crate::window;

/// The transforms we report in the surface capabilities.
///
/// Native and Vulkan transforms are isomorphic, but are represented
/// differently. Vulkan transforms are built up of an optional horizontal
/// mirror, followed by a clockwise 0/90/180/270-degree rotation. Native
/// transforms are built up from a horizontal flip, vertical flip, and
/// 90-degree rotation, all optional but always in that order.
///
/// Only the pure rotations are supported. The mirror variants never
/// make it past the capability query, so the codec below does not have
/// to handle them.
pub fn supported_transforms() -> vk::SurfaceTransformFlagsKHR {
    vk::SurfaceTransformFlagsKHR::IDENTITY
        | vk::SurfaceTransformFlagsKHR::ROTATE_90
        | vk::SurfaceTransformFlagsKHR::ROTATE_180
        | vk::SurfaceTransformFlagsKHR::ROTATE_270
        | vk::SurfaceTransformFlagsKHR::INHERIT
}

/// Translate a native window transform into the Vulkan equivalent.
///
/// Anything we don't recognize (including the inverse-display bit)
/// collapses to identity.
pub fn native_to_vk(native: u32) -> vk::SurfaceTransformFlagsKHR {
    match native {
        0 => vk::SurfaceTransformFlagsKHR::IDENTITY,
        window::TRANSFORM_ROT_180 => vk::SurfaceTransformFlagsKHR::ROTATE_180,
        window::TRANSFORM_ROT_90 => vk::SurfaceTransformFlagsKHR::ROTATE_90,
        window::TRANSFORM_ROT_270 => vk::SurfaceTransformFlagsKHR::ROTATE_270,
        // TRANSFORM_INVERSE_DISPLAY and friends
        _ => vk::SurfaceTransformFlagsKHR::IDENTITY,
    }
}

/// Get the native rotation that cancels out `transform`.
///
/// The application renders with the pre-transform applied, and the
/// compositor is asked for the inverse so that the composed result
/// comes out identity.
pub fn invert_to_native(transform: vk::SurfaceTransformFlagsKHR) -> u32 {
    match transform {
        vk::SurfaceTransformFlagsKHR::ROTATE_90 => window::TRANSFORM_ROT_270,
        vk::SurfaceTransformFlagsKHR::ROTATE_180 => window::TRANSFORM_ROT_180,
        vk::SurfaceTransformFlagsKHR::ROTATE_270 => window::TRANSFORM_ROT_90,
        // identity and inherit, and anything unrecognized
        _ => 0,
    }
}
