// Surface state for one native window
//
// A surface wraps the producer end of a compositor buffer queue and
// remembers which swapchain currently owns the window. Capabilities,
// formats and present modes are fixed properties of the window system,
// so most of the query surface is hardcoded tables.
//
// Austin Shafer - 2024
use ash::vk;

use crate::transform;
use crate::window::{NativeWindow, WindowApi, WindowQuery};
use crate::{Result, SquallError};
use utils::log;

pub struct Surface {
    /// Strong reference to the native window
    pub(crate) s_window: std::sync::Arc<dyn NativeWindow>,
    /// The currently active swapchain, or null.
    ///
    /// This is a weak identity: acquire and present compare against it
    /// to detect that they have been orphaned, but nothing ever
    /// dereferences through it.
    pub(crate) s_swapchain: vk::SwapchainKHR,
}

impl Surface {
    pub(crate) fn new(window: std::sync::Arc<dyn NativeWindow>) -> Self {
        Self {
            s_window: window,
            s_swapchain: vk::SwapchainKHR::null(),
        }
    }

    /// Connect the graphics API to the window's buffer queue.
    pub(crate) fn connect(&mut self) -> Result<()> {
        if let Err(e) = self.s_window.api_connect(WindowApi::Egl) {
            log::error!("api_connect failed: {:?}", e);
            return Err(SquallError::INITIALIZATION_FAILED);
        }
        Ok(())
    }

    /// Disconnect from the window. Any swapchain still active at this
    /// point is the caller's bug; it is logged but not freed here,
    /// since swapchains must be destroyed before their surface.
    pub(crate) fn disconnect(&mut self) {
        let _ = self.s_window.api_disconnect(WindowApi::Egl);
        if self.s_swapchain != vk::SwapchainKHR::null() {
            log::debug!(
                "destroyed surface still has active swapchain {:?}",
                self.s_swapchain
            );
        }
    }

    /// Build the surface capabilities from the window's current state.
    pub(crate) fn capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        let width = self.query_or_log(WindowQuery::DefaultWidth)?;
        let height = self.query_or_log(WindowQuery::DefaultHeight)?;
        let transform_hint = self.query_or_log(WindowQuery::TransformHint)?;

        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: width as u32,
                height: height as u32,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: transform::supported_transforms(),
            current_transform: transform::native_to_vk(transform_hint as u32),
            // Window composition is a compositor property, not
            // something associated with the buffer queue. It can't be
            // changed from here.
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::INHERIT,
            supported_usage_flags: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::INPUT_ATTACHMENT,
        })
    }

    fn query_or_log(&self, what: WindowQuery) -> Result<i32> {
        self.s_window.query(what).map_err(|e| {
            log::error!("{:?} query failed: {:?}", what, e);
            SquallError::INITIALIZATION_FAILED
        })
    }
}

/// The formats the window system can back with buffers.
pub(crate) fn surface_formats() -> [vk::SurfaceFormatKHR; 3] {
    [
        vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
        vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
        vk::SurfaceFormatKHR {
            format: vk::Format::R5G6B5_UNORM_PACK16,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    ]
}

pub(crate) fn present_modes() -> [vk::PresentModeKHR; 4] {
    [
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::FIFO,
        vk::PresentModeKHR::SHARED_DEMAND_REFRESH,
        vk::PresentModeKHR::SHARED_CONTINUOUS_REFRESH,
    ]
}
