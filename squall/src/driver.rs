// GPU driver interface
//
// These are the driver entry points the swapchain layer consumes:
// creating images that alias window buffers, wiring dequeue fences
// into the driver's sync machinery, and emitting release fences on
// present.
//
// Austin Shafer - 2024
use ash::vk;

use crate::alloc::HostAllocator;
use crate::window::NativeBuffer;

use std::os::unix::io::OwnedFd;
use std::sync::Arc;

// Fallback gralloc usage when the driver exposes neither usage query
pub const GRALLOC_USAGE_HW_TEXTURE: u64 = 0x100;
pub const GRALLOC_USAGE_HW_RENDER: u64 = 0x200;

pub type SwapchainImageUsageFlags = u32;
/// The image will be scanned out while the application still owns it
pub const SWAPCHAIN_IMAGE_USAGE_FRONT_BUFFER: SwapchainImageUsageFlags = 0x1;

/// Create-info for a driver image that aliases a window buffer.
///
/// This carries both the usual image parameters and the native buffer
/// the image must alias, with its gralloc handle, stride, format and
/// usage.
pub struct SwapchainImageCreateInfo<'a> {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: &'a [u32],
    pub swapchain_usage: SwapchainImageUsageFlags,
    pub buffer: &'a Arc<NativeBuffer>,
}

/// The GPU driver vtable.
///
/// `acquire_image` always consumes the fence it is handed, success or
/// failure; the caller must never close it. That contract is encoded
/// by taking the fence by value.
///
/// The gralloc usage queries are optional driver entry points; the
/// default implementations report them as absent.
pub trait Driver {
    fn create_image(&self, info: &SwapchainImageCreateInfo) -> Result<vk::Image, vk::Result>;

    fn destroy_image(&self, image: vk::Image);

    /// Import the dequeue fence for `image`, signalling `semaphore`
    /// and `signal_fence` once the compositor is done reading it.
    fn acquire_image(
        &self,
        image: vk::Image,
        fence: Option<OwnedFd>,
        semaphore: vk::Semaphore,
        signal_fence: vk::Fence,
    ) -> Result<(), vk::Result>;

    /// Emit a release fence that signals after `wait_semaphores`, once
    /// the GPU is done writing `image`. The fence gates compositor
    /// consumption of the buffer.
    fn queue_signal_release_image(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image: vk::Image,
    ) -> Result<Option<OwnedFd>, vk::Result>;

    /// Gralloc usage bits for a (format, usage) pair. v2 is preferred
    /// and also considers the swapchain image usage.
    fn swapchain_gralloc_usage2(
        &self,
        _format: vk::Format,
        _image_usage: vk::ImageUsageFlags,
        _swapchain_usage: SwapchainImageUsageFlags,
    ) -> Option<Result<u64, vk::Result>> {
        None
    }

    fn swapchain_gralloc_usage(
        &self,
        _format: vk::Format,
        _image_usage: vk::ImageUsageFlags,
    ) -> Option<Result<u64, vk::Result>> {
        None
    }
}

/// Per-device state for the swapchain layer: the driver vtable and the
/// allocator used when an entry point isn't handed one.
pub struct Device {
    pub(crate) d_driver: Arc<dyn Driver>,
    pub(crate) d_alloc: HostAllocator,
}

impl Device {
    pub fn new(driver: Arc<dyn Driver>, allocator: Option<&vk::AllocationCallbacks>) -> Self {
        Self {
            d_driver: driver,
            d_alloc: HostAllocator::from_callbacks(allocator),
        }
    }
}
