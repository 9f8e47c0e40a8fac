//! # The Squall WSI swapchain layer.
//!
//! Squall sits between a Vulkan driver and a compositor's buffer
//! queue and implements the window system integration swapchain on
//! top of it: the rotating set of compositor-backed images the
//! application renders into, along with the acquire/present state
//! machines and the fence plumbing that keep the GPU, the application
//! and the compositor from stepping on each other's buffers.
//!
//! The two external collaborators are abstracted behind traits:
//! * [`NativeWindow`] - the producer side of the compositor's buffer
//!   queue (dequeue/queue/cancel, parameter setters, frame timestamp
//!   queries).
//! * [`Driver`] - the GPU driver entry points the layer consumes
//!   (image creation aliasing a native buffer, dequeue-fence import,
//!   release-fence emission on present).
//!
//! ## Entry points
//!
//! The public surface mirrors the loader-dispatched WSI procedures.
//! Opaque handles carry the raw address of the object behind them, so
//! the handle-consuming procedures are unsafe: the caller vouches the
//! handle is live, exactly as a loader does.
//!
//! ```no_run
//! use squall as sq;
//! use ash::vk;
//! # fn demo(window: std::sync::Arc<dyn sq::NativeWindow>,
//! #         driver: std::sync::Arc<dyn sq::Driver>) -> Result<(), vk::Result> {
//! let dev = sq::Device::new(driver, None);
//! let surface = sq::create_surface(window, None)?;
//!
//! let info = sq::SwapchainCreateInfo::builder()
//!     .surface(surface)
//!     .min_image_count(2)
//!     .extent(800, 600)
//!     .present_mode(vk::PresentModeKHR::FIFO)
//!     .build();
//! let swapchain = unsafe { sq::create_swapchain(&dev, &info, None)? };
//!
//! let idx = unsafe {
//!     sq::acquire_next_image(&dev, swapchain, u64::MAX,
//!                            vk::Semaphore::null(), vk::Fence::null())?
//! };
//! // render, then:
//! let result = unsafe {
//!     sq::queue_present(&dev, vk::Queue::null(), sq::PresentInfo {
//!         wait_semaphores: &[],
//!         swapchains: &[swapchain],
//!         image_indices: &[idx],
//!         regions: None,
//!         times: None,
//!         results: None,
//!     })
//! };
//! # Ok(())
//! # }
//! ```
//!
//! ## Fence ownership
//!
//! Sync fences cross three ownership domains and every transfer is
//! encoded in a signature: the window hands us an owned dequeue fence,
//! the driver consumes the duplicate we make of it, and queue/cancel
//! hand ownership back to the window. Nothing is ever closed twice
//! and nothing leaks, including on the error paths.
//
// Austin Shafer - 2024

mod alloc;
mod driver;
mod entry;
mod fence;
mod surface;
mod swapchain;
mod timing;
mod transform;
mod window;


pub use driver::{
    Device, Driver, SwapchainImageCreateInfo, SwapchainImageUsageFlags, GRALLOC_USAGE_HW_RENDER,
    GRALLOC_USAGE_HW_TEXTURE, SWAPCHAIN_IMAGE_USAGE_FRONT_BUFFER,
};
pub use entry::{
    acquire_next_image, create_surface, create_swapchain, destroy_surface, destroy_swapchain,
    get_past_presentation_timing, get_refresh_cycle_duration, get_surface_capabilities,
    get_surface_formats, get_surface_present_modes, get_surface_support, get_swapchain_images,
    get_swapchain_status, queue_present, PresentInfo, PresentRegion,
};
pub use swapchain::{SwapchainCreateInfo, SwapchainCreateInfoBuilder};
pub use timing::{RefreshCycleDuration, MAX_TIMING_INFOS, MIN_NUM_FRAMES_AGO};
pub use transform::{invert_to_native, native_to_vk, supported_transforms};
pub use window::{
    DataSpace, FrameTimestamps, NativeBuffer, NativeRect, NativeWindow, PixelFormat, ScalingMode,
    WindowApi, WindowQuery, WindowResult, NUM_BUFFER_SLOTS, TRANSFORM_FLIP_H, TRANSFORM_FLIP_V,
    TRANSFORM_INVERSE_DISPLAY, TRANSFORM_ROT_180, TRANSFORM_ROT_270, TRANSFORM_ROT_90,
};

use ash::vk;

extern crate thiserror;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SquallError>;

/// Squall error codes
/// These signify that action should be taken by the app.
#[derive(Error, Eq, PartialEq, Debug)]
#[allow(non_camel_case_types)]
pub enum SquallError {
    #[error("Host allocation failure")]
    OUT_OF_HOST_MEMORY,
    #[error("Device allocation failure")]
    OUT_OF_DEVICE_MEMORY,
    #[error("A native window call failed")]
    INITIALIZATION_FAILED,
    #[error("The native window is already in use by another swapchain")]
    NATIVE_WINDOW_IN_USE,
    #[error("The swapchain is no longer active on its surface")]
    OUT_OF_DATE,
    #[error("The surface has been lost")]
    SURFACE_LOST,
    #[error("The device has been lost")]
    DEVICE_LOST,
    #[error("The driver returned a failure")]
    DRIVER(vk::Result),
}

impl From<vk::Result> for SquallError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => SquallError::OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => SquallError::OUT_OF_DEVICE_MEMORY,
            vk::Result::ERROR_INITIALIZATION_FAILED => SquallError::INITIALIZATION_FAILED,
            vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => SquallError::NATIVE_WINDOW_IN_USE,
            vk::Result::ERROR_OUT_OF_DATE_KHR => SquallError::OUT_OF_DATE,
            vk::Result::ERROR_SURFACE_LOST_KHR => SquallError::SURFACE_LOST,
            vk::Result::ERROR_DEVICE_LOST => SquallError::DEVICE_LOST,
            other => SquallError::DRIVER(other),
        }
    }
}

impl From<SquallError> for vk::Result {
    fn from(err: SquallError) -> Self {
        match err {
            SquallError::OUT_OF_HOST_MEMORY => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            SquallError::OUT_OF_DEVICE_MEMORY => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            SquallError::INITIALIZATION_FAILED => vk::Result::ERROR_INITIALIZATION_FAILED,
            SquallError::NATIVE_WINDOW_IN_USE => vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR,
            SquallError::OUT_OF_DATE => vk::Result::ERROR_OUT_OF_DATE_KHR,
            SquallError::SURFACE_LOST => vk::Result::ERROR_SURFACE_LOST_KHR,
            SquallError::DEVICE_LOST => vk::Result::ERROR_DEVICE_LOST,
            SquallError::DRIVER(result) => result,
        }
    }
}
