// Swapchain state: compositor buffers aliased by driver images
//
// A swapchain dequeues every buffer of its window once at creation,
// asks the driver for an image aliasing each one, then hands the
// buffers back. At runtime acquire re-dequeues a buffer and maps it
// back to its slot, and present queues it to the compositor with the
// driver's release fence attached.
//
// Austin Shafer - 2024
use ash::vk;
use nix::errno::Errno;

use std::os::unix::io::OwnedFd;
use std::sync::Arc;

use crate::driver::{
    Device, SwapchainImageCreateInfo, GRALLOC_USAGE_HW_RENDER, GRALLOC_USAGE_HW_TEXTURE,
    SWAPCHAIN_IMAGE_USAGE_FRONT_BUFFER,
};
use crate::fence;
use crate::surface::Surface;
use crate::timing::{RefreshCycleDuration, TimingStore};
use crate::transform;
use crate::window::{
    self, DataSpace, NativeBuffer, NativeWindow, PixelFormat, ScalingMode, WindowApi, WindowQuery,
};
use crate::{Result, SquallError};
use utils::log;

/// Swapchain creation parameters
pub struct SwapchainCreateInfo {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

impl SwapchainCreateInfo {
    pub fn builder() -> SwapchainCreateInfoBuilder {
        SwapchainCreateInfoBuilder {
            ci: SwapchainCreateInfo {
                surface: vk::SurfaceKHR::null(),
                min_image_count: 2,
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                extent: vk::Extent2D {
                    width: 0,
                    height: 0,
                },
                array_layers: 1,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                queue_family_indices: Vec::new(),
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                composite_alpha: vk::CompositeAlphaFlagsKHR::INHERIT,
                present_mode: vk::PresentModeKHR::FIFO,
                old_swapchain: vk::SwapchainKHR::null(),
            },
        }
    }
}

/// Implements the builder pattern for easier swapchain creation
pub struct SwapchainCreateInfoBuilder {
    ci: SwapchainCreateInfo,
}

impl SwapchainCreateInfoBuilder {
    pub fn surface(mut self, surface: vk::SurfaceKHR) -> Self {
        self.ci.surface = surface;
        self
    }

    pub fn min_image_count(mut self, count: u32) -> Self {
        self.ci.min_image_count = count;
        self
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.ci.format = format;
        self
    }

    pub fn color_space(mut self, color_space: vk::ColorSpaceKHR) -> Self {
        self.ci.color_space = color_space;
        self
    }

    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.ci.extent = vk::Extent2D { width, height };
        self
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.ci.usage = usage;
        self
    }

    pub fn sharing_mode(mut self, mode: vk::SharingMode) -> Self {
        self.ci.sharing_mode = mode;
        self
    }

    pub fn queue_family_indices(mut self, indices: &[u32]) -> Self {
        self.ci.queue_family_indices = indices.to_vec();
        self
    }

    pub fn pre_transform(mut self, transform: vk::SurfaceTransformFlagsKHR) -> Self {
        self.ci.pre_transform = transform;
        self
    }

    pub fn present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.ci.present_mode = mode;
        self
    }

    pub fn old_swapchain(mut self, old: vk::SwapchainKHR) -> Self {
        self.ci.old_swapchain = old;
        self
    }

    pub fn build(self) -> SwapchainCreateInfo {
        self.ci
    }
}

pub(crate) fn is_shared_present_mode(mode: vk::PresentModeKHR) -> bool {
    mode == vk::PresentModeKHR::SHARED_DEMAND_REFRESH
        || mode == vk::PresentModeKHR::SHARED_CONTINUOUS_REFRESH
}

/// One compositor buffer paired with the driver image aliasing it
pub(crate) struct ImageSlot {
    /// the driver's image, or null
    pub(crate) sl_image: vk::Image,
    /// strong reference to the queue buffer this image aliases
    pub(crate) sl_buffer: Option<Arc<NativeBuffer>>,
    /// The fence is only present while the buffer is dequeued. We own
    /// the fd and must ensure it gets closed: either by dropping it
    /// when queueing the buffer, or by passing ownership to
    /// cancel_buffer.
    pub(crate) sl_dequeue_fence: Option<OwnedFd>,
    pub(crate) sl_dequeued: bool,
}

/// Return a slot's resources.
///
/// On every path exactly one party ends up closing or owning each fd
/// the slot held: the window consumes whatever fence we cancel with,
/// and fences that have nowhere to go are waited out and dropped.
pub(crate) fn release_swapchain_image(
    dev: &Device,
    window: Option<&Arc<dyn NativeWindow>>,
    mut release_fence: Option<OwnedFd>,
    slot: &mut ImageSlot,
) {
    if slot.sl_dequeued {
        let dequeue_fence = slot.sl_dequeue_fence.take();
        // With a release fence the application has already chained
        // acquire to present, so the dequeue fence can simply be
        // dropped. Without one (destruction, present-path errors) the
        // dequeue fence is the best stand-in available.
        let fence = match release_fence.take() {
            Some(f) => Some(f),
            None => dequeue_fence,
        };

        match window {
            Some(win) => {
                if let Some(buf) = slot.sl_buffer.as_ref() {
                    // the window consumes the fence, success or failure
                    if let Err(e) = win.cancel_buffer(buf, fence) {
                        log::error!("cancelBuffer failed: {:?}", e);
                    }
                }
            }
            None => {
                // No window to hand the fence to; waiting it out on
                // the CPU before closing is the best we can do.
                if let Some(f) = fence.as_ref() {
                    fence::wait_fence(f);
                }
            }
        }

        slot.sl_dequeued = false;
    }

    if slot.sl_image != vk::Image::null() {
        dev.d_driver.destroy_image(slot.sl_image);
        slot.sl_image = vk::Image::null();
    }

    slot.sl_buffer = None;
}

pub struct Swapchain {
    /// Handle of the owning surface. Identity for the active-swapchain
    /// check; the entry points are the ones that turn it back into an
    /// object.
    pub(crate) sc_surface: vk::SurfaceKHR,
    pub(crate) sc_window: Arc<dyn NativeWindow>,
    pub(crate) sc_slots: Vec<ImageSlot>,
    /// display refresh period, queried once at creation
    pub(crate) sc_refresh: RefreshCycleDuration,
    pub(crate) sc_frame_timestamps_enabled: bool,
    pub(crate) sc_timing: TimingStore,
}

fn win_err(call: &str, e: Errno) -> SquallError {
    log::error!("{} failed: {:?}", call, e);
    SquallError::INITIALIZATION_FAILED
}

impl Swapchain {
    /// Reset and configure the window, compute the slot count, then
    /// dequeue every buffer and create a driver image for each.
    ///
    /// Every failure path cancels whatever was dequeued and destroys
    /// whatever images were created, so the caller only has to free
    /// the swapchain itself.
    pub(crate) fn new(dev: &Device, surface: &Surface, info: &SwapchainCreateInfo) -> Result<Self> {
        let window = surface.s_window.clone();

        // -- Reset the native window --
        // The window may carry state from a previous swapchain, which
        // would corrupt the MIN_UNDEQUEUED_BUFFERS query below. The
        // queue also only lets us dequeue all buffers before any have
        // been queued; disconnecting orphans the old buffers and gets
        // us back to that state.
        if let Err(e) = window.api_disconnect(WindowApi::Egl) {
            log::debug!("api_disconnect failed during window reset: {:?}", e);
        }
        if let Err(e) = window.api_connect(WindowApi::Egl) {
            log::debug!("api_connect failed during window reset: {:?}", e);
        }
        window
            .set_buffer_count(0)
            .map_err(|e| win_err("set_buffer_count(0)", e))?;
        window
            .set_swap_interval(1)
            .map_err(|e| win_err("set_swap_interval(1)", e))?;
        window
            .set_shared_buffer_mode(false)
            .map_err(|e| win_err("set_shared_buffer_mode(false)", e))?;
        window
            .set_auto_refresh(false)
            .map_err(|e| win_err("set_auto_refresh(false)", e))?;

        // -- Configure the native window --
        let native_format = match info.format {
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => PixelFormat::Rgba8888,
            vk::Format::R5G6B5_UNORM_PACK16 => PixelFormat::Rgb565,
            other => {
                log::debug!("unsupported swapchain format {:?}", other);
                PixelFormat::Rgba8888
            }
        };
        window
            .set_buffers_format(native_format)
            .map_err(|e| win_err("set_buffers_format", e))?;
        window
            .set_buffers_data_space(DataSpace::SrgbLinear)
            .map_err(|e| win_err("set_buffers_data_space", e))?;
        window
            .set_buffers_dimensions(info.extent.width as i32, info.extent.height as i32)
            .map_err(|e| win_err("set_buffers_dimensions", e))?;

        // The pre-transform is the transform the application rendered
        // with. The window wants the inverse: the compositor applies
        // it during composition and the two cancel out, leaving the
        // composed result identity.
        window
            .set_buffers_transform(transform::invert_to_native(info.pre_transform))
            .map_err(|e| win_err("set_buffers_transform", e))?;
        window
            .set_scaling_mode(ScalingMode::ScaleToWindow)
            .map_err(|e| win_err("set_scaling_mode", e))?;

        // -- Compute the slot count --
        let query_value = window
            .query(WindowQuery::MinUndequeuedBuffers)
            .map_err(|e| win_err("MIN_UNDEQUEUED_BUFFERS query", e))?;
        if query_value < 0 {
            log::error!("MIN_UNDEQUEUED_BUFFERS query returned {}", query_value);
            return Err(SquallError::INITIALIZATION_FAILED);
        }
        let mut min_undequeued_buffers = query_value as u32;
        // The query doesn't know whether we'll run the queue in async
        // mode and assumes not. Mailbox requires one extra undequeued
        // buffer.
        if info.present_mode == vk::PresentModeKHR::MAILBOX {
            min_undequeued_buffers += 1;
        }

        let num_images = ((info.min_image_count - 1) + min_undequeued_buffers) as usize;
        if num_images > window::NUM_BUFFER_SLOTS {
            log::error!(
                "swapchain needs {} slots but the window system only has {}",
                num_images,
                window::NUM_BUFFER_SLOTS
            );
            return Err(SquallError::INITIALIZATION_FAILED);
        }
        window
            .set_buffer_count(num_images)
            .map_err(|e| win_err("set_buffer_count", e))?;

        // -- Select the image usage bits --
        let mut swapchain_usage = 0;
        if is_shared_present_mode(info.present_mode) {
            swapchain_usage |= SWAPCHAIN_IMAGE_USAGE_FRONT_BUFFER;
            window
                .set_shared_buffer_mode(true)
                .map_err(|e| win_err("set_shared_buffer_mode(true)", e))?;
        }
        if info.present_mode == vk::PresentModeKHR::SHARED_CONTINUOUS_REFRESH {
            window
                .set_auto_refresh(true)
                .map_err(|e| win_err("set_auto_refresh(true)", e))?;
        }

        let gralloc_usage =
            match dev
                .d_driver
                .swapchain_gralloc_usage2(info.format, info.usage, swapchain_usage)
            {
                Some(Ok(usage)) => usage,
                Some(Err(r)) => {
                    log::error!("swapchain_gralloc_usage2 failed: {:?}", r);
                    return Err(SquallError::INITIALIZATION_FAILED);
                }
                None => match dev.d_driver.swapchain_gralloc_usage(info.format, info.usage) {
                    Some(Ok(usage)) => usage,
                    Some(Err(r)) => {
                        log::error!("swapchain_gralloc_usage failed: {:?}", r);
                        return Err(SquallError::INITIALIZATION_FAILED);
                    }
                    None => GRALLOC_USAGE_HW_RENDER | GRALLOC_USAGE_HW_TEXTURE,
                },
            };
        window
            .set_usage(gralloc_usage)
            .map_err(|e| win_err("set_usage", e))?;

        let swap_interval = if info.present_mode == vk::PresentModeKHR::MAILBOX {
            0
        } else {
            1
        };
        window
            .set_swap_interval(swap_interval)
            .map_err(|e| win_err("set_swap_interval", e))?;

        let sc_refresh = match window.get_refresh_cycle_period() {
            Ok((min, max)) => RefreshCycleDuration {
                min_refresh_duration: min as u64,
                max_refresh_duration: max as u64,
            },
            Err(e) => {
                log::debug!("get_refresh_cycle_period failed: {:?}", e);
                RefreshCycleDuration::default()
            }
        };

        let mut swapchain = Swapchain {
            sc_surface: info.surface,
            sc_window: window.clone(),
            sc_slots: Vec::with_capacity(num_images),
            sc_refresh,
            sc_frame_timestamps_enabled: false,
            sc_timing: TimingStore::default(),
        };

        // -- Dequeue all buffers and create an image for each --
        // Any failure from here on must cancel the dequeued buffers.
        let mut result = Ok(());
        for i in 0..num_images {
            let (buffer, dequeue_fence) = match window.dequeue_buffer() {
                Ok(dequeued) => dequeued,
                Err(e) => {
                    log::error!("dequeueBuffer[{}] failed: {:?}", i, e);
                    result = Err(SquallError::INITIALIZATION_FAILED);
                    break;
                }
            };

            let mut slot = ImageSlot {
                sl_image: vk::Image::null(),
                sl_buffer: Some(buffer.clone()),
                sl_dequeue_fence: dequeue_fence,
                sl_dequeued: true,
            };

            let image_info = SwapchainImageCreateInfo {
                format: info.format,
                extent: vk::Extent2D {
                    width: buffer.nb_width as u32,
                    height: buffer.nb_height as u32,
                },
                usage: info.usage,
                sharing_mode: info.sharing_mode,
                queue_family_indices: &info.queue_family_indices,
                swapchain_usage,
                buffer: &buffer,
            };
            match dev.d_driver.create_image(&image_info) {
                Ok(image) => slot.sl_image = image,
                Err(r) => {
                    log::debug!("image creation with native buffer failed: {:?}", r);
                    swapchain.sc_slots.push(slot);
                    result = Err(SquallError::from(r));
                    break;
                }
            }
            swapchain.sc_slots.push(slot);
        }

        // -- Cancel all buffers, returning them to the queue --
        // On failure also destroy the images and drop the buffer
        // references; on success we keep both.
        for slot in swapchain.sc_slots.iter_mut() {
            if slot.sl_dequeued {
                if let Some(buf) = slot.sl_buffer.as_ref() {
                    let fence = slot.sl_dequeue_fence.take();
                    if let Err(e) = window.cancel_buffer(buf, fence) {
                        log::error!("cancelBuffer failed: {:?}", e);
                    }
                }
                slot.sl_dequeued = false;
            }
            if result.is_err() && slot.sl_image != vk::Image::null() {
                dev.d_driver.destroy_image(slot.sl_image);
                slot.sl_image = vk::Image::null();
            }
        }

        result.map(|_| swapchain)
    }

    /// Dequeue the next buffer and hand its slot to the application.
    pub(crate) fn acquire(
        &mut self,
        dev: &Device,
        surface: &Surface,
        self_handle: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        signal_fence: vk::Fence,
    ) -> Result<u32> {
        if surface.s_swapchain != self_handle {
            return Err(SquallError::OUT_OF_DATE);
        }

        if timeout != u64::MAX {
            log::error!("non-infinite acquire timeouts are not implemented; waiting forever");
        }

        let window = self.sc_window.clone();
        let (buffer, dequeue_fence) = window.dequeue_buffer().map_err(|e| {
            log::error!("dequeueBuffer failed: {:?}", e);
            SquallError::INITIALIZATION_FAILED
        })?;

        let idx = match self.sc_slots.iter().position(|slot| {
            slot.sl_buffer
                .as_ref()
                .map_or(false, |buf| Arc::ptr_eq(buf, &buffer))
        }) {
            Some(idx) => idx,
            None => {
                log::error!("dequeueBuffer returned an unrecognized buffer");
                let _ = window.cancel_buffer(&buffer, dequeue_fence);
                return Err(SquallError::OUT_OF_DATE);
            }
        };

        let slot = &mut self.sc_slots[idx];
        slot.sl_dequeued = true;
        slot.sl_dequeue_fence = dequeue_fence;

        // Clone the fence for the driver. If the dup fails, wait the
        // fence out on the CPU and proceed without one.
        let fence_clone = match slot.sl_dequeue_fence.as_ref() {
            Some(f) => match fence::dup_fence(f) {
                Some(clone) => Some(clone),
                None => {
                    fence::wait_fence(f);
                    None
                }
            },
            None => None,
        };

        // The driver owns fence_clone from here, success or failure.
        // Closing it here would race a driver-side close of the same
        // fd number.
        if let Err(r) = dev
            .d_driver
            .acquire_image(slot.sl_image, fence_clone, semaphore, signal_fence)
        {
            let dequeue_fence = slot.sl_dequeue_fence.take();
            if let Some(buf) = slot.sl_buffer.as_ref() {
                let _ = window.cancel_buffer(buf, dequeue_fence);
            }
            slot.sl_dequeued = false;
            return Err(SquallError::from(r));
        }

        Ok(idx as u32)
    }

    /// Sever this swapchain from its surface.
    ///
    /// Dequeued slots are left alone: the application still holds
    /// them, and releases them through present or destroy.
    pub(crate) fn orphan(
        &mut self,
        dev: &Device,
        self_handle: vk::SwapchainKHR,
        surface: &mut Surface,
    ) {
        if surface.s_swapchain != self_handle {
            return;
        }

        for slot in self.sc_slots.iter_mut() {
            if !slot.sl_dequeued {
                release_swapchain_image(dev, None, None, slot);
            }
        }
        surface.s_swapchain = vk::SwapchainKHR::null();
        self.sc_timing.clear();
    }

    /// Release every slot and detach from the surface. The window is
    /// only touched if this swapchain is still the active one.
    pub(crate) fn destroy(
        &mut self,
        dev: &Device,
        self_handle: vk::SwapchainKHR,
        surface: &mut Surface,
    ) {
        let active = surface.s_swapchain == self_handle;
        let window = if active {
            Some(self.sc_window.clone())
        } else {
            None
        };

        if self.sc_frame_timestamps_enabled {
            if let Some(win) = window.as_ref() {
                win.enable_frame_timestamps(false);
            }
        }
        for slot in self.sc_slots.iter_mut() {
            release_swapchain_image(dev, window.as_ref(), None, slot);
        }
        if active {
            surface.s_swapchain = vk::SwapchainKHR::null();
        }
    }
}
