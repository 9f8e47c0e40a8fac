// WSI entry points
//
// This is the procedure surface the loader dispatches into. Handles
// are the raw addresses of the heap objects behind them, object
// memory is routed through the application's allocation callbacks,
// and results come back as raw Vulkan result codes.
//
// The caller owns external synchronization: nothing here locks, per
// the GPU API's threading contract.
//
// Austin Shafer - 2024
use ash::vk::{self, Handle};

use std::sync::Arc;

use crate::alloc::{HostAllocator, RectScratch};
use crate::driver::Device;
use crate::surface::{self, Surface};
use crate::swapchain::{
    is_shared_present_mode, release_swapchain_image, Swapchain, SwapchainCreateInfo,
};
use crate::timing::RefreshCycleDuration;
use crate::transform;
use crate::window::{NativeRect, NativeWindow};
use utils::log;

/// Present parameters for one queue_present call.
///
/// `regions` and `times` are the incremental-present and display-timing
/// extension payloads; when present they are indexed by swapchain just
/// like `image_indices`. `results` receives the per-swapchain result.
pub struct PresentInfo<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub swapchains: &'a [vk::SwapchainKHR],
    pub image_indices: &'a [u32],
    pub regions: Option<&'a [PresentRegion<'a>]>,
    pub times: Option<&'a [vk::PresentTimeGOOGLE]>,
    pub results: Option<&'a mut [vk::Result]>,
}

/// Damage rectangles for one swapchain, in the GPU API's y-down
/// convention
pub struct PresentRegion<'a> {
    pub rectangles: &'a [vk::RectLayerKHR],
}

fn handle_from_surface(surface: *mut Surface) -> vk::SurfaceKHR {
    vk::SurfaceKHR::from_raw(surface as u64)
}

unsafe fn surface_from_handle<'a>(handle: vk::SurfaceKHR) -> &'a mut Surface {
    &mut *(handle.as_raw() as *mut Surface)
}

fn handle_from_swapchain(swapchain: *mut Swapchain) -> vk::SwapchainKHR {
    vk::SwapchainKHR::from_raw(swapchain as u64)
}

unsafe fn swapchain_from_handle<'a>(handle: vk::SwapchainKHR) -> &'a mut Swapchain {
    &mut *(handle.as_raw() as *mut Swapchain)
}

/// Copy as much of `src` as the caller's buffer holds. With no buffer,
/// just report the full count.
fn copy_enumerated<T: Copy>(src: &[T], count: &mut u32, out: Option<&mut [T]>) -> vk::Result {
    match out {
        Some(buf) => {
            let n = src.len().min(buf.len());
            buf[..n].copy_from_slice(&src[..n]);
            *count = n as u32;
            if n < src.len() {
                vk::Result::INCOMPLETE
            } else {
                vk::Result::SUCCESS
            }
        }
        None => {
            *count = src.len() as u32;
            vk::Result::SUCCESS
        }
    }
}

/// Wrap a native window in a surface and connect the graphics API to
/// its buffer queue.
pub fn create_surface(
    window: Arc<dyn NativeWindow>,
    allocator: Option<&vk::AllocationCallbacks>,
) -> Result<vk::SurfaceKHR, vk::Result> {
    let alloc = HostAllocator::from_callbacks(allocator);

    let surface = match alloc.alloc_object(Surface::new(window)) {
        Ok(obj) => obj.as_ptr(),
        Err(_) => return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
    };

    if let Err(e) = unsafe { (*surface).connect() } {
        unsafe { alloc.free_object(surface) };
        return Err(e.into());
    }

    Ok(handle_from_surface(surface))
}

/// Disconnect and free a surface.
///
/// `surface` must be a live handle from create_surface, or null.
pub unsafe fn destroy_surface(
    surface_handle: vk::SurfaceKHR,
    allocator: Option<&vk::AllocationCallbacks>,
) {
    if surface_handle == vk::SurfaceKHR::null() {
        return;
    }
    let alloc = HostAllocator::from_callbacks(allocator);
    let surface = surface_from_handle(surface_handle);
    surface.disconnect();
    alloc.free_object(surface as *mut Surface);
}

/// Presentation support is a property of the window system here, not
/// of any particular queue family.
pub fn get_surface_support() -> bool {
    true
}

/// `surface_handle` must be a live handle from create_surface.
pub unsafe fn get_surface_capabilities(
    surface_handle: vk::SurfaceKHR,
) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result> {
    surface_from_handle(surface_handle)
        .capabilities()
        .map_err(Into::into)
}

pub fn get_surface_formats(
    count: &mut u32,
    formats: Option<&mut [vk::SurfaceFormatKHR]>,
) -> vk::Result {
    copy_enumerated(&surface::surface_formats(), count, formats)
}

pub fn get_surface_present_modes(
    count: &mut u32,
    modes: Option<&mut [vk::PresentModeKHR]>,
) -> vk::Result {
    copy_enumerated(&surface::present_modes(), count, modes)
}

/// Create a swapchain over `info.surface`'s window, superseding
/// `info.old_swapchain` if one is named.
///
/// `info.surface` and `info.old_swapchain` must be live handles.
pub unsafe fn create_swapchain(
    dev: &Device,
    info: &SwapchainCreateInfo,
    allocator: Option<&vk::AllocationCallbacks>,
) -> Result<vk::SwapchainKHR, vk::Result> {
    let alloc = HostAllocator::or_device(allocator, &dev.d_alloc);

    log::debug!(
        "create_swapchain: surface={:?} minImageCount={} format={:?} extent={}x{} usage={:?} preTransform={:?} presentMode={:?} oldSwapchain={:?}",
        info.surface,
        info.min_image_count,
        info.format,
        info.extent.width,
        info.extent.height,
        info.usage,
        info.pre_transform,
        info.present_mode,
        info.old_swapchain
    );

    if info.array_layers != 1 {
        log::debug!("swapchain array_layers={} not supported", info.array_layers);
    }
    if info.color_space != vk::ColorSpaceKHR::SRGB_NONLINEAR {
        log::debug!(
            "swapchain color_space={:?} not supported",
            info.color_space
        );
    }
    if !(transform::supported_transforms().contains(info.pre_transform)) {
        log::debug!(
            "swapchain pre_transform={:?} not supported",
            info.pre_transform
        );
    }
    if !(info.present_mode == vk::PresentModeKHR::FIFO
        || info.present_mode == vk::PresentModeKHR::MAILBOX
        || is_shared_present_mode(info.present_mode))
    {
        log::debug!(
            "swapchain present_mode={:?} not supported",
            info.present_mode
        );
    }

    let surface = surface_from_handle(info.surface);

    // The caller has to name the surface's current swapchain as the
    // one being replaced, otherwise the window is in use.
    if surface.s_swapchain != info.old_swapchain {
        log::debug!(
            "can't create swapchain for surface {:?}: active swapchain is {:?} but old_swapchain is {:?}",
            info.surface,
            surface.s_swapchain,
            info.old_swapchain
        );
        return Err(vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR);
    }
    if info.old_swapchain != vk::SwapchainKHR::null() {
        swapchain_from_handle(info.old_swapchain).orphan(dev, info.old_swapchain, surface);
    }

    let swapchain = Swapchain::new(dev, surface, info).map_err(vk::Result::from)?;

    let swapchain = match alloc.alloc_object(swapchain) {
        Ok(obj) => obj.as_ptr(),
        Err(mut sc) => {
            // Nothing is dequeued at this point, so a null-handle
            // destroy just tears down the images and buffer refs.
            sc.destroy(dev, vk::SwapchainKHR::null(), surface);
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
    };

    surface.s_swapchain = handle_from_swapchain(swapchain);
    Ok(surface.s_swapchain)
}

/// `swapchain_handle` must be a live handle from create_swapchain, or
/// null. The owning surface must still be alive.
pub unsafe fn destroy_swapchain(
    dev: &Device,
    swapchain_handle: vk::SwapchainKHR,
    allocator: Option<&vk::AllocationCallbacks>,
) {
    if swapchain_handle == vk::SwapchainKHR::null() {
        return;
    }
    let alloc = HostAllocator::or_device(allocator, &dev.d_alloc);
    let swapchain = swapchain_from_handle(swapchain_handle);
    let surface = surface_from_handle(swapchain.sc_surface);
    swapchain.destroy(dev, swapchain_handle, surface);
    alloc.free_object(swapchain as *mut Swapchain);
}

/// `swapchain_handle` must be a live handle from create_swapchain.
pub unsafe fn get_swapchain_images(
    swapchain_handle: vk::SwapchainKHR,
    count: &mut u32,
    images: Option<&mut [vk::Image]>,
) -> vk::Result {
    let swapchain = swapchain_from_handle(swapchain_handle);
    let surface = surface_from_handle(swapchain.sc_surface);
    if surface.s_swapchain != swapchain_handle {
        log::debug!(
            "getting images for non-active swapchain {:?}; only dequeued image handles are valid",
            swapchain_handle
        );
    }

    let handles: Vec<vk::Image> = swapchain
        .sc_slots
        .iter()
        .map(|slot| slot.sl_image)
        .collect();
    copy_enumerated(&handles, count, images)
}

/// `swapchain_handle` must be a live handle; the owning surface must
/// still be alive.
pub unsafe fn acquire_next_image(
    dev: &Device,
    swapchain_handle: vk::SwapchainKHR,
    timeout: u64,
    semaphore: vk::Semaphore,
    signal_fence: vk::Fence,
) -> Result<u32, vk::Result> {
    let swapchain = swapchain_from_handle(swapchain_handle);
    let surface = surface_from_handle(swapchain.sc_surface);
    swapchain
        .acquire(dev, surface, swapchain_handle, timeout, semaphore, signal_fence)
        .map_err(Into::into)
}

/// Merge two present results, keeping the worse one. The ranking is
/// the GPU API's: device loss dominates, suboptimal is still success.
pub(crate) fn worst_present_result(a: vk::Result, b: vk::Result) -> vk::Result {
    const WORST_TO_BEST: [vk::Result; 6] = [
        vk::Result::ERROR_DEVICE_LOST,
        vk::Result::ERROR_SURFACE_LOST_KHR,
        vk::Result::ERROR_OUT_OF_DATE_KHR,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        vk::Result::SUBOPTIMAL_KHR,
    ];
    for result in WORST_TO_BEST {
        if a == result || b == result {
            return result;
        }
    }
    if a != vk::Result::SUCCESS {
        a
    } else {
        b
    }
}

/// Queue every named image for composition.
///
/// Each swapchain gets its own result; the return value is the worst
/// of them. A swapchain whose buffer can't be queued is orphaned so
/// the application recreates it.
///
/// Every entry of `info.swapchains` must be a live handle, and each
/// owning surface must still be alive.
pub unsafe fn queue_present(dev: &Device, queue: vk::Queue, info: PresentInfo) -> vk::Result {
    let PresentInfo {
        wait_semaphores,
        swapchains,
        image_indices,
        regions,
        times,
        mut results,
    } = info;

    if let Some(regions) = regions {
        if regions.len() != swapchains.len() {
            log::debug!("PresentRegions count does not match swapchain count");
        }
    }
    if let Some(times) = times {
        if times.len() != swapchains.len() {
            log::debug!("PresentTimes count does not match swapchain count");
        }
    }

    let mut final_result = vk::Result::SUCCESS;
    let mut scratch = RectScratch::new();

    for sc_idx in 0..swapchains.len() {
        let swapchain_handle = swapchains[sc_idx];
        let swapchain = swapchain_from_handle(swapchain_handle);
        let image_idx = image_indices[sc_idx] as usize;
        let region = regions.and_then(|r| r.get(sc_idx));
        let time = times.and_then(|t| t.get(sc_idx));
        let mut swapchain_result = vk::Result::SUCCESS;

        // The release fence gates compositor consumption of the
        // buffer; it signals once the GPU is done writing the image.
        let image = swapchain.sc_slots[image_idx].sl_image;
        let mut release_fence =
            match dev
                .d_driver
                .queue_signal_release_image(queue, wait_semaphores, image)
            {
                Ok(fence) => fence,
                Err(r) => {
                    log::error!("queue_signal_release_image failed: {:?}", r);
                    swapchain_result = r;
                    None
                }
            };

        let surface = surface_from_handle(swapchain.sc_surface);
        if surface.s_swapchain == swapchain_handle {
            let window = swapchain.sc_window.clone();

            if swapchain_result == vk::Result::SUCCESS {
                if let Some(region) = region {
                    // Convert the damage hint into native rectangles.
                    // The native convention is y-flipped relative to
                    // ours. If the scratch can't grow, the hint is
                    // dropped for this swapchain.
                    let rcount = region.rectangles.len();
                    if let Some(rects) = scratch.request(&dev.d_alloc, rcount) {
                        for (src, dst) in region.rectangles.iter().zip(rects.iter_mut()) {
                            if src.layer > 0 {
                                log::debug!(
                                    "queue_present ignoring invalid layer {}; using layer 0",
                                    src.layer
                                );
                            }
                            let x = src.offset.x;
                            let y = src.offset.y;
                            let width = src.extent.width as i32;
                            let height = src.extent.height as i32;
                            *dst = NativeRect {
                                nr_left: x,
                                nr_top: y + height,
                                nr_right: x + width,
                                nr_bottom: y,
                            };
                        }
                        let _ = window.set_surface_damage(&rects[..rcount]);
                    }
                }

                if let Some(time) = time {
                    if !swapchain.sc_frame_timestamps_enabled {
                        log::debug!("enabling frame timestamps");
                        window.enable_frame_timestamps(true);
                        swapchain.sc_frame_timestamps_enabled = true;
                    }
                    // Record this present id and desired time so they
                    // can be correlated with compositor timestamps
                    // later.
                    swapchain.sc_timing.enroll(time);
                    if time.desired_present_time != 0 {
                        log::debug!(
                            "setting buffer timestamp {}",
                            time.desired_present_time
                        );
                        let _ = window.set_buffers_timestamp(time.desired_present_time as i64);
                    }
                }

                let slot = &mut swapchain.sc_slots[image_idx];
                if let Some(buf) = slot.sl_buffer.as_ref() {
                    // queue_buffer always consumes the fence, even on
                    // error
                    if let Err(e) = window.queue_buffer(buf, release_fence.take()) {
                        log::error!("queueBuffer failed: {:?}", e);
                        swapchain_result = worst_present_result(
                            swapchain_result,
                            vk::Result::ERROR_OUT_OF_DATE_KHR,
                        );
                    }
                }
                slot.sl_dequeue_fence = None;
                slot.sl_dequeued = false;
            }

            if swapchain_result != vk::Result::SUCCESS {
                release_swapchain_image(
                    dev,
                    Some(&swapchain.sc_window),
                    release_fence.take(),
                    &mut swapchain.sc_slots[image_idx],
                );
                swapchain.orphan(dev, swapchain_handle, surface);
            }
        } else {
            release_swapchain_image(
                dev,
                None,
                release_fence.take(),
                &mut swapchain.sc_slots[image_idx],
            );
            swapchain_result = vk::Result::ERROR_OUT_OF_DATE_KHR;
        }

        if let Some(results) = results.as_mut() {
            results[sc_idx] = swapchain_result;
        }
        if swapchain_result != final_result {
            final_result = worst_present_result(final_result, swapchain_result);
        }
    }

    scratch.release(&dev.d_alloc);
    final_result
}

/// The display's refresh period, captured at swapchain creation.
///
/// `swapchain_handle` must be a live handle.
pub unsafe fn get_refresh_cycle_duration(
    swapchain_handle: vk::SwapchainKHR,
) -> RefreshCycleDuration {
    swapchain_from_handle(swapchain_handle).sc_refresh
}

/// Report realized presentation timing for past presents.
///
/// With no buffer this probes the window's timestamp history and
/// reports how many records are ready. With a buffer it copies the
/// ready records out in present-id order, consuming them.
///
/// `swapchain_handle` must be a live handle.
pub unsafe fn get_past_presentation_timing(
    swapchain_handle: vk::SwapchainKHR,
    count: &mut u32,
    timings: Option<&mut [vk::PastPresentationTimingGOOGLE]>,
) -> vk::Result {
    let swapchain = swapchain_from_handle(swapchain_handle);
    let window = swapchain.sc_window.clone();

    if !swapchain.sc_frame_timestamps_enabled {
        log::debug!("enabling frame timestamps");
        window.enable_frame_timestamps(true);
        swapchain.sc_frame_timestamps_enabled = true;
    }

    match timings {
        Some(buf) => {
            *count = swapchain.sc_timing.drain(buf) as u32;
        }
        None => {
            *count = swapchain
                .sc_timing
                .refresh(window.as_ref(), swapchain.sc_refresh.min_refresh_duration);
        }
    }

    vk::Result::SUCCESS
}

/// `swapchain_handle` must be a live handle; the owning surface must
/// still be alive.
pub unsafe fn get_swapchain_status(swapchain_handle: vk::SwapchainKHR) -> vk::Result {
    let swapchain = swapchain_from_handle(swapchain_handle);
    let surface = surface_from_handle(swapchain.sc_surface);

    if surface.s_swapchain != swapchain_handle {
        return vk::Result::ERROR_OUT_OF_DATE_KHR;
    }

    vk::Result::SUCCESS
}
