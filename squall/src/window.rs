// Native window buffer queue abstraction
//
// This is the producer side of the compositor's buffer queue. The
// swapchain drives it through this trait so it never has to know what
// the window system actually is.
//
// Austin Shafer - 2024
use nix::errno::Errno;

use std::os::unix::io::OwnedFd;
use std::sync::Arc;

/// The window system's buffer slot count. A swapchain can never hold
/// more images than this.
pub const NUM_BUFFER_SLOTS: usize = 64;

// Native transform bits. A native transform is a horizontal flip,
// a vertical flip and a 90-degree rotation, in that order, each
// optional. The rotations below are the flip compositions.
pub const TRANSFORM_FLIP_H: u32 = 0x1;
pub const TRANSFORM_FLIP_V: u32 = 0x2;
pub const TRANSFORM_ROT_90: u32 = 0x4;
pub const TRANSFORM_ROT_180: u32 = TRANSFORM_FLIP_H | TRANSFORM_FLIP_V;
pub const TRANSFORM_ROT_270: u32 = TRANSFORM_ROT_180 | TRANSFORM_ROT_90;
pub const TRANSFORM_INVERSE_DISPLAY: u32 = 0x8;

/// Pixel formats the swapchain will configure on the window
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    Rgba8888,
    Rgb565,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataSpace {
    SrgbLinear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScalingMode {
    ScaleToWindow,
}

/// The producer API identity used when connecting to the queue
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WindowApi {
    Egl,
}

/// Window parameters we query
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WindowQuery {
    DefaultWidth,
    DefaultHeight,
    TransformHint,
    MinUndequeuedBuffers,
}

/// One graphics buffer owned by the window's queue.
///
/// The swapchain holds a strong reference to every buffer it has an
/// image aliasing, and identifies dequeue results by pointer identity.
#[derive(Debug)]
pub struct NativeBuffer {
    pub nb_width: i32,
    pub nb_height: i32,
    /// pixels between the start of one row and the next
    pub nb_stride: i32,
    pub nb_format: i32,
    pub nb_usage: u64,
    /// opaque gralloc handle, passed through to the driver
    pub nb_handle: usize,
}

/// A damage rectangle in the native convention.
///
/// The native y axis points up, so top is the greater y value. See
/// the conversion in queue_present.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct NativeRect {
    pub nr_left: i32,
    pub nr_top: i32,
    pub nr_right: i32,
    pub nr_bottom: i32,
}

/// Compositor timestamps for one retired frame
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameTimestamps {
    pub ft_desired_present_time: i64,
    pub ft_render_complete_time: i64,
    pub ft_composition_latch_time: i64,
    pub ft_actual_present_time: i64,
}

/// Window calls follow the C convention of returning -errno, so the
/// typed version of that is what flows back here.
pub type WindowResult<T> = std::result::Result<T, Errno>;

/// The native window vtable.
///
/// Fence ownership across this boundary is contract-driven:
/// `queue_buffer` and `cancel_buffer` always take ownership of the
/// fence they are handed, success or failure. That contract is encoded
/// by taking the fence by value.
pub trait NativeWindow {
    fn query(&self, what: WindowQuery) -> WindowResult<i32>;

    fn set_swap_interval(&self, interval: i32) -> WindowResult<()>;

    /// Hand the next free buffer to the producer, along with a fence
    /// that signals when the consumer is done reading it.
    fn dequeue_buffer(&self) -> WindowResult<(Arc<NativeBuffer>, Option<OwnedFd>)>;

    /// Queue a filled buffer for composition. Always consumes `fence`.
    fn queue_buffer(&self, buffer: &Arc<NativeBuffer>, fence: Option<OwnedFd>) -> WindowResult<()>;

    /// Return a dequeued buffer without presenting it. Always consumes
    /// `fence`.
    fn cancel_buffer(&self, buffer: &Arc<NativeBuffer>, fence: Option<OwnedFd>) -> WindowResult<()>;

    fn api_connect(&self, api: WindowApi) -> WindowResult<()>;
    fn api_disconnect(&self, api: WindowApi) -> WindowResult<()>;

    fn set_buffer_count(&self, count: usize) -> WindowResult<()>;
    fn set_buffers_format(&self, format: PixelFormat) -> WindowResult<()>;
    fn set_buffers_data_space(&self, data_space: DataSpace) -> WindowResult<()>;
    fn set_buffers_dimensions(&self, width: i32, height: i32) -> WindowResult<()>;
    fn set_buffers_transform(&self, transform: u32) -> WindowResult<()>;
    fn set_buffers_timestamp(&self, timestamp: i64) -> WindowResult<()>;
    fn set_scaling_mode(&self, mode: ScalingMode) -> WindowResult<()>;
    fn set_usage(&self, usage: u64) -> WindowResult<()>;
    fn set_shared_buffer_mode(&self, enable: bool) -> WindowResult<()>;
    fn set_auto_refresh(&self, enable: bool) -> WindowResult<()>;
    fn set_surface_damage(&self, rects: &[NativeRect]) -> WindowResult<()>;

    fn enable_frame_timestamps(&self, enable: bool);

    /// The compositor's (min, max) refresh period in nanoseconds
    fn get_refresh_cycle_period(&self) -> WindowResult<(i64, i64)>;

    /// Timestamps for the frame retired `frames_ago` frames ago
    fn get_frame_timestamps(&self, frames_ago: u32) -> WindowResult<FrameTimestamps>;
}
