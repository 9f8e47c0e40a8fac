// Host memory allocation callbacks
//
// Every allocation the layer makes is routed through the application's
// allocation callbacks when it supplied some: long-lived objects with
// OBJECT scope, per-call scratch with COMMAND scope. Without callbacks
// we fall back to the global allocator with the same layout rules.
//
// Austin Shafer - 2024
use ash::vk;

use crate::window::NativeRect;

use std::alloc::Layout;
use std::mem;
use std::ptr::{self, NonNull};

#[derive(Copy, Clone, Default)]
pub struct HostAllocator {
    h_callbacks: Option<vk::AllocationCallbacks>,
}

impl HostAllocator {
    pub fn from_callbacks(callbacks: Option<&vk::AllocationCallbacks>) -> Self {
        Self {
            h_callbacks: callbacks.copied(),
        }
    }

    /// Entry points that weren't handed an allocator fall back to the
    /// device's.
    pub(crate) fn or_device(
        callbacks: Option<&vk::AllocationCallbacks>,
        dev_alloc: &HostAllocator,
    ) -> HostAllocator {
        match callbacks {
            Some(cb) => Self::from_callbacks(Some(cb)),
            None => *dev_alloc,
        }
    }

    unsafe fn alloc_raw(
        &self,
        size: usize,
        align: usize,
        scope: vk::SystemAllocationScope,
    ) -> *mut u8 {
        match &self.h_callbacks {
            Some(cb) => match cb.pfn_allocation {
                Some(pfn) => pfn(cb.p_user_data, size, align, scope) as *mut u8,
                None => ptr::null_mut(),
            },
            None => std::alloc::alloc(Layout::from_size_align_unchecked(size, align)),
        }
    }

    unsafe fn realloc_raw(
        &self,
        original: *mut u8,
        old_size: usize,
        size: usize,
        align: usize,
        scope: vk::SystemAllocationScope,
    ) -> *mut u8 {
        match &self.h_callbacks {
            Some(cb) => match cb.pfn_reallocation {
                Some(pfn) => pfn(cb.p_user_data, original as *mut _, size, align, scope) as *mut u8,
                None => ptr::null_mut(),
            },
            None => {
                if original.is_null() {
                    std::alloc::alloc(Layout::from_size_align_unchecked(size, align))
                } else {
                    std::alloc::realloc(
                        original,
                        Layout::from_size_align_unchecked(old_size, align),
                        size,
                    )
                }
            }
        }
    }

    unsafe fn free_raw(&self, mem: *mut u8, size: usize, align: usize) {
        if mem.is_null() {
            return;
        }
        match &self.h_callbacks {
            Some(cb) => {
                if let Some(pfn) = cb.pfn_free {
                    pfn(cb.p_user_data, mem as *mut _);
                }
            }
            None => std::alloc::dealloc(mem, Layout::from_size_align_unchecked(size, align)),
        }
    }

    /// Place `val` in host memory with OBJECT scope. On exhaustion the
    /// value is handed back so the caller can unwind it.
    pub(crate) fn alloc_object<T>(&self, val: T) -> Result<NonNull<T>, T> {
        let layout = Layout::new::<T>();
        let mem = unsafe {
            self.alloc_raw(
                layout.size(),
                layout.align(),
                vk::SystemAllocationScope::OBJECT,
            )
        } as *mut T;

        match NonNull::new(mem) {
            Some(obj) => {
                unsafe { obj.as_ptr().write(val) };
                Ok(obj)
            }
            None => Err(val),
        }
    }

    /// Drop and free an object placed with alloc_object.
    ///
    /// `obj` must have come from alloc_object on an allocator with the
    /// same callbacks, and must not be used afterwards.
    pub(crate) unsafe fn free_object<T>(&self, obj: *mut T) {
        let layout = Layout::new::<T>();
        ptr::drop_in_place(obj);
        self.free_raw(obj as *mut u8, layout.size(), layout.align());
    }
}

/// Damage rectangle scratch for one present call.
///
/// Grown on demand with COMMAND scope, reused across the swapchains in
/// the call, freed once at the end. If growing fails the damage hint
/// is dropped for that swapchain; the old buffer stays valid.
pub(crate) struct RectScratch {
    r_rects: *mut NativeRect,
    r_capacity: usize,
}

impl RectScratch {
    pub fn new() -> Self {
        Self {
            r_rects: ptr::null_mut(),
            r_capacity: 0,
        }
    }

    pub fn request(&mut self, alloc: &HostAllocator, count: usize) -> Option<&mut [NativeRect]> {
        if count > self.r_capacity {
            let layout = Layout::array::<NativeRect>(count).ok()?;
            let old_size = self.r_capacity * mem::size_of::<NativeRect>();
            let mem = unsafe {
                alloc.realloc_raw(
                    self.r_rects as *mut u8,
                    old_size,
                    layout.size(),
                    layout.align(),
                    vk::SystemAllocationScope::COMMAND,
                )
            } as *mut NativeRect;
            if mem.is_null() {
                return None;
            }
            self.r_rects = mem;
            self.r_capacity = count;
        }

        if count == 0 {
            return Some(&mut []);
        }
        Some(unsafe { std::slice::from_raw_parts_mut(self.r_rects, count) })
    }

    pub fn release(&mut self, alloc: &HostAllocator) {
        if !self.r_rects.is_null() {
            unsafe {
                alloc.free_raw(
                    self.r_rects as *mut u8,
                    self.r_capacity * mem::size_of::<NativeRect>(),
                    mem::align_of::<NativeRect>(),
                )
            };
            self.r_rects = ptr::null_mut();
            self.r_capacity = 0;
        }
    }
}
