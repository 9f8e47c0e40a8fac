// Present timing correlation for the display timing extension
//
// Each present that carries a timing hint gets a record here. The
// record sits in the store until the compositor's frame timestamp
// history tells us when the frame actually hit the display, at which
// point it is ready to be reported back to the application.
//
// Austin Shafer - 2024
use ash::vk;

use crate::window::NativeWindow;
use utils::log;

/// Maximum number of timing records to keep per swapchain
pub const MAX_TIMING_INFOS: usize = 10;
/// Minimum number of frames to look for in the past (so we don't cause
/// synchronous requests to the compositor)
pub const MIN_NUM_FRAMES_AGO: u32 = 5;

/// The refresh cycle of the display this swapchain presents to, in
/// nanoseconds. Queried from the window once at swapchain creation.
#[derive(Copy, Clone, Debug, Default)]
pub struct RefreshCycleDuration {
    pub min_refresh_duration: u64,
    pub max_refresh_duration: u64,
}

/// One in-flight present timing record.
///
/// ti_vals is the value block reported to the application. The four
/// scratch timestamps are raw compositor values; the record is ready
/// once all four are nonzero.
#[derive(Debug)]
pub(crate) struct TimingInfo {
    ti_vals: vk::PastPresentationTimingGOOGLE,

    ti_desired_present_time: u64,
    ti_actual_present_time: u64,
    ti_render_complete_time: u64,
    ti_composition_latch_time: u64,
}

impl TimingInfo {
    fn new(time: &vk::PresentTimeGOOGLE) -> Self {
        Self {
            ti_vals: vk::PastPresentationTimingGOOGLE {
                present_id: time.present_id,
                desired_present_time: time.desired_present_time,
                ..Default::default()
            },
            ti_desired_present_time: 0,
            ti_actual_present_time: 0,
            ti_render_complete_time: 0,
            ti_composition_latch_time: 0,
        }
    }

    pub(crate) fn ready(&self) -> bool {
        self.ti_desired_present_time != 0
            && self.ti_actual_present_time != 0
            && self.ti_render_complete_time != 0
            && self.ti_composition_latch_time != 0
    }

    /// Derive the reported values from the raw timestamps.
    ///
    /// The compositor may have latched this frame early relative to
    /// its deadline. Each whole refresh period of slack can be
    /// credited back as "could have presented one vsync earlier", as
    /// long as a positive latch margin remains.
    pub(crate) fn calculate(&mut self, rdur: u64) {
        self.ti_vals.actual_present_time = self.ti_actual_present_time;

        let mut early_time = self.ti_actual_present_time;
        let mut margin = self.ti_composition_latch_time - self.ti_render_complete_time;
        while margin > rdur && (early_time - rdur) > self.ti_composition_latch_time {
            early_time -= rdur;
            margin -= rdur;
        }
        self.ti_vals.earliest_present_time = early_time;
        self.ti_vals.present_margin = margin;
    }

    pub(crate) fn values(&self) -> vk::PastPresentationTimingGOOGLE {
        self.ti_vals
    }
}

/// Bounded store of in-flight timing records, ordered by present id.
///
/// Overflow drops the oldest record. That bounds memory while keeping
/// the recent presents, which are the ones timestamps will actually
/// arrive for.
#[derive(Debug, Default)]
pub(crate) struct TimingStore {
    t_records: Vec<TimingInfo>,
}

impl TimingStore {
    pub fn clear(&mut self) {
        self.t_records.clear();
    }

    pub fn len(&self) -> usize {
        self.t_records.len()
    }

    /// Record a present hint so it can later be correlated with the
    /// compositor's timestamps. Keeps the store ordered by present id
    /// and trims the oldest record past MAX_TIMING_INFOS.
    pub fn enroll(&mut self, time: &vk::PresentTimeGOOGLE) {
        let pos = self
            .t_records
            .iter()
            .position(|ti| ti.ti_vals.present_id > time.present_id)
            .unwrap_or(self.t_records.len());
        self.t_records.insert(pos, TimingInfo::new(time));

        if self.t_records.len() > MAX_TIMING_INFOS {
            self.t_records.remove(0);
        }
    }

    /// Probe the window's frame timestamp history for every record
    /// that is not yet ready, and return how many records are ready
    /// now.
    ///
    /// The probe starts MIN_NUM_FRAMES_AGO frames back: newer frames
    /// may not have finalized timestamps and asking for them would
    /// force a synchronous round trip to the compositor.
    pub fn refresh(&mut self, window: &dyn NativeWindow, min_refresh_duration: u64) -> u32 {
        let mut num_ready = 0;
        let frames_ago = self.t_records.len() as u32;

        for ti in self.t_records.iter_mut() {
            if ti.ready() {
                num_ready += 1;
                continue;
            }

            for f in MIN_NUM_FRAMES_AGO..frames_ago {
                let stamps = match window.get_frame_timestamps(f) {
                    Ok(stamps) => stamps,
                    Err(e) => {
                        log::debug!("get_frame_timestamps({}) failed: {:?}", f, e);
                        break;
                    }
                };

                if stamps.ft_desired_present_time as u64 == ti.ti_vals.desired_present_time {
                    ti.ti_desired_present_time = stamps.ft_desired_present_time as u64;
                    ti.ti_actual_present_time = stamps.ft_actual_present_time as u64;
                    ti.ti_render_complete_time = stamps.ft_render_complete_time as u64;
                    ti.ti_composition_latch_time = stamps.ft_composition_latch_time as u64;

                    if ti.ready() {
                        ti.calculate(min_refresh_duration);
                        num_ready += 1;
                    }
                    break;
                }
            }
        }

        num_ready
    }

    /// Copy ready records into `out` in store order, deleting each
    /// copied record. Returns the number copied.
    pub fn drain(&mut self, out: &mut [vk::PastPresentationTimingGOOGLE]) -> usize {
        let mut num_copied = 0;
        let mut i = 0;

        while i < self.t_records.len() && num_copied < out.len() {
            if self.t_records[i].ready() {
                out[num_copied] = self.t_records[i].values();
                num_copied += 1;
                // Each present is only reported once. The vector
                // closes up, so the next record is at the same index.
                self.t_records.remove(i);
            } else {
                i += 1;
            }
        }

        num_copied
    }
}
