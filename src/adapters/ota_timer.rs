//! OTA retry timer on ESP-IDF's `esp_timer` API.
//!
//! The one-shot callback runs in the esp_timer task, not the LLSync
//! context, so it only queues [`LinkEvent::OtaTimerFired`] on
//! [`LINK_EVENTS`]; the owner of the service drains it.
//!
//! Host builds use the timer recorded by `adapters::sim::SimPlatform`.

use esp_idf_svc::sys::*;
use log::{info, warn};

use crate::app::ports::{OtaTimerPort, TimerError};
use crate::llsync::channels::{LINK_EVENTS, LinkEvent};

unsafe extern "C" fn retry_expired_cb(_arg: *mut core::ffi::c_void) {
    if LINK_EVENTS.try_send(LinkEvent::OtaTimerFired).is_err() {
        warn!("ota_timer: link event queue full, expiry dropped");
    }
}

pub struct EspOtaTimer {
    handle: esp_timer_handle_t,
}

impl EspOtaTimer {
    /// Create the (stopped) one-shot timer.
    pub fn new() -> Result<Self, TimerError> {
        let args = esp_timer_create_args_t {
            callback: Some(retry_expired_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: c"llsync_ota".as_ptr(),
            skip_unhandled_events: true,
        };
        let mut handle: esp_timer_handle_t = core::ptr::null_mut();
        // SAFETY: `args` outlives the call; the handle is owned by `Self`
        // and deleted in `Drop`.
        let ret = unsafe { esp_timer_create(&args, &mut handle) };
        if ret != ESP_OK {
            warn!("ota_timer: create failed (rc={})", ret);
            return Err(TimerError::Unavailable);
        }
        info!("ota_timer: created");
        Ok(Self { handle })
    }
}

impl OtaTimerPort for EspOtaTimer {
    fn arm(&mut self, timeout_secs: u8) -> Result<(), TimerError> {
        // SAFETY: handle is valid for the lifetime of `self`.
        unsafe {
            if esp_timer_is_active(self.handle) {
                esp_timer_stop(self.handle);
            }
            let ret = esp_timer_start_once(self.handle, u64::from(timeout_secs) * 1_000_000);
            if ret != ESP_OK {
                warn!("ota_timer: start failed (rc={})", ret);
                return Err(TimerError::Unavailable);
            }
        }
        Ok(())
    }

    fn cancel(&mut self) {
        // SAFETY: handle is valid; stopping an idle timer only returns an
        // error code.
        unsafe {
            if esp_timer_is_active(self.handle) {
                esp_timer_stop(self.handle);
            }
        }
    }
}

impl Drop for EspOtaTimer {
    fn drop(&mut self) {
        // SAFETY: the handle was created in `new` and is not used after drop.
        unsafe {
            esp_timer_stop(self.handle);
            esp_timer_delete(self.handle);
        }
    }
}
