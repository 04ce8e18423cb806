//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every [`LlsyncEvent`] as one tagged
//! line to the `log` facade (UART / USB-CDC in production, stderr on the
//! host).

use log::{info, warn};

use crate::app::events::LlsyncEvent;
use crate::app::ports::EventSink;
use crate::llsync::ota::OtaStopReason;

/// Adapter that logs every [`LlsyncEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &LlsyncEvent) {
        match event {
            LlsyncEvent::Started(state) => info!("START | bind_state={:?}", state),
            LlsyncEvent::Connected => info!("LINK | connected"),
            LlsyncEvent::Disconnected => info!("LINK | disconnected"),
            LlsyncEvent::LinkAuthenticated => info!("LINK | authenticated"),
            LlsyncEvent::MtuChanged(mtu) => info!("LINK | mtu={}", mtu),
            LlsyncEvent::BindStateChanged { from, to } => {
                info!("BIND | {:?} -> {:?}", from, to);
            }
            LlsyncEvent::BindConfirmRequested { wait_secs } => {
                info!("BIND | waiting {}s for user confirmation", wait_secs);
            }
            LlsyncEvent::SecretProvisioned => info!("BIND | device secret provisioned"),
            LlsyncEvent::OtaStarted { size, resume_from } => {
                info!("OTA | start size={} resume_from={}", size, resume_from);
            }
            LlsyncEvent::OtaProgress { received, size } => {
                let pct = if *size == 0 {
                    0
                } else {
                    u64::from(*received) * 100 / u64::from(*size)
                };
                info!("OTA | {}/{} bytes ({}%)", received, size, pct);
            }
            LlsyncEvent::OtaStopped(OtaStopReason::Success) => info!("OTA | image verified"),
            LlsyncEvent::OtaStopped(reason) => warn!("OTA | stopped: {:?}", reason),
        }
    }
}
