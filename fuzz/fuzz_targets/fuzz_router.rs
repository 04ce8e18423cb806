//! Fuzz target: the full inbound path of `LlsyncService`
//!
//! Runs a bound, authenticated service on the simulation platform and
//! replays the input as GATT writes: one byte selects the characteristic,
//! one the length, then the write itself. Every handler must return an
//! error instead of panicking, and the link flags must stay consistent.
//!
//! cargo fuzz run fuzz_router

#![no_main]

use libfuzzer_sys::fuzz_target;
use llsync::adapters::sim::SimPlatform;
use llsync::app::service::LlsyncService;
use llsync::config::LlsyncConfig;
use llsync::llsync::identity::store_secret;
use llsync::llsync::msg::CharId;

const CHARS: [u16; 5] = [
    CharId::DeviceInfo.uuid16(),
    CharId::Data.uuid16(),
    CharId::Ota.uuid16(),
    CharId::Gateway.uuid16(),
    0x2A00,
];

fuzz_target!(|data: &[u8]| {
    let Ok(cfg) = LlsyncConfig::new("J5ZEN7LD4Q", "fuzz-01") else {
        return;
    };
    let mut sim = SimPlatform::new();
    if store_secret(&mut sim, b"fuzz-device-secret").is_err() {
        return;
    }
    let Ok(mut svc) = LlsyncService::new(sim, cfg) else {
        return;
    };
    let _ = svc.start();
    svc.on_connect();

    let mut rest = data;
    while let [sel, n, tail @ ..] = rest {
        let n = usize::from(*n).min(tail.len());
        let (write, next) = tail.split_at(n);
        let _ = svc.on_gatt_write(CHARS[usize::from(*sel) % CHARS.len()], write);
        if *sel == 0xFF {
            let _ = svc.on_ota_timer();
        }

        let conn = svc.connection();
        assert!(!conn.llsync_connected || conn.ble_connected);
        assert_eq!(svc.ota_progress().is_some(), svc.platform().timer_armed());
        svc.platform_mut().notifications.clear();
        svc.platform_mut().events.clear();
        rest = next;
    }

    svc.on_disconnect();
    assert!(!svc.is_authenticated());
    assert!(svc.ota_progress().is_none());
});
