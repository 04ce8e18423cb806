//! OTA over GATT: request, looped packages, check result, resume.

use llsync::Error;
use llsync::app::events::LlsyncEvent;
use llsync::app::ports::{FlashPort, OtaDenyReason, OtaVerdict};
use llsync::llsync::msg::{OtaType, UplinkType};
use llsync::llsync::ota::{CheckResult, OtaError, OtaStopReason};

use super::harness::*;

const PACKAGE: usize = 128;

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 241) as u8).collect()
}

fn request(size: usize, crc: u32) -> Vec<u8> {
    let mut p = (size as u32).to_be_bytes().to_vec();
    p.extend_from_slice(&crc.to_be_bytes());
    p.push(5);
    p.extend_from_slice(b"2.0.1");
    p
}

/// Authenticated service with a 244-byte notification MTU.
fn ready() -> Svc {
    let mut svc = authenticated();
    svc.on_mtu_changed(247).unwrap();
    uplinks(&mut svc);
    svc
}

/// Send `data` in order as packages, sequence restarting at 0.
fn stream(svc: &mut Svc, data: &[u8]) {
    let loop_len = svc.config().ota.packages_per_loop;
    let mut seq = 0u8;
    for chunk in data.chunks(PACKAGE) {
        let mut p = vec![seq];
        p.extend_from_slice(chunk);
        ota(svc, OtaType::Package, &p).unwrap();
        seq = (seq + 1) % loop_len;
    }
}

fn staged(svc: &Svc, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let base = svc.config().ota.image_base;
    svc.platform().flash.read_at(base, &mut buf).unwrap();
    buf
}

#[test]
fn ordered_transfer_verifies_image() {
    let mut svc = ready();
    let img = image(10_000);
    ota(&mut svc, OtaType::Request, &request(img.len(), crc32fast::hash(&img))).unwrap();

    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].type_byte, UplinkType::OtaReply as u8);
    // enabled + resume capable, 10 per loop, 128 bytes, 3 s retry, 20 s reboot,
    // offset 0, 5 × 10 ms interval
    assert_eq!(ups[0].payload, vec![0x03, 10, 128, 3, 20, 0, 0, 0, 0, 5]);
    assert!(svc.platform().timer_armed());

    stream(&mut svc, &img);
    let ups = uplinks(&mut svc);
    let progress: Vec<_> = ups
        .iter()
        .filter(|u| u.type_byte == UplinkType::OtaDataReply as u8)
        .collect();
    // 79 packages: seven complete loops, the last one ends the file
    assert_eq!(progress.len(), 7);
    assert_eq!(progress[0].payload, vec![9, 0, 0, 0x05, 0x00]);

    let last = ups.last().unwrap();
    assert_eq!(last.type_byte, UplinkType::OtaCheckResult as u8);
    assert_eq!(last.payload, vec![CheckResult::Valid as u8]);

    assert_eq!(staged(&svc, img.len()), img);
    assert!(!svc.platform().timer_armed());
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::Success]);

    let events = svc.platform_mut().take_events();
    assert!(events.contains(&LlsyncEvent::OtaStarted {
        size: 10_000,
        resume_from: 0,
    }));
    assert!(events.contains(&LlsyncEvent::OtaProgress {
        received: 1280,
        size: 10_000,
    }));
    assert_eq!(
        events.last(),
        Some(&LlsyncEvent::OtaStopped(OtaStopReason::Success))
    );
}

#[test]
fn ota_needs_authenticated_link() {
    let mut svc = service();
    svc.on_connect();
    let r = ota(&mut svc, OtaType::Request, &request(100, 0));
    assert_eq!(r, Err(Error::NotAuthenticated));
    assert!(uplinks(&mut svc).is_empty());
    assert!(!svc.platform().timer_armed());
}

#[test]
fn disconnect_then_resume_from_last_page() {
    let mut svc = ready();
    let img = image(10_000);
    let req = request(img.len(), crc32fast::hash(&img));
    ota(&mut svc, OtaType::Request, &req).unwrap();

    // 40 packages = 5120 bytes, not page aligned
    stream(&mut svc, &img[..40 * PACKAGE]);
    svc.on_disconnect();
    assert!(!svc.platform().timer_armed());
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::Disconnect]);
    assert_eq!(svc.ota_progress(), None);

    reconnect(&mut svc, T0 + 100);
    svc.on_mtu_changed(247).unwrap();
    uplinks(&mut svc);

    ota(&mut svc, OtaType::Request, &req).unwrap();
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].payload, vec![0x03, 10, 128, 3, 20, 0, 0, 0x10, 0x00, 5]);
    assert_eq!(svc.ota_progress(), Some((4096, 10_000)));

    stream(&mut svc, &img[4096..]);
    let ups = uplinks(&mut svc);
    assert_eq!(ups.last().unwrap().payload, vec![CheckResult::Valid as u8]);
    assert_eq!(staged(&svc, img.len()), img);
}

#[test]
fn retry_exhaustion_aborts_with_timeout() {
    let mut svc = ready();
    ota(&mut svc, OtaType::Request, &request(1000, 0)).unwrap();
    uplinks(&mut svc);

    let max = svc.config().ota.max_retry;
    for _ in 1..max {
        svc.on_ota_timer().unwrap();
        assert!(svc.platform().timer_armed());
    }
    let ups = uplinks(&mut svc);
    assert_eq!(ups.len(), usize::from(max - 1));
    assert!(ups.iter().all(|u| u.payload == vec![9, 0, 0, 0, 0]));

    svc.on_ota_timer().unwrap();
    assert!(uplinks(&mut svc).is_empty());
    assert!(!svc.platform().timer_armed());
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::Timeout]);
    assert_eq!(svc.ota_progress(), None);
}

#[test]
fn out_of_order_gets_one_reply_per_loop() {
    let mut svc = ready();
    let img = image(4000);
    ota(&mut svc, OtaType::Request, &request(img.len(), crc32fast::hash(&img))).unwrap();
    stream(&mut svc, &img[..3 * PACKAGE]);
    uplinks(&mut svc);
    let arms = svc.platform().timer_arms;

    // seq 5 three times while 3 is expected
    for _ in 0..3 {
        let mut p = vec![5u8];
        p.extend_from_slice(&img[..PACKAGE]);
        ota(&mut svc, OtaType::Package, &p).unwrap();
    }
    let ups = uplinks(&mut svc);
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].payload, vec![2, 0, 0, 0x01, 0x80]);
    assert_eq!(svc.platform().timer_arms, arms + 1);
    assert_eq!(svc.ota_progress(), Some((3 * PACKAGE as u32, 4000)));
}

#[test]
fn crc_mismatch_is_reported() {
    let mut svc = ready();
    let img = image(3000);
    ota(&mut svc, OtaType::Request, &request(img.len(), 0xDEAD_BEEF)).unwrap();
    stream(&mut svc, &img);
    let ups = uplinks(&mut svc);
    assert_eq!(ups.last().unwrap().payload, vec![CheckResult::CrcError as u8]);
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::CrcError]);
}

#[test]
fn validator_rejection_is_file_error() {
    let mut svc = ready();
    svc.platform_mut().file_ok = false;
    let img = image(500);
    ota(&mut svc, OtaType::Request, &request(img.len(), crc32fast::hash(&img))).unwrap();
    stream(&mut svc, &img);
    let ups = uplinks(&mut svc);
    assert_eq!(ups.last().unwrap().payload, vec![CheckResult::FileError as u8]);
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::FileError]);
}

#[test]
fn policy_denial_is_a_reply() {
    let mut svc = ready();
    svc.platform_mut().verdict = OtaVerdict::Deny(OtaDenyReason::LowBattery);
    ota(&mut svc, OtaType::Request, &request(100, 0)).unwrap();
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].payload, vec![0, OtaDenyReason::LowBattery as u8]);
    assert_eq!(svc.ota_progress(), None);
}

#[test]
fn timer_failure_denies_busy() {
    let mut svc = ready();
    svc.platform_mut().fail_timer(true);
    ota(&mut svc, OtaType::Request, &request(100, 0)).unwrap();
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].payload, vec![0, OtaDenyReason::Busy as u8]);
    assert_eq!(svc.ota_progress(), None);
}

#[test]
fn explicit_end_checks_what_arrived() {
    let mut svc = ready();
    let img = image(1000);
    ota(&mut svc, OtaType::Request, &request(img.len(), crc32fast::hash(&img))).unwrap();
    stream(&mut svc, &img[..512]);
    uplinks(&mut svc);
    ota(&mut svc, OtaType::End, &[]).unwrap();
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].type_byte, UplinkType::OtaCheckResult as u8);
    assert_eq!(ups[0].payload, vec![CheckResult::CrcError as u8]);
    assert!(!svc.platform().timer_armed());
}

#[test]
fn restart_reports_the_replaced_session() {
    let mut svc = ready();
    let first = image(10_000);
    ota(&mut svc, OtaType::Request, &request(first.len(), crc32fast::hash(&first))).unwrap();
    stream(&mut svc, &first[..PACKAGE]);

    let second = image(3000);
    ota(&mut svc, OtaType::Request, &request(second.len(), crc32fast::hash(&second))).unwrap();
    assert_eq!(svc.platform().ota_started.len(), 2);
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::Superseded]);
    assert!(
        svc.platform()
            .events
            .contains(&LlsyncEvent::OtaStopped(OtaStopReason::Superseded))
    );
    assert_eq!(svc.ota_progress(), Some((0, 3000)));
    assert!(svc.platform().timer_armed());
}

#[test]
fn overflow_is_announced_to_the_peer() {
    let mut svc = ready();
    ota(&mut svc, OtaType::Request, &request(100, 0)).unwrap();
    uplinks(&mut svc);

    let mut p = vec![0u8];
    p.extend_from_slice(&[0x11; PACKAGE]);
    let r = ota(&mut svc, OtaType::Package, &p);
    assert_eq!(r, Err(Error::Ota(OtaError::Overflow)));

    let ups = uplinks(&mut svc);
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].type_byte, UplinkType::OtaCheckResult as u8);
    assert_eq!(ups[0].payload, vec![CheckResult::FileError as u8]);
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::FileError]);
    assert!(!svc.platform().timer_armed());
}

#[test]
fn flash_failure_is_announced_to_the_peer() {
    let mut svc = ready();
    let img = image(8192);
    ota(&mut svc, OtaType::Request, &request(img.len(), crc32fast::hash(&img))).unwrap();
    svc.platform_mut().flash.fail_writes(true);

    let loop_len = svc.config().ota.packages_per_loop;
    let mut result = Ok(());
    for (i, chunk) in img.chunks(PACKAGE).enumerate() {
        let mut p = vec![(i % usize::from(loop_len)) as u8];
        p.extend_from_slice(chunk);
        result = ota(&mut svc, OtaType::Package, &p);
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(Error::Ota(OtaError::WriteFailed)));

    let last = uplinks(&mut svc).pop().unwrap();
    assert_eq!(last.type_byte, UplinkType::OtaCheckResult as u8);
    assert_eq!(last.payload, vec![CheckResult::ReadError as u8]);
    assert_eq!(svc.platform().ota_stopped, vec![OtaStopReason::WriteError]);
    assert_eq!(svc.ota_progress(), None);
}
