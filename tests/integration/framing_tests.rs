//! Slicing and reassembly seen through the service entry points.

use llsync::Error;
use llsync::adapters::sim::downlink_slices;
use llsync::app::ports::TransportError;
use llsync::llsync::msg::{CharId, DataKind, DeviceInfoType, SliceState, UplinkType};
use llsync::llsync::slice::FrameError;

use super::harness::*;

const CONTROL: u8 = (DataKind::Control as u8) << 5;

fn state_of(slice: &[u8]) -> SliceState {
    SliceState::unpack(u16::from_be_bytes([slice[1], slice[2]])).0
}

#[test]
fn large_downlink_reassembles_at_small_mtu() {
    let mut svc = authenticated();
    let tlv: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
    let slices = downlink_slices(svc.mtu(), CONTROL, &[], &tlv).unwrap();
    assert!(slices.len() > 2);
    assert_eq!(state_of(&slices[0]), SliceState::Head);
    assert_eq!(state_of(&slices[1]), SliceState::Body);
    assert_eq!(state_of(slices.last().unwrap()), SliceState::Tail);

    for s in &slices {
        svc.on_gatt_write(CharId::Data.uuid16(), s).unwrap();
    }
    assert_eq!(svc.platform().data.controls, vec![tlv]);
}

#[test]
fn continuation_without_head_is_an_error() {
    let mut svc = authenticated();
    let slices = downlink_slices(svc.mtu(), CONTROL, &[], &[7u8; 40]).unwrap();
    let r = svc.on_gatt_write(CharId::Data.uuid16(), &slices[1]);
    assert_eq!(r, Err(Error::Frame(FrameError::MissingHead)));
    assert!(svc.platform().data.controls.is_empty());
}

#[test]
fn type_change_mid_message_drops_it() {
    let mut svc = authenticated();
    let a = downlink_slices(svc.mtu(), CONTROL, &[], &[1u8; 40]).unwrap();
    let b = downlink_slices(svc.mtu(), CONTROL | 0x01, &[], &[2u8; 40]).unwrap();
    svc.on_gatt_write(CharId::Data.uuid16(), &a[0]).unwrap();
    let r = svc.on_gatt_write(CharId::Data.uuid16(), &b[1]);
    assert_eq!(r, Err(Error::Frame(FrameError::TypeMismatch)));

    // the partial was discarded: its own tail now has no head
    let r = svc.on_gatt_write(CharId::Data.uuid16(), a.last().unwrap());
    assert_eq!(r, Err(Error::Frame(FrameError::MissingHead)));
}

#[test]
fn single_slice_does_not_disturb_assembly() {
    let mut svc = authenticated();
    let long = downlink_slices(svc.mtu(), CONTROL, &[], &[3u8; 40]).unwrap();
    svc.on_gatt_write(CharId::Data.uuid16(), &long[0]).unwrap();

    let short = downlink_slices(svc.mtu(), CONTROL, &[], &[9]).unwrap();
    svc.on_gatt_write(CharId::Data.uuid16(), &short[0]).unwrap();
    for s in &long[1..] {
        svc.on_gatt_write(CharId::Data.uuid16(), s).unwrap();
    }
    assert_eq!(
        svc.platform().data.controls,
        vec![vec![9], vec![3u8; 40]]
    );
}

#[test]
fn truncated_slice_is_rejected() {
    let mut svc = authenticated();
    // declares 10 bytes, carries 2
    let r = svc.on_gatt_write(CharId::Data.uuid16(), &[CONTROL, 0x00, 0x0A, 1, 2]);
    assert_eq!(r, Err(Error::Frame(FrameError::Truncated)));
}

#[test]
fn oversized_message_overflows() {
    let mut svc = authenticated();
    svc.on_mtu_changed(247).unwrap();
    let slices = downlink_slices(svc.mtu(), CONTROL, &[], &[0u8; 1500]).unwrap();
    let mut last = Ok(());
    for s in &slices {
        last = svc.on_gatt_write(CharId::Data.uuid16(), s);
        if last.is_err() {
            break;
        }
    }
    assert_eq!(last, Err(Error::Frame(FrameError::Overflow)));
    assert!(svc.platform().data.controls.is_empty());
}

#[test]
fn unknown_characteristic_and_type_are_dropped() {
    let mut svc = authenticated();
    assert_eq!(svc.on_gatt_write(0x2A00, &[0, 0, 1, 5]), Ok(()));
    assert_eq!(
        svc.on_gatt_write(CharId::DeviceInfo.uuid16(), &[0x7F, 0, 0]),
        Ok(())
    );
    assert_eq!(svc.on_gatt_write(CharId::Gateway.uuid16(), &[0x01, 0, 0]), Ok(()));
    assert!(uplinks(&mut svc).is_empty());
}

#[test]
fn uplinks_follow_negotiated_mtu() {
    let mut svc = authenticated();
    let tlv: Vec<u8> = (0..100).collect();

    svc.report_properties(&tlv).unwrap();
    let small = svc.platform().notifications.len();
    assert!(svc.platform().notifications.iter().all(|s| s.len() <= 20));
    uplinks(&mut svc);

    // peer asks for 100 via set-MTU result
    device_info(&mut svc, DeviceInfoType::SetMtuResult, &100u16.to_be_bytes()).unwrap();
    assert_eq!(svc.mtu(), 100);
    svc.report_properties(&tlv).unwrap();
    assert!(svc.platform().notifications.len() < small);
    assert_eq!(uplinks(&mut svc)[0].payload, tlv);
}

#[test]
fn dev_info_reports_mtu_and_name() {
    let mut svc = service();
    svc.on_connect();
    device_info(&mut svc, DeviceInfoType::GetDevInfo, &[]).unwrap();
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].type_byte, UplinkType::ReportMtu as u8);
    // version, MTU 20 with "remote may set", name length, name
    assert_eq!(&ups[0].payload[..4], &[2, 0x80, 20, DEVICE_NAME.len() as u8]);
    assert_eq!(&ups[0].payload[4..], DEVICE_NAME.as_bytes());
}

#[test]
fn notify_failure_is_propagated() {
    let mut svc = authenticated();
    svc.platform_mut().fail_notify(true);
    assert_eq!(
        svc.report_properties(&[1, 2, 3]),
        Err(Error::Transport(TransportError::SendFailed))
    );
    let r = write(&mut svc, CharId::Data, CONTROL, &[1]);
    assert_eq!(r, Err(Error::Transport(TransportError::SendFailed)));
}
