//! Data-template traffic on an authenticated link.

use llsync::Error;
use llsync::adapters::sim::downlink_slices;
use llsync::llsync::msg::{CharId, DataKind, UplinkType};

use super::harness::*;

fn data_type(kind: DataKind, id: u8) -> u8 {
    (kind as u8) << 5 | id
}

fn data(svc: &mut Svc, kind: DataKind, id: u8, payload: &[u8]) -> llsync::Result<()> {
    write(svc, CharId::Data, data_type(kind, id), payload)
}

#[test]
fn control_is_answered_with_result() {
    let mut svc = authenticated();
    svc.platform_mut().data.control_result = 0;
    let tlv = [0x20, 0x01, 0x01];
    data(&mut svc, DataKind::Control, 0, &tlv).unwrap();

    assert_eq!(svc.platform().data.controls, vec![tlv.to_vec()]);
    let ups = uplinks(&mut svc);
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].type_byte, UplinkType::ControlReply as u8);
    assert_eq!(ups[0].payload, vec![0]);
}

#[test]
fn sliced_control_reaches_the_handler_whole() {
    let mut svc = authenticated();
    let tlv: Vec<u8> = (0..60).collect();
    data(&mut svc, DataKind::Control, 0, &tlv).unwrap();
    assert_eq!(svc.platform().data.controls, vec![tlv]);
}

#[test]
fn action_reply_carries_id_and_result_header() {
    let mut svc = authenticated();
    svc.platform_mut().data.action_result = 1;
    svc.platform_mut().data.action_output = vec![0x43, 0x02, 0xAB, 0xCD];
    data(&mut svc, DataKind::Action, 3, &[0x40, 0x05]).unwrap();

    assert_eq!(svc.platform().data.actions, vec![(3, vec![0x40, 0x05])]);
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].type_byte, UplinkType::ActionReply as u8 | 3);
    assert_eq!(ups[0].header, vec![1]);
    assert_eq!(ups[0].payload, vec![0x43, 0x02, 0xAB, 0xCD]);
}

#[test]
fn long_action_output_repeats_header_in_every_slice() {
    let mut svc = authenticated();
    svc.platform_mut().data.action_output = (0..50).collect();
    data(&mut svc, DataKind::Action, 1, &[]).unwrap();

    let raw = svc.platform().notifications.clone();
    assert!(raw.len() > 1);
    assert!(raw.iter().all(|s| s[0] == 0x81 && s[3] == 0));
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].payload, (0..50).collect::<Vec<u8>>());
}

#[test]
fn status_reply_splits_result_from_tlv() {
    let mut svc = authenticated();
    let tlv: Vec<u8> = (0..40).collect();
    let ty = data_type(DataKind::GetStatusReply, 0);
    for s in downlink_slices(svc.mtu(), ty, &[0], &tlv).unwrap() {
        svc.on_gatt_write(CharId::Data.uuid16(), &s).unwrap();
    }
    assert_eq!(svc.platform().data.status_replies, vec![(0, tlv)]);
    assert!(uplinks(&mut svc).is_empty());
}

#[test]
fn report_and_event_replies_reach_the_handler() {
    let mut svc = authenticated();
    data(&mut svc, DataKind::ReportReply, 0, &[0]).unwrap();
    data(&mut svc, DataKind::EventReply, 2, &[1]).unwrap();
    assert_eq!(svc.platform().data.report_replies, vec![0]);
    assert_eq!(svc.platform().data.event_replies, vec![(2, 1)]);
}

#[test]
fn device_initiated_uplinks() {
    let mut svc = authenticated();
    let tlv: Vec<u8> = (0..45).collect();
    svc.report_properties(&tlv).unwrap();
    svc.post_event(4, &[0x00, 0x01]).unwrap();
    svc.request_status().unwrap();

    let ups = uplinks(&mut svc);
    assert_eq!(ups.len(), 3);
    assert_eq!(ups[0].type_byte, UplinkType::PropertyReport as u8);
    assert_eq!(ups[0].payload, tlv);
    assert_eq!(ups[1].type_byte, UplinkType::EventPost as u8 | 4);
    assert_eq!(ups[2].type_byte, UplinkType::GetStatus as u8);
    assert!(ups[2].payload.is_empty());
}

#[test]
fn data_before_authentication_is_refused() {
    let mut svc = service();
    svc.on_connect();
    let r = data(&mut svc, DataKind::Control, 0, &[1]);
    assert_eq!(r, Err(Error::NotAuthenticated));
    assert!(svc.platform().data.controls.is_empty());
    assert_eq!(svc.report_properties(&[1]), Err(Error::NotAuthenticated));
    assert!(uplinks(&mut svc).is_empty());
}

#[test]
fn reports_fail_when_disconnected() {
    let mut svc = authenticated();
    svc.on_disconnect();
    assert!(svc.report_properties(&[1]).is_err());
    assert!(svc.platform().notifications.is_empty());
}
