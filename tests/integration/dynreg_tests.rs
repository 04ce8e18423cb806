//! Dynamic registration: a device with only a product secret gets its
//! device secret from the peer, then binds with it.

use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use llsync::Error;
use llsync::adapters::sim::SimPlatform;
use llsync::app::events::LlsyncEvent;
use llsync::app::service::LlsyncService;
use llsync::config::LlsyncConfig;
use llsync::llsync::adv::DYNREG_PENDING;
use llsync::llsync::dynreg::DynRegError;
use llsync::llsync::identity::{BindState, load_secret};
use llsync::llsync::msg::{DeviceInfoType, UplinkType};

use super::harness::*;

const PRODUCT_SECRET: &str = "0123456789abcdefPRODSECRET";
const ISSUED: &[u8] = b"VGhpc0lzQVNlY3JldEtleQ==";

fn dynreg_config() -> LlsyncConfig {
    let mut cfg = config();
    cfg.dynreg_enabled = true;
    cfg.product_secret = Some(heapless::String::try_from(PRODUCT_SECRET).unwrap());
    cfg
}

/// A started service with no device secret yet.
fn unprovisioned() -> Svc {
    let mut svc = LlsyncService::new(SimPlatform::new(), dynreg_config()).unwrap();
    svc.start().unwrap();
    svc
}

/// What the cloud returns: AES-128-CBC, zero padded, IV of ASCII zeros.
fn encrypt(secret: &[u8]) -> Vec<u8> {
    let len = secret.len().div_ceil(16) * 16;
    let mut buf = vec![0u8; len];
    buf[..secret.len()].copy_from_slice(secret);
    cbc::Encryptor::<aes::Aes128>::new_from_slices(&PRODUCT_SECRET.as_bytes()[..16], &[b'0'; 16])
        .unwrap()
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .unwrap();
    buf
}

#[test]
fn advertises_registration_pending() {
    let svc = unprovisioned();
    let adv = svc.platform().advertising.clone().unwrap();
    assert_eq!(adv[2] & DYNREG_PENDING, DYNREG_PENDING);
    assert_eq!(adv[2] & 0x03, BindState::Idle as u8);
}

#[test]
fn register_then_bind() {
    let mut svc = unprovisioned();
    svc.on_connect();

    device_info(&mut svc, DeviceInfoType::DynRegRequest, &sync_time(7, T0)).unwrap();
    let ups = uplinks(&mut svc);
    assert_eq!(ups[0].type_byte, UplinkType::DynRegSign as u8);
    assert_eq!(ups[0].payload.len(), 20 + DEVICE_NAME.len());
    assert_eq!(&ups[0].payload[20..], DEVICE_NAME.as_bytes());

    // 32-byte ciphertext arrives in two slices at the default MTU
    device_info(&mut svc, DeviceInfoType::DynRegResult, &encrypt(ISSUED)).unwrap();
    assert_eq!(load_secret(svc.platform()).unwrap().as_slice(), ISSUED);
    assert!(svc.platform().events.contains(&LlsyncEvent::SecretProvisioned));

    device_info(&mut svc, DeviceInfoType::SyncTime, &sync_time(5, T0)).unwrap();
    device_info(&mut svc, DeviceInfoType::BindSuccess, &bind_success()).unwrap();
    assert_eq!(svc.bind_state(), BindState::Bound);

    // the next advertisement drops the pending flag
    svc.on_disconnect();
    let adv = svc.platform().advertising.clone().unwrap();
    assert_eq!(adv[2] & DYNREG_PENDING, 0);
}

#[test]
fn dynreg_disabled_is_refused() {
    let mut svc = service();
    svc.on_connect();
    let r = device_info(&mut svc, DeviceInfoType::DynRegRequest, &sync_time(7, T0));
    assert_eq!(r, Err(Error::DynReg(DynRegError::Disabled)));
    assert!(uplinks(&mut svc).is_empty());
}

/// Connect and send a registration request; clears recorded traffic.
fn requested(svc: &mut Svc) {
    svc.on_connect();
    device_info(svc, DeviceInfoType::DynRegRequest, &sync_time(7, T0)).unwrap();
    uplinks(svc);
}

#[test]
fn garbage_result_keeps_store_empty() {
    let mut svc = unprovisioned();
    requested(&mut svc);
    let r = device_info(&mut svc, DeviceInfoType::DynRegResult, &[0xAB; 15]);
    assert_eq!(r, Err(Error::DynReg(DynRegError::BadLength)));
    assert!(load_secret(svc.platform()).is_none());

    // a failed result ends the exchange; a retry needs a new request
    let r = device_info(&mut svc, DeviceInfoType::DynRegResult, &encrypt(ISSUED));
    assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
    assert!(load_secret(svc.platform()).is_none());
}

#[test]
fn unsolicited_result_is_refused() {
    let mut svc = unprovisioned();
    svc.on_connect();
    let r = device_info(&mut svc, DeviceInfoType::DynRegResult, &encrypt(ISSUED));
    assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
    assert!(load_secret(svc.platform()).is_none());
    assert!(!svc.platform().events.contains(&LlsyncEvent::SecretProvisioned));
}

#[test]
fn request_does_not_survive_reconnect() {
    let mut svc = unprovisioned();
    requested(&mut svc);
    svc.on_disconnect();
    svc.on_connect();
    let r = device_info(&mut svc, DeviceInfoType::DynRegResult, &encrypt(ISSUED));
    assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
    assert!(load_secret(svc.platform()).is_none());
}

#[test]
fn provisioned_secret_cannot_be_replaced() {
    let mut svc = service_with(dynreg_config());
    svc.on_connect();

    let r = device_info(&mut svc, DeviceInfoType::DynRegRequest, &sync_time(7, T0));
    assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
    assert!(uplinks(&mut svc).is_empty());

    for forged in [vec![0xAB; 16], encrypt(&[0x55; 16])] {
        let r = device_info(&mut svc, DeviceInfoType::DynRegResult, &forged);
        assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
        assert_eq!(load_secret(svc.platform()).unwrap().as_slice(), SECRET);
    }
}

#[test]
fn bound_device_ignores_registration() {
    let mut svc = unprovisioned();
    requested(&mut svc);
    device_info(&mut svc, DeviceInfoType::DynRegResult, &encrypt(ISSUED)).unwrap();
    device_info(&mut svc, DeviceInfoType::SyncTime, &sync_time(5, T0)).unwrap();
    device_info(&mut svc, DeviceInfoType::BindSuccess, &bind_success()).unwrap();
    assert_eq!(svc.bind_state(), BindState::Bound);

    let r = device_info(&mut svc, DeviceInfoType::DynRegRequest, &sync_time(8, T0));
    assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
    let r = device_info(&mut svc, DeviceInfoType::DynRegResult, &encrypt(&[0x55; 16]));
    assert_eq!(r, Err(Error::DynReg(DynRegError::WrongState)));
    assert_eq!(load_secret(svc.platform()).unwrap().as_slice(), ISSUED);
}

#[test]
fn short_request_is_rejected() {
    let mut svc = unprovisioned();
    svc.on_connect();
    let r = device_info(&mut svc, DeviceInfoType::DynRegRequest, &[0, 0, 0, 7]);
    assert_eq!(r, Err(Error::DynReg(DynRegError::BadLength)));
}
