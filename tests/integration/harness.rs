//! Shared peer-side helpers: a scripted companion app.

use llsync::Result;
use llsync::adapters::sim::{SimPlatform, Uplink, downlink_slices};
use llsync::app::service::LlsyncService;
use llsync::config::LlsyncConfig;
use llsync::llsync::auth::sign;
use llsync::llsync::identity::store_secret;
use llsync::llsync::msg::{CharId, DeviceInfoType, OtaType};

pub const PRODUCT_ID: &str = "J5ZEN7LD4Q";
pub const DEVICE_NAME: &str = "lamp-01";
pub const SECRET: &[u8] = b"device-secret-0123456789";
pub const PSK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
pub const IDENTIFY: [u8; 8] = *b"IDENT001";
pub const T0: u32 = 1_700_000_000;

pub type Svc = LlsyncService<SimPlatform>;

pub fn config() -> LlsyncConfig {
    LlsyncConfig::new(PRODUCT_ID, DEVICE_NAME).unwrap()
}

/// A started service with the device secret provisioned.
pub fn service_with(cfg: LlsyncConfig) -> Svc {
    let mut sim = SimPlatform::new();
    store_secret(&mut sim, SECRET).unwrap();
    let mut svc = LlsyncService::new(sim, cfg).unwrap();
    svc.start().unwrap();
    svc
}

pub fn service() -> Svc {
    service_with(config())
}

/// Slice `payload` at the current MTU and write every slice to `char`.
/// Returns the result of the last write.
pub fn write(svc: &mut Svc, char: CharId, type_byte: u8, payload: &[u8]) -> Result<()> {
    let slices = downlink_slices(svc.mtu(), type_byte, &[], payload).unwrap();
    let mut last = Ok(());
    for s in slices {
        last = svc.on_gatt_write(char.uuid16(), &s);
    }
    last
}

pub fn device_info(svc: &mut Svc, ty: DeviceInfoType, payload: &[u8]) -> Result<()> {
    write(svc, CharId::DeviceInfo, ty as u8, payload)
}

pub fn ota(svc: &mut Svc, ty: OtaType, payload: &[u8]) -> Result<()> {
    write(svc, CharId::Ota, ty as u8, payload)
}

pub fn sync_time(nonce: u32, ts: u32) -> Vec<u8> {
    let mut p = nonce.to_be_bytes().to_vec();
    p.extend_from_slice(&ts.to_be_bytes());
    p
}

pub fn bind_success() -> Vec<u8> {
    let mut p = PSK.to_vec();
    p.extend_from_slice(&IDENTIFY);
    p
}

/// `{ts, HMAC-SHA1(ts, psk)}` as the app sends it.
pub fn connect_valid(ts: u32, psk: &[u8]) -> Vec<u8> {
    let ts_be = ts.to_be_bytes();
    let mut p = ts_be.to_vec();
    p.extend_from_slice(&sign(psk, &[ts_be.as_slice()]));
    p
}

pub fn uplinks(svc: &mut Svc) -> Vec<Uplink> {
    svc.platform_mut().take_uplinks()
}

/// Connect and run the full first-time bind; clears recorded traffic.
pub fn bind(svc: &mut Svc) {
    svc.on_connect();
    device_info(svc, DeviceInfoType::SyncTime, &sync_time(5, T0)).unwrap();
    device_info(svc, DeviceInfoType::BindSuccess, &bind_success()).unwrap();
    uplinks(svc);
    svc.platform_mut().take_events();
}

/// Drop the link and come back through connect-valid + connect-success.
pub fn reconnect(svc: &mut Svc, ts: u32) {
    svc.on_disconnect();
    svc.on_connect();
    device_info(svc, DeviceInfoType::ConnValid, &connect_valid(ts, &PSK)).unwrap();
    device_info(svc, DeviceInfoType::ConnSuccess, &[]).unwrap();
    uplinks(svc);
    svc.platform_mut().take_events();
}

/// A connected, bound and authenticated service.
pub fn authenticated() -> Svc {
    let mut svc = service();
    bind(&mut svc);
    assert!(svc.is_authenticated());
    svc
}
