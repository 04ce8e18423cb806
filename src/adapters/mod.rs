//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements            | Connects to                 |
//! |-------------|-----------------------|-----------------------------|
//! | `device_id` | (MAC for advertising) | eFuse / fixed sim MAC       |
//! | `flash`     | FlashPort             | OTA partition / RAM         |
//! | `log_sink`  | EventSink             | Serial log output           |
//! | `nvs`       | ConfigPort            | NVS / in-memory store       |
//! |             | StoragePort           |                             |
//! | `ota_timer` | OtaTimerPort          | ESP-IDF esp_timer           |
//! | `sim`       | Platform (all ports)  | Host tests and simulation   |

pub mod device_id;
pub mod flash;
pub mod log_sink;
pub mod nvs;
#[cfg(target_os = "espidf")]
pub mod ota_timer;
#[cfg(not(target_os = "espidf"))]
pub mod sim;
