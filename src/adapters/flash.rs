//! Flash adapters for the OTA staging area.
//!
//! - [`RamFlash`]: host simulation with NOR semantics (erase sets 0xFF,
//!   programming can only clear bits). Used by tests and the simulator.
//! - [`PartitionFlash`]: ESP-IDF partition API on target.

use crate::app::ports::{FlashPort, StorageError};
use crate::llsync::ota::PAGE_SIZE;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const ERASED: u8 = 0xFF;

// ── Simulation ───────────────────────────────────────────────

pub struct RamFlash {
    mem: Vec<u8>,
    fail_writes: bool,
}

impl RamFlash {
    /// `size` is rounded up to a whole page.
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![ERASED; size.div_ceil(PAGE_SIZE) * PAGE_SIZE],
            fail_writes: false,
        }
    }

    /// Make every following erase and program fail with `IoError`.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(StorageError::OutOfRange)?;
        if end > self.mem.len() {
            return Err(StorageError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl FlashPort for RamFlash {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        if addr as usize % PAGE_SIZE != 0 || len as usize % PAGE_SIZE != 0 {
            return Err(StorageError::OutOfRange);
        }
        let r = self.range(addr, len as usize)?;
        self.mem[r].fill(ERASED);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        let r = self.range(addr, data.len())?;
        for (cell, b) in self.mem[r].iter_mut().zip(data) {
            *cell &= *b;
        }
        Ok(())
    }

    fn read_at(&self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let r = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[r]);
        Ok(())
    }
}

// ── ESP-IDF partition ────────────────────────────────────────

/// Raw access to one flash partition, addressed from its start.
#[cfg(target_os = "espidf")]
pub struct PartitionFlash {
    part: *const esp_partition_t,
}

#[cfg(target_os = "espidf")]
impl PartitionFlash {
    /// Look up a partition by label (e.g. `c"ota_1"`).
    pub fn find(label: &core::ffi::CStr) -> Option<Self> {
        // SAFETY: the partition table is static for the life of the program.
        let part = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_ANY,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                label.as_ptr(),
            )
        };
        if part.is_null() {
            log::warn!("flash: partition {:?} not found", label);
            return None;
        }
        Some(Self { part })
    }
}

#[cfg(target_os = "espidf")]
impl FlashPort for PartitionFlash {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), StorageError> {
        // SAFETY: `part` came from esp_partition_find_first; bounds are
        // checked by the driver.
        let ret = unsafe { esp_partition_erase_range(self.part, addr as usize, len as usize) };
        if ret == ESP_OK { Ok(()) } else { Err(StorageError::IoError) }
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        let ret = unsafe {
            esp_partition_write(self.part, addr as usize, data.as_ptr().cast(), data.len())
        };
        if ret == ESP_OK { Ok(()) } else { Err(StorageError::IoError) }
    }

    fn read_at(&self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let ret = unsafe {
            esp_partition_read(self.part, addr as usize, buf.as_mut_ptr().cast(), buf.len())
        };
        if ret == ESP_OK { Ok(()) } else { Err(StorageError::IoError) }
    }
}
