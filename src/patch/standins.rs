//! Catalog of precompiled stand-in routines (§4.E) and save-flavor dispatch.
//!
//! The actual position-independent ARM/Thumb machine code for each stand-in
//! is produced by a separate toolchain step and is out of scope here (same
//! category as the low-level NOR/SD command sequences). What's modeled is
//! the catalog shape the applier consumes: one small `&'static [u8]` body
//! per routine, each an even number of bytes (the applier copies them
//! halfword by halfword), plus the flavor-dispatch rule. A firmware build
//! swaps these placeholder bodies for `include_bytes!` of the linked
//! stand-in objects; nothing else changes.

use crate::savetype::SaveType;

/// A precompiled, position-independent stand-in body. Its first halfword is
/// the entry point.
#[derive(Debug, Clone, Copy)]
pub struct StandinBody(pub &'static [u8]);

impl StandinBody {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// EEPROM/FLASH stand-ins for one save-emulation flavor.
pub struct SaveStandins {
    pub eeprom_read: StandinBody,
    pub eeprom_write: StandinBody,
    pub flash_read: StandinBody,
    pub flash_erase_device: StandinBody,
    pub flash_erase_sector: StandinBody,
    pub flash_write_sector: StandinBody,
    pub flash_write_byte: StandinBody,
}

impl SaveStandins {
    pub fn eeprom(&self, which: u8) -> Option<StandinBody> {
        match which {
            0 => Some(self.eeprom_read),
            1 => Some(self.eeprom_write),
            _ => None,
        }
    }

    pub fn flash(&self, which: u8) -> Option<StandinBody> {
        match which {
            0 => Some(self.flash_read),
            1 => Some(self.flash_erase_device),
            2 => Some(self.flash_erase_sector),
            3 => Some(self.flash_write_sector),
            4 => Some(self.flash_write_byte),
            _ => None,
        }
    }
}

/// RTC stand-ins, one catalog shared by every save flavor.
pub struct RtcStandins {
    pub probe: StandinBody,
    pub reset: StandinBody,
    pub status: StandinBody,
    pub gettimedate: StandinBody,
}

impl RtcStandins {
    pub fn get(&self, which: u8) -> Option<StandinBody> {
        match which {
            0 => Some(self.probe),
            1 => Some(self.reset),
            2 => Some(self.status),
            3 => Some(self.gettimedate),
            _ => None,
        }
    }
}

macro_rules! placeholder {
    ($name:ident, $len:expr) => {
        const $name: [u8; $len] = [0u8; $len];
    };
}

// Placeholder bodies: each stands in for a real linked stand-in object.
// Lengths are deliberately distinct so trailer-offset computation is
// exercised meaningfully in tests even though the contents are inert.
placeholder!(PH_EEPROM_READ_SRAM64K, 16);
placeholder!(PH_EEPROM_WRITE_SRAM64K, 20);
placeholder!(PH_FLASH_READ_SRAM64K, 24);
placeholder!(PH_FLASH_ERASE_DEVICE_SRAM64K, 12);
placeholder!(PH_FLASH_ERASE_SECTOR_SRAM64K, 12);
placeholder!(PH_FLASH_WRITE_SECTOR_SRAM64K, 28);
placeholder!(PH_FLASH_WRITE_BYTE_SRAM64K, 16);

placeholder!(PH_FLASH_READ_SRAM128K, 28);
placeholder!(PH_FLASH_ERASE_DEVICE_SRAM128K, 16);
placeholder!(PH_FLASH_ERASE_SECTOR_SRAM128K, 16);
placeholder!(PH_FLASH_WRITE_SECTOR_SRAM128K, 32);
placeholder!(PH_FLASH_WRITE_BYTE_SRAM128K, 20);

placeholder!(PH_EEPROM_READ_DIRECTSAVE, 32);
placeholder!(PH_EEPROM_WRITE_DIRECTSAVE, 36);
placeholder!(PH_FLASH_READ_DIRECTSAVE, 40);
placeholder!(PH_FLASH_ERASE_DEVICE_DIRECTSAVE, 28);
placeholder!(PH_FLASH_ERASE_SECTOR_DIRECTSAVE, 24);
placeholder!(PH_FLASH_WRITE_SECTOR_DIRECTSAVE, 36);
placeholder!(PH_FLASH_WRITE_BYTE_DIRECTSAVE, 24);

placeholder!(PH_RTC_PROBE, 8);
placeholder!(PH_RTC_RESET, 8);
placeholder!(PH_RTC_GETSTATUS, 12);
placeholder!(PH_RTC_GETTIMEDATE, 20);

pub static SRAM_64K: SaveStandins = SaveStandins {
    eeprom_read: StandinBody(&PH_EEPROM_READ_SRAM64K),
    eeprom_write: StandinBody(&PH_EEPROM_WRITE_SRAM64K),
    flash_read: StandinBody(&PH_FLASH_READ_SRAM64K),
    flash_erase_device: StandinBody(&PH_FLASH_ERASE_DEVICE_SRAM64K),
    flash_erase_sector: StandinBody(&PH_FLASH_ERASE_SECTOR_SRAM64K),
    flash_write_sector: StandinBody(&PH_FLASH_WRITE_SECTOR_SRAM64K),
    flash_write_byte: StandinBody(&PH_FLASH_WRITE_BYTE_SRAM64K),
};

pub static SRAM_128K: SaveStandins = SaveStandins {
    eeprom_read: StandinBody(&PH_EEPROM_READ_SRAM64K),
    eeprom_write: StandinBody(&PH_EEPROM_WRITE_SRAM64K),
    flash_read: StandinBody(&PH_FLASH_READ_SRAM128K),
    flash_erase_device: StandinBody(&PH_FLASH_ERASE_DEVICE_SRAM128K),
    flash_erase_sector: StandinBody(&PH_FLASH_ERASE_SECTOR_SRAM128K),
    flash_write_sector: StandinBody(&PH_FLASH_WRITE_SECTOR_SRAM128K),
    flash_write_byte: StandinBody(&PH_FLASH_WRITE_BYTE_SRAM128K),
};

pub static DIRECT_SAVE: SaveStandins = SaveStandins {
    eeprom_read: StandinBody(&PH_EEPROM_READ_DIRECTSAVE),
    eeprom_write: StandinBody(&PH_EEPROM_WRITE_DIRECTSAVE),
    flash_read: StandinBody(&PH_FLASH_READ_DIRECTSAVE),
    flash_erase_device: StandinBody(&PH_FLASH_ERASE_DEVICE_DIRECTSAVE),
    flash_erase_sector: StandinBody(&PH_FLASH_ERASE_SECTOR_DIRECTSAVE),
    flash_write_sector: StandinBody(&PH_FLASH_WRITE_SECTOR_DIRECTSAVE),
    flash_write_byte: StandinBody(&PH_FLASH_WRITE_BYTE_DIRECTSAVE),
};

pub static RTC: RtcStandins = RtcStandins {
    probe: StandinBody(&PH_RTC_PROBE),
    reset: StandinBody(&PH_RTC_RESET),
    status: StandinBody(&PH_RTC_GETSTATUS),
    gettimedate: StandinBody(&PH_RTC_GETTIMEDATE),
};

/// Which save-emulation flavor an apply pass should install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFlavor {
    Sram64k,
    Sram128k,
    DirectSave,
}

/// Computed once per apply call: direct-save wins whenever a direct-save
/// address is supplied, otherwise the flavor follows the original save
/// chip's declared size.
pub fn select_flavor(ds_addr: Option<u32>, save_mode: SaveType) -> SaveFlavor {
    if ds_addr.is_some() {
        SaveFlavor::DirectSave
    } else if save_mode == SaveType::Flash1024k {
        SaveFlavor::Sram128k
    } else {
        SaveFlavor::Sram64k
    }
}

pub fn standins_for(flavor: SaveFlavor) -> &'static SaveStandins {
    match flavor {
        SaveFlavor::Sram64k => &SRAM_64K,
        SaveFlavor::Sram128k => &SRAM_128K,
        SaveFlavor::DirectSave => &DIRECT_SAVE,
    }
}
