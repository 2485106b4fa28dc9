//! Direct-save runtime translation (§4.E reference model): the behavior the
//! EEPROM/FLASH stand-ins exhibit once installed in a ROM, translating
//! save-chip accesses into `SdBlockDevice`/`SramMirror` operations. Grounded
//! on `directsave_emu.c`'s `ds_read_eeprom`/`ds_write_eeprom`/`ds_read_flash`/
//! `ds_write_sector_flash`/`ds_erase_chip_flash`/`ds_erase_sector_flash`.

use crate::directsave::config::{DirectSaveConfig, DIRSAVE_CFG_SIZE};
use crate::error::DirectSaveError;
use crate::traits::{SdBlockDevice, SramMirror};

const EEPROM_BLOCK_BYTES: u32 = 8;
const SD_BLOCK_BYTES: u32 = 512;
const MAX_BLOCKS_PER_TRANSFER: u32 = 64;
const FLASH_SECTOR_BYTES: u32 = 4096;
const ERASE_RUN_BLOCKS: u32 = 32;

const SD_MUTEX_OFFSET: usize = 23; // DIRSAV_CFG_MUTEX_OFF

/// Drives the translation between save-chip accesses and the SD card,
/// standing in for the installed EEPROM/FLASH stand-in routines. `cache`
/// is the SRAM region the EEPROM stand-in mirrors for fast reads; `config`
/// is the SRAM region holding the [`DirectSaveConfig`].
pub struct DirectSaveRuntime<'a, S: SdBlockDevice, M: SramMirror> {
    sd: &'a mut S,
    cache: &'a mut M,
    config_offset: usize,
}

impl<'a, S: SdBlockDevice, M: SramMirror> DirectSaveRuntime<'a, S, M> {
    pub fn new(sd: &'a mut S, cache: &'a mut M, config_offset: usize) -> Self {
        DirectSaveRuntime { sd, cache, config_offset }
    }

    fn read_config(&self) -> Result<DirectSaveConfig, DirectSaveError> {
        let mut bytes = [0u8; DIRSAVE_CFG_SIZE];
        self.cache.read(self.config_offset, &mut bytes);
        let cfg = DirectSaveConfig::from_bytes(&bytes);
        if cfg.is_valid() {
            Ok(cfg)
        } else {
            log::warn!("direct-save config at SRAM offset {} failed validation", self.config_offset);
            Err(DirectSaveError::InvalidConfig)
        }
    }

    fn set_mutex(&mut self, held: bool) {
        self.cache.write(self.config_offset + SD_MUTEX_OFFSET, &[held as u8]);
    }

    /// Reads one 8-byte EEPROM block straight from the SRAM cache, in
    /// reversed byte order as the real EEPROM bus would present it.
    pub fn read_eeprom(&mut self, block_num: u32, buf: &mut [u8; 8]) -> Result<(), DirectSaveError> {
        let cfg = self.read_config()?;
        if block_num as u64 * EEPROM_BLOCK_BYTES as u64 >= cfg.memory_size as u64 {
            return Err(DirectSaveError::OutOfRange);
        }
        let mut raw = [0u8; 8];
        self.cache.read(block_num as usize * EEPROM_BLOCK_BYTES as usize, &mut raw);
        for i in 0..8 {
            buf[i] = raw[7 - i];
        }
        Ok(())
    }

    /// Writes one 8-byte EEPROM block into the SRAM cache (reversed byte
    /// order) and flushes the containing 512-byte sector to the SD card.
    pub fn write_eeprom(&mut self, block_num: u32, buf: &[u8; 8]) -> Result<(), DirectSaveError> {
        let cfg = self.read_config()?;
        if block_num as u64 * EEPROM_BLOCK_BYTES as u64 >= cfg.memory_size as u64 {
            return Err(DirectSaveError::OutOfRange);
        }

        self.set_mutex(true);
        let sram_off = block_num as usize * EEPROM_BLOCK_BYTES as usize;
        let mut reversed = [0u8; 8];
        for i in 0..8 {
            reversed[i] = buf[7 - i];
        }
        self.cache.write(sram_off, &reversed);

        let sram_sdoff = sram_off & !(SD_BLOCK_BYTES as usize - 1);
        let mut sector = vec![0u8; SD_BLOCK_BYTES as usize];
        self.cache.read(sram_sdoff, &mut sector);

        let sdblocknum = block_num / (SD_BLOCK_BYTES / EEPROM_BLOCK_BYTES) + cfg.base_sector;
        let result = self.sd.write_blocks(sdblocknum, &sector).map_err(|_| {
            log::warn!("SD write failed flushing EEPROM block {block_num} to SD block {sdblocknum}");
            DirectSaveError::BlockDeviceFailed
        });
        self.set_mutex(false);
        result
    }

    /// Reads `buf.len()` FLASH bytes starting at `offset`, via 512-byte
    /// aligned SD reads capped at 64 blocks (32 KiB) per transfer.
    pub fn read_flash(&mut self, buf: &mut [u8], mut offset: u32) -> Result<(), DirectSaveError> {
        let cfg = self.read_config()?;
        let msize = cfg.memory_size;
        let bytecount = buf.len() as u32;
        if offset > msize || bytecount > msize || offset + bytecount > msize {
            return Err(DirectSaveError::OutOfRange);
        }

        let mut written = 0usize;
        let mut remaining = bytecount;
        while remaining > 0 {
            let start_blk = offset / SD_BLOCK_BYTES;
            let end_blk = (offset + remaining - 1) / SD_BLOCK_BYTES;
            let bcnt = (end_blk - start_blk + 1).min(MAX_BLOCKS_PER_TRANSFER);

            let mut scratch = vec![0u8; bcnt as usize * SD_BLOCK_BYTES as usize];
            self.sd
                .read_blocks(cfg.base_sector + start_blk, &mut scratch)
                .map_err(|_| DirectSaveError::BlockDeviceFailed)?;

            let blkoff = (offset & (SD_BLOCK_BYTES - 1)) as usize;
            let tocpy = remaining.min(bcnt * SD_BLOCK_BYTES - blkoff as u32) as usize;
            buf[written..written + tocpy].copy_from_slice(&scratch[blkoff..blkoff + tocpy]);

            written += tocpy;
            offset += tocpy as u32;
            remaining -= tocpy as u32;
        }
        Ok(())
    }

    /// Writes one already-erased 4 KiB FLASH sector verbatim.
    pub fn write_sector_flash(&mut self, sectnum: u32, buf: &[u8]) -> Result<(), DirectSaveError> {
        let cfg = self.read_config()?;
        if sectnum as u64 * FLASH_SECTOR_BYTES as u64 > cfg.memory_size as u64 {
            return Err(DirectSaveError::OutOfRange);
        }
        let blocks_per_sector = FLASH_SECTOR_BYTES / SD_BLOCK_BYTES;

        self.set_mutex(true);
        let result = self
            .sd
            .write_blocks(cfg.base_sector + sectnum * blocks_per_sector, buf)
            .map_err(|_| DirectSaveError::BlockDeviceFailed);
        self.set_mutex(false);
        result
    }

    /// Erases the whole FLASH region, writing 0xFF in 32-block (16 KiB)
    /// runs.
    pub fn erase_chip_flash(&mut self) -> Result<(), DirectSaveError> {
        let cfg = self.read_config()?;
        let memblks = cfg.memory_size / SD_BLOCK_BYTES;
        let blank = vec![0xFFu8; ERASE_RUN_BLOCKS as usize * SD_BLOCK_BYTES as usize];

        self.set_mutex(true);
        let mut result = Ok(());
        let mut s = 0u32;
        while s < memblks {
            let n = ERASE_RUN_BLOCKS.min(memblks - s);
            let chunk = &blank[..n as usize * SD_BLOCK_BYTES as usize];
            if self.sd.write_blocks(cfg.base_sector + s, chunk).is_err() {
                result = Err(DirectSaveError::BlockDeviceFailed);
                break;
            }
            s += ERASE_RUN_BLOCKS;
        }
        self.set_mutex(false);
        result
    }

    /// Erases one 4 KiB FLASH sector, writing 0xFF throughout.
    pub fn erase_sector_flash(&mut self, sectnum: u32) -> Result<(), DirectSaveError> {
        let cfg = self.read_config()?;
        if sectnum as u64 * FLASH_SECTOR_BYTES as u64 > cfg.memory_size as u64 {
            return Err(DirectSaveError::OutOfRange);
        }
        let blocks_per_sector = FLASH_SECTOR_BYTES / SD_BLOCK_BYTES;
        let blank = vec![0xFFu8; FLASH_SECTOR_BYTES as usize];

        self.set_mutex(true);
        let result = self
            .sd
            .write_blocks(cfg.base_sector + sectnum * blocks_per_sector, &blank)
            .map_err(|_| DirectSaveError::BlockDeviceFailed);
        self.set_mutex(false);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSd {
        blocks: HashMap<u32, [u8; 512]>,
    }
    impl SdBlockDevice for FakeSd {
        type Error = ();
        fn read_blocks(&mut self, first_block: u32, buf: &mut [u8]) -> Result<(), ()> {
            for (i, chunk) in buf.chunks_mut(512).enumerate() {
                let blk = self.blocks.get(&(first_block + i as u32)).copied().unwrap_or([0u8; 512]);
                chunk.copy_from_slice(&blk);
            }
            Ok(())
        }
        fn write_blocks(&mut self, first_block: u32, buf: &[u8]) -> Result<(), ()> {
            for (i, chunk) in buf.chunks(512).enumerate() {
                let mut blk = [0u8; 512];
                blk[..chunk.len()].copy_from_slice(chunk);
                self.blocks.insert(first_block + i as u32, blk);
            }
            Ok(())
        }
    }

    struct FakeSram {
        mem: Vec<u8>,
    }
    impl SramMirror for FakeSram {
        fn read(&self, offset: usize, buf: &mut [u8]) {
            buf.copy_from_slice(&self.mem[offset..offset + buf.len()]);
        }
        fn write(&mut self, offset: usize, buf: &[u8]) {
            self.mem[offset..offset + buf.len()].copy_from_slice(buf);
        }
    }

    fn seeded(memory_size: u32, base_sector: u32) -> (FakeSd, FakeSram) {
        let cfg = DirectSaveConfig::new(0xCAFE, memory_size, base_sector, 0, false);
        let mut mem = vec![0u8; 4096];
        mem[1024..1024 + DIRSAVE_CFG_SIZE].copy_from_slice(&cfg.to_bytes());
        (FakeSd { blocks: HashMap::new() }, FakeSram { mem })
    }

    #[test]
    fn eeprom_write_then_read_round_trips_and_reverses_bytes() {
        let (mut sd, mut sram) = seeded(8 * 1024, 100);
        let mut rt = DirectSaveRuntime::new(&mut sd, &mut sram, 1024);

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        rt.write_eeprom(0, &data).unwrap();

        let mut back = [0u8; 8];
        rt.read_eeprom(0, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn eeprom_rejects_out_of_range_block() {
        let (mut sd, mut sram) = seeded(16, 100);
        let mut rt = DirectSaveRuntime::new(&mut sd, &mut sram, 1024);
        let mut buf = [0u8; 8];
        assert_eq!(rt.read_eeprom(10, &mut buf).unwrap_err(), DirectSaveError::OutOfRange);
    }

    #[test]
    fn flash_write_sector_then_read_back() {
        let (mut sd, mut sram) = seeded(64 * 1024, 100);
        let mut rt = DirectSaveRuntime::new(&mut sd, &mut sram, 1024);

        let sector = vec![0x42u8; 4096];
        rt.write_sector_flash(2, &sector).unwrap();

        let mut out = vec![0u8; 4096];
        rt.read_flash(&mut out, 2 * 4096).unwrap();
        assert_eq!(out, sector);
    }

    #[test]
    fn erase_chip_writes_all_ones() {
        let (mut sd, mut sram) = seeded(32 * 1024, 100);
        let mut rt = DirectSaveRuntime::new(&mut sd, &mut sram, 1024);
        rt.erase_chip_flash().unwrap();

        let mut out = vec![0u8; 32 * 1024];
        rt.read_flash(&mut out, 0).unwrap();
        assert!(out.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn invalid_config_rejects_every_operation() {
        let mut sram = FakeSram { mem: vec![0u8; 4096] };
        let mut sd = FakeSd { blocks: HashMap::new() };
        let mut rt = DirectSaveRuntime::new(&mut sd, &mut sram, 1024);
        let mut buf = [0u8; 8];
        assert_eq!(rt.read_eeprom(0, &mut buf).unwrap_err(), DirectSaveError::InvalidConfig);
    }
}
