//! Direct-Save Config record (§3, §4.G): the 24-byte SRAM-resident struct
//! shared between the launcher and the save-chip stand-ins at runtime.
//! Grounded on `directsave.h`'s `t_dirsave_config` and its `DIRSAV_CFG_*`
//! offset constants.

use bytemuck::{Pod, Zeroable};

pub const DIRSAVE_CFG_MAGIC: u32 = 0xDBDD_5CF6;
pub const DIRSAVE_CFG_SIZE: usize = 24;

/// The Direct-Save Config, laid out exactly as `directsave.h` describes:
/// `magic@0, checksum@4, nrandom@8, memory_size@12, base_sector@16,
/// drv_rca@20 (u16), drv_issdhc@22 (u8), sd_mutex@23 (u8)`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DirectSaveConfig {
    pub magic: u32,
    pub checksum: u32,
    pub nrandom: u32,
    pub memory_size: u32,
    pub base_sector: u32,
    pub drv_rca: u16,
    pub drv_issdhc: u8,
    pub sd_mutex: u8,
}

const _: () = assert!(std::mem::size_of::<DirectSaveConfig>() == DIRSAVE_CFG_SIZE);

impl DirectSaveConfig {
    /// Builds a config with a freshly computed checksum. `sd_mutex` starts
    /// cleared, matching the launcher's write-once contract (§4.G.2).
    pub fn new(nrandom: u32, memory_size: u32, base_sector: u32, drv_rca: u16, drv_issdhc: bool) -> Self {
        let mut cfg = DirectSaveConfig {
            magic: DIRSAVE_CFG_MAGIC,
            checksum: 0,
            nrandom,
            memory_size,
            base_sector,
            drv_rca,
            drv_issdhc: drv_issdhc as u8,
            sd_mutex: 0,
        };
        cfg.checksum = cfg.compute_checksum();
        cfg
    }

    /// Rolling XOR over every field except `checksum` itself, folding the
    /// trailing `drv_rca`/`drv_issdhc`/`sd_mutex` byte group into its own
    /// word. `nrandom` is included deliberately: its only purpose is to
    /// keep this value from being constant across installs.
    fn compute_checksum(&self) -> u32 {
        let tail = (self.drv_rca as u32) | ((self.drv_issdhc as u32) << 16) | ((self.sd_mutex as u32) << 24);
        self.magic ^ self.nrandom ^ self.memory_size ^ self.base_sector ^ tail
    }

    /// Returns `true` if `magic` matches and the checksum is internally
    /// consistent; this is the only validity signal available, it exists
    /// to distinguish a real config from uninitialized SRAM.
    pub fn is_valid(&self) -> bool {
        self.magic == DIRSAVE_CFG_MAGIC && self.checksum == self.compute_checksum()
    }

    pub fn to_bytes(&self) -> [u8; DIRSAVE_CFG_SIZE] {
        let mut out = [0u8; DIRSAVE_CFG_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(self));
        out
    }

    pub fn from_bytes(bytes: &[u8; DIRSAVE_CFG_SIZE]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let cfg = DirectSaveConfig::new(0x1234_5678, 64 * 1024, 2048, 0xAA55, true);
        let bytes = cfg.to_bytes();
        let back = DirectSaveConfig::from_bytes(&bytes);
        assert_eq!(cfg, back);
        assert!(back.is_valid());
    }

    #[test]
    fn single_bit_flip_fails_validation() {
        let cfg = DirectSaveConfig::new(1, 128 * 1024, 10, 1, false);
        let mut bytes = cfg.to_bytes();
        bytes[12] ^= 0x01; // flip a bit inside memory_size
        let flipped = DirectSaveConfig::from_bytes(&bytes);
        assert!(!flipped.is_valid());
    }

    #[test]
    fn bad_magic_fails_validation() {
        let mut cfg = DirectSaveConfig::new(1, 1, 1, 1, false);
        cfg.magic = 0;
        assert!(!cfg.is_valid());
    }
}
