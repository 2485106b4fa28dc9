//! Driver traits standing in for the collaborators this crate treats as
//! out of scope: the low-level NOR command driver, the SD block driver,
//! SRAM access, FAT file access and the interrupt-driven tick counter
//! (§9 Design Notes, open question (b); §0 of SPEC_FULL.md).

/// Low-level NOR flash command driver. The on-wire command sequence is out
/// of scope; this is the surface the NOR region manager and the launcher's
/// flash-resident paths assume.
pub trait NorDriver {
    type Error;

    fn identify(&mut self) -> Result<(), Self::Error>;
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn erase_chip(&mut self) -> Result<(), Self::Error>;
    fn erase_sector(&mut self, addr: u32) -> Result<(), Self::Error>;
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn program_buffered(&mut self, addr: u32, data: &[u8], chunk: usize) -> Result<(), Self::Error>;
    fn verify(&mut self, addr: u32, data: &[u8]) -> Result<bool, Self::Error>;
    fn check_erased(&mut self, addr: u32, len: usize) -> Result<bool, Self::Error>;
    fn block_size(&self) -> u32;
}

/// 512-byte-aligned SD card block I/O, as used by the direct-save runtime.
pub trait SdBlockDevice {
    type Error;

    fn read_blocks(&mut self, first_block: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write_blocks(&mut self, first_block: u32, buf: &[u8]) -> Result<(), Self::Error>;
}

/// Byte-addressable battery-backed SRAM.
pub trait SramMirror {
    fn read(&self, offset: usize, buf: &mut [u8]);
    fn write(&mut self, offset: usize, buf: &[u8]);
}

/// Stand-in for FAT file access: the `.sav` file, the pending-save marker
/// and the patch cache directory.
pub trait SaveFileIo {
    type Error;

    fn read(&mut self, path: &str) -> Result<Vec<u8>, Self::Error>;
    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error>;
    fn exists(&mut self, path: &str) -> bool;
    fn remove(&mut self, path: &str) -> Result<(), Self::Error>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error>;
    /// Resolves the absolute first SD sector and byte length of a contiguous
    /// file, or `None` if the file is not contiguous (or doesn't exist).
    fn contiguous_first_sector(&mut self, path: &str) -> Option<(u32, u64)>;
}

/// A monotonic millisecond tick, standing in for the interrupt-driven frame
/// counter that backs bounded-retry timeouts.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Streamed access to a ROM image on SD, as used by `launcher::launch_gba_sdram`
/// to fill the mapped SDRAM buffer window by window (§3 ROM window, §4.I).
pub trait RomReader {
    type Error;

    /// Reads `buf.len()` bytes starting at absolute ROM offset `offset`.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Which side of the cartridge's address decoder is currently mapped in.
/// Flash commands must never execute while `Sdram` is mapped (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderMode {
    Sdram,
    Nor,
}

/// The cartridge's address-decoder control, used by flash-resident launch to
/// present a game's 4 MiB-block-strided view of NOR with the resident
/// game's blocks substituted in block_map order (§4.I `launch_gba_nor`).
pub trait AddressDecoder {
    type Error;

    /// Programs game-visible 4 MiB window `i` to map to physical NOR block
    /// `physical_blocks[i]`.
    fn map_windows(&mut self, physical_blocks: &[u8]) -> Result<(), Self::Error>;
    fn set_mode(&mut self, mode: DecoderMode) -> Result<(), Self::Error>;
}

/// Hands control to the patched image. Never actually returns in firmware;
/// modeled as a plain call here so it can be mocked on a host.
pub trait ResetSequence {
    fn reset(&mut self);
}
