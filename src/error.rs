//! Error types for every component, each carrying the small numeric code the
//! original firmware persisted to its diagnostic area.

use thiserror::Error;

/// Failures from [`crate::patch::db::PatchDb`] and [`crate::patch::cache`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch database signature or version mismatch")]
    BadSignature,
    #[error("inlined program exceeds its storage")]
    ProgramTooLarge,
    #[error("patch record declares more inlined programs than this build supports")]
    TooManyPrograms,
    #[error("patch record entry is truncated or out of bounds")]
    Truncated,
}

/// Failures from [`crate::nor`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NorError {
    #[error("no valid journal entry found")]
    LoadFailed,
    #[error("journal entry failed checksum or invariant validation")]
    InvalidEntry,
    #[error("writing the new journal entry failed")]
    StoreFailed,
    #[error("erase of the metadata region failed")]
    EraseFailed,
    #[error("not enough free blocks to satisfy the allocation")]
    OutOfSpace,
    #[error("flash region block size does not evenly divide the region size")]
    UnsupportedGeometry,
}

/// Save-game preparation failures, matching `ERR_SAVE_*` in the original
/// firmware's `common.h` so a persisted code stays meaningful.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SaveGameError {
    #[error("invalid combination of load/save policy and save type")]
    BadArg = 1,
    #[error("existing .sav file is unreadable")]
    BadSave = 2,
    #[error("could not write the .sav file")]
    CantWrite = 3,
    #[error("could not allocate a contiguous save file for direct-save")]
    CantAlloc = 4,
    #[error("backup rotation of the previous .sav failed")]
    CantCopy = 5,
}

impl SaveGameError {
    /// The numeric `ERR_SAVE_*` code the original firmware persisted.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Launcher failures, matching `ERR_LOAD_*` / `ERR_FLASH_OP` in `common.h`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    #[error("the ROM file could not be read")]
    BadRom = 1,
    #[error("the in-game menu payload would not fit")]
    Menu = 2,
    #[error("no payload space (tail or hole) was available")]
    NoPayloadSpace = 3,
    #[error("no save emulation stand-in exists for this save type")]
    NoEmu = 4,
    #[error("a NOR flash operation failed")]
    FlashOp = 5,
    /// Not part of `common.h`'s `ERR_LOAD_*` set: the caller's progress
    /// callback requested abort (§5 Cancellation) between operations. Never
    /// raised mid flash program/erase, only between ROM-load windows/blocks.
    Aborted = 6,
}

impl LaunchError {
    /// The numeric `ERR_LOAD_*` / `ERR_FLASH_OP` code the original firmware
    /// persisted.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Failures from the direct-save runtime translation layer (§4.E).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DirectSaveError {
    #[error("direct-save config is missing or failed its checksum")]
    InvalidConfig,
    #[error("requested access falls outside the declared memory size")]
    OutOfRange,
    #[error("the underlying SD block device reported an error")]
    BlockDeviceFailed,
}
