//! Save-game preparation around reboots (§4.H): loads `.sav` into SRAM (or
//! clears it) before launch, and reconciles SRAM back to `.sav` after a
//! reboot. Grounded on `common.h`'s `t_dirsave_info` and `prepare_savegame`
//! signature.

use crate::error::SaveGameError;
use crate::savetype::SaveType;
use crate::traits::{SaveFileIo, SramMirror};

const CONFIG_DIR: &str = "/.superfw";

/// What to do with SRAM before handing control to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Load `.sav` into SRAM; if missing or shorter than the save type's
    /// capacity, fall back to [`LoadPolicy::Reset`].
    Sav,
    /// Always clear the SRAM region for this save type.
    Reset,
    /// Leave SRAM untouched.
    Disable,
}

/// What to do with SRAM's contents after the game reboots back to the
/// launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Snapshot SRAM to `.sav` the next time the launcher boots.
    Reboot,
    /// No boot-time write; the direct-save runtime already wrote through to
    /// the SD card during gameplay.
    Direct,
    Disable,
}

/// Returned when `save_policy` is [`SavePolicy::Direct`]: the absolute SD
/// sector the direct-save runtime should use as `base_sector`.
#[derive(Debug, Clone, Copy)]
pub struct DirectSaveInfo {
    pub base_sector: u32,
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn marker_path(save_path: &str) -> String {
    format!("{CONFIG_DIR}/pending/{}.pending", basename(save_path))
}

fn clear_sram<S: SramMirror>(sram: &mut S, size: usize) {
    let zeros = vec![0u8; size];
    sram.write(0, &zeros);
}

/// Runs the pre-launch half of the contract: applies `load_policy` to SRAM,
/// and for [`SavePolicy::Direct`] resolves the save file's contiguous first
/// SD sector so the launcher can seed the Direct-Save Config (§4.G).
pub fn prepare_savegame<IO: SaveFileIo, S: SramMirror>(
    load_policy: LoadPolicy,
    save_policy: SavePolicy,
    save_type: SaveType,
    io: &mut IO,
    sram: &mut S,
    save_path: &str,
) -> Result<Option<DirectSaveInfo>, SaveGameError> {
    if save_policy == SavePolicy::Direct && !save_type.supports_directsave() {
        return Err(SaveGameError::BadArg);
    }

    let size = save_type.size_bytes() as usize;
    match load_policy {
        LoadPolicy::Sav => match io.read(save_path) {
            Ok(data) if data.len() >= size => {
                log::debug!("loaded {size} bytes of save data from {save_path}");
                sram.write(0, &data[..size]);
            }
            _ => {
                log::info!("{save_path} missing or short, clearing SRAM instead");
                clear_sram(sram, size);
            }
        },
        LoadPolicy::Reset => clear_sram(sram, size),
        LoadPolicy::Disable => {}
    }

    match save_policy {
        SavePolicy::Direct => {
            let (base_sector, file_len) =
                io.contiguous_first_sector(save_path).ok_or(SaveGameError::CantAlloc)?;
            if file_len < size as u64 {
                log::info!("{save_path} is contiguous but only {file_len} bytes, need {size}");
                return Err(SaveGameError::CantAlloc);
            }
            Ok(Some(DirectSaveInfo { base_sector }))
        }
        SavePolicy::Reboot | SavePolicy::Disable => Ok(None),
    }
}

/// Drops a zero-byte marker recording that SRAM must be flushed back to
/// `.sav` the next time the launcher boots. Called right before the reset
/// sequence when `save_policy` was [`SavePolicy::Reboot`].
pub fn mark_pending_save<IO: SaveFileIo>(io: &mut IO, save_path: &str) -> Result<(), SaveGameError> {
    io.write(&marker_path(save_path), &[]).map_err(|_| SaveGameError::CantWrite)
}

/// Runs the post-reboot half of the contract: if the pending-save marker
/// for `save_path` exists, snapshots SRAM to `.sav` (rotating up to
/// `backup_count` older copies first) and drops the marker. A no-op if no
/// marker is present.
pub fn finalize_pending_save<IO: SaveFileIo, S: SramMirror>(
    io: &mut IO,
    sram: &S,
    save_path: &str,
    save_type: SaveType,
    backup_count: u8,
) -> Result<(), SaveGameError> {
    let marker = marker_path(save_path);
    if !io.exists(&marker) {
        return Ok(());
    }

    let size = save_type.size_bytes() as usize;
    let mut data = vec![0u8; size];
    sram.read(0, &mut data);

    if backup_count > 0 {
        rotate_backups(io, save_path, backup_count)?;
    }

    io.write(save_path, &data).map_err(|_| SaveGameError::CantWrite)?;
    io.remove(&marker).map_err(|_| SaveGameError::CantWrite)?;
    log::info!("flushed pending save to {save_path}");
    Ok(())
}

fn rotate_backups<IO: SaveFileIo>(io: &mut IO, save_path: &str, backup_count: u8) -> Result<(), SaveGameError> {
    for n in (1..backup_count).rev() {
        let src = format!("{save_path}.bak{n}");
        let dst = format!("{save_path}.bak{}", n + 1);
        if io.exists(&src) {
            io.rename(&src, &dst).map_err(|_| SaveGameError::CantCopy)?;
        }
    }
    if io.exists(save_path) {
        io.rename(save_path, &format!("{save_path}.bak1")).map_err(|_| SaveGameError::CantCopy)?;
    }
    Ok(())
}
