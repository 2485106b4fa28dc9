//! Filesystem-backed per-ROM patch cache (§4.B/4.C): one file per ROM under
//! a hidden configuration directory, written atomically (write-then-rename)
//! so a crash mid-write never leaves a torn cache entry. The stored format
//! is the same one-entry subset of the patch database format (§4.A) used by
//! `patch::db`, so a cached record can be re-decoded with the same entry
//! decoder rather than a bespoke cache format.

use crate::error::PatchError;
use crate::gameid::GameId;
use crate::patch::record::PatchRecord;
use crate::traits::SaveFileIo;

pub const CACHE_DIR: &str = "/.superfw/patchcache";

/// Builds the cache key the original scanner would use: the ROM's basename
/// with its version byte appended, falling back to the bare filename when
/// no version is known.
pub fn cache_path(rom_basename: &str, id: Option<GameId>) -> String {
    match id {
        Some(id) => format!("{CACHE_DIR}/{rom_basename}.{:02x}.patch", id.version),
        None => format!("{CACHE_DIR}/{rom_basename}.patch"),
    }
}

/// Serializes a patch record into its entry words (header + ops + hole
/// trailer) followed by a length-prefixed program page, byte-for-byte
/// compatible with how `patch::db::PatchDb` decodes an entry.
pub fn serialize(record: &PatchRecord) -> Vec<u8> {
    let mut out = Vec::new();

    for word in record.encode_entry() {
        out.extend_from_slice(&word.to_le_bytes());
    }
    for prg in &record.prgs {
        out.push(prg.data.len() as u8);
        out.extend_from_slice(&prg.data);
    }
    out.push(0); // terminator, matching the program page's stop-at-zero rule

    out
}

/// Decodes a cache file produced by [`serialize`] back into a
/// [`PatchRecord`]. `save_mode` must be supplied separately since it is not
/// re-derived here if the caller already knows it (callers that only have
/// the raw bytes should instead feed them through `patch::db`'s entry
/// decoder, which this function's on-wire layout matches exactly).
pub fn deserialize(data: &[u8], save_mode: crate::savetype::SaveType) -> Result<PatchRecord, PatchError> {
    if data.len() < 4 {
        return Err(PatchError::Truncated);
    }
    let pheader = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let wcnt_ops = (pheader & 0xFF) as usize;
    let save_ops = ((pheader >> 8) & 0x1F) as usize;
    let irqh_ops = ((pheader >> 16) & 0xFF) as usize;
    let rtc_ops = ((pheader >> 24) & 0x0F) as usize;
    let has_hole = (pheader >> 28) & 0x1 != 0;
    let numops = wcnt_ops + save_ops + irqh_ops + rtc_ops;

    let mut words = Vec::with_capacity(numops + has_hole as usize);
    let mut cursor = 4usize;
    for _ in 0..numops + has_hole as usize {
        let bytes = data.get(cursor..cursor + 4).ok_or(PatchError::Truncated)?;
        words.push(u32::from_le_bytes(bytes.try_into().unwrap()));
        cursor += 4;
    }

    let (hole_addr, hole_size) = if has_hole {
        let trailer = words[numops];
        (((trailer >> 16) << 10), (trailer & 0xFFFF) << 10)
    } else {
        (0, 0)
    };

    let wcnt = &words[0..wcnt_ops];
    let save = &words[wcnt_ops..wcnt_ops + save_ops];
    let irqh = &words[wcnt_ops + save_ops..wcnt_ops + save_ops + irqh_ops];
    let rtc = &words[wcnt_ops + save_ops + irqh_ops..numops];

    let mut programs = Vec::new();
    let mut i = cursor;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 {
            break;
        }
        if i + 1 + len > data.len() {
            return Err(PatchError::ProgramTooLarge);
        }
        programs.push(crate::patch::record::Program { data: data[i + 1..i + 1 + len].to_vec() });
        i += 1 + len;
    }

    PatchRecord::new(save_mode, hole_addr, hole_size, wcnt, save, irqh, rtc, programs)
}

/// Writes a patch record's cache file atomically: the payload goes to a
/// scratch name first and is renamed into place only once fully written.
pub fn store<IO: SaveFileIo>(io: &mut IO, path: &str, record: &PatchRecord) -> Result<(), IO::Error> {
    let scratch = format!("{path}.tmp");
    io.write(&scratch, &serialize(record))?;
    io.rename(&scratch, path)
}

pub fn evict<IO: SaveFileIo>(io: &mut IO, path: &str) -> Result<(), IO::Error> {
    io.remove(path)
}

pub fn exists<IO: SaveFileIo>(io: &mut IO, path: &str) -> bool {
    io.exists(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::savetype::SaveType;

    #[test]
    fn cache_path_falls_back_without_version() {
        let p = cache_path("metroid", None);
        assert_eq!(p, "/.superfw/patchcache/metroid.patch");
    }

    #[test]
    fn cache_path_includes_version() {
        let id = GameId::new(*b"AXVE", 1);
        let p = cache_path("pokemon", Some(id));
        assert_eq!(p, "/.superfw/patchcache/pokemon.01.patch");
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let record = PatchRecord::new(
            SaveType::Eeprom64k,
            0,
            0,
            &[],
            &[0x1000_0200u32],
            &[],
            &[],
            vec![],
        )
        .unwrap();
        let bytes = serialize(&record);
        let back = deserialize(&bytes, SaveType::Eeprom64k).unwrap();
        assert_eq!(back.save_ops().len(), 1);
    }
}
