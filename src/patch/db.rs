//! Patch Database Reader (§4.A), grounded on `patcher.c`'s `t_db_header`,
//! `t_db_idx`, `patchmem_dbinfo` and `patchmem_lookup`.

use bytemuck::{Pod, Zeroable};

use crate::error::PatchError;
use crate::gameid::GameId;
use crate::patch::record::{PatchRecord, Program, MAX_PATCH_PRG, MAX_PRG_LEN};
use crate::savetype::SaveType;

const SIGNATURE: u32 = 0x3142_4450; // "PTDB"
const DB_VERSION: u32 = 0x0001_0000;
const HEADER_SIZE: usize = 64;
const PROGRAM_PAGE_SIZE: usize = 512;
const IDX_BLOCK_SIZE: usize = 512;
const IDX_ENTRY_SIZE: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DbHeader {
    signature: u32,
    dbversion: u32,
    patchcnt: u32,
    idxcnt: u32,
    date: [u8; 8],
    version: [u8; 8],
    creator: [u8; 32],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DbIndexEntry {
    gcode: [u8; 4],
    offset: u32,
}

/// Metadata about an open database, mirroring `patchmem_dbinfo`.
#[derive(Debug, Clone)]
pub struct DbInfo {
    pub patch_count: u32,
    pub version: String,
    pub date: String,
    pub creator: String,
}

fn ascii_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn parse_program_page(page: &[u8]) -> Result<Vec<Program>, PatchError> {
    let mut programs = Vec::new();
    let mut i = 0usize;
    while i < page.len() && programs.len() < MAX_PATCH_PRG {
        let len = page[i] as usize;
        if len == 0 {
            break;
        }
        if len > MAX_PRG_LEN || i + 1 + len > page.len() {
            return Err(PatchError::ProgramTooLarge);
        }
        programs.push(Program {
            data: page[i + 1..i + 1 + len].to_vec(),
        });
        i += 1 + len;
    }
    Ok(programs)
}

/// A read-only view over a patch database borrowed from a mapped buffer
/// (a patch database file or a slice of firmware-resident NOR).
pub struct PatchDb<'a> {
    header: DbHeader,
    data: &'a [u8],
    programs: Vec<Program>,
}

impl<'a> PatchDb<'a> {
    /// Validates the header signature/version eagerly; everything else
    /// (index scan, entry decode) is lazy.
    pub fn open(data: &'a [u8]) -> Result<Self, PatchError> {
        if data.len() < HEADER_SIZE + PROGRAM_PAGE_SIZE {
            return Err(PatchError::Truncated);
        }
        let header: DbHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);
        if header.signature != SIGNATURE || header.dbversion != DB_VERSION {
            return Err(PatchError::BadSignature);
        }
        let programs = parse_program_page(&data[HEADER_SIZE..HEADER_SIZE + PROGRAM_PAGE_SIZE])?;
        Ok(PatchDb { header, data, programs })
    }

    pub fn info(&self) -> DbInfo {
        DbInfo {
            patch_count: self.header.patchcnt,
            version: ascii_field(&self.header.version),
            date: ascii_field(&self.header.date),
            creator: ascii_field(&self.header.creator),
        }
    }

    fn index_area(&self) -> &[u8] {
        let start = HEADER_SIZE + PROGRAM_PAGE_SIZE;
        let len = IDX_BLOCK_SIZE * self.header.idxcnt as usize;
        &self.data[start..start + len]
    }

    fn entries_area(&self) -> &[u8] {
        let start = HEADER_SIZE + PROGRAM_PAGE_SIZE + IDX_BLOCK_SIZE * self.header.idxcnt as usize;
        &self.data[start..]
    }

    /// Linear scan of the index; equality uses all 5 key bytes. A miss is a
    /// normal `Ok(None)`, not an error.
    pub fn lookup(&self, id: GameId) -> Result<Option<PatchRecord>, PatchError> {
        let idx = self.index_area();
        let entries = self.entries_area();

        for i in 0..self.header.patchcnt as usize {
            let entry_bytes = idx
                .get(i * IDX_ENTRY_SIZE..(i + 1) * IDX_ENTRY_SIZE)
                .ok_or(PatchError::Truncated)?;
            let entry: DbIndexEntry = bytemuck::pod_read_unaligned(entry_bytes);
            if entry.gcode != id.code || (entry.offset & 0xFF) as u8 != id.version {
                continue;
            }

            let word_offset = (entry.offset >> 8) as usize;
            return self.decode_entry(entries, word_offset).map(Some);
        }
        Ok(None)
    }

    fn read_word(entries: &[u8], word_index: usize) -> Result<u32, PatchError> {
        let byte_off = word_index * 4;
        let bytes = entries
            .get(byte_off..byte_off + 4)
            .ok_or(PatchError::Truncated)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn decode_entry(&self, entries: &[u8], word_offset: usize) -> Result<PatchRecord, PatchError> {
        let pheader = Self::read_word(entries, word_offset)?;

        let wcnt_ops = (pheader & 0xFF) as usize;
        let save_ops = ((pheader >> 8) & 0x1F) as usize;
        let save_mode_bits = ((pheader >> 13) & 0x7) as u8;
        let irqh_ops = ((pheader >> 16) & 0xFF) as usize;
        let rtc_ops = ((pheader >> 24) & 0x0F) as usize;
        let has_hole = (pheader >> 28) & 0x1 != 0;

        let numops = wcnt_ops + save_ops + irqh_ops + rtc_ops;
        let ops_start = word_offset + 1;

        let mut words = Vec::with_capacity(numops);
        for j in 0..numops {
            words.push(Self::read_word(entries, ops_start + j)?);
        }

        let (hole_addr, hole_size) = if has_hole {
            let trailer = Self::read_word(entries, ops_start + numops)?;
            (((trailer >> 16) << 10), (trailer & 0xFFFF) << 10)
        } else {
            (0u32, 0u32)
        };

        let wcnt = &words[0..wcnt_ops];
        let save = &words[wcnt_ops..wcnt_ops + save_ops];
        let irqh = &words[wcnt_ops + save_ops..wcnt_ops + save_ops + irqh_ops];
        let rtc = &words[wcnt_ops + save_ops + irqh_ops..numops];

        let save_mode = SaveType::from_bits(save_mode_bits).unwrap_or(SaveType::None);

        PatchRecord::new(save_mode, hole_addr, hole_size, wcnt, save, irqh, rtc, self.programs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_db(entries: &[(GameId, Vec<u32>)]) -> Vec<u8> {
        let idxcnt = 1u32;
        let mut data = vec![0u8; HEADER_SIZE + PROGRAM_PAGE_SIZE + IDX_BLOCK_SIZE as usize * idxcnt as usize];

        let header = DbHeader {
            signature: SIGNATURE,
            dbversion: DB_VERSION,
            patchcnt: entries.len() as u32,
            idxcnt,
            date: *b"20260101",
            version: *b"00010000",
            creator: {
                let mut c = [0u8; 32];
                c[..4].copy_from_slice(b"test");
                c
            },
        };
        data[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));

        let idx_start = HEADER_SIZE + PROGRAM_PAGE_SIZE;
        let mut entry_words: Vec<u32> = Vec::new();
        for (i, (id, words)) in entries.iter().enumerate() {
            let word_off = entry_words.len() as u32;
            let idx_entry = DbIndexEntry {
                gcode: id.code,
                offset: (word_off << 8) | id.version as u32,
            };
            let off = idx_start + i * IDX_ENTRY_SIZE;
            data[off..off + IDX_ENTRY_SIZE].copy_from_slice(bytemuck::bytes_of(&idx_entry));
            entry_words.extend_from_slice(words);
        }

        for w in &entry_words {
            data.extend_from_slice(&w.to_le_bytes());
        }
        data
    }

    #[test]
    fn lookup_hit_and_miss() {
        let a = GameId::new(*b"AAAA", 0);
        let b = GameId::new(*b"BBBB", 1);
        // header word: wcnt=0, save=1, save_mode bits irrelevant, irqh=0, rtc=0, no hole.
        let pheader = 1u32 << 8;
        let data = build_db(&[(a, vec![pheader, 0x4000_0100]), (b, vec![pheader, 0x4000_0200])]);

        let db = PatchDb::open(&data).unwrap();
        assert!(db.lookup(GameId::new(*b"AAAA", 1)).unwrap().is_none());
        assert!(db.lookup(GameId::new(*b"AAAA", 0)).unwrap().is_some());
        assert!(db.lookup(GameId::new(*b"CCCC", 0)).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; HEADER_SIZE + PROGRAM_PAGE_SIZE];
        data[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(PatchDb::open(&data).unwrap_err(), PatchError::BadSignature);
    }
}
