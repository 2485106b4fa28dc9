//! NOR Flash Region Manager (§4.F): an append-only journal of a "table of
//! contents" describing which 4 MiB blocks belong to which resident game,
//! with per-block wear accounting. Grounded on `flash_mgr.c`/`flash_mgr.h`.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::NorError;
use crate::traits::NorDriver;

pub const NOR_ENTRY_MAGIC: u32 = 0x6A7E_60D1;
pub const NOR_FLASH_SIZE: u32 = 128 * 1024 * 1024;
pub const NOR_BLOCK_SIZE: u32 = 4 * 1024 * 1024;
pub const NOR_BLOCK_COUNT: usize = (NOR_FLASH_SIZE / NOR_BLOCK_SIZE) as usize; // 32
pub const NOR_GAMEBLOCK_COUNT: usize = NOR_BLOCK_COUNT - 1; // 31
pub const MAX_GAME_BLOCKS: usize = 8;
pub const FLASHG_MAXFN_CNT: usize = 32;

const JOURNAL_HEADER_SIZE: usize = 4 + 4 + 4 + 4 * NOR_BLOCK_COUNT; // 140
const GAME_ENTRY_SIZE: usize = 4 + 1 + 1 + 1 + 1 + MAX_GAME_BLOCKS + 256; // 272

bitflags! {
    /// `attrs` bitfield. The low 3 bits of the underlying byte are *not*
    /// part of this flag set; they store the original `save_mode` and are
    /// read/written via [`GameEntry::save_mode_bits`]/`set_save_mode_bits`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GameAttrs: u8 {
        const SAVEDS = 0b0000_1000;
        const IGM    = 0b0001_0000;
        const RTC    = 0b0010_0000;
    }
}

/// Sentinel `save_mode` value meaning "unknown", stored in the low 3 bits
/// of `gattrs` alongside the `GameAttrs` flags.
pub const SAVE_MODE_UNKNOWN: u8 = 7;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct JournalHeader {
    pub magic: u32,
    pub crc: u32,
    pub gamecnt: u32,
    pub write_cycles: [u32; NOR_BLOCK_COUNT],
}

/// One resident game's directory entry. `gamecode` holds the 4 ASCII game
/// code bytes (packed the way the original `uint32_t gamecode` field is on
/// a little-endian target).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct GameEntry {
    pub gamecode: [u8; 4],
    pub gamever: u8,
    pub numblks: u8,
    pub gattrs: u8,
    _padding: u8,
    pub blkmap: [u8; MAX_GAME_BLOCKS],
    pub game_name: [u8; 256],
}

impl GameEntry {
    pub fn attrs(&self) -> GameAttrs {
        GameAttrs::from_bits_retain(self.gattrs)
    }

    pub fn save_mode_bits(&self) -> u8 {
        self.gattrs & 0x07
    }

    pub fn set_attrs(&mut self, attrs: GameAttrs, save_mode_bits: u8) {
        self.gattrs = attrs.bits() | (save_mode_bits & 0x07);
    }
}

/// A snapshot of the live journal entry: the per-block wear counters plus
/// every resident game's directory entry.
#[derive(Clone)]
pub struct Journal {
    pub write_cycles: [u32; NOR_BLOCK_COUNT],
    pub games: Vec<GameEntry>,
}

impl Journal {
    pub fn empty() -> Self {
        Journal { write_cycles: [0; NOR_BLOCK_COUNT], games: Vec::new() }
    }
}

fn xorh(words: &[u8]) -> u32 {
    let mut ret = 0u32;
    for chunk in words.chunks_exact(4) {
        ret ^= u32::from_le_bytes(chunk.try_into().unwrap());
    }
    ret
}

/// Owns a contiguous flash region `[base, base+max_size)` dedicated to
/// metadata, backed by an injected [`NorDriver`].
pub struct NorRegion<'d, D: NorDriver> {
    driver: &'d mut D,
    base: u32,
    max_size: u32,
}

impl<'d, D: NorDriver> NorRegion<'d, D> {
    pub fn new(driver: &'d mut D, base: u32, max_size: u32) -> Self {
        NorRegion { driver, base, max_size }
    }

    /// Walks the journal and returns the offset and header of the most
    /// recent valid entry, or `None` if the region holds no valid entry at
    /// all. Never reads at a negative/sentinel offset: when no entry is
    /// ever found, no further read is attempted.
    fn scan_latest(&mut self) -> Result<Option<(u32, JournalHeader)>, NorError> {
        let mut last: Option<u32> = None;
        let mut off = 0u32;
        let mut buf = [0u8; JOURNAL_HEADER_SIZE];

        while off < self.max_size {
            self.driver
                .read(self.base + off, &mut buf)
                .map_err(|_| NorError::LoadFailed)?;
            let hdr: JournalHeader = bytemuck::pod_read_unaligned(&buf);
            if hdr.magic != NOR_ENTRY_MAGIC || hdr.gamecnt as usize > FLASHG_MAXFN_CNT {
                break;
            }
            let esz = JOURNAL_HEADER_SIZE as u32 + GAME_ENTRY_SIZE as u32 * hdr.gamecnt;
            last = Some(off);
            off = off.saturating_add(esz.max(1));
        }

        match last {
            None => Ok(None),
            Some(off) => {
                self.driver
                    .read(self.base + off, &mut buf)
                    .map_err(|_| NorError::LoadFailed)?;
                Ok(Some((off, bytemuck::pod_read_unaligned(&buf))))
            }
        }
    }

    /// Loads the most recent valid journal entry, verifying its XOR CRC and
    /// the block-map invariants (§3) before returning it.
    pub fn load(&mut self) -> Result<Journal, NorError> {
        let (off, hdr) = self.scan_latest()?.ok_or_else(|| {
            log::warn!("no valid journal entry in NOR region at base {:#x}", self.base);
            NorError::LoadFailed
        })?;
        if hdr.gamecnt as usize > FLASHG_MAXFN_CNT {
            return Err(NorError::LoadFailed);
        }

        let gsize = GAME_ENTRY_SIZE * hdr.gamecnt as usize;
        let dsize = JOURNAL_HEADER_SIZE + gsize;
        let mut full = vec![0u8; dsize];
        self.driver
            .read(self.base + off, &mut full)
            .map_err(|_| NorError::LoadFailed)?;

        let hdr2: JournalHeader = bytemuck::pod_read_unaligned(&full[..JOURNAL_HEADER_SIZE]);
        let games_bytes = &full[JOURNAL_HEADER_SIZE..];
        let crc = xorh(games_bytes) ^ hdr2.gamecnt;
        if crc != hdr2.crc {
            return Err(NorError::InvalidEntry);
        }

        let mut games = Vec::with_capacity(hdr2.gamecnt as usize);
        for chunk in games_bytes.chunks_exact(GAME_ENTRY_SIZE) {
            games.push(bytemuck::pod_read_unaligned::<GameEntry>(chunk));
        }

        let mut used = [false; NOR_BLOCK_COUNT];
        for g in &games {
            for &b in &g.blkmap {
                if b != 0 {
                    if used[b as usize] {
                        log::warn!("NOR journal at {:#x} has duplicate block index {b}, treating as corrupt", self.base + off);
                        return Err(NorError::InvalidEntry);
                    }
                    used[b as usize] = true;
                }
            }
        }

        log::debug!("loaded NOR journal at offset {off:#x}: {} resident games", games.len());
        Ok(Journal { write_cycles: hdr2.write_cycles, games })
    }

    /// Erases every block of the region, skipping blocks that already read
    /// as all-ones. `progress(done, total)` is polled between blocks and
    /// may request an abort by returning `true`.
    pub fn wipe(&mut self, mut progress: impl FnMut(u32, u32) -> bool) -> Result<(), NorError> {
        let block_size = self.driver.block_size();
        if block_size == 0 || self.max_size % block_size != 0 {
            return Err(NorError::UnsupportedGeometry);
        }

        log::info!("erasing NOR region at {:#x}, {} bytes", self.base, self.max_size);
        let mut i = 0u32;
        while i < self.max_size {
            if progress(i, self.max_size) {
                log::info!("NOR erase aborted at offset {i:#x}");
                return Err(NorError::EraseFailed);
            }
            let addr = self.base + i;
            let already_erased = self
                .driver
                .check_erased(addr, block_size as usize)
                .map_err(|_| NorError::EraseFailed)?;
            if !already_erased {
                self.driver.erase_sector(addr).map_err(|_| NorError::EraseFailed)?;
            }
            i += block_size;
        }
        Ok(())
    }

    /// Appends `journal` as the new latest entry. If the current tail entry
    /// leaves enough room before `max_size`, the new entry is appended
    /// right after it; otherwise the whole region is wiped and the entry is
    /// written at offset 0.
    pub fn store(&mut self, journal: &Journal) -> Result<(), NorError> {
        let gamecnt = journal.games.len() as u32;
        if gamecnt as usize > FLASHG_MAXFN_CNT {
            return Err(NorError::StoreFailed);
        }

        let mut games_bytes = Vec::with_capacity(GAME_ENTRY_SIZE * journal.games.len());
        for g in &journal.games {
            games_bytes.extend_from_slice(bytemuck::bytes_of(g));
        }
        let crc = xorh(&games_bytes) ^ gamecnt;

        let hdr = JournalHeader { magic: NOR_ENTRY_MAGIC, crc, gamecnt, write_cycles: journal.write_cycles };
        let mut entry_bytes = Vec::with_capacity(JOURNAL_HEADER_SIZE + games_bytes.len());
        entry_bytes.extend_from_slice(bytemuck::bytes_of(&hdr));
        entry_bytes.extend_from_slice(&games_bytes);
        let reqsz = entry_bytes.len();

        let scan = self.scan_latest()?;
        let off = match scan {
            Some((tail_off, tail_hdr)) => {
                let currsz = JOURNAL_HEADER_SIZE + GAME_ENTRY_SIZE * tail_hdr.gamecnt as usize;
                let append_off = tail_off as usize + currsz;
                if append_off + reqsz <= self.max_size as usize {
                    append_off as u32
                } else {
                    self.wipe(|_, _| false)?;
                    0
                }
            }
            None => {
                self.wipe(|_, _| false)?;
                0
            }
        };

        let chunk = self.driver.block_size().max(1) as usize;
        self.driver
            .program_buffered(self.base + off, &entry_bytes, chunk)
            .map_err(|_| NorError::StoreFailed)?;

        let ok = self
            .driver
            .verify(self.base + off, &entry_bytes)
            .map_err(|_| NorError::StoreFailed)?;
        if !ok {
            log::warn!("NOR journal verify mismatch at offset {off:#x}");
            return Err(NorError::StoreFailed);
        }
        log::debug!("appended NOR journal entry at offset {off:#x}, {gamecnt} games");
        Ok(())
    }
}

/// Allocates `nalloc` blocks for a new game, preferring the least-worn free
/// blocks (block 0 is never allocatable). Updates `journal.write_cycles`
/// for every block handed out. Ties break toward the smallest block index.
pub fn allocate_blocks(journal: &mut Journal, nalloc: usize) -> Result<Vec<u8>, NorError> {
    let mut used = [false; NOR_BLOCK_COUNT];
    for g in &journal.games {
        for &b in &g.blkmap {
            if b != 0 {
                used[b as usize] = true;
            }
        }
    }

    let mut blockmap = Vec::with_capacity(nalloc);
    for _ in 0..nalloc {
        let mut candidate: Option<usize> = None;
        let mut best_cycles = u32::MAX;
        for i in 1..NOR_BLOCK_COUNT {
            if !used[i] && journal.write_cycles[i] < best_cycles {
                candidate = Some(i);
                best_cycles = journal.write_cycles[i];
            }
        }
        match candidate {
            None => return Err(NorError::OutOfSpace),
            Some(i) => {
                used[i] = true;
                blockmap.push(i as u8);
                journal.write_cycles[i] += 1;
            }
        }
    }
    Ok(blockmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeNor {
        mem: HashMap<u32, u8>,
        block_size: u32,
    }

    impl FakeNor {
        fn new(size: u32, block_size: u32) -> Self {
            let mut mem = HashMap::new();
            for a in 0..size {
                mem.insert(a, 0xFF);
            }
            FakeNor { mem, block_size }
        }
    }

    impl NorDriver for FakeNor {
        type Error = ();

        fn identify(&mut self) -> Result<(), ()> {
            Ok(())
        }
        fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), ()> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = *self.mem.get(&(addr + i as u32)).unwrap_or(&0xFF);
            }
            Ok(())
        }
        fn erase_chip(&mut self) -> Result<(), ()> {
            for v in self.mem.values_mut() {
                *v = 0xFF;
            }
            Ok(())
        }
        fn erase_sector(&mut self, addr: u32) -> Result<(), ()> {
            for i in 0..self.block_size {
                self.mem.insert(addr + i, 0xFF);
            }
            Ok(())
        }
        fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), ()> {
            for (i, b) in data.iter().enumerate() {
                self.mem.insert(addr + i as u32, *b);
            }
            Ok(())
        }
        fn program_buffered(&mut self, addr: u32, data: &[u8], _chunk: usize) -> Result<(), ()> {
            self.program(addr, data)
        }
        fn verify(&mut self, addr: u32, data: &[u8]) -> Result<bool, ()> {
            let mut buf = vec![0u8; data.len()];
            self.read(addr, &mut buf)?;
            Ok(buf == data)
        }
        fn check_erased(&mut self, addr: u32, len: usize) -> Result<bool, ()> {
            let mut buf = vec![0u8; len];
            self.read(addr, &mut buf)?;
            Ok(buf.iter().all(|&b| b == 0xFF))
        }
        fn block_size(&self) -> u32 {
            self.block_size
        }
    }

    fn game(code: &[u8; 4], blkmap: [u8; MAX_GAME_BLOCKS]) -> GameEntry {
        GameEntry {
            gamecode: *code,
            gamever: 0,
            numblks: blkmap.iter().filter(|&&b| b != 0).count() as u8,
            gattrs: 0,
            _padding: 0,
            blkmap,
            game_name: [0u8; 256],
        }
    }

    #[test]
    fn store_then_load_round_trip() {
        let mut driver = FakeNor::new(1024 * 1024, 4096);
        let mut region = NorRegion::new(&mut driver, 0, 1024 * 1024);

        let mut journal = Journal::empty();
        journal.games.push(game(b"AAAA", [1, 0, 0, 0, 0, 0, 0, 0]));
        region.store(&journal).unwrap();

        let loaded = region.load().unwrap();
        assert_eq!(loaded.games.len(), 1);
        assert_eq!(loaded.games[0].gamecode, *b"AAAA");
    }

    #[test]
    fn wipe_then_load_is_load_failed() {
        let mut driver = FakeNor::new(1024 * 1024, 4096);
        let mut region = NorRegion::new(&mut driver, 0, 1024 * 1024);

        let mut journal = Journal::empty();
        journal.games.push(game(b"AAAA", [1, 0, 0, 0, 0, 0, 0, 0]));
        region.store(&journal).unwrap();

        region.wipe(|_, _| false).unwrap();
        assert_eq!(region.load().unwrap_err(), NorError::LoadFailed);
    }

    #[test]
    fn append_keeps_old_entry_but_load_returns_latest() {
        let mut driver = FakeNor::new(1024 * 1024, 4096);
        let mut region = NorRegion::new(&mut driver, 0, 1024 * 1024);

        let mut j1 = Journal::empty();
        j1.games.push(game(b"AAAA", [1, 0, 0, 0, 0, 0, 0, 0]));
        region.store(&j1).unwrap();

        let mut j2 = j1.clone();
        j2.games.push(game(b"BBBB", [2, 0, 0, 0, 0, 0, 0, 0]));
        region.store(&j2).unwrap();

        let loaded = region.load().unwrap();
        assert_eq!(loaded.games.len(), 2);
    }

    #[test]
    fn allocator_picks_least_worn_blocks() {
        let mut journal = Journal::empty();
        journal.write_cycles[5] = 10;
        let picked = allocate_blocks(&mut journal, 3).unwrap();
        assert_eq!(picked, vec![1, 2, 3]);
        assert_eq!(journal.write_cycles[1..4], [1, 1, 1]);
        assert_eq!(journal.write_cycles[5], 10);
    }

    #[test]
    fn allocator_avoids_blocks_in_use() {
        let mut journal = Journal::empty();
        journal.games.push(game(b"AAAA", [1, 2, 0, 0, 0, 0, 0, 0]));
        let picked = allocate_blocks(&mut journal, 2).unwrap();
        assert_eq!(picked, vec![3, 4]);
    }

    #[test]
    fn allocator_out_of_space() {
        let mut journal = Journal::empty();
        let picked = allocate_blocks(&mut journal, NOR_BLOCK_COUNT);
        assert_eq!(picked.unwrap_err(), NorError::OutOfSpace);
    }
}
