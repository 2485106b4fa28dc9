//! Launcher orchestration (§4.I): load ROM -> apply patches -> install
//! payloads -> capture entry -> jump. Grounded on `common.h`'s
//! `load_gba_rom`/`launch_gba_nor`/`flash_gba_nor` signatures.

use crate::directsave::config::DirectSaveConfig;
use crate::error::{LaunchError, NorError};
use crate::nor::{GameEntry, Journal, NOR_BLOCK_SIZE};
use crate::patch::applier::{apply_payload, apply_to_window, ApplyOptions};
use crate::patch::record::PatchRecord;
use crate::traits::{AddressDecoder, DecoderMode, NorDriver, ResetSequence, RomReader, SramMirror};

/// Absolute ROM offset budget a launched image may occupy; tail placement
/// only wins while `rom_size + payload_size` stays under this ceiling
/// (§4.D "Placement of payloads").
pub const MAX_ROM_SIZE: u32 = 32 * 1024 * 1024;

/// Size of the sliding window the ROM is streamed through while being
/// copied into the mapped SDRAM buffer (§3 ROM window).
pub const STREAM_WINDOW: u32 = 256 * 1024;

/// Greedily places payloads at the ROM tail, falling back to the patch
/// record's hole once the tail would exceed [`MAX_ROM_SIZE`]. Payloads are
/// placed in call order; each successfully placed payload consumes tail or
/// hole space for the ones that follow, so placement order matters.
pub struct PayloadPlacer {
    rom_size: u32,
    tail: u32,
    hole: Option<(u32, u32)>,
}

impl PayloadPlacer {
    pub fn new(rom_size: u32, hole_addr: Option<u32>, hole_size: u32) -> Self {
        PayloadPlacer { rom_size, tail: rom_size, hole: hole_addr.map(|addr| (addr, hole_size)) }
    }

    /// Attempts to place `size` bytes, preferring the tail. Returns `None`
    /// if neither the tail nor the hole has room left; the caller disables
    /// that payload's feature for this title.
    pub fn place(&mut self, size: u32) -> Option<u32> {
        if size == 0 {
            return None;
        }
        if let Some(end) = self.tail.checked_add(size) {
            if end <= MAX_ROM_SIZE {
                let at = self.tail;
                self.tail = end;
                return Some(at);
            }
        }
        if let Some((addr, remaining)) = self.hole {
            if remaining >= size && addr + remaining <= self.rom_size {
                self.hole = Some((addr + size, remaining - size));
                return Some(addr);
            }
        }
        None
    }
}

/// A precompiled blob to be parked somewhere in the ROM image and copied in
/// after patching, plus (for direct-save) the SRAM config it's paired with.
pub struct LaunchRequest<'a> {
    pub patch_waitcnt: bool,
    pub patch_rtc: bool,
    pub ingame_menu: Option<&'a [u8]>,
    pub font: Option<&'a [u8]>,
    pub cheats: Option<&'a [u8]>,
    pub direct_save: Option<DirectSaveRequest<'a>>,
}

pub struct DirectSaveRequest<'a> {
    /// The direct-save payload body, parked in the ROM image; its address
    /// is what the installed EEPROM/FLASH stand-ins' trailer words point at
    /// (§4.D point 5).
    pub payload: &'a [u8],
    /// The Direct-Save Config to seed into SRAM at `config_offset` (§4.G).
    pub config: DirectSaveConfig,
    pub config_offset: usize,
}

/// The absolute ROM offsets [`PayloadPlacer`] chose for one launch. `0`/
/// `None` for any feature that had to be disabled for lack of space.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacedPayloads {
    pub igmenu_addr: u32,
    pub font_addr: Option<u32>,
    pub cheats_addr: Option<u32>,
    pub ds_addr: Option<u32>,
}

fn place_payloads(rom_size: u32, record: &PatchRecord, req: &LaunchRequest) -> PlacedPayloads {
    let mut placer = PayloadPlacer::new(rom_size, record.hole_addr, record.hole_size);
    let mut placed = PlacedPayloads::default();

    // Menu first: it is the payload spec.md calls out as entered via the
    // branch injected at ROM offset 0, so it gets first pick of the tail.
    if let Some(igm) = req.ingame_menu {
        if record.supports_igm() {
            if let Some(addr) = placer.place(igm.len() as u32) {
                placed.igmenu_addr = addr;
            }
        }
    }
    if let Some(font) = req.font {
        placed.font_addr = placer.place(font.len() as u32);
    }
    if let Some(cheats) = req.cheats {
        placed.cheats_addr = placer.place(cheats.len() as u32);
    }
    if let Some(ds) = &req.direct_save {
        if record.save_mode.supports_directsave() {
            placed.ds_addr = placer.place(ds.payload.len() as u32);
        }
    }
    placed
}

fn build_apply_options(req: &LaunchRequest, placed: &PlacedPayloads) -> ApplyOptions {
    ApplyOptions {
        patch_waitcnt: req.patch_waitcnt,
        patch_rtc: req.patch_rtc,
        igmenu_addr: placed.igmenu_addr,
        ds_addr: placed.ds_addr,
    }
}

fn seed_direct_save<S: SramMirror>(sram: &mut S, req: &LaunchRequest) {
    if let Some(ds) = &req.direct_save {
        sram.write(ds.config_offset, &ds.config.to_bytes());
        log::debug!("seeded direct-save config at SRAM offset {:#x}", ds.config_offset);
    }
}

/// Streams `rom` into the mapped SDRAM buffer window by window, patching
/// each window in place, then copies in the requested payloads and seeds
/// the Direct-Save Config before handing control to the game. `sdram` must
/// be at least `rom_size` bytes plus whatever payload space was used; the
/// caller sizes it to [`MAX_ROM_SIZE`] or larger.
///
/// `progress(done, total)` is polled between windows and may request a
/// clean abort by returning `true` (§5 Cancellation); nothing has been
/// handed to the game yet at that point, so aborting just means returning
/// [`LaunchError::Aborted`] without resetting.
pub fn launch_gba_sdram<R, S, X>(
    rom: &mut R,
    sdram: &mut [u8],
    rom_size: u32,
    record: &PatchRecord,
    req: &LaunchRequest,
    sram: &mut S,
    reset: &mut X,
    mut progress: impl FnMut(u32, u32) -> bool,
) -> Result<PlacedPayloads, LaunchError>
where
    R: RomReader,
    S: SramMirror,
    X: ResetSequence,
{
    if rom_size == 0 || rom_size as usize > sdram.len() {
        return Err(LaunchError::BadRom);
    }

    let placed = place_payloads(rom_size, record, req);
    if req.ingame_menu.is_some() && placed.igmenu_addr == 0 {
        return Err(LaunchError::Menu);
    }
    if req.direct_save.is_some() && placed.ds_addr.is_none() {
        return Err(LaunchError::NoPayloadSpace);
    }

    let opts = build_apply_options(req, &placed);

    let mut off = 0u32;
    while off < rom_size {
        if progress(off, rom_size) {
            log::info!("ROM load aborted at offset {off:#x}");
            return Err(LaunchError::Aborted);
        }
        let len = STREAM_WINDOW.min(rom_size - off) as usize;
        let window = &mut sdram[off as usize..off as usize + len];
        rom.read_at(off, window).map_err(|_| LaunchError::BadRom)?;
        apply_to_window(window, off, record, &opts);
        off += len as u32;
    }

    if let Some(igm) = req.ingame_menu {
        apply_payload(sdram, 0, igm, placed.igmenu_addr);
    }
    if let (Some(font), Some(addr)) = (req.font, placed.font_addr) {
        apply_payload(sdram, 0, font, addr);
    }
    if let (Some(cheats), Some(addr)) = (req.cheats, placed.cheats_addr) {
        apply_payload(sdram, 0, cheats, addr);
    }
    if let (Some(ds), Some(addr)) = (&req.direct_save, placed.ds_addr) {
        apply_payload(sdram, 0, ds.payload, addr);
    }

    seed_direct_save(sram, req);
    log::info!("launching ROM, {rom_size} bytes, igmenu={:#x} ds={:?}", placed.igmenu_addr, placed.ds_addr);
    reset.reset();
    Ok(placed)
}

/// How the game's 4 MiB-block-strided view of flash should be wired up:
/// game-visible window `i` (0-based) maps to physical NOR block
/// `physical_blocks[i]`. The last mappable window hosts the menu payload
/// when the ROM's own block count already saturates the decoder.
#[derive(Debug, Clone)]
pub struct NorAddressPlan {
    pub physical_blocks: Vec<u8>,
    /// Game-visible offset (within the strided view) the menu payload was
    /// parked at, if a trailing window had to be borrowed for it.
    pub igmenu_window_addr: Option<u32>,
}

/// Builds the window-to-physical-block mapping for a resident game's
/// `block_map`, reserving a trailing window for the in-game-menu payload
/// when the record needs one and the ROM's own blocks fill the decoder.
pub fn plan_nor_addressing(game: &GameEntry, igm_needed: bool) -> NorAddressPlan {
    let physical_blocks: Vec<u8> =
        game.blkmap.iter().copied().filter(|&b| b != 0).take(game.numblks as usize).collect();

    // The menu payload's game-visible address is just past the game's own
    // blocks in the strided view; which physical block actually backs it
    // was decided when the image was written (`flash_gba_nor`).
    let igmenu_window_addr = igm_needed.then(|| (physical_blocks.len() as u32) * NOR_BLOCK_SIZE);

    NorAddressPlan { physical_blocks, igmenu_window_addr }
}

/// Reconfigures the address decoder so the game sees its `block_map` blocks
/// in order, then restores SDRAM mapping (the decoder must present NOR only
/// transiently while being programmed, per §5).
pub fn launch_gba_nor<D>(decoder: &mut D, game: &GameEntry, igm_needed: bool) -> Result<NorAddressPlan, LaunchError>
where
    D: AddressDecoder,
{
    let plan = plan_nor_addressing(game, igm_needed);
    decoder.set_mode(DecoderMode::Nor).map_err(|_| LaunchError::FlashOp)?;
    decoder.map_windows(&plan.physical_blocks).map_err(|_| LaunchError::FlashOp)?;
    Ok(plan)
}

/// Reads a ROM from SD in 4 MiB chunks, patches each chunk, and programs it
/// into a freshly allocated NOR block, matching `flash_gba_nor`. The
/// decoder is switched to NOR mode for the duration and back to SDRAM mode
/// on every exit path (§5: flash commands never run while SDRAM-mapped).
/// Returns the chosen `block_map`; committing a [`GameEntry`] for this title
/// into the journal (via [`crate::nor::NorRegion::store`]) is the caller's
/// job, once it has assembled the rest of the entry (game code, version,
/// name, attrs).
///
/// `progress(done, total)` is polled once per block, only between a block's
/// verify and the next block's erase, so an abort never lands mid
/// program/erase (§5 Cancellation).
pub fn flash_gba_nor<R, N, D>(
    rom: &mut R,
    rom_size: u32,
    record: &PatchRecord,
    opts: &ApplyOptions,
    nor: &mut N,
    decoder: &mut D,
    journal: &mut Journal,
    mut progress: impl FnMut(u32, u32) -> bool,
) -> Result<Vec<u8>, LaunchError>
where
    R: RomReader,
    N: NorDriver,
    D: AddressDecoder,
{
    let num_blocks = rom_size.div_ceil(NOR_BLOCK_SIZE) as usize;
    let block_map = crate::nor::allocate_blocks(journal, num_blocks).map_err(|e| match e {
        NorError::OutOfSpace => LaunchError::NoPayloadSpace,
        _ => LaunchError::FlashOp,
    })?;

    decoder.set_mode(DecoderMode::Nor).map_err(|_| LaunchError::FlashOp)?;
    let result = (|| -> Result<(), LaunchError> {
        for (i, &phys_block) in block_map.iter().enumerate() {
            if progress(i as u32, num_blocks as u32) {
                log::info!("NOR flash aborted before block {i}");
                return Err(LaunchError::Aborted);
            }
            let base_offset = (i as u32) * NOR_BLOCK_SIZE;
            let chunk_len = NOR_BLOCK_SIZE.min(rom_size - base_offset) as usize;
            let mut chunk = vec![0u8; NOR_BLOCK_SIZE as usize];
            rom.read_at(base_offset, &mut chunk[..chunk_len]).map_err(|_| LaunchError::BadRom)?;

            apply_to_window(&mut chunk[..chunk_len], base_offset, record, opts);

            let phys_addr = (phys_block as u32) * NOR_BLOCK_SIZE;
            nor.erase_sector(phys_addr).map_err(|_| LaunchError::FlashOp)?;
            nor.program_buffered(phys_addr, &chunk, nor.block_size().max(1) as usize)
                .map_err(|_| LaunchError::FlashOp)?;
            let ok = nor.verify(phys_addr, &chunk).map_err(|_| LaunchError::FlashOp)?;
            if !ok {
                return Err(LaunchError::FlashOp);
            }
        }
        Ok(())
    })();

    // Flash commands never run while SDRAM-mapped and vice versa; restore
    // SDRAM mapping on every exit path, success or failure.
    let _ = decoder.set_mode(DecoderMode::Sdram);
    result?;
    Ok(block_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placer_prefers_tail_until_budget_exceeded() {
        let mut placer = PayloadPlacer::new(MAX_ROM_SIZE - 100, None, 0);
        assert_eq!(placer.place(50), Some(MAX_ROM_SIZE - 100));
        // Next payload would land past MAX_ROM_SIZE and there's no hole.
        assert_eq!(placer.place(100), None);
    }

    #[test]
    fn placer_falls_back_to_hole() {
        let mut placer = PayloadPlacer::new(MAX_ROM_SIZE - 10, Some(0x1000), 0x200);
        assert_eq!(placer.place(100), Some(0x1000));
        assert_eq!(placer.place(50), Some(0x1000 + 100));
    }

    #[test]
    fn placer_rejects_hole_too_small() {
        let mut placer = PayloadPlacer::new(MAX_ROM_SIZE - 10, Some(0x1000), 20);
        assert_eq!(placer.place(100), None);
    }

    #[test]
    fn place_payloads_disables_menu_without_igm_support() {
        use crate::savetype::SaveType;
        let record = PatchRecord::new(SaveType::None, 0, 0, &[], &[], &[], &[], vec![]).unwrap();
        let req = LaunchRequest {
            patch_waitcnt: true,
            patch_rtc: true,
            ingame_menu: Some(&[0u8; 16]),
            font: None,
            cheats: None,
            direct_save: None,
        };
        let placed = place_payloads(0x1000, &record, &req);
        assert_eq!(placed.igmenu_addr, 0);
    }

    struct FakeRom(Vec<u8>);
    impl RomReader for FakeRom {
        type Error = ();
        fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), ()> {
            let off = offset as usize;
            buf.copy_from_slice(&self.0[off..off + buf.len()]);
            Ok(())
        }
    }

    struct FakeSram(Vec<u8>);
    impl SramMirror for FakeSram {
        fn read(&self, offset: usize, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0[offset..offset + buf.len()]);
        }
        fn write(&mut self, offset: usize, buf: &[u8]) {
            self.0[offset..offset + buf.len()].copy_from_slice(buf);
        }
    }

    struct FakeReset(bool);
    impl ResetSequence for FakeReset {
        fn reset(&mut self) {
            self.0 = true;
        }
    }

    #[test]
    fn launch_sdram_aborts_cleanly_on_progress_request() {
        use crate::savetype::SaveType;
        let rom_size = STREAM_WINDOW * 2;
        let mut rom = FakeRom(vec![0u8; rom_size as usize]);
        let mut sdram = vec![0u8; rom_size as usize];
        let record = PatchRecord::new(SaveType::None, 0, 0, &[], &[], &[], &[], vec![]).unwrap();
        let req = LaunchRequest {
            patch_waitcnt: false,
            patch_rtc: false,
            ingame_menu: None,
            font: None,
            cheats: None,
            direct_save: None,
        };
        let mut sram = FakeSram(vec![0u8; 8 * 1024]);
        let mut reset = FakeReset(false);

        let err =
            launch_gba_sdram(&mut rom, &mut sdram, rom_size, &record, &req, &mut sram, &mut reset, |_, _| true)
                .unwrap_err();
        assert_eq!(err, LaunchError::Aborted);
        assert!(!reset.0, "abort must never reach the reset sequence");
    }

    #[test]
    fn launch_sdram_runs_to_completion_without_abort() {
        use crate::savetype::SaveType;
        let rom_size = STREAM_WINDOW;
        let mut rom = FakeRom(vec![0xABu8; rom_size as usize]);
        let mut sdram = vec![0u8; rom_size as usize];
        let record = PatchRecord::new(SaveType::None, 0, 0, &[], &[], &[], &[], vec![]).unwrap();
        let req = LaunchRequest {
            patch_waitcnt: false,
            patch_rtc: false,
            ingame_menu: None,
            font: None,
            cheats: None,
            direct_save: None,
        };
        let mut sram = FakeSram(vec![0u8; 8 * 1024]);
        let mut reset = FakeReset(false);

        launch_gba_sdram(&mut rom, &mut sdram, rom_size, &record, &req, &mut sram, &mut reset, |_, _| false).unwrap();
        assert!(reset.0);
        assert_eq!(sdram[0], 0xAB);
    }
}
