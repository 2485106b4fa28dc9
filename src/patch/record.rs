//! Patch Record value type and patch-op decoding (§3/§4.B, §4.D opcode
//! table), grounded on `patcher.c`'s `apply_patch_ops` opcode switch.

use crate::error::PatchError;
use crate::savetype::SaveType;

/// Maximum number of inlined byte programs a [`PatchRecord`] may carry.
/// Loading a record that declares more is a load-time failure.
pub const MAX_PATCH_PRG: usize = 8;

/// Maximum length of a single inlined program, matching the length-prefixed
/// sub-record encoding in the patch database's program page (a one-byte
/// length prefix, so 255 bytes is the hard ceiling; builds may set a
/// tighter cap).
pub const MAX_PRG_LEN: usize = 64;

/// An inlined byte program, spliced verbatim by opcode 0.
#[derive(Debug, Clone)]
pub struct Program {
    pub data: Vec<u8>,
}

/// One fully decoded patch op. Decoding happens once, at [`PatchRecord`]
/// construction time, rather than being re-parsed on every window apply.
#[derive(Debug, Clone)]
pub enum DecodedOp {
    SpliceProgram { offset: u32, prg_index: u8 },
    ThumbNop { offset: u32 },
    ArmNop { offset: u32 },
    WriteBytes { offset: u32, bytes: Vec<u8> },
    WriteWords { offset: u32, words: Vec<u32> },
    /// Opcode 5: replace a function's prologue with a `return arg` stub.
    /// `arg` is one of {0, 1, 4, 5}; 0/1 are Thumb `ret 0`/`ret 1`, 4/5 are
    /// ARM `ret 0`/`ret 1` (ARM stubs are two words: mov + bx).
    StubReturn { offset: u32, arg: u8 },
    /// Opcode 7: install RTC stand-in `arg` (0=probe,1=reset,2=status,3=gettimedate).
    RtcStandin { offset: u32, which: u8 },
    /// Opcode 8: install EEPROM stand-in `arg` (0=read,1=write).
    EepromStandin { offset: u32, which: u8 },
    /// Opcode 9: install FLASH stand-in `arg`
    /// (0=read,1=erase-device,2=erase-sector,3=write-sector,4=write-byte).
    FlashStandin { offset: u32, which: u8 },
}

/// Decodes a raw op-word stream (one `wcnt`/`save`/`irqh`/`rtc` group) into
/// owned [`DecodedOp`] values. Mirrors `apply_patch_ops`'s opcode switch,
/// including how opcodes 3 and 4 consume following op words as inline data.
pub fn decode_ops(ops: &[u32]) -> Result<Vec<DecodedOp>, PatchError> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < ops.len() {
        let word = ops[i];
        let opcode = (word >> 28) as u8;
        let arg = ((word >> 25) & 7) as u8;
        let offset = word & 0x01FF_FFFF;

        match opcode {
            0x0 => out.push(DecodedOp::SpliceProgram { offset, prg_index: arg }),
            0x1 => out.push(DecodedOp::ThumbNop { offset }),
            0x2 => out.push(DecodedOp::ArmNop { offset }),
            0x3 => {
                let n = arg as usize + 1;
                let extra_words = (n + 3) / 4;
                if i + extra_words >= ops.len() {
                    return Err(PatchError::Truncated);
                }
                let mut bytes = Vec::with_capacity(n);
                for j in 0..n {
                    let w = ops[i + 1 + j / 4];
                    bytes.push((w >> (8 * (j % 4))) as u8);
                }
                out.push(DecodedOp::WriteBytes { offset, bytes });
                i += extra_words;
            }
            0x4 => {
                let n = arg as usize + 1;
                if i + n >= ops.len() {
                    return Err(PatchError::Truncated);
                }
                let mut words = Vec::with_capacity(n);
                for j in 0..n {
                    words.push(ops[i + 1 + j]);
                }
                out.push(DecodedOp::WriteWords { offset, words });
                i += n;
            }
            0x5 => out.push(DecodedOp::StubReturn { offset, arg }),
            0x7 => out.push(DecodedOp::RtcStandin { offset, which: arg }),
            0x8 => out.push(DecodedOp::EepromStandin { offset, which: arg }),
            0x9 => out.push(DecodedOp::FlashStandin { offset, which: arg }),
            // Opcode 6 is reserved and unused by any known patch database;
            // skip it rather than fail the whole record.
            _ => {}
        }
        i += 1;
    }
    Ok(out)
}

/// Re-encodes a decoded op group back into the raw 32-bit op-word stream,
/// the inverse of [`decode_ops`]. Used by the patch cache to serialize a
/// record back into the database's on-wire entry format.
pub fn encode_ops(ops: &[DecodedOp]) -> Vec<u32> {
    let mut out = Vec::new();
    for op in ops {
        match op {
            DecodedOp::SpliceProgram { offset, prg_index } => {
                out.push((0x0 << 28) | ((*prg_index as u32) << 25) | (offset & 0x01FF_FFFF));
            }
            DecodedOp::ThumbNop { offset } => {
                out.push((0x1 << 28) | (offset & 0x01FF_FFFF));
            }
            DecodedOp::ArmNop { offset } => {
                out.push((0x2 << 28) | (offset & 0x01FF_FFFF));
            }
            DecodedOp::WriteBytes { offset, bytes } => {
                let arg = (bytes.len() - 1) as u32;
                out.push((0x3 << 28) | (arg << 25) | (offset & 0x01FF_FFFF));
                for chunk in bytes.chunks(4) {
                    let mut word = 0u32;
                    for (i, b) in chunk.iter().enumerate() {
                        word |= (*b as u32) << (8 * i);
                    }
                    out.push(word);
                }
            }
            DecodedOp::WriteWords { offset, words } => {
                let arg = (words.len() - 1) as u32;
                out.push((0x4 << 28) | (arg << 25) | (offset & 0x01FF_FFFF));
                out.extend_from_slice(words);
            }
            DecodedOp::StubReturn { offset, arg } => {
                out.push((0x5 << 28) | ((*arg as u32) << 25) | (offset & 0x01FF_FFFF));
            }
            DecodedOp::RtcStandin { offset, which } => {
                out.push((0x7 << 28) | ((*which as u32) << 25) | (offset & 0x01FF_FFFF));
            }
            DecodedOp::EepromStandin { offset, which } => {
                out.push((0x8 << 28) | ((*which as u32) << 25) | (offset & 0x01FF_FFFF));
            }
            DecodedOp::FlashStandin { offset, which } => {
                out.push((0x9 << 28) | ((*which as u32) << 25) | (offset & 0x01FF_FFFF));
            }
        }
    }
    out
}

/// An immutable, fully decoded patch record for one title.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    pub save_mode: SaveType,
    pub hole_addr: Option<u32>,
    pub hole_size: u32,
    wcnt: Vec<DecodedOp>,
    save: Vec<DecodedOp>,
    irqh: Vec<DecodedOp>,
    rtc: Vec<DecodedOp>,
    pub prgs: Vec<Program>,
}

impl PatchRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        save_mode: SaveType,
        hole_addr: u32,
        hole_size: u32,
        wcnt_ops: &[u32],
        save_ops: &[u32],
        irqh_ops: &[u32],
        rtc_ops: &[u32],
        prgs: Vec<Program>,
    ) -> Result<Self, PatchError> {
        if prgs.len() > MAX_PATCH_PRG {
            return Err(PatchError::TooManyPrograms);
        }
        for prg in &prgs {
            if prg.data.len() > MAX_PRG_LEN {
                return Err(PatchError::ProgramTooLarge);
            }
        }
        Ok(PatchRecord {
            save_mode,
            hole_addr: if hole_size != 0 { Some(hole_addr) } else { None },
            hole_size,
            wcnt: decode_ops(wcnt_ops)?,
            save: decode_ops(save_ops)?,
            irqh: decode_ops(irqh_ops)?,
            rtc: decode_ops(rtc_ops)?,
            prgs,
        })
    }

    pub fn wcnt_ops(&self) -> &[DecodedOp] {
        &self.wcnt
    }
    pub fn save_ops(&self) -> &[DecodedOp] {
        &self.save
    }
    pub fn irqh_ops(&self) -> &[DecodedOp] {
        &self.irqh
    }
    pub fn rtc_ops(&self) -> &[DecodedOp] {
        &self.rtc
    }

    /// Whether this record's in-game-menu group is nonempty, i.e. the menu
    /// overlay is supported for this title.
    pub fn supports_igm(&self) -> bool {
        !self.irqh.is_empty()
    }

    /// Re-encodes this record's entry header word and concatenated op
    /// stream (`wcnt, save, irqh, rtc`, plus the hole trailer if present),
    /// matching the database's on-wire entry encoding.
    pub fn encode_entry(&self) -> Vec<u32> {
        let wcnt = encode_ops(&self.wcnt);
        let save = encode_ops(&self.save);
        let irqh = encode_ops(&self.irqh);
        let rtc = encode_ops(&self.rtc);

        let has_hole = self.hole_addr.is_some();
        let pheader = (self.wcnt.len() as u32 & 0xFF)
            | ((self.save.len() as u32 & 0x1F) << 8)
            | ((self.save_mode as u32 & 0x7) << 13)
            | ((self.irqh.len() as u32 & 0xFF) << 16)
            | ((self.rtc.len() as u32 & 0x0F) << 24)
            | if has_hole { 1 << 28 } else { 0 };

        let mut out = vec![pheader];
        out.extend_from_slice(&wcnt);
        out.extend_from_slice(&save);
        out.extend_from_slice(&irqh);
        out.extend_from_slice(&rtc);
        if let Some(hole_addr) = self.hole_addr {
            out.push(((hole_addr >> 10) << 16) | (self.hole_size >> 10));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_word_literal_op() {
        // opcode=4, arg=0 (1 word), off=0x100, followed by the literal word.
        let ops = [0x4000_0100u32, 0xDEADBEEF];
        let decoded = decode_ops(&ops).unwrap();
        assert_eq!(decoded.len(), 1);
        match &decoded[0] {
            DecodedOp::WriteWords { offset, words } => {
                assert_eq!(*offset, 0x100);
                assert_eq!(words, &vec![0xDEADBEEFu32]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_thumb_nop() {
        let ops = [0x1000_0200u32];
        let decoded = decode_ops(&ops).unwrap();
        match &decoded[0] {
            DecodedOp::ThumbNop { offset } => assert_eq!(*offset, 0x200),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let ops = [0x1000_0200u32, 0x3000_0300u32, 0x11, 0x4000_0100u32, 0xDEADBEEF];
        let decoded = decode_ops(&ops).unwrap();
        let encoded = encode_ops(&decoded);
        assert_eq!(encoded, ops);
    }
}
