//! `superfw-core`: the ROM patch engine, NOR flash region manager and
//! direct-save stack behind a GBA flashcart multi-ROM launcher.
//!
//! This crate covers the three tightly coupled subsystems the firmware's
//! menu/rendering layer, FAT access, and low-level SD/NOR command drivers
//! sit on top of (spec §1):
//!
//! - [`patch`] — the patch database reader, patch record/op model, windowed
//!   ROM applier and save-function stand-in catalog (§4.A-E).
//! - [`nor`] — the NOR flash region manager: an append-only metadata
//!   journal with per-block wear accounting (§4.F).
//! - [`directsave`] — the Direct-Save Config record and the runtime
//!   EEPROM/FLASH-to-SD translation model (§4.E, §4.G).
//! - [`savegame`] — save-game preparation around reboots (§4.H).
//! - [`launcher`] — load/patch/payload/reset orchestration (§4.I).
//!
//! Every collaborator spec.md treats as out of scope — the FAT filesystem,
//! the low-level SD and NOR command drivers, the frame-tick interrupt — is
//! modeled as a trait in [`traits`], supplied by the embedding firmware
//! binary. That is what lets the whole engine be exercised on a host.

pub mod datetime;
pub mod directsave;
pub mod error;
pub mod gameid;
pub mod launcher;
pub mod nor;
pub mod patch;
pub mod savegame;
pub mod savetype;
pub mod traits;

pub use error::{DirectSaveError, LaunchError, NorError, PatchError, SaveGameError};
pub use gameid::GameId;
pub use savetype::SaveType;
