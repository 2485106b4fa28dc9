//! Patch engine: database reader, record/op decoding, windowed applier,
//! stand-in catalog and filesystem cache (§4.A-E).

pub mod applier;
pub mod cache;
pub mod db;
pub mod record;
pub mod standins;

pub use applier::{apply_payload, apply_to_window, ApplyOptions};
pub use db::{DbInfo, PatchDb};
pub use record::PatchRecord;
pub use standins::SaveFlavor;
