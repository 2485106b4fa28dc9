//! Direct-save SRAM config and SD translation runtime (§3, §4.E, §4.G).

pub mod config;
pub mod runtime;

pub use config::DirectSaveConfig;
pub use runtime::DirectSaveRuntime;
