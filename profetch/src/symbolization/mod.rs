//! # Symbol Resolution
//!
//! Fetched profiles often carry raw addresses only. This module attaches
//! function names to them once all sources have been merged.
//!
//! ## Modes
//!
//! | Mode     | Behaviour                                                     |
//! |----------|---------------------------------------------------------------|
//! | `none`   | leave the profile as fetched                                  |
//! | `local`  | read DWARF from binaries found on disk (see [`symbolizer`])   |
//! | `remote` | ask the profiled servers via symbolz (see [`symbolz`])        |
//! | `auto`   | local first, then remote for whatever is still unsymbolized   |
//!
//! ## Address Translation
//!
//! Profiles record runtime addresses. For position independent binaries
//! DWARF uses file-relative addresses, so local symbolization translates:
//!
//! ```text
//! Object Address = Runtime Address - Mapping Start + Mapping Offset
//! ```
//!
//! Remote symbolization translates into the address space of the source the
//! mapping was fetched from, using the provenance map:
//!
//! ```text
//! Remote Address = Runtime Address - Mapping Start + Source Start
//! ```
//!
//! Merging relocates mappings, so the aggregate profile's start addresses
//! need not match any single source.

pub mod symbolizer;
pub mod symbolz;

use std::time::Duration;

use anyhow::Result;
use log::info;
use profetch_common::Profile;

use crate::domain::MappingSources;
use crate::plugin::Symbolize;

pub use symbolizer::{symbolize_local, DwarfSymbolizer, ResolvedFrame};
pub use symbolz::{symbolize_remote, symbolz_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SymbolizeMode {
    None,
    Local,
    Remote,
    #[default]
    Auto,
}

impl SymbolizeMode {
    fn local(self) -> bool {
        matches!(self, Self::Local | Self::Auto)
    }

    fn remote(self) -> bool {
        matches!(self, Self::Remote | Self::Auto)
    }
}

/// Default [`Symbolize`] implementation
#[derive(Debug, Clone, Copy)]
pub struct Symbolizer {
    /// Timeout for each symbolz request.
    pub timeout: Duration,
}

impl Default for Symbolizer {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }
}

impl Symbolize for Symbolizer {
    fn symbolize(
        &self,
        mode: SymbolizeMode,
        sources: &MappingSources,
        profile: &mut Profile,
    ) -> Result<()> {
        if mode.local() {
            let n = symbolize_local(profile);
            if n > 0 {
                info!("Symbolized {n} locations from local binaries");
            }
        }
        if mode.remote() && !sources.is_empty() {
            let n = symbolize_remote(profile, sources, self.timeout);
            if n > 0 {
                info!("Symbolized {n} locations remotely");
            }
        }
        Ok(())
    }
}
