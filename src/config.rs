//! Reader configuration.
//!
//! [`ReaderConfig`] is a clap `Parser`, so a host application can flatten it
//! into its own command line, and every option can also be set through a
//! `BIOPLANE_` environment variable:
//!
//! - `BIOPLANE_CACHE_BUDGET` - Byte budget of the block cache (default: 1 GiB)
//! - `BIOPLANE_NO_CACHE` - Bypass the block cache for every read
//! - `BIOPLANE_ROW_ALIGNMENT` - Row widths that are a multiple of this never
//!   carry padding (default: 4)
//! - `BIOPLANE_NATIVE_BYTE_ORDER` - Convert samples to host byte order
//!   (default: true)
//! - `BIOPLANE_DEINTERLEAVE` - Return one sub-plane per sample (default: false)
//! - `BIOPLANE_BGR_TO_RGB` - Swap BGR-stored colour samples (default: true)
//!
//! # Example
//!
//! ```
//! use bioplane::config::ReaderConfig;
//! use clap::Parser;
//!
//! let config = ReaderConfig::parse_from(["reader", "--cache-budget", "1048576"]);
//! assert_eq!(config.cache_budget, 1 << 20);
//! assert!(config.validate().is_ok());
//! ```

use clap::{ArgAction, Parser};
use tracing_subscriber::prelude::*;

use crate::layout::DEFAULT_ROW_ALIGNMENT;
use crate::plane::DEFAULT_CACHE_BUDGET;

/// Options of a [`crate::plane::PlaneReader`].
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "bioplane")]
#[command(author, version, about, long_about = None)]
pub struct ReaderConfig {
    // =========================================================================
    // Cache
    // =========================================================================
    /// Byte budget of the single-slot block cache.
    ///
    /// Series whose per-timepoint volume exceeds the budget are read directly.
    #[arg(long, default_value_t = DEFAULT_CACHE_BUDGET, env = "BIOPLANE_CACHE_BUDGET")]
    pub cache_budget: u64,

    /// Read every plane directly from storage.
    #[arg(long, default_value_t = false, env = "BIOPLANE_NO_CACHE")]
    pub no_cache: bool,

    // =========================================================================
    // Layout
    // =========================================================================
    /// Rows whose width is a multiple of this are never padded.
    #[arg(long, default_value_t = DEFAULT_ROW_ALIGNMENT, env = "BIOPLANE_ROW_ALIGNMENT")]
    pub row_alignment: u32,

    // =========================================================================
    // Sample conversion
    // =========================================================================
    /// Convert multi-byte samples to the host byte order.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "BIOPLANE_NATIVE_BYTE_ORDER")]
    pub native_byte_order: bool,

    /// Return interleaved multi-sample planes as one sub-plane per sample.
    #[arg(long, default_value_t = false, env = "BIOPLANE_DEINTERLEAVE")]
    pub deinterleave: bool,

    /// Swap samples of 3-sample pixels declared as BGR into RGB order.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "BIOPLANE_BGR_TO_RGB")]
    pub bgr_to_rgb: bool,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache_budget: DEFAULT_CACHE_BUDGET,
            no_cache: false,
            row_alignment: DEFAULT_ROW_ALIGNMENT,
            native_byte_order: true,
            deinterleave: false,
            bgr_to_rgb: true,
            verbose: false,
        }
    }
}

impl ReaderConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.row_alignment == 0 {
            return Err("row_alignment must be greater than 0".to_string());
        }
        if !self.no_cache && self.cache_budget == 0 {
            return Err(
                "cache_budget must be greater than 0. Use --no-cache or BIOPLANE_NO_CACHE to disable the cache"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "bioplane=debug"
        } else {
            "bioplane=info"
        }
    }

    /// Budget actually handed to the cache; zero when caching is off.
    pub fn effective_cache_budget(&self) -> u64 {
        if self.no_cache {
            0
        } else {
            self.cache_budget
        }
    }
}

/// Install a `tracing` subscriber for the crate.
///
/// `RUST_LOG` takes precedence; otherwise logs at info level, or debug level
/// when `config.verbose` is set. Fails if a global subscriber is already
/// installed.
pub fn init_logging(config: &ReaderConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = config.log_filter();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

// =============================================================================
// Tests
// =============================================================================
