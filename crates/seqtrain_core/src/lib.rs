//! # seqtrain_core
//!
//! Core types shared by the seqtrain crates.
//!
//! This crate provides:
//! - [`Split`] naming the train/dev/test partitions of a sequence dataset
//! - [`Seed`] for deterministic, per-epoch reproducible shuffling
//! - [`CoreError`] and the crate-wide [`Result`] alias
//!
//! ## Example
//!
//! ```rust
//! use seqtrain_core::{Seed, Split};
//!
//! let seed = Seed::new(42);
//! let epoch_seed = seed.for_epoch(3);
//! assert_ne!(seed, epoch_seed);
//!
//! for split in Split::ALL {
//!     println!("{split}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod seed;
mod split;

pub use error::{CoreError, Result};
pub use seed::Seed;
pub use split::Split;
