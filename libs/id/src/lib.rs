//! # convoy-id
//!
//! Command identifiers for convoy device sessions.
//!
//! ## Design Principles
//!
//! - Ids are small positive integers, cheap to put on the wire
//! - Ids are only unique among the commands currently in flight on one session
//! - Released ids are handed out again before new ones are minted, so a
//!   long-lived session keeps its ids close to 1
//!
//! ## Wire Format
//!
//! Outbound device commands are a single line: `{id} {command text}`.
//!
//! Examples:
//! - `1 status`
//! - `12 expose 1.5 --filename img.fits`

mod error;
mod pool;
mod types;

pub use error::IdError;
pub use pool::IdPool;
pub use types::*;
