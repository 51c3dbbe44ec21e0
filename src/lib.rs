#![no_std]

//! qentem-reserve: a per-logical-CPU bitfield-table memory reserver, plus a
//! fixed-width limb-based unsigned BigInt, ported from Qentem Engine's
//! `Reserver`/`MemoryBlock`/`BigInt` headers.
//!
//! The reserver hands out aligned byte regions carved from large
//! page-aligned blocks with no per-allocation header: allocation state
//! lives entirely in an external bitfield table at the front of each
//! block. Each logical CPU gets its own arena (`ReserverCore`); the
//! normal allocate/release path never touches another core's state.
//!
//! ```ignore
//! use qentem_reserve::Reserver;
//!
//! let reserver = Reserver::new();
//! let p = reserver.reserve(32).unwrap();
//! reserver.release(p, 32).unwrap();
//! ```

#[cfg(any(test, feature = "std"))]
extern crate std;
extern crate alloc;

pub mod bigint;
pub mod bitops;
pub mod config;
pub mod cpu;
pub mod error;
pub mod memory_block;
#[macro_use]
pub mod macros;
pub mod platform;
pub mod reserver;
pub mod stats;
pub mod sync;

pub use bigint::{BigInt, Limb, U128, U256, U384, U1024};
pub use config::{DefaultConfig, ReserverConfig};
pub use error::ReserverError;
pub use reserver::Reserver;
