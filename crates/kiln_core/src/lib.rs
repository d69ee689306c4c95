//! Kiln Core
//!
//! Foundational types shared by every Kiln crate:
//!
//! - [`math`]: double-precision world transforms and rigid bone transforms
//! - [`time`]: fixed-point animation [`Time`]
//! - [`stream`]: binary [`OutputMemoryStream`] / [`InputMemoryStream`]
//! - [`hash`]: [`StableHash`] and normalized resource [`Path`]s
//! - [`signal`]: multicast callbacks
//! - [`errors`]: [`KilnError`] and the crate-wide [`Result`] alias

pub mod errors;
pub mod hash;
pub mod math;
pub mod signal;
pub mod stream;
pub mod time;

pub use errors::{KilnError, Result};
pub use hash::{Path, StableHash};
pub use math::{LocalRigidTransform, RigidTransform, Transform};
pub use signal::{Signal, SlotId};
pub use stream::{InputMemoryStream, OutputMemoryStream};
pub use time::Time;
