//! Remit Common Types
//!
//! Shared types for the remittance core: identifiers, currencies and
//! exchange rates, the transfer status machine, the error taxonomy and the
//! injectable clock.

pub mod identifiers;
pub mod monetary;
pub mod transfer;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use transfer::*;
pub use error::*;
pub use time::*;
