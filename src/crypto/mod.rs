//! Cryptographic utilities for the Notary Service
//!
//! Provides:
//! - Canonical JSON serialization (RFC 8785 JCS) so the same logical
//!   command always signs to the same bytes
//! - Domain-separated payload hashing
//! - Ed25519 signing keys and the versioned signature envelope format

mod canonical;
mod signing;

pub use canonical::*;
pub use signing::*;
