//! A client library for secure package-repository updates.
//!
//! The library refreshes a small set of signed metadata roles (root,
//! timestamp, snapshot, mirrors) plus the package index from a possibly
//! hostile remote, verifies every artifact against the locally trusted
//! state before it is committed, and gates package downloads on hash
//! verification against the signed index.
//!
//! The entry points live in [`client::Client`]:
//!
//! * [`client::Client::bootstrap`] acquires the initial root metadata,
//!   verified only against caller-pinned key fingerprints.
//! * [`client::Client::check_for_updates`] runs the update state machine:
//!   timestamp, snapshot, (root), mirrors, index, in that order, with a
//!   bounded retry loop that defends against rollback and freeze attacks.
//! * [`client::Client::download_package`] resolves a package against the
//!   cached index and downloads its hash-verified tarball.
//!
//! Verified metadata is represented by [`verify::Trusted`], a wrapper that
//! can only be constructed by the verification functions in [`verify`], so
//! unverified documents cannot be mistaken for trusted ones at compile
//! time.

pub mod cache;
pub mod client;
pub mod crypto;
pub mod error;
pub mod index;
pub mod interchange;
pub mod metadata;
pub mod repository;
mod shims;
pub mod verify;

pub use crate::client::{Client, Config, UpdateOutcome};
pub use crate::error::{Error, VerificationError};

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, error::Error>;
