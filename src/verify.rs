//! Trust evaluation for signed metadata and downloaded files.
//!
//! The only way to obtain a [`Trusted`] value is through the verification
//! functions in this module (or, crate-internally, through local-file
//! admission when reloading documents that were verified before they
//! entered the cache). Code that requires `Trusted<M>` therefore cannot be
//! handed an unverified document by mistake.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::crypto::{self, KeyId, PublicKey, Signature};
use crate::error::VerificationError;
use crate::metadata::{
    FileFormat, FileInfo, Metadata, RawSignedMetadata, Role, RootMetadata, SnapshotMetadata,
    TimestampMetadata,
};

/// A value that has passed verification.
///
/// There is no public constructor; see the module documentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Trusted<T> {
    value: T,
}

impl<T> Deref for Trusted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Re-admit a document that was verified before it entered the local
/// cache. The chain of trust is anchored at the root, which was itself
/// bootstrapped or verified by a predecessor, so cached content is not
/// re-verified on every read.
pub(crate) fn admit_cached<T>(value: T) -> Trusted<T> {
    Trusted { value }
}

impl Trusted<TimestampMetadata> {
    /// The trusted description of the current snapshot.
    pub fn snapshot_info(&self) -> Trusted<FileInfo> {
        Trusted {
            value: self.value.snapshot().clone(),
        }
    }
}

impl Trusted<SnapshotMetadata> {
    /// The trusted description of the current root metadata.
    pub fn root_info(&self) -> Option<Trusted<FileInfo>> {
        self.value.root_info().cloned().map(|value| Trusted { value })
    }

    /// The trusted description of the current mirrors metadata.
    pub fn mirrors_info(&self) -> Option<Trusted<FileInfo>> {
        self.value
            .mirrors_info()
            .cloned()
            .map(|value| Trusted { value })
    }

    /// The trusted description of the package index in the given encoding.
    pub fn index_info(&self, format: FileFormat) -> Option<Trusted<FileInfo>> {
        self.value
            .index_info(format)
            .cloned()
            .map(|value| Trusted { value })
    }
}

/// Verify a role document against the trusted root: signature threshold,
/// then version floor, then expiry.
///
/// * `path` names the document in errors.
/// * If `prior_version` is given, the document's version must not be below
///   it. Callers enforce strict monotonicity on content changes by passing
///   the predecessor's version plus one.
/// * If `now` is given, the document must not have expired.
pub fn verify_role<M: Metadata>(
    trusted_root: &Trusted<RootMetadata>,
    path: &str,
    prior_version: Option<u64>,
    now: Option<DateTime<Utc>>,
    raw: &RawSignedMetadata<M>,
) -> Result<Trusted<M>, VerificationError> {
    let parsed = parse(path, raw)?;

    let definition = trusted_root.role_definition(M::ROLE);
    check_signatures(
        &parsed.canonical_bytes,
        &parsed.signatures,
        definition.threshold(),
        trusted_root.role_keys(M::ROLE),
    )?;

    check_version(prior_version, parsed.metadata.version())?;
    check_expiry(now, parsed.metadata.expires())?;

    Ok(Trusted {
        value: parsed.metadata,
    })
}

/// Verify a replacement root document under root-of-trust succession: the
/// new root must satisfy the old root's root-role threshold (continuity)
/// and its own root-role threshold (self-consistency).
pub fn verify_root_succession(
    trusted_root: &Trusted<RootMetadata>,
    path: &str,
    prior_version: Option<u64>,
    now: Option<DateTime<Utc>>,
    raw: &RawSignedMetadata<RootMetadata>,
) -> Result<Trusted<RootMetadata>, VerificationError> {
    let parsed = parse(path, raw)?;

    // continuity: the old root signed the new root
    check_signatures(
        &parsed.canonical_bytes,
        &parsed.signatures,
        trusted_root.role_definition(Role::Root).threshold(),
        trusted_root.role_keys(Role::Root),
    )?;

    // self-consistency: the new root signed itself
    check_signatures(
        &parsed.canonical_bytes,
        &parsed.signatures,
        parsed.metadata.role_definition(Role::Root).threshold(),
        parsed.metadata.role_keys(Role::Root),
    )?;

    check_version(prior_version, parsed.metadata.version())?;
    check_expiry(now, parsed.metadata.expires())?;

    Ok(Trusted {
        value: parsed.metadata,
    })
}

/// Verify a root document against caller-pinned key fingerprints. Used
/// only at bootstrap.
///
/// A `threshold` of zero means trust-on-first-use: the pinned set is not
/// consulted. In every case the root must additionally satisfy its own
/// root-role threshold.
pub fn verify_fingerprints(
    pinned_key_ids: &[KeyId],
    threshold: u32,
    path: &str,
    raw: &RawSignedMetadata<RootMetadata>,
) -> Result<Trusted<RootMetadata>, VerificationError> {
    let parsed = parse(path, raw)?;

    if threshold > 0 {
        let pinned_keys = parsed
            .metadata
            .keys()
            .iter()
            .filter_map(|(key_id, key)| {
                if pinned_key_ids.contains(key_id) {
                    Some(key)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        check_signatures(
            &parsed.canonical_bytes,
            &parsed.signatures,
            threshold,
            pinned_keys,
        )?;
    }

    check_signatures(
        &parsed.canonical_bytes,
        &parsed.signatures,
        parsed.metadata.role_definition(Role::Root).threshold(),
        parsed.metadata.role_keys(Role::Root),
    )?;

    Ok(Trusted {
        value: parsed.metadata,
    })
}

/// Whether the given bytes match a signed file description: the length
/// must be exact and at least one of the expected digests must match.
pub fn verify_file_info(expected: &FileInfo, bytes: &[u8]) -> bool {
    if expected.length() != bytes.len() as u64 {
        return false;
    }

    let algs = expected.hashes().keys().cloned().collect::<Vec<_>>();
    let hashes = match crypto::calculate_hashes(bytes, &algs) {
        Ok((_, hashes)) => hashes,
        Err(_) => return false,
    };

    expected
        .hashes()
        .iter()
        .any(|(alg, digest)| hashes.get(alg) == Some(digest))
}

fn parse<M: Metadata>(
    path: &str,
    raw: &RawSignedMetadata<M>,
) -> Result<crate::metadata::ParsedMetadata<M>, VerificationError> {
    raw.parse().map_err(|e| VerificationError::Deserialization {
        path: path.to_string(),
        cause: e.to_string(),
    })
}

fn check_signatures<'a, I>(
    canonical_bytes: &[u8],
    signatures: &[Signature],
    threshold: u32,
    authorized_keys: I,
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = &'a PublicKey>,
{
    if threshold < 1 {
        return Err(VerificationError::Signatures);
    }

    let authorized_keys = authorized_keys
        .into_iter()
        .map(|k| (k.key_id(), k))
        .collect::<HashMap<&KeyId, &PublicKey>>();

    let mut good = HashSet::new();
    for sig in signatures {
        if good.contains(sig.key_id()) {
            continue;
        }
        match authorized_keys.get(sig.key_id()) {
            Some(key) => {
                if key.verify(canonical_bytes, sig) {
                    debug!("Good signature from key ID {:?}", key.key_id());
                    good.insert(sig.key_id());
                } else {
                    warn!("Bad signature from key ID {:?}", key.key_id());
                }
            }
            None => {
                debug!(
                    "Key ID {:?} was not found in the set of authorized keys.",
                    sig.key_id()
                );
            }
        }
        if good.len() as u64 >= u64::from(threshold) {
            return Ok(());
        }
    }

    warn!(
        "Signature threshold not met: {}/{}",
        good.len(),
        threshold
    );
    Err(VerificationError::Signatures)
}

fn check_version(prior_version: Option<u64>, new: u64) -> Result<(), VerificationError> {
    if let Some(prior) = prior_version {
        if new < prior {
            return Err(VerificationError::Version { prior, new });
        }
    }
    Ok(())
}

fn check_expiry(
    now: Option<DateTime<Utc>>,
    expires: &DateTime<Utc>,
) -> Result<(), VerificationError> {
    if let Some(now) = now {
        if *expires <= now {
            return Err(VerificationError::Expired { expires: *expires });
        }
    }
    Ok(())
}
