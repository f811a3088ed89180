//! Repository metadata: roles, file descriptions, and signed documents.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Display};
use std::io::Read;
use std::marker::PhantomData;

use chrono::offset::Utc;
use chrono::{DateTime, Duration};
use serde::de::{Deserialize, DeserializeOwned, Deserializer, Error as DeserializeError};
use serde::ser::{Error as SerializeError, Serialize, Serializer};
use url::Url;

use crate::crypto::{self, HashAlgorithm, KeyId, PrivateKey, PublicKey, Signature};
use crate::error::Error;
use crate::interchange;
use crate::shims;
use crate::Result;

/// File name of the uncompressed package index in the snapshot's file map
/// and in the cache.
pub const INDEX_TAR: &str = "index.tar";

/// File name of the gzip-compressed package index in the snapshot's file
/// map.
pub const INDEX_TAR_GZ: &str = "index.tar.gz";

#[rustfmt::skip]
static COMPONENT_ILLEGAL_STRINGS: &[&str] = &[
    "/",
    ":", // for *nix compatibility
    "\\", // for windows compatibility
    "<",
    ">",
    "\"",
    "|",
    "?",
    "*",
    "\u{000}",
    "\u{00a}",
    "\u{00d}",
];

fn safe_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::IllegalArgument("Component cannot be empty".into()));
    }

    if component == "." || component == ".." {
        return Err(Error::IllegalArgument(format!(
            "Illegal path component {:?}",
            component
        )));
    }

    for bad_str in COMPONENT_ILLEGAL_STRINGS {
        if component.contains(bad_str) {
            return Err(Error::IllegalArgument(format!(
                "Component cannot contain {:?}",
                bad_str
            )));
        }
    }

    Ok(())
}

/// The four metadata roles that form the trust chain.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde_derive::Serialize,
    serde_derive::Deserialize,
)]
pub enum Role {
    /// The root role: keys and thresholds for all roles, itself included.
    #[serde(rename = "root")]
    Root,
    /// The timestamp role: description of the current snapshot.
    #[serde(rename = "timestamp")]
    Timestamp,
    /// The snapshot role: descriptions of root, mirrors, and the index.
    #[serde(rename = "snapshot")]
    Snapshot,
    /// The mirrors role: the list of alternate download origins.
    #[serde(rename = "mirrors")]
    Mirrors,
}

impl Role {
    /// Return the name of the role.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Root => "root",
            Role::Timestamp => "timestamp",
            Role::Snapshot => "snapshot",
            Role::Mirrors => "mirrors",
        }
    }

    /// The file name under which this role is stored, both remotely and in
    /// the cache.
    pub fn file_name(&self) -> &'static str {
        match self {
            Role::Root => "root.json",
            Role::Timestamp => "timestamp.json",
            Role::Snapshot => "snapshot.json",
            Role::Mirrors => "mirrors.json",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The encodings the package index is published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// An uncompressed tar archive.
    Plain,
    /// A gzip-compressed tar archive.
    Gzip,
}

impl FileFormat {
    /// The snapshot/remote file name of the index in this encoding.
    pub fn index_file_name(&self) -> &'static str {
        match self {
            FileFormat::Plain => INDEX_TAR,
            FileFormat::Gzip => INDEX_TAR_GZ,
        }
    }
}

/// Top level trait used for role metadata.
pub trait Metadata: Debug + PartialEq + Serialize + DeserializeOwned {
    /// The role associated with the metadata.
    const ROLE: Role;

    /// The version number.
    fn version(&self) -> u64;

    /// An immutable reference to the metadata's expiration `DateTime`.
    fn expires(&self) -> &DateTime<Utc>;
}

/// A signed document exactly as it appeared on the wire or in the cache.
///
/// Holding on to the raw bytes matters: signatures cover the canonical
/// form of the wire `signed` subtree, and file hashes cover the bytes as
/// served.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignedMetadata<M> {
    bytes: Vec<u8>,
    _metadata: PhantomData<M>,
}

impl<M> RawSignedMetadata<M> {
    /// Wrap raw document bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        RawSignedMetadata {
            bytes,
            _metadata: PhantomData,
        }
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl<M: DeserializeOwned> RawSignedMetadata<M> {
    /// Split the document into its signature envelope, the canonical bytes
    /// the signatures cover, and the parsed payload.
    pub(crate) fn parse(&self) -> Result<ParsedMetadata<M>> {
        let value: serde_json::Value = serde_json::from_slice(&self.bytes)?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Encoding("Document was not a JSON object".into()))?;

        let signed = object
            .get("signed")
            .ok_or_else(|| Error::Encoding("Document had no signed subtree".into()))?;
        let signatures: Vec<Signature> = match object.get("signatures") {
            Some(sigs) => serde_json::from_value(sigs.clone())?,
            None => Vec::new(),
        };

        let canonical_bytes = interchange::canonicalize(signed)?;
        let metadata: M = serde_json::from_value(signed.clone())?;

        Ok(ParsedMetadata {
            signatures,
            canonical_bytes,
            metadata,
        })
    }
}

/// The three views of a parsed signed document.
pub(crate) struct ParsedMetadata<M> {
    pub(crate) signatures: Vec<Signature>,
    pub(crate) canonical_bytes: Vec<u8>,
    pub(crate) metadata: M,
}

/// A piece of metadata with attached signatures, used for constructing and
/// signing documents (repository-side tooling and tests). Clients receive
/// documents as [`RawSignedMetadata`] instead.
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct SignedMetadata<M> {
    signatures: Vec<Signature>,
    #[serde(rename = "signed")]
    metadata: M,
}

impl<M: Serialize> SignedMetadata<M> {
    /// Create a new `SignedMetadata`. The supplied private key signs the
    /// canonical form of the provided metadata.
    pub fn new(metadata: M, private_key: &PrivateKey) -> Result<SignedMetadata<M>> {
        let bytes = interchange::canonicalize(&serde_json::to_value(&metadata)?)?;
        let sig = private_key.sign(&bytes);
        Ok(SignedMetadata {
            signatures: vec![sig],
            metadata,
        })
    }

    /// Append a signature to this signed metadata. Will overwrite a
    /// signature by a key with the same ID.
    pub fn add_signature(&mut self, private_key: &PrivateKey) -> Result<()> {
        let bytes = interchange::canonicalize(&serde_json::to_value(&self.metadata)?)?;
        let sig = private_key.sign(&bytes);
        self.signatures
            .retain(|s| s.key_id() != private_key.key_id());
        self.signatures.push(sig);
        Ok(())
    }

    /// An immutable reference to the signatures.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Serialize into the raw wire form.
    pub fn to_raw(&self) -> Result<RawSignedMetadata<M>> {
        Ok(RawSignedMetadata::new(serde_json::to_vec(self)?))
    }
}

impl<M> AsRef<M> for SignedMetadata<M> {
    fn as_ref(&self) -> &M {
        &self.metadata
    }
}

/// The size and hash digests of a file, as recorded in signed metadata.
///
/// Note that the derived equality is structural; protocol-level "describes
/// the same file" comparisons go through [`FileInfo::matches`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    length: u64,
    hashes: HashMap<HashAlgorithm, crypto::HashValue>,
}

impl FileInfo {
    /// Create a new `FileInfo`.
    pub fn new(length: u64, hashes: HashMap<HashAlgorithm, crypto::HashValue>) -> Result<Self> {
        if hashes.is_empty() {
            return Err(Error::IllegalArgument(
                "Cannot have empty set of hashes".into(),
            ));
        }

        Ok(FileInfo { length, hashes })
    }

    /// Read the given reader and calculate the size and hash values.
    pub fn from_reader<R: Read>(read: R, hash_algs: &[HashAlgorithm]) -> Result<Self> {
        let (length, hashes) = crypto::calculate_hashes(read, hash_algs)?;
        Ok(FileInfo { length, hashes })
    }

    /// The size of the described file.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// An immutable reference to the hashes of the described file.
    pub fn hashes(&self) -> &HashMap<HashAlgorithm, crypto::HashValue> {
        &self.hashes
    }

    /// Whether two descriptions describe the same file: the lengths must be
    /// equal and at least one hash algorithm present on both sides must
    /// have a matching digest. Descriptions with no algorithm in common
    /// never match.
    pub fn matches(&self, other: &FileInfo) -> bool {
        if self.length != other.length {
            return false;
        }

        self.hashes
            .iter()
            .any(|(alg, digest)| other.hashes.get(alg) == Some(digest))
    }
}

impl Serialize for FileInfo {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::FileInfo::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for FileInfo {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::FileInfo = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// The definition of what allows a role to be trusted.
#[derive(Clone, Debug, PartialEq)]
pub struct RoleDefinition {
    threshold: u32,
    key_ids: HashSet<KeyId>,
}

impl RoleDefinition {
    /// Create a new `RoleDefinition` with a given threshold and set of
    /// authorized `KeyId`s.
    pub fn new(threshold: u32, key_ids: HashSet<KeyId>) -> Result<Self> {
        if threshold < 1 {
            return Err(Error::IllegalArgument(format!("Threshold: {}", threshold)));
        }

        if key_ids.is_empty() {
            return Err(Error::IllegalArgument(
                "Cannot define a role with no associated key IDs".into(),
            ));
        }

        if (key_ids.len() as u64) < u64::from(threshold) {
            return Err(Error::IllegalArgument(format!(
                "Cannot have a threshold greater than the number of associated key IDs. {} vs. {}",
                threshold,
                key_ids.len()
            )));
        }

        Ok(RoleDefinition { threshold, key_ids })
    }

    /// The threshold number of signatures required for the role to be
    /// trusted.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// An immutable reference to the set of `KeyId`s that are authorized to
    /// sign the role.
    pub fn key_ids(&self) -> &HashSet<KeyId> {
        &self.key_ids
    }
}

impl Serialize for RoleDefinition {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::RoleDefinition::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for RoleDefinition {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::RoleDefinition = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// Helper to construct `RootMetadata`.
pub struct RootMetadataBuilder {
    version: u64,
    expires: DateTime<Utc>,
    keys: HashMap<KeyId, PublicKey>,
    root_threshold: u32,
    root_key_ids: HashSet<KeyId>,
    timestamp_threshold: u32,
    timestamp_key_ids: HashSet<KeyId>,
    snapshot_threshold: u32,
    snapshot_key_ids: HashSet<KeyId>,
    mirrors_threshold: u32,
    mirrors_key_ids: HashSet<KeyId>,
}

impl RootMetadataBuilder {
    /// Create a new `RootMetadataBuilder`. It defaults to:
    ///
    /// * version: 1
    /// * expires: 365 days from the current time
    /// * role thresholds: 1
    pub fn new() -> Self {
        RootMetadataBuilder {
            version: 1,
            expires: Utc::now() + Duration::days(365),
            keys: HashMap::new(),
            root_threshold: 1,
            root_key_ids: HashSet::new(),
            timestamp_threshold: 1,
            timestamp_key_ids: HashSet::new(),
            snapshot_threshold: 1,
            snapshot_key_ids: HashSet::new(),
            mirrors_threshold: 1,
            mirrors_key_ids: HashSet::new(),
        }
    }

    /// Set the version number for this metadata.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the time this metadata expires.
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = expires;
        self
    }

    /// Set the root threshold.
    pub fn root_threshold(mut self, threshold: u32) -> Self {
        self.root_threshold = threshold;
        self
    }

    /// Add a root public key.
    pub fn root_key(mut self, public_key: PublicKey) -> Self {
        let key_id = public_key.key_id().clone();
        self.keys.insert(key_id.clone(), public_key);
        self.root_key_ids.insert(key_id);
        self
    }

    /// Set the timestamp threshold.
    pub fn timestamp_threshold(mut self, threshold: u32) -> Self {
        self.timestamp_threshold = threshold;
        self
    }

    /// Add a timestamp public key.
    pub fn timestamp_key(mut self, public_key: PublicKey) -> Self {
        let key_id = public_key.key_id().clone();
        self.keys.insert(key_id.clone(), public_key);
        self.timestamp_key_ids.insert(key_id);
        self
    }

    /// Set the snapshot threshold.
    pub fn snapshot_threshold(mut self, threshold: u32) -> Self {
        self.snapshot_threshold = threshold;
        self
    }

    /// Add a snapshot public key.
    pub fn snapshot_key(mut self, public_key: PublicKey) -> Self {
        let key_id = public_key.key_id().clone();
        self.keys.insert(key_id.clone(), public_key);
        self.snapshot_key_ids.insert(key_id);
        self
    }

    /// Set the mirrors threshold.
    pub fn mirrors_threshold(mut self, threshold: u32) -> Self {
        self.mirrors_threshold = threshold;
        self
    }

    /// Add a mirrors public key.
    pub fn mirrors_key(mut self, public_key: PublicKey) -> Self {
        let key_id = public_key.key_id().clone();
        self.keys.insert(key_id.clone(), public_key);
        self.mirrors_key_ids.insert(key_id);
        self
    }

    /// Construct a new `RootMetadata`.
    pub fn build(self) -> Result<RootMetadata> {
        RootMetadata::new(
            self.version,
            self.expires,
            self.keys,
            RoleDefinition::new(self.root_threshold, self.root_key_ids)?,
            RoleDefinition::new(self.timestamp_threshold, self.timestamp_key_ids)?,
            RoleDefinition::new(self.snapshot_threshold, self.snapshot_key_ids)?,
            RoleDefinition::new(self.mirrors_threshold, self.mirrors_key_ids)?,
        )
    }

    /// Construct a new `SignedMetadata<RootMetadata>`.
    pub fn signed(self, private_key: &PrivateKey) -> Result<SignedMetadata<RootMetadata>> {
        SignedMetadata::new(self.build()?, private_key)
    }
}

impl Default for RootMetadataBuilder {
    fn default() -> Self {
        RootMetadataBuilder::new()
    }
}

/// Metadata for the root role.
#[derive(Debug, Clone, PartialEq)]
pub struct RootMetadata {
    version: u64,
    expires: DateTime<Utc>,
    keys: HashMap<KeyId, PublicKey>,
    root: RoleDefinition,
    timestamp: RoleDefinition,
    snapshot: RoleDefinition,
    mirrors: RoleDefinition,
}

impl RootMetadata {
    /// Create new `RootMetadata`.
    pub fn new(
        version: u64,
        expires: DateTime<Utc>,
        keys: HashMap<KeyId, PublicKey>,
        root: RoleDefinition,
        timestamp: RoleDefinition,
        snapshot: RoleDefinition,
        mirrors: RoleDefinition,
    ) -> Result<Self> {
        if version < 1 {
            return Err(Error::IllegalArgument(format!(
                "Metadata version must be greater than zero. Found: {}",
                version
            )));
        }

        Ok(RootMetadata {
            version,
            expires,
            keys,
            root,
            timestamp,
            snapshot,
            mirrors,
        })
    }

    /// An immutable reference to the map of trusted keys.
    pub fn keys(&self) -> &HashMap<KeyId, PublicKey> {
        &self.keys
    }

    /// An immutable reference to the given role's definition.
    pub fn role_definition(&self, role: Role) -> &RoleDefinition {
        match role {
            Role::Root => &self.root,
            Role::Timestamp => &self.timestamp,
            Role::Snapshot => &self.snapshot,
            Role::Mirrors => &self.mirrors,
        }
    }

    /// The public keys authorized to sign the given role.
    pub fn role_keys(&self, role: Role) -> Vec<&PublicKey> {
        let definition = self.role_definition(role);
        self.keys
            .iter()
            .filter_map(|(key_id, key)| {
                if definition.key_ids().contains(key_id) {
                    Some(key)
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Metadata for RootMetadata {
    const ROLE: Role = Role::Root;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

impl Serialize for RootMetadata {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::RootMetadata::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for RootMetadata {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::RootMetadata = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// Helper to construct `TimestampMetadata`.
pub struct TimestampMetadataBuilder {
    version: u64,
    expires: DateTime<Utc>,
    snapshot: FileInfo,
}

impl TimestampMetadataBuilder {
    /// Create a new `TimestampMetadataBuilder` from the raw bytes of the
    /// snapshot document it describes. It defaults to:
    ///
    /// * version: 1
    /// * expires: 1 day from the current time
    pub fn from_snapshot(
        snapshot: &RawSignedMetadata<SnapshotMetadata>,
        hash_algs: &[HashAlgorithm],
    ) -> Result<Self> {
        let info = FileInfo::from_reader(snapshot.as_bytes(), hash_algs)?;
        Ok(Self::from_file_info(info))
    }

    /// Create a new `TimestampMetadataBuilder` from a given snapshot
    /// `FileInfo`.
    pub fn from_file_info(snapshot: FileInfo) -> Self {
        TimestampMetadataBuilder {
            version: 1,
            expires: Utc::now() + Duration::days(1),
            snapshot,
        }
    }

    /// Set the version number for this metadata.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the time this metadata expires.
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = expires;
        self
    }

    /// Construct a new `TimestampMetadata`.
    pub fn build(self) -> Result<TimestampMetadata> {
        TimestampMetadata::new(self.version, self.expires, self.snapshot)
    }

    /// Construct a new `SignedMetadata<TimestampMetadata>`.
    pub fn signed(self, private_key: &PrivateKey) -> Result<SignedMetadata<TimestampMetadata>> {
        SignedMetadata::new(self.build()?, private_key)
    }
}

/// Metadata for the timestamp role.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampMetadata {
    version: u64,
    expires: DateTime<Utc>,
    snapshot: FileInfo,
}

impl TimestampMetadata {
    /// Create new `TimestampMetadata`.
    pub fn new(version: u64, expires: DateTime<Utc>, snapshot: FileInfo) -> Result<Self> {
        if version < 1 {
            return Err(Error::IllegalArgument(format!(
                "Metadata version must be greater than zero. Found: {}",
                version
            )));
        }

        Ok(TimestampMetadata {
            version,
            expires,
            snapshot,
        })
    }

    /// An immutable reference to the description of the current snapshot.
    pub fn snapshot(&self) -> &FileInfo {
        &self.snapshot
    }
}

impl Metadata for TimestampMetadata {
    const ROLE: Role = Role::Timestamp;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

impl Serialize for TimestampMetadata {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::TimestampMetadata::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for TimestampMetadata {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::TimestampMetadata = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// Helper to construct `SnapshotMetadata`.
pub struct SnapshotMetadataBuilder {
    version: u64,
    expires: DateTime<Utc>,
    meta: HashMap<String, FileInfo>,
}

impl SnapshotMetadataBuilder {
    /// Create a new `SnapshotMetadataBuilder`. It defaults to:
    ///
    /// * version: 1
    /// * expires: 7 days from the current time
    pub fn new() -> Self {
        SnapshotMetadataBuilder {
            version: 1,
            expires: Utc::now() + Duration::days(7),
            meta: HashMap::new(),
        }
    }

    /// Set the version number for this metadata.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the time this metadata expires.
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = expires;
        self
    }

    /// Describe a file by hashing the given bytes.
    pub fn insert_from_slice(
        self,
        name: impl Into<String>,
        bytes: &[u8],
        hash_algs: &[HashAlgorithm],
    ) -> Result<Self> {
        let info = FileInfo::from_reader(bytes, hash_algs)?;
        Ok(self.insert_file_info(name, info))
    }

    /// Add a `FileInfo` to this snapshot metadata.
    pub fn insert_file_info(mut self, name: impl Into<String>, info: FileInfo) -> Self {
        self.meta.insert(name.into(), info);
        self
    }

    /// Construct a new `SnapshotMetadata`.
    pub fn build(self) -> Result<SnapshotMetadata> {
        SnapshotMetadata::new(self.version, self.expires, self.meta)
    }

    /// Construct a new `SignedMetadata<SnapshotMetadata>`.
    pub fn signed(self, private_key: &PrivateKey) -> Result<SignedMetadata<SnapshotMetadata>> {
        SignedMetadata::new(self.build()?, private_key)
    }
}

impl Default for SnapshotMetadataBuilder {
    fn default() -> Self {
        SnapshotMetadataBuilder::new()
    }
}

/// Metadata for the snapshot role.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    version: u64,
    expires: DateTime<Utc>,
    meta: HashMap<String, FileInfo>,
}

impl SnapshotMetadata {
    /// Create new `SnapshotMetadata`. The file map must describe the root
    /// metadata; all other entries are optional.
    pub fn new(
        version: u64,
        expires: DateTime<Utc>,
        meta: HashMap<String, FileInfo>,
    ) -> Result<Self> {
        if version < 1 {
            return Err(Error::IllegalArgument(format!(
                "Metadata version must be greater than zero. Found: {}",
                version
            )));
        }

        if !meta.contains_key(Role::Root.file_name()) {
            return Err(Error::IllegalArgument(
                "Snapshot metadata must describe the root metadata".into(),
            ));
        }

        Ok(SnapshotMetadata {
            version,
            expires,
            meta,
        })
    }

    /// An immutable reference to the file map.
    pub fn meta(&self) -> &HashMap<String, FileInfo> {
        &self.meta
    }

    /// The description of the current root metadata.
    pub fn root_info(&self) -> Option<&FileInfo> {
        self.meta.get(Role::Root.file_name())
    }

    /// The description of the current mirrors metadata, if the repository
    /// publishes one.
    pub fn mirrors_info(&self) -> Option<&FileInfo> {
        self.meta.get(Role::Mirrors.file_name())
    }

    /// The description of the package index in the given encoding.
    pub fn index_info(&self, format: FileFormat) -> Option<&FileInfo> {
        self.meta.get(format.index_file_name())
    }
}

impl Metadata for SnapshotMetadata {
    const ROLE: Role = Role::Snapshot;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

impl Serialize for SnapshotMetadata {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::SnapshotMetadata::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for SnapshotMetadata {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::SnapshotMetadata = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// What portion of the repository a mirror carries.
///
/// Only full mirrors are supported; documents advertising any other
/// content variant are rejected rather than ignored.
#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub enum MirrorContent {
    /// The mirror carries all metadata and all packages.
    #[serde(rename = "full")]
    Full,
}

/// An alternate download origin.
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct Mirror {
    url_base: Url,
    content: MirrorContent,
}

impl Mirror {
    /// Create a new full-content mirror at the given base URL.
    pub fn full(url_base: Url) -> Self {
        Mirror {
            url_base,
            content: MirrorContent::Full,
        }
    }

    /// The base URL all repository-relative paths are resolved against.
    pub fn url_base(&self) -> &Url {
        &self.url_base
    }

    /// What portion of the repository this mirror carries.
    pub fn content(&self) -> &MirrorContent {
        &self.content
    }
}

/// Helper to construct `MirrorsMetadata`.
pub struct MirrorsMetadataBuilder {
    version: u64,
    expires: DateTime<Utc>,
    mirrors: Vec<Mirror>,
}

impl MirrorsMetadataBuilder {
    /// Create a new `MirrorsMetadataBuilder`. It defaults to:
    ///
    /// * version: 1
    /// * expires: 90 days from the current time
    pub fn new() -> Self {
        MirrorsMetadataBuilder {
            version: 1,
            expires: Utc::now() + Duration::days(90),
            mirrors: Vec::new(),
        }
    }

    /// Set the version number for this metadata.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the time this metadata expires.
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = expires;
        self
    }

    /// Add a mirror.
    pub fn mirror(mut self, mirror: Mirror) -> Self {
        self.mirrors.push(mirror);
        self
    }

    /// Construct a new `MirrorsMetadata`.
    pub fn build(self) -> Result<MirrorsMetadata> {
        MirrorsMetadata::new(self.version, self.expires, self.mirrors)
    }

    /// Construct a new `SignedMetadata<MirrorsMetadata>`.
    pub fn signed(self, private_key: &PrivateKey) -> Result<SignedMetadata<MirrorsMetadata>> {
        SignedMetadata::new(self.build()?, private_key)
    }
}

impl Default for MirrorsMetadataBuilder {
    fn default() -> Self {
        MirrorsMetadataBuilder::new()
    }
}

/// Metadata for the mirrors role.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorsMetadata {
    version: u64,
    expires: DateTime<Utc>,
    mirrors: Vec<Mirror>,
}

impl MirrorsMetadata {
    /// Create new `MirrorsMetadata`.
    pub fn new(version: u64, expires: DateTime<Utc>, mirrors: Vec<Mirror>) -> Result<Self> {
        if version < 1 {
            return Err(Error::IllegalArgument(format!(
                "Metadata version must be greater than zero. Found: {}",
                version
            )));
        }

        Ok(MirrorsMetadata {
            version,
            expires,
            mirrors,
        })
    }

    /// An immutable reference to the list of mirrors.
    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }
}

impl Metadata for MirrorsMetadata {
    const ROLE: Role = Role::Mirrors;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

impl Serialize for MirrorsMetadata {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::MirrorsMetadata::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for MirrorsMetadata {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::MirrorsMetadata = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// Helper to construct `TargetsMetadata`.
pub struct TargetsMetadataBuilder {
    version: u64,
    expires: DateTime<Utc>,
    targets: HashMap<String, FileInfo>,
}

impl TargetsMetadataBuilder {
    /// Create a new `TargetsMetadataBuilder`. It defaults to:
    ///
    /// * version: 1
    /// * expires: 90 days from the current time
    pub fn new() -> Self {
        TargetsMetadataBuilder {
            version: 1,
            expires: Utc::now() + Duration::days(90),
            targets: HashMap::new(),
        }
    }

    /// Set the version number for this metadata.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the time this metadata expires.
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = expires;
        self
    }

    /// Add a target by hashing the given bytes.
    pub fn insert_target_from_slice(
        self,
        path: impl Into<String>,
        bytes: &[u8],
        hash_algs: &[HashAlgorithm],
    ) -> Result<Self> {
        let info = FileInfo::from_reader(bytes, hash_algs)?;
        Ok(self.insert_target_description(path, info))
    }

    /// Add a `FileInfo` for a target.
    pub fn insert_target_description(
        mut self,
        path: impl Into<String>,
        info: FileInfo,
    ) -> Self {
        self.targets.insert(path.into(), info);
        self
    }

    /// Construct a new `TargetsMetadata`.
    pub fn build(self) -> Result<TargetsMetadata> {
        TargetsMetadata::new(self.version, self.expires, self.targets)
    }

    /// Construct a new `SignedMetadata<TargetsMetadata>`.
    pub fn signed(self, private_key: &PrivateKey) -> Result<SignedMetadata<TargetsMetadata>> {
        SignedMetadata::new(self.build()?, private_key)
    }
}

impl Default for TargetsMetadataBuilder {
    fn default() -> Self {
        TargetsMetadataBuilder::new()
    }
}

/// The per-package targets document stored inside the package index. It
/// lists the downloadable files belonging to one package version.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetsMetadata {
    version: u64,
    expires: DateTime<Utc>,
    targets: HashMap<String, FileInfo>,
}

impl TargetsMetadata {
    /// Create new `TargetsMetadata`.
    pub fn new(
        version: u64,
        expires: DateTime<Utc>,
        targets: HashMap<String, FileInfo>,
    ) -> Result<Self> {
        if version < 1 {
            return Err(Error::IllegalArgument(format!(
                "Metadata version must be greater than zero. Found: {}",
                version
            )));
        }

        Ok(TargetsMetadata {
            version,
            expires,
            targets,
        })
    }

    /// The version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// An immutable reference to the expiration time.
    pub fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }

    /// An immutable reference to the descriptions of targets.
    pub fn targets(&self) -> &HashMap<String, FileInfo> {
        &self.targets
    }
}

impl Serialize for TargetsMetadata {
    fn serialize<S>(&self, ser: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        shims::TargetsMetadata::from(self)
            .map_err(|e| SerializeError::custom(format!("{:?}", e)))?
            .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for TargetsMetadata {
    fn deserialize<D: Deserializer<'de>>(de: D) -> ::std::result::Result<Self, D::Error> {
        let intermediate: shims::TargetsMetadata = Deserialize::deserialize(de)?;
        intermediate
            .try_into()
            .map_err(|e| DeserializeError::custom(format!("{:?}", e)))
    }
}

/// A package name and version, with the layout-derived paths under which
/// the repository stores its metadata and tarball.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    name: String,
    version: String,
}

impl PackageId {
    /// Create a new `PackageId`.
    ///
    /// ```
    /// # use palisade::metadata::PackageId;
    /// assert!(PackageId::new("acme", "1.2.0").is_ok());
    /// assert!(PackageId::new("", "1.2.0").is_err());
    /// assert!(PackageId::new("../acme", "1.2.0").is_err());
    /// ```
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let version = version.into();
        safe_component(&name)?;
        safe_component(&version)?;
        Ok(PackageId { name, version })
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The package version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The path of the package's targets document inside the index archive.
    pub fn index_metadata_path(&self) -> String {
        format!("{}/{}/package.json", self.name, self.version)
    }

    /// The repository-relative path of the package tarball.
    pub fn tarball_path(&self) -> String {
        format!("package/{}-{}.tar.gz", self.name, self.version)
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::prelude::*;
    use lazy_static::lazy_static;
    use maplit::hashset;
    use serde_json::json;

    lazy_static! {
        static ref KEYS: Vec<PrivateKey> = (0..4)
            .map(|_| PrivateKey::generate().unwrap())
            .collect();
    }

    fn file_info(bytes: &[u8]) -> FileInfo {
        FileInfo::from_reader(bytes, &[HashAlgorithm::Sha256]).unwrap()
    }

    #[test]
    fn bad_package_components() {
        for bad in &["", ".", "..", "a/b", "a:b", "a\\b", "a*b"] {
            assert!(PackageId::new(*bad, "1.0").is_err(), "accepted {:?}", bad);
            assert!(PackageId::new("acme", *bad).is_err(), "accepted {:?}", bad);
        }

        assert!(PackageId::new("..acme", "1.0").is_ok());
    }

    #[test]
    fn package_layout_paths() {
        let pkg = PackageId::new("acme", "1.2.0").unwrap();
        assert_eq!(pkg.index_metadata_path(), "acme/1.2.0/package.json");
        assert_eq!(pkg.tarball_path(), "package/acme-1.2.0.tar.gz");
        assert_eq!(pkg.to_string(), "acme-1.2.0");
    }

    #[test]
    fn file_info_matching() {
        let a = file_info(b"hello");
        let b = file_info(b"hello");
        let c = file_info(b"olleh");
        assert!(a.matches(&b));
        assert!(!a.matches(&c));

        // same length, different content, same algorithm
        let d = file_info(b"hella");
        assert!(!a.matches(&d));

        // no algorithm in common never matches, even at equal length
        let e = FileInfo::from_reader(&b"hello"[..], &[HashAlgorithm::Sha512]).unwrap();
        assert!(!a.matches(&e));
    }

    #[test]
    fn serde_file_info() {
        let info = file_info(b"from water does all life begin");
        let encoded = serde_json::to_value(&info).unwrap();
        assert_eq!(encoded["length"], json!(30));
        let decoded: FileInfo = serde_json::from_value(encoded).unwrap();
        assert!(decoded.matches(&info));
    }

    #[test]
    fn serde_role_definition() {
        let key_ids = hashset!(
            KeyId::from_string(
                "76235f4e10c59b43cc47f05bb347b3544225bd989a0bff0789d29a687959d2c0"
            )
            .unwrap(),
            KeyId::from_string(
                "6abf408284ac99e11c7fa1e8a6d6bfd5366ed5dcf9b976c37a60688edf43bb72"
            )
            .unwrap(),
        );
        let role_def = RoleDefinition::new(2, key_ids).unwrap();
        let jsn = json!({
            "threshold": 2,
            "key_ids": [
                // these need to be sorted for determinism
                "6abf408284ac99e11c7fa1e8a6d6bfd5366ed5dcf9b976c37a60688edf43bb72",
                "76235f4e10c59b43cc47f05bb347b3544225bd989a0bff0789d29a687959d2c0",
            ],
        });
        let encoded = serde_json::to_value(&role_def).unwrap();
        assert_eq!(encoded, jsn);
        let decoded: RoleDefinition = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, role_def);

        let jsn = json!({
            "threshold": 0,
            "key_ids": [
                "6abf408284ac99e11c7fa1e8a6d6bfd5366ed5dcf9b976c37a60688edf43bb72",
            ],
        });
        assert!(serde_json::from_value::<RoleDefinition>(jsn).is_err());
    }

    #[test]
    fn serde_root_metadata_round_trip() {
        let root = RootMetadataBuilder::new()
            .expires(Utc.ymd(2038, 1, 1).and_hms(0, 0, 0))
            .root_key(KEYS[0].public().clone())
            .timestamp_key(KEYS[1].public().clone())
            .snapshot_key(KEYS[2].public().clone())
            .mirrors_key(KEYS[3].public().clone())
            .build()
            .unwrap();

        let encoded = serde_json::to_value(&root).unwrap();
        assert_eq!(encoded["type"], json!("root"));
        assert_eq!(encoded["version"], json!(1));
        assert_eq!(encoded["keys"].as_array().unwrap().len(), 4);
        assert_eq!(
            encoded["timestamp"]["key_ids"],
            json!([KEYS[1].key_id().to_string()])
        );

        let decoded: RootMetadata = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn serde_root_metadata_rejects_wrong_type() {
        let root = RootMetadataBuilder::new()
            .root_key(KEYS[0].public().clone())
            .timestamp_key(KEYS[1].public().clone())
            .snapshot_key(KEYS[2].public().clone())
            .mirrors_key(KEYS[3].public().clone())
            .build()
            .unwrap();

        let mut encoded = serde_json::to_value(&root).unwrap();
        encoded["type"] = json!("timestamp");
        assert!(serde_json::from_value::<RootMetadata>(encoded).is_err());
    }

    #[test]
    fn serde_timestamp_metadata() {
        let timestamp = TimestampMetadataBuilder::from_file_info(file_info(b"snapshot bytes"))
            .expires(Utc.ymd(2038, 1, 1).and_hms(0, 0, 0))
            .build()
            .unwrap();

        let encoded = serde_json::to_value(&timestamp).unwrap();
        assert_eq!(encoded["type"], json!("timestamp"));
        assert_eq!(encoded["expires"], json!("2038-01-01T00:00:00Z"));
        assert_eq!(encoded["snapshot"]["length"], json!(14));

        let decoded: TimestampMetadata = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, timestamp);
    }

    #[test]
    fn serde_snapshot_metadata() {
        let snapshot = SnapshotMetadataBuilder::new()
            .expires(Utc.ymd(2038, 1, 1).and_hms(0, 0, 0))
            .insert_file_info(Role::Root.file_name(), file_info(b"root"))
            .insert_file_info(INDEX_TAR, file_info(b"index"))
            .insert_file_info(INDEX_TAR_GZ, file_info(b"index-gz"))
            .build()
            .unwrap();

        let encoded = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(encoded["type"], json!("snapshot"));
        assert_eq!(encoded["meta"]["root.json"]["length"], json!(4));

        let decoded: SnapshotMetadata = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, snapshot);
        assert!(decoded.root_info().is_some());
        assert!(decoded.mirrors_info().is_none());
        assert!(decoded.index_info(FileFormat::Gzip).is_some());
    }

    #[test]
    fn snapshot_must_describe_root() {
        assert!(SnapshotMetadataBuilder::new()
            .insert_file_info(INDEX_TAR, file_info(b"index"))
            .build()
            .is_err());
    }

    #[test]
    fn serde_mirrors_metadata() {
        let mirrors = MirrorsMetadataBuilder::new()
            .expires(Utc.ymd(2038, 1, 1).and_hms(0, 0, 0))
            .mirror(Mirror::full(Url::parse("https://mirror.example.org/repo/").unwrap()))
            .build()
            .unwrap();

        let encoded = serde_json::to_value(&mirrors).unwrap();
        assert_eq!(encoded["type"], json!("mirrors"));
        assert_eq!(encoded["mirrors"][0]["content"], json!("full"));

        let decoded: MirrorsMetadata = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, mirrors);
    }

    #[test]
    fn unknown_mirror_content_is_rejected() {
        let jsn = json!({
            "type": "mirrors",
            "version": 1,
            "expires": "2038-01-01T00:00:00Z",
            "mirrors": [
                {"url_base": "https://mirror.example.org/repo/", "content": "partial"},
            ],
        });
        assert!(serde_json::from_value::<MirrorsMetadata>(jsn).is_err());
    }

    #[test]
    fn serde_targets_metadata() {
        let targets = TargetsMetadataBuilder::new()
            .expires(Utc.ymd(2038, 1, 1).and_hms(0, 0, 0))
            .insert_target_from_slice(
                "package/acme-1.0.tar.gz",
                b"tarball",
                &[HashAlgorithm::Sha256],
            )
            .unwrap()
            .build()
            .unwrap();

        let encoded = serde_json::to_value(&targets).unwrap();
        assert_eq!(encoded["type"], json!("targets"));
        assert_eq!(
            encoded["targets"]["package/acme-1.0.tar.gz"]["length"],
            json!(7)
        );

        let decoded: TargetsMetadata = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, targets);
    }

    #[test]
    fn signed_metadata_add_signature_replaces_same_key() {
        let timestamp = TimestampMetadataBuilder::from_file_info(file_info(b"snap"))
            .build()
            .unwrap();
        let mut signed = SignedMetadata::new(timestamp, &KEYS[0]).unwrap();
        assert_eq!(signed.signatures().len(), 1);

        signed.add_signature(&KEYS[1]).unwrap();
        assert_eq!(signed.signatures().len(), 2);

        signed.add_signature(&KEYS[1]).unwrap();
        assert_eq!(signed.signatures().len(), 2);
    }

    #[test]
    fn raw_metadata_parse_round_trip() {
        let timestamp = TimestampMetadataBuilder::from_file_info(file_info(b"snap"))
            .build()
            .unwrap();
        let signed = SignedMetadata::new(timestamp.clone(), &KEYS[0]).unwrap();
        let raw = signed.to_raw().unwrap();

        let parsed = raw.parse().unwrap();
        assert_eq!(parsed.metadata, timestamp);
        assert_eq!(parsed.signatures.len(), 1);

        // the canonical bytes are what the signature covers
        assert!(KEYS[0]
            .public()
            .verify(&parsed.canonical_bytes, &parsed.signatures[0]));
    }

    #[test]
    fn raw_metadata_parse_rejects_garbage() {
        let raw = RawSignedMetadata::<TimestampMetadata>::new(b"not even json".to_vec());
        assert!(raw.parse().is_err());

        let raw = RawSignedMetadata::<TimestampMetadata>::new(b"[1, 2, 3]".to_vec());
        assert!(raw.parse().is_err());
    }

    #[test]
    fn serde_metadata_version_zero_rejected() {
        let jsn = json!({
            "type": "timestamp",
            "version": 0,
            "expires": "2038-01-01T00:00:00Z",
            "snapshot": {"length": 1, "hashes": {"sha256": "00"}},
        });
        assert!(serde_json::from_value::<TimestampMetadata>(jsn).is_err());
    }

    #[test]
    fn canonical_form_ignores_wire_key_order() {
        let a: serde_json::Value = serde_json::from_str(
            r#"{"version": 1, "type": "timestamp", "expires": "2038-01-01T00:00:00Z",
                "snapshot": {"length": 4, "hashes": {"sha256": "00"}}}"#,
        )
        .unwrap();
        let b: serde_json::Value = serde_json::from_str(
            r#"{"type": "timestamp", "expires": "2038-01-01T00:00:00Z",
                "snapshot": {"hashes": {"sha256": "00"}, "length": 4}, "version": 1}"#,
        )
        .unwrap();
        assert_eq!(
            interchange::canonicalize(&a).unwrap(),
            interchange::canonicalize(&b).unwrap()
        );
    }
}
