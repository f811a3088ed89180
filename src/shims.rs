//! Intermediate types for mapping the wire formats onto the validated
//! metadata types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde_derive::{Deserialize, Serialize};

use crate::crypto;
use crate::error::Error;
use crate::metadata;
use crate::metadata::Metadata;
use crate::Result;

fn check_type(expected: metadata::Role, found: &metadata::Role) -> Result<()> {
    if expected != *found {
        return Err(Error::Encoding(format!(
            "Attempted to decode {} metadata from a document labeled {}",
            expected, found
        )));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(rename = "type")]
    typ: String,
    public_key: String,
}

impl PublicKey {
    pub fn from(key: &crypto::PublicKey) -> Result<Self> {
        Ok(PublicKey {
            typ: "ed25519".into(),
            public_key: HEXLOWER.encode(key.value()),
        })
    }

    pub fn try_into(self) -> Result<crypto::PublicKey> {
        if self.typ != "ed25519" {
            return Err(Error::Encoding(format!(
                "Unsupported key type: {}",
                self.typ
            )));
        }
        let bytes = HEXLOWER.decode(self.public_key.as_bytes())?;
        crypto::PublicKey::from_ed25519(bytes)
    }
}

#[derive(Serialize, Deserialize)]
pub struct RoleDefinition {
    threshold: u32,
    key_ids: Vec<crypto::KeyId>,
}

impl RoleDefinition {
    pub fn from(definition: &metadata::RoleDefinition) -> Result<Self> {
        // sorted for deterministic output
        let mut key_ids = definition.key_ids().iter().cloned().collect::<Vec<_>>();
        key_ids.sort();
        Ok(RoleDefinition {
            threshold: definition.threshold(),
            key_ids,
        })
    }

    pub fn try_into(self) -> Result<metadata::RoleDefinition> {
        let key_count = self.key_ids.len();
        let key_ids = self.key_ids.into_iter().collect::<std::collections::HashSet<_>>();
        if key_ids.len() != key_count {
            return Err(Error::Encoding(
                "Cannot have duplicated key IDs in a role definition".into(),
            ));
        }
        metadata::RoleDefinition::new(self.threshold, key_ids)
    }
}

#[derive(Serialize, Deserialize)]
pub struct RootMetadata {
    #[serde(rename = "type")]
    typ: metadata::Role,
    version: u64,
    expires: DateTime<Utc>,
    keys: Vec<crypto::PublicKey>,
    root: RoleDefinition,
    timestamp: RoleDefinition,
    snapshot: RoleDefinition,
    mirrors: RoleDefinition,
}

impl RootMetadata {
    pub fn from(meta: &metadata::RootMetadata) -> Result<Self> {
        let mut keys = meta.keys().values().cloned().collect::<Vec<_>>();
        keys.sort();
        Ok(RootMetadata {
            typ: metadata::Role::Root,
            version: meta.version(),
            expires: *meta.expires(),
            keys,
            root: RoleDefinition::from(meta.role_definition(metadata::Role::Root))?,
            timestamp: RoleDefinition::from(meta.role_definition(metadata::Role::Timestamp))?,
            snapshot: RoleDefinition::from(meta.role_definition(metadata::Role::Snapshot))?,
            mirrors: RoleDefinition::from(meta.role_definition(metadata::Role::Mirrors))?,
        })
    }

    pub fn try_into(self) -> Result<metadata::RootMetadata> {
        check_type(metadata::Role::Root, &self.typ)?;
        let keys = self
            .keys
            .into_iter()
            .map(|key| (key.key_id().clone(), key))
            .collect();
        metadata::RootMetadata::new(
            self.version,
            self.expires,
            keys,
            self.root.try_into()?,
            self.timestamp.try_into()?,
            self.snapshot.try_into()?,
            self.mirrors.try_into()?,
        )
    }
}

#[derive(Serialize, Deserialize)]
pub struct FileInfo {
    length: u64,
    hashes: BTreeMap<crypto::HashAlgorithm, crypto::HashValue>,
}

impl FileInfo {
    pub fn from(info: &metadata::FileInfo) -> Result<Self> {
        Ok(FileInfo {
            length: info.length(),
            hashes: info
                .hashes()
                .iter()
                .map(|(alg, value)| (alg.clone(), value.clone()))
                .collect(),
        })
    }

    pub fn try_into(self) -> Result<metadata::FileInfo> {
        metadata::FileInfo::new(self.length, self.hashes.into_iter().collect())
    }
}

#[derive(Serialize, Deserialize)]
pub struct TimestampMetadata {
    #[serde(rename = "type")]
    typ: metadata::Role,
    version: u64,
    expires: DateTime<Utc>,
    snapshot: metadata::FileInfo,
}

impl TimestampMetadata {
    pub fn from(meta: &metadata::TimestampMetadata) -> Result<Self> {
        Ok(TimestampMetadata {
            typ: metadata::Role::Timestamp,
            version: meta.version(),
            expires: *meta.expires(),
            snapshot: meta.snapshot().clone(),
        })
    }

    pub fn try_into(self) -> Result<metadata::TimestampMetadata> {
        check_type(metadata::Role::Timestamp, &self.typ)?;
        metadata::TimestampMetadata::new(self.version, self.expires, self.snapshot)
    }
}

#[derive(Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(rename = "type")]
    typ: metadata::Role,
    version: u64,
    expires: DateTime<Utc>,
    meta: BTreeMap<String, metadata::FileInfo>,
}

impl SnapshotMetadata {
    pub fn from(meta: &metadata::SnapshotMetadata) -> Result<Self> {
        Ok(SnapshotMetadata {
            typ: metadata::Role::Snapshot,
            version: meta.version(),
            expires: *meta.expires(),
            meta: meta
                .meta()
                .iter()
                .map(|(path, info)| (path.clone(), info.clone()))
                .collect(),
        })
    }

    pub fn try_into(self) -> Result<metadata::SnapshotMetadata> {
        check_type(metadata::Role::Snapshot, &self.typ)?;
        metadata::SnapshotMetadata::new(
            self.version,
            self.expires,
            self.meta.into_iter().collect(),
        )
    }
}

#[derive(Serialize, Deserialize)]
pub struct MirrorsMetadata {
    #[serde(rename = "type")]
    typ: metadata::Role,
    version: u64,
    expires: DateTime<Utc>,
    mirrors: Vec<metadata::Mirror>,
}

impl MirrorsMetadata {
    pub fn from(meta: &metadata::MirrorsMetadata) -> Result<Self> {
        Ok(MirrorsMetadata {
            typ: metadata::Role::Mirrors,
            version: meta.version(),
            expires: *meta.expires(),
            mirrors: meta.mirrors().to_vec(),
        })
    }

    pub fn try_into(self) -> Result<metadata::MirrorsMetadata> {
        check_type(metadata::Role::Mirrors, &self.typ)?;
        metadata::MirrorsMetadata::new(self.version, self.expires, self.mirrors)
    }
}

#[derive(Serialize, Deserialize)]
pub struct TargetsMetadata {
    #[serde(rename = "type")]
    typ: String,
    version: u64,
    expires: DateTime<Utc>,
    targets: BTreeMap<String, metadata::FileInfo>,
}

impl TargetsMetadata {
    pub fn from(meta: &metadata::TargetsMetadata) -> Result<Self> {
        Ok(TargetsMetadata {
            typ: "targets".into(),
            version: meta.version(),
            expires: *meta.expires(),
            targets: meta
                .targets()
                .iter()
                .map(|(path, info)| (path.clone(), info.clone()))
                .collect(),
        })
    }

    pub fn try_into(self) -> Result<metadata::TargetsMetadata> {
        if self.typ != "targets" {
            return Err(Error::Encoding(format!(
                "Attempted to decode targets metadata from a document labeled {}",
                self.typ
            )));
        }
        metadata::TargetsMetadata::new(self.version, self.expires, self.targets.into_iter().collect())
    }
}
