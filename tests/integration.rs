//! End-to-end scenarios for the update state machine: rollbacks, freezes,
//! root rotations, and the bounded retry loop, driven against an
//! in-memory repository.

use std::path::Path;

use chrono::offset::Utc;
use chrono::prelude::*;
use chrono::DateTime;
use lazy_static::lazy_static;
use matches::assert_matches;
use tempfile::tempdir;
use url::Url;

use palisade::cache::MetadataCache;
use palisade::client::{Client, Config, UpdateOutcome, MAX_UPDATE_ATTEMPTS};
use palisade::crypto::{HashAlgorithm, PrivateKey};
use palisade::error::{Error, UpdateInterruption, VerificationError};
use palisade::index::gzip;
use palisade::metadata::{
    Metadata, Mirror, MirrorsMetadata, MirrorsMetadataBuilder, PackageId, RawSignedMetadata, Role,
    RootMetadata, RootMetadataBuilder, SignedMetadata, SnapshotMetadata, SnapshotMetadataBuilder,
    TargetsMetadataBuilder, TimestampMetadata, TimestampMetadataBuilder, INDEX_TAR, INDEX_TAR_GZ,
};
use palisade::repository::EphemeralRepository;

const HASH_ALGS: &[HashAlgorithm] = &[HashAlgorithm::Sha256];

lazy_static! {
    // 0: root, 1: timestamp, 2: snapshot, 3: mirrors,
    // 4: replacement root, 5: attacker
    static ref KEYS: Vec<PrivateKey> = (0..6)
        .map(|_| PrivateKey::generate().unwrap())
        .collect();
}

fn expires() -> DateTime<Utc> {
    Utc.ymd(2038, 1, 1).and_hms(0, 0, 0)
}

fn now() -> DateTime<Utc> {
    Utc.ymd(2020, 1, 1).and_hms(0, 0, 0)
}

fn sign_all<M: serde::Serialize>(metadata: M, signers: &[&PrivateKey]) -> Vec<u8> {
    let mut signed = SignedMetadata::new(metadata, signers[0]).unwrap();
    for key in &signers[1..] {
        signed.add_signature(key).unwrap();
    }
    signed.to_raw().unwrap().as_bytes().to_vec()
}

fn root_document(version: u64, root_holders: &[&PrivateKey], threshold: u32) -> RootMetadata {
    let mut builder = RootMetadataBuilder::new()
        .version(version)
        .expires(expires())
        .root_threshold(threshold)
        .timestamp_key(KEYS[1].public().clone())
        .snapshot_key(KEYS[2].public().clone())
        .mirrors_key(KEYS[3].public().clone());
    for key in root_holders {
        builder = builder.root_key(key.public().clone());
    }
    builder.build().unwrap()
}

fn build_index(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *bytes).unwrap();
    }
    builder.into_inner().unwrap()
}

struct RepoFiles {
    root: Vec<u8>,
    timestamp: Vec<u8>,
    snapshot: Vec<u8>,
    mirrors: Vec<u8>,
    index_tar: Vec<u8>,
    index_tar_gz: Vec<u8>,
    tarball_path: String,
    tarball: Vec<u8>,
}

fn package() -> PackageId {
    PackageId::new("acme", "1.0.0").unwrap()
}

/// Build a consistent repository: `meta_version` covers timestamp,
/// snapshot, and the index contents; the mirrors document stays at
/// version 1 so unchanged-mirror scenarios skip its fetch.
fn make_repo_with_root(root: Vec<u8>, meta_version: u64, tarball: &[u8]) -> RepoFiles {
    let package = package();
    let targets = sign_all(
        TargetsMetadataBuilder::new()
            .version(meta_version)
            .expires(expires())
            .insert_target_from_slice(package.tarball_path(), tarball, HASH_ALGS)
            .unwrap()
            .build()
            .unwrap(),
        &[&KEYS[2]],
    );
    let index_tar = build_index(&[(package.index_metadata_path().as_str(), &targets)]);
    let index_tar_gz = gzip(&index_tar).unwrap();

    let mirrors = sign_all(
        MirrorsMetadataBuilder::new()
            .expires(expires())
            .mirror(Mirror::full(
                Url::parse("https://mirror.example.org/repo/").unwrap(),
            ))
            .build()
            .unwrap(),
        &[&KEYS[3]],
    );

    let snapshot = sign_all(
        SnapshotMetadataBuilder::new()
            .version(meta_version)
            .expires(expires())
            .insert_from_slice("root.json", &root, HASH_ALGS)
            .unwrap()
            .insert_from_slice("mirrors.json", &mirrors, HASH_ALGS)
            .unwrap()
            .insert_from_slice(INDEX_TAR, &index_tar, HASH_ALGS)
            .unwrap()
            .insert_from_slice(INDEX_TAR_GZ, &index_tar_gz, HASH_ALGS)
            .unwrap()
            .build()
            .unwrap(),
        &[&KEYS[2]],
    );

    let timestamp = sign_all(
        TimestampMetadataBuilder::from_snapshot(
            &RawSignedMetadata::<SnapshotMetadata>::new(snapshot.clone()),
            HASH_ALGS,
        )
        .unwrap()
        .version(meta_version)
        .expires(expires())
        .build()
        .unwrap(),
        &[&KEYS[1]],
    );

    RepoFiles {
        root,
        timestamp,
        snapshot,
        mirrors,
        index_tar,
        index_tar_gz,
        tarball_path: package.tarball_path(),
        tarball: tarball.to_vec(),
    }
}

fn make_repo(root_version: u64, meta_version: u64, tarball: &[u8]) -> RepoFiles {
    let root = sign_all(root_document(root_version, &[&KEYS[0]], 1), &[&KEYS[0]]);
    make_repo_with_root(root, meta_version, tarball)
}

fn serve(remote: &mut EphemeralRepository, repo: &RepoFiles) {
    remote.insert("root.json", repo.root.clone());
    remote.insert("timestamp.json", repo.timestamp.clone());
    remote.insert("snapshot.json", repo.snapshot.clone());
    remote.insert("mirrors.json", repo.mirrors.clone());
    remote.insert(INDEX_TAR, repo.index_tar.clone());
    remote.insert(INDEX_TAR_GZ, repo.index_tar_gz.clone());
    remote.insert(repo.tarball_path.clone(), repo.tarball.clone());
}

fn bootstrapped_client(cache_dir: &Path, repo: &RepoFiles) -> Client<EphemeralRepository> {
    let cache = MetadataCache::open(cache_dir).unwrap();
    let mut remote = EphemeralRepository::new();
    serve(&mut remote, repo);
    let mut client = Client::new(Config::default(), cache, remote);
    client.bootstrap(&[KEYS[0].key_id().clone()], 1).unwrap();
    client
}

fn cache_file_hashes(client: &Client<EphemeralRepository>) -> Vec<Option<String>> {
    [
        Role::Root.file_name(),
        Role::Timestamp.file_name(),
        Role::Snapshot.file_name(),
        Role::Mirrors.file_name(),
        INDEX_TAR,
    ]
    .iter()
    .map(|name| {
        client
            .cache()
            .file_sha256(name)
            .unwrap()
            .map(|h| h.to_string())
    })
    .collect()
}

#[test]
fn bootstrap_update_download() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);

    assert!(client.cache().has_root());
    assert!(!client.cache().has_index());

    assert_eq!(
        client.check_for_updates(Some(now())).unwrap(),
        UpdateOutcome::HasUpdates
    );

    let timestamp = client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .unwrap();
    assert_eq!(timestamp.version(), 1);
    let mirrors = client.cache().cached::<MirrorsMetadata>().unwrap().unwrap();
    assert_eq!(
        mirrors.mirrors()[0].url_base().as_str(),
        "https://mirror.example.org/repo/"
    );
    assert!(client.cache().has_index());

    let dest = dir.path().join("download");
    client.download_package(&package(), &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"the tarball");
}

#[test]
fn no_updates_is_one_request_and_no_cache_change() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);
    client.check_for_updates(Some(now())).unwrap();

    let before = cache_file_hashes(&client);
    client.remote_mut().clear_request_log();

    assert_eq!(
        client.check_for_updates(Some(now())).unwrap(),
        UpdateOutcome::NoUpdates
    );

    assert_eq!(client.remote_mut().request_log(), &["timestamp.json"]);
    assert_eq!(cache_file_hashes(&client), before);
}

#[test]
fn snapshot_changed_root_unchanged() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v1);
    client.check_for_updates(Some(now())).unwrap();

    let repo_v2 = make_repo(1, 2, b"a newer tarball");
    serve(client.remote_mut(), &repo_v2);
    client.remote_mut().clear_request_log();

    assert_eq!(
        client.check_for_updates(Some(now())).unwrap(),
        UpdateOutcome::HasUpdates
    );

    // timestamp, snapshot, index; the root and mirrors were unchanged
    assert_eq!(
        client.remote_mut().request_log(),
        &["timestamp.json", "snapshot.json", "index.tar.gz"]
    );

    let timestamp = client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .unwrap();
    assert_eq!(timestamp.version(), 2);
    let root = client.cache().cached::<RootMetadata>().unwrap().unwrap();
    assert_eq!(root.version(), 1);

    let dest = dir.path().join("download");
    client.download_package(&package(), &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"a newer tarball");
}

#[test]
fn root_rotation_via_snapshot() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v1);
    client.check_for_updates(Some(now())).unwrap();

    // rotate to a new root key, cross-signed by the old one
    let mut new_root = SignedMetadata::new(
        root_document(2, &[&KEYS[4]], 1),
        &KEYS[4],
    )
    .unwrap();
    new_root.add_signature(&KEYS[0]).unwrap();
    let repo_v2 = make_repo_with_root(
        new_root.to_raw().unwrap().as_bytes().to_vec(),
        2,
        b"a newer tarball",
    );
    serve(client.remote_mut(), &repo_v2);
    client.remote_mut().clear_request_log();

    assert_eq!(
        client.check_for_updates(Some(now())).unwrap(),
        UpdateOutcome::HasUpdates
    );

    // first iteration aborts at the root change, the second starts fresh
    assert_eq!(
        client.remote_mut().request_log(),
        &[
            "timestamp.json",
            "snapshot.json",
            "root.json",
            "timestamp.json",
            "snapshot.json",
            "mirrors.json",
            "index.tar.gz",
        ]
    );

    let root = client.cache().cached::<RootMetadata>().unwrap().unwrap();
    assert_eq!(root.version(), 2);
    let timestamp = client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .unwrap();
    assert_eq!(timestamp.version(), 2);
}

#[test]
fn uncrossed_root_rotation_is_rejected() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v1);
    client.check_for_updates(Some(now())).unwrap();

    // the new root is only self-signed, so continuity fails
    let new_root = sign_all(root_document(2, &[&KEYS[4]], 1), &[&KEYS[4]]);
    let repo_v2 = make_repo_with_root(new_root, 2, b"a newer tarball");
    serve(client.remote_mut(), &repo_v2);

    assert_matches!(
        client.check_for_updates(Some(now())),
        Err(Error::Verification(VerificationError::Signatures))
    );

    // the cached root is untouched
    let root = client.cache().cached::<RootMetadata>().unwrap().unwrap();
    assert_eq!(root.version(), 1);
}

#[test]
fn bad_signature_hits_retry_ceiling_without_touching_cache() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v1);
    client.check_for_updates(Some(now())).unwrap();
    let before = cache_file_hashes(&client);

    // snapshot v2 signed by an unauthorized key, with a timestamp that
    // faithfully describes those bytes so only the signature check fails
    let bad_snapshot = sign_all(
        SnapshotMetadataBuilder::new()
            .version(2)
            .expires(expires())
            .insert_from_slice("root.json", &repo_v1.root, HASH_ALGS)
            .unwrap()
            .insert_from_slice(INDEX_TAR, &repo_v1.index_tar, HASH_ALGS)
            .unwrap()
            .insert_from_slice(INDEX_TAR_GZ, &repo_v1.index_tar_gz, HASH_ALGS)
            .unwrap()
            .build()
            .unwrap(),
        &[&KEYS[5]],
    );
    let bad_timestamp = sign_all(
        TimestampMetadataBuilder::from_snapshot(
            &RawSignedMetadata::<SnapshotMetadata>::new(bad_snapshot.clone()),
            HASH_ALGS,
        )
        .unwrap()
        .version(2)
        .expires(expires())
        .build()
        .unwrap(),
        &[&KEYS[1]],
    );
    client.remote_mut().insert("snapshot.json", bad_snapshot);
    client.remote_mut().insert("timestamp.json", bad_timestamp);
    client.remote_mut().clear_request_log();

    let history = match client.check_for_updates(Some(now())) {
        Err(Error::VerificationLoop(history)) => history,
        other => panic!("expected VerificationLoop, got {:?}", other.map(|_| ())),
    };

    assert_eq!(history.len(), MAX_UPDATE_ATTEMPTS as usize);
    for entry in history.entries() {
        assert_matches!(
            entry,
            UpdateInterruption::Verification(VerificationError::Signatures)
        );
    }

    // every iteration fetched each role at most once
    let log = client.remote_mut().request_log();
    for name in &["timestamp.json", "snapshot.json", "root.json"] {
        let count = log.iter().filter(|p| p.as_str() == *name).count();
        assert!(
            count <= MAX_UPDATE_ATTEMPTS as usize,
            "{} fetched {} times",
            name,
            count
        );
    }

    // nothing was committed; the root was refreshed but unchanged by hash,
    // so the cache was not cleared either
    assert_eq!(cache_file_hashes(&client), before);
}

#[test]
fn replayed_old_timestamp_is_a_version_rollback() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"the tarball");
    let repo_v2 = make_repo(1, 2, b"a newer tarball");

    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v2);
    client.check_for_updates(Some(now())).unwrap();

    // the attacker replays the older but validly signed repository state
    serve(client.remote_mut(), &repo_v1);

    let history = match client.check_for_updates(Some(now())) {
        Err(Error::VerificationLoop(history)) => history,
        other => panic!("expected VerificationLoop, got {:?}", other.map(|_| ())),
    };
    assert_matches!(
        &history.entries()[0],
        UpdateInterruption::Verification(VerificationError::Version { new: 1, .. })
    );

    // the cache still holds the newer state
    let timestamp = client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .unwrap();
    assert_eq!(timestamp.version(), 2);
}

#[test]
fn expired_timestamp_is_a_freeze_attack() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);

    let expired_timestamp = sign_all(
        TimestampMetadataBuilder::from_snapshot(
            &RawSignedMetadata::<SnapshotMetadata>::new(repo.snapshot.clone()),
            HASH_ALGS,
        )
        .unwrap()
        .expires(Utc.ymd(2019, 1, 1).and_hms(0, 0, 0))
        .build()
        .unwrap(),
        &[&KEYS[1]],
    );
    client
        .remote_mut()
        .insert("timestamp.json", expired_timestamp);

    let history = match client.check_for_updates(Some(now())) {
        Err(Error::VerificationLoop(history)) => history,
        other => panic!("expected VerificationLoop, got {:?}", other.map(|_| ())),
    };
    assert_matches!(
        &history.entries()[0],
        UpdateInterruption::Verification(VerificationError::Expired { .. })
    );

    // without a clock the same repository is accepted
    assert_eq!(
        client.check_for_updates(None).unwrap(),
        UpdateOutcome::HasUpdates
    );
}

#[test]
fn root_change_clears_stale_role_metadata() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v1);
    client.check_for_updates(Some(now())).unwrap();

    // a rotated root is available, but the timestamp is signed by an
    // unauthorized key, so every iteration after the rotation fails
    let mut new_root = SignedMetadata::new(
        root_document(2, &[&KEYS[4]], 1),
        &KEYS[4],
    )
    .unwrap();
    new_root.add_signature(&KEYS[0]).unwrap();
    client
        .remote_mut()
        .insert("root.json", new_root.to_raw().unwrap().as_bytes().to_vec());

    let bad_timestamp = sign_all(
        TimestampMetadataBuilder::from_snapshot(
            &RawSignedMetadata::<SnapshotMetadata>::new(repo_v1.snapshot.clone()),
            HASH_ALGS,
        )
        .unwrap()
        .version(2)
        .expires(expires())
        .build()
        .unwrap(),
        &[&KEYS[5]],
    );
    client
        .remote_mut()
        .insert("timestamp.json", bad_timestamp);

    assert_matches!(
        client.check_for_updates(Some(now())),
        Err(Error::VerificationLoop(_))
    );

    // the refreshed root was committed, and because it changed, the
    // cached timestamp, snapshot, and mirrors were dropped; the index
    // survives a clear
    let root = client.cache().cached::<RootMetadata>().unwrap().unwrap();
    assert_eq!(root.version(), 2);
    assert!(client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .is_none());
    assert!(client
        .cache()
        .cached::<SnapshotMetadata>()
        .unwrap()
        .is_none());
    assert!(client
        .cache()
        .cached::<MirrorsMetadata>()
        .unwrap()
        .is_none());
    assert!(client.cache().has_index());
}

#[test]
fn bootstrap_thresholds() {
    let root = sign_all(
        root_document(1, &[&KEYS[0], &KEYS[4], &KEYS[5]], 2),
        &[&KEYS[0], &KEYS[4]],
    );
    let repo = make_repo_with_root(root, 1, b"the tarball");
    let pinned = vec![
        KEYS[0].key_id().clone(),
        KEYS[4].key_id().clone(),
        KEYS[5].key_id().clone(),
    ];

    // two signatures from three pinned fingerprints meet a threshold of two
    let dir = tempdir().unwrap();
    let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
    let mut remote = EphemeralRepository::new();
    serve(&mut remote, &repo);
    let mut client = Client::new(Config::default(), cache, remote);
    client.bootstrap(&pinned, 2).unwrap();
    assert_eq!(
        client.check_for_updates(Some(now())).unwrap(),
        UpdateOutcome::HasUpdates
    );

    // the same document does not meet a threshold of three
    let dir = tempdir().unwrap();
    let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
    let mut remote = EphemeralRepository::new();
    serve(&mut remote, &repo);
    let mut client = Client::new(Config::default(), cache, remote);
    assert_matches!(
        client.bootstrap(&pinned, 3),
        Err(Error::Verification(VerificationError::Signatures))
    );
    assert!(!client.cache().has_root());
}

#[test]
fn bootstrap_is_idempotent() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);
    let first = client
        .cache()
        .file_sha256(Role::Root.file_name())
        .unwrap()
        .unwrap();

    client.bootstrap(&[KEYS[0].key_id().clone()], 1).unwrap();
    let second = client
        .cache()
        .file_sha256(Role::Root.file_name())
        .unwrap()
        .unwrap();
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn bootstrap_clears_unrelated_cached_state() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);
    client.check_for_updates(Some(now())).unwrap();
    assert!(client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .is_some());

    client.bootstrap(&[KEYS[0].key_id().clone()], 1).unwrap();
    assert!(client
        .cache()
        .cached::<TimestampMetadata>()
        .unwrap()
        .is_none());
}

#[test]
fn oversized_timestamp_is_rejected() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");

    let config = Config::build().max_timestamp_size(16).finish().unwrap();
    let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
    let mut remote = EphemeralRepository::new();
    serve(&mut remote, &repo);
    let mut client = Client::new(config, cache, remote);
    client.bootstrap(&[KEYS[0].key_id().clone()], 1).unwrap();

    assert_matches!(
        client.check_for_updates(Some(now())),
        Err(Error::Remote(_))
    );
}

#[test]
fn download_unknown_package() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);
    client.check_for_updates(Some(now())).unwrap();

    let missing = PackageId::new("wily", "9.9.9").unwrap();
    assert_matches!(
        client.download_package(&missing, &dir.path().join("download")),
        Err(Error::InvalidPackage(ref id)) if *id == missing
    );
}

#[test]
fn download_target_not_listed() {
    let dir = tempdir().unwrap();

    // the package's targets document describes a different tarball path
    let package = package();
    let targets = sign_all(
        TargetsMetadataBuilder::new()
            .expires(expires())
            .insert_target_from_slice("package/other-9.9.9.tar.gz", b"x", HASH_ALGS)
            .unwrap()
            .build()
            .unwrap(),
        &[&KEYS[2]],
    );
    let index_tar = build_index(&[(package.index_metadata_path().as_str(), &targets)]);
    let index_tar_gz = gzip(&index_tar).unwrap();

    let root = sign_all(root_document(1, &[&KEYS[0]], 1), &[&KEYS[0]]);
    let snapshot = sign_all(
        SnapshotMetadataBuilder::new()
            .expires(expires())
            .insert_from_slice("root.json", &root, HASH_ALGS)
            .unwrap()
            .insert_from_slice(INDEX_TAR, &index_tar, HASH_ALGS)
            .unwrap()
            .insert_from_slice(INDEX_TAR_GZ, &index_tar_gz, HASH_ALGS)
            .unwrap()
            .build()
            .unwrap(),
        &[&KEYS[2]],
    );
    let timestamp = sign_all(
        TimestampMetadataBuilder::from_snapshot(
            &RawSignedMetadata::<SnapshotMetadata>::new(snapshot.clone()),
            HASH_ALGS,
        )
        .unwrap()
        .expires(expires())
        .build()
        .unwrap(),
        &[&KEYS[1]],
    );

    let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
    let mut remote = EphemeralRepository::new();
    remote.insert("root.json", root);
    remote.insert("timestamp.json", timestamp);
    remote.insert("snapshot.json", snapshot);
    remote.insert(INDEX_TAR, index_tar);
    remote.insert(INDEX_TAR_GZ, index_tar_gz);
    let mut client = Client::new(Config::default(), cache, remote);
    client.bootstrap(&[KEYS[0].key_id().clone()], 1).unwrap();
    client.check_for_updates(Some(now())).unwrap();

    assert_matches!(
        client.download_package(&package, &dir.path().join("download")),
        Err(Error::Verification(VerificationError::UnknownTarget(_)))
    );
}

#[test]
fn download_rejects_tampered_tarball() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);
    client.check_for_updates(Some(now())).unwrap();

    // same length, different content
    client
        .remote_mut()
        .insert(repo.tarball_path.clone(), b"the tarbomb".to_vec());

    let dest = dir.path().join("download");
    assert_matches!(
        client.download_package(&package(), &dest),
        Err(Error::Verification(VerificationError::FileInfo(_)))
    );
    assert!(!dest.exists());
}

#[test]
fn download_before_update_is_broken_local_state() {
    let dir = tempdir().unwrap();
    let repo = make_repo(1, 1, b"the tarball");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo);

    // bootstrapped but never updated: there is no index yet
    assert_matches!(
        client.download_package(&package(), &dir.path().join("download")),
        Err(Error::LocalFileCorrupted(_))
    );
}

#[test]
fn versions_are_monotonic_across_updates() {
    let dir = tempdir().unwrap();
    let repo_v1 = make_repo(1, 1, b"one");
    let mut client = bootstrapped_client(&dir.path().join("cache"), &repo_v1);

    let mut last_timestamp = 0;
    let mut last_snapshot = 0;
    for (meta_version, tarball) in &[(1u64, "one"), (2, "two"), (4, "four")] {
        let repo = make_repo(1, *meta_version, tarball.as_bytes());
        serve(client.remote_mut(), &repo);
        assert_eq!(
            client.check_for_updates(Some(now())).unwrap(),
            UpdateOutcome::HasUpdates
        );

        let timestamp = client
            .cache()
            .cached::<TimestampMetadata>()
            .unwrap()
            .unwrap();
        let snapshot = client
            .cache()
            .cached::<SnapshotMetadata>()
            .unwrap()
            .unwrap();
        assert!(timestamp.version() > last_timestamp);
        assert!(snapshot.version() > last_snapshot);
        last_timestamp = timestamp.version();
        last_snapshot = snapshot.version();
    }
}
