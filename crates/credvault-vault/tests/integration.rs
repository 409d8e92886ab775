//! Integration tests for the credvault-vault crate.
//!
//! These tests exercise the full storage path: sealing the master key,
//! encrypting payloads, persisting records and detecting tampering.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use serde_json::json;

use credvault_vault::{
    AuthTokens, CredentialRecord, CredentialStore, DataEncryptionEngine, EncryptedPayload,
    FileKeyBlobStore, KeyBlobStore, MasterKey, MasterKeyBlob, MasterKeyManager, VaultConfig,
    VaultError, VaultService,
};

/// Engine under a fresh random master key.
fn test_engine() -> DataEncryptionEngine {
    DataEncryptionEngine::new(&MasterKey::generate().unwrap()).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Payload encryption
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn structured_payloads_roundtrip() {
    let engine = test_engine();
    let payloads = [
        json!({}),
        json!({ "token": "t1", "refresh_token": "r1", "scopes": ["cal"] }),
        json!({ "nested": { "list": [1, 2.5, "three", null, true], "map": { "k": "v" } } }),
        json!(["a", ["b", ["c"]]]),
        json!("plain string"),
        json!(42),
        json!({ "unicode": "héllo wörld ✓", "empty": "" }),
    ];

    for payload in payloads {
        let encrypted = engine.encrypt_value(&payload).unwrap();
        assert_eq!(engine.decrypt_value(&encrypted).unwrap(), payload);
    }
}

#[test]
fn other_key_raises_integrity_error() {
    let k1 = test_engine();
    let k2 = test_engine();

    let encrypted = k1.encrypt_value(&json!({ "token": "t1" })).unwrap();
    let result = k2.decrypt_value(&encrypted);
    assert!(matches!(result, Err(VaultError::Integrity { .. })));
}

#[test]
fn repeated_encryption_never_repeats() {
    let engine = test_engine();
    let payload = json!({ "token": "t1" });

    let mut seen = std::collections::HashSet::new();
    for _ in 0..64 {
        let encrypted = engine.encrypt_value(&payload).unwrap();
        assert!(seen.insert(encrypted.into_string()));
    }
}

#[test]
fn every_changed_character_is_detected() {
    let engine = test_engine();
    let encrypted = engine
        .encrypt_value(&json!({ "token": "t1", "scopes": ["cal"] }))
        .unwrap();
    let text = encrypted.as_str();

    for (i, c) in text.char_indices() {
        let replacement = if c == 'A' { 'B' } else { 'A' };
        let mut tampered = String::with_capacity(text.len());
        tampered.push_str(&text[..i]);
        tampered.push(replacement);
        tampered.push_str(&text[i + c.len_utf8()..]);

        let result = engine.decrypt_value(&EncryptedPayload::from_stored(tampered));
        assert!(
            matches!(result, Err(VaultError::Integrity { .. })),
            "change at char {i} was accepted"
        );
    }
}

#[test]
fn every_flipped_byte_is_detected() {
    let engine = test_engine();
    let encrypted = engine.encrypt_value(&json!({ "token": "t1" })).unwrap();
    let raw = STANDARD.decode(encrypted.as_str()).unwrap();

    for i in 0..raw.len() {
        let mut tampered = raw.clone();
        tampered[i] ^= 0x01;
        let payload = EncryptedPayload::from_stored(STANDARD.encode(&tampered));

        let result = engine.decrypt_value(&payload);
        assert!(
            matches!(result, Err(VaultError::Integrity { .. })),
            "flip at byte {i} was accepted"
        );
    }
}

#[test]
fn integrity_error_carries_no_plaintext() {
    let engine = test_engine();
    let encrypted = engine
        .encrypt_value(&json!({ "token": "supersecret-token" }))
        .unwrap();
    let mut raw = STANDARD.decode(encrypted.as_str()).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xff;

    let err = engine
        .decrypt_value(&EncryptedPayload::from_stored(STANDARD.encode(&raw)))
        .unwrap_err();
    let message = format!("{err} {err:?}");
    assert!(!message.contains("supersecret"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Master key sealing
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn wrong_password_rejected_right_password_accepted() {
    let manager = MasterKeyManager::new();
    let master = MasterKey::generate().unwrap();
    let blob = manager.seal(&master, b"pw1").unwrap();

    let result = manager.unseal(&blob, b"pw2");
    assert!(matches!(result, Err(VaultError::Authentication { .. })));

    let unsealed = manager.unseal(&blob, b"pw1").unwrap();
    assert_eq!(unsealed.as_bytes(), master.as_bytes());
}

#[test]
fn modified_blob_rejected() {
    let manager = MasterKeyManager::new();
    let (_master, blob) = manager.generate_and_seal(b"pw").unwrap();
    let bytes = blob.to_bytes();

    // One position in each region: salt, nonce, ciphertext, tag.
    for i in [0, 16, 28, bytes.len() - 1] {
        let mut tampered = bytes.clone();
        tampered[i] ^= 0x80;
        let tampered = MasterKeyBlob::from_bytes(&tampered).unwrap();

        let result = manager.unseal(&tampered, b"pw");
        assert!(
            matches!(result, Err(VaultError::Authentication { .. })),
            "flip at byte {i} was accepted"
        );
    }
}

#[test]
fn blob_file_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = FileKeyBlobStore::default_path(dir.path());
    let manager = MasterKeyManager::new();

    let first = manager
        .load_or_initialize(&FileKeyBlobStore::new(&path), b"pw")
        .unwrap();
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk.len(), 76);

    let second = manager
        .load_or_initialize(&FileKeyBlobStore::new(&path), b"pw")
        .unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(std::fs::read(&path).unwrap(), on_disk);
}

#[test]
fn wrong_password_leaves_blob_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileKeyBlobStore::new(dir.path().join("master.key"));
    let manager = MasterKeyManager::new();

    manager.load_or_initialize(&store, b"pw").unwrap();
    let before = std::fs::read(store.path()).unwrap();

    let result = manager.load_or_initialize(&store, b"nope");
    assert!(matches!(result, Err(VaultError::Authentication { .. })));
    assert!(store.exists().unwrap());
    assert_eq!(std::fs::read(store.path()).unwrap(), before);
}

// ═══════════════════════════════════════════════════════════════════════
//  Records on disk
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn records_survive_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = VaultConfig {
        database_path: dir.path().join("vault.db"),
        key_blob_path: dir.path().join("master.key"),
        ..VaultConfig::default()
    };

    let record_id = {
        let service = VaultService::bootstrap(config.clone(), b"pw").unwrap();
        let tokens = AuthTokens::new("t1", ["cal"]).with_refresh_token("r1");
        let mut record = CredentialRecord::from_grant(
            service.engine(),
            "U",
            "T",
            "google",
            &tokens,
            Some(Utc::now() + Duration::hours(1)),
        )
        .unwrap();
        record
            .set_config_data(service.engine(), Some(&json!({ "calendar_id": "primary" })))
            .unwrap();
        service.store().insert(&record).unwrap();
        record.id
    };

    let service = VaultService::bootstrap(config, b"pw").unwrap();
    let record = service.store().find_active("U", "T").unwrap().unwrap();
    assert_eq!(record.id, record_id);

    let tokens = record.get_auth_tokens(service.engine()).unwrap().unwrap();
    assert_eq!(tokens.token, "t1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
    assert_eq!(
        record.get_config_data(service.engine()).unwrap(),
        Some(json!({ "calendar_id": "primary" }))
    );
}

#[test]
fn records_unreadable_under_other_deployment_key() {
    let store = CredentialStore::open_in_memory().unwrap();
    let engine = test_engine();
    let tokens = AuthTokens::new("t1", ["cal"]);
    let record = CredentialRecord::from_grant(&engine, "U", "T", "google", &tokens, None).unwrap();
    store.insert(&record).unwrap();

    let loaded = store.find_active("U", "T").unwrap().unwrap();
    let result = loaded.get_auth_tokens(&test_engine());
    assert!(matches!(result, Err(VaultError::Integrity { .. })));
}

#[test]
fn config_rotation_leaves_token_blob_alone() {
    let engine = test_engine();
    let tokens = AuthTokens::new("t1", ["cal"]);
    let mut record = CredentialRecord::from_grant(&engine, "U", "T", "google", &tokens, None).unwrap();
    let token_blob = record.encrypted_auth_tokens().cloned();

    record
        .set_config_data(&engine, Some(&json!({ "v": 1 })))
        .unwrap();
    record
        .set_config_data(&engine, Some(&json!({ "v": 2 })))
        .unwrap();

    assert_eq!(record.encrypted_auth_tokens().cloned(), token_blob);
    assert_eq!(record.get_config_data(&engine).unwrap(), Some(json!({ "v": 2 })));
}
