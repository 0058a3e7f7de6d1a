//! API key issuing properties over the public vault API.

use std::collections::HashSet;
use std::sync::Arc;

use plangate::auth::api_keys::{KEY_PREFIX, LOOKUP_PREFIX_LEN, hash_key};
use plangate::auth::{ApiKeyVault, KeyVerification};
use plangate::clock::FixedClock;
use plangate::storage::{AccountId, ApiKeyStore, MemoryStore};

fn vault(store: &MemoryStore) -> ApiKeyVault {
    ApiKeyVault::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FixedClock::at_date(2026, 7, 1)),
    )
}

#[tokio::test]
async fn test_issued_keys_are_unique() {
    let store = MemoryStore::new();
    let vault = vault(&store);
    let account = AccountId::new();

    let mut keys = HashSet::new();
    let mut hashes = HashSet::new();
    for n in 0..10_000 {
        let issued = vault.issue(&account, &format!("key-{n}")).await.unwrap();
        assert_eq!(issued.record.key_hash, hash_key(&issued.key));
        assert_eq!(issued.record.key_prefix, &issued.key[..LOOKUP_PREFIX_LEN]);
        keys.insert(issued.key);
        hashes.insert(issued.record.key_hash);
    }

    assert_eq!(keys.len(), 10_000);
    assert_eq!(hashes.len(), 10_000);
    assert_eq!(store.list_api_keys(&account).await.unwrap().len(), 10_000);
}

#[tokio::test]
async fn test_any_single_character_change_is_invalid() {
    let store = MemoryStore::new();
    let vault = vault(&store);
    let issued = vault.issue(&AccountId::new(), "primary").await.unwrap();
    assert!(vault.verify(&issued.key).await.is_valid());

    for (i, original) in issued.key.char_indices() {
        let replacement = if i < KEY_PREFIX.len() {
            if original == 'x' { 'y' } else { 'x' }
        } else if original == '0' {
            '1'
        } else {
            '0'
        };
        let mut mutated = issued.key.clone();
        mutated.replace_range(i..i + 1, &replacement.to_string());

        assert_eq!(
            vault.verify(&mutated).await,
            KeyVerification::Invalid,
            "mutation at {i} verified"
        );
    }
}

#[tokio::test]
async fn test_uppercase_hex_is_rejected() {
    let store = MemoryStore::new();
    let vault = vault(&store);
    let issued = vault.issue(&AccountId::new(), "primary").await.unwrap();

    let shouted = format!(
        "{}{}",
        KEY_PREFIX,
        issued.key[KEY_PREFIX.len()..].to_ascii_uppercase()
    );
    if shouted != issued.key {
        assert_eq!(vault.verify(&shouted).await, KeyVerification::Invalid);
    }
}
