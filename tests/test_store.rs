use std::sync::Arc;
use std::thread;

use warden::store::{
    CredentialCache, CredentialStore, FileStore, MemoryStore, StoreError, open_sessions,
};

#[test]
fn test_memory_store_sessions_share_one_table() {
    let store = MemoryStore::new();
    let mut a = store.connect().unwrap();
    let mut b = store.connect().unwrap();

    a.insert_user("ab", "cd").unwrap();
    assert_eq!(b.load_users().unwrap(), vec![("ab".to_string(), "cd".to_string())]);
    assert!(matches!(
        b.insert_user("ab", "other"),
        Err(StoreError::Duplicate(name)) if name == "ab"
    ));
    assert_eq!(store.password_of("ab").as_deref(), Some("cd"));
}

#[test]
fn test_file_store_persists_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.yaml");

    let store = FileStore::open(&path).unwrap();
    let mut session = store.connect().unwrap();
    assert!(session.load_users().unwrap().is_empty());
    session.insert_user("ab", "cd").unwrap();
    session.insert_user("ef", "gh").unwrap();

    let reopened = FileStore::open(&path).unwrap();
    let mut users = reopened.connect().unwrap().load_users().unwrap();
    users.sort();
    assert_eq!(
        users,
        vec![
            ("ab".to_string(), "cd".to_string()),
            ("ef".to_string(), "gh".to_string())
        ]
    );
}

#[test]
fn test_file_store_rejects_malformed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.yaml");
    std::fs::write(&path, "users: [not, a, map]\n").unwrap();
    assert!(matches!(FileStore::open(&path), Err(StoreError::Format(_))));
}

#[test]
fn test_cache_loads_from_store() {
    let store = MemoryStore::with_users([("alice", "pw1"), ("bob", "pw2")]);
    let mut session = store.connect().unwrap();
    let cache = CredentialCache::new();

    assert_eq!(cache.load(session.as_mut()).unwrap(), 2);
    assert!(cache.verify("alice", "pw1"));
    assert!(!cache.verify("alice", "pw2"));
    assert!(!cache.verify("carol", "pw1"));
}

#[test]
fn test_cache_register_updates_store_and_cache() {
    let store = MemoryStore::new();
    let mut session = store.connect().unwrap();
    let cache = CredentialCache::new();

    cache.register(session.as_mut(), "ab", "cd").unwrap();
    assert!(cache.contains("ab"));
    assert_eq!(store.password_of("ab").as_deref(), Some("cd"));

    assert!(matches!(
        cache.register(session.as_mut(), "ab", "zz"),
        Err(StoreError::Duplicate(_))
    ));
    assert!(cache.verify("ab", "cd"));
}

#[test]
fn test_concurrent_registration_of_one_name_succeeds_once() {
    let store = MemoryStore::new();
    let pool = Arc::new(open_sessions(&store, 4).unwrap());
    let cache = Arc::new(CredentialCache::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let (pool, cache) = (pool.clone(), cache.clone());
            thread::spawn(move || {
                let mut session = pool.acquire();
                cache
                    .register(&mut **session, "same", &format!("pw{i}"))
                    .is_ok()
            })
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(pool.free_count(), 4);
}

#[test]
fn test_open_sessions_rejects_empty_pool() {
    assert!(open_sessions(&MemoryStore::new(), 0).is_err());
}
