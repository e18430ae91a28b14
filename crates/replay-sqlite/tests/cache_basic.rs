use std::time::Duration;

use replay_core::{now_millis, CacheRequest, ChatHistory, ChatTurn, Fingerprint, ReplayError};
use replay_sqlite::{PurgeFilter, ResponseCache, SqliteCache};

fn fingerprint(model_id: &str, message: &str) -> Fingerprint {
    CacheRequest::new(model_id, message).fingerprint().unwrap()
}

fn responses(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| t.to_string()).collect()
}

fn temp_db(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("replay-sqlite-{}-{}.db", std::process::id(), name))
}

#[tokio::test]
async fn hit_on_exact_match_miss_on_other_message() {
    let cache = SqliteCache::in_memory().unwrap();
    let key = fingerprint("m1", "ping");

    cache.insert(&key, &responses(&["pong"])).await.unwrap();

    let hit = cache.probe(&key).await.unwrap().unwrap();
    assert_eq!(hit.responses, responses(&["pong"]));
    assert!(hit.accessed_at >= hit.created_at);

    let miss = cache.probe(&fingerprint("m1", "pong")).await.unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn responses_round_trip_in_order() {
    let cache = SqliteCache::in_memory().unwrap();
    let key = fingerprint("m1", "rank these");
    let stored = responses(&["first", "second", "third"]);

    let id = cache.insert(&key, &stored).await.unwrap();
    let entry = cache.probe(&key).await.unwrap().unwrap();

    assert_eq!(entry.id, id);
    assert_eq!(entry.responses, stored);
}

#[tokio::test]
async fn string_and_int_params_do_not_collide() {
    let cache = SqliteCache::in_memory().unwrap();

    let string_key = CacheRequest::new("m1", "q")
        .with_param("x", "1")
        .fingerprint()
        .unwrap();
    let int_key = CacheRequest::new("m1", "q")
        .with_param("x", 1i64)
        .fingerprint()
        .unwrap();

    cache
        .insert(&string_key, &responses(&["string answer"]))
        .await
        .unwrap();
    cache
        .insert(&int_key, &responses(&["int answer"]))
        .await
        .unwrap();

    let s = cache.probe(&string_key).await.unwrap().unwrap();
    let i = cache.probe(&int_key).await.unwrap().unwrap();
    assert_eq!(s.responses, responses(&["string answer"]));
    assert_eq!(i.responses, responses(&["int answer"]));
}

#[tokio::test]
async fn int_and_float_params_do_not_collide() {
    let cache = SqliteCache::in_memory().unwrap();

    let int_key = CacheRequest::new("m1", "q")
        .with_param("n", 2i64)
        .fingerprint()
        .unwrap();
    let float_key = CacheRequest::new("m1", "q")
        .with_param("n", 2.0)
        .fingerprint()
        .unwrap();

    cache.insert(&int_key, &responses(&["int"])).await.unwrap();
    cache
        .insert(&float_key, &responses(&["float"]))
        .await
        .unwrap();

    assert_eq!(
        cache.probe(&int_key).await.unwrap().unwrap().responses,
        responses(&["int"])
    );
    assert_eq!(
        cache.probe(&float_key).await.unwrap().unwrap().responses,
        responses(&["float"])
    );
}

#[tokio::test]
async fn parameter_order_is_irrelevant() {
    let cache = SqliteCache::in_memory().unwrap();

    let inserted = CacheRequest::new("m1", "q")
        .with_param("temperature", 0.7)
        .with_param("max_tokens", 128i64)
        .with_param("stop", "END")
        .fingerprint()
        .unwrap();
    cache.insert(&inserted, &responses(&["r"])).await.unwrap();

    let probed = CacheRequest::new("m1", "q")
        .with_param("stop", "END")
        .with_param("max_tokens", 128i64)
        .with_param("temperature", 0.7)
        .fingerprint()
        .unwrap();
    assert!(cache.probe(&probed).await.unwrap().is_some());
}

#[tokio::test]
async fn subset_and_superset_do_not_match() {
    let cache = SqliteCache::in_memory().unwrap();

    let key = CacheRequest::new("m1", "q")
        .with_param("a", 1i64)
        .fingerprint()
        .unwrap();
    cache.insert(&key, &responses(&["r"])).await.unwrap();

    let missing_param = CacheRequest::new("m1", "q").fingerprint().unwrap();
    let extra_param = CacheRequest::new("m1", "q")
        .with_param("a", 1i64)
        .with_param("b", 2i64)
        .fingerprint()
        .unwrap();

    assert!(cache.probe(&missing_param).await.unwrap().is_none());
    assert!(cache.probe(&extra_param).await.unwrap().is_none());
}

#[tokio::test]
async fn history_and_system_prompt_distinguish_entries() {
    let cache = SqliteCache::in_memory().unwrap();
    let history: ChatHistory = [ChatTurn::user("hi"), ChatTurn::assistant("hello")]
        .into_iter()
        .collect();

    let bare = CacheRequest::new("m1", "next").fingerprint().unwrap();
    let with_history = CacheRequest::new("m1", "next")
        .with_history(history.clone())
        .fingerprint()
        .unwrap();
    let with_system = CacheRequest::new("m1", "next")
        .with_system_prompt("Be brief.")
        .fingerprint()
        .unwrap();

    cache.insert(&bare, &responses(&["bare"])).await.unwrap();
    cache
        .insert(&with_history, &responses(&["history"]))
        .await
        .unwrap();
    cache
        .insert(&with_system, &responses(&["system"]))
        .await
        .unwrap();

    assert_eq!(
        cache.probe(&bare).await.unwrap().unwrap().responses,
        responses(&["bare"])
    );
    assert_eq!(
        cache.probe(&with_history).await.unwrap().unwrap().responses,
        responses(&["history"])
    );
    assert_eq!(
        cache.probe(&with_system).await.unwrap().unwrap().responses,
        responses(&["system"])
    );
}

#[tokio::test]
async fn duplicate_insert_is_rejected() {
    let cache = SqliteCache::in_memory().unwrap();
    let key = fingerprint("m1", "once");

    cache.insert(&key, &responses(&["first"])).await.unwrap();
    let err = cache.insert(&key, &responses(&["second"])).await.unwrap_err();
    assert!(matches!(err, ReplayError::DuplicateEntry));

    let entry = cache.probe(&key).await.unwrap().unwrap();
    assert_eq!(entry.responses, responses(&["first"]));
}

#[tokio::test]
async fn interning_is_idempotent() {
    let cache = SqliteCache::in_memory().unwrap();

    let first = cache.intern("shared system prompt").await.unwrap();
    let second = cache.intern("shared system prompt").await.unwrap();
    let other = cache.intern("something else").await.unwrap();

    assert_eq!(first, second);
    assert_ne!(first, other);
}

#[tokio::test]
async fn inserted_strings_resolve_to_interned_ids() {
    let cache = SqliteCache::in_memory().unwrap();

    let key = CacheRequest::new("m1", "the prompt").fingerprint().unwrap();
    cache.insert(&key, &responses(&["r"])).await.unwrap();

    // The message text was interned during insert; interning it again must
    // hit the existing row rather than create a second one.
    let id1 = cache.intern("the prompt").await.unwrap();
    let id2 = cache.intern("the prompt").await.unwrap();
    assert_eq!(id1, id2);
}

#[tokio::test]
async fn purge_requires_a_filter() {
    let cache = SqliteCache::in_memory().unwrap();
    let err = cache.purge(&PurgeFilter::new()).await.unwrap_err();
    assert!(matches!(err, ReplayError::Config(_)));
}

#[tokio::test]
async fn purge_accessed_before_spares_recently_hit_entries() {
    let cache = SqliteCache::in_memory().unwrap();
    let hot = fingerprint("m1", "hot");
    let cold = fingerprint("m1", "cold");

    cache.insert(&hot, &responses(&["r"])).await.unwrap();
    cache.insert(&cold, &responses(&["r"])).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = now_millis();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Touch only the hot entry after the cutoff.
    cache.probe(&hot).await.unwrap().unwrap();

    let removed = cache
        .purge(&PurgeFilter::new().with_accessed_before(cutoff))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(cache.probe(&hot).await.unwrap().is_some());
    assert!(cache.probe(&cold).await.unwrap().is_none());
}

#[tokio::test]
async fn purge_created_before_removes_old_entries() {
    let cache = SqliteCache::in_memory().unwrap();
    cache
        .insert(&fingerprint("m1", "old"), &responses(&["r"]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = now_millis();
    tokio::time::sleep(Duration::from_millis(20)).await;

    cache
        .insert(&fingerprint("m1", "new"), &responses(&["r"]))
        .await
        .unwrap();

    let removed = cache
        .purge(&PurgeFilter::new().with_created_before(cutoff))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(cache.probe(&fingerprint("m1", "old")).await.unwrap().is_none());
    assert!(cache.probe(&fingerprint("m1", "new")).await.unwrap().is_some());
}

#[tokio::test]
async fn purge_by_model_id_cascades() {
    let cache = SqliteCache::in_memory().unwrap();
    cache
        .insert(&fingerprint("m1", "a"), &responses(&["r1"]))
        .await
        .unwrap();
    cache
        .insert(&fingerprint("m2", "a"), &responses(&["r2"]))
        .await
        .unwrap();

    let removed = cache
        .purge(&PurgeFilter::new().with_model_id("m1"))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    assert!(cache.probe(&fingerprint("m1", "a")).await.unwrap().is_none());
    let kept = cache.probe(&fingerprint("m2", "a")).await.unwrap().unwrap();
    assert_eq!(kept.responses, responses(&["r2"]));

    let counts = cache.count_entries().await.unwrap();
    assert_eq!(counts.get("m1"), None);
    assert_eq!(counts.get("m2"), Some(&1));
}

#[tokio::test]
async fn prune_reclaims_orphaned_strings() {
    let cache = SqliteCache::in_memory().unwrap();
    cache
        .insert(&fingerprint("m1", "only user"), &responses(&["r"]))
        .await
        .unwrap();

    // Nothing is orphaned while the entry is alive.
    assert_eq!(cache.prune_interned_strings().await.unwrap(), 0);

    cache
        .purge(&PurgeFilter::new().with_model_id("m1"))
        .await
        .unwrap();

    // The message string is no longer referenced by any parameter row.
    assert_eq!(cache.prune_interned_strings().await.unwrap(), 1);
}

#[tokio::test]
async fn count_and_time_statistics() {
    let cache = SqliteCache::in_memory().unwrap();
    cache
        .insert(&fingerprint("m1", "a"), &responses(&["r"]))
        .await
        .unwrap();
    cache
        .insert(&fingerprint("m1", "b"), &responses(&["r"]))
        .await
        .unwrap();
    cache
        .insert(&fingerprint("m2", "a"), &responses(&["r"]))
        .await
        .unwrap();

    let counts = cache.count_entries().await.unwrap();
    assert_eq!(counts.get("m1"), Some(&2));
    assert_eq!(counts.get("m2"), Some(&1));

    let earliest = cache.earliest_creation_times().await.unwrap();
    let latest = cache.latest_creation_times().await.unwrap();
    assert!(earliest["m1"] <= latest["m1"]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.probe(&fingerprint("m1", "a")).await.unwrap().unwrap();

    let access = cache.latest_access_times().await.unwrap();
    assert!(access["m1"] > latest["m1"]);
}

#[tokio::test]
async fn entries_survive_reopen() {
    let path = temp_db("persistence");
    let _ = std::fs::remove_file(&path);

    {
        let cache = SqliteCache::open(&path).unwrap();
        cache
            .insert(&fingerprint("m1", "durable"), &responses(&["kept"]))
            .await
            .unwrap();
    }

    let reopened = SqliteCache::open(&path).unwrap();
    let entry = reopened
        .probe(&fingerprint("m1", "durable"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.responses, responses(&["kept"]));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn missing_cache_directory_is_created() {
    let dir = std::env::temp_dir().join(format!("replay-sqlite-dir-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let path = dir.join("nested").join("cache.db");

    let cache = SqliteCache::open(&path).unwrap();
    cache
        .insert(&fingerprint("m1", "q"), &responses(&["r"]))
        .await
        .unwrap();
    assert!(path.exists());

    drop(cache);
    let _ = std::fs::remove_dir_all(&dir);
}
