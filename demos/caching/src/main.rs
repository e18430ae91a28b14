use std::sync::Arc;

use replay::cache::CachedModel;
use replay::core::{now_millis, ModelParams, ModelValue, PurgeFilter, ReplayError};
use replay::models::ScriptedModel;
use replay::sqlite::SqliteCache;

#[tokio::main]
async fn main() -> Result<(), ReplayError> {
    tracing_subscriber::fmt().init();

    // --- Setup: model with limited responses + shared SQLite cache ---
    // ScriptedModel has only 2 responses; after that it errors.
    // With caching, repeated requests are served from the store.
    let model = ScriptedModel::with_model_id(
        "demo-model",
        vec![
            vec!["The capital of France is Paris.".to_string()],
            vec!["Rust was created by Graydon Hoare.".to_string()],
        ],
    );

    let cache = Arc::new(SqliteCache::in_memory()?);
    let mut params = ModelParams::new();
    params.insert("temperature".to_string(), ModelValue::Float(0.0));
    let cached_model = CachedModel::new(Arc::new(model), cache.clone()).with_defaults(params);

    // --- First call: cache miss ---
    println!("=== Cache Miss (first call) ===");
    let r1 = cached_model
        .get_response("What is the capital of France?", None, &ModelParams::new())
        .await?;
    println!("Response: {}", r1[0]);

    // --- Second call with the same request: cache hit ---
    println!("\n=== Cache Hit (same request) ===");
    let r2 = cached_model
        .get_response("What is the capital of France?", None, &ModelParams::new())
        .await?;
    println!("Response: {}", r2[0]);
    println!("Same response: {}", r1 == r2);

    // --- Different request: cache miss ---
    println!("\n=== Cache Miss (different request) ===");
    let r3 = cached_model
        .get_response("Who created Rust?", None, &ModelParams::new())
        .await?;
    println!("Response: {}", r3[0]);

    // --- Entries per model id ---
    println!("\n=== Store statistics ===");
    for (model_id, count) in cache.count_entries().await? {
        println!("{model_id}: {count} entries");
    }

    // --- Purge everything created so far ---
    println!("\n=== Purge ===");
    let removed = cached_model
        .clear_cache(&PurgeFilter::new().with_created_before(now_millis() + 1))
        .await?;
    println!("Removed {removed} entries");

    // The script is exhausted, so the next call fails: nothing cached.
    let err = cached_model
        .get_response("What is the capital of France?", None, &ModelParams::new())
        .await
        .unwrap_err();
    println!("After purge the model is consulted again: {err}");

    Ok(())
}
