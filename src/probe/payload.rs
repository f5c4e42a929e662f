//! Randomized JSON request bodies.
//!
//! The shape is fixed; only the values change between probes.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

const ACTIONS: &[&str] = &["create", "update", "delete", "read", "sync"];
const ROLES: &[&str] = &["admin", "editor", "viewer", "guest"];
const SOURCES: &[&str] = &["web", "mobile", "api", "batch"];
const PRIORITIES: &[&str] = &["low", "normal", "high", "urgent"];
const TAGS: &[&str] = &["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];

fn pick<R: Rng>(rng: &mut R, items: &[&'static str]) -> &'static str {
    items.choose(rng).copied().unwrap_or_default()
}

/// Build a fresh probe payload.
pub fn generate_payload() -> Value {
    let mut rng = rand::thread_rng();
    let now = Utc::now();

    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();

    let tag_count = rng.gen_range(1..=3);
    let tags: Vec<&str> = TAGS.choose_multiple(&mut rng, tag_count).copied().collect();

    json!({
        "requestId": format!("req_{}_{}", now.timestamp_millis(), suffix.to_lowercase()),
        "timestamp": now.to_rfc3339(),
        "action": pick(&mut rng, ACTIONS),
        "priority": pick(&mut rng, PRIORITIES),
        "counter": rng.gen_range(0..10_000),
        "user": {
            "id": rng.gen_range(1..=100_000),
            "role": pick(&mut rng, ROLES),
            "active": rng.gen_bool(0.8),
        },
        "metadata": {
            "source": pick(&mut rng, SOURCES),
            "version": format!("1.{}.{}", rng.gen_range(0..10), rng.gen_range(0..20)),
            "tags": tags,
            "metrics": {
                "score": (rng.gen::<f64>() * 100.0 * 100.0).round() / 100.0,
                "retries": rng.gen_range(0..5),
            },
        },
    })
}
