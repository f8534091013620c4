//! Property-based tests for cache key derivation

use madsea::cache::{compute_content_hash, generate_key, CacheKey};
use madsea::types::{Resolution, StyleParams};
use proptest::prelude::*;

fn params_from(pairs: &[(String, i64)]) -> StyleParams {
    let mut params = StyleParams::new();
    for (key, value) in pairs {
        params.insert(key.clone(), *value);
    }
    params
}

/// Insertion order of style parameters never changes the key
#[test]
fn test_key_ignores_param_insertion_order() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                proptest::collection::btree_map("[a-z_]{1,12}", any::<i64>(), 0..8),
                any::<Vec<u8>>(),
                ".*",
            ),
            |(map, content, text)| {
                let forward: Vec<(String, i64)> = map.into_iter().collect();
                let mut reversed = forward.clone();
                reversed.reverse();

                let hash = compute_content_hash(&content);
                let res = Resolution::new(1024, 768);
                let a = generate_key(&hash, &text, "ink", &params_from(&forward), res, "local");
                let b = generate_key(&hash, &text, "ink", &params_from(&reversed), res, "local");

                prop_assert_eq!(a, b);
                Ok(())
            },
        )
        .unwrap();
}

/// Changing any single input changes the key
#[test]
fn test_key_sensitive_to_each_input() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(any::<[u8; 32]>(), "[a-z ]{0,24}", 1u32..4096, 1u32..4096),
            |(hash, text, width, height)| {
                let params = StyleParams::new().with("steps", 20);
                let res = Resolution::new(width, height);
                let base = generate_key(&hash, &text, "ink", &params, res, "local");

                let other_text = format!("{}!", text);
                prop_assert_ne!(base, generate_key(&hash, &other_text, "ink", &params, res, "local"));
                prop_assert_ne!(base, generate_key(&hash, &text, "ink", &params, res, "cloud"));
                prop_assert_ne!(base, generate_key(&hash, &text, "noir", &params, res, "local"));
                prop_assert_ne!(
                    base,
                    generate_key(&hash, &text, "ink", &params, Resolution::new(width + 1, height), "local")
                );
                prop_assert_ne!(
                    base,
                    generate_key(&hash, &text, "ink", &params.clone().with("steps", 21), res, "local")
                );
                Ok(())
            },
        )
        .unwrap();
}

/// Moving bytes between adjacent fields yields a different key
#[test]
fn test_key_fields_do_not_run_together() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&("[a-z]{1,10}", "[a-z]{1,10}"), |(left, right)| {
            let hash = compute_content_hash(b"board");
            let params = StyleParams::new();
            let res = Resolution::new(64, 64);
            let joined = format!("{}{}", left, right);

            let a = generate_key(&hash, &joined, "", &params, res, "local");
            let b = generate_key(&hash, &left, &right, &params, res, "local");
            prop_assert_ne!(a, b);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_key_hex_round_trip() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&any::<[u8; 32]>(), |bytes| {
            let key = CacheKey::from_bytes(bytes);
            let hex = key.to_hex();
            prop_assert_eq!(hex.len(), 64);
            prop_assert_eq!(CacheKey::from_hex(&hex), Some(key));
            Ok(())
        })
        .unwrap();
}
