//! Subscription Tests
//!
//! Subject trie matching:
//! - Exact subjects
//! - Single-token wildcards (*)
//! - Full wildcards (>)
//! - Deduplication and removal
//! - Concurrent access

use gnat_broker::{SubjectTrie, Subscription};
use gnat_core::Subject;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

// ============================================================================
// Utilities
// ============================================================================

fn subscribe(trie: &SubjectTrie, pattern: &str, sid: u32, conn: u64) -> Subscription {
    let subject = Subject::parse_subscribe(pattern).unwrap();
    let sub = Subscription::new(sid, conn);
    trie.add(sub, subject.tokens());
    sub
}

fn matches(trie: &SubjectTrie, subject: &str) -> HashSet<Subscription> {
    let subject = Subject::parse_publish(subject).unwrap();
    trie.match_for_publish(subject.tokens())
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_single_wildcard_matches_one_token() {
    let trie = SubjectTrie::new();
    let sub = subscribe(&trie, "foo.*.baz", 1, 1);

    assert!(matches(&trie, "foo.bar.baz").contains(&sub));
    assert!(matches(&trie, "foo.x.baz").contains(&sub));
    assert!(matches(&trie, "foo.bar").is_empty());
    assert!(matches(&trie, "foo.bar.qux.baz").is_empty());
}

#[test]
fn test_full_wildcard_matches_one_or_more() {
    let trie = SubjectTrie::new();
    let sub = subscribe(&trie, "foo.>", 1, 1);

    assert!(matches(&trie, "foo.bar").contains(&sub));
    assert!(matches(&trie, "foo.bar.baz.qux").contains(&sub));
    assert!(matches(&trie, "foo").is_empty());
}

#[test]
fn test_mixed_wildcards() {
    let trie = SubjectTrie::new();
    let sub = subscribe(&trie, "*.orders.>", 5, 2);

    assert!(matches(&trie, "eu.orders.created").contains(&sub));
    assert!(matches(&trie, "us.orders.a.b").contains(&sub));
    assert!(matches(&trie, "eu.orders").is_empty());
    assert!(matches(&trie, "eu.refunds.created").is_empty());
}

#[test]
fn test_all_matching_patterns_collected() {
    let trie = SubjectTrie::new();
    let exact = subscribe(&trie, "a.b.c", 1, 10);
    let star = subscribe(&trie, "a.*.c", 2, 10);
    let full = subscribe(&trie, "a.>", 3, 11);
    let root = subscribe(&trie, ">", 4, 12);
    subscribe(&trie, "a.b", 5, 10);

    let found = matches(&trie, "a.b.c");
    let expected: HashSet<_> = [exact, star, full, root].into_iter().collect();
    assert_eq!(found, expected);
}

#[test]
fn test_same_subscription_reported_once() {
    let trie = SubjectTrie::new();
    let sub = Subscription::new(1, 1);
    for pattern in ["x.y", "x.*", "x.>"] {
        let subject = Subject::parse_subscribe(pattern).unwrap();
        trie.add(sub, subject.tokens());
    }

    let found = matches(&trie, "x.y");
    assert_eq!(found.len(), 1);
    assert!(found.contains(&sub));
}

#[test]
fn test_same_id_on_different_connections() {
    let trie = SubjectTrie::new();
    let a = subscribe(&trie, "news", 1, 100);
    let b = subscribe(&trie, "news", 1, 200);

    let found = matches(&trie, "news");
    assert_eq!(found.len(), 2);
    assert!(found.contains(&a) && found.contains(&b));
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_remove_batch() {
    let trie = SubjectTrie::new();
    let a = Subject::parse_subscribe("a.*").unwrap();
    let b = Subject::parse_subscribe("b.>").unwrap();
    let missing = Subject::parse_subscribe("c.d").unwrap();
    let sub_a = Subscription::new(1, 7);
    let sub_b = Subscription::new(2, 7);
    trie.add(sub_a, a.tokens());
    trie.add(sub_b, b.tokens());
    assert_eq!(trie.len(), 2);

    trie.remove_batch([
        (&sub_a, a.tokens()),
        (&sub_b, b.tokens()),
        (&sub_a, missing.tokens()),
    ]);

    assert!(trie.is_empty());
    assert!(matches(&trie, "a.x").is_empty());
    assert!(matches(&trie, "b.x.y").is_empty());
}

#[test]
fn test_remove_leaves_other_subscriptions() {
    let trie = SubjectTrie::new();
    let keep = subscribe(&trie, "t", 1, 1);
    let gone = subscribe(&trie, "t", 2, 1);

    let subject = Subject::parse_subscribe("t").unwrap();
    trie.remove(&gone, subject.tokens());

    let found = matches(&trie, "t");
    assert_eq!(found.len(), 1);
    assert!(found.contains(&keep));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_add_and_match() {
    let trie = Arc::new(SubjectTrie::new());
    let mut handles = Vec::new();

    for conn in 0..8u64 {
        let trie = trie.clone();
        handles.push(thread::spawn(move || {
            for sid in 0..100u32 {
                let subject = Subject::parse_subscribe("load.*").unwrap();
                trie.add(Subscription::new(sid, conn), subject.tokens());
                let publish = Subject::parse_publish("load.test").unwrap();
                assert!(!trie.match_for_publish(publish.tokens()).is_empty());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(trie.len(), 800);
    assert_eq!(matches(&trie, "load.test").len(), 800);
}
