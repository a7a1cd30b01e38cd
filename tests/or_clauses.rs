//! `$or` Clause Tests
//!
//! Tests for clause-by-clause execution:
//! - Clauses run in order, each with its own plan race
//! - Empty and fully covered clauses are skipped
//! - Match counts carry across clauses toward takeover
//! - A record matching an earlier clause is not matched again
//! - A collection scan win drops the remaining clauses

use std::sync::Arc;

use aeroquery::config::CursorConfig;
use aeroquery::cursor::{CursorFactory, QueryOptimizerCursor};
use aeroquery::index::IndexSpec;
use aeroquery::storage::Database;
use serde_json::{json, Value};

const NS: &str = "unittests.orclauses";

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (Arc<Database>, CursorFactory) {
    let db = Arc::new(Database::new());
    let factory = CursorFactory::new(Arc::clone(&db), CursorConfig::default());
    (db, factory)
}

fn insert_all(db: &Database, docs: impl IntoIterator<Item = Value>) {
    for doc in docs {
        db.insert(NS, doc).unwrap();
    }
}

fn index(db: &Database, field: &str) {
    db.ensure_index(NS, IndexSpec::btree(&[field])).unwrap();
}

fn open(factory: &CursorFactory, query: Value) -> QueryOptimizerCursor {
    factory.open(NS, &query, None).unwrap().unwrap()
}

fn open_unfiltered(factory: &CursorFactory, query: Value) -> QueryOptimizerCursor {
    factory.open_unfiltered(NS, &query, None).unwrap().unwrap()
}

fn current_id(cursor: &QueryOptimizerCursor) -> i64 {
    cursor.current().unwrap()["_id"].as_i64().unwrap()
}

fn mark_current(cursor: &mut QueryOptimizerCursor) -> bool {
    let id = cursor.current_record_id().unwrap();
    cursor.check_and_mark_dup(id)
}

/// Drain the cursor, collecting `_id`s.
fn ids(cursor: &mut QueryOptimizerCursor) -> Vec<i64> {
    let mut out = Vec::new();
    while cursor.ok() {
        out.push(current_id(cursor));
        cursor.advance().unwrap();
    }
    out
}

fn two_docs_with_a_index(db: &Database, first_a: i64) {
    insert_all(db, [json!({"_id": 0, "a": first_a}), json!({"_id": 1, "a": 1})]);
    index(db, "a");
}

// =============================================================================
// Clause Sequencing Tests
// =============================================================================

#[test]
fn test_basic_or() {
    let (db, factory) = setup();
    two_docs_with_a_index(&db, 0);

    let mut cursor = open(&factory, json!({"$or": [{"_id": 0}, {"a": 1}]}));
    assert_eq!(cursor.current().unwrap(), json!({"_id": 0, "a": 0}));
    assert!(cursor.advance().unwrap());
    assert_eq!(cursor.current().unwrap(), json!({"_id": 1, "a": 1}));
    assert!(!cursor.advance().unwrap());

    let explain = cursor.explain();
    assert!(explain.disjunctive);
    assert_eq!(explain.clauses.len(), 2);
    assert_eq!(explain.clauses[1].winner.as_deref(), Some("a_1"));
}

#[test]
fn test_first_clause_empty() {
    let (db, factory) = setup();
    two_docs_with_a_index(&db, 1);

    let mut cursor = open(&factory, json!({"$or": [{"_id": -1}, {"a": 1}]}));
    assert_eq!(ids(&mut cursor), vec![0, 1]);
}

#[test]
fn test_second_clause_empty() {
    let (db, factory) = setup();
    two_docs_with_a_index(&db, 1);

    let mut cursor = open(&factory, json!({"$or": [{"_id": 0}, {"_id": -1}, {"a": 1}]}));
    assert_eq!(ids(&mut cursor), vec![0, 1]);
}

#[test]
fn test_multiple_clauses_empty() {
    let (db, factory) = setup();
    two_docs_with_a_index(&db, 1);

    let query = json!({"$or": [
        {"_id": 2}, {"_id": 4}, {"_id": 0}, {"_id": -1}, {"_id": 6}, {"a": 1}, {"_id": 9}
    ]});
    let mut cursor = open(&factory, query);
    assert_eq!(ids(&mut cursor), vec![0, 1]);
    assert_eq!(cursor.explain().clauses.len(), 7);
}

/// A clause whose ranges an earlier clause covers never runs.
#[test]
fn test_range_elimination() {
    let (db, factory) = setup();
    db.insert(NS, json!({"_id": 1})).unwrap();

    let mut cursor = open(&factory, json!({"$or": [{"_id": {"$gt": 0}}, {"_id": 1}]}));
    assert!(cursor.ok());
    assert!(!cursor.advance().unwrap());

    let explain = cursor.explain();
    assert!(!explain.clauses[0].eliminated);
    assert!(explain.clauses[1].eliminated);
    assert!(explain.clauses[1].plan.is_none());
}

/// A field order turns the `$or` into one filtered scan.
#[test]
fn test_or_with_field_order_is_single_scan() {
    let (db, factory) = setup();
    insert_all(
        &db,
        [
            json!({"_id": 0, "a": 3}),
            json!({"_id": 1, "a": 2}),
            json!({"_id": 2, "a": 1}),
        ],
    );
    index(&db, "a");

    let mut cursor = factory
        .open(NS, &json!({"$or": [{"a": 1}, {"a": 3}]}), Some(&json!({"a": 1})))
        .unwrap()
        .unwrap();
    assert_eq!(ids(&mut cursor), vec![2, 0]);
    let explain = cursor.explain();
    assert!(!explain.disjunctive);
    assert_eq!(explain.clauses.len(), 1);
}

// =============================================================================
// Takeover Across Clauses Tests
// =============================================================================

/// Matches from earlier clauses count toward the next clause's takeover.
#[test]
fn test_takeover_count_carries_across_clauses() {
    let (db, factory) = setup();
    insert_all(&db, (0..60).map(|i| json!({"_id": i, "a": 0})));
    insert_all(&db, (60..120).map(|i| json!({"_id": i, "a": 1})));
    insert_all(&db, (120..150).map(|i| json!({"_id": i, "a": 200 - i})));
    index(&db, "a");

    let mut cursor = open(
        &factory,
        json!({"$or": [{"a": 0}, {"a": 1}, {"_id": {"$gte": 120}, "a": {"$gt": 1}}]}),
    );
    for _ in 0..120 {
        assert!(cursor.ok());
        cursor.advance().unwrap();
    }
    // Scanning the _id index only.
    for i in 120..150 {
        assert_eq!(current_id(&cursor), i);
        cursor.advance().unwrap();
    }
    assert!(!cursor.ok());

    let third = &cursor.explain().clauses[2];
    assert!(third.takeover);
    assert_eq!(third.winner.as_deref(), Some("_id_"));
}

/// Takeover on the last record of a clause.
#[test]
fn test_takeover_at_end_of_clause() {
    let (db, factory) = setup();
    insert_all(&db, (0..102).map(|i| json!({"_id": i})));

    let mut cursor = open(&factory, json!({"$or": [{"_id": {"$lt": 101}}, {"_id": 101}]}));
    assert_eq!(ids(&mut cursor), (0..102).collect::<Vec<_>>());
}

#[test]
fn test_takeover_before_end_of_clause() {
    let (db, factory) = setup();
    insert_all(&db, (0..101).map(|i| json!({"_id": i})));

    let mut cursor = open(&factory, json!({"$or": [{"_id": {"$lt": 100}}, {"_id": 100}]}));
    assert_eq!(ids(&mut cursor), (0..101).collect::<Vec<_>>());
}

#[test]
fn test_takeover_after_end_of_clause() {
    let (db, factory) = setup();
    insert_all(&db, (0..103).map(|i| json!({"_id": i})));

    let mut cursor = open(&factory, json!({"$or": [{"_id": {"$lt": 102}}, {"_id": 102}]}));
    assert_eq!(ids(&mut cursor), (0..103).collect::<Vec<_>>());
}

/// Moving to the next clause while a takeover plan is running.
#[test]
fn test_clause_pop_during_takeover() {
    let (db, factory) = setup();
    insert_all(&db, (0..150).map(|i| json!({"_id": i})));

    let mut cursor = open_unfiltered(
        &factory,
        json!({"$or": [{"_id": {"$lte": 147}}, {"_id": 148}, {"_id": 149}]}),
    );
    for i in 0..150 {
        assert!(cursor.ok());
        assert_eq!(current_id(&cursor), i);
        cursor.advance().unwrap();
    }
    assert!(!cursor.ok());
}

// =============================================================================
// Clause Matching Tests
// =============================================================================

/// A record already matched by an earlier clause does not match again.
#[test]
fn test_clause_scope_dedup() {
    let (db, factory) = setup();
    insert_all(&db, (0..150).map(|i| json!({"_id": i, "a": i})));
    index(&db, "a");

    let mut cursor = open_unfiltered(
        &factory,
        json!({"$or": [{"_id": {"$lt": 140}}, {"_id": 145}, {"a": 145}]}),
    );
    while current_id(&cursor) < 140 {
        assert!(cursor.advance().unwrap());
    }
    // From the second clause.
    assert_eq!(current_id(&cursor), 145);
    assert!(cursor.matches_current().unwrap());
    assert!(cursor.advance().unwrap());
    // From the third clause, which the second already covered.
    assert_eq!(current_id(&cursor), 145);
    assert!(!cursor.matches_current().unwrap());
    assert!(!cursor.advance().unwrap());
}

/// Integrated cursors apply the same rule.
#[test]
fn test_clause_scope_dedup_integrated() {
    let (db, factory) = setup();
    insert_all(&db, (0..10).map(|i| json!({"_id": i, "a": i})));
    index(&db, "a");

    let mut cursor = open(&factory, json!({"$or": [{"_id": {"$lt": 3}}, {"a": {"$lt": 5}}]}));
    assert_eq!(ids(&mut cursor), vec![0, 1, 2, 3, 4]);
}

// =============================================================================
// Full Scan Abort Tests
// =============================================================================

/// A collection scan winning a clause ends the whole `$or`.
#[test]
fn test_collection_scan_abort() {
    let (db, factory) = setup();
    insert_all(
        &db,
        [
            json!({"_id": 0, "a": [1, 2, 3, 4, 5], "b": 4}),
            json!({"_id": 1, "a": [6, 7, 8, 9, 10], "b": 4}),
        ],
    );
    index(&db, "a");

    let mut cursor = open_unfiltered(
        &factory,
        json!({"$or": [
            {"a": {"$lt": 6}, "b": 4},
            {"a": {"$gte": 6}, "b": 4}
        ]}),
    );
    assert!(cursor.ok());
    // (id, dup when marked): {a:1}, natural, {a:1}, natural, {a:1}
    for (i, (id, dup)) in [(0, false), (0, true), (0, true), (1, false), (0, true)]
        .into_iter()
        .enumerate()
    {
        if i > 0 {
            cursor.advance().unwrap();
        }
        assert_eq!(current_id(&cursor), id);
        assert!(cursor.matches_current().unwrap());
        assert_eq!(mark_current(&mut cursor), dup);
    }
    cursor.advance().unwrap();
    // natural finished
    assert!(!cursor.ok());

    let explain = cursor.explain();
    assert!(explain.full_scan_abort);
    assert_eq!(explain.clauses.len(), 1);
    assert_eq!(explain.clauses[0].winner.as_deref(), Some("$natural"));
}

/// Without a natural winner every clause runs.
#[test]
fn test_no_abort_for_index_winner() {
    let (db, factory) = setup();
    insert_all(&db, (0..5).map(|i| json!({"_id": i, "a": i})));
    index(&db, "a");

    let mut cursor = open(&factory, json!({"$or": [{"a": 1}, {"a": 3}]}));
    assert_eq!(ids(&mut cursor), vec![1, 3]);
    let explain = cursor.explain();
    assert!(!explain.full_scan_abort);
    assert_eq!(explain.clauses.len(), 2);
    assert!(explain.nscanned >= 2);
}
