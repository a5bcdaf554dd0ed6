// Plan-shape and enumerator tests: index scans replace full scans under
// primary-key equality, single-pattern extends avoid redundant hash joins,
// filters apply as soon as their inputs exist, and every enumerated plan
// for a pattern computes the same result multiset.

mod common;

use common::{open_tinysnb, sorted_rows};
use graphite_db::planner::{LogicalOperator, LogicalOperatorKind, LogicalPlan};

/// Operator kinds along the probe spine, root first.
fn spine(plan: &LogicalPlan) -> Vec<LogicalOperatorKind> {
    let mut out = Vec::new();
    let mut op: Option<&LogicalOperator> = Some(&plan.root);
    while let Some(current) = op {
        out.push(current.kind());
        op = current.child(0);
    }
    out
}

// S2: both endpoints covered by one scan + extend; no hash join appears.
#[test]
fn single_rel_pattern_plans_as_scan_flatten_extend() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let plans = conn
        .enumerate_plans("MATCH (a:person)-[e:knows]->(b:person) RETURN e.date")
        .unwrap();
    let best = &plans[0];
    assert_eq!(
        spine(best),
        vec![
            LogicalOperatorKind::Projection,
            LogicalOperatorKind::Extend,
            LogicalOperatorKind::Flatten,
            LogicalOperatorKind::ScanNode,
        ]
    );
}

// S3: a primary-key equality turns the base scan into an index scan, and
// the remaining predicate stays pushed against it.
#[test]
fn primary_key_equality_uses_index_scan() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let plans = conn
        .enumerate_plans("MATCH (a:person) WHERE a.ID = 0 AND a.fName = 'Alice' RETURN a.gender")
        .unwrap();
    let best = &plans[0];
    assert_eq!(
        spine(best),
        vec![
            LogicalOperatorKind::Projection,
            LogicalOperatorKind::ScanNodeProperty,
            LogicalOperatorKind::Filter,
            LogicalOperatorKind::ScanNodeProperty,
            LogicalOperatorKind::IndexScanNode,
        ]
    );
}

// Without a key equality, both predicates stay as filters above their
// property scans, applied as soon as their inputs exist.
#[test]
fn filters_apply_eagerly_on_full_scans() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let plans = conn
        .enumerate_plans("MATCH (a:person) WHERE a.ID < 0 AND a.fName = 'Alice' RETURN a.gender")
        .unwrap();
    let best = &plans[0];
    assert_eq!(
        spine(best),
        vec![
            LogicalOperatorKind::Projection,
            LogicalOperatorKind::ScanNodeProperty,
            LogicalOperatorKind::Filter,
            LogicalOperatorKind::ScanNodeProperty,
            LogicalOperatorKind::Filter,
            LogicalOperatorKind::ScanNodeProperty,
            LogicalOperatorKind::ScanNode,
        ]
    );
}

// Property of the enumerator: every returned plan computes the same
// multiset of output tuples.
#[test]
fn all_enumerated_plans_agree() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let text = "MATCH (a:person)-[e1:knows]->(b:person)-[e2:knows]->(c:person) \
                RETURN a.ID, b.ID, c.ID";
    let plans = conn.enumerate_plans(text).unwrap();
    assert!(!plans.is_empty());
    let reference = sorted_rows(&conn.query(text));
    assert_eq!(reference.len(), 5);
    for plan in &plans {
        let result = conn.execute_plan(plan);
        assert!(result.success, "{}\n{}", result.error_message, plan.describe());
        assert_eq!(sorted_rows(&result), reference, "plan disagrees:\n{}", plan.describe());
    }
}

#[test]
fn recursive_patterns_plan_a_recursive_extend() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let plans = conn
        .enumerate_plans("MATCH (a:person)-[:knows*2..2]->(c:person) WHERE a.ID = 0 RETURN c.ID")
        .unwrap();
    let kinds = spine(&plans[0]);
    assert!(kinds.contains(&LogicalOperatorKind::RecursiveExtend), "{kinds:?}");
    assert!(kinds.contains(&LogicalOperatorKind::IndexScanNode), "{kinds:?}");
}

#[test]
fn disconnected_patterns_fail_to_plan() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let err = conn
        .enumerate_plans("MATCH (a:person), (b:organisation) RETURN a.ID, b.ID")
        .unwrap_err();
    assert!(matches!(err, graphite_db::GraphError::Plan(_)));
}

#[test]
fn best_plan_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let text = "MATCH (a:person)-[e:knows]->(b:person) WHERE a.age > 0 RETURN a.ID, b.ID";
    let first = conn.enumerate_plans(text).unwrap()[0].describe();
    for _ in 0..5 {
        assert_eq!(conn.enumerate_plans(text).unwrap()[0].describe(), first);
    }
}

#[test]
fn limit_plans_through_multiplicity_reducer() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let plans =
        conn.enumerate_plans("MATCH (a:person) RETURN a.fName SKIP 1 LIMIT 2").unwrap();
    let kinds = spine(&plans[0]);
    assert_eq!(kinds[0], LogicalOperatorKind::Limit);
    assert_eq!(kinds[1], LogicalOperatorKind::Skip);
    assert_eq!(kinds[2], LogicalOperatorKind::MultiplicityReducer);
    assert_eq!(kinds[3], LogicalOperatorKind::Projection);
}
