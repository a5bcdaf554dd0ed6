// End-to-end statement tests over the tinysnb fixture: scans, filters,
// joins, recursive patterns, aggregation, ordering, updates, rollback, and
// the prepared-statement surface.

mod common;

use common::{open_tinysnb, render_rows, sorted_rows};
use graphite_db::common::Value;
use std::collections::HashMap;

#[test]
fn scan_with_primary_key_filter() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("MATCH (a:person) WHERE a.ID = 0 RETURN a.fName, a.age");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["Alice|35"]);
    assert_eq!(result.column_names(), vec!["a.fName", "a.age"]);
}

#[test]
fn predicate_with_three_valued_logic() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result =
        conn.query("MATCH (a:person) WHERE a.age > 100 OR a.isStudent RETURN count(*)");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["3"]);
}

#[test]
fn one_hop_pattern_returns_rel_property() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("MATCH (a:person)-[e:knows]->(b:person) RETURN a.ID, b.ID, e.date");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(
        sorted_rows(&result),
        vec![
            "0|2|2021-06-30",
            "0|3|2021-06-30",
            "2|5|1950-05-14",
            "3|5|1950-05-14",
            "5|7|2000-01-01",
            "7|8|1905-12-12",
        ]
    );
}

#[test]
fn backward_extension() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("MATCH (a:person)-[e:knows]->(b:person) WHERE b.ID = 5 RETURN a.ID");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(sorted_rows(&result), vec!["2", "3"]);
}

#[test]
fn two_hop_chain() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn
        .query("MATCH (a:person)-[e1:knows]->(b:person)-[e2:knows]->(c:person) RETURN a.ID, c.ID");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(sorted_rows(&result), vec!["0|5", "0|5", "2|7", "3|7", "5|8"]);
}

// S1: update then read back through a fresh statement.
#[test]
fn set_property_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let update = conn.query("MATCH (a:person) WHERE a.ID = 0 SET a.age = 20 + 50");
    assert!(update.success, "{}", update.error_message);
    let read = conn.query("MATCH (a:person) WHERE a.ID = 0 RETURN a.age");
    assert_eq!(render_rows(&read), vec!["70"]);
}

// S4: CREATE across two labels, then scan one of them.
#[test]
fn create_nodes_and_scan() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let create = conn
        .query("CREATE (:person {ID: 32, fName: 'A'}), (:organisation {ID: 33, orgCode: 144})");
    assert!(create.success, "{}", create.error_message);
    let read = conn.query("MATCH (a:organisation) RETURN a.ID, a.orgCode");
    assert!(read.success, "{}", read.error_message);
    assert_eq!(sorted_rows(&read), vec!["1|325", "33|144", "4|934", "6|824"]);
}

// S5: an oversized variable-width value fails the statement and leaves the
// stored value untouched.
#[test]
fn oversized_string_update_fails_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let elements: Vec<String> = (0..600).map(|i| (100_000 + i).to_string()).collect();
    let huge = format!("[{}]", elements.join(","));
    assert!(huge.len() > 4096);
    let update = conn.query(&format!("MATCH (a:person) WHERE a.ID = 0 SET a.fName = '{huge}'"));
    assert!(!update.success);
    assert!(update.error_message.contains("Runtime"), "{}", update.error_message);
    assert!(update.error_message.contains("list overflow"), "{}", update.error_message);
    let read = conn.query("MATCH (a:person) WHERE a.ID = 0 RETURN a.fName");
    assert_eq!(render_rows(&read), vec!["Alice"]);
}

// S6: fixed-length recursive pattern with path-count multiplicities.
#[test]
fn recursive_two_hops_emits_path_multiplicities() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("MATCH (a:person)-[:knows*2..2]->(c:person) WHERE a.ID = 0 RETURN c.ID");
    assert!(result.success, "{}", result.error_message);
    // ID 5 is reachable over 0->2->5 and 0->3->5: once per distinct path.
    assert_eq!(sorted_rows(&result), vec!["5", "5"]);
}

#[test]
fn recursive_range_with_zero_lower_bound_includes_source() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result =
        conn.query("MATCH (a:person)-[:knows*0..1]->(c:person) WHERE a.ID = 0 RETURN c.ID");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(sorted_rows(&result), vec!["0", "2", "3"]);
}

#[test]
fn recursive_path_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query(
        "MATCH (a:person)-[e:knows*2..2]->(c:person) WHERE a.ID = 0 RETURN c.ID, length(e), path(e)",
    );
    assert!(result.success, "{}", result.error_message);
    let rows = result.rows();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row[1], Value::Int64(2));
        // Alternating node/rel entries: n, e, n, e, n.
        let Value::List(path) = &row[2] else { panic!("expected a path list") };
        assert_eq!(path.len(), 5);
        assert!(matches!(path[0], Value::Node(_)));
        assert!(matches!(path[1], Value::Rel(_)));
        assert!(matches!(path[4], Value::Node(_)));
    }
}

#[test]
fn aggregate_with_grouping() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("MATCH (a:person) RETURN a.gender, count(*)");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(sorted_rows(&result), vec!["1|3", "2|5"]);

    let result = conn.query("MATCH (a:person) RETURN min(a.age), max(a.age), avg(a.eyeSight)");
    assert!(result.success, "{}", result.error_message);
    let rows = result.rows();
    assert_eq!(rows[0][0], Value::Int64(20));
    assert_eq!(rows[0][1], Value::Int64(83));
    let Value::Double(avg) = rows[0][2] else { panic!("expected a double") };
    assert!((avg - 4.8625).abs() < 1e-9);
}

#[test]
fn order_by_skip_limit() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn
        .query("MATCH (a:person) RETURN a.fName ORDER BY a.age ASC, a.fName ASC LIMIT 3");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["Dan", "Elizabeth", "Farooq"]);

    let result =
        conn.query("MATCH (a:person) RETURN a.fName ORDER BY a.age ASC, a.fName ASC SKIP 6");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["Carol", "Hubert"]);
}

#[test]
fn with_clause_pipelines_projection() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result =
        conn.query("MATCH (a:person) WITH a.age AS age WHERE age > 40 RETURN age ORDER BY age");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["45", "83"]);
}

#[test]
fn unwind_expands_lists() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("UNWIND [1, 2, 3] AS x RETURN x");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(sorted_rows(&result), vec!["1", "2", "3"]);
}

#[test]
fn delete_removes_node_from_scans_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let delete = conn.query("MATCH (a:person) WHERE a.ID = 10 DELETE a");
    assert!(delete.success, "{}", delete.error_message);
    let count = conn.query("MATCH (a:person) RETURN count(*)");
    assert_eq!(render_rows(&count), vec!["7"]);
    let lookup = conn.query("MATCH (a:person) WHERE a.ID = 10 RETURN a.fName");
    assert_eq!(lookup.num_tuples(), 0);
}

#[test]
fn prepared_statement_with_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let statement = conn.prepare("MATCH (a:person) WHERE a.ID = $id RETURN a.fName");
    assert!(statement.success, "{}", statement.error_message);

    let mut params = HashMap::new();
    params.insert("id".to_string(), Value::Int64(3));
    let result = conn.execute_with_params(&statement, params);
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["Carol"]);

    // Re-execution with different parameters reuses the compiled plan.
    let mut params = HashMap::new();
    params.insert("id".to_string(), Value::Int64(7));
    assert_eq!(render_rows(&conn.execute_with_params(&statement, params)), vec!["Elizabeth"]);

    // Missing parameters fail the statement without executing.
    let missing = conn.execute_with_params(&statement, HashMap::new());
    assert!(!missing.success);
    assert!(missing.error_message.contains("parameter"));
}

#[test]
fn result_header_is_stable_across_preparation() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let text = "MATCH (a:person) WHERE a.ID = 0 RETURN a.fName, a.age";
    let first = conn.prepare(text);
    let second = conn.prepare(text);
    assert_eq!(first.result_header(), second.result_header());
    let executed = conn.execute(&first);
    assert_eq!(
        executed.header.as_slice(),
        first.result_header().as_slice(),
        "execution must not change the header"
    );
}

#[test]
fn runtime_errors_fail_the_statement() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("MATCH (a:person) WHERE a.ID = 0 RETURN a.age / 0");
    assert!(!result.success);
    assert!(result.error_message.contains("division by zero"), "{}", result.error_message);
}

#[test]
fn bind_and_parse_errors_surface_without_execution() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();

    let parse = conn.query("MATCH (a:person RETURN a");
    assert!(!parse.success);
    assert!(parse.error_message.contains("Parse error"), "{}", parse.error_message);

    let bind = conn.query("MATCH (a:person) RETURN a.salary");
    assert!(!bind.success);
    assert!(bind.error_message.contains("Bind error"), "{}", bind.error_message);
}

#[test]
fn explain_produces_a_plan_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("EXPLAIN MATCH (a:person) WHERE a.ID = 0 RETURN a.age");
    assert!(result.success, "{}", result.error_message);
    assert!(result.summary.is_explain);
    assert_eq!(result.num_tuples(), 0);
    assert!(result.summary.plan_description.contains("INDEX_SCAN_NODE"));
}

#[test]
fn profile_reports_operator_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    let result = conn.query("PROFILE MATCH (a:person) RETURN count(*)");
    assert!(result.success, "{}", result.error_message);
    assert!(result.summary.is_profile);
    assert_eq!(render_rows(&result), vec!["8"]);
    assert!(result.summary.plan_description.contains("tuples"));
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open_tinysnb(dir.path());
        let conn = db.connect();
        let update = conn.query("MATCH (a:person) WHERE a.ID = 0 SET a.age = 99");
        assert!(update.success, "{}", update.error_message);
        db.checkpoint().unwrap();
    }
    let db = graphite_db::Database::open(
        graphite_db::DatabaseConfig::new(dir.path()),
        graphite_db::SystemConfig::default(),
    )
    .unwrap();
    let conn = db.connect();
    let read = conn.query("MATCH (a:person) WHERE a.ID = 0 RETURN a.fName, a.age");
    assert!(read.success, "{}", read.error_message);
    assert_eq!(render_rows(&read), vec!["Alice|99"]);
}

#[test]
fn buffer_pools_resize_at_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let conn = db.connect();
    db.resize_buffer_manager(8 * 1024 * 1024, 8 * 1024 * 1024).unwrap();
    let result = conn.query("MATCH (a:person) RETURN count(*)");
    assert!(result.success, "{}", result.error_message);
    assert_eq!(render_rows(&result), vec!["8"]);
}

#[test]
fn single_threaded_execution_matches_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_tinysnb(dir.path());
    let mut conn = db.connect();
    let text = "MATCH (a:person)-[e:knows]->(b:person) RETURN a.ID, b.ID";
    let parallel = sorted_rows(&conn.query(text));
    conn.set_max_num_threads(1);
    let sequential = sorted_rows(&conn.query(text));
    assert_eq!(parallel, sequential);
}
