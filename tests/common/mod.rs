// Shared fixture: a small social-network graph of persons, organisations,
// and knows edges, loaded through the bulk API.

use chrono::NaiveDate;
use graphite_db::common::{Cardinality, LogicalType, Value};
use graphite_db::{Database, DatabaseConfig, SystemConfig};
use std::path::Path;
use std::sync::Arc;

pub fn date(y: i32, m: u32, d: u32) -> Value {
    Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

pub fn open_tinysnb(path: &Path) -> Arc<Database> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let db = Database::open(DatabaseConfig::new(path), SystemConfig::default()).unwrap();

    db.create_node_label(
        "person",
        vec![
            ("ID".to_string(), LogicalType::Int64),
            ("fName".to_string(), LogicalType::String),
            ("gender".to_string(), LogicalType::Int64),
            ("isStudent".to_string(), LogicalType::Bool),
            ("age".to_string(), LogicalType::Int64),
            ("eyeSight".to_string(), LogicalType::Double),
            ("birthdate".to_string(), LogicalType::Date),
        ],
        "ID",
        false,
    )
    .unwrap();
    db.create_node_label(
        "organisation",
        vec![
            ("ID".to_string(), LogicalType::Int64),
            ("name".to_string(), LogicalType::String),
            ("orgCode".to_string(), LogicalType::Int64),
        ],
        "ID",
        false,
    )
    .unwrap();
    db.create_rel_label(
        "knows",
        vec![("date".to_string(), LogicalType::Date)],
        "person",
        "person",
        Cardinality::ManyMany,
    )
    .unwrap();

    let persons: Vec<(i64, &str, i64, bool, i64, f64, Value)> = vec![
        (0, "Alice", 1, true, 35, 5.0, date(1900, 1, 1)),
        (2, "Bob", 2, true, 30, 5.1, date(1900, 1, 3)),
        (3, "Carol", 1, false, 45, 5.0, date(1940, 6, 22)),
        (5, "Dan", 2, false, 20, 4.8, date(1950, 7, 23)),
        (7, "Elizabeth", 1, false, 20, 4.7, date(1980, 10, 26)),
        (8, "Farooq", 2, true, 25, 4.5, date(1980, 10, 26)),
        (9, "Greg", 2, false, 40, 4.9, date(1980, 10, 26)),
        (10, "Hubert", 2, false, 83, 4.9, date(1972, 7, 31)),
    ];
    for (id, name, gender, is_student, age, eye_sight, birthdate) in persons {
        db.insert_node(
            "person",
            vec![
                Value::Int64(id),
                Value::String(name.to_string()),
                Value::Int64(gender),
                Value::Bool(is_student),
                Value::Int64(age),
                Value::Double(eye_sight),
                birthdate,
            ],
        )
        .unwrap();
    }

    for (id, name, code) in [(1, "ABFsUni", 325), (4, "CsWork", 934), (6, "DEsWork", 824)] {
        db.insert_node(
            "organisation",
            vec![Value::Int64(id), Value::String(name.to_string()), Value::Int64(code)],
        )
        .unwrap();
    }

    let knows: Vec<(i64, i64, Value)> = vec![
        (0, 2, date(2021, 6, 30)),
        (0, 3, date(2021, 6, 30)),
        (2, 5, date(1950, 5, 14)),
        (3, 5, date(1950, 5, 14)),
        (5, 7, date(2000, 1, 1)),
        (7, 8, date(1905, 12, 12)),
    ];
    for (src, dst, when) in knows {
        db.insert_rel("knows", &Value::Int64(src), &Value::Int64(dst), vec![when]).unwrap();
    }
    db
}

/// Rows rendered as `a|b|c` strings, for compact assertions.
pub fn render_rows(result: &graphite_db::QueryResult) -> Vec<String> {
    result
        .rows()
        .iter()
        .map(|row| {
            row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|")
        })
        .collect()
}

pub fn sorted_rows(result: &graphite_db::QueryResult) -> Vec<String> {
    let mut rows = render_rows(result);
    rows.sort();
    rows
}
