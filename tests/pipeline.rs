mod common;

use std::{cell::RefCell, collections::HashMap, rc::Rc, str::FromStr};

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tabflow::{
    batch::Batches,
    cursor::{BoxCursor, IterCursor, RowCursor, collect_rows, drain},
    data::Value,
    decorators::{Counting, Filter, Inspect, Limit, Notify, PromoteHeader, Rename, WarmStart},
    error::CursorError,
    mapped::MappedCursor,
    projection::{ComputedColumn, Project, TransformColumns},
    schema::{ColumnType, describe_columns},
    transform::{
        TransformEntry, TransformGroup, TransformRegistry,
        parsers::{parse_decimal_loose, parse_int_loose, parse_mmddyyyy},
    },
    union::{DistinctColumns, Union, concat},
};

use common::{CloseTracker, numbered_cursor, string_cursor};

fn integers(values: impl IntoIterator<Item = i64>) -> Vec<Value> {
    values.into_iter().map(Value::Integer).collect()
}

#[test]
fn header_promotion_skips_placeholder_row() {
    let columns = describe_columns([
        ("a", ColumnType::String),
        ("b", ColumnType::String),
        ("c", ColumnType::String),
    ]);
    let mut rows = vec![
        vec![Value::from("x"), Value::from("y"), Value::from("z")],
        vec![
            Value::from("Header1"),
            Value::from("Header2"),
            Value::from("Header3"),
        ],
    ];
    rows.extend((1..=100).map(|i| {
        vec![
            Value::Integer(i),
            Value::from(format!("v{i}")),
            Value::Null,
        ]
    }));
    let source = IterCursor::new(columns, rows);
    let mut promoted = PromoteHeader::new(source, 2).unwrap();
    let names = (0..promoted.field_count())
        .map(|o| promoted.name(o).unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Header1", "Header2", "Header3"]);
    let data = collect_rows(&mut promoted).unwrap();
    assert_eq!(data.len(), 100);
    assert_eq!(data[0][0], Value::Integer(1));
    assert_eq!(data[99][0], Value::Integer(100));
}

#[test]
fn union_of_three_cursors_has_fifty_rows() {
    let first = string_cursor(&["id", "name"], vec![vec!["1", "first"]]);
    let second = string_cursor(&["ID", "NAME"], vec![vec!["2", "second"]]);
    let third = numbered_cursor(&["id", "name"], 48);
    let cursors: Vec<BoxCursor<'_>> = vec![Box::new(first), Box::new(second), Box::new(third)];
    let mut joined = concat(cursors).unwrap();
    let rows = collect_rows(&mut joined).unwrap();
    assert_eq!(rows.len(), 50);
    assert_eq!(rows[1], vec![Value::from("2"), Value::from("second")]);
}

#[test]
fn mapping_an_identical_schema_is_identity() {
    let columns = describe_columns([
        ("id", ColumnType::Integer),
        ("amount", ColumnType::Decimal(None)),
        ("when", ColumnType::Date),
        ("note", ColumnType::String),
        ("ok", ColumnType::Boolean),
    ]);
    let rows = (0..20)
        .map(|i| {
            vec![
                Value::Integer(i),
                Value::Decimal(Decimal::new(i * 125, 2)),
                Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap()),
                if i % 3 == 0 { Value::Null } else { Value::from(format!("n{i}")) },
                if i % 4 == 0 { Value::Null } else { Value::Boolean(i % 2 == 0) },
            ]
        })
        .collect::<Vec<_>>();
    let source = IterCursor::new(columns.clone(), rows.clone());
    let group = TransformGroup::standard();
    let mut mapped = MappedCursor::new(source, columns, &group).unwrap();
    assert_eq!(collect_rows(&mut mapped).unwrap(), rows);
}

#[test]
fn unmatched_destination_columns_read_null() {
    let source = numbered_cursor(&["a", "b"], 5);
    let destination = describe_columns([
        ("b", ColumnType::Integer),
        ("zzz", ColumnType::Integer),
        ("A", ColumnType::String),
    ]);
    let group = TransformGroup::standard();
    let mut mapped = MappedCursor::new(source, destination, &group).unwrap();
    let rows = collect_rows(&mut mapped).unwrap();
    assert_eq!(rows.len(), 5);
    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as i64;
        assert_eq!(row[0], Value::Integer(r * 10 + 1));
        assert_eq!(row[1], Value::Null);
        assert_eq!(row[2], Value::from((r * 10).to_string()));
    }
}

#[test]
fn built_in_parsers_match_literal_cases() {
    assert_eq!(parse_int_loose("(89)").unwrap(), -89);
    assert_eq!(
        parse_decimal_loose("12.3545E-4").unwrap(),
        Decimal::from_str("0.00123545").unwrap()
    );
    assert_eq!(
        parse_decimal_loose("12.3545E4").unwrap(),
        Decimal::from(123545)
    );
    assert_eq!(parse_decimal_loose("12.3545E-40").unwrap(), Decimal::ZERO);
    assert_eq!(
        parse_mmddyyyy("10272017").unwrap(),
        NaiveDate::from_ymd_opt(2017, 10, 27).unwrap()
    );
    assert_eq!(
        parse_mmddyyyy("08012035").unwrap(),
        NaiveDate::from_ymd_opt(2035, 8, 1).unwrap()
    );
}

#[test]
fn diagnostics_survive_bad_integer() {
    let source = string_cursor(
        &["qty", "price", "label"],
        vec![vec!["abc", "12.3545E1", "widget"]],
    );
    let destination = describe_columns([
        ("qty", ColumnType::Integer),
        ("price", ColumnType::from_str("decimal(10,2)").unwrap()),
        ("label", ColumnType::String),
    ]);
    let group = TransformGroup::standard();
    let mut mapped = MappedCursor::new(source, destination, &group).unwrap();
    assert!(mapped.advance().unwrap());
    let records = mapped.diagnostics(false).unwrap();
    let qty = &records[0];
    assert!(qty.error.as_deref().unwrap().contains("format"), "{qty:?}");
    assert!(records[1].error.is_none());
    assert_eq!(records[1].destination_value_text.as_deref(), Some("123.55"));
    assert_eq!(records[2].destination_value_text.as_deref(), Some("widget"));

    assert!(mapped.value(0).unwrap_err().is_coercion());
    assert_eq!(
        mapped.value(1).unwrap(),
        Value::Decimal(Decimal::from_str("123.55").unwrap())
    );
}

#[test]
fn deep_decorator_chain_keeps_contract() {
    let seen = Rc::new(RefCell::new(0u64));
    let ticks = Rc::new(RefCell::new(Vec::new()));
    let mut aliases = HashMap::new();
    aliases.insert("a".to_string(), "first".to_string());

    let (source, closes) = CloseTracker::new(numbered_cursor(&["a", "b"], 30));
    let counted = Counting::new(source);
    let renamed = Rename::new(counted, &aliases).unwrap();
    let seen_in = Rc::clone(&seen);
    let inspected = Inspect::new(renamed, move |_row: &dyn RowCursor| {
        *seen_in.borrow_mut() += 1;
        Ok(())
    });
    let filtered = Filter::new(inspected, |row: &dyn RowCursor| {
        Ok(matches!(row.value_by_name("first")?, Value::Integer(v) if v % 20 == 0))
    });
    let projected = Project::append(
        filtered,
        vec![
            ComputedColumn::new("double", |row: &dyn RowCursor| match row.value(0)? {
                Value::Integer(v) => Ok(Value::Integer(v * 2)),
                other => Ok(other),
            })
            .with_type(ColumnType::Integer),
        ],
    )
    .unwrap();
    let ticks_in = Rc::clone(&ticks);
    let mut notify = Notify::new(Limit::new(projected, 10), 4, move |rows| {
        ticks_in.borrow_mut().push(rows)
    });

    assert_eq!(notify.name(0).unwrap(), "first");
    let rows = collect_rows(&mut notify).unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0], integers([20, 21, 40]));
    assert_eq!(*ticks.borrow(), vec![4, 8, 10]);
    assert!(*seen.borrow() >= 20);
    assert_eq!(closes.get(), 0);
    notify.close().unwrap();
    assert_eq!(closes.get(), 1);
    assert!(matches!(notify.value(0), Err(CursorError::NotPositioned)));
}

#[test]
fn concat_closes_each_source_as_it_is_exhausted() {
    let (first, first_closes) = CloseTracker::new(numbered_cursor(&["a"], 2));
    let (second, second_closes) = CloseTracker::new(numbered_cursor(&["a"], 2));
    let (third, third_closes) = CloseTracker::new(numbered_cursor(&["a"], 2));
    let cursors: Vec<BoxCursor<'_>> = vec![Box::new(first), Box::new(second), Box::new(third)];
    let mut joined = concat(cursors).unwrap();

    for _ in 0..3 {
        assert!(joined.advance().unwrap());
    }
    assert_eq!(first_closes.get(), 1);
    assert_eq!(second_closes.get(), 0);

    assert_eq!(drain(&mut joined).unwrap(), 3);
    assert!(second_closes.get() >= 1);
    assert_eq!(third_closes.get(), 1);

    joined.close().unwrap();
    assert!(first_closes.get() >= 1 && third_closes.get() >= 1);
}

#[test]
fn transform_columns_coerce_through_a_registry_group() {
    let mut registry = TransformRegistry::standard();
    registry.register(TransformGroup::new("shouty").with(TransformEntry::new(
        None,
        ColumnType::String.kind(),
        false,
        |value: &Value, _target: &ColumnType| Ok(Value::String(value.as_display().to_uppercase())),
    )));
    let group = registry.get("SHOUTY").unwrap();
    let source = string_cursor(&["word", "n"], vec![vec!["hi", "(5)"]]);
    let default = registry.get("default").unwrap();
    let mut transformed = TransformColumns::new(source)
        .coerce("word", group, ColumnType::String)
        .unwrap()
        .coerce(1usize, default, ColumnType::Integer)
        .unwrap();
    assert_eq!(transformed.declared_type(1).unwrap(), ColumnType::Integer);
    let rows = collect_rows(&mut transformed).unwrap();
    assert_eq!(rows, vec![vec![Value::from("HI"), Value::Integer(-5)]]);
}

#[test]
fn distinct_columns_then_union_realigns() {
    let left = string_cursor(&["k", "K", "v"], vec![vec!["1", "dup", "a"]]);
    let right = string_cursor(&["V", "k"], vec![vec!["b", "2"]]);
    let distinct = DistinctColumns::new(left).unwrap();
    let mut union = Union::new(distinct, right).unwrap();
    let rows = collect_rows(&mut union).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::from("1"), Value::from("a")],
            vec![Value::from("2"), Value::from("b")],
        ]
    );
}

#[test]
fn warm_start_presents_a_loaded_row() {
    let mut warm = WarmStart::prime(numbered_cursor(&["n"], 2)).unwrap();
    assert_eq!(warm.value(0).unwrap(), Value::Integer(10));
    assert!(warm.advance().unwrap());
    assert_eq!(warm.value(0).unwrap(), Value::Integer(10));
    assert_eq!(drain(&mut warm).unwrap(), 1);
}

fn layered(rows: usize, depth: usize) -> BoxCursor<'static> {
    let mut cursor: BoxCursor<'static> = Box::new(numbered_cursor(&["a", "b"], rows));
    let no_aliases = HashMap::new();
    for layer in 0..depth {
        cursor = match layer % 5 {
            0 => Box::new(Counting::new(cursor)),
            1 => Box::new(Rename::new(cursor, &no_aliases).unwrap()),
            2 => Box::new(Inspect::new(cursor, |_row: &dyn RowCursor| Ok(()))),
            3 => Box::new(Notify::new(cursor, 7, |_| {})),
            _ => Box::new(TransformColumns::new(cursor)),
        };
    }
    cursor
}

proptest! {
    #[test]
    fn decorator_stacks_preserve_row_count(rows in 0usize..200, depth in 0usize..12) {
        let mut cursor = layered(rows, depth);
        prop_assert_eq!(drain(&mut cursor).unwrap(), rows as u64);
        prop_assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn batches_deliver_every_row_once_in_order(
        rows in 0usize..150,
        batch_size in 1u64..25,
        read_limit in proptest::option::of(0usize..25),
    ) {
        let mut batches = Batches::new(numbered_cursor(&["n"], rows), batch_size).unwrap();
        let mut seen = Vec::new();
        let mut count = 0u64;
        while let Some(mut batch) = batches.next_batch().unwrap() {
            let mut read = 0usize;
            while read_limit.is_none_or(|limit| read < limit) && batch.advance().unwrap() {
                seen.push(batch.value(0).unwrap());
                read += 1;
            }
            count += 1;
        }
        let expected_batches = (rows as u64).div_ceil(batch_size);
        prop_assert_eq!(count, expected_batches);
        let expected: Vec<Value> = (1..=rows)
            .filter(|r| match read_limit {
                None => true,
                Some(limit) => ((r - 1) as u64 % batch_size) < limit as u64,
            })
            .map(|r| Value::Integer((r * 10) as i64))
            .collect();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(batches.rows_consumed(), rows as u64);
    }
}
