use shardjoin_core::{
    Batch, ColumnSpec, ColumnVectorType, ConcurrentHashJoin, JoinError, JoinKind, JoinSettings,
    JoinStrictness, LocalHashJoin, LocalJoinOptions, OverflowMode, SizeLimits, TableJoin, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn build_schema() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("id", ColumnVectorType::Int64),
        ColumnSpec::new("name", ColumnVectorType::Text),
    ]
}

fn probe_schema() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("id", ColumnVectorType::Int64),
        ColumnSpec::new("qty", ColumnVectorType::Int32),
    ]
}

fn build_batch(rows: &[(Option<i64>, &str)]) -> Batch {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|&(id, name)| vec![Value::from(id), Value::from(name)])
        .collect();
    Batch::from_rows(&rows, &build_schema()).expect("build batch")
}

fn probe_batch(rows: &[(Option<i64>, i64)]) -> Batch {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|&(id, qty)| vec![Value::from(id), Value::Integer(qty)])
        .collect();
    Batch::from_rows(&rows, &probe_schema()).expect("probe batch")
}

fn probe_ids(ids: &[i64]) -> Batch {
    let rows: Vec<(Option<i64>, i64)> = ids.iter().map(|&id| (Some(id), id * 10)).collect();
    probe_batch(&rows)
}

fn join_with(
    settings: JoinSettings,
    kind: JoinKind,
    strictness: JoinStrictness,
) -> ConcurrentHashJoin {
    ConcurrentHashJoin::with_local_engines(
        settings,
        TableJoin::on(kind, strictness, "id", "id").expect("table join"),
        &build_schema(),
        &probe_schema(),
    )
    .expect("concurrent join")
}

fn join(shards: usize, kind: JoinKind, strictness: JoinStrictness) -> ConcurrentHashJoin {
    join_with(JoinSettings::with_shard_count(shards), kind, strictness)
}

fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by_key(|row| format!("{row:?}"));
    rows
}

/// Nested-loop inner join over row values: probe columns, then build `name`.
fn reference_inner(build: &[Batch], probe: &Batch) -> Vec<Vec<Value>> {
    let build_rows: Vec<Vec<Value>> = build.iter().flat_map(Batch::to_rows).collect();
    let mut out = Vec::new();
    for probe_row in probe.to_rows() {
        if probe_row[0].is_null() {
            continue;
        }
        for build_row in &build_rows {
            if build_row[0] == probe_row[0] {
                let mut row = probe_row.clone();
                row.push(build_row[1].clone());
                out.push(row);
            }
        }
    }
    out
}

#[test]
fn two_shard_inner_join() {
    init_tracing();
    let join = join(2, JoinKind::Inner, JoinStrictness::All);
    assert!(join
        .add_joined_block(&build_batch(&[(Some(1), "a"), (Some(2), "b")]), false)
        .unwrap());
    let out = join.join_block(&probe_ids(&[1, 2, 3])).unwrap();

    assert_eq!(
        sorted(out.to_rows()),
        vec![
            vec![Value::Integer(1), Value::Integer(10), Value::from("a")],
            vec![Value::Integer(2), Value::Integer(20), Value::from("b")],
        ],
        "case=two_shard_inner_join"
    );
    assert_eq!(join.total_row_count(), 2);
}

#[test]
fn zero_shards_is_configuration_error() {
    let err = ConcurrentHashJoin::with_local_engines(
        JoinSettings::with_shard_count(0),
        TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "id").unwrap(),
        &build_schema(),
        &probe_schema(),
    )
    .unwrap_err();
    assert_eq!(err, JoinError::InvalidShardCount { count: 0 });
}

#[test]
fn unknown_probe_key_is_configuration_error() {
    let err = ConcurrentHashJoin::with_local_engines(
        JoinSettings::with_shard_count(2),
        TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "missing").unwrap(),
        &build_schema(),
        &probe_schema(),
    )
    .unwrap_err();
    assert!(err.is_configuration(), "err={err}");
}

#[test]
fn key_family_mismatch_is_configuration_error() {
    for probe_type in [ColumnVectorType::Float64, ColumnVectorType::Text] {
        let err = ConcurrentHashJoin::with_local_engines(
            JoinSettings::with_shard_count(4),
            TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "id").unwrap(),
            &build_schema(),
            &[ColumnSpec::new("id", probe_type)],
        )
        .unwrap_err();
        assert!(err.is_configuration(), "probe_type={probe_type} err={err}");
        assert!(
            matches!(err, JoinError::KeyTypeMismatch { ref build_key, .. } if build_key == "id"),
            "err={err}"
        );
    }
}

#[test]
fn key_family_mismatch_is_rejected_before_any_engine_is_built() {
    let table_join = TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "id").unwrap();
    let probe = vec![ColumnSpec::new("id", ColumnVectorType::Float64)];
    let mut engines_built = 0;
    let err = ConcurrentHashJoin::new(
        JoinSettings::with_shard_count(3),
        table_join.clone(),
        &build_schema(),
        &probe,
        |_| {
            engines_built += 1;
            LocalHashJoin::new(
                table_join.clone(),
                &build_schema(),
                &probe,
                LocalJoinOptions::default(),
            )
        },
    )
    .unwrap_err();
    assert!(matches!(err, JoinError::KeyTypeMismatch { .. }), "err={err}");
    assert_eq!(engines_built, 0);
}

#[test]
fn asof_column_family_mismatch_is_configuration_error() {
    let build_specs = vec![
        ColumnSpec::new("sym", ColumnVectorType::Text),
        ColumnSpec::new("ts", ColumnVectorType::Int64),
    ];
    let probe_specs = vec![
        ColumnSpec::new("sym", ColumnVectorType::Text),
        ColumnSpec::new("ts", ColumnVectorType::Float64),
    ];
    let table_join = TableJoin::new(
        JoinKind::Left,
        JoinStrictness::Asof,
        vec!["sym".to_owned(), "ts".to_owned()],
        vec!["sym".to_owned(), "ts".to_owned()],
    )
    .unwrap();
    let err = ConcurrentHashJoin::with_local_engines(
        JoinSettings::with_shard_count(2),
        table_join,
        &build_specs,
        &probe_specs,
    )
    .unwrap_err();
    assert!(
        matches!(err, JoinError::KeyTypeMismatch { ref probe_key, .. } if probe_key == "ts"),
        "err={err}"
    );
}

#[test]
fn integer_widths_share_a_key_family() {
    let probe_specs = vec![ColumnSpec::new("id", ColumnVectorType::Int16)];
    let join = ConcurrentHashJoin::with_local_engines(
        JoinSettings::with_shard_count(5),
        TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "id").unwrap(),
        &build_schema(),
        &probe_specs,
    )
    .unwrap();
    join.add_joined_block(&build_batch(&[(Some(1), "a"), (Some(2), "b")]), false)
        .unwrap();
    let probe = Batch::from_rows(
        &[vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)]],
        &probe_specs,
    )
    .unwrap();
    assert_eq!(join.join_block(&probe).unwrap().row_count(), 2);
}

#[test]
fn results_match_reference_for_several_shard_counts() {
    let blocks: Vec<Batch> = (0..5)
        .map(|block| {
            let rows: Vec<(Option<i64>, String)> = (0..40)
                .map(|i| {
                    let id = (block * 13 + i * 7) % 23;
                    let id = (id != 5).then_some(id);
                    (id, format!("b{block}r{i}"))
                })
                .collect();
            let rows: Vec<(Option<i64>, &str)> =
                rows.iter().map(|(id, name)| (*id, name.as_str())).collect();
            build_batch(&rows)
        })
        .collect();
    let probe_rows: Vec<(Option<i64>, i64)> = (0..60)
        .map(|i| ((i % 9 != 4).then_some(i % 30), i))
        .collect();
    let probe = probe_batch(&probe_rows);
    let expected = sorted(reference_inner(&blocks, &probe));
    assert!(!expected.is_empty());

    for shards in [1, 4, 17] {
        let join = join(shards, JoinKind::Inner, JoinStrictness::All);
        for block in &blocks {
            join.add_joined_block(block, false).unwrap();
        }
        assert_eq!(join.total_row_count(), 200, "shards={shards}");
        let out = join.join_block(&probe).unwrap();
        assert_eq!(sorted(out.to_rows()), expected, "shards={shards}");
    }
}

#[test]
fn output_is_shard_ordered_concatenation() {
    let join = join(4, JoinKind::Inner, JoinStrictness::All);
    let build: Vec<(Option<i64>, String)> =
        (0..32).map(|i| (Some(i), format!("n{i}"))).collect();
    let build: Vec<(Option<i64>, &str)> = build.iter().map(|(i, n)| (*i, n.as_str())).collect();
    join.add_joined_block(&build_batch(&build), false).unwrap();

    let probe = probe_ids(&(0..32).collect::<Vec<_>>());
    let out = join.join_block(&probe).unwrap();
    assert_eq!(out.row_count(), 32);

    let routing = join.routing(shardjoin_core::JoinSide::Probe);
    // The output keeps `id` first, so the probe routing applies to it.
    let shard_of_output = routing.route(&out).unwrap();
    assert!(
        shard_of_output.windows(2).all(|w| w[0] <= w[1]),
        "output rows not grouped by ascending shard: {shard_of_output:?}"
    );
}

#[test]
fn size_limit_throw_reports_current_counts() {
    let settings = JoinSettings {
        shard_count: 3,
        size_limits: SizeLimits {
            max_rows: 1,
            ..SizeLimits::default()
        },
        ..JoinSettings::default()
    };
    let join = join_with(settings, JoinKind::Inner, JoinStrictness::All);
    assert!(join
        .add_joined_block(&build_batch(&[(Some(1), "a")]), true)
        .unwrap());
    let err = join
        .add_joined_block(&build_batch(&[(Some(2), "b")]), true)
        .unwrap_err();
    match err {
        JoinError::SizeLimitExceeded {
            operator,
            rows,
            max_rows,
            ..
        } => {
            assert_eq!(operator, "JOIN");
            assert_eq!(rows, 2);
            assert_eq!(max_rows, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn size_limit_break_returns_false() {
    let settings = JoinSettings {
        shard_count: 2,
        size_limits: SizeLimits {
            max_rows: 2,
            max_bytes: 0,
            overflow_mode: OverflowMode::Break,
        },
        ..JoinSettings::default()
    };
    let join = join_with(settings, JoinKind::Inner, JoinStrictness::All);
    let two = build_batch(&[(Some(1), "a"), (Some(2), "b")]);
    assert!(join.add_joined_block(&two, true).unwrap());
    assert!(!join.add_joined_block(&two, true).unwrap());
    // Unchecked inserts always report true.
    assert!(join.add_joined_block(&two, false).unwrap());
    assert_eq!(join.total_row_count(), 6);
}

#[test]
fn always_empty_cases() {
    let inner = join(4, JoinKind::Inner, JoinStrictness::All);
    assert!(inner.always_returns_empty_set());
    inner
        .add_joined_block(&build_batch(&[(Some(9), "x")]), false)
        .unwrap();
    assert!(!inner.always_returns_empty_set());

    assert!(!join(4, JoinKind::Left, JoinStrictness::All).always_returns_empty_set());
    assert!(join(4, JoinKind::Right, JoinStrictness::All).always_returns_empty_set());
    assert!(!join(4, JoinKind::Inner, JoinStrictness::Anti).always_returns_empty_set());
}

#[test]
fn left_join_across_shards_pads_missing_rows() {
    let join = join(4, JoinKind::Left, JoinStrictness::All);
    join.add_joined_block(&build_batch(&[(Some(1), "a"), (Some(3), "c")]), false)
        .unwrap();
    let out = join
        .join_block(&probe_batch(&[(Some(1), 1), (Some(2), 2), (None, 3)]))
        .unwrap();
    assert_eq!(
        sorted(out.to_rows()),
        vec![
            vec![Value::Integer(1), Value::Integer(1), Value::from("a")],
            vec![Value::Integer(2), Value::Integer(2), Value::Null],
            vec![Value::Null, Value::Integer(3), Value::Null],
        ]
    );
}

#[test]
fn any_take_last_row_applies_per_key() {
    let settings = JoinSettings {
        shard_count: 4,
        any_take_last_row: true,
        ..JoinSettings::default()
    };
    let join = join_with(settings, JoinKind::Inner, JoinStrictness::Any);
    join.add_joined_block(&build_batch(&[(Some(1), "old"), (Some(2), "two")]), false)
        .unwrap();
    join.add_joined_block(&build_batch(&[(Some(1), "new")]), false)
        .unwrap();
    let out = join.join_block(&probe_ids(&[1, 2])).unwrap();
    assert_eq!(
        sorted(out.to_rows()),
        vec![
            vec![Value::Integer(1), Value::Integer(10), Value::from("new")],
            vec![Value::Integer(2), Value::Integer(20), Value::from("two")],
        ]
    );
}

#[test]
fn asof_join_across_shards() {
    let build_specs = vec![
        ColumnSpec::new("sym", ColumnVectorType::Text),
        ColumnSpec::new("ts", ColumnVectorType::Int64),
        ColumnSpec::new("price", ColumnVectorType::Float64),
    ];
    let probe_specs = vec![
        ColumnSpec::new("sym", ColumnVectorType::Text),
        ColumnSpec::new("ts", ColumnVectorType::Int64),
    ];
    let table_join = TableJoin::new(
        JoinKind::Inner,
        JoinStrictness::Asof,
        vec!["sym".to_owned(), "ts".to_owned()],
        vec!["sym".to_owned(), "ts".to_owned()],
    )
    .unwrap();
    let join = ConcurrentHashJoin::with_local_engines(
        JoinSettings::with_shard_count(8),
        table_join,
        &build_specs,
        &probe_specs,
    )
    .unwrap();

    let symbols = ["a", "b", "c", "d", "e", "f"];
    let mut build_rows = Vec::new();
    for (s, sym) in symbols.iter().enumerate() {
        for ts in [10_i64, 20, 30] {
            build_rows.push(vec![
                Value::from(*sym),
                Value::Integer(ts),
                Value::Float(s as f64 * 100.0 + ts as f64),
            ]);
        }
    }
    join.add_joined_block(&Batch::from_rows(&build_rows, &build_specs).unwrap(), false)
        .unwrap();

    let probe_rows: Vec<Vec<Value>> = symbols
        .iter()
        .map(|sym| vec![Value::from(*sym), Value::Integer(25)])
        .collect();
    let out = join
        .join_block(&Batch::from_rows(&probe_rows, &probe_specs).unwrap())
        .unwrap();
    let expected: Vec<Vec<Value>> = symbols
        .iter()
        .enumerate()
        .map(|(s, sym)| {
            vec![
                Value::from(*sym),
                Value::Integer(25),
                Value::Float(s as f64 * 100.0 + 20.0),
            ]
        })
        .collect();
    assert_eq!(sorted(out.to_rows()), sorted(expected), "case=asof_across_shards");
}

#[test]
fn check_types_of_keys_delegates() {
    let join = join(3, JoinKind::Inner, JoinStrictness::All);
    join.check_types_of_keys(&probe_schema()).unwrap();
    let err = join
        .check_types_of_keys(&[ColumnSpec::new("id", ColumnVectorType::Float64)])
        .unwrap_err();
    assert!(matches!(err, JoinError::KeyTypeMismatch { .. }), "err={err}");
}

#[test]
fn not_processed_rows_are_internal_errors() {
    let table_join = TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "id").unwrap();
    let options = LocalJoinOptions {
        max_joined_block_rows: Some(1),
        ..LocalJoinOptions::default()
    };
    let build = build_schema();
    let probe = probe_schema();
    let join = ConcurrentHashJoin::new(
        JoinSettings::with_shard_count(1),
        table_join.clone(),
        &build,
        &probe,
        |_| LocalHashJoin::new(table_join.clone(), &build, &probe, options),
    )
    .unwrap();
    join.add_joined_block(&build_batch(&[(Some(1), "a"), (Some(2), "b")]), false)
        .unwrap();

    // One output row fits; the second probe row is handed back.
    let err = join.join_block(&probe_ids(&[1, 2])).unwrap_err();
    assert!(err.is_internal(), "err={err}");
    // A single matching row stays within the bound.
    assert_eq!(join.join_block(&probe_ids(&[2])).unwrap().row_count(), 1);
}

#[test]
fn factory_errors_propagate() {
    let table_join = TableJoin::on(JoinKind::Inner, JoinStrictness::All, "id", "id").unwrap();
    let err = ConcurrentHashJoin::<LocalHashJoin>::new(
        JoinSettings::with_shard_count(3),
        table_join,
        &build_schema(),
        &probe_schema(),
        |shard| Err(JoinError::internal(format!("no engine for shard {shard}"))),
    )
    .unwrap_err();
    assert_eq!(err, JoinError::internal("no engine for shard 0"));
}

#[test]
fn settings_from_toml_drive_the_join() {
    let settings = JoinSettings::from_toml_str(
        r#"
        shard_count = 6
        non_joined_block_rows = 2

        [size_limits]
        max_rows = 100
        "#,
    )
    .unwrap();
    let join = join_with(settings, JoinKind::Right, JoinStrictness::All);
    assert_eq!(join.shard_count(), 6);
    assert_eq!(join.non_joined_rows().unwrap().unwrap().max_block_size(), 2);
}
