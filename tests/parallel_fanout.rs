mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::MockConnector;
use sqlcell::prelude::*;

fn request(sql: &str, value: HostValue, workers: usize) -> ParallelQuery {
    ParallelQuery {
        sql: sql.to_string(),
        name: "v".to_string(),
        value,
        workers,
    }
}

fn ints(values: &[i64]) -> HostValue {
    HostValue::List(values.iter().map(|v| HostValue::Int(*v)).collect())
}

#[tokio::test]
async fn test_fan_out_merges_all_partitions() {
    let connector = MockConnector::new();
    let mut main = connector.connect().await.unwrap();

    let report = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("USING v SELECT N FROM T WHERE N = :v", ints(&[1, 2, 3, 4, 5]), 3),
    )
    .await
    .unwrap();

    assert_eq!(report.partitions, 5);
    assert_eq!(report.table.len(), 15);
    assert_eq!(report.table.index(), (0..15).collect::<Vec<_>>().as_slice());
    assert_eq!(report.issued_sql.len(), 5);
    assert!(report.issued_sql.contains(&"SELECT N FROM T WHERE N = 4".to_string()));

    // One connection for the caller plus one per partition.
    assert_eq!(connector.state.connects.load(Ordering::SeqCst), 6);
    assert!(connector.state.peak_fetching.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_rows_are_a_set_union_of_partitions() {
    let connector = MockConnector::new();
    let mut main = connector.connect().await.unwrap();

    let report = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("SELECT N FROM T WHERE N = :v", ints(&[3, 1, 2]), 2),
    )
    .await
    .unwrap();

    let mut values: Vec<i64> = report
        .table
        .rows()
        .iter()
        .map(|row| match row[0] {
            Cell::Int(v) => v,
            ref other => panic!("unexpected cell {other:?}"),
        })
        .collect();
    values.sort();
    assert_eq!(values, vec![1, 2, 2, 3, 3, 3]);
}

#[tokio::test]
async fn test_one_failing_partition_fails_the_query() {
    let connector = MockConnector::failing_on("= 4");
    let mut main = connector.connect().await.unwrap();

    let err = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("SELECT N FROM T WHERE N = :v", ints(&[1, 2, 3, 4, 5]), 3),
    )
    .await
    .unwrap_err();

    match err {
        SqlCellError::Partition(message) => assert!(message.contains("undefined name")),
        other => panic!("expected a partition error, got {other}"),
    }
}

#[tokio::test]
async fn test_failure_stops_pending_partitions() {
    let connector = MockConnector::failing_on("= 2");
    let mut main = connector.connect().await.unwrap();
    let values: Vec<i64> = (1..=10).collect();

    let err = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("SELECT N FROM T WHERE N = :v", ints(&values), 2),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SqlCellError::Partition(_)), "got {err}");

    // The caller's session plus the partitions already running.
    let connects = connector.state.connects.load(Ordering::SeqCst);
    assert!(connects <= 4, "{connects} connections opened");
    let logged = connector.state.logged();
    assert!(!logged.contains(&"SELECT N FROM T WHERE N = 10".to_string()));
}

#[tokio::test]
async fn test_single_worker_runs_serially_on_caller_session() {
    let connector = MockConnector::new();
    let mut main = connector.connect().await.unwrap();

    for workers in [0, 1] {
        let report = run_parallel(
            main.as_mut(),
            Arc::new(connector.clone()),
            request("USING v SELECT N FROM T WHERE N = :v", ints(&[2, 1, 3]), workers),
        )
        .await
        .unwrap();

        assert_eq!(report.partitions, 3);
        assert_eq!(report.table.len(), 6);
        assert_eq!(report.table.index(), (0..6).collect::<Vec<_>>().as_slice());
        assert_eq!(
            report.issued_sql,
            vec![
                "SELECT N FROM T WHERE N = 2",
                "SELECT N FROM T WHERE N = 1",
                "SELECT N FROM T WHERE N = 3",
            ]
        );
    }
    assert_eq!(connector.state.connects.load(Ordering::SeqCst), 1);
    assert_eq!(connector.state.peak_fetching.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_single_worker_error_stops_the_run() {
    let connector = MockConnector::failing_on("= 2");
    let mut main = connector.connect().await.unwrap();

    let err = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("SELECT N FROM T WHERE N = :v", ints(&[1, 2, 3]), 1),
    )
    .await
    .unwrap_err();

    assert_eq!(err.sqlcode(), Some("-204"));
    assert!(!connector.state.logged().iter().any(|sql| sql.ends_with("= 3")));
}

#[tokio::test]
async fn test_nested_list_elements_are_joined() {
    let connector = MockConnector::new();
    let mut main = connector.connect().await.unwrap();

    let value = HostValue::List(vec![ints(&[1, 2]), ints(&[3])]);
    let report = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("SELECT N FROM T WHERE N IN (:v)", value, 2),
    )
    .await
    .unwrap();

    assert_eq!(report.table.len(), 1 + 2 + 3);
    let logged = connector.state.logged();
    // The validation prepare uses the first inner element.
    assert_eq!(logged[0], "SELECT N FROM T WHERE N IN (1)");
    assert!(logged.contains(&"SELECT N FROM T WHERE N IN (1,2)".to_string()));
}

#[tokio::test]
async fn test_empty_result_is_an_empty_table() {
    let connector = MockConnector::new();
    let mut main = connector.connect().await.unwrap();

    let report = run_parallel(
        main.as_mut(),
        Arc::new(connector.clone()),
        request("SELECT N FROM EMPTY WHERE N = :v", ints(&[1, 2]), 2),
    )
    .await
    .unwrap();

    assert!(report.table.is_empty());
    assert_eq!(report.partitions, 2);
}

#[tokio::test]
async fn test_preconditions() {
    let connector = MockConnector::new();
    let mut main = connector.connect().await.unwrap();
    let shared: Arc<dyn Connector> = Arc::new(connector.clone());

    let cases = [
        request("DELETE FROM T WHERE N = :v", ints(&[1]), 4),
        request("SELECT N FROM T WHERE N = :other", ints(&[1]), 4),
        request("SELECT N FROM T WHERE N = :v", HostValue::Int(1), 4),
        request("SELECT N FROM T WHERE N = :v", ints(&[]), 4),
    ];
    for case in cases {
        let err = run_parallel(main.as_mut(), Arc::clone(&shared), case)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlCellError::Parallel(_)), "got {err}");
    }

    // Nothing reached a worker connection.
    assert_eq!(connector.state.connects.load(Ordering::SeqCst), 1);
}
