//! FILENAME: tests/test_session.rs
//! End-to-end drilling through `DrillSession` against the in-memory backend.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{SalesBackend, SalesFixture};
use drill_engine::{
    ApplyOutcome, BackendError, ControllerOptions, DrillError, DrillSession, ErrorScope,
    NodeState, RootStatus,
};
use pivot_engine::{
    leaf_columns, AggregationType, CellSource, ColumnAutoSizer, PivotConfig, PivotMode, Value,
    ValueSpec, TREE_COLUMN_KEY,
};

fn session(backend: SalesBackend) -> DrillSession<SalesBackend> {
    DrillSession::new(backend, ControllerOptions::default()).unwrap()
}

fn paged_session(backend: SalesBackend, page_size: usize) -> DrillSession<SalesBackend> {
    let options = ControllerOptions {
        page_size,
        ..ControllerOptions::default()
    };
    DrillSession::new(backend, options).unwrap()
}

async fn labels(session: &DrillSession<SalesBackend>) -> Vec<String> {
    session
        .read(|c| {
            c.visible_rows()
                .iter()
                .map(|row| row.cell_text(TREE_COLUMN_KEY).unwrap_or_default())
                .collect()
        })
        .await
}

async fn cell(session: &DrillSession<SalesBackend>, key: &str, accessor: &str) -> Option<String> {
    session.read(|c| c.node_cell(key, accessor)).await
}

// ============================================================================
// LOADING AND DRILLING
// ============================================================================

#[tokio::test]
async fn test_configure_loads_first_level() {
    let session = session(SalesBackend::sales());

    let outcome = session.configure(SalesFixture::grouped_config()).await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 3,
            has_more: false
        })
    );
    assert_eq!(labels(&session).await, vec!["North", "South", "East"]);
    assert!(session.read(|c| c.root_status() == RootStatus::Ready).await);
    assert_eq!(cell(&session, "North", "Sales").await.as_deref(), Some("39000"));
    assert_eq!(cell(&session, "East", "Sales").await.as_deref(), Some("28500"));
    assert_eq!(session.backend().request_count(), 1);
}

#[tokio::test]
async fn test_same_config_does_not_refetch() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let again = session.configure(SalesFixture::grouped_config()).await.unwrap();
    assert_eq!(again, None);
    assert_eq!(session.backend().request_count(), 1);
}

#[tokio::test]
async fn test_expand_collapse_and_reexpand() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let outcome = session.expand("North").await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 2,
            has_more: false
        })
    );
    assert_eq!(
        labels(&session).await,
        vec!["North", "Widget", "Gadget", "South", "East"]
    );
    assert_eq!(
        cell(&session, "North|||Widget", "Sales").await.as_deref(),
        Some("22000")
    );
    assert_eq!(
        session.read(|c| c.node_state("North")).await,
        Some(NodeState::ExpandedExhausted)
    );

    session.collapse("North").await.unwrap();
    assert_eq!(labels(&session).await, vec!["North", "South", "East"]);

    // Children are kept, so expanding again is local.
    assert_eq!(session.expand("North").await.unwrap(), None);
    assert_eq!(labels(&session).await.len(), 5);
    assert_eq!(session.backend().request_count(), 2);
}

#[tokio::test]
async fn test_toggle_drives_expand_and_collapse() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    assert!(matches!(
        session.toggle("South").await.unwrap(),
        Some(ApplyOutcome::Applied { added: 2, .. })
    ));
    assert_eq!(session.toggle("South").await.unwrap(), None);
    assert_eq!(
        session.read(|c| c.node_state("South")).await,
        Some(NodeState::Collapsed)
    );
}

#[tokio::test]
async fn test_leaf_level_is_not_expandable() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();
    session.expand("North").await.unwrap();

    let err = session.expand("North|||Widget").await.unwrap_err();
    assert!(matches!(err, DrillError::NotExpandable(_)));
    let err = session.expand("West").await.unwrap_err();
    assert!(matches!(err, DrillError::UnknownNode(_)));
}

#[tokio::test]
async fn test_expand_request_carries_parent_path() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();
    session.expand("South").await.unwrap();

    let requests = session.backend().requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].group_keys.is_empty());
    assert_eq!(requests[1].group_keys, vec!["South".to_string()]);
    assert_eq!(requests[1].level_field(), Some("Product"));
}

// ============================================================================
// PAGINATION
// ============================================================================

#[tokio::test]
async fn test_small_pages_use_load_more() {
    let session = paged_session(SalesBackend::sales(), 2);

    let outcome = session.configure(SalesFixture::grouped_config()).await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 2,
            has_more: true
        })
    );
    assert_eq!(labels(&session).await, vec!["North", "South", "Load more"]);

    let outcome = session.load_more("").await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 1,
            has_more: false
        })
    );
    assert_eq!(labels(&session).await, vec!["North", "South", "East"]);

    let windows: Vec<(usize, usize)> = session
        .backend()
        .requests()
        .iter()
        .map(|r| (r.start_row, r.end_row))
        .collect();
    assert_eq!(windows, vec![(0, 2), (2, 4)]);

    let err = session.load_more("").await.unwrap_err();
    assert!(matches!(err, DrillError::Exhausted(_)));
}

#[tokio::test]
async fn test_preview_caps_each_list() {
    let options = ControllerOptions {
        preview: true,
        preview_limit: 2,
        ..ControllerOptions::default()
    };
    let session = DrillSession::new(SalesBackend::sales(), options).unwrap();

    let outcome = session.configure(SalesFixture::grouped_config()).await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 2,
            has_more: false
        })
    );
    assert_eq!(labels(&session).await, vec!["North", "South"]);
    let request = &session.backend().requests()[0];
    assert_eq!((request.start_row, request.end_row), (0, 2));
}

#[tokio::test]
async fn test_flat_scroll_fetches_next_pages() {
    let session = paged_session(SalesBackend::sales(), 4);

    let outcome = session.configure(SalesFixture::flat_config()).await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 4,
            has_more: true
        })
    );

    assert_eq!(
        session.scroll(0).await,
        Some(ApplyOutcome::Applied {
            added: 4,
            has_more: true
        })
    );
    // Still more than a page away from the end.
    assert_eq!(session.scroll(0).await, None);
    assert_eq!(
        session.scroll(5).await,
        Some(ApplyOutcome::Applied {
            added: 2,
            has_more: false
        })
    );
    assert_eq!(session.scroll(9).await, None);

    assert_eq!(session.read(|c| c.flat_rows().len()).await, 10);
    assert_eq!(session.backend().request_count(), 3);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test]
async fn test_different_nodes_load_concurrently() {
    let backend = SalesBackend::sales()
        .with_delay(|req| (!req.group_keys.is_empty()).then(|| Duration::from_millis(20)));
    let session = session(backend);
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let (north, south) = tokio::join!(session.expand("North"), session.expand("South"));
    assert!(matches!(north, Ok(Some(ApplyOutcome::Applied { added: 2, .. }))));
    assert!(matches!(south, Ok(Some(ApplyOutcome::Applied { added: 2, .. }))));

    for key in ["North", "South"] {
        assert_eq!(
            session.read(|c| c.node_state(key)).await,
            Some(NodeState::ExpandedExhausted)
        );
    }
    assert_eq!(session.read(|c| c.node_state("East")).await, Some(NodeState::Collapsed));
}

#[tokio::test]
async fn test_duplicate_expand_while_loading_is_ignored() {
    let backend = SalesBackend::sales()
        .with_delay(|req| (!req.group_keys.is_empty()).then(|| Duration::from_millis(20)));
    let session = session(backend);
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let (first, second) = tokio::join!(session.expand("North"), session.expand("North"));
    assert!(matches!(first, Ok(Some(ApplyOutcome::Applied { .. }))));
    assert!(matches!(second, Ok(None)));
    assert_eq!(session.backend().request_count(), 2);
    assert_eq!(labels(&session).await.len(), 5);
}

#[tokio::test]
async fn test_reconfigure_discards_slow_root() {
    let backend = SalesBackend::sales().with_delay(|req| {
        (req.row_group_cols.first().map(String::as_str) == Some("Region"))
            .then(|| Duration::from_millis(50))
    });
    let session = session(backend);
    let by_product = PivotConfig {
        rows: vec!["Product".to_string()],
        ..SalesFixture::grouped_config()
    };

    let (slow, fast) = tokio::join!(session.configure(SalesFixture::grouped_config()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.configure(by_product).await
    });

    assert_eq!(slow.unwrap(), Some(ApplyOutcome::Stale));
    assert!(matches!(fast.unwrap(), Some(ApplyOutcome::Applied { added: 2, .. })));
    assert_eq!(labels(&session).await, vec!["Widget", "Gadget"]);
    assert!(session.read(|c| c.root_status() == RootStatus::Ready).await);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_node_failure_stays_on_that_node() {
    let backend = SalesBackend::sales().failing(|req| {
        (req.group_keys == ["South"]).then(|| BackendError::Transport("connection reset".into()))
    });
    let session = session(backend);
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let outcome = session.expand("South").await.unwrap();
    assert!(matches!(
        outcome,
        Some(ApplyOutcome::Failed {
            scope: ErrorScope::Node(ref key),
            ..
        }) if key == "South"
    ));
    assert_eq!(
        session.read(|c| c.node_state("South")).await,
        Some(NodeState::Collapsed)
    );
    let message = session
        .read(|c| c.last_error(&ErrorScope::Node("South".into())).map(str::to_string))
        .await;
    assert!(message.is_some_and(|m| m.contains("connection reset")));

    assert!(session.read(|c| c.root_status() == RootStatus::Ready).await);
    assert!(matches!(
        session.expand("North").await.unwrap(),
        Some(ApplyOutcome::Applied { .. })
    ));
}

#[tokio::test]
async fn test_root_failure_recovers_on_reload() {
    let failed_once = AtomicBool::new(false);
    let backend = SalesBackend::sales().failing(move |_| {
        (!failed_once.swap(true, Ordering::SeqCst))
            .then(|| BackendError::Rejected("warehouse offline".into()))
    });
    let session = session(backend);

    let outcome = session.configure(SalesFixture::grouped_config()).await.unwrap();
    assert!(matches!(
        outcome,
        Some(ApplyOutcome::Failed {
            scope: ErrorScope::Root,
            ..
        })
    ));
    assert!(
        session
            .read(|c| matches!(c.root_status(), RootStatus::Failed(m) if m.contains("warehouse offline")))
            .await
    );

    let outcome = session.reload().await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Applied { added: 3, .. }));
    assert!(session.read(|c| c.root_status() == RootStatus::Ready).await);
}

// ============================================================================
// SHAPES
// ============================================================================

#[tokio::test]
async fn test_pivoted_columns_and_values() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::pivoted_config()).await.unwrap();

    let accessors: Vec<String> = session
        .read(|c| {
            leaf_columns(c.columns())
                .iter()
                .map(|leaf| leaf.accessor_key.clone())
                .collect()
        })
        .await;
    assert_eq!(accessors, vec![TREE_COLUMN_KEY, "Q1|Sales", "Q2|Sales"]);

    assert_eq!(cell(&session, "North", "Q1|Sales").await.as_deref(), Some("18000"));
    assert_eq!(cell(&session, "East", "Q2|Sales").await.as_deref(), Some("19500"));
    // South sold nothing in Q2 Gadget, but still has Q2 Widget.
    assert_eq!(cell(&session, "South", "Q2|Sales").await.as_deref(), Some("14000"));
}

#[tokio::test]
async fn test_client_pivot_matches_backend_pivot() {
    let backend_session = session(SalesBackend::sales());
    let client_options = ControllerOptions {
        pivot_mode: PivotMode::Client,
        ..ControllerOptions::default()
    };
    let client_session = DrillSession::new(SalesBackend::sales().raw(), client_options).unwrap();

    backend_session
        .configure(SalesFixture::pivoted_config())
        .await
        .unwrap();
    client_session
        .configure(SalesFixture::pivoted_config())
        .await
        .unwrap();

    let backend_columns = backend_session.read(|c| c.columns().to_vec()).await;
    let client_columns = client_session.read(|c| c.columns().to_vec()).await;
    assert_eq!(backend_columns, client_columns);
    assert_eq!(labels(&backend_session).await, labels(&client_session).await);

    for region in ["North", "South", "East"] {
        for accessor in ["Q1|Sales", "Q2|Sales"] {
            assert_eq!(
                cell(&backend_session, region, accessor).await,
                cell(&client_session, region, accessor).await,
                "{region} {accessor}"
            );
        }
    }
}

#[tokio::test]
async fn test_grand_total_row() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let outcome = session.grand_total().await.unwrap();
    assert!(matches!(outcome, Some(ApplyOutcome::Applied { added: 1, .. })));
    let total = session
        .read(|c| c.grand_total().map(|row| row.value("Sales").clone()))
        .await;
    assert_eq!(total, Some(Value::Number(107500.0)));

    let request = session.backend().requests().pop().unwrap();
    assert!(request.row_group_cols.is_empty());
    assert!(request.totals_only);
    assert_eq!((request.start_row, request.end_row), (0, 1));
}

#[tokio::test]
async fn test_client_grand_total_sums_all_raw_rows() {
    let options = ControllerOptions {
        page_size: 4,
        pivot_mode: PivotMode::Client,
        ..ControllerOptions::default()
    };
    let session = DrillSession::new(SalesBackend::sales().raw(), options).unwrap();
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let outcome = session.grand_total().await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 2,
            has_more: false
        })
    );
    let total = session
        .read(|c| c.grand_total().map(|row| row.value("Sales").clone()))
        .await;
    assert_eq!(total, Some(Value::Number(107500.0)));

    let windows: Vec<(usize, usize)> = session.backend().requests()[1..]
        .iter()
        .map(|r| (r.start_row, r.end_row))
        .collect();
    assert_eq!(windows, vec![(0, 4), (4, 8), (8, 12)]);
}

#[tokio::test]
async fn test_aliased_metric_in_both_modes() {
    let config = PivotConfig {
        values: vec![ValueSpec::new("Sales", AggregationType::Sum).named("Revenue")],
        ..SalesFixture::grouped_config()
    };
    let backend_session = session(SalesBackend::sales());
    let client_options = ControllerOptions {
        pivot_mode: PivotMode::Client,
        ..ControllerOptions::default()
    };
    let client_session = DrillSession::new(SalesBackend::sales().raw(), client_options).unwrap();

    backend_session.configure(config.clone()).await.unwrap();
    client_session.configure(config).await.unwrap();

    let request = &backend_session.backend().requests()[0];
    assert_eq!(request.value_cols[0].col_id, "Sales");
    assert_eq!(request.value_cols[0].alias.as_deref(), Some("Revenue"));

    for session in [&backend_session, &client_session] {
        assert_eq!(cell(session, "North", "Revenue").await.as_deref(), Some("39000"));
        assert_eq!(cell(session, "South", "Revenue").await.as_deref(), Some("40000"));
    }
}

#[tokio::test]
async fn test_single_row_flat_pages_list_rows() {
    let session = paged_session(SalesBackend::sales(), 1);

    let outcome = session.configure(SalesFixture::flat_config()).await.unwrap();
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 1,
            has_more: true
        })
    );
    let first = session.read(|c| c.flat_rows()[0].clone()).await;
    assert_eq!(first.value("Region"), &Value::text("North"));
    assert_eq!(first.value("Sales"), &Value::Number(10000.0));
}

#[tokio::test]
async fn test_leaving_preview_reloads_full_data() {
    let options = ControllerOptions {
        preview: true,
        preview_limit: 2,
        ..ControllerOptions::default()
    };
    let session = DrillSession::new(SalesBackend::sales(), options).unwrap();
    session.configure(SalesFixture::grouped_config()).await.unwrap();
    assert_eq!(labels(&session).await, vec!["North", "South"]);

    let outcome = session.set_preview(false).await;
    assert_eq!(
        outcome,
        Some(ApplyOutcome::Applied {
            added: 3,
            has_more: false
        })
    );
    assert_eq!(labels(&session).await, vec!["North", "South", "East"]);
    assert_eq!(session.set_preview(false).await, None);
}

#[tokio::test]
async fn test_autosize_through_session() {
    let session = session(SalesBackend::sales());
    session.configure(SalesFixture::grouped_config()).await.unwrap();

    let mut sizer: ColumnAutoSizer = ColumnAutoSizer::default();
    assert!(session.update(|c| c.autosize(&mut sizer)).await);
    // Same structure and data: nothing to do.
    assert!(!session.update(|c| c.autosize(&mut sizer)).await);

    let widths: Vec<u32> = session
        .read(|c| leaf_columns(c.columns()).iter().map(|leaf| leaf.size).collect())
        .await;
    let bounds = sizer.options().clone();
    assert!(widths
        .iter()
        .all(|w| *w >= bounds.min_width && *w <= bounds.max_width));
}
