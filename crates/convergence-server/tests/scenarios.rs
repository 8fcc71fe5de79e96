//! End-to-end coordinator scenarios, reproducing each literal input from
//! the collaborative-editing design notes this crate implements against.

use std::sync::Arc;
use std::time::Duration;

use convergence_core::config::CoordinatorConfig;
use convergence_core::coordinator::{Coordinator, OpenResult, OutboundMessage};
use convergence_core::op::{Kind, Operation};
use convergence_core::value::{DataValue, ObjectValue, ValueId};
use convergence_server::persistence::MemoryModelStore;
use tokio::sync::mpsc;

fn short_timeouts() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.data_request_timeout = Duration::from_millis(100);
    config.linger_timeout = Duration::from_millis(500);
    config
}

fn spawn(model_id: &str, config: CoordinatorConfig) -> convergence_core::coordinator::CoordinatorHandle {
    let store = Arc::new(MemoryModelStore::new());
    Coordinator::new(model_id, "default", config, store).spawn()
}

#[tokio::test]
async fn scenario_1_concurrent_string_inserts_at_same_index() {
    let handle = spawn("m1", short_timeouts());

    let (alpha_tx, mut alpha_rx) = mpsc::unbounded_channel();
    let alpha_open_fut = handle.open("alpha", alpha_tx);
    tokio::pin!(alpha_open_fut);
    let req = tokio::select! {
        msg = alpha_rx.recv() => msg,
        _ = &mut alpha_open_fut => panic!("open resolved before data was supplied"),
    };
    assert!(matches!(req, Some(OutboundMessage::ClientModelDataRequest)));

    let mut root = ObjectValue::new(ValueId::new("s0"));
    root.children.insert(
        "s".to_string(),
        DataValue::new_string(ValueId::new("s1"), "AB".into()),
    );
    handle.respond_with_data("alpha", root).unwrap();

    let alpha_open = alpha_open_fut.await.unwrap();
    let OpenResult::Success { version, .. } = alpha_open else {
        panic!("expected open success, got {alpha_open:?}");
    };
    assert_eq!(version, 0);

    let (beta_tx, mut beta_rx) = mpsc::unbounded_channel();
    let beta_open = handle.open("beta", beta_tx).await.unwrap();
    assert!(matches!(beta_open, OpenResult::Success { version: 0, .. }));
    assert!(matches!(recv(&mut alpha_rx).await, OutboundMessage::RemoteClientOpened { .. }));

    handle
        .submit(
            "alpha",
            1,
            0,
            Operation::discrete(ValueId::new("s1"), Kind::StringInsert { index: 1, value: "X".into() }),
        )
        .unwrap();
    handle
        .submit(
            "beta",
            1,
            0,
            Operation::discrete(ValueId::new("s1"), Kind::StringInsert { index: 1, value: "Y".into() }),
        )
        .unwrap();

    let alpha_ack = recv(&mut alpha_rx).await;
    assert!(matches!(
        alpha_ack,
        OutboundMessage::OperationAcknowledgement { assigned_version: 1, .. }
    ));
    let beta_remote_of_alpha = recv(&mut beta_rx).await;
    assert!(matches!(
        beta_remote_of_alpha,
        OutboundMessage::OutgoingOperation { assigned_version: 1, .. }
    ));

    let beta_ack = recv(&mut beta_rx).await;
    let OutboundMessage::OperationAcknowledgement { assigned_version: 2, .. } = beta_ack else {
        panic!("expected beta ack at version 2, got {beta_ack:?}");
    };
    let alpha_remote_of_beta = recv(&mut alpha_rx).await;
    let OutboundMessage::OutgoingOperation { assigned_version: 2, op, .. } = alpha_remote_of_beta else {
        panic!("expected outgoing op at version 2");
    };
    match op {
        Operation::Discrete(d) => {
            assert_eq!(d.kind, Kind::StringInsert { index: 2, value: "Y".into() });
        }
        other => panic!("expected discrete op, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_2_cold_start() {
    let handle = spawn("m2", short_timeouts());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let open_fut = handle.open("gamma", tx);
    tokio::pin!(open_fut);

    // Coordinator sends ClientModelDataRequest before the open resolves.
    let req = tokio::select! {
        msg = rx.recv() => msg,
        _ = &mut open_fut => panic!("open resolved before data was supplied"),
    };
    assert!(matches!(req, Some(OutboundMessage::ClientModelDataRequest)));

    let mut root = ObjectValue::new(ValueId::new("s0"));
    root.children.insert("a".to_string(), DataValue::new_string(ValueId::new("s1"), "hi".into()));
    handle.respond_with_data("gamma", root).unwrap();

    let result = open_fut.await.unwrap();
    assert!(matches!(result, OpenResult::Success { version: 0, .. }));
}

#[tokio::test]
async fn scenario_3_cold_start_times_out() {
    let handle = spawn("m3", short_timeouts());
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = handle.open("gamma", tx).await.unwrap();
    match result {
        OpenResult::Failure(reason) => assert_eq!(reason, "data-request-timeout"),
        other => panic!("expected timeout failure, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_4_second_client_queues_during_cold_start() {
    let handle = spawn("m4", short_timeouts());

    let (gamma_tx, mut gamma_rx) = mpsc::unbounded_channel();
    let gamma_open = handle.open("gamma", gamma_tx);
    tokio::pin!(gamma_open);
    assert!(matches!(gamma_rx.recv().await, Some(OutboundMessage::ClientModelDataRequest)));

    let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
    let delta_open = handle.open("delta", delta_tx);
    tokio::pin!(delta_open);
    assert!(matches!(delta_rx.recv().await, Some(OutboundMessage::ClientModelDataRequest)));

    let mut root = ObjectValue::new(ValueId::new("s0"));
    root.children.insert("a".to_string(), DataValue::new_string(ValueId::new("s1"), "hi".into()));
    handle.respond_with_data("gamma", root).unwrap();

    let (gamma_result, delta_result) = tokio::join!(gamma_open, delta_open);
    assert!(matches!(gamma_result.unwrap(), OpenResult::Success { version: 0, .. }));
    assert!(matches!(delta_result.unwrap(), OpenResult::Success { version: 0, .. }));
}

#[tokio::test]
async fn scenario_5_force_close_on_invalid_op() {
    let handle = spawn("m5", short_timeouts());

    let (eps_tx, mut eps_rx) = mpsc::unbounded_channel();
    let eps_open_fut = handle.open("epsilon", eps_tx);
    tokio::pin!(eps_open_fut);
    let req = tokio::select! {
        msg = eps_rx.recv() => msg,
        _ = &mut eps_open_fut => panic!("open resolved before data was supplied"),
    };
    assert!(matches!(req, Some(OutboundMessage::ClientModelDataRequest)));

    let mut root = ObjectValue::new(ValueId::new("s0"));
    root.children.insert(
        "arr".to_string(),
        DataValue::Array(convergence_core::value::ArrayValue {
            vid: ValueId::new("a1"),
            children: vec![
                DataValue::new_double(ValueId::new("s1"), 1.0),
                DataValue::new_double(ValueId::new("s2"), 2.0),
                DataValue::new_double(ValueId::new("s3"), 3.0),
            ],
        }),
    );
    root.children.insert("counter".to_string(), DataValue::new_double(ValueId::new("s4"), 0.0));
    handle.respond_with_data("epsilon", root).unwrap();
    let eps_open = eps_open_fut.await.unwrap();
    assert!(matches!(eps_open, OpenResult::Success { version: 0, .. }));

    // Bump the model to version 5 with harmless filler ops, so the
    // out-of-bounds op below is submitted against a non-trivial history.
    for seq in 0..5 {
        handle
            .submit(
                "epsilon",
                seq,
                seq as u64,
                Operation::discrete(ValueId::new("s4"), Kind::NumberAdd { value: 1.0 }),
            )
            .unwrap();
        assert!(matches!(
            recv(&mut eps_rx).await,
            OutboundMessage::OperationAcknowledgement { .. }
        ));
    }

    handle
        .submit(
            "epsilon",
            99,
            5,
            Operation::discrete(ValueId::new("a1"), Kind::ArrayRemove { index: 7 }),
        )
        .unwrap();

    let outcome = recv(&mut eps_rx).await;
    assert!(matches!(outcome, OutboundMessage::ModelForceClose { .. }));
}

#[tokio::test]
async fn scenario_6_model_deleted_while_open() {
    let handle = spawn("m6", short_timeouts());

    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    let a_open_fut = handle.open("a", a_tx);
    tokio::pin!(a_open_fut);
    let req = tokio::select! {
        msg = a_rx.recv() => msg,
        _ = &mut a_open_fut => panic!("open resolved before data was supplied"),
    };
    assert!(matches!(req, Some(OutboundMessage::ClientModelDataRequest)));

    let mut root = ObjectValue::new(ValueId::new("s0"));
    root.children.insert("x".to_string(), DataValue::new_double(ValueId::new("s1"), 1.0));
    handle.respond_with_data("a", root).unwrap();
    assert!(matches!(a_open_fut.await.unwrap(), OpenResult::Success { .. }));

    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let b_open = handle.open("b", b_tx).await.unwrap();
    assert!(matches!(b_open, OpenResult::Success { .. }));
    assert!(matches!(recv(&mut a_rx).await, OutboundMessage::RemoteClientOpened { .. }));

    handle.model_deleted().unwrap();

    assert!(matches!(recv(&mut a_rx).await, OutboundMessage::ModelForceClose { reason } if reason == "deleted"));
    assert!(matches!(recv(&mut b_rx).await, OutboundMessage::ModelForceClose { reason } if reason == "deleted"));
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed unexpectedly")
}
