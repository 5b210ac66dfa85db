//! End-to-end exercise of the trader's IPC surface over a real Unix socket.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::UnixStream;

use qtrader_common::config::{AccountConfig, ContractSeed, GatewayConfig};
use qtrader_common::constants::files;
use qtrader_common::protocol::{read_frame, write_frame, WireFrame};
use qtrader_trader::Trader;

fn account_config(account_id: &str) -> AccountConfig {
    AccountConfig {
        account_id: account_id.to_string(),
        enabled: true,
        auto_spawn: false,
        debug: false,
        trading: Default::default(),
        gateway: GatewayConfig {
            kind: "sim".to_string(),
            feed_interval_ms: None,
            contracts: vec![ContractSeed {
                symbol: "rb2505".to_string(),
                exchange: "SHFE".to_string(),
                price: 3500.0,
                price_tick: 1.0,
            }],
        },
        strategies: Default::default(),
    }
}

/// Send one request and read frames until its response arrives, skipping
/// heartbeats and pushes interleaved by the server.
async fn request(stream: &mut UnixStream, request_type: &str, data: Value) -> (bool, Value, Option<String>) {
    let frame = WireFrame::request(request_type, data);
    let WireFrame::Request { request_id, .. } = &frame else {
        unreachable!()
    };
    let expected = request_id.clone();
    write_frame(stream, &frame).await.unwrap();

    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("response within timeout")
            .unwrap()
            .expect("connection open");
        if let WireFrame::Response {
            request_id,
            success,
            data,
            error,
        } = frame
        {
            assert_eq!(request_id, expected, "responses correlate by id");
            return (success, data, error);
        }
    }
}

/// Read frames until a push of the wanted type arrives.
async fn wait_push(stream: &mut UnixStream, wanted: &str) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("push within timeout")
            .unwrap()
            .expect("connection open");
        if let WireFrame::Push { msg_type, data } = frame {
            if msg_type == wanted {
                return data;
            }
        }
    }
}

#[tokio::test]
async fn test_full_request_catalog_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_dir = dir.path().to_path_buf();
    let trader = Trader::start(account_config("ipc1"), socket_dir.clone())
        .await
        .unwrap();

    // Give the background gateway connect a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let socket_path = files::socket_path(&socket_dir, "ipc1");
    let mut stream = UnixStream::connect(&socket_path).await.unwrap();

    // Liveness.
    let (ok, data, _) = request(&mut stream, "ping", json!({})).await;
    assert!(ok);
    assert_eq!(data, json!({"pong": true}));

    // Account snapshot exists once the sim gateway connected.
    let (ok, data, _) = request(&mut stream, "get_account", json!({})).await;
    assert!(ok);
    assert_eq!(data["account_id"], "ipc1");
    assert_eq!(data["gateway_connected"], true);

    // Subscriptions are idempotent.
    for _ in 0..2 {
        let (ok, data, _) = request(
            &mut stream,
            "subscribe",
            json!({"symbols": ["rb2505"]}),
        )
        .await;
        assert!(ok);
        assert_eq!(data, Value::Bool(true));
    }

    // A resting limit order round-trips through order_req / get_orders /
    // get_active_orders / cancel_req.
    let (ok, data, _) = request(
        &mut stream,
        "order_req",
        json!({
            "symbol": "rb2505",
            "direction": "buy",
            "offset": "open",
            "volume": 2,
            "price": 3000.0,
        }),
    )
    .await;
    assert!(ok);
    let order_id = data.as_str().unwrap().to_string();

    let (ok, data, _) = request(&mut stream, "get_active_orders", json!({})).await;
    assert!(ok);
    assert_eq!(data.as_array().unwrap().len(), 1);

    let (ok, data, _) = request(
        &mut stream,
        "get_order",
        json!({"order_id": order_id}),
    )
    .await;
    assert!(ok);
    assert_eq!(data["volume_original"], 2);

    let (ok, data, _) = request(
        &mut stream,
        "cancel_req",
        json!({"order_id": order_id}),
    )
    .await;
    assert!(ok);
    assert_eq!(data, Value::Bool(true));

    let (ok, data, _) = request(&mut stream, "get_active_orders", json!({})).await;
    assert!(ok);
    assert!(data.as_array().unwrap().is_empty());

    // Risk rejection surfaces as a structured error, not a dropped link.
    let (ok, _, error) = request(
        &mut stream,
        "order_req",
        json!({
            "symbol": "rb2505",
            "direction": "buy",
            "offset": "open",
            "volume": 100_000,
            "price": 3000.0,
        }),
    )
    .await;
    assert!(!ok);
    assert!(error.unwrap().contains("exceeds cap"));

    // Unknown request types answer on the same id without dropping.
    let (ok, _, error) = request(&mut stream, "no_such_thing", json!({})).await;
    assert!(!ok);
    assert!(error.unwrap().contains("unknown request_type"));

    // System params.
    let (ok, data, _) = request(&mut stream, "list_system_params", json!({})).await;
    assert!(ok);
    assert!(!data.as_array().unwrap().is_empty());
    let (ok, data, _) = request(
        &mut stream,
        "update_system_param",
        json!({"key": "trading.max_volume_per_order", "value": "20"}),
    )
    .await;
    assert!(ok);
    assert_eq!(data["value"], "20");

    // Strategy admin on an empty harness.
    let (ok, data, _) = request(&mut stream, "list_strategies", json!({})).await;
    assert!(ok);
    assert!(data.as_array().unwrap().is_empty());

    // Jobs exist (day rollover is always scheduled).
    let (ok, data, _) = request(&mut stream, "get_jobs", json!({})).await;
    assert!(ok);
    assert!(!data.as_array().unwrap().is_empty());

    trader.shutdown().await;
}

#[tokio::test]
async fn test_pause_pushes_account_status() {
    let dir = tempfile::tempdir().unwrap();
    let socket_dir = dir.path().to_path_buf();
    let trader = Trader::start(account_config("ipc2"), socket_dir.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let socket_path = files::socket_path(&socket_dir, "ipc2");
    let mut stream = UnixStream::connect(&socket_path).await.unwrap();

    let (ok, data, _) = request(&mut stream, "pause_trading", json!({})).await;
    assert!(ok);
    assert_eq!(data, Value::Bool(true));

    let status = wait_push(&mut stream, "account.status").await;
    assert_eq!(status["account_id"], "ipc2");
    assert_eq!(status["trade_paused"], true);

    let (ok, data, _) = request(&mut stream, "get_account", json!({})).await;
    assert!(ok);
    assert_eq!(data["trade_paused"], true);

    let (ok, _, _) = request(&mut stream, "resume_trading", json!({})).await;
    assert!(ok);

    trader.shutdown().await;
}
