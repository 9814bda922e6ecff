#![cfg(feature = "websocket")]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rpcwire_client::{Client, EventKind};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Answers `sum` with one partial result and the total; anything else is an error.
async fn serve(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let call: Value = serde_json::from_str(&text).unwrap();
        let marker = call["marker"].clone();

        let replies = if call["function_name"] == "sum" {
            let total: i64 = call["parameters_list"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(Value::as_i64)
                .sum();
            vec![
                json!({"result": "working", "marker": marker, "eod": 0}),
                json!({"result": total, "marker": marker, "eod": 1}),
            ]
        } else {
            let error = format!("unknown procedure {}", call["function_name"]);
            vec![json!({"error": error, "marker": marker})]
        };

        for reply in replies {
            ws.send(Message::Text(reply.to_string())).await.unwrap();
        }
    }
}

#[tokio::test]
async fn calls_round_trip_over_a_real_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener));

    let client = Client::new(&format!("ws://{addr}/rpc")).unwrap();
    let (ready_tx, mut ready) = mpsc::unbounded_channel();
    client.events().on(EventKind::Ready, move |_| {
        let _ = ready_tx.send(());
    });

    let (results_tx, mut results) = mpsc::unbounded_channel();
    let (errors_tx, mut errors) = mpsc::unbounded_channel();

    drop(client.call("sum", [1, 2, 3]).unwrap().then(move |value| {
        let _ = results_tx.send(value.clone());
        value
    }));
    drop(client.call("missing", ["x"]).unwrap().catch(move |error| {
        let _ = errors_tx.send(error);
    }));

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        ready.recv().await.unwrap();
        let partial = results.recv().await.unwrap();
        let total = results.recv().await.unwrap();
        let error = errors.recv().await.unwrap();
        (partial, total, error)
    })
    .await
    .expect("round trip timed out");

    assert_eq!(outcome.0, json!("working"));
    assert_eq!(outcome.1, json!(6));
    assert_eq!(outcome.2, json!("unknown procedure \"missing\""));

    client.disconnect();
}
