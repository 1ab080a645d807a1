use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use trellis_core::{Body as JsonBody, Context, Params};
use trellis_framework::{Channel, Connection, Directory, Registries, Rejection, Route, RouterBuilder};
use trellis_transport::{ServeOptions, router, serve};

fn registries() -> Arc<Registries> {
    let tree = Directory::new()
        .file(
            "ping.channel",
            Channel::new(|ctx: Context| async move {
                ctx.json(json!({ "pong": true }));
            }),
        )
        .dir(
            "users",
            Directory::new().file(
                ":id.route",
                Route::new()
                    .get(|ctx: Context, Params(params): Params| async move {
                        ctx.json(json!({ "id": params.get("id") }));
                    })
                    .post(|ctx: Context, JsonBody(body): JsonBody<Value>| async move {
                        ctx.set_status(201).json(body);
                    }),
            ),
        );
    Arc::new(RouterBuilder::default().build(&tree).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_routes() {
    let app = router(registries(), ServeOptions::default(), CancellationToken::new());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/users/7").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "id": "7" }));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/users/7")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"ada"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await, json!({ "name": "ada" }));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/users/7")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{broken"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["errors"][0]["error"], json!("not-found"));
}

#[tokio::test]
async fn test_http_params_are_percent_decoded() {
    let app = router(registries(), ServeOptions::default(), CancellationToken::new());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/users/john%20doe").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "id": "john doe" }));

    let response = app
        .oneshot(Request::builder().uri("/users/caf%C3%A9%2F1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({ "id": "café/1" }));
}

#[tokio::test]
async fn test_websocket_ack_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        registries(),
        ServeOptions::default(),
        shutdown.clone(),
    ));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap();
    socket
        .send(Message::Text(r#"{"event":"/ping/","ack":1}"#.into()))
        .await
        .unwrap();
    socket
        .send(Message::Text(r#"{"event":"users/42","data":{},"ack":2}"#.into()))
        .await
        .unwrap();

    let mut acks = Vec::new();
    while acks.len() < 2 {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => acks.push(serde_json::from_str::<Value>(text.as_str()).unwrap()),
            _ => continue,
        }
    }
    acks.sort_by_key(|frame| frame["ack"].as_u64());
    assert_eq!(acks[0], json!({ "ack": 1, "data": { "pong": true } }));
    assert_eq!(acks[1], json!({ "ack": 2, "data": { "statusCode": 404, "errors": [{ "error": "not-found", "data": "users/42" }] } }));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_websocket_without_usable_channel_is_closed() {
    let tree = Directory::new().file(
        "secure.channel",
        Channel::new(|| async {}).before_mounted(|conn: Connection| async move {
            match conn.auth_field("token") {
                Some(Value::String(token)) if token == "letmein" => Ok(()),
                _ => Err(Rejection::unauthorized()),
            }
        }),
    );
    let registries = Arc::new(RouterBuilder::default().build(&tree).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(
        listener,
        registries,
        ServeOptions::default(),
        shutdown.clone(),
    ));

    let (mut rejected, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap();
    let closed = loop {
        match rejected.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break true,
            Some(Ok(_)) => continue,
        }
    };
    assert!(closed);

    let (mut accepted, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/socket?token=letmein"))
            .await
            .unwrap();
    accepted
        .send(Message::Text(r#"{"event":"secure","ack":5}"#.into()))
        .await
        .unwrap();
    let reply = loop {
        if let Message::Text(text) = accepted.next().await.unwrap().unwrap() {
            break serde_json::from_str::<Value>(text.as_str()).unwrap();
        }
    };
    assert_eq!(reply, json!({ "ack": 5, "data": { "success": true } }));

    shutdown.cancel();
}
