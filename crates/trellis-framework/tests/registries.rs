use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use trellis_core::{
    Ack, Body, Context, HeaderMap, HttpSurface, Method, Params, ReplyBody, RequestParts,
    StructuredError, Transport,
};
use trellis_framework::{
    Alias, BuildError, Channel, ChannelInfo, Connection, Directory, DocumentationSink, Flow,
    FsSource, Middleware, Registries, Rejection, Route, RouteInfo, RouterBuilder, RoutingConfig,
};

fn build(tree: &Directory) -> Registries {
    RouterBuilder::default().build(tree).unwrap()
}

fn connect(auth: Value) -> Connection {
    Connection::new(auth, HeaderMap::new(), None).0
}

async fn get(registries: &Registries, path: &str) -> trellis_core::Reply {
    registries
        .handle_http(RequestParts::new(Method::Get, path), HttpSurface::default())
        .await
}

fn user_route() -> Route {
    Route::new()
        .get(|ctx: Context, Params(params): Params| async move {
            ctx.json(json!({ "id": params.get("id") }));
        })
        .serve_via_socket()
}

fn ping() -> Channel {
    Channel::new(|ctx: Context| async move {
        ctx.json(json!({ "pong": true }));
    })
}

#[tokio::test]
async fn test_route_serves_both_transports() {
    let tree = Directory::new()
        .file("ping.channel", ping())
        .dir("users", Directory::new().file(":id.route", user_route()));
    let registries = build(&tree);

    let reply = get(&registries, "/users/7").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, ReplyBody::Json(json!({ "id": "7" })));

    let session = registries.mount(connect(Value::Null)).await;
    let (ack, rx) = Ack::channel();
    session.dispatch("/users/7", json!({}), Some(ack)).await;
    assert_eq!(rx.await.unwrap(), json!({ "id": "7" }));

    let (ack, rx) = Ack::channel();
    session.dispatch("ping", Value::Null, Some(ack)).await;
    assert_eq!(rx.await.unwrap(), json!({ "pong": true }));
}

#[tokio::test]
async fn test_mirrored_envelope_selects_method() {
    let route = Route::new()
        .get(|ctx: Context| async move {
            ctx.json(json!("listed"));
        })
        .post(|ctx: Context, Body(body): Body<Value>| async move {
            ctx.set_status(201).json(json!({ "created": body["name"] }));
        })
        .serve_via_socket();
    let registries = build(&Directory::new().file("rooms.route", route));
    let session = registries.mount(connect(Value::Null)).await;

    let (ack, rx) = Ack::channel();
    session
        .dispatch(
            "rooms",
            json!({ "method": "POST", "body": { "name": "lobby" } }),
            Some(ack),
        )
        .await;
    assert_eq!(
        rx.await.unwrap(),
        json!({ "statusCode": 201, "data": { "created": "lobby" } })
    );

    let (ack, rx) = Ack::channel();
    session.dispatch("rooms", json!({}), Some(ack)).await;
    assert_eq!(rx.await.unwrap(), json!("listed"));

    let (ack, rx) = Ack::channel();
    session
        .dispatch("rooms", json!({ "method": "DELETE" }), Some(ack))
        .await;
    assert_eq!(rx.await.unwrap()["statusCode"], json!(405));
}

#[tokio::test]
async fn test_ancestor_gate_rejects_whole_subtree_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let gate = Middleware::new().gate(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Err(Rejection::because("not-in-room")) }
    });

    let tree = Directory::new().file("ping.channel", ping()).dir(
        "chat",
        Directory::new()
            .file("room.middleware", gate)
            .file("send.channel", Channel::new(|| async {}))
            .file("leave.channel", Channel::new(|| async {}))
            .dir(
                "typing",
                Directory::new().file("index.channel", Channel::new(|| async {})),
            ),
    );
    let registries = build(&tree);
    let session = registries.mount(connect(Value::Null)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let rejected: Vec<&str> = session
        .access()
        .iter()
        .filter(|entry| !entry.is_accessible())
        .map(|entry| entry.path.as_str())
        .collect();
    assert_eq!(rejected, ["/chat/leave", "/chat/send", "/chat/typing"]);
    for entry in session.access().iter().filter(|e| !e.is_accessible()) {
        assert_eq!(entry.rejection, Some(Rejection::because("not-in-room")));
    }

    let (ack, rx) = Ack::channel();
    session.dispatch("chat/send", Value::Null, Some(ack)).await;
    assert_eq!(
        rx.await.unwrap(),
        StructuredError::forbidden("not-in-room").to_value()
    );
    assert!(!session.connection().is_closed());
}

#[tokio::test]
async fn test_secure_channel_requires_auth_field() {
    let writes = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&writes);
    let secure = Channel::new(move |ctx: Context| {
        let counted = Arc::clone(&counted);
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            ctx.json(json!("secret"));
        }
    })
    .before_mounted(|conn: Connection| async move {
        if conn.auth_field("authed") == Some(&json!(true)) {
            Ok(())
        } else {
            Err(Rejection::unauthorized())
        }
    });
    let tree = Directory::new()
        .file("ping.channel", ping())
        .dir("secure", Directory::new().file("data.channel", secure));
    let registries = build(&tree);

    let anonymous = registries.mount(connect(json!({}))).await;
    let (ack, rx) = Ack::channel();
    anonymous.dispatch("secure/data", Value::Null, Some(ack)).await;
    assert_eq!(rx.await.unwrap()["statusCode"], json!(401));
    assert_eq!(writes.load(Ordering::SeqCst), 0);

    let authed = registries.mount(connect(json!({ "authed": true }))).await;
    let (ack, rx) = Ack::channel();
    authed.dispatch("secure/data", Value::Null, Some(ack)).await;
    assert_eq!(rx.await.unwrap(), json!("secret"));
    assert_eq!(writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_without_usable_channel_is_closed() {
    let tree = Directory::new()
        .file("a.channel", Channel::factory(|_| async { None }))
        .file(
            "b.channel",
            Channel::new(|| async {}).before_mounted(|_| async { Err(Rejection::unauthorized()) }),
        );
    let registries = build(&tree);
    let session = registries.mount(connect(Value::Null)).await;

    assert!(session.connection().is_closed());
    assert_eq!(
        session.access()[0].rejection,
        Some(Rejection::because("unavailable"))
    );
}

#[tokio::test]
async fn test_alias_middleware_inclusion() {
    let guard = Middleware::new().request(|ctx: Context| async move {
        if ctx.headers().contains_key("x-member") {
            Ok(Flow::Next)
        } else {
            Err(StructuredError::unauthorized().into())
        }
    });
    let tree = Directory::new()
        .file("open.alias", Alias::of("/members").include_middleware(false))
        .file("guarded.alias", Alias::of("members"))
        .dir(
            "members",
            Directory::new()
                .file("guard.middleware", guard)
                .file(":id.route", user_route()),
        );
    let registries = build(&tree);

    assert_eq!(get(&registries, "/members/1").await.status, 401);
    assert_eq!(get(&registries, "/guarded/1").await.status, 401);
    let open = get(&registries, "/open/1").await;
    assert_eq!(open.status, 200);
    assert_eq!(open.body, ReplyBody::Json(json!({ "id": "1" })));

    let member = registries
        .handle_http(
            RequestParts::new(Method::Get, "/guarded/2").with_headers(HeaderMap::from([(
                "x-member".to_string(),
                "yes".to_string(),
            )])),
            HttpSurface::default(),
        )
        .await;
    assert_eq!(member.status, 200);
}

#[test]
fn test_build_failures_are_fatal() {
    let duplicate = Directory::new()
        .file("a.route", Route::new().get(|| async {}))
        .dir(
            "a",
            Directory::new().file("index.route", Route::new().get(|| async {})),
        );
    assert!(matches!(
        RouterBuilder::default().build(&duplicate),
        Err(BuildError::DuplicateRoute { .. })
    ));

    let dangling = Directory::new().file("v2.alias", Alias::of("/nothing"));
    assert!(matches!(
        RouterBuilder::default().build(&dangling),
        Err(BuildError::UnresolvedAlias { .. })
    ));

    let missing = RouterBuilder::default().build(&FsSource::new("/definitely/not/here"));
    assert!(matches!(missing, Err(BuildError::UnreadableDirectory { .. })));
}

#[tokio::test]
async fn test_filesystem_source() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("users")).unwrap();
    fs::write(dir.path().join("users").join(":id.route"), "").unwrap();
    fs::write(dir.path().join("README.md"), "not a module").unwrap();

    let source = FsSource::new(dir.path()).link("users/:id.route", user_route());
    let registries = RouterBuilder::default().build(&source).unwrap();
    let reply = get(&registries, "/users/abc").await;
    assert_eq!(reply.body, ReplyBody::Json(json!({ "id": "abc" })));

    fs::write(dir.path().join("orphan.route"), "").unwrap();
    let source = FsSource::new(dir.path()).link("users/:id.route", user_route());
    assert!(matches!(
        RouterBuilder::default().build(&source),
        Err(BuildError::MalformedModule { ref path, .. }) if path == "orphan.route"
    ));
}

#[derive(Default)]
struct Recorder {
    routes: Mutex<Vec<RouteInfo>>,
    channels: Mutex<Vec<ChannelInfo>>,
}

impl DocumentationSink for Recorder {
    fn describe_route(&self, info: &RouteInfo) -> anyhow::Result<()> {
        self.routes.lock().push(info.clone());
        Ok(())
    }

    fn describe_channel(&self, info: &ChannelInfo) -> anyhow::Result<()> {
        self.channels.lock().push(info.clone());
        anyhow::bail!("sink is read-only")
    }
}

#[test]
fn test_documentation_sink_sees_everything() {
    let recorder = Arc::new(Recorder::default());
    let tree = Directory::new()
        .file("ping.channel", ping().describe(json!({ "summary": "liveness" })))
        .dir("users", Directory::new().file(":id.route", user_route()));

    RouterBuilder::new(RoutingConfig::default())
        .docs(recorder.clone())
        .build(&tree)
        .unwrap();

    let routes = recorder.routes.lock();
    let transports: Vec<Transport> = routes.iter().map(|r| r.transport).collect();
    assert_eq!(transports, [Transport::RequestResponse, Transport::Event]);
    assert!(routes.iter().all(|r| r.path == "/users/:id" && r.method == Method::Get));

    let channels = recorder.channels.lock();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].meta, Some(json!({ "summary": "liveness" })));
    assert_eq!(channels[1].methods, [Method::Get]);
}
