//! End-to-end composition: router, registry, cache, and the error sink
//! wired through a live server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use strand_web::limits::CacheLimits;
use strand_web::{
    BoxError, Cache, Channel, ErrorContext, ErrorSink, Handler, HostConfig, PathConfig, Registry,
    Request, RouteFuture, Router, RouterConfig, Server,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server<H: Handler>(handler: H) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::builder().listener(listener).handler(handler).build();
    tokio::spawn(server.launch());
    addr
}

async fn fetch(addr: std::net::SocketAddr, host: &str, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", path, host).as_bytes())
        .await
        .unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    (head.to_string(), body.to_string())
}

fn app_route<'a>(req: &'a mut Request, chan: &'a mut Channel) -> RouteFuture<'a> {
    Box::pin(async move {
        let greeting = req.locals().args.get("greeting").cloned().unwrap_or_default();
        let info = req.locals().path_info.clone().unwrap_or_default();
        let body = format!("{} {}", greeting, info);
        chan.send_response_and_close("200 OK", &[], Some(body.as_bytes())).await?;
        Ok(())
    })
}

struct RoutedApp {
    router: Router,
    registry: Registry,
}

impl Handler for RoutedApp {
    async fn handle(&self, req: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
        self.registry.dispatch(&self.router, req, chan).await
    }
}

fn routed_app() -> RoutedApp {
    let router = Router::new(&RouterConfig {
        patterns: vec![r"(?P<main>h)".to_string()],
        hosts: vec![HostConfig {
            names: "main".to_string(),
            patterns: vec![
                r"(?P<app>/app.*)".to_string(),
                r"(?P<ghost>/ghost.*)".to_string(),
            ],
            paths: vec![
                PathConfig {
                    names: "app".to_string(),
                    handler: "app".to_string(),
                    args: HashMap::from([("greeting".to_string(), "hi".to_string())]),
                },
                PathConfig {
                    names: "ghost".to_string(),
                    handler: "unregistered".to_string(),
                    args: HashMap::new(),
                },
            ],
        }],
    })
    .unwrap();

    let mut registry = Registry::new();
    registry.insert("app", app_route);

    RoutedApp { router, registry }
}

#[tokio::test]
async fn routed_request_reaches_the_registered_entry_point() {
    let addr = spawn_server(routed_app()).await;

    let (head, body) = fetch(addr, "h", "/app/hello").await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head: {}", head);
    assert_eq!(body, "hi /app/hello");
}

#[tokio::test]
async fn routing_misses_answer_with_404() {
    let addr = spawn_server(routed_app()).await;

    // Path with no matching pattern.
    let (head, _) = fetch(addr, "h", "/zzz").await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "head: {}", head);

    // Host with no matching group.
    let (head, _) = fetch(addr, "xyz", "/app/hello").await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "head: {}", head);

    // Resolvable route whose handler key was never registered.
    let (head, _) = fetch(addr, "h", "/ghost").await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "head: {}", head);
}

struct CachingApp {
    responses: Cache<String, String>,
}

impl Handler for CachingApp {
    async fn handle(&self, req: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
        let key = req.path().to_string();
        let body = match self.responses.get(&key) {
            Some(cached) => format!("hit:{}", cached),
            None => {
                let computed = format!("len={}", key.len());
                self.responses.set(key, computed.clone())?;
                format!("miss:{}", computed)
            }
        };
        chan.send_response_and_close("200 OK", &[], Some(body.as_bytes())).await?;
        Ok(())
    }
}

#[tokio::test]
async fn the_cache_backs_repeated_lookups_across_connections() {
    let addr = spawn_server(CachingApp {
        responses: Cache::new(CacheLimits::default()),
    })
    .await;

    let (_, body) = fetch(addr, "h", "/static/logo.png").await;
    assert_eq!(body, "miss:len=16");

    let (_, body) = fetch(addr, "h", "/static/logo.png").await;
    assert_eq!(body, "hit:len=16");
}

struct FailingHandler;

impl Handler for FailingHandler {
    async fn handle(&self, _: &mut Request, _: &mut Channel) -> Result<(), BoxError> {
        Err("handler exploded".into())
    }
}

struct RecordingSink(Arc<Mutex<Vec<String>>>);

impl ErrorSink for RecordingSink {
    fn dispatch_error(&self, context: &ErrorContext<'_>) {
        self.0.lock().unwrap().push(format!(
            "{} {} {} {}",
            context.method,
            context.path,
            context.status.unwrap_or("-"),
            context.error
        ));
    }
}

struct SecondStatusHandler;

impl Handler for SecondStatusHandler {
    async fn handle(&self, _: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
        chan.start_response("200 OK", &[("Content-Length", "2")]).await?;
        chan.write(b"ok").await?;
        // Programming error: a second status line for the same request.
        chan.start_response("200 OK", &[]).await?;
        Ok(())
    }
}

#[tokio::test]
async fn a_second_status_line_is_reported_not_sent() {
    let reports = Arc::new(Mutex::new(Vec::new()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .handler(SecondStatusHandler)
        .error_sink(RecordingSink(reports.clone()))
        .build();
    tokio::spawn(server.launch());

    let (head, body) = fetch(addr, "h", "/twice").await;
    // The first response went out untouched; no 500 was attempted on top.
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head: {}", head);
    assert_eq!(body, "ok");

    let reports = reports.lock().unwrap();
    assert_eq!(
        reports.as_slice(),
        ["GET /twice 200 OK status line already sent"]
    );
}

#[tokio::test]
async fn handler_errors_reach_the_sink_and_the_client_gets_a_500() {
    let reports = Arc::new(Mutex::new(Vec::new()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .handler(FailingHandler)
        .error_sink(RecordingSink(reports.clone()))
        .build();
    tokio::spawn(server.launch());

    let (head, body) = fetch(addr, "h", "/boom").await;
    assert!(
        head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"),
        "head: {}",
        head
    );
    assert!(body.contains("Internal Server Error"));

    let reports = reports.lock().unwrap();
    assert_eq!(reports.as_slice(), ["GET /boom - handler exploded"]);
}
