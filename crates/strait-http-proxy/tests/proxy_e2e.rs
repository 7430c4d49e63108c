//! End-to-end tests: a real listener, a real origin, real sockets.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use strait_http_proxy::config::Config;
use strait_http_proxy::proxy::ProxyServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Origin that answers every request with "<METHOD> <PATH-AND-QUERY>\n<BODY>".
async fn spawn_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let line = format!(
                        "{} {}\n",
                        req.method(),
                        req.uri()
                            .path_and_query()
                            .map(|pq| pq.as_str())
                            .unwrap_or("/")
                    );
                    let body = req.into_body().collect().await.unwrap().to_bytes();
                    let mut payload = line.into_bytes();
                    payload.extend_from_slice(&body);
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(payload))))
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// TCP echo server, for exercising the CONNECT path with opaque bytes.
async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Origin that sends a chunked response one small chunk at a time, slower
/// than any reasonable deadline.
async fn spawn_dripping_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let head = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
                if stream.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for _ in 0..30 {
                    if stream.write_all(b"5\r\nabcde\r\n").await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                let _ = stream.write_all(b"0\r\n\r\n").await;
            });
        }
    });

    addr
}

async fn spawn_proxy(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(config).await.unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

fn reverse_proxy_config(origin: SocketAddr, base: &str) -> Config {
    let yaml = format!(
        r#"
upstream:
  url: "http://{origin}{base}"
"#
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[tokio::test]
async fn test_get_is_rewritten_under_target_base() {
    let origin = spawn_origin().await;
    let proxy = spawn_proxy(reverse_proxy_config(origin, "/base?fixed=1")).await;

    let response = reqwest::get(format!("http://{proxy}/dir/file?b=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, "GET /base/dir/file?fixed=1&b=2\n");
}

#[tokio::test]
async fn test_post_body_passes_through_byte_for_byte() {
    let origin = spawn_origin().await;
    let mut config = reverse_proxy_config(origin, "");
    // Paced streaming path, with a payload several buffers long.
    config.limits.flush_interval_ms = 10;
    config.limits.http_buffer_size = 4096;
    let proxy = spawn_proxy(config).await;

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy}/echo"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.bytes().await.unwrap();

    let mut expected = b"POST /echo\n".to_vec();
    expected.extend_from_slice(&payload);
    assert_eq!(body.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_slow_body_is_cut_off_at_the_deadline() {
    // The origin drips chunks for ~3 s; with a 1 s budget the client must see
    // the stream aborted well before the drip completes.
    let origin = spawn_dripping_origin().await;
    let mut config = reverse_proxy_config(origin, "");
    config.limits.timeout_secs = 1;
    let proxy = spawn_proxy(config).await;

    let started = Instant::now();
    let response = reqwest::get(format!("http://{proxy}/slow")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.bytes().await;
    assert!(
        body.is_err(),
        "stream should be aborted, got {} bytes",
        body.map(|b| b.len()).unwrap_or(0)
    );
    assert!(
        started.elapsed() < Duration::from_millis(2500),
        "deadline not enforced: took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_unknown_method_is_refused() {
    let origin = spawn_origin().await;
    let proxy = spawn_proxy(reverse_proxy_config(origin, "")).await;

    let client = reqwest::Client::new();
    let response = client
        .request(
            reqwest::Method::from_bytes(b"TRACE").unwrap(),
            format!("http://{proxy}/"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_auth_gate_challenges_and_admits() {
    let origin = spawn_origin().await;
    let mut config = reverse_proxy_config(origin, "");
    config.auth.username = Some("alice".to_string());
    config.auth.password = Some("open sesame".to_string());
    let proxy = spawn_proxy(config).await;

    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{proxy}/private"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .unwrap()
            .to_str()
            .unwrap(),
        r#"Basic realm="restricted", charset="UTF-8""#
    );

    // Wrong password: both components must match.
    let bad = base64_token("alice", "guess");
    let response = client
        .get(format!("http://{proxy}/private"))
        .header("proxy-authorization", format!("Basic {bad}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let good = base64_token("alice", "open sesame");
    let response = client
        .get(format!("http://{proxy}/private"))
        .header("proxy-authorization", format!("Basic {good}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "GET /private\n");
}

fn base64_token(user: &str, pass: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
}

async fn connect_handshake(proxy: SocketAddr, authority: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    // Read up to the end of the response head.
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before response head completed");
        head.push(byte[0]);
    }
    let status_line = String::from_utf8_lossy(&head)
        .lines()
        .next()
        .unwrap()
        .to_string();
    (stream, status_line)
}

#[tokio::test]
async fn test_connect_to_unreachable_target_yields_504() {
    let proxy = spawn_proxy(Config::default()).await;

    // Bind-then-drop guarantees nothing is listening there.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (_stream, status_line) = connect_handshake(proxy, &dead_addr.to_string()).await;
    assert!(status_line.contains("504"), "got: {status_line}");
}

#[tokio::test]
async fn test_connect_relays_in_both_directions() {
    let echo = spawn_tcp_echo().await;
    let proxy = spawn_proxy(Config::default()).await;

    let (mut stream, status_line) = connect_handshake(proxy, &echo.to_string()).await;
    assert!(status_line.contains("200"), "got: {status_line}");

    for message in [&b"ping"[..], &b"a longer opaque payload"[..]] {
        stream.write_all(message).await.unwrap();
        let mut received = vec![0u8; message.len()];
        stream.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, message);
    }
}

#[tokio::test]
async fn test_connect_refused_when_https_disabled() {
    let mut config = Config::default();
    config.limits.disable_https = true;
    let proxy = spawn_proxy(config).await;

    let (_stream, status_line) = connect_handshake(proxy, "127.0.0.1:1").await;
    assert!(status_line.contains("503"), "got: {status_line}");
}
