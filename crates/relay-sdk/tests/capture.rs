//! Console and network capture against real `log` records and a real HTTP
//! server on localhost.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use log::Log;
use relay_sdk::config::SelfExclusionConfig;
use relay_sdk::{CapturedArg, ConsoleCapture, ConsoleLevel, NetworkCapture, SelfExclusion};

struct NullLogger;

impl Log for NullLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, _: &log::Record<'_>) {}

    fn flush(&self) {}
}

/// Answer `responses.len()` HTTP requests, one per connection, in order.
fn serve(responses: Vec<(u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let reason = if status == 200 { "OK" } else { "Not Found" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{addr}")
}

#[test]
fn test_console_keeps_most_recent_entries() {
    let console = ConsoleCapture::new(500);
    console.start();

    for i in 0..600 {
        console.capture(ConsoleLevel::Info, format!("line {i}"), [CapturedArg::value(&i)]);
    }

    let entries = console.get_entries();
    assert_eq!(entries.len(), 500);
    assert_eq!(entries[0].message, "line 100");
    assert_eq!(entries[499].message, "line 599");
    assert_eq!(console.evicted(), 100);
}

#[test]
fn test_console_logger_captures_host_records() {
    let console = ConsoleCapture::new(10);
    let logger = console.logger(Box::new(NullLogger));
    console.start();

    logger.log(
        &log::Record::builder()
            .level(log::Level::Warn)
            .target("checkout")
            .args(format_args!("cart total {}", 42))
            .build(),
    );
    logger.log(
        &log::Record::builder()
            .level(log::Level::Info)
            .target("relay_sdk::upload")
            .args(format_args!("uploaded chunk"))
            .build(),
    );

    let entries = console.get_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, ConsoleLevel::Warn);
    assert_eq!(entries[0].message, "cart total 42");

    console.stop();
    logger.log(
        &log::Record::builder()
            .level(log::Level::Error)
            .target("checkout")
            .args(format_args!("after stop"))
            .build(),
    );
    assert_eq!(console.get_entries().len(), 1);
}

#[test]
fn test_self_exclusion_covers_backend_subdomains() {
    let exclusion = SelfExclusion::new(&SelfExclusionConfig::default(), "https://api.relay.dev");

    assert!(exclusion.is_excluded("https://eu-west.api.relay.dev/trpc/ingest.track"));
    assert!(exclusion.is_excluded("https://api.relay.dev/trpc/replay.chunk"));
    assert!(exclusion.is_excluded("http://localhost:3000/trpc/media.initiateUpload"));
    assert!(!exclusion.is_excluded("http://localhost:3000/api/orders"));
    assert!(!exclusion.is_excluded("https://shop.example.com/checkout"));
}

#[test]
fn test_middleware_records_real_calls() {
    let base = serve(vec![(200, r#"{"id":7}"#), (404, r#"{"error":"gone"}"#)]);

    let network = NetworkCapture::new(10, SelfExclusion::default());
    network.start();
    let agent = ureq::AgentBuilder::new()
        .middleware(network.middleware())
        .build();

    let response = agent.get(&format!("{base}/orders")).call().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.into_string().unwrap(), r#"{"id":7}"#);

    match agent.get(&format!("{base}/orders/9")).call() {
        Err(ureq::Error::Status(404, _)) => {}
        other => panic!("expected a 404, got {:?}", other.map(|r| r.status())),
    }

    let entries = network.get_entries();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].method, "GET");
    assert_eq!(entries[0].url, format!("{base}/orders"));
    assert_eq!(entries[0].status, Some(200));
    assert_eq!(entries[0].response_size_bytes, Some(8));
    assert!(entries[0].duration_ms.is_some());
    assert!(entries[0].error.is_none());

    assert_eq!(entries[1].status, Some(404));
    assert!(entries[1].error.is_none());
}

#[test]
fn test_middleware_records_connection_failure() {
    // Bind then drop to get a port nothing listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let network = NetworkCapture::new(10, SelfExclusion::default());
    network.start();
    let agent = ureq::AgentBuilder::new()
        .middleware(network.middleware())
        .build();

    let result = agent.get(&format!("http://127.0.0.1:{port}/orders")).call();
    assert!(matches!(result, Err(ureq::Error::Transport(_))));

    let entries = network.get_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, None);
    assert!(entries[0].error.is_some());
    assert!(!entries[0].is_pending());
}

#[test]
fn test_inactive_capture_passes_calls_through() {
    let base = serve(vec![(200, "ok")]);

    let network = NetworkCapture::new(10, SelfExclusion::default());
    let agent = ureq::AgentBuilder::new()
        .middleware(network.middleware())
        .build();

    let response = agent.get(&format!("{base}/health")).call().unwrap();
    assert_eq!(response.into_string().unwrap(), "ok");
    assert!(network.get_entries().is_empty());
}
