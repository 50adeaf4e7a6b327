mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use support::MockTransport;
use tempfile::TempDir;
use tether_engine::{
    ArgValue, AuditLogger, AuditSettings, ClientConfig, FnProvider, JsonlFileAuditSink, MemoryAuditSink,
    ProviderRegistry, RestClientBuilder,
};
use tether_types::{ApiDescriptor, InjectableBinding, InvocationResult, MethodDescriptor, MethodId, ValueType, WireKind};

fn catalog() -> ApiDescriptor {
    ApiDescriptor::new("Catalog")
        .with_method(MethodDescriptor::get("item", "/items/{name}").with_param(WireKind::Path, "name"))
}

fn item() -> MethodId {
    MethodId::new("item")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn records_follow_response_completion_order() {
    let sink = MemoryAuditSink::new();
    let transport = MockTransport::json(200, json!({})).with_receive_delay_by(|request| {
        if request.url.ends_with("/slow") {
            Duration::from_millis(120)
        } else if request.url.ends_with("/medium") {
            Duration::from_millis(60)
        } else {
            Duration::from_millis(5)
        }
    });
    let client = RestClientBuilder::new(catalog(), "http://h")
        .audit_sink(sink.clone())
        .build(transport)
        .unwrap();

    let handles: Vec<_> = ["slow", "medium", "fast"]
        .into_iter()
        .map(|name| {
            let client = client.clone();
            tokio::spawn(async move { client.invoke::<Value>(&item(), vec![ArgValue::from(name)]).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    client.shutdown().await;

    let urls: Vec<String> = sink.records().into_iter().map(|record| record.request.url).collect();
    assert_eq!(urls, vec!["http://h/items/fast", "http://h/items/medium", "http://h/items/slow"]);
    let logger = client.audit_logger().unwrap();
    assert_eq!(logger.emitted(), 3);
    assert_eq!(logger.ordering_violations(), 0);
}

#[tokio::test]
async fn failed_calls_are_audited() {
    let sink = MemoryAuditSink::new();
    let failing = RestClientBuilder::new(catalog(), "http://h")
        .audit_sink(sink.clone())
        .build(MockTransport::failing_send())
        .unwrap();
    let erroring = RestClientBuilder::new(catalog(), "http://h")
        .audit_sink(sink.clone())
        .build(MockTransport::new(|_| InvocationResult::new(500, "boom")))
        .unwrap();

    assert!(failing.invoke::<Value>(&item(), vec![ArgValue::from("a")]).await.is_err());
    assert!(erroring.invoke::<Value>(&item(), vec![ArgValue::from("b")]).await.is_err());
    failing.shutdown().await;
    erroring.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].response.status, 0);
    assert!(records[0].response.body.contains("connection refused"));
    assert_eq!(records[1].response.status, 500);
    assert_eq!(records[1].response.body, "boom");
}

#[tokio::test]
async fn abandoned_calls_are_still_audited_once_received() {
    let sink = MemoryAuditSink::new();
    let client = RestClientBuilder::new(catalog(), "http://h")
        .audit_sink(sink.clone())
        .build(MockTransport::json(200, json!({"name": "late"})).with_receive_delay(Duration::from_millis(100)))
        .unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        client.invoke::<Value>(&item(), vec![ArgValue::from("late")]),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(250)).await;
    client.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request.url, "http://h/items/late");
    assert_eq!(records[0].response.status, 200);
}

#[tokio::test]
async fn build_failures_produce_no_record() {
    let sink = MemoryAuditSink::new();
    let client = RestClientBuilder::new(catalog(), "http://h")
        .audit_sink(sink.clone())
        .build(MockTransport::json(200, json!({})))
        .unwrap();

    assert!(client.invoke::<Value>(&item(), vec![]).await.is_err());
    client.shutdown().await;
    assert!(sink.is_empty());
}

#[tokio::test]
async fn clients_can_share_one_logger() {
    let sink = MemoryAuditSink::new();
    let logger = Arc::new(AuditLogger::spawn(Arc::new(sink.clone()), AuditSettings::default()).unwrap());
    let first = RestClientBuilder::new(catalog(), "http://one")
        .audit_logger(Arc::clone(&logger))
        .build(MockTransport::json(200, json!({})))
        .unwrap();
    let second = RestClientBuilder::new(catalog(), "http://two")
        .audit_logger(Arc::clone(&logger))
        .build(MockTransport::json(200, json!({})))
        .unwrap();

    let _: Value = first.invoke(&item(), vec![ArgValue::from("x")]).await.unwrap();
    let _: Value = second.invoke(&item(), vec![ArgValue::from("y")]).await.unwrap();
    logger.shutdown().await;

    let urls: Vec<String> = sink.records().into_iter().map(|record| record.request.url).collect();
    assert_eq!(urls, vec!["http://one/items/x", "http://two/items/y"]);
}

#[tokio::test]
async fn file_audit_redacts_injected_credentials() {
    let dir = TempDir::new().unwrap();
    let sink = JsonlFileAuditSink::new(dir.path().join("audit.jsonl")).unwrap();
    let log_path = sink.log_path().to_path_buf();
    let api = catalog().with_injectable(InjectableBinding::new("X-Api-Key", ValueType::String, [WireKind::Header]));
    let client = RestClientBuilder::new(api, "http://h")
        .providers(ProviderRegistry::new().with("X-Api-Key", FnProvider::header("X-Api-Key", || ArgValue::from("live-key-42"))))
        .config(ClientConfig::default().with_audit(AuditSettings {
            flush_interval_ms: 10,
            buffer_window_ms: 0,
        }))
        .audit_sink(sink)
        .build(MockTransport::json(200, json!({"name": "lamp"})))
        .unwrap();

    let _: Value = client.invoke(&item(), vec![ArgValue::from("lamp")]).await.unwrap();
    client.shutdown().await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(!content.contains("live-key-42"));
    let record: Value = serde_json::from_str(content.trim()).unwrap();
    assert_eq!(record["request"]["url"], "http://h/items/lamp");
    assert_eq!(record["response"]["status"], 200);
    assert_eq!(record["response"]["body"], r#"{"name":"lamp"}"#);
}
