mod support;

use serde_json::{Value, json};
use support::MockTransport;
use tether_engine::{ArgValue, ClientConfig, RestClient, RestClientBuilder, RestError};
use tether_types::{ApiDescriptor, InvocationResult, MethodDescriptor, MethodId, WireKind};

fn api() -> ApiDescriptor {
    ApiDescriptor::new("Orders")
        .with_method(MethodDescriptor::get("order", "/orders/{id}").with_param(WireKind::Path, "id"))
}

fn client(transport: MockTransport, wrap: bool) -> RestClient<MockTransport> {
    RestClientBuilder::new(api(), "http://h")
        .config(ClientConfig::default().wrap_unexpected_errors(wrap))
        .build(transport)
        .unwrap()
}

fn order() -> MethodId {
    MethodId::new("order")
}

#[tokio::test]
async fn transport_failures_are_wrapped_with_the_invocation() {
    let client = client(MockTransport::failing_send(), true);

    let error = client.invoke::<Value>(&order(), vec![ArgValue::from(7i64)]).await.unwrap_err();

    match &error {
        RestError::Wrapped { method, invocation, source } => {
            assert_eq!(method.as_str(), "order");
            assert_eq!(invocation.as_ref().map(|invocation| invocation.url.as_str()), Some("http://h/orders/7"));
            assert!(matches!(**source, RestError::Transport(_)));
        }
        other => panic!("expected Wrapped, got {other:?}"),
    }
    assert!(error.to_string().contains("connection refused"));
}

#[tokio::test]
async fn transport_failures_are_bare_when_wrapping_is_off() {
    let client = client(MockTransport::failing_send(), false);

    let error = client.invoke::<Value>(&order(), vec![ArgValue::from(7i64)]).await.unwrap_err();
    assert!(matches!(error, RestError::Transport(_)));
    assert!(error.invocation().is_none());
}

#[tokio::test]
async fn status_errors_are_enriched_whatever_the_wrap_setting() {
    for wrap in [true, false] {
        let transport = MockTransport::new(|_| InvocationResult::new(404, r#"{"error":"no such order"}"#));
        let client = client(transport, wrap);

        let error = client.invoke::<Value>(&order(), vec![ArgValue::from(9i64)]).await.unwrap_err();

        assert!(matches!(error, RestError::HttpStatus(_)), "wrap={wrap}: {error:?}");
        assert_eq!(error.status(), Some(404));
        assert_eq!(error.invocation().map(|invocation| invocation.path.as_str()), Some("/orders/9"));
    }
}

#[tokio::test]
async fn build_errors_follow_the_wrap_setting() {
    let wrapped = client(MockTransport::json(200, json!({})), true)
        .invoke::<Value>(&order(), vec![])
        .await
        .unwrap_err();
    assert!(wrapped.is_wrapped());
    assert!(wrapped.invocation().is_none());

    let bare = client(MockTransport::json(200, json!({})), false)
        .invoke::<Value>(&order(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(bare, RestError::InvalidArgument { .. }));
}

#[tokio::test]
async fn interceptor_failures_are_wrapped_with_the_invocation() {
    let config = ClientConfig::default().with_result_interceptor(|_| anyhow::bail!("envelope reported failure"));
    let client = RestClientBuilder::new(api(), "http://h")
        .config(config)
        .build(MockTransport::json(200, json!({"ok": false})))
        .unwrap();

    let error = client.invoke::<Value>(&order(), vec![ArgValue::from(1i64)]).await.unwrap_err();

    assert!(error.invocation().is_some());
    assert!(matches!(error.into_inner(), RestError::Interceptor(_)));
}
