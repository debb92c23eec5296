use std::sync::Arc;

use crate::support::{
    helpers::{decode_form, init_tracing, renderer, seeded_store},
    mock_mailgun::{MockMailgunServer, MockMailgunState},
};
use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use mailblast::{
    DeliveryTransport, DispatchConfig, DispatchEngine, DispatchStatus, MailgunTransport,
    MessageRenderer, Recipient, RecipientId, RecipientStore, TransportError, TransportOptions,
};
use serde_json::{json, Map};

fn options(server: &MockMailgunServer) -> TransportOptions {
    TransportOptions::new("mg.example.com", "key-test")
        .with_api_base_url(format!("{}/", server.url()))
}

fn first_recipient() -> Recipient {
    let mut fields = Map::new();
    fields.insert("name".into(), json!("User 1"));
    fields.insert("email".into(), json!("user1@example.com"));
    fields.insert("plan".into(), json!("pro"));
    Recipient::new(RecipientId::new(1), fields)
}

fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[tokio::test]
async fn posts_form_encoded_message_with_basic_auth() -> Result<()> {
    init_tracing();
    let state = MockMailgunState::new();
    let server = MockMailgunServer::start(state.clone()).await?;
    let transport = MailgunTransport::new(options(&server))?;
    assert_eq!(
        transport.endpoint(),
        format!("{}/v3/mg.example.com/messages", server.url())
    );

    let message = renderer().render(&first_recipient())?;
    transport.send(&message).await?;

    let requests = state.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/v3/mg.example.com/messages");
    assert_eq!(
        request.authorization.as_deref(),
        Some(format!("Basic {}", STANDARD.encode("api:key-test")).as_str())
    );
    assert_eq!(
        request.content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );

    let form = decode_form(&request.body);
    assert_eq!(field(&form, "from"), Some("Acme Billing <billing@acme.test>"));
    assert_eq!(field(&form, "to"), Some("User 1 <user1@example.com>"));
    assert_eq!(field(&form, "subject"), Some("Invoice for User 1"));
    assert_eq!(
        field(&form, "html"),
        Some("<p>Hi User 1, your pro plan renews soon.</p>")
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn non_success_status_surfaces_code_and_body() -> Result<()> {
    init_tracing();
    let state = MockMailgunState::new();
    state.respond_with(500, "mailbox service exploded");
    let server = MockMailgunServer::start(state.clone()).await?;
    let transport = MailgunTransport::new(options(&server))?;

    let message = renderer().render(&first_recipient())?;
    let err = transport.send(&message).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Http {
            status: 500,
            body: "mailbox service exploded".into(),
        }
    );
    assert_eq!(err.to_string(), "HTTP 500: mailbox service exploded");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_api_is_a_network_error() -> Result<()> {
    let state = MockMailgunState::new();
    let server = MockMailgunServer::start(state).await?;
    let url = server.url().to_owned();
    server.shutdown().await;

    let transport = MailgunTransport::new(
        TransportOptions::new("mg.example.com", "key-test").with_api_base_url(url),
    )?;
    let message = renderer().render(&first_recipient())?;
    let err = transport.send(&message).await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
    assert_eq!(err.status(), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_retries_rejected_submission_over_http() -> Result<()> {
    init_tracing();
    let state = MockMailgunState::new();
    state.respond_with(503, "try again later");
    let server = MockMailgunServer::start(state.clone()).await?;
    let transport: Arc<dyn DeliveryTransport> = Arc::new(MailgunTransport::new(options(&server))?);

    let store = seeded_store(6).await;
    let engine = DispatchEngine::new(
        DispatchConfig::default(),
        store.clone(),
        renderer(),
        transport,
    );
    engine.start().await?;
    let outcome = engine.wait().await?.expect("run outcome");

    assert!(outcome.is_completed());
    assert_eq!(outcome.summary().delivered, 6);
    assert_eq!(state.requests().len(), 7);

    let mut recipients: Vec<String> = state
        .requests()
        .iter()
        .filter_map(|request| field(&decode_form(&request.body), "to").map(str::to_owned))
        .collect();
    recipients.sort();
    recipients.dedup();
    assert_eq!(recipients.len(), 6);

    let page = store.get_page(1, 10).await?;
    assert!(page
        .records
        .iter()
        .all(|record| record.status == Some(DispatchStatus::Sent) && record.sent_at.is_some()));

    server.shutdown().await;
    Ok(())
}
