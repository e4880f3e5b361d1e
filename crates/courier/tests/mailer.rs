//! Plugin pipeline behaviour of the mailer.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use courier::{
    EmailMessage, Error, HookStage, InMemoryTransport, Mailer, Plugin, Result, StreamTransport,
    Transport,
};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

/// Records every hook call into a shared log.
struct Recorder {
    name: &'static str,
    log: Log,
    fail_before: bool,
    fail_after: bool,
}

impl Recorder {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            fail_before: false,
            fail_after: false,
        }
    }
}

#[async_trait]
impl Plugin for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_before_send(&self, message: &mut EmailMessage) -> Result<()> {
        self.log.lock().unwrap().push(format!("before:{}", self.name));
        if self.fail_before {
            return Err(Error::Message("refused".into()));
        }
        message.headers.add("X-Seen-By", self.name);
        Ok(())
    }

    async fn on_after_send(&self, _message: &EmailMessage) -> Result<()> {
        self.log.lock().unwrap().push(format!("after:{}", self.name));
        if self.fail_after {
            return Err(Error::Message("audit unavailable".into()));
        }
        Ok(())
    }
}

/// Transport that logs its invocation before storing.
#[derive(Debug)]
struct LoggingTransport {
    log: Log,
    inner: InMemoryTransport,
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.log.lock().unwrap().push("transport".into());
        self.inner.send(message).await
    }
}

fn setup() -> (Log, InMemoryTransport, Arc<dyn Transport>) {
    let log = Log::default();
    let inner = InMemoryTransport::new();
    let transport = Arc::new(LoggingTransport {
        log: Arc::clone(&log),
        inner: inner.clone(),
    });
    (log, inner, transport)
}

fn message() -> EmailMessage {
    EmailMessage::new()
        .from("sender@example.com")
        .unwrap()
        .to("rcpt@example.com")
        .unwrap()
        .subject("Pipeline")
        .text("Body")
}

#[tokio::test]
async fn hooks_run_in_registration_order_around_transport() {
    let (log, outbox, transport) = setup();
    let mailer = Mailer::builder(transport)
        .plugin(Recorder::new("a", &log))
        .plugin(Recorder::new("b", &log))
        .build();

    mailer.send(&mut message()).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        ["before:a", "before:b", "transport", "after:a", "after:b"]
    );
    let delivered = outbox.mailbox();
    assert_eq!(delivered[0].headers.get_all("X-Seen-By"), ["a", "b"]);
}

#[tokio::test]
async fn first_before_failure_stops_everything() {
    let (log, outbox, transport) = setup();
    let mut failing = Recorder::new("b", &log);
    failing.fail_before = true;
    let mailer = Mailer::builder(transport)
        .plugin(Recorder::new("a", &log))
        .plugin(failing)
        .plugin(Recorder::new("c", &log))
        .build();

    let err = mailer.send(&mut message()).await.unwrap_err();

    match &err {
        Error::Plugin {
            stage,
            plugin,
            source,
        } => {
            assert_eq!(*stage, HookStage::BeforeSend);
            assert_eq!(plugin, "b");
            assert!(matches!(**source, Error::Message(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_delivered());
    assert_eq!(*log.lock().unwrap(), ["before:a", "before:b"]);
    assert!(outbox.is_empty());
}

#[tokio::test]
async fn after_failure_is_reported_as_delivered() {
    let (log, outbox, transport) = setup();
    let mut failing = Recorder::new("audit", &log);
    failing.fail_after = true;
    let mailer = Mailer::builder(transport)
        .plugins([Arc::new(failing) as Arc<dyn Plugin>])
        .plugin(Recorder::new("tail", &log))
        .build();

    let err = mailer.send(&mut message()).await.unwrap_err();

    assert!(err.is_delivered());
    assert!(err.to_string().contains("after send"));
    assert!(matches!(err, Error::Plugin { ref plugin, .. } if plugin == "audit"));
    assert_eq!(outbox.len(), 1);
    assert_eq!(
        *log.lock().unwrap(),
        ["before:audit", "before:tail", "transport", "after:audit", "after:tail"]
    );
}

#[tokio::test]
async fn first_after_failure_wins() {
    let (log, _, transport) = setup();
    let mut first = Recorder::new("first", &log);
    first.fail_after = true;
    let mut second = Recorder::new("second", &log);
    second.fail_after = true;
    let mailer = Mailer::builder(transport).plugin(first).plugin(second).build();

    let err = mailer.send(&mut message()).await.unwrap_err();

    assert!(matches!(err, Error::Plugin { ref plugin, .. } if plugin == "first"));
    assert!(log.lock().unwrap().contains(&"after:second".to_string()));
}

/// Adds a header whose value would split into several fields.
struct Injector;

#[async_trait]
impl Plugin for Injector {
    async fn on_before_send(&self, message: &mut EmailMessage) -> Result<()> {
        message
            .headers
            .add("X-Ref", "1\r\nBcc: leak@example.net\r\n\r\nforged body");
        Ok(())
    }
}

#[tokio::test]
async fn injected_header_lines_block_serializing_transports() {
    let mailer = Mailer::builder(Arc::new(StreamTransport::new(Vec::new())))
        .plugin(Injector)
        .build();

    let err = mailer.send(&mut message()).await.unwrap_err();

    assert!(matches!(err, Error::Message(_)));
    assert!(!err.is_delivered());
}

#[tokio::test]
async fn transport_errors_are_returned_unwrapped() {
    let (log, _, _) = setup();
    let mailer = Mailer::builder(Arc::new(courier::SmtpTransport::new("127.0.0.1", 1)))
        .plugin(Recorder::new("a", &log))
        .build();

    let err = mailer.send(&mut message()).await.unwrap_err();

    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(*log.lock().unwrap(), ["before:a"]);
}

#[tokio::test]
async fn mailer_is_shareable_across_tasks() {
    let outbox = InMemoryTransport::new();
    let mailer = Arc::new(Mailer::new(Arc::new(outbox.clone())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mailer = Arc::clone(&mailer);
            tokio::spawn(async move { mailer.send(&mut message()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(outbox.len(), 8);
}

#[tokio::test]
async fn dkim_plugin_signs_before_delivery() {
    let outbox = InMemoryTransport::new();
    let key = include_str!("fixtures/dkim_rsa_pkcs8.pem");
    let mailer = Mailer::builder(Arc::new(outbox.clone()))
        .plugin(courier::DkimSignature::new("news", courier::DkimKey::Pem(key.into())))
        .build();

    mailer.send(&mut message()).await.unwrap();

    let delivered = outbox.mailbox();
    let signature = delivered[0].headers.get("DKIM-Signature").unwrap();
    assert!(signature.contains("d=example.com; s=news;"));
    assert!(delivered[0].headers.contains("Message-ID"));
}
