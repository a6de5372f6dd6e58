//! Contract Test: Operator Command Interpreter
//!
//! Constraints verified:
//! - Only the operator address is obeyed; others get no reply
//! - Recipient add/remove is idempotent and round-trips
//! - Device names can be set, listed and removed
//! - Usage errors are answered, chatter is ignored
//! - A persistence failure surfaces as an error
//!
//! If this test fails, the control plane is open or unreliable.

mod common;

use common::*;
use dioalert_core::address::AddressFormat;
use dioalert_core::command::CommandInterpreter;
use dioalert_core::dispatch::Dispatcher;
use dioalert_core::traits::{InboundMessage, RegistryStore};
use std::sync::Arc;
use std::time::Duration;

const NEW_NUMBER: &str = "1155512345";
const NEW_ADDRESS: &str = "5491155512345@s.whatsapp.net";

struct Fixture {
    gateway: RecordingGateway,
    registry: CountingRegistry,
    interpreter: CommandInterpreter,
}

fn fixture() -> Fixture {
    let gateway = RecordingGateway::new();
    let registry = CountingRegistry::with_operator();
    let dispatcher = Dispatcher::new(
        Arc::new(gateway.clone()),
        Arc::new(registry.clone()),
        Duration::ZERO,
    );
    let interpreter = CommandInterpreter::new(
        OPERATOR,
        AddressFormat::new("549", "s.whatsapp.net"),
        Arc::new(registry.clone()),
        dispatcher,
    );
    Fixture {
        gateway,
        registry,
        interpreter,
    }
}

impl Fixture {
    async fn say(&self, text: &str) -> Option<String> {
        self.interpreter
            .handle(&InboundMessage::new(OPERATOR, text))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn admin_then_lista_shows_short_form() {
    let f = fixture();

    let reply = f.say(&format!("+admin {}", NEW_NUMBER)).await.unwrap();
    assert!(reply.contains("added"), "{}", reply);
    assert_eq!(
        f.registry.recipients().await.unwrap(),
        vec![OPERATOR, NEW_ADDRESS]
    );

    let listing = f.say("lista").await.unwrap();
    assert!(listing.contains(NEW_NUMBER), "{}", listing);
    assert!(listing.contains("1156511894"), "{}", listing);
    assert!(!listing.contains("@s.whatsapp.net"), "{}", listing);

    // Every reply goes back to the operator
    assert_eq!(f.gateway.sent_to(OPERATOR), vec![reply, listing]);
}

#[tokio::test]
async fn admin_twice_equals_once_and_remove_restores() {
    let f = fixture();
    let before = f.registry.recipients().await.unwrap();

    f.say(&format!("+admin {}", NEW_NUMBER)).await;
    let again = f.say(&format!("+admin {}", NEW_NUMBER)).await.unwrap();
    assert!(again.contains("already"), "{}", again);
    assert_eq!(f.registry.recipients().await.unwrap().len(), before.len() + 1);

    let removed = f.say(&format!("-admin {}", NEW_NUMBER)).await.unwrap();
    assert!(removed.contains("removed"), "{}", removed);
    assert_eq!(f.registry.recipients().await.unwrap(), before);

    let missing = f.say(&format!("-admin {}", NEW_NUMBER)).await.unwrap();
    assert!(missing.contains("not found"), "{}", missing);
}

#[tokio::test]
async fn full_international_number_is_not_double_prefixed() {
    let f = fixture();
    f.say("+admin 5491155512345").await.unwrap();
    assert!(f
        .registry
        .recipients()
        .await
        .unwrap()
        .contains(&NEW_ADDRESS.to_string()));
}

#[tokio::test]
async fn names_lifecycle() {
    let f = fixture();

    let set = f.say("+nombre 123456789012 North Branch").await.unwrap();
    assert!(set.contains("North Branch") && set.contains("123456789012"), "{}", set);

    let listing = f.say("nombres").await.unwrap();
    assert!(listing.contains("North Branch"), "{}", listing);
    assert!(listing.contains("123456789012"), "{}", listing);

    let removed = f.say("-nombre 123456789012").await.unwrap();
    assert!(removed.contains("123456789012"), "{}", removed);

    let listing = f.say("nombres").await.unwrap();
    assert!(!listing.contains("123456789012"), "{}", listing);
    assert!(!listing.contains("North Branch"), "{}", listing);

    let missing = f.say("-nombre 123456789012").await.unwrap();
    assert!(missing.contains("not registered"), "{}", missing);
}

#[tokio::test]
async fn empty_registries_have_explicit_replies() {
    let f = fixture();
    f.registry.remove_recipient(OPERATOR).await.unwrap();

    assert_eq!(f.say("lista").await.unwrap(), "Notified numbers:\nnone");
    assert_eq!(f.say("NOMBRES").await.unwrap(), "No devices registered.");
}

#[tokio::test]
async fn non_operator_is_silently_ignored() {
    let f = fixture();
    let stranger = InboundMessage::new("5491199999999@s.whatsapp.net", "+admin 1199999999");

    let reply = f.interpreter.handle(&stranger).await.unwrap();

    assert_eq!(reply, None);
    assert_eq!(f.registry.mutation_count(), 0);
    assert!(f.gateway.sent().is_empty());
}

#[tokio::test]
async fn usage_errors_are_answered_and_chatter_is_not() {
    let f = fixture();

    let bad_admin = f.say("+admin 123").await.unwrap();
    assert!(bad_admin.starts_with("Usage: +admin"), "{}", bad_admin);

    let bad_name = f.say("+nombre 123456789012").await.unwrap();
    assert!(bad_name.starts_with("Usage: +nombre"), "{}", bad_name);

    assert_eq!(f.say("hello there").await, None);
    assert_eq!(f.registry.mutation_count(), 0);
    assert_eq!(f.gateway.sent_to(OPERATOR).len(), 2);
}

#[tokio::test]
async fn persistence_failure_is_reported() {
    let f = fixture();
    f.registry.make_read_only();

    let result = f
        .interpreter
        .handle(&InboundMessage::new(OPERATOR, "+admin 1155512345"))
        .await;

    tokio_test::assert_err!(result);
    assert!(f.gateway.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admin_commands_add_once() {
    let f = fixture();
    let interpreter = Arc::new(f.interpreter.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let interpreter = interpreter.clone();
        handles.push(tokio::spawn(async move {
            interpreter
                .handle(&InboundMessage::new(OPERATOR, "+admin 1155512345"))
                .await
                .unwrap()
                .unwrap()
        }));
    }

    let mut added = 0;
    for handle in handles {
        if handle.await.unwrap().contains("added") {
            added += 1;
        }
    }
    assert_eq!(added, 1);
    assert_eq!(f.registry.recipients().await.unwrap().len(), 2);
}
