#![allow(dead_code)]

use async_trait::async_trait;
use oxide_shop::gateway::{ChatId, GatewayError, MessageRef, MessagingGateway};
use oxide_shop::responder::{Responder, ResponderError};
use oxide_shop::ActorId;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Gateway that records every call
#[derive(Default)]
pub struct RecordingGateway {
    next_id: AtomicI32,
    sent: Mutex<Vec<(ChatId, String)>>,
    edited: Mutex<Vec<(MessageRef, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    panic_on: Mutex<Option<ChatId>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `send_text` to `chat` panic
    pub fn panic_on_send(&self, chat: ChatId) {
        *self.panic_on.lock().expect("lock") = Some(chat);
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == chat)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn last_text_to(&self, chat: ChatId) -> Option<String> {
        self.texts_to(chat).pop()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edited.lock().expect("lock").clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().expect("lock").clone()
    }

    /// Everything shown in `chat`, sent or edited in place
    pub fn shown_in(&self, chat: ChatId) -> Vec<String> {
        let mut shown = self.texts_to(chat);
        shown.extend(
            self.edits()
                .into_iter()
                .filter(|(message, _)| message.chat == chat)
                .map(|(_, text)| text),
        );
        shown
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, GatewayError> {
        if *self.panic_on.lock().expect("lock") == Some(chat) {
            panic!("send to {chat:?} exploded");
        }
        self.sent.lock().expect("lock").push((chat, text.to_string()));
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageRef { chat, message_id })
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), GatewayError> {
        self.edited
            .lock()
            .expect("lock")
            .push((message, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), GatewayError> {
        self.deleted.lock().expect("lock").push(message);
        Ok(())
    }

    async fn send_typing(&self, _chat: ChatId) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// How a [`FakeResponder`] answers
pub enum Behavior {
    /// Reply immediately
    Reply(String),
    /// Reply once a permit is available on the gate
    Gated(Arc<Semaphore>, String),
    /// Sleep before replying
    Slow(Duration, String),
    /// Panic when the text equals the trigger, reply otherwise
    PanicOn(String, String),
    /// Always fail
    Fail,
}

pub struct FakeResponder {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl FakeResponder {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Responder for FakeResponder {
    async fn process_message(
        &self,
        _actor: ActorId,
        _display_name: &str,
        text: &str,
    ) -> Result<String, ResponderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(reply) => Ok(reply.clone()),
            Behavior::Gated(gate, reply) => {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
                Ok(reply.clone())
            }
            Behavior::Slow(delay, reply) => {
                tokio::time::sleep(*delay).await;
                Ok(reply.clone())
            }
            Behavior::PanicOn(trigger, reply) => {
                if text == trigger {
                    panic!("responder exploded");
                }
                Ok(reply.clone())
            }
            Behavior::Fail => Err(ResponderError::Api("upstream 500".to_string())),
        }
    }
}

/// Poll `check` until it holds, failing the test after a few seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..600 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}
