// src/mailbox.rs
//! Mailbox collaborator: where threads come from and where follow-up actions go.
//!
//! The core only needs `id`, `from`, `subject` and `body` of a message; how a
//! provider obtains them is its own business.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::thread::Thread;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("message {0} not found")]
    NotFound(String),
    #[error("label '{0}' not found")]
    LabelNotFound(String),
    #[error("mailbox provider: {0}")]
    Provider(String),
}

pub type MailboxResult<T> = std::result::Result<T, MailboxError>;

#[async_trait::async_trait]
pub trait Mailbox: Send + Sync {
    async fn list_unread(&self) -> MailboxResult<Vec<MessageRef>>;
    async fn get_content(&self, message: &MessageRef) -> MailboxResult<MessageContent>;
    /// Returns the id of the sent message.
    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: &str,
    ) -> MailboxResult<String>;
    async fn apply_label(&self, message_id: &str, label_name: &str) -> MailboxResult<()>;
    async fn archive(&self, message_id: &str) -> MailboxResult<()>;
    fn name(&self) -> &'static str;
}

/// Follow-up a reviewer can attach to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailboxAction {
    Archive,
    Label { name: String },
    Reply { body: String },
}

/// Fetch every unread message as a one-message thread. Messages whose
/// content cannot be fetched are skipped.
pub async fn ingest_unread(mailbox: &dyn Mailbox) -> MailboxResult<Vec<Thread>> {
    let refs = mailbox.list_unread().await?;
    let mut threads = Vec::with_capacity(refs.len());
    for r in &refs {
        match mailbox.get_content(r).await {
            Ok(content) => threads.push(Thread::from_message(content)),
            Err(e) => warn!(message_id = %r.id, mailbox = mailbox.name(), error = %e, "skipping message"),
        }
    }
    info!(unread = refs.len(), ingested = threads.len(), mailbox = mailbox.name(), "inbox ingested");
    Ok(threads)
}

/// Run one follow-up on `message`. Replies go to `reply_to`, or to the sender.
/// Returns the sent message id for replies.
pub async fn perform(
    mailbox: &dyn Mailbox,
    message: &MessageContent,
    action: &MailboxAction,
    reply_to: Option<&str>,
) -> MailboxResult<Option<String>> {
    match action {
        MailboxAction::Archive => {
            mailbox.archive(&message.id).await?;
            Ok(None)
        }
        MailboxAction::Label { name } => {
            mailbox.apply_label(&message.id, name).await?;
            Ok(None)
        }
        MailboxAction::Reply { body } => {
            let to = reply_to.unwrap_or(&message.from);
            let sent = mailbox
                .send_reply(to, &reply_subject(&message.subject), body, &message.id)
                .await?;
            Ok(Some(sent))
        }
    }
}

fn reply_subject(subject: &str) -> String {
    if subject.trim_start().to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    pub id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    messages: BTreeMap<String, (MessageRef, MessageContent)>,
    unread: BTreeSet<String>,
    inbox: BTreeSet<String>,
    labels: BTreeSet<String>,
    applied: Vec<(String, String)>,
    sent: Vec<SentReply>,
}

/// In-process mailbox.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    state: Mutex<MemoryState>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels that `apply_label` accepts.
    pub fn with_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mb = Self::default();
        if let Ok(mut g) = mb.state.lock() {
            g.labels = labels.into_iter().map(Into::into).collect();
        }
        mb
    }

    /// Deliver an unread message into the inbox.
    pub fn deliver(&self, thread_id: &str, content: MessageContent) {
        if let Ok(mut g) = self.state.lock() {
            let id = content.id.clone();
            let r = MessageRef {
                id: id.clone(),
                thread_id: thread_id.to_string(),
            };
            g.unread.insert(id.clone());
            g.inbox.insert(id.clone());
            g.messages.insert(id, (r, content));
        }
    }

    pub fn in_inbox(&self, message_id: &str) -> bool {
        self.state
            .lock()
            .map(|g| g.inbox.contains(message_id))
            .unwrap_or(false)
    }

    pub fn applied_labels(&self) -> Vec<(String, String)> {
        self.state.lock().map(|g| g.applied.clone()).unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<SentReply> {
        self.state.lock().map(|g| g.sent.clone()).unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> MailboxResult<T>) -> MailboxResult<T> {
        let mut g = self
            .state
            .lock()
            .map_err(|_| MailboxError::Provider("mailbox state poisoned".into()))?;
        f(&mut g)
    }
}

#[async_trait::async_trait]
impl Mailbox for MemoryMailbox {
    async fn list_unread(&self) -> MailboxResult<Vec<MessageRef>> {
        self.with_state(|s| {
            Ok(s.unread
                .iter()
                .filter_map(|id| s.messages.get(id).map(|(r, _)| r.clone()))
                .collect())
        })
    }

    async fn get_content(&self, message: &MessageRef) -> MailboxResult<MessageContent> {
        self.with_state(|s| {
            s.messages
                .get(&message.id)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| MailboxError::NotFound(message.id.clone()))
        })
    }

    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: &str,
    ) -> MailboxResult<String> {
        self.with_state(|s| {
            let id = format!("sent-{}", s.sent.len() + 1);
            s.sent.push(SentReply {
                id: id.clone(),
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                thread_id: thread_id.to_string(),
            });
            Ok(id)
        })
    }

    async fn apply_label(&self, message_id: &str, label_name: &str) -> MailboxResult<()> {
        self.with_state(|s| {
            if !s.labels.contains(label_name) {
                return Err(MailboxError::LabelNotFound(label_name.to_string()));
            }
            if !s.messages.contains_key(message_id) {
                return Err(MailboxError::NotFound(message_id.to_string()));
            }
            s.applied.push((message_id.to_string(), label_name.to_string()));
            Ok(())
        })
    }

    async fn archive(&self, message_id: &str) -> MailboxResult<()> {
        self.with_state(|s| {
            if !s.messages.contains_key(message_id) {
                return Err(MailboxError::NotFound(message_id.to_string()));
            }
            s.inbox.remove(message_id);
            s.unread.remove(message_id);
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
