// src/thread.rs
//! Input threads and the predictions produced for them.

use serde::{Deserialize, Deserializer, Serialize};

use crate::behavior::BehaviorLabel;
use crate::mailbox::MessageContent;

/// Separator placed between messages when a whole thread is flattened.
pub const MESSAGE_SEPARATOR: &str = "\n---\n";

/// One email conversation as found in the input corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender: String,
    /// Oldest first.
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<String>,
}

/// Which part of a thread is handed to the labeler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextPolicy {
    /// Every message, joined with [`MESSAGE_SEPARATOR`].
    #[default]
    FullThread,
    /// Only the most recent message.
    LatestMessage,
}

impl Thread {
    pub fn new(
        thread_id: impl Into<String>,
        sender: impl Into<String>,
        messages: Vec<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sender: sender.into(),
            messages,
        }
    }

    /// A single fetched mailbox message becomes a one-message thread.
    pub fn from_message(msg: MessageContent) -> Self {
        Self {
            thread_id: msg.id,
            sender: msg.from,
            messages: vec![msg.body],
        }
    }

    /// Text the labeler sees. A thread without messages yields "".
    pub fn email_text(&self, policy: TextPolicy) -> String {
        match policy {
            TextPolicy::FullThread => self.messages.join(MESSAGE_SEPARATOR),
            TextPolicy::LatestMessage => self.messages.last().cloned().unwrap_or_default(),
        }
    }
}

/// Pipeline output for one thread; the unit the review stage works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub thread_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub email_text: String,
    pub predicted_behavior: BehaviorLabel,
    pub suggested_action: String,
    /// Model probability in [0,1], when the strategy produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
