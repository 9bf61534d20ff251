//! Channel variants identifying where a turn came from and where replies go

use std::fmt;

use serde::{Deserialize, Serialize};

/// An input/output surface that can submit turns and receive notifications
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    /// A Telegram chat
    Telegram {
        /// Chat the message arrived in
        chat_id: i64,
    },

    /// An HTTP/SSE client
    Http {
        /// Client identifier assigned by the HTTP adapter
        client_id: String,
    },

    /// The local terminal
    Terminal,

    /// A synthetic turn produced by a finished worker
    Background {
        /// Worker that produced the result
        worker: String,
        /// Channel that originally dispatched the worker, if known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<Box<Channel>>,
    },
}

/// The kind of a channel, without its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Telegram,
    Http,
    Terminal,
    Background,
}

impl Channel {
    /// Create a background channel for a worker result
    pub fn background(worker: impl Into<String>, origin: Option<Channel>) -> Self {
        Channel::Background {
            worker: worker.into(),
            origin: origin.map(Box::new),
        }
    }

    /// Get the kind of this channel
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Telegram { .. } => ChannelKind::Telegram,
            Channel::Http { .. } => ChannelKind::Http,
            Channel::Terminal => ChannelKind::Terminal,
            Channel::Background { .. } => ChannelKind::Background,
        }
    }

    /// Check if this is a background channel
    pub fn is_background(&self) -> bool {
        matches!(self, Channel::Background { .. })
    }

    /// The user-facing channel replies for this turn should go to
    ///
    /// Background turns resolve to the channel that dispatched their worker,
    /// following nested background origins. Returns `None` when no user-facing
    /// channel is known.
    pub fn reply_channel(&self) -> Option<&Channel> {
        match self {
            Channel::Background { origin, .. } => {
                origin.as_deref().and_then(|o| o.reply_channel())
            }
            other => Some(other),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Telegram { chat_id } => write!(f, "telegram:{}", chat_id),
            Channel::Http { client_id } => write!(f, "http:{}", client_id),
            Channel::Terminal => write!(f, "terminal"),
            Channel::Background { worker, .. } => write!(f, "background:{}", worker),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Http => "http",
            ChannelKind::Terminal => "terminal",
            ChannelKind::Background => "background",
        };
        f.write_str(name)
    }
}
