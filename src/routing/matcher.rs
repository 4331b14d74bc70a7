//! Route matching logic.
//!
//! # Responsibilities
//! - Match literal path prefixes (case-sensitive)
//! - Recognise the channel path class and capture the channel identifier
//!
//! # Design Decisions
//! - Prefix matching is a plain `starts_with`; the router orders by length
//! - Regex is reserved for the four channel patterns, compiled once

use regex::Regex;

use crate::broker::DeliveryMode;

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Specificity used for longest-prefix ordering.
    pub fn len(&self) -> usize {
        self.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }
}

/// What a channel path asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    Subscribe(DeliveryMode),
    Publish(DeliveryMode),
}

/// A path in the channel class with its captured identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMatch {
    pub action: ChannelAction,
    pub channel: String,
}

const CHANNEL_PATTERNS: [(&str, ChannelAction); 4] = [
    ("^/lp/sub/(.*)$", ChannelAction::Subscribe(DeliveryMode::LongPoll)),
    ("^/ev/sub/(.*)$", ChannelAction::Subscribe(DeliveryMode::EventStream)),
    ("^/lp/pub/(.*)$", ChannelAction::Publish(DeliveryMode::LongPoll)),
    ("^/ev/pub/(.*)$", ChannelAction::Publish(DeliveryMode::EventStream)),
];

/// Matches the channel subscribe/publish paths.
#[derive(Debug, Clone)]
pub struct ChannelMatcher {
    patterns: Vec<(Regex, ChannelAction)>,
}

impl ChannelMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = CHANNEL_PATTERNS
            .iter()
            .map(|(pattern, action)| Ok((Regex::new(pattern)?, *action)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { patterns })
    }

    /// Match a path. An empty identifier is not a channel.
    pub fn matches(&self, path: &str) -> Option<ChannelMatch> {
        self.patterns.iter().find_map(|(regex, action)| {
            let channel = regex.captures(path)?.get(1)?.as_str();
            (!channel.is_empty()).then(|| ChannelMatch {
                action: *action,
                channel: channel.to_string(),
            })
        })
    }
}
