//! Topic naming under a fixed prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MQTT multi-level wildcard.
pub const MULTI_LEVEL_WILDCARD: char = '#';

/// MQTT single-level wildcard.
pub const SINGLE_LEVEL_WILDCARD: char = '+';

/// Character substituted for wildcards found in device topic names.
pub const WILDCARD_SUBSTITUTE: char = '$';

/// Prefix prepended to every forwarded topic.
///
/// Topics follow the pattern `<prefix><device topic>`, where the prefix is
/// either empty or ends with `/`:
/// ```text
/// crestron/light1
/// crestron/room/kitchen/level
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPrefix(String);

impl TopicPrefix {
    /// Create a prefix, rejecting wildcards and a missing trailing `/`.
    ///
    /// # Example
    /// ```
    /// use fieldmq_common::topic::TopicPrefix;
    ///
    /// assert!(TopicPrefix::new("crestron/").is_ok());
    /// assert!(TopicPrefix::new("crestron").is_err());
    /// assert!(TopicPrefix::new("crestron/#").is_err());
    /// ```
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();

        if prefix.contains([MULTI_LEVEL_WILDCARD, SINGLE_LEVEL_WILDCARD]) {
            return Err(Error::Topic(format!(
                "prefix '{}' must not contain wildcards",
                prefix
            )));
        }
        if !prefix.is_empty() && !prefix.ends_with('/') {
            return Err(Error::Topic(format!("prefix '{}' must end with '/'", prefix)));
        }

        Ok(Self(prefix))
    }

    /// The prefix as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the full topic for a device topic name.
    ///
    /// Wildcard characters are not allowed in published topic names, so any
    /// found in the device name are replaced with [`WILDCARD_SUBSTITUTE`].
    ///
    /// # Example
    /// ```
    /// use fieldmq_common::topic::TopicPrefix;
    ///
    /// let prefix = TopicPrefix::new("crestron/").unwrap();
    /// assert_eq!(prefix.topic("light1"), "crestron/light1");
    /// assert_eq!(prefix.topic("zone#2"), "crestron/zone$2");
    /// ```
    pub fn topic(&self, name: &str) -> String {
        let mut topic = String::with_capacity(self.0.len() + name.len());
        topic.push_str(&self.0);
        topic.extend(name.chars().map(|c| match c {
            MULTI_LEVEL_WILDCARD | SINGLE_LEVEL_WILDCARD => WILDCARD_SUBSTITUTE,
            other => other,
        }));
        topic
    }

    /// Subscription filter matching every topic under the prefix.
    ///
    /// # Example
    /// ```
    /// use fieldmq_common::topic::TopicPrefix;
    ///
    /// let prefix = TopicPrefix::new("crestron/").unwrap();
    /// assert_eq!(prefix.subscription_filter(), "crestron/#");
    /// ```
    pub fn subscription_filter(&self) -> String {
        format!("{}{}", self.0, MULTI_LEVEL_WILDCARD)
    }
}

impl fmt::Display for TopicPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicPrefix {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TopicPrefix> for String {
    fn from(prefix: TopicPrefix) -> Self {
        prefix.0
    }
}
