//! Channel registry and the per-channel subscription state machine.

mod channel;
mod members;

pub use channel::{Channel, ChannelEvent, ChannelKind};
pub use members::Members;

pub(crate) use channel::{AuthorizationOutcome, ChannelContext, EventOutcome};

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::ClientError;

/// Validates `name` and builds a channel of the matching kind.
pub fn create_channel(name: &str) -> Result<Channel, ClientError> {
    match ChannelKind::from_name(name)? {
        ChannelKind::PrivateEncrypted => Err(ClientError::UnsupportedFeature(format!(
            "Tried to subscribe to {name}, but encrypted channels are not supported by this client"
        ))),
        kind => Ok(Channel::new(name, kind)),
    }
}

#[derive(Debug, Default)]
pub struct Channels {
    channels: HashMap<String, Channel>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel named `name`, creating it on first use.
    pub fn add(&mut self, name: &str) -> Result<&mut Channel, ClientError> {
        match self.channels.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(create_channel(name)?)),
        }
    }

    pub fn find(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        self.channels.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Marks every channel unsubscribed after the connection dropped.
    pub fn disconnect(&mut self) {
        for channel in self.channels.values_mut() {
            channel.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_returns_the_existing_channel() {
        let mut channels = Channels::new();
        channels.add("chat").unwrap().cancel_subscription();
        assert!(channels.add("chat").unwrap().is_subscription_cancelled());
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn encrypted_channels_are_unsupported() {
        let mut channels = Channels::new();
        assert!(matches!(
            channels.add("private-encrypted-secrets"),
            Err(ClientError::UnsupportedFeature(_))
        ));
        assert!(channels.is_empty());
    }

    #[test]
    fn hash_prefixed_names_are_rejected() {
        assert!(matches!(
            create_channel("#server-to-user-1"),
            Err(ClientError::BadChannelName(_))
        ));
    }
}
