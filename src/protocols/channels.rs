//! Channel membership registry.
//!
//! Per-adapter bookkeeping of which local connections belong to which
//! channels, with the reverse index needed to vacate a disconnecting
//! connection from everything at once. Join and leave are race-safe no-ops
//! for unknown channels or connections.

use super::ConnectionId;
use std::collections::{HashMap, HashSet};

/// Bidirectional channel membership index.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    members: HashMap<String, HashSet<ConnectionId>>,
    channels_of: HashMap<ConnectionId, HashSet<String>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a channel. Joining twice is a no-op.
    pub fn join(&mut self, channel: &str, connection_id: ConnectionId) {
        self.members
            .entry(channel.to_string())
            .or_default()
            .insert(connection_id);
        self.channels_of
            .entry(connection_id)
            .or_default()
            .insert(channel.to_string());
    }

    /// Remove a connection from a channel. Unknown channel or non-member
    /// connection is a no-op.
    pub fn leave(&mut self, channel: &str, connection_id: ConnectionId) {
        if let Some(members) = self.members.get_mut(channel) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.members.remove(channel);
            }
        }
        if let Some(channels) = self.channels_of.get_mut(&connection_id) {
            channels.remove(channel);
            if channels.is_empty() {
                self.channels_of.remove(&connection_id);
            }
        }
    }

    /// Drop a connection from every channel it joined, returning the
    /// channels it vacated.
    pub fn remove_connection(&mut self, connection_id: ConnectionId) -> Vec<String> {
        let Some(channels) = self.channels_of.remove(&connection_id) else {
            return Vec::new();
        };
        for channel in &channels {
            if let Some(members) = self.members.get_mut(channel) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.members.remove(channel);
                }
            }
        }
        channels.into_iter().collect()
    }

    /// Members of a channel, if any.
    pub fn members(&self, channel: &str) -> Option<&HashSet<ConnectionId>> {
        self.members.get(channel)
    }

    /// Whether a connection belongs to a channel.
    pub fn is_member(&self, channel: &str, connection_id: ConnectionId) -> bool {
        self.members
            .get(channel)
            .is_some_and(|m| m.contains(&connection_id))
    }

    /// Channels a connection currently belongs to.
    pub fn channels_of(&self, connection_id: ConnectionId) -> Option<&HashSet<String>> {
        self.channels_of.get(&connection_id)
    }

    /// Number of channels with at least one member.
    pub fn channel_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave_round_trip() {
        let mut registry = ChannelRegistry::new();
        let c1 = ConnectionId(1);

        registry.join("ch", c1);
        assert!(registry.is_member("ch", c1));
        assert_eq!(registry.channel_count(), 1);

        // Double join stays single membership.
        registry.join("ch", c1);
        assert_eq!(registry.members("ch").unwrap().len(), 1);

        registry.leave("ch", c1);
        assert!(!registry.is_member("ch", c1));
        // Empty channels disappear entirely.
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.channels_of(c1).is_none());
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let mut registry = ChannelRegistry::new();
        registry.leave("missing", ConnectionId(9));
        registry.join("ch", ConnectionId(1));
        registry.leave("ch", ConnectionId(2));
        assert!(registry.is_member("ch", ConnectionId(1)));
    }

    #[test]
    fn test_remove_connection_vacates_everything() {
        let mut registry = ChannelRegistry::new();
        let c1 = ConnectionId(1);
        let c2 = ConnectionId(2);
        registry.join("a", c1);
        registry.join("b", c1);
        registry.join("b", c2);

        let mut vacated = registry.remove_connection(c1);
        vacated.sort();
        assert_eq!(vacated, vec!["a".to_string(), "b".to_string()]);

        assert!(registry.members("a").is_none());
        assert!(registry.is_member("b", c2));
        assert!(registry.remove_connection(c1).is_empty());
    }
}
