//! Topic → subscriber bookkeeping.
//!
//! A topic key exists only while it has at least one subscriber, so the
//! caller can drive poller and socket lifetimes off the transitions that
//! `subscribe` and `unsubscribe` report.

use std::collections::{BTreeMap, HashMap};

use portrelay_common::{OutboundMessage, Topic};
use serde_json::Value;

use super::port::{Port, PortId};

#[derive(Debug, Default)]
pub struct Registry {
    topics: HashMap<Topic, Vec<Port>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `port` to `topic`. Returns true when this made the topic active
    /// (its membership went from zero to one).
    pub fn subscribe(&mut self, port: Port, topic: Topic) -> bool {
        let activated = !self.topics.contains_key(&topic);
        let members = self.topics.entry(topic).or_default();
        if !members.iter().any(|member| member.id() == port.id()) {
            members.push(port);
        }
        activated
    }

    /// Remove `port` from `topic`. Returns true when the topic lost its last
    /// subscriber and was dropped. Unknown ports are ignored.
    pub fn unsubscribe(&mut self, port: PortId, topic: Topic) -> bool {
        let Some(members) = self.topics.get_mut(&topic) else {
            return false;
        };
        let before = members.len();
        members.retain(|member| member.id() != port);
        if members.len() == before || !members.is_empty() {
            return false;
        }
        self.topics.remove(&topic);
        true
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self, topic: Topic) -> bool {
        self.topics.contains_key(&topic)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map_or(0, Vec::len)
    }

    pub fn is_subscribed(&self, port: PortId, topic: Topic) -> bool {
        self.topics
            .get(&topic)
            .is_some_and(|members| members.iter().any(|member| member.id() == port))
    }

    /// Every topic `port` currently belongs to.
    pub fn topics_of(&self, port: PortId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .topics
            .iter()
            .filter(|(_, members)| members.iter().any(|member| member.id() == port))
            .map(|(topic, _)| *topic)
            .collect();
        topics.sort();
        topics
    }

    pub fn counts(&self) -> BTreeMap<Topic, usize> {
        self.topics
            .iter()
            .map(|(topic, members)| (*topic, members.len()))
            .collect()
    }

    /// Post `{topic, payload}` to every subscriber in subscription order.
    /// Returns how many ports accepted the message.
    pub fn broadcast(&self, topic: Topic, payload: &Value) -> usize {
        let Some(members) = self.topics.get(&topic) else {
            return 0;
        };
        members
            .iter()
            .filter(|member| {
                member.post(OutboundMessage::Broadcast {
                    topic,
                    payload: payload.clone(),
                })
            })
            .count()
    }
}
