//! Presence channel membership.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use webpubsub_shared::{Member, PresenceSubscriptionData};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Members {
    members: HashMap<String, Value>,
    my_id: Option<String>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Member> {
        self.members
            .get(id)
            .map(|info| Member::new(id, info.clone()))
    }

    pub fn each(&self, mut callback: impl FnMut(&Member)) {
        for member in self.iter() {
            callback(&member);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Member> + '_ {
        self.members
            .iter()
            .map(|(id, info)| Member::new(id.clone(), info.clone()))
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn my_id(&self) -> Option<&str> {
        self.my_id.as_deref()
    }

    /// The local user's entry, once both the identity and the member list are known.
    pub fn me(&self) -> Option<Member> {
        self.my_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn set_my_id(&mut self, id: impl Into<String>) {
        self.my_id = Some(id.into());
    }

    /// Replaces the member list with the server's snapshot.
    pub fn on_subscription(&mut self, data: PresenceSubscriptionData) {
        self.members = data.presence.hash;
    }

    /// Inserts or updates a member; a repeated id is not counted twice.
    pub fn add_member(&mut self, member: Member) -> Member {
        self.members.insert(member.id.clone(), member.info.clone());
        member
    }

    pub fn remove_member(&mut self, id: &str) -> Option<Member> {
        self.members
            .remove(id)
            .map(|info| Member::new(id, info))
    }

    pub fn reset(&mut self) {
        self.members.clear();
        self.my_id = None;
    }

    /// The view handed to `subscription_succeeded` listeners.
    pub fn to_value(&self) -> Value {
        let members: Map<String, Value> = self
            .members
            .iter()
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect();
        json!({
            "count": self.count(),
            "members": members,
            "myID": self.my_id,
            "me": self.me().map(|me| json!({"id": me.id, "info": me.info})),
        })
    }
}
