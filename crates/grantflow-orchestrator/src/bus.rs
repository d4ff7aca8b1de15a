use crate::types::AgentRole;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Addressee of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(AgentRole),
    Broadcast,
}

/// Caller-supplied message, before the bus assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSpec {
    pub from: AgentRole,
    pub to: Recipient,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl MessageSpec {
    pub fn to(
        from: AgentRole,
        to: AgentRole,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            from,
            to: Recipient::Agent(to),
            message_type: message_type.into(),
            payload,
        }
    }

    pub fn broadcast(from: AgentRole, message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            from,
            to: Recipient::Broadcast,
            message_type: message_type.into(),
            payload,
        }
    }
}

/// An archived message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from: AgentRole,
    pub to: Recipient,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Result of a send: the archived message and the roles whose handler ran.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Message,
    pub delivered_to: Vec<AgentRole>,
}

/// Callback receiving messages addressed to one role.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Role-addressed message bus with an append-only archive.
///
/// Every message is archived before it is routed. A message for a role with
/// no handler is archived and otherwise dropped. Handlers run synchronously
/// on the sender's thread, outside the bus locks, so a handler may send.
pub struct MessageBus {
    log: Mutex<Vec<Message>>,
    handlers: RwLock<BTreeMap<AgentRole, MessageHandler>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Install the handler for `role`, replacing any previous one.
    pub fn register(&self, role: AgentRole, handler: MessageHandler) {
        self.handlers.write().insert(role, handler);
    }

    /// Remove the handler for `role`.
    pub fn unregister(&self, role: AgentRole) -> bool {
        self.handlers.write().remove(&role).is_some()
    }

    pub fn has_handler(&self, role: AgentRole) -> bool {
        self.handlers.read().contains_key(&role)
    }

    /// Archive and route a message.
    pub fn send(&self, spec: MessageSpec) -> Delivery {
        let message = Message {
            id: Uuid::new_v4(),
            from: spec.from,
            to: spec.to,
            message_type: spec.message_type,
            timestamp: Utc::now(),
            payload: spec.payload,
        };
        self.log.lock().push(message.clone());

        let targets: Vec<(AgentRole, MessageHandler)> = {
            let handlers = self.handlers.read();
            match message.to {
                Recipient::Broadcast => handlers
                    .iter()
                    .map(|(role, h)| (*role, Arc::clone(h)))
                    .collect(),
                Recipient::Agent(role) => handlers
                    .get(&role)
                    .map(|h| vec![(role, Arc::clone(h))])
                    .unwrap_or_default(),
            }
        };

        if targets.is_empty() {
            tracing::debug!(message_id = %message.id, to = ?message.to, "No handler registered; message archived only");
        }

        let mut delivered_to = Vec::with_capacity(targets.len());
        for (role, handler) in targets {
            handler(&message);
            delivered_to.push(role);
        }
        Delivery {
            message,
            delivered_to,
        }
    }

    /// Copy of the archive in send order.
    pub fn log(&self) -> Vec<Message> {
        self.log.lock().clone()
    }

    pub fn log_len(&self) -> usize {
        self.log.lock().len()
    }

    /// Empty the archive. Handlers stay registered.
    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
