//! Session working state captured by checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: None,
            metadata: Map::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Ordered message history plus free-form context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ConversationRecord {
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub data: Value,
}

impl TaskSnapshot {
    pub fn new(id: impl Into<String>, description: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: status.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub role: String,
    pub status: String,
    #[serde(default)]
    pub data: Value,
}

impl AgentSnapshot {
    pub fn new(id: impl Into<String>, role: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            status: status.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub short_term: Map<String, Value>,
    #[serde(default)]
    pub long_term: Map<String, Value>,
}

impl MemorySnapshot {
    pub fn is_empty(&self) -> bool {
        self.short_term.is_empty() && self.long_term.is_empty()
    }
}

/// Full working state of a session
///
/// Tasks and agents are keyed by their id so that diffs can upsert and remove
/// individual entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub conversation: ConversationRecord,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSnapshot>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSnapshot>,
    #[serde(default)]
    pub memory: MemorySnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.conversation.messages.push(message);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.conversation.context.insert(key.into(), value);
        self
    }

    pub fn with_task(mut self, task: TaskSnapshot) -> Self {
        self.upsert_task(task);
        self
    }

    pub fn with_agent(mut self, agent: AgentSnapshot) -> Self {
        self.upsert_agent(agent);
        self
    }

    pub fn with_custom(mut self, custom: Value) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn upsert_task(&mut self, task: TaskSnapshot) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn upsert_agent(&mut self, agent: AgentSnapshot) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn message_count(&self) -> usize {
        self.conversation.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_keys_tasks_by_id() {
        let state = CheckpointState::new()
            .with_task(TaskSnapshot::new("t1", "first", "pending"))
            .with_task(TaskSnapshot::new("t1", "first", "done"));

        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks["t1"].status, "done");
    }

    #[test]
    fn test_serialized_shape() {
        let state = CheckpointState::new()
            .with_message(Message::user("hello"))
            .with_agent(AgentSnapshot::new("a1", "planner", "idle"));

        let value = serde_json::to_value(&state).unwrap();
        assert!(value["conversation"]["messages"].is_array());
        assert!(value["tasks"].is_object());
        assert_eq!(value["agents"]["a1"]["role"], "planner");
        assert!(value.get("custom").is_none());
    }

    #[test]
    fn test_lenient_deserialization() {
        let state: CheckpointState = serde_json::from_value(json!({
            "conversation": { "messages": [{ "role": "user", "content": "hi" }] }
        }))
        .unwrap();

        assert_eq!(state.message_count(), 1);
        assert!(state.tasks.is_empty());
        assert!(state.memory.is_empty());
    }
}
