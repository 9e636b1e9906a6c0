//! Structural diffs between checkpoint states
//!
//! A [`StateDiff`] carries only the sections that changed between two states.
//! For any pair of states `apply(prev, diff(prev, cur)) == cur`:
//!
//! - conversation messages are treated as append-only; a diff normally carries
//!   just the new suffix and the length of the history it extends. A history
//!   that was rewritten rather than extended is carried in full.
//! - context keys are shallow-merged, with removals listed separately
//! - tasks and agents are upserted by id, with removals listed separately
//! - memory is replaced wholesale when anything in it changed

use crate::state::{AgentSnapshot, CheckpointState, MemorySnapshot, Message, TaskSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MessageDelta {
    /// New messages following the first `base_len` messages of the parent
    Append {
        base_len: usize,
        messages: Vec<Message>,
    },
    /// The whole history, used when the parent's messages were not a prefix
    Replace { messages: Vec<Message> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<MessageDelta>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_context: Vec<String>,
}

impl ConversationDiff {
    pub fn is_empty(&self) -> bool {
        self.messages.is_none() && self.context.is_empty() && self.removed_context.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum CustomDelta {
    #[default]
    Unchanged,
    Set(Value),
    Cleared,
}

impl CustomDelta {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, CustomDelta::Unchanged)
    }
}

/// Changed subset of a [`CheckpointState`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    #[serde(default)]
    pub conversation: ConversationDiff,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tasks: BTreeMap<String, TaskSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agents: BTreeMap<String, AgentSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySnapshot>,
    #[serde(default, skip_serializing_if = "CustomDelta::is_unchanged")]
    pub custom: CustomDelta,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.conversation.is_empty()
            && self.tasks.is_empty()
            && self.removed_tasks.is_empty()
            && self.agents.is_empty()
            && self.removed_agents.is_empty()
            && self.memory.is_none()
            && self.custom.is_unchanged()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    #[error("diff appends to {expected} messages but the base has {found}")]
    BaseLengthMismatch { expected: usize, found: usize },
}

/// Computes and replays [`StateDiff`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    /// Returns `None` when the states are equal
    pub fn diff(previous: &CheckpointState, current: &CheckpointState) -> Option<StateDiff> {
        let diff = StateDiff {
            conversation: ConversationDiff {
                messages: message_delta(
                    &previous.conversation.messages,
                    &current.conversation.messages,
                ),
                context: changed_entries(&current.conversation.context, |k| {
                    previous.conversation.context.get(k)
                }),
                removed_context: removed_keys(
                    previous.conversation.context.keys(),
                    |k| current.conversation.context.contains_key(k),
                ),
            },
            tasks: changed_entries(&current.tasks, |k| previous.tasks.get(k)),
            removed_tasks: removed_keys(previous.tasks.keys(), |k| current.tasks.contains_key(k)),
            agents: changed_entries(&current.agents, |k| previous.agents.get(k)),
            removed_agents: removed_keys(previous.agents.keys(), |k| {
                current.agents.contains_key(k)
            }),
            memory: (previous.memory != current.memory).then(|| current.memory.clone()),
            custom: match (&previous.custom, &current.custom) {
                (prev, cur) if prev == cur => CustomDelta::Unchanged,
                (_, Some(value)) => CustomDelta::Set(value.clone()),
                (_, None) => CustomDelta::Cleared,
            },
        };

        (!diff.is_empty()).then_some(diff)
    }

    pub fn apply(base: &CheckpointState, diff: &StateDiff) -> Result<CheckpointState, DiffError> {
        let mut state = base.clone();

        match &diff.conversation.messages {
            Some(MessageDelta::Append { base_len, messages }) => {
                let found = state.conversation.messages.len();
                if found != *base_len {
                    return Err(DiffError::BaseLengthMismatch {
                        expected: *base_len,
                        found,
                    });
                }
                state.conversation.messages.extend(messages.iter().cloned());
            }
            Some(MessageDelta::Replace { messages }) => {
                state.conversation.messages = messages.clone();
            }
            None => {}
        }

        for key in &diff.conversation.removed_context {
            state.conversation.context.remove(key);
        }
        for (key, value) in &diff.conversation.context {
            state.conversation.context.insert(key.clone(), value.clone());
        }

        for id in &diff.removed_tasks {
            state.tasks.remove(id);
        }
        state
            .tasks
            .extend(diff.tasks.iter().map(|(k, v)| (k.clone(), v.clone())));

        for id in &diff.removed_agents {
            state.agents.remove(id);
        }
        state
            .agents
            .extend(diff.agents.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(memory) = &diff.memory {
            state.memory = memory.clone();
        }

        match &diff.custom {
            CustomDelta::Unchanged => {}
            CustomDelta::Set(value) => state.custom = Some(value.clone()),
            CustomDelta::Cleared => state.custom = None,
        }

        Ok(state)
    }
}

fn message_delta(previous: &[Message], current: &[Message]) -> Option<MessageDelta> {
    if current.len() >= previous.len() && current[..previous.len()] == *previous {
        (current.len() > previous.len()).then(|| MessageDelta::Append {
            base_len: previous.len(),
            messages: current[previous.len()..].to_vec(),
        })
    } else {
        Some(MessageDelta::Replace {
            messages: current.to_vec(),
        })
    }
}

/// Entries of `current` that are new or differ from what `previous` holds
fn changed_entries<'a, V, C>(
    current: impl IntoIterator<Item = (&'a String, &'a V)>,
    previous: impl Fn(&str) -> Option<&'a V>,
) -> C
where
    V: PartialEq + Clone + 'a,
    C: FromIterator<(String, V)>,
{
    current
        .into_iter()
        .filter(|(key, value)| previous(key.as_str()) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn removed_keys<'a>(
    previous: impl Iterator<Item = &'a String>,
    still_present: impl Fn(&String) -> bool,
) -> Vec<String> {
    previous.filter(|k| !still_present(k)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Message;
    use proptest::prelude::*;
    use serde_json::json;

    fn base() -> CheckpointState {
        CheckpointState::new()
            .with_message(Message::user("plan the release"))
            .with_context("branch", json!("main"))
            .with_task(TaskSnapshot::new("t1", "write notes", "pending"))
            .with_task(TaskSnapshot::new("t2", "tag build", "pending"))
            .with_agent(AgentSnapshot::new("a1", "planner", "idle"))
    }

    #[test]
    fn test_identical_states_have_no_diff() {
        assert!(DiffEngine::diff(&base(), &base()).is_none());
    }

    #[test]
    fn test_appended_messages_carry_only_suffix() {
        let prev = base();
        let cur = prev.clone().with_message(Message::assistant("on it"));

        let diff = DiffEngine::diff(&prev, &cur).unwrap();
        assert_eq!(
            diff.conversation.messages,
            Some(MessageDelta::Append {
                base_len: 1,
                messages: vec![Message::assistant("on it")],
            })
        );
        assert!(diff.tasks.is_empty());
        assert!(diff.memory.is_none());
        assert_eq!(DiffEngine::apply(&prev, &diff).unwrap(), cur);
    }

    #[test]
    fn test_only_changed_tasks_are_included() {
        let prev = base();
        let mut cur = prev.clone();
        cur.upsert_task(TaskSnapshot::new("t1", "write notes", "done"));
        cur.upsert_task(TaskSnapshot::new("t3", "announce", "pending"));

        let diff = DiffEngine::diff(&prev, &cur).unwrap();
        assert_eq!(diff.tasks.len(), 2);
        assert!(diff.tasks.contains_key("t1"));
        assert!(diff.tasks.contains_key("t3"));
        assert!(!diff.tasks.contains_key("t2"));
    }

    #[test]
    fn test_removals_are_replayed() {
        let prev = base();
        let mut cur = prev.clone();
        cur.tasks.remove("t2");
        cur.conversation.context.remove("branch");

        let diff = DiffEngine::diff(&prev, &cur).unwrap();
        assert_eq!(diff.removed_tasks, vec!["t2".to_string()]);
        assert_eq!(diff.conversation.removed_context, vec!["branch".to_string()]);
        assert_eq!(DiffEngine::apply(&prev, &diff).unwrap(), cur);
    }

    #[test]
    fn test_memory_is_replaced_wholesale() {
        let prev = base();
        let mut cur = prev.clone();
        cur.memory.short_term.insert("focus".into(), json!("changelog"));

        let diff = DiffEngine::diff(&prev, &cur).unwrap();
        assert_eq!(diff.memory.as_ref(), Some(&cur.memory));
    }

    #[test]
    fn test_rewritten_history_is_replaced() {
        let prev = base().with_message(Message::assistant("draft"));
        let mut cur = prev.clone();
        cur.conversation.messages.truncate(1);

        let diff = DiffEngine::diff(&prev, &cur).unwrap();
        assert!(matches!(
            diff.conversation.messages,
            Some(MessageDelta::Replace { .. })
        ));
        assert_eq!(DiffEngine::apply(&prev, &diff).unwrap(), cur);
    }

    #[test]
    fn test_custom_cleared() {
        let prev = base().with_custom(json!({"step": 3}));
        let cur = base();

        let diff = DiffEngine::diff(&prev, &cur).unwrap();
        assert_eq!(diff.custom, CustomDelta::Cleared);
        assert_eq!(DiffEngine::apply(&prev, &diff).unwrap().custom, None);
    }

    #[test]
    fn test_append_on_wrong_base_is_rejected() {
        let prev = base();
        let cur = prev.clone().with_message(Message::assistant("ok"));
        let diff = DiffEngine::diff(&prev, &cur).unwrap();

        let err = DiffEngine::apply(&CheckpointState::new(), &diff).unwrap_err();
        assert_eq!(
            err,
            DiffError::BaseLengthMismatch {
                expected: 1,
                found: 0
            }
        );
    }

    #[test]
    fn test_unchanged_sections_are_omitted_from_json() {
        let prev = base();
        let cur = prev.clone().with_message(Message::assistant("ok"));
        let json = serde_json::to_value(DiffEngine::diff(&prev, &cur).unwrap()).unwrap();

        assert!(json.get("tasks").is_none());
        assert!(json.get("memory").is_none());
        assert!(json.get("custom").is_none());
        assert_eq!(json["conversation"]["messages"]["mode"], "append");
    }

    fn arb_state() -> impl Strategy<Value = CheckpointState> {
        let messages = prop::collection::vec(
            (prop::sample::select(vec!["user", "assistant"]), "[a-z]{0,4}"),
            0..5,
        );
        let context = prop::collection::btree_map("[a-c]", 0i64..3, 0..3);
        let tasks = prop::collection::btree_map("t[1-3]", prop::sample::select(vec!["pending", "done"]), 0..3);
        let agents = prop::collection::btree_map("a[1-2]", prop::sample::select(vec!["idle", "busy"]), 0..2);
        let memory = prop::collection::btree_map("[x-z]", 0i64..3, 0..2);
        let custom = prop::option::of(0i64..3);

        (messages, context, tasks, agents, memory, custom).prop_map(
            |(messages, context, tasks, agents, memory, custom)| {
                let mut state = CheckpointState::new();
                for (role, content) in messages {
                    state = state.with_message(Message::new(role, content));
                }
                for (key, value) in context {
                    state = state.with_context(key, json!(value));
                }
                for (id, status) in tasks {
                    state.upsert_task(TaskSnapshot::new(id, "task", status));
                }
                for (id, status) in agents {
                    state.upsert_agent(AgentSnapshot::new(id, "worker", status));
                }
                for (key, value) in memory {
                    state.memory.short_term.insert(key, json!(value));
                }
                state.custom = custom.map(|v| json!(v));
                state
            },
        )
    }

    proptest! {
        #[test]
        fn prop_apply_inverts_diff(prev in arb_state(), cur in arb_state()) {
            match DiffEngine::diff(&prev, &cur) {
                Some(diff) => prop_assert_eq!(DiffEngine::apply(&prev, &diff).unwrap(), cur),
                None => prop_assert_eq!(prev, cur),
            }
        }

        #[test]
        fn prop_extending_history_appends(prev in arb_state(), extra in prop::collection::vec("[a-z]{1,4}", 1..3)) {
            let mut cur = prev.clone();
            for content in &extra {
                cur.conversation.push(Message::assistant(content.clone()));
            }
            let diff = DiffEngine::diff(&prev, &cur).unwrap();
            let is_append = matches!(diff.conversation.messages, Some(MessageDelta::Append { .. }));
            prop_assert!(is_append);
        }
    }
}
