//! Classifying one tick's model output

use std::collections::HashSet;

use crate::model::{ModelItem, Role};
use crate::tool::ToolCall;

/// Tool-call intentions from one model response that still need local
/// execution. Calls the provider already answered in the same response are
/// excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSet {
    calls: Vec<ToolCall>,
}

impl ActionSet {
    /// `None` when the response holds no unanswered tool calls, which is the
    /// terminal-tick signal.
    pub fn from_items(items: &[ModelItem]) -> Option<Self> {
        let answered: HashSet<&str> = items
            .iter()
            .filter_map(|item| match item {
                ModelItem::ToolResult(result) => Some(result.call_id.as_str()),
                _ => None,
            })
            .collect();

        let calls: Vec<ToolCall> = items
            .iter()
            .filter_map(|item| match item {
                ModelItem::ToolCall(call) if !answered.contains(call.call_id.as_str()) => {
                    Some(call.clone())
                }
                _ => None,
            })
            .collect();

        if calls.is_empty() {
            None
        } else {
            Some(Self { calls })
        }
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Text of the last assistant message with non-empty text, if any
pub fn terminal_text(items: &[ModelItem]) -> Option<String> {
    items.iter().rev().find_map(|item| match item {
        ModelItem::Message(message) if message.role == Role::Assistant => {
            let text = message.text();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    })
}
