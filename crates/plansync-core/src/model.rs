//! The in-memory editable design
//!
//! The session owns exactly one [`EditableModel`]. Saves serialize it with
//! `snapshot`, loads and conflict resolution overwrite it with `replace`.

use plansync_document::DesignPayload;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, VecDeque};

/// Undo depth kept by [`DesignModel`]
pub const HISTORY_LIMIT: usize = 100;

/// Model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Payload does not describe a design
    #[error("invalid design payload: {0}")]
    InvalidPayload(String),

    /// Model could not be serialized
    #[error("failed to serialize design: {0}")]
    Serialize(String),
}

/// Editable design owned by a session
pub trait EditableModel: Send {
    /// Serialize the current design
    ///
    /// # Errors
    /// Returns [`ModelError::Serialize`] if the design cannot be captured
    fn snapshot(&self) -> Result<DesignPayload, ModelError>;

    /// Overwrite the design; on error the model is unchanged
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidPayload`] if the payload is unusable
    fn replace(&mut self, payload: &DesignPayload) -> Result<(), ModelError>;

    /// Drop undo/redo history
    fn clear_history(&mut self);

    /// Drop the active selection
    fn clear_selection(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
struct Change {
    key: String,
    before: Option<Value>,
    after: Option<Value>,
}

/// Design held as a JSON object of named elements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignModel {
    elements: Map<String, Value>,
    undo: VecDeque<Change>,
    redo: Vec<Change>,
    selection: BTreeSet<String>,
}

impl DesignModel {
    /// Create empty design
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a payload
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidPayload`] unless the payload is an object
    pub fn from_payload(payload: &DesignPayload) -> Result<Self, ModelError> {
        let mut model = Self::new();
        model.replace(payload)?;
        Ok(model)
    }

    /// Element by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.elements.get(key)
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the design has no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Insert or overwrite an element
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let before = self.elements.insert(key.clone(), value.clone());
        self.record(Change {
            key,
            before,
            after: Some(value),
        });
    }

    /// Remove an element; returns it if present
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let before = self.elements.remove(key)?;
        self.selection.remove(key);
        self.record(Change {
            key: key.to_string(),
            before: Some(before.clone()),
            after: None,
        });
        Some(before)
    }

    /// Revert the last change
    pub fn undo(&mut self) -> bool {
        let Some(change) = self.undo.pop_back() else {
            return false;
        };
        self.apply(&change.key, change.before.clone());
        self.redo.push(change);
        true
    }

    /// Reapply the last undone change
    pub fn redo(&mut self) -> bool {
        let Some(change) = self.redo.pop() else {
            return false;
        };
        self.apply(&change.key, change.after.clone());
        self.undo.push_back(change);
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Select an existing element
    pub fn select(&mut self, key: &str) -> bool {
        if self.elements.contains_key(key) {
            self.selection.insert(key.to_string());
            true
        } else {
            false
        }
    }

    /// Selected element keys
    #[must_use]
    pub fn selection(&self) -> &BTreeSet<String> {
        &self.selection
    }

    fn record(&mut self, change: Change) {
        self.redo.clear();
        self.undo.push_back(change);
        while self.undo.len() > HISTORY_LIMIT {
            self.undo.pop_front();
        }
    }

    fn apply(&mut self, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.elements.insert(key.to_string(), value);
            }
            None => {
                self.elements.remove(key);
                self.selection.remove(key);
            }
        }
    }
}

impl EditableModel for DesignModel {
    fn snapshot(&self) -> Result<DesignPayload, ModelError> {
        Ok(DesignPayload::from_value(Value::Object(self.elements.clone())))
    }

    fn replace(&mut self, payload: &DesignPayload) -> Result<(), ModelError> {
        let Value::Object(elements) = payload.as_value() else {
            return Err(ModelError::InvalidPayload(
                "design payload must be a JSON object".into(),
            ));
        };
        self.elements = elements.clone();
        self.selection.retain(|key| self.elements.contains_key(key));
        Ok(())
    }

    fn clear_history(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn clear_selection(&mut self) {
        self.selection.clear();
    }
}
