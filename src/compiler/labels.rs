//! Compile-time label table.
//!
//! A label's stored value is its target instruction's index in the
//! assembly stream minus the number of labels already defined before it —
//! labels themselves occupy no instruction slot, so this correction keeps
//! a label's value equal to the index it will actually have once every
//! other label line is stripped out by the assembler.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("label '{0}' is already defined")]
    AlreadyDefined(String),
    #[error("label '{0}' is not defined")]
    NotDefined(String),
}

#[derive(Debug, Clone, Default)]
pub struct LabelManager {
    labels: HashMap<String, usize>,
    label_count: usize,
    if_count: usize,
}

impl LabelManager {
    pub fn new() -> Self {
        LabelManager::default()
    }

    /// Define `name` to point at `current_assembly_length`, the number of
    /// instructions emitted so far (not counting label pseudo-lines).
    pub fn add_label(&mut self, name: &str, current_assembly_length: usize) -> Result<(), LabelError> {
        if self.labels.contains_key(name) {
            return Err(LabelError::AlreadyDefined(name.to_string()));
        }
        self.labels
            .insert(name.to_string(), current_assembly_length - self.label_count);
        self.label_count += 1;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<usize, LabelError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| LabelError::NotDefined(name.to_string()))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Result<(), LabelError> {
        self.labels
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| LabelError::NotDefined(name.to_string()))
    }

    /// Re-point an already-defined label, used when a forward reference is
    /// patched once its target becomes known.
    pub fn update(&mut self, name: &str, new_value: usize) -> Result<(), LabelError> {
        let slot = self
            .labels
            .get_mut(name)
            .ok_or_else(|| LabelError::NotDefined(name.to_string()))?;
        *slot = new_value;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.label_count = 0;
        self.if_count = 0;
    }

    /// Mint a fresh, guaranteed-unique label name for a synthesized branch
    /// target (an `if`/`while` lowering that needs its own skip/exit label).
    pub fn create_if_label(&mut self, prefix: &str) -> String {
        let name = format!("__{prefix}_{}", self.if_count);
        self.if_count += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_value_discounts_preceding_labels() {
        let mut labels = LabelManager::new();
        labels.add_label("start", 0).unwrap();
        // one real instruction emitted between "start" and "loop"
        labels.add_label("loop", 1).unwrap();
        assert_eq!(labels.get("start").unwrap(), 0);
        assert_eq!(labels.get("loop").unwrap(), 0);
    }

    #[test]
    fn second_label_after_instructions_accounts_for_first_labels_discount() {
        let mut labels = LabelManager::new();
        labels.add_label("a", 0).unwrap();
        // three real instructions emitted after "a"
        labels.add_label("b", 3).unwrap();
        assert_eq!(labels.get("b").unwrap(), 2);
    }

    #[test]
    fn redefining_a_label_is_an_error() {
        let mut labels = LabelManager::new();
        labels.add_label("x", 0).unwrap();
        assert_eq!(
            labels.add_label("x", 5).unwrap_err(),
            LabelError::AlreadyDefined("x".into())
        );
    }

    #[test]
    fn generated_if_labels_are_unique_and_prefixed() {
        let mut labels = LabelManager::new();
        let a = labels.create_if_label("else");
        let b = labels.create_if_label("else");
        assert_ne!(a, b);
        assert!(a.starts_with("__else_"));
    }

    #[test]
    fn lookup_of_unknown_label_fails() {
        let labels = LabelManager::new();
        assert_eq!(
            labels.get("missing").unwrap_err(),
            LabelError::NotDefined("missing".into())
        );
    }
}
