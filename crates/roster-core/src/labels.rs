//! Bidirectional label ↔ student map owned by the enrollment store.

use crate::types::{Label, StudentId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone)]
pub struct LabelMap {
    by_label: BTreeMap<Label, StudentId>,
    by_student: HashMap<StudentId, Label>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted `(label, student)` pairs.
    ///
    /// A pair that would break the one-to-one mapping is skipped with a warning;
    /// the first occurrence wins.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Label, StudentId)>) -> Self {
        let mut map = Self::new();
        for (label, student_id) in pairs {
            if map.by_label.contains_key(&label) || map.by_student.contains_key(&student_id) {
                tracing::warn!(%label, student_id, "skipping conflicting label mapping");
                continue;
            }
            map.insert(label, student_id);
        }
        map
    }

    pub fn label_of(&self, student_id: StudentId) -> Option<Label> {
        self.by_student.get(&student_id).copied()
    }

    pub fn student_of(&self, label: Label) -> Option<StudentId> {
        self.by_label.get(&label).copied()
    }

    /// One past the highest label in use, or [`Label::FIRST`] when empty.
    pub fn next_label(&self) -> Label {
        self.by_label
            .keys()
            .next_back()
            .map_or(Label::FIRST, |max| max.next())
    }

    /// Record a new mapping. Callers check [`label_of`](Self::label_of) first.
    pub fn insert(&mut self, label: Label, student_id: StudentId) {
        debug_assert!(!self.by_label.contains_key(&label));
        debug_assert!(!self.by_student.contains_key(&student_id));
        self.by_label.insert(label, student_id);
        self.by_student.insert(student_id, label);
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// Enrolled students in label order.
    pub fn students(&self) -> impl Iterator<Item = StudentId> + '_ {
        self.by_label.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_label_empty() {
        assert_eq!(LabelMap::new().next_label(), Label(1));
    }

    #[test]
    fn test_next_label_is_max_plus_one() {
        // Gaps are not refilled.
        let map = LabelMap::from_pairs([(Label(1), 10), (Label(5), 20)]);
        assert_eq!(map.next_label(), Label(6));
    }

    #[test]
    fn test_lookup_both_directions() {
        let mut map = LabelMap::new();
        map.insert(Label(1), 42);
        assert_eq!(map.label_of(42), Some(Label(1)));
        assert_eq!(map.student_of(Label(1)), Some(42));
        assert_eq!(map.label_of(7), None);
        assert_eq!(map.student_of(Label(2)), None);
    }

    #[test]
    fn test_from_pairs_skips_conflicts() {
        let map = LabelMap::from_pairs([(Label(1), 10), (Label(1), 11), (Label(2), 10)]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.student_of(Label(1)), Some(10));
        assert_eq!(map.label_of(11), None);
    }
}
