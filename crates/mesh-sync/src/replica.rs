//! The local replica of one room: elements, remote cursors and the host flag.
//!
//! A replica is owned by exactly one room actor and mutated synchronously.
//! Remote peers only influence it through actions the owner decides to apply.
use board::{Element, ElementId, ElementMap, ElementPatch};
use std::collections::BTreeMap;

use crate::{merge_snapshot, Cursor, MergeReport, PeerId};

#[derive(Debug, Clone, Default)]
pub struct Replica {
    elements: ElementMap,
    cursors: BTreeMap<PeerId, Cursor>,
    is_host: bool,
    /// Set on every element mutation, cleared once the cold-start cache has the state.
    dirty: bool,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &ElementMap {
        &self.elements
    }

    pub fn element(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Insert-or-overwrite by id, so a repeated add never duplicates.
    pub fn insert_element(&mut self, element: Element) {
        self.elements.insert(element.id.clone(), element);
        self.dirty = true;
    }

    /// Returns false when the id is unknown; nothing is created in that case.
    pub fn update_element(&mut self, id: &ElementId, patch: &ElementPatch) -> bool {
        match self.elements.get_mut(id) {
            Some(element) => {
                patch.apply(element);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn remove_element(&mut self, id: &ElementId) -> Option<Element> {
        let removed = self.elements.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn merge_snapshot(&mut self, incoming: ElementMap) -> MergeReport {
        let report = merge_snapshot(&mut self.elements, incoming);
        if report.changed() {
            self.dirty = true;
        }
        report
    }

    /// Seed from the cold-start cache. Loaded state does not need writing back.
    pub fn restore(&mut self, cached: ElementMap) -> MergeReport {
        let was_dirty = self.dirty;
        let report = self.merge_snapshot(cached);
        self.dirty = was_dirty;
        report
    }

    pub fn cursors(&self) -> &BTreeMap<PeerId, Cursor> {
        &self.cursors
    }

    pub fn cursor(&self, peer: &PeerId) -> Option<&Cursor> {
        self.cursors.get(peer)
    }

    /// Unconditional overwrite: cursors carry no ordering signal.
    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursors.insert(cursor.peer_id.clone(), cursor);
    }

    pub fn remove_cursor(&mut self, peer: &PeerId) -> Option<Cursor> {
        self.cursors.remove(peer)
    }

    pub fn clear_cursors(&mut self) {
        self.cursors.clear();
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn set_host(&mut self, is_host: bool) {
        self.is_host = is_host;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Hand the current map to the cache writer and clear the dirty mark.
    pub fn take_dirty_snapshot(&mut self) -> Option<ElementMap> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.elements.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board::ElementKind;

    fn text(id: &str) -> Element {
        Element::new(ElementKind::Text, 0.0, 0.0, "a")
            .with_id(id)
            .with_created_at(Some(1))
    }

    fn cursor(peer: &str, x: f64) -> Cursor {
        Cursor {
            x,
            y: 0.0,
            peer_id: PeerId::from(peer),
            display_name: peer.to_string(),
            color: "#000000".into(),
        }
    }

    #[test]
    fn test_repeated_add_does_not_duplicate() {
        let mut replica = Replica::new();
        replica.insert_element(text("e1"));
        replica.insert_element(text("e1").with_content("again"));

        assert_eq!(replica.len(), 1);
        assert_eq!(replica.element(&"e1".into()).unwrap().content, "again");
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut replica = Replica::new();
        assert!(!replica.update_element(&"ghost".into(), &ElementPatch::position(1.0, 1.0)));
        assert!(replica.is_empty());
        assert!(!replica.is_dirty());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut replica = Replica::new();
        assert!(replica.take_dirty_snapshot().is_none());

        replica.insert_element(text("e1"));
        let snapshot = replica.take_dirty_snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(replica.take_dirty_snapshot().is_none());

        assert!(replica.remove_element(&"missing".into()).is_none());
        assert!(!replica.is_dirty());
        assert!(replica.remove_element(&"e1".into()).is_some());
        assert!(replica.is_dirty());
    }

    #[test]
    fn test_restore_does_not_mark_dirty() {
        let mut replica = Replica::new();
        let cached: ElementMap = [text("e1")].into_iter().map(|e| (e.id.clone(), e)).collect();
        let report = replica.restore(cached);

        assert_eq!(report.inserted, 1);
        assert!(!replica.is_dirty());
    }

    #[test]
    fn test_cursor_overwrites_and_removes() {
        let mut replica = Replica::new();
        replica.set_cursor(cursor("p1", 1.0));
        replica.set_cursor(cursor("p1", 9.0));

        assert_eq!(replica.cursors().len(), 1);
        assert_eq!(replica.cursor(&"p1".into()).unwrap().x, 9.0);

        assert!(replica.remove_cursor(&"p1".into()).is_some());
        assert!(replica.remove_cursor(&"p1".into()).is_none());
    }
}
