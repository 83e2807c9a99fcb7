//! Shared selection state between the UI thread and the device watcher.

use crate::catalog::PayloadEntry;
use std::sync::{Arc, Mutex};

/// Cloneable handle to the currently selected payload.
///
/// The UI swaps in a complete immutable entry and the watcher clones
/// the handle back out, so a concurrent read never observes a half
/// written value. Before the first publication [`Selection::current`]
/// returns `None` and the watcher skips the attach.
#[derive(Clone, Default)]
pub struct Selection {
    current: Arc<Mutex<Option<Arc<PayloadEntry>>>>,
}

impl Selection {
    pub fn new() -> Self {
        Selection::default()
    }

    /// Publishes `entry` as the active payload.
    pub fn set(&self, entry: Arc<PayloadEntry>) {
        let mut slot = self.current.lock().unwrap_or_else(|err| err.into_inner());
        *slot = Some(entry);
    }

    /// Returns the active payload, if one was ever published.
    pub fn current(&self) -> Option<Arc<PayloadEntry>> {
        self.current
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

/// Menu model over the discovered catalog.
///
/// Owns the entry list and the cursor; every cursor move republishes
/// the selected entry through [`Selection`].
pub struct Menu {
    entries: Vec<Arc<PayloadEntry>>,
    index: usize,
    selection: Selection,
}

impl Menu {
    /// Builds the menu and publishes the initial selection, if any.
    pub fn new(entries: Vec<PayloadEntry>, selection: Selection) -> Self {
        let menu = Menu {
            entries: entries.into_iter().map(Arc::new).collect(),
            index: 0,
            selection,
        };
        menu.publish();
        menu
    }

    pub fn entries(&self) -> &[Arc<PayloadEntry>] {
        &self.entries
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves the cursor one entry up, clamped to the first entry.
    pub fn select_previous(&mut self) {
        self.index = self.index.saturating_sub(1);
        self.publish();
    }

    /// Moves the cursor one entry down, clamped to the last entry.
    pub fn select_next(&mut self) {
        if self.index + 1 < self.entries.len() {
            self.index += 1;
        }
        self.publish();
    }

    fn publish(&self) {
        if let Some(entry) = self.entries.get(self.index) {
            self.selection.set(entry.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(name: &str) -> PayloadEntry {
        PayloadEntry::File(PathBuf::from(name))
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let selection = Selection::new();
        let mut menu = Menu::new(
            vec![entry("a.bin"), entry("b.bin"), entry("c.bin")],
            selection.clone(),
        );

        for _ in 0..10 {
            menu.select_next();
        }
        assert_eq!(menu.index(), 2);
        assert_eq!(*selection.current().unwrap(), entry("c.bin"));

        for _ in 0..10 {
            menu.select_previous();
        }
        assert_eq!(menu.index(), 0);
        assert_eq!(*selection.current().unwrap(), entry("a.bin"));
    }

    #[test]
    fn mixed_moves_track_the_cursor() {
        let selection = Selection::new();
        let mut menu = Menu::new(vec![entry("a.bin"), entry("b.bin")], selection.clone());

        menu.select_next();
        menu.select_next();
        menu.select_previous();
        assert_eq!(menu.index(), 0);
        assert_eq!(*selection.current().unwrap(), entry("a.bin"));
    }

    #[test]
    fn initial_selection_is_published() {
        let selection = Selection::new();
        let _menu = Menu::new(vec![entry("a.bin")], selection.clone());
        assert_eq!(*selection.current().unwrap(), entry("a.bin"));
    }

    #[test]
    fn empty_catalog_publishes_nothing() {
        let selection = Selection::new();
        let mut menu = Menu::new(Vec::new(), selection.clone());

        menu.select_previous();
        menu.select_next();

        assert!(menu.is_empty());
        assert!(selection.current().is_none());
    }
}
