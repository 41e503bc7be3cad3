//! OSC 8 hyperlink store.
//!
//! Cells carry a compact numeric link id in their extended attributes; this
//! store maps ids to URIs and tracks which buffer lines carry each link via
//! markers. Reopening a link with the same explicit `id=` parameter and URI
//! reuses the registration and extends its line coverage instead of
//! creating a duplicate entry.

use rustc_hash::FxHashMap;

use crate::buffer::MarkerId;

/// One registered hyperlink.
#[derive(Debug, Clone)]
pub struct LinkEntry {
    /// The link target.
    pub uri: String,
    /// The application-supplied `id=` parameter, if any.
    pub explicit_id: Option<String>,
    /// Markers for the lines this link appears on.
    pub lines: Vec<MarkerId>,
}

/// Registry of OSC 8 hyperlinks.
#[derive(Debug, Default)]
pub struct OscLinkStore {
    entries: FxHashMap<u32, LinkEntry>,
    /// Dedup key -> link id.
    lookup: FxHashMap<String, u32>,
    next_id: u32,
}

impl OscLinkStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            lookup: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Register a link (or find the existing registration) and return its
    /// numeric id for stamping into cell attributes.
    pub fn open(&mut self, explicit_id: Option<&str>, uri: &str) -> u32 {
        let key = match explicit_id {
            Some(id) => format!("i;{id};{uri}"),
            None => format!("u;;{uri}"),
        };
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            LinkEntry {
                uri: uri.to_string(),
                explicit_id: explicit_id.map(str::to_string),
                lines: Vec::new(),
            },
        );
        self.lookup.insert(key, id);
        id
    }

    /// Record that `link` appears on the line tracked by `marker`.
    pub fn add_line(&mut self, link: u32, marker: MarkerId) {
        if let Some(entry) = self.entries.get_mut(&link) {
            if !entry.lines.contains(&marker) {
                entry.lines.push(marker);
            }
        }
    }

    /// The URI behind a link id.
    #[must_use]
    pub fn uri(&self, link: u32) -> Option<&str> {
        self.entries.get(&link).map(|e| e.uri.as_str())
    }

    /// Full entry access (tests, serializers).
    #[must_use]
    pub fn entry(&self, link: u32) -> Option<&LinkEntry> {
        self.entries.get(&link)
    }

    /// Number of registered links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no links are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop links whose every line marker has been invalidated.
    ///
    /// `is_live` reports whether a marker still resolves.
    pub fn prune(&mut self, mut is_live: impl FnMut(MarkerId) -> bool) {
        let dead: Vec<u32> = self
            .entries
            .iter_mut()
            .filter_map(|(&id, entry)| {
                entry.lines.retain(|&m| is_live(m));
                if entry.lines.is_empty() {
                    Some(id)
                } else {
                    None
                }
            })
            .collect();
        for id in dead {
            if let Some(entry) = self.entries.remove(&id) {
                let key = match &entry.explicit_id {
                    Some(eid) => format!("i;{eid};{}", entry.uri),
                    None => format!("u;;{}", entry.uri),
                };
                self.lookup.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_links_dedupe_by_uri() {
        let mut store = OscLinkStore::new();
        let a = store.open(None, "http://a");
        let b = store.open(None, "http://a");
        let c = store.open(None, "http://b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn explicit_id_reuses_registration() {
        let mut store = OscLinkStore::new();
        let a = store.open(Some("abc"), "http://x");
        let b = store.open(Some("abc"), "http://x");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        // Same id but different target is a different link.
        let c = store.open(Some("abc"), "http://y");
        assert_ne!(a, c);
    }

    #[test]
    fn line_coverage_extends_without_duplicates() {
        let mut store = OscLinkStore::new();
        let link = store.open(Some("abc"), "http://x");
        let m1 = MarkerId(1);
        let m2 = MarkerId(2);
        store.add_line(link, m1);
        store.add_line(link, m1);
        store.add_line(link, m2);
        assert_eq!(store.entry(link).unwrap().lines, vec![m1, m2]);
    }

    #[test]
    fn prune_drops_fully_dead_links() {
        let mut store = OscLinkStore::new();
        let link = store.open(None, "http://x");
        store.add_line(link, MarkerId(1));
        store.prune(|_| false);
        assert!(store.is_empty());
        // The key is free again.
        let reopened = store.open(None, "http://x");
        assert_ne!(reopened, link);
    }
}
