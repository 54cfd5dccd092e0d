use crate::types::{LogKind, SystemLogEntry};

/// Bounded, most-recent-first event log.
#[derive(Debug, Clone)]
pub struct Ledger {
    entries: Vec<SystemLogEntry>,
    capacity: usize,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity: capacity.max(1) }
    }

    /// Rehydrate from persisted entries (already most-recent-first).
    pub fn from_entries(mut entries: Vec<SystemLogEntry>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        entries.truncate(capacity);
        Self { entries, capacity }
    }

    pub fn push(&mut self, kind: LogKind, content: impl Into<String>) {
        let entry = SystemLogEntry::new(kind, content);
        tracing::debug!(kind = kind.as_str(), content = %entry.content, "ledger");
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> &[SystemLogEntry] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&SystemLogEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_thirty_most_recent_first() {
        let mut ledger = Ledger::new(30);
        for i in 0..40 {
            ledger.push(LogKind::Sistemico, format!("entry {i}"));
        }
        assert_eq!(ledger.len(), 30);
        assert_eq!(ledger.entries()[0].content, "entry 39");
        assert_eq!(ledger.entries()[29].content, "entry 10");
    }

    #[test]
    fn rehydrate_truncates_to_capacity() {
        let entries: Vec<_> = (0..5)
            .map(|i| SystemLogEntry::new(LogKind::Cognitive, i.to_string()))
            .collect();
        let ledger = Ledger::from_entries(entries, 3);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.latest().map(|e| e.content.as_str()), Some("0"));
    }

    #[test]
    fn clear_empties() {
        let mut ledger = Ledger::new(2);
        ledger.push(LogKind::Ejecucion, "a");
        ledger.clear();
        assert!(ledger.is_empty());
    }
}
