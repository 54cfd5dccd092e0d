use crate::ledger::Ledger;
use crate::types::{LogKind, Memory};

/// Long-term notes, most recent first. No expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryBank {
    items: Vec<Memory>,
}

impl MemoryBank {
    pub fn from_items(items: Vec<Memory>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Memory] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Store a trimmed note. Blank content is ignored.
    pub fn add(&mut self, content: &str, ledger: &mut Ledger) -> Option<&Memory> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let preview: String = content.chars().take(20).collect();
        self.items.insert(0, Memory::new(content));
        ledger.push(LogKind::Sistemico, format!("New memory added: \"{preview}...\""));
        self.items.first()
    }

    /// Forget a note. Returns false if no note had that id.
    pub fn delete(&mut self, id: &str, ledger: &mut Ledger) -> bool {
        let before = self.items.len();
        self.items.retain(|m| m.id != id);
        let removed = before != self.items.len();
        if removed {
            ledger.push(LogKind::Sistemico, format!("Memory forgotten: ID {id}"));
        }
        removed
    }
}
