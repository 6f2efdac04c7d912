use std::collections::HashMap;
use std::hash::Hash;

/// Counter keyed by conversation, remembering first-seen order so the
/// maximum is deterministic: on equal counts the earliest key wins.
#[derive(Debug, Clone)]
pub(crate) struct Tally<K> {
    entries: HashMap<K, TallyEntry>,
    next_order: u64,
}

#[derive(Debug, Clone, Copy)]
struct TallyEntry {
    count: u64,
    order: u64,
}

impl<K> Default for Tally<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_order: 0,
        }
    }
}

impl<K: Hash + Eq + Copy> Tally<K> {
    pub(crate) fn add(&mut self, key: K, amount: u64) {
        let order = self.next_order;
        let entry = self.entries.entry(key).or_insert_with(|| TallyEntry { count: 0, order });
        if entry.order == order {
            self.next_order += 1;
        }
        entry.count += amount;
    }

    pub(crate) fn max(&self) -> Option<K> {
        self.entries
            .iter()
            .max_by(|(_, a), (_, b)| a.count.cmp(&b.count).then_with(|| b.order.cmp(&a.order)))
            .map(|(key, _)| *key)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &K) -> u64 {
        self.entries.get(key).map(|entry| entry.count).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.next_order = 0;
    }
}
