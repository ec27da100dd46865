//! # Subscription Set
//!
//! The tracked keywords and their match counters. Keywords are stored
//! lower-cased and unique, in insertion order so that `list` shows them the way
//! they were added. Every tracked keyword has a counter and nothing else does.

use std::collections::BTreeMap;

/// Ordered, unique set of tracked keywords with per-keyword match counters.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    keywords: Vec<String>,
    counts: BTreeMap<String, u64>,
}

impl SubscriptionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given keywords, returning the ones that were not tracked yet.
    pub fn add<I, S>(&mut self, keywords: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inserted = Vec::new();
        for keyword in keywords {
            let keyword = normalize(keyword.as_ref());
            if keyword.is_empty() || self.contains(&keyword) {
                continue;
            }
            self.counts.insert(keyword.clone(), 0);
            self.keywords.push(keyword.clone());
            inserted.push(keyword);
        }
        inserted
    }

    /// Removes the given keywords, returning the ones that were actually tracked.
    pub fn remove<I, S>(&mut self, keywords: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = Vec::new();
        for keyword in keywords {
            let keyword = normalize(keyword.as_ref());
            if let Some(pos) = self.keywords.iter().position(|k| *k == keyword) {
                self.keywords.remove(pos);
                self.counts.remove(&keyword);
                removed.push(keyword);
            }
        }
        removed
    }

    /// Drops every keyword and counter.
    pub fn clear(&mut self) {
        self.keywords.clear();
        self.counts.clear();
    }

    /// Bumps the counter of `keyword` if it is still tracked.
    ///
    /// A match can be in flight while its keyword is being removed, so an
    /// untracked keyword is silently ignored.
    pub fn record_match(&mut self, keyword: &str) {
        if let Some(count) = self.counts.get_mut(&normalize(keyword)) {
            *count += 1;
        }
    }

    /// Counts one match for every tracked keyword contained in `text`,
    /// case-insensitively. Returns the keywords that matched.
    pub fn record_matches(&mut self, text: &str) -> Vec<String> {
        let haystack = text.to_lowercase();
        let matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .cloned()
            .collect();
        for keyword in &matched {
            self.record_match(keyword);
        }
        matched
    }

    /// An owned copy of the keywords in display order.
    pub fn snapshot(&self) -> Vec<String> {
        self.keywords.clone()
    }

    /// Whether `keyword` is tracked.
    pub fn contains(&self, keyword: &str) -> bool {
        self.counts.contains_key(&normalize(keyword))
    }

    /// Number of tracked keywords.
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// The match counters, keyed by keyword in sorted order.
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    /// Match count for a single keyword.
    pub fn count(&self, keyword: &str) -> Option<u64> {
        self.counts.get(&normalize(keyword)).copied()
    }
}

fn normalize(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}
