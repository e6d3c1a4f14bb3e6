use std::collections::HashSet;

use jobsync_core::canonicalize_detail_url;

/// Set of detail URLs already persisted or accepted during the current run.
#[derive(Debug, Default, Clone)]
pub struct DedupLedger {
    seen: HashSet<String>,
}

fn ledger_key(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(canonicalize_detail_url(trimmed).unwrap_or_else(|| trimmed.to_string()))
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert every non-blank URL; returns how many were new.
    pub fn seed<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|url| self.add(url.as_ref()))
            .count()
    }

    pub fn contains(&self, url: &str) -> bool {
        ledger_key(url).is_some_and(|key| self.seen.contains(&key))
    }

    /// `false` when the URL was blank or already present.
    pub fn add(&mut self, url: &str) -> bool {
        match ledger_key(url) {
            Some(key) => self.seen.insert(key),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
