//! Outer page map
//!
//! For one (resource, filter, sort) combination: outer page number (0-based)
//! → ordered primary keys. Pages are positioned absolutely, page `p` holds
//! global rows `p * rpp ..`.
//!
//! A page is *incomplete* when it is shorter than its expected length or may
//! be shifted relative to the server after local reconciliation. Incomplete
//! pages are re-queried before use.
//!
//! Rows counted in `total_count` but not yet located in any page are kept as
//! pending insertions (see `placement`).

use crate::model::{page_count, PagePos, RecordKey};
use crate::pager::placement::PendingInsertion;
use crate::remote::QueryPage;
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone)]
pub struct PageMap {
    pub(super) rpp: usize,
    pub(super) pages: BTreeMap<usize, Vec<RecordKey>>,
    pub(super) incomplete: BTreeSet<usize>,
    pub(super) total_count: Option<usize>,
    pub(super) pending: Vec<PendingInsertion>,
    pub(super) complete: bool,
}

/// What storing a fetched page revealed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreOutcome {
    /// `(expected, found)` first keys when the server disagrees with the cache
    pub inconsistency: Option<(Option<RecordKey>, Option<RecordKey>)>,
    /// Pending insertions resolved because the page lists them
    pub resolved: usize,
    /// Keys dropped from other pages because this page lists them
    pub deduplicated: usize,
}

impl PageMap {
    pub fn new(rpp: usize) -> Self {
        Self {
            rpp: rpp.max(1),
            pages: BTreeMap::new(),
            incomplete: BTreeSet::new(),
            total_count: None,
            pending: Vec::new(),
            complete: false,
        }
    }

    pub fn rpp(&self) -> usize {
        self.rpp
    }

    /// Last known total, pending insertions included
    pub fn total_count(&self) -> Option<usize> {
        self.total_count
    }

    /// Rows the pages account for: total minus unplaced insertions
    pub fn known_rows(&self) -> Option<usize> {
        self.total_count
            .map(|t| t.saturating_sub(self.pending.len()))
    }

    pub fn page(&self, page: usize) -> Option<&[RecordKey]> {
        self.pages.get(&page).map(|p| p.as_slice())
    }

    pub fn cached_pages(&self) -> Vec<usize> {
        self.pages.keys().copied().collect()
    }

    pub fn is_incomplete(&self, page: usize) -> bool {
        self.incomplete.contains(&page)
    }

    pub fn pending(&self) -> &[PendingInsertion] {
        &self.pending
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of outer pages the result set spans
    pub fn page_count(&self) -> Option<usize> {
        self.total_count.map(|t| page_count(t, self.rpp))
    }

    /// Page must be queried before it can be served
    pub fn needs(&self, page: usize) -> bool {
        !self.pages.contains_key(&page) || self.incomplete.contains(&page)
    }

    pub fn position(&self, key: &RecordKey) -> Option<PagePos> {
        self.pages.iter().find_map(|(&page, keys)| {
            keys.iter()
                .position(|k| k == key)
                .map(|index| PagePos::new(page, index))
        })
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.pages.values().any(|keys| keys.contains(key))
    }

    /// Expected length of `page` given the rows the pages account for
    pub fn expected_len(&self, page: usize) -> Option<usize> {
        self.known_rows()
            .map(|known| known.saturating_sub(page * self.rpp).min(self.rpp))
    }

    /// Store a freshly queried page
    ///
    /// The server answer wins: pending insertions it lists are resolved, and
    /// its keys are removed from every other cached page.
    pub fn store_page(&mut self, page: usize, result: QueryPage) -> StoreOutcome {
        let mut outcome = StoreOutcome::default();
        let total = result.total_count;
        let keys = result.pks;
        let fresh: HashSet<&RecordKey> = keys.iter().collect();

        let found = keys.first().cloned();
        let believed = self
            .pages
            .get(&page)
            .filter(|_| !self.incomplete.contains(&page))
            .map(|old| old.first().cloned());
        if let Some(expected) = believed {
            if expected != found {
                outcome.inconsistency = Some((expected, found.clone()));
            }
        }
        if outcome.inconsistency.is_none() && page > 0 {
            let overlaps = self
                .pages
                .get(&(page - 1))
                .zip(found.as_ref())
                .map(|(prev, first)| prev.contains(first))
                .unwrap_or(false);
            if overlaps {
                let expected = self.pages.get(&(page - 1)).and_then(|p| p.last().cloned());
                outcome.inconsistency = Some((expected, found.clone()));
            }
        }

        let before = self.pending.len();
        self.pending.retain(|p| !fresh.contains(&p.key));
        outcome.resolved = before - self.pending.len();

        let mut emptied = Vec::new();
        for (&other, other_keys) in self.pages.iter_mut() {
            if other == page {
                continue;
            }
            let len = other_keys.len();
            other_keys.retain(|k| !fresh.contains(k));
            if other_keys.len() != len {
                outcome.deduplicated += len - other_keys.len();
                self.incomplete.insert(other);
                if other_keys.is_empty() {
                    emptied.push(other);
                }
            }
        }
        for other in emptied {
            self.pages.remove(&other);
            self.incomplete.remove(&other);
        }

        self.total_count = Some(total);
        let expected = total.saturating_sub(page * self.rpp).min(self.rpp);
        if keys.is_empty() {
            self.pages.remove(&page);
            self.incomplete.remove(&page);
        } else {
            if keys.len() == expected {
                self.incomplete.remove(&page);
            } else {
                self.incomplete.insert(page);
            }
            self.pages.insert(page, keys);
        }

        // Pages past the end of the result set are stale
        let last = page_count(total, self.rpp);
        let stale: Vec<usize> = self.pages.range(last..).map(|(&p, _)| p).collect();
        for p in stale {
            self.pages.remove(&p);
            self.incomplete.remove(&p);
        }

        self.complete = false;
        outcome
    }

    /// Remove deleted keys and compact
    ///
    /// Keys after the first affected page shift left, pulling from following
    /// cached pages; pages left empty are dropped. Returns how many of `keys`
    /// were actually present (pages or pending), which is subtracted from the
    /// total.
    pub fn remove_keys(&mut self, keys: &HashSet<RecordKey>) -> usize {
        let mut removed = 0;
        let mut first_affected = None;
        for (&page, page_keys) in self.pages.iter_mut() {
            let len = page_keys.len();
            page_keys.retain(|k| !keys.contains(k));
            if page_keys.len() != len {
                removed += len - page_keys.len();
                first_affected.get_or_insert(page);
            }
        }

        let before = self.pending.len();
        self.pending.retain(|p| !keys.contains(&p.key));
        removed += before - self.pending.len();

        if removed == 0 {
            return 0;
        }
        if let Some(total) = self.total_count {
            self.total_count = Some(total.saturating_sub(removed));
        }
        if let Some(start) = first_affected {
            self.compact_from(start);
        }
        self.complete = false;
        removed
    }

    /// Re-chunk the run of consecutive pages starting at `start`
    fn compact_from(&mut self, start: usize) {
        let rpp = self.rpp;
        let mut run = Vec::new();
        let mut page = start;
        while self.pages.contains_key(&page) {
            run.push(page);
            page += 1;
        }
        let run_end = page;

        let first_open = run.iter().copied().find(|p| self.incomplete.contains(p));
        let mut flat = Vec::new();
        for p in &run {
            if let Some(keys) = self.pages.remove(p) {
                flat.extend(keys);
            }
            self.incomplete.remove(p);
        }

        let mut next = start;
        for chunk in flat.chunks(rpp) {
            self.pages.insert(next, chunk.to_vec());
            next += 1;
        }

        if let Some(open) = first_open {
            for p in open..next {
                self.incomplete.insert(p);
            }
        }
        if next > start {
            let last = next - 1;
            let len = self.pages.get(&last).map(|k| k.len()).unwrap_or(0);
            if self.expected_len(last) != Some(len) {
                self.incomplete.insert(last);
            }
        }

        // Pages beyond an uncached gap are now shifted
        let shifted: Vec<usize> = self.pages.range(run_end..).map(|(&p, _)| p).collect();
        for p in shifted {
            self.incomplete.insert(p);
        }
    }

    /// Keys in global slots `[from, to)`; uncached slots are skipped
    pub fn slice(&self, from: usize, to: usize) -> Vec<RecordKey> {
        (from..to)
            .filter_map(|slot| {
                let pos = PagePos::from_slot(slot, self.rpp);
                self.pages.get(&pos.page).and_then(|p| p.get(pos.index)).cloned()
            })
            .collect()
    }

    /// Re-evaluate the completely-loaded flag
    pub fn check_complete(&mut self, materialized: impl Fn(&RecordKey) -> bool) -> bool {
        self.complete = match self.total_count {
            Some(total) => {
                self.pending.is_empty()
                    && self.incomplete.is_empty()
                    && self.pages.len() == page_count(total, self.rpp)
                    && self.pages.values().flatten().all(&materialized)
            }
            None => false,
        };
        self.complete
    }

    /// Mark every cached page for re-query
    pub fn invalidate(&mut self) {
        self.incomplete.extend(self.pages.keys().copied());
        self.complete = false;
    }
}
