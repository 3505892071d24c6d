//! Insert placement
//!
//! A record inserted on the server is first registered as a pending
//! insertion. Its bounds are computed against the cached neighbors with the
//! sort comparator:
//!
//! - `min`: the slot right after the last cached key sorting before it
//! - `max`: the first cached key that does not sort before it
//!
//! When nothing uncached can sit between the two (same page, or a full page
//! followed by the next one, or the very start), the slot is exact: the key
//! is spliced in and overflow cascades into the following pages. Otherwise
//! the insertion stays pending and is retried after every load and delete.

use crate::model::{Comparator, PagePos, Record, RecordKey};
use crate::pager::map::PageMap;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingInsertion {
    pub key: RecordKey,
    pub min: PagePos,
    pub max: Option<PagePos>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Placement {
    /// Insert at this position
    Exact(PagePos),
    /// Position lies somewhere in `[min, max]`
    Between { min: PagePos, max: Option<PagePos> },
    /// A cached neighbor is not materialized; cannot compare
    Unknown,
}

impl PageMap {
    pub(super) fn find_bounds<'a, F>(&self, record: &Record, lookup: &F, cmp: &Comparator) -> Placement
    where
        F: Fn(&RecordKey) -> Option<&'a Record>,
    {
        let mut min = PagePos::new(0, 0);
        let mut gap = false;
        let mut next_page = 0;
        let mut prev_open = false;

        for (&page, keys) in &self.pages {
            let incomplete = self.incomplete.contains(&page);
            gap = page != next_page || prev_open || incomplete;
            for (index, key) in keys.iter().enumerate() {
                let Some(existing) = lookup(key) else {
                    return Placement::Unknown;
                };
                if cmp.compare(existing, record) == Ordering::Less {
                    min = PagePos::new(page, index + 1);
                    gap = incomplete;
                } else {
                    let max = PagePos::new(page, index);
                    return if gap {
                        Placement::Between { min, max: Some(max) }
                    } else {
                        Placement::Exact(max)
                    };
                }
            }
            next_page = page + 1;
            prev_open = incomplete || keys.len() < self.rpp;
        }

        // Everything cached sorts first: exact only if the pages reach the end
        if !gap && self.known_rows() == Some(min.slot(self.rpp)) {
            Placement::Exact(min)
        } else {
            Placement::Between { min, max: None }
        }
    }

    /// Register a new record; false if already cached or pending
    pub fn add_pending(&mut self, key: RecordKey) -> bool {
        let Some(total) = self.total_count else {
            return false;
        };
        if self.contains_key(&key) || self.pending.iter().any(|p| p.key == key) {
            return false;
        }
        self.total_count = Some(total + 1);
        self.pending.push(PendingInsertion {
            key,
            min: PagePos::new(0, 0),
            max: None,
        });
        self.complete = false;
        true
    }

    /// Splice `key` in at `pos` and cascade overflow
    ///
    /// The overflow of the last cached page opens a new page only when it is
    /// the final row; otherwise it is trimmed back to pending.
    pub(super) fn insert_at(&mut self, pos: PagePos, key: RecordKey) {
        let rpp = self.rpp;
        let page = self.pages.entry(pos.page).or_default();
        let index = pos.index.min(page.len());
        page.insert(index, key);

        let mut current = pos.page;
        loop {
            let Some(page) = self.pages.get_mut(&current) else {
                break;
            };
            if page.len() <= rpp {
                break;
            }
            let Some(overflow) = page.pop() else {
                break;
            };
            if let Some(next) = self.pages.get_mut(&(current + 1)) {
                next.insert(0, overflow);
                current += 1;
                continue;
            }

            let slot = (current + 1) * rpp;
            if self.known_rows() == Some(slot + 1) {
                self.pages.insert(current + 1, vec![overflow]);
            } else {
                tracing::debug!(key = %overflow, page = current, "Trimming overflow key");
                self.pending.push(PendingInsertion {
                    key: overflow,
                    min: PagePos::new(current + 1, 0),
                    max: None,
                });
                // Cached pages past the gap are off by one now
                let shifted: Vec<usize> = self.pages.range(current + 2..).map(|(&p, _)| p).collect();
                self.incomplete.extend(shifted);
            }
            break;
        }
    }

    /// Try to place every pending insertion; returns how many were placed
    pub fn place_pendings<'a, F>(&mut self, lookup: &F, cmp: &Comparator) -> usize
    where
        F: Fn(&RecordKey) -> Option<&'a Record>,
    {
        let mut placed = 0;
        let mut rounds = self.pending.len() + 1;
        while rounds > 0 && !self.pending.is_empty() {
            rounds -= 1;
            let mut progress = false;
            let mut i = 0;
            while i < self.pending.len() {
                let key = self.pending[i].key.clone();
                if self.contains_key(&key) {
                    self.pending.remove(i);
                    progress = true;
                    continue;
                }
                let Some(record) = lookup(&key) else {
                    i += 1;
                    continue;
                };
                match self.find_bounds(record, lookup, cmp) {
                    Placement::Exact(pos) => {
                        self.pending.remove(i);
                        self.insert_at(pos, key);
                        placed += 1;
                        progress = true;
                    }
                    Placement::Between { min, max } => {
                        self.pending[i].min = min;
                        self.pending[i].max = max;
                        i += 1;
                    }
                    Placement::Unknown => i += 1,
                }
            }
            if !progress {
                break;
            }
        }
        if placed > 0 {
            self.complete = false;
        }
        placed
    }

    /// Pending insertions known to sort before global row `slot`
    pub fn pending_before(&self, slot: usize) -> usize {
        self.pending
            .iter()
            .filter(|p| p.max.map(|m| m.slot(self.rpp) <= slot).unwrap_or(false))
            .count()
    }
}
