//! Window paging and outer-page arithmetic

use crate::model::sort::SortSpec;
use serde::{Deserialize, Serialize};

/// Client-side paging state of a window (1-based page)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    /// Rows per window page
    pub rpp: usize,
    /// 1-based page number
    pub page: usize,
    pub sort: SortSpec,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            rpp: 10,
            page: 1,
            sort: SortSpec::default(),
        }
    }
}

impl Paging {
    pub fn new(rpp: usize, page: usize, sort: SortSpec) -> Self {
        Self { rpp, page, sort }
    }

    /// Global row range `[from, to)` covered by the current page
    pub fn range(&self) -> (usize, usize) {
        let from = self.rpp * self.page.saturating_sub(1);
        (from, from + self.rpp)
    }
}

/// Paging sent to the remote query collaborator for one outer page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuterPaging {
    pub rows_per_page: usize,
    /// 1-based on the wire
    pub page_number: usize,
    pub sort: SortSpec,
}

impl OuterPaging {
    /// Paging for 0-based outer page `outer`
    pub fn for_outer(outer: usize, rows_per_page: usize, sort: SortSpec) -> Self {
        Self {
            rows_per_page,
            page_number: outer + 1,
            sort,
        }
    }

    /// 0-based outer page index
    pub fn outer(&self) -> usize {
        self.page_number.saturating_sub(1)
    }

    /// Global row range `[from, to)` of this outer page
    pub fn range(&self) -> (usize, usize) {
        let from = self.outer() * self.rows_per_page;
        (from, from + self.rows_per_page)
    }
}

/// Position inside the outer-page map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PagePos {
    pub page: usize,
    pub index: usize,
}

impl PagePos {
    pub fn new(page: usize, index: usize) -> Self {
        Self { page, index }
    }

    pub fn from_slot(slot: usize, rpp: usize) -> Self {
        Self {
            page: slot / rpp,
            index: slot % rpp,
        }
    }

    /// Global row index
    pub fn slot(&self, rpp: usize) -> usize {
        self.page * rpp + self.index
    }
}

/// Number of outer pages needed for `total` rows
pub fn page_count(total: usize, rpp: usize) -> usize {
    if rpp == 0 {
        return 0;
    }
    total.div_ceil(rpp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_range() {
        let paging = Paging::new(10, 3, SortSpec::default());
        assert_eq!(paging.range(), (20, 30));
        assert_eq!(Paging::default().range(), (0, 10));
    }

    #[test]
    fn test_outer_paging_is_one_based_on_the_wire() {
        let paging = OuterPaging::for_outer(2, 25, SortSpec::default());
        assert_eq!(paging.page_number, 3);
        assert_eq!(paging.outer(), 2);
        assert_eq!(paging.range(), (50, 75));
    }

    #[test]
    fn test_page_pos_slots() {
        let pos = PagePos::from_slot(23, 10);
        assert_eq!(pos, PagePos::new(2, 3));
        assert_eq!(pos.slot(10), 23);
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(30, 10), 3);
        assert_eq!(page_count(0, 10), 0);
    }
}
