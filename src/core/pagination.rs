//! Offset pagination shared by the ledger and registry list queries.

use crate::errors::Result;
use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait, Select};
use serde::{Deserialize, Serialize};

/// Largest `OFFSET` the database accepts (a signed 64-bit integer).
const MAX_OFFSET: u64 = i64::MAX.unsigned_abs();

/// A page request. `page` is zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Zero-based page index
    pub page: u64,
    /// Items per page (at least 1)
    pub per_page: u64,
}

impl PageRequest {
    /// Builds a request, clamping `per_page` to `1..=max_per_page`.
    #[must_use]
    pub fn new(page: u64, per_page: u64, max_per_page: u64) -> Self {
        Self {
            page,
            per_page: per_page.clamp(1, max_per_page.max(1)),
        }
    }

    /// Row offset of the first item on this page, if it is addressable.
    ///
    /// `None` when `page * per_page` overflows or exceeds what the database accepts as an
    /// `OFFSET`; such a page lies past any real data.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.page
            .checked_mul(self.per_page.max(1))
            .filter(|offset| *offset <= MAX_OFFSET)
    }

    /// First page with the given size.
    #[must_use]
    pub fn first(per_page: u64) -> Self {
        Self::new(0, per_page, per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(20)
    }
}

/// One page of results plus the totals needed to render paging controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Zero-based page index
    pub page: u64,
    /// Requested page size
    pub per_page: u64,
    /// Total items across all pages
    pub total_items: u64,
    /// Total number of pages
    pub total_pages: u64,
}

impl<T> Page<T> {
    /// Assembles a page from a fetched slice and the overall count.
    #[must_use]
    pub fn new(items: Vec<T>, request: PageRequest, total_items: u64) -> Self {
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total_items,
            total_pages: total_items.div_ceil(request.per_page.max(1)),
        }
    }

    /// Whether a later page exists.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages
    }

    /// Converts the items while keeping the paging metadata.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}

/// Runs `select` as a paged query and returns the requested page with totals.
///
/// The caller is responsible for a stable ordering on `select`. Pages past the end,
/// including pages whose offset does not fit in an `OFFSET`, come back empty.
pub async fn fetch_page<C, E>(
    db: &C,
    select: Select<E>,
    request: PageRequest,
) -> Result<Page<E::Model>>
where
    C: ConnectionTrait,
    E: EntityTrait,
    E::Model: Sync,
{
    let paginator = select.paginate(db, request.per_page.max(1));
    let total_items = paginator.num_items().await?;

    let items = match request.offset() {
        Some(offset) if offset < total_items => paginator.fetch_page(request.page).await?,
        _ => Vec::new(),
    };
    Ok(Page::new(items, request, total_items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_page_is_clamped() {
        assert_eq!(PageRequest::new(0, 0, 50).per_page, 1);
        assert_eq!(PageRequest::new(0, 500, 50).per_page, 50);
        assert_eq!(PageRequest::new(3, 10, 50), PageRequest { page: 3, per_page: 10 });
    }

    #[test]
    fn test_offset_overflow_is_unaddressable() {
        assert_eq!(PageRequest::new(3, 10, 50).offset(), Some(30));
        assert_eq!(PageRequest::new(u64::MAX, 20, 100).offset(), None);
        assert_eq!(PageRequest::new(1 << 63, 2, 100).offset(), None);
        assert_eq!(PageRequest::new(1 << 62, 2, 100).offset(), None);
        assert_eq!(
            PageRequest::new((1 << 62) - 1, 2, 100).offset(),
            Some((1 << 63) - 2)
        );
    }

    #[test]
    fn test_total_pages_and_has_next() {
        let page = Page::new(vec![1, 2], PageRequest::new(0, 2, 10), 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next());

        let last = Page::new(vec![5], PageRequest::new(2, 2, 10), 5);
        assert!(!last.has_next());

        let empty: Page<i32> = Page::new(Vec::new(), PageRequest::first(20), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next());
    }
}
