//! Pagination for entity listings.

use serde::{Deserialize, Serialize};

/// A caller-supplied position in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageToken {
    /// Number of items to skip.
    pub offset: usize,
    /// Maximum number of items to return; `None` reads to the end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl PageToken {
    /// A token that reads the entire listing.
    #[must_use]
    pub const fn read_everything() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// A token that reads at most `limit` items from the start.
    #[must_use]
    pub const fn from_limit(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }
}

impl Default for PageToken {
    fn default() -> Self {
        Self::read_everything()
    }
}

/// One page of a listing, plus the token for the next page when more items
/// remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// The items of this page.
    pub items: Vec<T>,
    /// Token for the next page; `None` when the listing is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<PageToken>,
}

impl<T> Page<T> {
    /// Wraps a complete result set as a single page.
    #[must_use]
    pub const fn from_items(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    /// Cuts one page out of a full result set according to `token`.
    #[must_use]
    pub fn from_listing(all: Vec<T>, token: &PageToken) -> Self {
        let total = all.len();
        let mut iter = all.into_iter().skip(token.offset);
        let items: Vec<T> = match token.limit {
            Some(limit) => iter.by_ref().take(limit).collect(),
            None => iter.by_ref().collect(),
        };
        let consumed = token.offset + items.len();
        let next_token = (consumed < total).then(|| PageToken {
            offset: consumed,
            limit: token.limit,
        });
        Self { items, next_token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_listing_has_no_next_token() {
        let page = Page::from_listing(vec![1, 2, 3], &PageToken::read_everything());
        assert_eq!(page.items, vec![1, 2, 3]);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn limited_listing_pages_through() {
        let first = Page::from_listing(vec![1, 2, 3, 4, 5], &PageToken::from_limit(2));
        assert_eq!(first.items, vec![1, 2]);
        let token = first.next_token.expect("more items remain");

        let second = Page::from_listing(vec![1, 2, 3, 4, 5], &token);
        assert_eq!(second.items, vec![3, 4]);

        let third = Page::from_listing(vec![1, 2, 3, 4, 5], &second.next_token.unwrap());
        assert_eq!(third.items, vec![5]);
        assert!(third.next_token.is_none());
    }
}
