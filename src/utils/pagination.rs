pub const PER_PAGE: usize = 10;

/// One page of an in-memory result list.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Unparseable page numbers fall back to the first page and numbers past
    /// the end clamp to the last one.
    pub fn paginate(all: Vec<T>, requested: Option<&str>, per_page: usize) -> Self {
        let total = all.len();
        let num_pages = total.div_ceil(per_page).max(1);
        let number = requested
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p.min(num_pages))
            .unwrap_or(1);
        let items = all
            .into_iter()
            .skip((number - 1) * per_page)
            .take(per_page)
            .collect();
        Self {
            items,
            number,
            num_pages,
            total,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn previous_number(&self) -> usize {
        self.number.saturating_sub(1).max(1)
    }

    pub fn next_number(&self) -> usize {
        (self.number + 1).min(self.num_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_middle_page() {
        let page = Page::paginate((1..=25).collect::<Vec<_>>(), Some("2"), 10);
        assert_eq!(page.items, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.num_pages, 3);
        assert!(page.has_previous() && page.has_next());
    }

    #[test]
    fn test_invalid_page_is_first_page() {
        let page = Page::paginate((1..=25).collect::<Vec<_>>(), Some("abc"), 10);
        assert_eq!(page.number, 1);
        let page = Page::paginate((1..=25).collect::<Vec<_>>(), Some("0"), 10);
        assert_eq!(page.number, 1);
    }

    #[test]
    fn test_page_past_end_is_last_page() {
        let page = Page::paginate((1..=25).collect::<Vec<_>>(), Some("99"), 10);
        assert_eq!(page.number, 3);
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
        assert!(!page.has_next());
    }

    #[test]
    fn test_empty_list_has_one_page() {
        let page = Page::paginate(Vec::<i32>::new(), None, 10);
        assert_eq!((page.number, page.num_pages, page.total), (1, 1, 0));
        assert!(page.items.is_empty());
    }
}
