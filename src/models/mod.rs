pub mod audit;
pub mod image;
pub mod pack;
pub mod password_reset;
pub mod preset;
pub mod session;
pub mod setting;
pub mod user;

use serde::Serialize;

/// One page of a listing together with the pagination state.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: i64, per_page: i64, total: i64) -> Self {
        let pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };
        Page {
            items,
            page,
            per_page,
            total,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }
}

/// Clamps a 1-based page number and returns `(page, offset)`.
///
/// The page is capped so the offset always fits in an `i64`.
pub fn page_offset(page: Option<i64>, per_page: i64) -> (i64, i64) {
    let per_page = per_page.max(1);
    let page = page.unwrap_or(1).clamp(1, i64::MAX / per_page);
    (page, (page - 1) * per_page)
}

/// Escapes `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern.
pub fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_computed_from_totals() {
        let page = Page::new(vec![1, 2], 2, 20, 41);
        assert_eq!(page.pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);

        let empty: Page<i32> = Page::new(Vec::new(), 1, 20, 0);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }

    #[test]
    fn offsets_clamp_page_numbers() {
        assert_eq!(page_offset(None, 20), (1, 0));
        assert_eq!(page_offset(Some(0), 20), (1, 0));
        assert_eq!(page_offset(Some(3), 50), (3, 100));

        let (page, offset) = page_offset(Some(i64::MAX), 20);
        assert_eq!(page, i64::MAX / 20);
        assert_eq!(offset, (i64::MAX / 20 - 1) * 20);
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("cat"), "%cat%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
