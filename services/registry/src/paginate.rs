//! Cursor pagination for catalog and tag listings

use axum::http::{HeaderMap, HeaderValue, header};
use serde::Deserialize;

use crate::error::{RegistryError, RegistryResult};

/// `n` and `last` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    /// Maximum number of results; must be a positive integer when present
    pub n: Option<String>,
    /// Exclusive cursor: results start after this item
    pub last: Option<String>,
}

impl PageQuery {
    fn limit(&self) -> RegistryResult<Option<usize>> {
        match self.n.as_deref() {
            None => Ok(None),
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Some(n)),
                _ => Err(RegistryError::PaginationNumberInvalid(raw.to_owned())),
            },
        }
    }
}

/// One page of a sorted listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Items on this page
    pub items: Vec<String>,
    /// `Link` header pointing at the next page, when there is one
    pub next: Option<String>,
}

impl Page {
    /// Headers to send with this page.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(link) = self.next.as_deref().and_then(|l| HeaderValue::from_str(l).ok()) {
            headers.insert(header::LINK, link);
        }
        headers
    }
}

/// Apply cursor pagination to an already sorted listing served at `path`.
///
/// A `last` cursor that is not in the listing leaves it unchanged.
pub fn paginate(mut items: Vec<String>, query: &PageQuery, path: &str) -> RegistryResult<Page> {
    let limit = query.limit()?;

    if let Some(last) = query.last.as_deref() {
        if let Some(position) = items.iter().position(|item| item == last) {
            items.drain(..=position);
        }
    }

    let next = match limit {
        Some(n) if items.len() > n => {
            items.truncate(n);
            items.last().map(|last| {
                let query =
                    serde_urlencoded::to_string(vec![("n", n.to_string()), ("last", last.clone())])
                        .unwrap_or_default();
                format!("<{path}?{query}>; rel=\"next\"")
            })
        }
        _ => None,
    };

    tracing::debug!(path, count = items.len(), more = next.is_some(), "paginated listing");
    Ok(Page { items, next })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item{i:02}")).collect()
    }

    fn query(n: Option<&str>, last: Option<&str>) -> PageQuery {
        PageQuery {
            n: n.map(str::to_owned),
            last: last.map(str::to_owned),
        }
    }

    #[test]
    fn no_parameters_returns_everything() {
        let page = paginate(items(5), &PageQuery::default(), "/v2/_catalog").unwrap();
        assert_eq!(page.items.len(), 5);
        assert!(page.next.is_none());
    }

    #[test]
    fn walks_every_page() {
        let all = items(7);
        let mut collected = Vec::new();
        let mut last: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = paginate(all.clone(), &query(Some("3"), last.as_deref()), "/v2/_catalog")
                .unwrap();
            pages += 1;
            collected.extend(page.items.clone());
            match page.next {
                Some(link) => {
                    let cursor = page.items.last().unwrap();
                    assert_eq!(link, format!("</v2/_catalog?n=3&last={cursor}>; rel=\"next\""));
                    last = Some(cursor.clone());
                }
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(collected, all);
    }

    #[test]
    fn exact_fit_has_no_link() {
        let page = paginate(items(3), &query(Some("3"), None), "/x").unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.next.is_none());
        assert!(page.headers().get(header::LINK).is_none());
    }

    #[test]
    fn unknown_cursor_is_ignored() {
        let page = paginate(items(3), &query(None, Some("zzz")), "/x").unwrap();
        assert_eq!(page.items, items(3));
    }

    #[test]
    fn cursor_is_exclusive() {
        let page = paginate(items(3), &query(None, Some("item00")), "/x").unwrap();
        assert_eq!(page.items, vec!["item01", "item02"]);
    }

    #[test]
    fn rejects_bad_page_sizes() {
        for bad in ["0", "-1", "abc", "", "1.5"] {
            let err = paginate(items(3), &query(Some(bad), None), "/x").unwrap_err();
            assert_eq!(err.error_code(), "PAGINATION_NUMBER_INVALID", "{bad}");
        }
    }

    #[test]
    fn link_header() {
        let page = paginate(items(3), &query(Some("1"), None), "/v2/alpine/tags/list").unwrap();
        let headers = page.headers();
        assert_eq!(
            headers.get(header::LINK).unwrap(),
            "</v2/alpine/tags/list?n=1&last=item00>; rel=\"next\""
        );
    }
}
