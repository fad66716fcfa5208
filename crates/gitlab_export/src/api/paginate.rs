//! Pagination drivers.
//!
//! A driver calls a page-fetch function with the query parameters for the
//! current page and feeds the returned cursor back in until the cursor is
//! empty. The driver never looks at the payload. A fetch function that wants
//! to stop early (for example on reaching records older than the last export)
//! returns [`PageInfo::stop`].

use std::future::Future;

use chrono::{DateTime, Utc};

use super::requester::NextPage;
use crate::error::{ExportError, Result};
use crate::export::types::MAX_FETCHED_ENTITIES_COUNT;
use crate::http::Params;

/// What a fetch function reports about the page it just read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Cursor of the next page.
    pub next_page: NextPage,
    /// Records on this page.
    pub page_size: usize,
}

impl PageInfo {
    pub fn new(next_page: NextPage, page_size: usize) -> Self {
        Self {
            next_page,
            page_size,
        }
    }

    /// A page after which pagination ends regardless of the cursor.
    pub fn stop(page_size: usize) -> Self {
        Self {
            next_page: None,
            page_size,
        }
    }
}

fn page_params(page: &str) -> Params {
    let mut params = Params::new();
    params.insert("page".to_string(), page.to_string());
    params
}

async fn drive<F, Fut>(start: &str, base: Params, mut fetch: F) -> Result<usize>
where
    F: FnMut(Params) -> Fut,
    Fut: Future<Output = Result<PageInfo>>,
{
    let mut page = start.to_string();
    let mut calls = 0usize;
    loop {
        let mut params = base.clone();
        params.extend(page_params(&page));
        let info = fetch(params).await?;
        calls += 1;

        let Some(next) = info.next_page else {
            return Ok(calls);
        };
        if info.page_size == 0 {
            return Err(ExportError::invalid_data(format!(
                "page {page} was empty but announced next page {next}"
            )));
        }
        tracing::debug!(page = %next, "fetching next page");
        page = next;
    }
}

/// Page-number pagination from page 1 with the given page size.
///
/// Returns the number of pages fetched.
pub async fn paginate<F, Fut>(per_page: u32, fetch: F) -> Result<usize>
where
    F: FnMut(Params) -> Fut,
    Fut: Future<Output = Result<PageInfo>>,
{
    let mut base = Params::new();
    base.insert("per_page".to_string(), per_page.to_string());
    drive("1", base, fetch).await
}

/// Pagination resuming from a stored cursor. An empty or absent cursor starts at page 1.
pub async fn paginate_start_at<F, Fut>(next_page: Option<&str>, fetch: F) -> Result<usize>
where
    F: FnMut(Params) -> Fut,
    Fut: Future<Output = Result<PageInfo>>,
{
    let start = next_page.filter(|p| !p.is_empty()).unwrap_or("1");
    drive(start, Params::new(), fetch).await
}

/// Pagination over records newer than `last_processed`.
///
/// Pages hold 100 records. When `last_processed` is set the results are
/// ordered by `updated_at` so the fetch function can stop at the first
/// record older than it. The stop time is passed to `fetch` with every page.
pub async fn paginate_newer_than<F, Fut>(
    last_processed: Option<DateTime<Utc>>,
    mut fetch: F,
) -> Result<usize>
where
    F: FnMut(Params, Option<DateTime<Utc>>) -> Fut,
    Fut: Future<Output = Result<PageInfo>>,
{
    let mut base = Params::new();
    base.insert(
        "per_page".to_string(),
        MAX_FETCHED_ENTITIES_COUNT.to_string(),
    );
    if last_processed.is_some() {
        base.insert("order_by".to_string(), "updated_at".to_string());
    }
    drive("1", base, |params| fetch(params, last_processed)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn cursors(pages: &[Option<&str>]) -> Arc<Mutex<Vec<NextPage>>> {
        Arc::new(Mutex::new(
            pages.iter().rev().map(|p| p.map(str::to_string)).collect(),
        ))
    }

    #[tokio::test]
    async fn calls_equal_non_empty_cursors_plus_one() {
        let pages = cursors(&[Some("2"), Some("3"), None]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_capture = Arc::clone(&seen);

        let calls = paginate(100, |params| {
            seen_capture.lock().unwrap().push(params);
            let next = pages.lock().unwrap().pop().flatten();
            async move { Ok(PageInfo::new(next, 100)) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 3);
        let seen = seen.lock().unwrap();
        let page_numbers: Vec<&str> = seen.iter().map(|p| p["page"].as_str()).collect();
        assert_eq!(page_numbers, vec!["1", "2", "3"]);
        assert!(seen.iter().all(|p| p["per_page"] == "100"));
    }

    #[tokio::test]
    async fn start_at_resumes_from_cursor() {
        let first = Arc::new(Mutex::new(None::<String>));
        let first_capture = Arc::clone(&first);

        let calls = paginate_start_at(Some("7"), |params| {
            first_capture
                .lock()
                .unwrap()
                .get_or_insert_with(|| params["page"].clone());
            async { Ok(PageInfo::new(None, 3)) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(first.lock().unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn start_at_defaults_to_first_page() {
        let calls = paginate_start_at(Some(""), |params| {
            assert_eq!(params["page"], "1");
            async { Ok(PageInfo::default()) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn empty_page_with_cursor_is_an_error() {
        let err = paginate(100, |_| async { Ok(PageInfo::new(Some("2".into()), 0)) })
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn fetch_errors_abort_immediately() {
        let calls = Arc::new(Mutex::new(0));
        let calls_capture = Arc::clone(&calls);
        let err = paginate(100, |_| {
            *calls_capture.lock().unwrap() += 1;
            async { Err::<PageInfo, _>(ExportError::internal("boom")) }
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("boom"));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn newer_than_orders_by_updated_at_when_incremental() {
        let since = Utc::now();
        let calls = paginate_newer_than(Some(since), |params, stop| {
            assert_eq!(params["order_by"], "updated_at");
            assert_eq!(params["per_page"], "100");
            assert_eq!(stop, Some(since));
            async { Ok(PageInfo::stop(100)) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 1);

        paginate_newer_than(None, |params, stop| {
            assert!(!params.contains_key("order_by"));
            assert!(stop.is_none());
            async { Ok(PageInfo::default()) }
        })
        .await
        .unwrap();
    }
}
