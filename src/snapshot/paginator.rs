// Pagination - fetches every page of a cursor-paginated endpoint
// Later pages are spaced out and retried with backoff; a failure there keeps a partial result

use crate::error::FetchError;
use crate::spotify::models::{Page, SnapshotItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can turn a page URL into a decoded page.
#[async_trait]
pub trait PageSource<T: Send + 'static>: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<Page<T>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct PagePolicy {
    /// Unconditional pause before every follow-up request
    pub request_delay: Duration,
    /// Total attempts per page, the first one included
    pub max_attempts: u32,
    /// Backoff unit: attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(500),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl PagePolicy {
    pub fn without_delays() -> Self {
        Self {
            request_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32, error: &FetchError) -> Duration {
        let linear = self.retry_delay * (attempt + 1);
        match error {
            FetchError::RateLimited { retry_after } => linear.max(*retry_after),
            _ => linear,
        }
    }
}

/// Result of walking every page of one collection.
#[derive(Debug)]
pub struct Collected<R> {
    pub records: HashMap<String, R>,
    /// Items dropped because Spotify sent no entity for them
    pub skipped: usize,
    /// Items seen across all pages, skipped ones included
    pub fetched: usize,
    pub total: u32,
    /// False when pagination was abandoned early
    pub complete: bool,
}

impl<R> Collected<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fetch a single page, retrying transient failures.
pub async fn fetch_with_retry<T, S>(
    source: &S,
    url: &str,
    policy: &PagePolicy,
) -> Result<Page<T>, FetchError>
where
    T: Send + 'static,
    S: PageSource<T> + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match source.fetch_page(url).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let wait = policy.backoff(attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    "{}. Retrying in {:?}",
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fetch the first page of `url` and everything after it.
///
/// Only a failing first page is an error; later failures leave a partial result.
pub async fn fetch_all<T, S>(
    source: &S,
    url: &str,
    policy: &PagePolicy,
    label: &str,
) -> Result<Collected<T::Record>, FetchError>
where
    T: SnapshotItem + Send + 'static,
    S: PageSource<T> + ?Sized,
{
    let first = fetch_with_retry(source, url, policy).await?;
    Ok(collect(source, first, policy, label).await)
}

/// Walk the `next` chain starting from an already fetched page.
pub async fn collect<T, S>(
    source: &S,
    first: Page<T>,
    policy: &PagePolicy,
    label: &str,
) -> Collected<T::Record>
where
    T: SnapshotItem + Send + 'static,
    S: PageSource<T> + ?Sized,
{
    let mut collected = Collected {
        records: HashMap::new(),
        skipped: 0,
        fetched: 0,
        total: first.total,
        complete: true,
    };
    let mut page = first;

    loop {
        collected.fetched += page.items.len();
        info!("Fetched {} / {} {}", collected.fetched, page.total, label);

        for item in page.items {
            match item.into_record() {
                // Later pages win; overlap only happens when the library changes mid-fetch
                Some((key, record)) => {
                    collected.records.insert(key, record);
                }
                None => collected.skipped += 1,
            }
        }

        let Some(next) = page.next else { break };

        tokio::time::sleep(policy.request_delay).await;
        match fetch_with_retry(source, &next, policy).await {
            Ok(next_page) => page = next_page,
            Err(e) => {
                warn!(
                    "Stopped fetching {} after {} items: {}. Continuing with what was fetched",
                    label, collected.fetched, e
                );
                collected.complete = false;
                break;
            }
        }
    }

    if collected.skipped > 0 {
        info!("Skipped {} {} with no data from Spotify", collected.skipped, label);
    }
    debug!(
        label,
        records = collected.records.len(),
        skipped = collected.skipped,
        complete = collected.complete,
        "Pagination finished"
    );

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Item {
        id: Option<&'static str>,
        name: &'static str,
    }

    impl SnapshotItem for Item {
        type Record = &'static str;

        fn into_record(self) -> Option<(String, &'static str)> {
            Some((self.id?.to_string(), self.name))
        }
    }

    fn item(id: &'static str, name: &'static str) -> Item {
        Item { id: Some(id), name }
    }

    fn page(items: Vec<Item>, next: Option<&str>, total: u32) -> Page<Item> {
        Page::new(items, next.map(str::to_string), total)
    }

    /// Responses are queued per URL and popped in order.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<HashMap<String, VecDeque<Result<Page<Item>, FetchError>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn respond(self, url: &str, response: Result<Page<Item>, FetchError>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource<Item> for ScriptedSource {
        async fn fetch_page(&self, url: &str) -> Result<Page<Item>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Err(FetchError::Http {
                    status: 404,
                    body: format!("unscripted {}", url),
                }))
        }
    }

    #[tokio::test]
    async fn test_follows_next_until_exhausted() {
        let source = ScriptedSource::default()
            .respond("p1", Ok(page(vec![item("a", "A"), item("b", "B")], Some("p2"), 3)))
            .respond("p2", Ok(page(vec![item("c", "C")], None, 3)));

        let collected = fetch_all(&source, "p1", &PagePolicy::without_delays(), "items")
            .await
            .unwrap();

        assert!(collected.complete);
        assert_eq!(collected.len(), 3);
        assert_eq!(collected.fetched, 3);
        assert_eq!(collected.records["c"], "C");
    }

    #[tokio::test]
    async fn test_overlapping_pages_deduplicate_by_id() {
        // "b" shifted onto the second page while we were paging
        let source = ScriptedSource::default()
            .respond("p1", Ok(page(vec![item("a", "A"), item("b", "B")], Some("p2"), 3)))
            .respond("p2", Ok(page(vec![item("b", "B"), item("c", "C")], None, 3)));

        let collected = fetch_all(&source, "p1", &PagePolicy::without_delays(), "items")
            .await
            .unwrap();

        assert_eq!(collected.len(), 3);
        assert!(collected.len() <= collected.total as usize);
    }

    #[tokio::test]
    async fn test_tombstoned_items_are_counted_not_kept() {
        let source = ScriptedSource::default().respond(
            "p1",
            Ok(page(vec![item("a", "A"), Item { id: None, name: "gone" }], None, 2)),
        );

        let collected = fetch_all(&source, "p1", &PagePolicy::without_delays(), "items")
            .await
            .unwrap();

        assert_eq!(collected.len(), 1);
        assert_eq!(collected.skipped, 1);
    }

    #[tokio::test]
    async fn test_timeout_on_page_three_of_five_keeps_earlier_pages() {
        let source = ScriptedSource::default()
            .respond("p1", Ok(page(vec![item("a", "A")], Some("p2"), 5)))
            .respond("p2", Ok(page(vec![item("b", "B")], Some("p3"), 5)))
            .respond("p3", Err(FetchError::Timeout))
            .respond("p3", Err(FetchError::Timeout))
            .respond("p3", Err(FetchError::Timeout))
            .respond("p3", Ok(page(vec![item("c", "C")], Some("p4"), 5)));

        let collected = fetch_all(&source, "p1", &PagePolicy::without_delays(), "items")
            .await
            .unwrap();

        assert!(!collected.complete);
        assert_eq!(collected.len(), 2);
        // two good pages plus three attempts at page three
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_budget() {
        let source = ScriptedSource::default()
            .respond("p1", Ok(page(vec![item("a", "A")], Some("p2"), 2)))
            .respond(
                "p2",
                Err(FetchError::RateLimited {
                    retry_after: Duration::ZERO,
                }),
            )
            .respond("p2", Ok(page(vec![item("b", "B")], None, 2)));

        let collected = fetch_all(&source, "p1", &PagePolicy::without_delays(), "items")
            .await
            .unwrap();

        assert!(collected.complete);
        assert_eq!(collected.len(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_first_page_error_is_not_retried() {
        let source = ScriptedSource::default().respond("p1", Err(FetchError::Unauthorized));

        let result = fetch_all(&source, "p1", &PagePolicy::without_delays(), "items").await;

        assert!(matches!(result, Err(FetchError::Unauthorized)));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_backoff_is_linear_and_honours_retry_after() {
        let policy = PagePolicy::default();
        assert_eq!(policy.backoff(0, &FetchError::Timeout), Duration::from_secs(2));
        assert_eq!(policy.backoff(1, &FetchError::Timeout), Duration::from_secs(4));

        let limited = FetchError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff(0, &limited), Duration::from_secs(30));
    }
}
