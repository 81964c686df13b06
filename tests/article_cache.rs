// tests/article_cache.rs
//
// Reference article cache lifecycle: population with retries, incremental refresh,
// failure handling, snapshot atomicity and the background refresher.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use macron_monitor::articles::{spawn_refresher, ArticleCache, CacheState, TitleSource};
use macron_monitor::retry::RetryPolicy;

/// Scripted source: fails the first `fail_first` calls, then answers from `batches`
/// (the last batch repeats). Records every cursor it was asked for.
struct Scripted {
    fail_first: u32,
    calls: AtomicU32,
    batches: Vec<Vec<String>>,
    cursors: Mutex<Vec<Option<String>>>,
}

impl Scripted {
    fn new(fail_first: u32, batches: Vec<Vec<&str>>) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
            batches: batches
                .into_iter()
                .map(|b| b.into_iter().map(String::from).collect())
                .collect(),
            cursors: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TitleSource for Scripted {
    async fn fetch_titles(&self, after: Option<&str>) -> Result<Vec<String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().unwrap().push(after.map(String::from));
        if n < self.fail_first {
            bail!("upstream 503");
        }
        let idx = ((n - self.fail_first) as usize).min(self.batches.len().saturating_sub(1));
        Ok(self.batches.get(idx).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Source whose answer can be switched between success and failure.
struct Toggle {
    fail: AtomicBool,
    titles: Vec<String>,
}

#[async_trait]
impl TitleSource for Toggle {
    async fn fetch_titles(&self, _after: Option<&str>) -> Result<Vec<String>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("timeout talking to title service");
        }
        Ok(self.titles.clone())
    }

    fn name(&self) -> &'static str {
        "toggle"
    }
}

/// Source that never answers within any sane timeout.
struct Stalled {
    calls: AtomicU32,
}

#[async_trait]
impl TitleSource for Stalled {
    async fn fetch_titles(&self, _after: Option<&str>) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(vec!["Rēkohu".into()])
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}

const TIMEOUT: Duration = Duration::from_secs(5);

fn policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(500))
}

#[tokio::test(start_paused = true)]
async fn population_retries_transient_failures() {
    let src = Scripted::new(2, vec![vec!["Kāti_Māmoe", "Ōtautahi"]]);
    let cache = ArticleCache::populate(&src, policy(5), TIMEOUT).await.unwrap();

    assert_eq!(src.calls(), 3);
    assert_eq!(cache.state(), CacheState::Ready);
    assert_eq!(cache.len(), 2);
    assert!(cache.contains("Kāti Māmoe"));
    assert!(cache.contains("Kāti_Māmoe"));
    let cursor = cache.cursor().expect("cursor set after population");
    assert_eq!(cursor.len(), 14);
    assert!(cursor.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test(start_paused = true)]
async fn population_fails_after_exhausting_retries() {
    let src = Scripted::new(u32::MAX, vec![]);
    let err = ArticleCache::populate(&src, policy(3), TIMEOUT)
        .await
        .err()
        .expect("population must fail");
    assert_eq!(src.calls(), 3);
    assert!(format!("{err:#}").contains("3 attempt"));
}

#[tokio::test(start_paused = true)]
async fn population_attempts_are_time_bounded() {
    let src = Stalled {
        calls: AtomicU32::new(0),
    };
    let started = tokio::time::Instant::now();
    let err = ArticleCache::populate(&src, policy(2), TIMEOUT)
        .await
        .err()
        .expect("stalled source must fail population");
    assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    assert!(format!("{err:#}").contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn refresh_merges_and_advances_cursor() {
    let src = Scripted::new(0, vec![vec!["Kākāpō"], vec!["Whānau", "kākāpō"]]);
    let cache = ArticleCache::populate(&src, policy(1), TIMEOUT).await.unwrap();
    let first_cursor = cache.cursor();

    let added = cache.refresh(&src).await.unwrap();
    assert_eq!(added, 1);
    assert_eq!(cache.len(), 2);
    assert!(cache.contains("Kākāpō"));
    assert!(cache.contains("Whānau"));

    let cursors = src.cursors.lock().unwrap().clone();
    assert_eq!(cursors[0], None);
    assert_eq!(cursors[1], first_cursor);
    assert_eq!(cache.state(), CacheState::Ready);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_set_and_cursor() {
    let src = Toggle {
        fail: AtomicBool::new(false),
        titles: vec!["Aotearoa".into()],
    };
    let cache = ArticleCache::populate(&src, policy(1), TIMEOUT).await.unwrap();
    let before = cache.snapshot();

    src.fail.store(true, Ordering::SeqCst);
    assert!(cache.refresh(&src).await.is_err());

    let after = cache.snapshot();
    assert!(Arc::ptr_eq(&before, &after), "snapshot must not be replaced");
    assert_eq!(cache.cursor(), before.cursor().map(String::from));
    assert_eq!(cache.state(), CacheState::Ready);
    assert!(cache.contains("Aotearoa"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_partial_merge() {
    const BATCH: usize = 2_000;
    let batch: Vec<String> = (0..BATCH).map(|i| format!("Pā {i}")).collect();
    let cache = Arc::new(ArticleCache::from_titles(["Aotearoa"]));
    let src = Toggle {
        fail: AtomicBool::new(false),
        titles: batch.clone(),
    };

    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let batch = batch.clone();
        let done = Arc::clone(&done);
        let observed = Arc::clone(&observed);
        readers.push(tokio::spawn(async move {
            loop {
                let snap = cache.snapshot();
                let seen = batch.iter().filter(|t| snap.contains(t)).count();
                assert!(seen == 0 || seen == BATCH, "partial snapshot: {seen}/{BATCH}");
                assert!(snap.contains("Aotearoa"));
                observed.fetch_add(1, Ordering::SeqCst);
                if done.load(Ordering::SeqCst) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for _ in 0..3 {
        cache.refresh(&src).await.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    for r in readers {
        r.await.unwrap();
    }
    assert_eq!(cache.len(), BATCH + 1);
    assert!(observed.load(Ordering::SeqCst) > 0);
}

#[tokio::test(start_paused = true)]
async fn refresher_ticks_and_stops_on_cancel() {
    let src = Arc::new(Scripted::new(0, vec![vec!["Aotearoa"], vec!["Rēkohu"]]));
    let cache = Arc::new(ArticleCache::populate(&*src, policy(1), TIMEOUT).await.unwrap());
    assert_eq!(src.calls(), 1);

    let source: Arc<dyn TitleSource> = src.clone();
    let handle = spawn_refresher(
        Arc::clone(&cache),
        source,
        Duration::from_secs(60),
        Duration::from_secs(5),
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(src.calls(), 1, "no refresh before the first interval");

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(src.calls(), 2);
    assert!(cache.contains("Rēkohu"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(src.calls(), 3);

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(src.calls(), 3, "no refresh after cancel");
}

#[tokio::test(start_paused = true)]
async fn refresher_survives_failing_cycles() {
    let src = Arc::new(Toggle {
        fail: AtomicBool::new(false),
        titles: vec!["Aotearoa".into()],
    });
    let cache = Arc::new(ArticleCache::populate(&*src, policy(1), TIMEOUT).await.unwrap());
    src.fail.store(true, Ordering::SeqCst);

    let source: Arc<dyn TitleSource> = src.clone();
    let handle = spawn_refresher(
        Arc::clone(&cache),
        source,
        Duration::from_secs(10),
        Duration::from_secs(5),
    );
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(!handle.is_finished());
    assert!(cache.contains("Aotearoa"));
    assert_eq!(cache.state(), CacheState::Ready);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timed_out_refresh_returns_to_ready() {
    let cache = Arc::new(ArticleCache::from_titles(["Aotearoa"]));
    let src = Arc::new(Stalled {
        calls: AtomicU32::new(0),
    });
    let source: Arc<dyn TitleSource> = src.clone();
    let handle = spawn_refresher(
        Arc::clone(&cache),
        source,
        Duration::from_secs(10),
        Duration::from_secs(5),
    );

    // inside the first cycle, before its timeout
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.state(), CacheState::Refreshing);

    // the cycle was abandoned at 15s; the next one starts at 20s
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(cache.state(), CacheState::Ready);
    assert!(cache.contains("Aotearoa"));
    assert!(!cache.contains("Rēkohu"));

    handle.shutdown().await;
    assert_eq!(cache.state(), CacheState::Ready);
}
