use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::cache::PageCache;
use crate::{PageImageProvider, PageSelection};

/// Pages decoded synchronously before the first tick.
pub const EAGER_PAGES: usize = 2;

pub const DEFAULT_BATCH_SIZE: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub error: Option<String>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Decodes the first pages of the document into the cache.
///
/// Any failure here is a startup error: the viewer has nothing to show.
pub fn load_initial(provider: &dyn PageImageProvider, cache: &PageCache) -> Result<usize> {
    let page_count = cache.page_count();
    if page_count == 0 {
        return Ok(0);
    }

    let selection = PageSelection::new(0, EAGER_PAGES.min(page_count) - 1);
    let loaded = publish(provider, cache, selection)
        .with_context(|| format!("failed to extract initial pages {}", selection))?;
    info!(loaded, page_count, "initial pages cached");
    Ok(loaded)
}

/// Decodes every page after the eager ones, in index order, one batch at a
/// time. Stops at the first failing batch; pages published before it stay
/// cached.
pub fn load_remaining(
    provider: &dyn PageImageProvider,
    cache: &PageCache,
    batch_size: usize,
) -> LoadReport {
    let mut report = LoadReport::default();
    for selection in remaining_batches(cache.page_count(), batch_size) {
        match publish(provider, cache, selection) {
            Ok(count) => {
                report.loaded += count;
                debug!(pages = %selection, count, "batch cached");
            }
            Err(err) => {
                report.error = Some(format!("pages {}: {:#}", selection, err));
                break;
            }
        }
    }
    report
}

/// Handle to the single background population task.
pub struct BackgroundLoad {
    handle: JoinHandle<LoadReport>,
}

impl BackgroundLoad {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the task ends.
    pub fn join(self) -> LoadReport {
        self.handle.join().unwrap_or_else(|_| LoadReport {
            loaded: 0,
            error: Some("background loader panicked".to_string()),
        })
    }
}

/// Starts loading the remainder of the document on its own thread.
///
/// The thread is detached from the tick loop: nothing waits on it, and a
/// quitting viewer does not wait for it either.
pub fn spawn_background_load(
    provider: Arc<dyn PageImageProvider>,
    cache: Arc<PageCache>,
    batch_size: usize,
) -> Result<BackgroundLoad> {
    let handle = thread::Builder::new()
        .name("page-loader".to_string())
        .spawn(move || {
            let report = load_remaining(provider.as_ref(), &cache, batch_size);
            match &report.error {
                Some(err) => error!(
                    loaded = report.loaded,
                    cached = cache.loaded_count(),
                    "background page load stopped early: {}",
                    err
                ),
                None => info!(
                    loaded = report.loaded,
                    cached = cache.loaded_count(),
                    "background page load finished"
                ),
            }
            report
        })
        .context("failed to spawn background page loader")?;
    Ok(BackgroundLoad { handle })
}

fn remaining_batches(page_count: usize, batch_size: usize) -> impl Iterator<Item = PageSelection> {
    let batch_size = batch_size.max(1);
    (EAGER_PAGES..page_count)
        .step_by(batch_size)
        .map(move |first| PageSelection::new(first, (first + batch_size).min(page_count) - 1))
}

/// Decodes the uncached pages of `selection` and caches them. Cached pages
/// are never sent to the provider again.
fn publish(
    provider: &dyn PageImageProvider,
    cache: &PageCache,
    selection: PageSelection,
) -> Result<usize> {
    let runs = uncached_runs(cache, selection);
    if runs.is_empty() {
        debug!(pages = %selection, "pages already cached");
        return Ok(0);
    }

    let mut published = 0;
    for run in runs {
        published += publish_run(provider, cache, run)?;
    }
    Ok(published)
}

/// Splits `selection` into maximal ranges of pages missing from the cache.
fn uncached_runs(cache: &PageCache, selection: PageSelection) -> Vec<PageSelection> {
    let mut runs = Vec::new();
    let mut start = None;
    for page_index in selection.iter() {
        match (cache.contains(page_index), start) {
            (false, None) => start = Some(page_index),
            (true, Some(first)) => {
                runs.push(PageSelection::new(first, page_index - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(first) = start {
        runs.push(PageSelection::new(first, selection.last()));
    }
    runs
}

fn publish_run(
    provider: &dyn PageImageProvider,
    cache: &PageCache,
    selection: PageSelection,
) -> Result<usize> {
    let pages = provider.extract_pages(&selection)?;
    let mut published = 0;
    for page in pages {
        if !selection.contains(page.page_index) {
            warn!(
                page = page.page_index + 1,
                requested = %selection,
                "provider returned a page outside the selection"
            );
            continue;
        }
        if cache.insert(page.page_index, page.image) {
            published += 1;
        }
    }

    if published < selection.page_count() {
        warn!(
            requested = %selection,
            published,
            "some requested pages were not returned"
        );
    }
    Ok(published)
}
