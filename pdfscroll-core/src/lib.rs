use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument, warn};

pub mod cache;
pub mod config;
pub mod loader;
pub mod status;
pub mod viewport;

pub use cache::{PageCache, PageMetrics};
pub use config::{ConfigError, ViewerConfig};
pub use loader::{load_initial, spawn_background_load, BackgroundLoad, LoadReport};
pub use status::{StatusLine, TickCounter};
pub use viewport::{
    DrawCommand, ScrollState, Slot, TickOutcome, ViewportConfig, ViewportController,
    ViewportError, ViewportPage, ViewportWindow,
};

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
}

/// A decoded page raster in tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub page_index: usize,
    pub image: PageImage,
}

/// Inclusive range of 0-based page indices. Displays 1-based, the way page
/// numbers are shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSelection {
    first: usize,
    last: usize,
}

impl PageSelection {
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    pub fn single(page_index: usize) -> Self {
        Self::new(page_index, page_index)
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn contains(&self, page_index: usize) -> bool {
        (self.first..=self.last).contains(&page_index)
    }

    pub fn page_count(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        self.first..=self.last
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first + 1)
        } else {
            write!(f, "{}-{}", self.first + 1, self.last + 1)
        }
    }
}

/// Input-level operations on the viewer. Quitting is not a command; the
/// event layer handles it before anything reaches the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    AdjustSpeed { delta: f32 },
    StopScrolling,
    AdjustZoom { delta: f32 },
    NextPage,
    PrevPage,
    Resize { width: f32, height: f32 },
}

/// Increments applied by the speed and zoom keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSteps {
    pub speed: f32,
    pub fast_speed: f32,
    pub zoom: f32,
}

impl Default for ScrollSteps {
    fn default() -> Self {
        Self {
            speed: 1.0,
            fast_speed: 40.0,
            zoom: 0.1,
        }
    }
}

/// Decodes page ranges of one open document into rasters.
pub trait PageImageProvider: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn extract_pages(&self, selection: &PageSelection) -> Result<Vec<ExtractedPage>>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageImageProvider>>;
}

/// An opened document together with its (initially empty) page cache.
pub struct Document {
    pub info: DocumentInfo,
    pub pages: Arc<dyn PageImageProvider>,
    pub cache: Arc<PageCache>,
}

impl Document {
    #[instrument(skip(provider))]
    pub async fn open_with<P: DocumentProvider + ?Sized>(provider: &P, path: &Path) -> Result<Self> {
        let pages = provider.open(path).await?;
        let info = pages.info().clone();
        if info.page_count == 0 {
            warn!(path = ?info.path, "document has no pages");
        }
        info!(page_count = info.page_count, "document opened");
        Ok(Self {
            cache: Arc::new(PageCache::new(info.page_count)),
            info,
            pages,
        })
    }
}
