use std::env;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfscroll_core::{
    DocumentInfo, DocumentProvider, ExtractedPage, PageImage, PageImageProvider, PageSelection,
};
use tracing::{debug, instrument, warn};

pub const LIBRARY_PATH_ENV: &str = "PDFIUM_LIBRARY_PATH";

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Raster width in pixels; 0 renders at the page's natural size.
    pub target_width: u32,
    pub library_path: Option<PathBuf>,
}

pub struct PdfiumProviderFactory {
    pdfium: Arc<Pdfium>,
    target_width: u32,
}

impl PdfiumProviderFactory {
    pub fn new(options: RenderOptions) -> Result<Self> {
        let env_path = env::var_os(LIBRARY_PATH_ENV).map(PathBuf::from);
        let pdfium = bind_pdfium(&library_candidates(options.library_path, env_path))?;
        Ok(Self {
            pdfium: Arc::new(pdfium),
            target_width: options.target_width,
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProviderFactory {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageImageProvider>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let provider =
            PdfiumPageProvider::new(Arc::clone(&self.pdfium), absolute, self.target_width);
        let page_count = provider.with_document(|document| {
            Ok(usize::try_from(document.pages().len()).unwrap_or_default())
        })?;
        Ok(Arc::new(provider.with_page_count(page_count)))
    }
}

/// Rasterizes pages of one PDF file. The pdfium document is opened on first
/// use and kept for the provider's lifetime.
pub struct PdfiumPageProvider {
    info: DocumentInfo,
    target_width: u32,
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumPageProvider {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, target_width: u32) -> Self {
        Self {
            info: DocumentInfo {
                path,
                page_count: 0,
            },
            target_width,
            document: Mutex::new(None),
            pdfium,
        }
    }

    fn with_page_count(mut self, page_count: usize) -> Self {
        self.info.page_count = page_count;
        self
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.info.path, None)
            .with_context(|| format!("failed to open {:?}", self.info.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It
        // lives in `self.document`, which is declared before `pdfium` and so is
        // dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        let document = match guard.take() {
            Some(document) => document,
            None => self.open_document()?,
        };
        let result = f(&document);
        *guard = Some(document);
        result
    }

    fn render_config(&self) -> PdfRenderConfig {
        if self.target_width == 0 {
            PdfRenderConfig::new().scale_page_by_factor(1.0)
        } else {
            let width = i32::try_from(self.target_width).unwrap_or(i32::MAX);
            PdfRenderConfig::new().set_target_width(width)
        }
    }

    fn render_page(
        &self,
        document: &PdfDocument<'_>,
        config: &PdfRenderConfig,
        page_index: usize,
    ) -> Result<PageImage> {
        let index = pdfium_page_index(page_index)?;
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index + 1))?;
        let bitmap = page
            .render_with_config(config)
            .with_context(|| format!("failed to render page {}", page_index + 1))?;
        let image = bitmap.as_image().to_rgba8();

        Ok(PageImage {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

impl PageImageProvider for PdfiumPageProvider {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self, selection), fields(pages = %selection))]
    fn extract_pages(&self, selection: &PageSelection) -> Result<Vec<ExtractedPage>> {
        if selection.last() >= self.info.page_count {
            return Err(anyhow!(
                "pages {} exceed document length {}",
                selection,
                self.info.page_count
            ));
        }

        let started = Instant::now();
        let config = self.render_config();
        let pages = self.with_document(|document| {
            selection
                .iter()
                .map(|page_index| {
                    self.render_page(document, &config, page_index)
                        .map(|image| ExtractedPage { page_index, image })
                })
                .collect::<Result<Vec<_>>>()
        })?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "pages rendered");
        Ok(pages)
    }
}

fn pdfium_page_index(page_index: usize) -> Result<PdfPageIndex> {
    PdfPageIndex::try_from(page_index)
        .map_err(|_| anyhow!("page {} is out of supported range", page_index + 1))
}

/// Library locations to try, most specific first. The current directory and
/// the system library are tried after these.
fn library_candidates(configured: Option<PathBuf>, env_path: Option<PathBuf>) -> Vec<PathBuf> {
    configured
        .into_iter()
        .chain(env_path)
        .filter(|path| !path.as_os_str().is_empty())
        .collect()
}

fn bind_pdfium(candidates: &[PathBuf]) -> Result<Pdfium> {
    let mut errors = Vec::new();

    for path in candidates {
        match Pdfium::bind_to_library(path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}: {}", path.display(), err);
                errors.push(format!("{}: {}", path.display(), err));
            }
        }
    }

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or render.pdfium_library ({})",
                LIBRARY_PATH_ENV,
                errors.join(", ")
            ))
        }
    }
}
