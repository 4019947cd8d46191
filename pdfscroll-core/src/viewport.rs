//! Two-slot sliding window over the document.
//!
//! The window holds the page currently at the top of the screen (`primary`)
//! and, while a page boundary is on screen, the page right below it
//! (`secondary`). Offsets are in screen pixels: `0` puts a page's top edge on
//! the viewport top, negative values move the page up. A page occupies
//! `image_height * zoom` screen pixels.

use thiserror::Error;
use tracing::debug;

use crate::cache::PageMetrics;
use crate::Command;

pub const DEFAULT_VIEWPORT_WIDTH: f32 = 800.0;
pub const DEFAULT_VIEWPORT_HEIGHT: f32 = 1200.0;
pub const DEFAULT_MIN_ZOOM: f32 = 0.25;
pub const DEFAULT_MAX_ZOOM: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportConfig {
    pub width: f32,
    pub height: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportPage {
    /// 0-based page index.
    pub page_index: usize,
    pub offset: f32,
}

impl ViewportPage {
    pub fn new(page_index: usize, offset: f32) -> Self {
        Self { page_index, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportWindow {
    pub primary: Option<ViewportPage>,
    pub secondary: Option<ViewportPage>,
}

impl ViewportWindow {
    pub fn single(primary: ViewportPage) -> Self {
        Self {
            primary: Some(primary),
            secondary: None,
        }
    }

    pub fn pair(primary: ViewportPage, secondary: ViewportPage) -> Self {
        Self {
            primary: Some(primary),
            secondary: Some(secondary),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }

    pub fn pages(&self) -> impl Iterator<Item = (Slot, ViewportPage)> {
        let primary = self.primary.map(|page| (Slot::Primary, page));
        let secondary = self.secondary.map(|page| (Slot::Secondary, page));
        primary.into_iter().chain(secondary)
    }

    /// Highest resident page index.
    pub fn last_index(&self) -> Option<usize> {
        self.pages().map(|(_, page)| page.page_index).max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollState {
    /// Pixels per tick; positive scrolls forward.
    pub speed: f32,
    pub zoom: f32,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            speed: 0.0,
            zoom: 1.0,
        }
    }
}

/// What a single tick did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The document has no pages.
    Empty,
    /// Speed is zero.
    Paused,
    /// A page needed for this tick is not decoded yet.
    Waiting { page_index: usize },
    Scrolled,
    /// A page entered the window below the primary.
    Appended { page_index: usize },
    /// The primary slot changed to `page_index`.
    Shifted { page_index: usize },
    /// The secondary page left the screen at the bottom.
    Dropped { page_index: usize },
    AtStart,
    AtEnd,
}

impl TickOutcome {
    pub fn scrolled(&self) -> bool {
        matches!(self, TickOutcome::Scrolled)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewportError {
    #[error("viewport lost its primary page while the document has {page_count} pages")]
    MissingPrimary { page_count: usize },
}

/// One page placement for the draw step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub slot: Slot,
    pub page_index: usize,
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

pub struct ViewportController {
    config: ViewportConfig,
    page_count: usize,
    window: ViewportWindow,
    scroll: ScrollState,
}

impl ViewportController {
    pub fn new(page_count: usize, config: ViewportConfig) -> Self {
        let window = if page_count > 0 {
            ViewportWindow::single(ViewportPage::new(0, 0.0))
        } else {
            ViewportWindow::default()
        };
        Self::with_window(page_count, config, window)
    }

    pub fn with_window(page_count: usize, config: ViewportConfig, window: ViewportWindow) -> Self {
        Self {
            config,
            page_count,
            window,
            scroll: ScrollState::default(),
        }
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn window(&self) -> &ViewportWindow {
        &self.window
    }

    pub fn scroll(&self) -> ScrollState {
        self.scroll
    }

    pub fn set_speed(&mut self, speed: f32) {
        if speed.is_finite() {
            self.scroll.speed = speed;
        }
    }

    pub fn apply<M: PageMetrics + ?Sized>(&mut self, command: Command, metrics: &M) {
        match command {
            Command::AdjustSpeed { delta } => self.set_speed(self.scroll.speed + delta),
            Command::StopScrolling => self.scroll.speed = 0.0,
            Command::AdjustZoom { delta } => {
                self.set_zoom(self.scroll.zoom + delta, metrics);
            }
            Command::NextPage => {
                self.jump_next();
            }
            Command::PrevPage => {
                self.jump_previous();
            }
            Command::Resize { width, height } => self.resize(width, height),
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.config.width = width;
            self.config.height = height;
        }
    }

    /// Changes the zoom, clamped to the configured range, and lays the window
    /// out again: the primary keeps its relative position and the secondary is
    /// re-attached to the primary's new bottom edge. Returns the zoom in
    /// effect.
    pub fn set_zoom<M: PageMetrics + ?Sized>(&mut self, zoom: f32, metrics: &M) -> f32 {
        if !zoom.is_finite() {
            return self.scroll.zoom;
        }
        let zoom = zoom.clamp(self.config.min_zoom, self.config.max_zoom);
        let previous = self.scroll.zoom;
        if (zoom - previous).abs() < f32::EPSILON {
            return previous;
        }
        self.scroll.zoom = zoom;

        if let Some(primary) = self.window.primary.as_mut() {
            primary.offset *= zoom / previous;
        }
        if let Some(primary) = self.window.primary {
            let bottom = self
                .scaled_height(metrics, primary.page_index)
                .map(|height| primary.offset + height);
            if let (Some(secondary), Some(bottom)) = (self.window.secondary.as_mut(), bottom) {
                secondary.offset = bottom;
            }
        }
        zoom
    }

    /// Runs one tick of speed-driven scrolling.
    ///
    /// A tick performs at most one window transition; a tick that changes the
    /// window does not also move the offsets, so neighbouring pages always
    /// meet edge to edge.
    pub fn advance<M: PageMetrics + ?Sized>(
        &mut self,
        metrics: &M,
    ) -> Result<TickOutcome, ViewportError> {
        if self.page_count == 0 {
            return Ok(TickOutcome::Empty);
        }
        let primary = self.window.primary.ok_or(ViewportError::MissingPrimary {
            page_count: self.page_count,
        })?;

        let speed = self.scroll.speed;
        if speed == 0.0 {
            return Ok(TickOutcome::Paused);
        }

        let Some(height) = self.scaled_height(metrics, primary.page_index) else {
            return Ok(TickOutcome::Waiting {
                page_index: primary.page_index,
            });
        };

        let outcome = if speed > 0.0 {
            self.advance_forward(primary, height)
        } else {
            self.advance_backward(metrics, primary)
        };

        if outcome.scrolled() {
            for page in [self.window.primary.as_mut(), self.window.secondary.as_mut()]
                .into_iter()
                .flatten()
            {
                page.offset -= speed;
            }
        }
        Ok(outcome)
    }

    fn advance_forward(&mut self, primary: ViewportPage, height: f32) -> TickOutcome {
        let viewport = self.config.height;
        let travelled = (-primary.offset).max(0.0);
        let next_index = primary.page_index + 1;

        match self.window.secondary {
            Some(next) if travelled >= height => {
                self.window.primary = Some(next);
                self.window.secondary = None;
                debug!(
                    page = next.page_index + 1,
                    travelled, height, "primary page scrolled past, shifting window"
                );
                return TickOutcome::Shifted {
                    page_index: next.page_index,
                };
            }
            None if travelled >= height - viewport && next_index < self.page_count => {
                let entering = ViewportPage::new(next_index, primary.offset + height);
                self.window.secondary = Some(entering);
                debug!(
                    page = next_index + 1,
                    page_count = self.page_count,
                    offset = entering.offset,
                    "next page entering viewport"
                );
                return TickOutcome::Appended {
                    page_index: next_index,
                };
            }
            _ => {}
        }

        if next_index == self.page_count && travelled + viewport >= height {
            let resting = (viewport - height).min(0.0);
            if let Some(last) = self.window.primary.as_mut() {
                if last.offset < resting {
                    last.offset = resting;
                }
            }
            debug!("scroll halted at the end of the document");
            return TickOutcome::AtEnd;
        }

        TickOutcome::Scrolled
    }

    fn advance_backward<M: PageMetrics + ?Sized>(
        &mut self,
        metrics: &M,
        primary: ViewportPage,
    ) -> TickOutcome {
        let viewport = self.config.height;

        if let Some(next) = self.window.secondary {
            if next.offset > viewport {
                self.window.secondary = None;
                debug!(page = next.page_index + 1, "next page left the viewport");
                return TickOutcome::Dropped {
                    page_index: next.page_index,
                };
            }
        }

        if primary.offset < 0.0 {
            return TickOutcome::Scrolled;
        }

        let Some(previous) = primary.page_index.checked_sub(1) else {
            let correction = primary.offset;
            for page in [self.window.primary.as_mut(), self.window.secondary.as_mut()]
                .into_iter()
                .flatten()
            {
                page.offset -= correction;
            }
            debug!("scroll halted at the start of the document");
            return TickOutcome::AtStart;
        };

        let Some(height) = self.scaled_height(metrics, previous) else {
            return TickOutcome::Waiting {
                page_index: previous,
            };
        };

        self.window.secondary = Some(ViewportPage::new(primary.page_index, 0.0));
        self.window.primary = Some(ViewportPage::new(previous, -height));
        debug!(
            page = previous + 1,
            height, "top of page reached, previous page entering viewport"
        );
        TickOutcome::Shifted {
            page_index: previous,
        }
    }

    /// Replaces the window with the page after the last resident one.
    /// Returns `false` and leaves the window alone at the last page.
    pub fn jump_next(&mut self) -> bool {
        let Some(current) = self.window.last_index() else {
            return false;
        };
        let target = current + 1;
        if target >= self.page_count {
            return false;
        }
        debug!(from = current + 1, to = target + 1, "jumping to next page");
        self.window = ViewportWindow::single(ViewportPage::new(target, 0.0));
        true
    }

    /// Replaces the window with the page before the primary one. Returns
    /// `false` and leaves the window alone at the first page.
    pub fn jump_previous(&mut self) -> bool {
        let Some(primary) = self.window.primary else {
            return false;
        };
        let Some(target) = primary.page_index.checked_sub(1) else {
            return false;
        };
        debug!(
            from = primary.page_index + 1,
            to = target + 1,
            "jumping to previous page"
        );
        self.window = ViewportWindow::single(ViewportPage::new(target, 0.0));
        true
    }

    /// 1-based page number shown to the user: the lowest resident page when
    /// scrolling backwards, the highest one otherwise.
    pub fn current_page(&self) -> Option<usize> {
        let index = if self.scroll.speed >= 0.0 {
            self.window.last_index()
        } else {
            self.window.primary.map(|page| page.page_index)
        }?;
        Some(index + 1)
    }

    /// Placements for every resident page whose image is available. Pages
    /// still being decoded are left out.
    pub fn draw_list<M: PageMetrics + ?Sized>(&self, metrics: &M) -> Vec<DrawCommand> {
        let zoom = self.scroll.zoom;
        self.window
            .pages()
            .filter_map(|(slot, page)| {
                let (width, _) = metrics.page_size(page.page_index)?;
                Some(DrawCommand {
                    slot,
                    page_index: page.page_index,
                    scale: zoom,
                    translate_x: self.config.width / 2.0 - width as f32 * zoom / 2.0,
                    translate_y: page.offset,
                })
            })
            .collect()
    }

    fn scaled_height<M: PageMetrics + ?Sized>(&self, metrics: &M, page_index: usize) -> Option<f32> {
        metrics
            .page_height(page_index)
            .map(|height| height as f32 * self.scroll.zoom)
    }
}
