use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::cache::PageCache;
use crate::viewport::ViewportController;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusLine {
    /// 1-based, 0 for an empty document.
    pub page: usize,
    pub page_count: usize,
    pub loaded: usize,
    pub speed: f32,
    pub zoom: f32,
    pub ticks_per_second: f64,
}

impl StatusLine {
    pub fn capture(controller: &ViewportController, cache: &PageCache, ticks_per_second: f64) -> Self {
        let scroll = controller.scroll();
        Self {
            page: controller.current_page().unwrap_or(0),
            page_count: controller.page_count(),
            loaded: cache.loaded_count(),
            speed: scroll.speed,
            zoom: scroll.zoom,
            ticks_per_second,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page: {} of {} (Loaded: {}), Speed: {:.2}, Zoom: {:.2}, TPS: {:.2}",
            self.page, self.page_count, self.loaded, self.speed, self.zoom, self.ticks_per_second
        )
    }
}

/// Measured tick rate over a sliding window.
#[derive(Debug)]
pub struct TickCounter {
    span: Duration,
    ticks: VecDeque<Instant>,
}

impl TickCounter {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            ticks: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.ticks.push_back(now);
        while let Some(&oldest) = self.ticks.front() {
            if now.duration_since(oldest) > self.span {
                self.ticks.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn rate(&self) -> f64 {
        let (Some(first), Some(last)) = (self.ticks.front(), self.ticks.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.ticks.len() - 1) as f64 / elapsed
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::{ViewportConfig, ViewportPage, ViewportWindow};
    use crate::PageImage;

    #[test]
    fn formats_like_the_viewer_status_bar() {
        let status = StatusLine {
            page: 3,
            page_count: 12,
            loaded: 7,
            speed: -40.0,
            zoom: 1.1,
            ticks_per_second: 59.873,
        };
        assert_eq!(
            status.to_string(),
            "Page: 3 of 12 (Loaded: 7), Speed: -40.00, Zoom: 1.10, TPS: 59.87"
        );
    }

    #[test]
    fn capture_reads_controller_and_cache() {
        let cache = PageCache::new(4);
        cache.insert(
            0,
            PageImage {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            },
        );
        let window = ViewportWindow::pair(ViewportPage::new(1, -900.0), ViewportPage::new(2, 300.0));
        let controller = ViewportController::with_window(4, ViewportConfig::default(), window);

        let status = StatusLine::capture(&controller, &cache, 30.0);
        assert_eq!(status.page, 3);
        assert_eq!(status.page_count, 4);
        assert_eq!(status.loaded, 1);
        assert_eq!(status.zoom, 1.0);
    }

    #[test]
    fn empty_document_reports_page_zero() {
        let controller = ViewportController::new(0, ViewportConfig::default());
        let status = StatusLine::capture(&controller, &PageCache::new(0), 0.0);
        assert!(status.to_string().starts_with("Page: 0 of 0 (Loaded: 0)"));
    }

    #[test]
    fn tick_counter_measures_recent_rate() {
        let mut counter = TickCounter::default();
        assert_eq!(counter.rate(), 0.0);

        let start = Instant::now();
        for tick in 0..=50 {
            counter.record(start + Duration::from_millis(tick * 20));
        }
        assert!((counter.rate() - 50.0).abs() < 1e-6);

        // Slow down to 10 ticks per second; the old fast ticks age out.
        let resume = start + Duration::from_millis(1000);
        for tick in 1..=20 {
            counter.record(resume + Duration::from_millis(tick * 100));
        }
        assert!((counter.rate() - 10.0).abs() < 1e-6);
    }
}
