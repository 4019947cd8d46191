use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::PageImage;

/// Pixel dimensions of decoded pages, looked up by 0-based page index.
///
/// The viewport controller only needs page geometry, never pixels, so it
/// reads the cache through this trait. `None` means the page is not decoded
/// yet.
pub trait PageMetrics {
    fn page_size(&self, page_index: usize) -> Option<(u32, u32)>;

    fn page_height(&self, page_index: usize) -> Option<u32> {
        self.page_size(page_index).map(|(_, height)| height)
    }
}

/// Append-only store of decoded page rasters.
///
/// One writer (the background loader) publishes entries while the tick loop
/// reads them. An entry becomes visible only once it is fully built, it is
/// never replaced and never evicted, so a reader sees either nothing or the
/// final image for an index.
pub struct PageCache {
    page_count: usize,
    pages: RwLock<HashMap<usize, Arc<PageImage>>>,
}

impl PageCache {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            pages: RwLock::new(HashMap::with_capacity(page_count)),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Publishes a decoded page. Returns `false` when the index is out of
    /// range or already populated; the existing entry is kept in that case.
    pub fn insert(&self, page_index: usize, image: PageImage) -> bool {
        if page_index >= self.page_count {
            debug!(page_index, page_count = self.page_count, "ignoring out-of-range page");
            return false;
        }

        let mut pages = self.pages.write();
        if pages.contains_key(&page_index) {
            debug!(page_index, "page already cached, keeping first decode");
            return false;
        }
        pages.insert(page_index, Arc::new(image));
        true
    }

    pub fn get(&self, page_index: usize) -> Option<Arc<PageImage>> {
        self.pages.read().get(&page_index).cloned()
    }

    pub fn contains(&self, page_index: usize) -> bool {
        self.pages.read().contains_key(&page_index)
    }

    pub fn loaded_count(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_complete(&self) -> bool {
        self.loaded_count() == self.page_count
    }
}

impl PageMetrics for PageCache {
    fn page_size(&self, page_index: usize) -> Option<(u32, u32)> {
        self.pages
            .read()
            .get(&page_index)
            .map(|image| (image.width, image.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32, fill: u8) -> PageImage {
        PageImage {
            width,
            height,
            pixels: vec![fill; (width * height * 4) as usize],
        }
    }

    #[test]
    fn lookups_return_the_same_image() {
        let cache = PageCache::new(3);
        assert!(cache.insert(1, image(2, 3, 7)));

        let first = cache.get(1).unwrap();
        let second = cache.get(1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.page_size(1), Some((2, 3)));
        assert_eq!(cache.page_height(1), Some(3));
    }

    #[test]
    fn first_insert_wins() {
        let cache = PageCache::new(2);
        assert!(cache.insert(0, image(1, 1, 1)));
        assert!(!cache.insert(0, image(1, 1, 2)));

        assert_eq!(cache.get(0).unwrap().pixels[0], 1);
        assert_eq!(cache.loaded_count(), 1);
    }

    #[test]
    fn rejects_pages_past_the_end() {
        let cache = PageCache::new(2);
        assert!(!cache.insert(2, image(1, 1, 0)));
        assert!(!cache.contains(2));
        assert_eq!(cache.loaded_count(), 0);
    }

    #[test]
    fn missing_pages_have_no_metrics() {
        let cache = PageCache::new(4);
        cache.insert(0, image(1, 1, 0));

        assert!(cache.contains(0));
        assert!(!cache.contains(3));
        assert!(cache.get(3).is_none());
        assert_eq!(cache.page_size(3), None);
        assert!(!cache.is_complete());
    }

    #[test]
    fn concurrent_reader_sees_whole_entries() {
        let cache = Arc::new(PageCache::new(64));
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for index in 0..64 {
                    cache.insert(index, image(4, index as u32 + 1, index as u8));
                }
            })
        };

        for _ in 0..1_000 {
            for index in 0..64 {
                if let Some(page) = cache.get(index) {
                    assert_eq!(page.height, index as u32 + 1);
                    assert_eq!(page.pixels.len(), 4 * (index + 1) * 4);
                }
            }
        }

        writer.join().unwrap();
        assert!(cache.is_complete());
    }
}
