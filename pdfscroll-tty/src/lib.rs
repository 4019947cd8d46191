use std::collections::HashSet;
use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use pdfscroll_core::{Command, DrawCommand, PageCache, PageImage, ScrollSteps};
use tracing::debug;

const CHUNK_SIZE: usize = 4096;

/// Cell size assumed when the terminal does not report its pixel size.
pub const FALLBACK_CELL_WIDTH: f32 = 10.0;
pub const FALLBACK_CELL_HEIGHT: f32 = 20.0;

/// Terminal grid and the pixel size of one cell. The last row is reserved
/// for the status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub columns: u16,
    pub rows: u16,
    pub cell_width: f32,
    pub cell_height: f32,
    /// Whether the cell size was measured rather than assumed.
    pub measured: bool,
}

impl SurfaceGeometry {
    pub fn new(columns: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(2);
        let measured = pixel_width > 0 && pixel_height > 0;
        let (cell_width, cell_height) = if measured {
            (
                f32::from(pixel_width) / f32::from(columns),
                f32::from(pixel_height) / f32::from(rows),
            )
        } else {
            (FALLBACK_CELL_WIDTH, FALLBACK_CELL_HEIGHT)
        };
        Self {
            columns,
            rows,
            cell_width,
            cell_height,
            measured,
        }
    }

    pub fn query() -> io::Result<Self> {
        match terminal::window_size() {
            Ok(size) => Ok(Self::new(size.columns, size.rows, size.width, size.height)),
            Err(err) => {
                debug!(?err, "terminal pixel size unavailable");
                let (columns, rows) = terminal::size()?;
                Ok(Self::new(columns, rows, 0, 0))
            }
        }
    }

    /// Same cell size on a new grid.
    pub fn resized(&self, columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(2),
            ..*self
        }
    }

    /// Pixel area available for pages.
    pub fn viewport_size(&self) -> (f32, f32) {
        (
            f32::from(self.columns) * self.cell_width,
            f32::from(self.rows - 1) * self.cell_height,
        )
    }

    pub fn status_row(&self) -> u16 {
        self.rows - 1
    }

    /// Computes where the visible part of a scaled page lands on the grid.
    /// Returns `None` when nothing of the page is inside the viewport.
    pub fn place(
        &self,
        command: &DrawCommand,
        image_size: (u32, u32),
        viewport: (f32, f32),
    ) -> Option<Placement> {
        let (image_width, image_height) = image_size;
        let scale = command.scale;
        if scale <= 0.0 || image_width == 0 || image_height == 0 {
            return None;
        }

        let (area_width, area_height) = self.viewport_size();
        let (span_x, source_x, source_width) = visible_span(
            command.translate_x,
            image_width,
            scale,
            viewport.0.min(area_width),
        )?;
        let (span_y, source_y, source_height) = visible_span(
            command.translate_y,
            image_height,
            scale,
            viewport.1.min(area_height),
        )?;

        let (column, x_offset, columns) = grid_span(span_x, self.cell_width);
        let (row, y_offset, rows) = grid_span(span_y, self.cell_height);

        Some(Placement {
            image_id: image_id(command.page_index),
            source_x,
            source_y,
            source_width,
            source_height,
            column,
            row,
            x_offset,
            y_offset,
            columns,
            rows,
        })
    }
}

/// A cropped page placement in kitty terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub image_id: u32,
    pub source_x: u32,
    pub source_y: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub column: u16,
    pub row: u16,
    pub x_offset: u32,
    pub y_offset: u32,
    pub columns: u32,
    pub rows: u32,
}

pub fn image_id(page_index: usize) -> u32 {
    u32::try_from(page_index + 1).unwrap_or(u32::MAX)
}

/// Clips `[translate, translate + size * scale)` to `[0, limit)`. Yields the
/// on-screen span and the matching source range in image pixels.
fn visible_span(
    translate: f32,
    size: u32,
    scale: f32,
    limit: f32,
) -> Option<((f32, f32), u32, u32)> {
    let start = translate.max(0.0);
    let end = (translate + size as f32 * scale).min(limit);
    if end - start < 1.0 {
        return None;
    }

    let source_start = (((start - translate) / scale).floor() as u32).min(size - 1);
    let source_len = (((end - start) / scale).round() as u32)
        .max(1)
        .min(size - source_start);
    Some(((start, end), source_start, source_len))
}

fn grid_span((start, end): (f32, f32), cell: f32) -> (u16, u32, u32) {
    let first = (start / cell).floor();
    let offset = ((start - first * cell).round() as u32).min((cell as u32).max(1) - 1);
    let cells = ((offset as f32 + end - start) / cell).ceil().max(1.0) as u32;
    (first as u16, offset, cells)
}

/// Kitty graphics surface. Page images are uploaded once and re-placed
/// every frame.
pub struct KittySurface<W: Write> {
    writer: W,
    geometry: SurfaceGeometry,
    transmitted: HashSet<u32>,
    placed: HashSet<u32>,
}

impl<W: Write> KittySurface<W> {
    pub fn new(writer: W, geometry: SurfaceGeometry) -> Self {
        Self {
            writer,
            geometry,
            transmitted: HashSet::new(),
            placed: HashSet::new(),
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn set_geometry(&mut self, geometry: SurfaceGeometry) {
        self.geometry = geometry;
    }

    /// Executes one frame's draw list and writes the status line.
    pub fn draw_frame(
        &mut self,
        commands: &[DrawCommand],
        pages: &PageCache,
        viewport: (f32, f32),
        status: &str,
    ) -> Result<()> {
        self.begin_sync_update()?;

        let mut visible = HashSet::with_capacity(commands.len());
        for command in commands {
            let Some(image) = pages.get(command.page_index) else {
                continue;
            };
            let size = (image.width, image.height);
            let Some(placement) = self.geometry.place(command, size, viewport) else {
                continue;
            };
            if !self.transmitted.contains(&placement.image_id) {
                self.transmit(placement.image_id, &image)?;
                self.transmitted.insert(placement.image_id);
            }
            self.put(&placement)?;
            visible.insert(placement.image_id);
        }

        let stale: Vec<u32> = self.placed.difference(&visible).copied().collect();
        for id in stale {
            self.delete_placement(id)?;
        }
        self.placed = visible;

        self.write_status(status)?;
        self.end_sync_update()
    }

    fn transmit(&mut self, id: u32, image: &PageImage) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(self.writer, "\u{1b}_Ga=t,f=100,t=d,q=2,i={},m={}", id, more)?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            self.writer.write_all(b";")?;
            self.writer.write_all(chunk)?;
            write!(self.writer, "\u{1b}\\")?;
        }
        debug!(id, bytes = encoded.len(), "page image transmitted");
        Ok(())
    }

    fn put(&mut self, placement: &Placement) -> Result<()> {
        queue!(
            self.writer,
            cursor::MoveTo(placement.column, placement.row)
        )?;
        write!(
            self.writer,
            "\u{1b}_Ga=p,i={},p=1,x={},y={},w={},h={},X={},Y={},c={},r={},C=1,z=-1,q=2\u{1b}\\",
            placement.image_id,
            placement.source_x,
            placement.source_y,
            placement.source_width,
            placement.source_height,
            placement.x_offset,
            placement.y_offset,
            placement.columns,
            placement.rows,
        )?;
        Ok(())
    }

    fn delete_placement(&mut self, id: u32) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=i,i={},p=1,q=2\u{1b}\\", id)?;
        Ok(())
    }

    fn write_status(&mut self, status: &str) -> Result<()> {
        let width = usize::from(self.geometry.columns);
        let line: String = status.chars().take(width).collect();
        queue!(
            self.writer,
            cursor::MoveTo(0, self.geometry.status_row()),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal shows the frame at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }

    /// Drops every placement and frees the uploaded images.
    pub fn release_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        self.transmitted.clear();
        self.placed.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

/// Translates terminal input into viewer commands. Only key presses count;
/// releases and auto-repeats are dropped.
#[derive(Debug, Default)]
pub struct EventMapper {
    steps: ScrollSteps,
}

impl EventMapper {
    pub fn new(steps: ScrollSteps) -> Self {
        Self { steps }
    }

    pub fn map_event(&self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) => self.map_key(key),
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            _ => UiEvent::None,
        }
    }

    fn map_key(&self, key: KeyEvent) -> UiEvent {
        if key.kind != KeyEventKind::Press {
            return UiEvent::None;
        }

        let KeyEvent {
            code, modifiers, ..
        } = key;
        if modifiers.contains(KeyModifiers::CONTROL) {
            return match code {
                KeyCode::Char('c') => UiEvent::Quit,
                _ => UiEvent::None,
            };
        }

        let steps = self.steps;
        let command = match code {
            KeyCode::Char('k') | KeyCode::Down => Command::AdjustSpeed { delta: steps.speed },
            KeyCode::Char('j') | KeyCode::Up => Command::AdjustSpeed {
                delta: -steps.speed,
            },
            KeyCode::Char('l') | KeyCode::PageDown => Command::AdjustSpeed {
                delta: steps.fast_speed,
            },
            KeyCode::Char('h') | KeyCode::PageUp => Command::AdjustSpeed {
                delta: -steps.fast_speed,
            },
            KeyCode::Char('s') | KeyCode::Char(' ') => Command::StopScrolling,
            KeyCode::Char('u') | KeyCode::Char('+') => Command::AdjustZoom { delta: steps.zoom },
            KeyCode::Char('d') | KeyCode::Char('-') => Command::AdjustZoom {
                delta: -steps.zoom,
            },
            KeyCode::Char('n') => Command::NextPage,
            KeyCode::Char('p') => Command::PrevPage,
            KeyCode::Char('q') | KeyCode::Esc => return UiEvent::Quit,
            _ => return UiEvent::None,
        };
        UiEvent::Command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use pdfscroll_core::Slot;

    fn geometry() -> SurfaceGeometry {
        // 80x41 cells of 10x20 px: an 800x800 page area plus the status row.
        SurfaceGeometry::new(80, 41, 800, 820)
    }

    fn command(page_index: usize, scale: f32, translate_x: f32, translate_y: f32) -> DrawCommand {
        DrawCommand {
            slot: Slot::Primary,
            page_index,
            scale,
            translate_x,
            translate_y,
        }
    }

    fn solid_image(width: u32, height: u32) -> PageImage {
        PageImage {
            width,
            height,
            pixels: vec![200; (width * height * 4) as usize],
        }
    }

    #[test]
    fn geometry_measures_cells_and_reserves_status_row() {
        let geometry = geometry();
        assert!(geometry.measured);
        assert_eq!(geometry.cell_width, 10.0);
        assert_eq!(geometry.cell_height, 20.0);
        assert_eq!(geometry.viewport_size(), (800.0, 800.0));
        assert_eq!(geometry.status_row(), 40);
    }

    #[test]
    fn geometry_falls_back_without_pixel_size() {
        let geometry = SurfaceGeometry::new(100, 30, 0, 0);
        assert!(!geometry.measured);
        assert_eq!(geometry.viewport_size(), (1000.0, 580.0));

        let resized = geometry.resized(50, 11);
        assert_eq!(resized.viewport_size(), (500.0, 200.0));
    }

    #[test]
    fn place_crops_page_scrolled_past_the_top() {
        let placement = geometry()
            .place(&command(0, 1.0, 0.0, -900.0), (800, 2000), (800.0, 800.0))
            .unwrap();
        assert_eq!(
            placement,
            Placement {
                image_id: 1,
                source_x: 0,
                source_y: 900,
                source_width: 800,
                source_height: 800,
                column: 0,
                row: 0,
                x_offset: 0,
                y_offset: 0,
                columns: 80,
                rows: 40,
            }
        );
    }

    #[test]
    fn place_crops_page_entering_from_below() {
        let placement = geometry()
            .place(&command(1, 1.0, 0.0, 310.0), (800, 1000), (800.0, 800.0))
            .unwrap();
        assert_eq!(placement.image_id, 2);
        assert_eq!((placement.source_y, placement.source_height), (0, 490));
        assert_eq!((placement.row, placement.y_offset), (15, 10));
        assert_eq!(placement.rows, 25);
    }

    #[test]
    fn place_maps_zoomed_page_back_to_image_pixels() {
        let placement = geometry()
            .place(&command(2, 0.5, 200.0, 0.0), (800, 2000), (800.0, 800.0))
            .unwrap();
        assert_eq!(
            (
                placement.source_x,
                placement.source_y,
                placement.source_width,
                placement.source_height
            ),
            (0, 0, 800, 1600)
        );
        assert_eq!((placement.column, placement.columns), (20, 40));
        assert_eq!(placement.rows, 40);
    }

    #[test]
    fn place_skips_pages_outside_the_viewport() {
        let geometry = geometry();
        assert!(geometry
            .place(&command(0, 1.0, 0.0, 900.0), (800, 1000), (800.0, 800.0))
            .is_none());
        assert!(geometry
            .place(&command(0, 1.0, 0.0, -1000.0), (800, 1000), (800.0, 800.0))
            .is_none());
        assert!(geometry
            .place(&command(0, 0.0, 0.0, 0.0), (800, 1000), (800.0, 800.0))
            .is_none());
    }

    #[test]
    fn frame_transmits_each_page_once() {
        let cache = PageCache::new(2);
        cache.insert(0, solid_image(4, 4));
        let mut surface = KittySurface::new(Vec::new(), geometry());
        let frame = [command(0, 1.0, 398.0, 0.0)];

        surface
            .draw_frame(&frame, &cache, (800.0, 800.0), "Page: 1 of 2")
            .unwrap();
        surface
            .draw_frame(&frame, &cache, (800.0, 800.0), "Page: 1 of 2")
            .unwrap();

        let output = String::from_utf8_lossy(&surface.writer).into_owned();
        assert_eq!(output.matches("a=t,f=100").count(), 1);
        assert_eq!(output.matches("\u{1b}_Ga=p,i=1,p=1").count(), 2);
        assert!(output.contains("Page: 1 of 2"));
        assert!(output.starts_with("\u{1b}[?2026h"));
        assert!(output.ends_with("\u{1b}[?2026l"));
    }

    #[test]
    fn frame_deletes_pages_that_left_the_window() {
        let cache = PageCache::new(2);
        cache.insert(0, solid_image(4, 4));
        cache.insert(1, solid_image(4, 4));
        let mut surface = KittySurface::new(Vec::new(), geometry());

        surface
            .draw_frame(
                &[command(0, 1.0, 398.0, -2.0), command(1, 1.0, 398.0, 2.0)],
                &cache,
                (800.0, 800.0),
                "",
            )
            .unwrap();
        surface.writer().clear();
        surface
            .draw_frame(&[command(1, 1.0, 398.0, 0.0)], &cache, (800.0, 800.0), "")
            .unwrap();

        let output = String::from_utf8_lossy(&surface.writer).into_owned();
        assert!(output.contains("\u{1b}_Ga=d,d=i,i=1,p=1"));
        assert!(!output.contains("i=2,m="));
    }

    #[test]
    fn frame_skips_pages_not_yet_decoded() {
        let cache = PageCache::new(3);
        let mut surface = KittySurface::new(Vec::new(), geometry());

        surface
            .draw_frame(&[command(2, 1.0, 0.0, 0.0)], &cache, (800.0, 800.0), "")
            .unwrap();
        let output = String::from_utf8_lossy(&surface.writer).into_owned();
        assert!(!output.contains("\u{1b}_G"));
    }

    #[test]
    fn large_images_are_chunked() {
        let cache = PageCache::new(1);
        // Noise does not compress, so the PNG spans several chunks.
        let mut state: u32 = 0x9e37_79b9;
        let pixels = (0..64 * 64 * 4)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        cache.insert(
            0,
            PageImage {
                width: 64,
                height: 64,
                pixels,
            },
        );
        let mut surface = KittySurface::new(Vec::new(), geometry());
        surface
            .draw_frame(&[command(0, 1.0, 0.0, 0.0)], &cache, (800.0, 800.0), "")
            .unwrap();

        let output = String::from_utf8_lossy(&surface.writer).into_owned();
        assert!(output.contains("a=t,f=100,t=d,q=2,i=1,m=1;"));
        assert!(output.contains("\u{1b}_Gm=0,q=2;"));
    }

    #[test]
    fn status_line_is_truncated_to_terminal_width() {
        let cache = PageCache::new(0);
        let mut surface = KittySurface::new(Vec::new(), SurfaceGeometry::new(10, 5, 0, 0));
        surface
            .draw_frame(&[], &cache, (100.0, 80.0), "Page: 12 of 300 (Loaded: 300)")
            .unwrap();

        let output = String::from_utf8_lossy(&surface.writer).into_owned();
        assert!(output.contains("Page: 12 o"));
        assert!(!output.contains("Page: 12 of"));
    }

    fn key(code: KeyCode) -> Event {
        key_with(code, KeyModifiers::NONE, KeyEventKind::Press)
    }

    fn key_with(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn speed_keys_use_configured_steps() {
        let mapper = EventMapper::default();
        let cases = [
            (KeyCode::Char('k'), 1.0),
            (KeyCode::Down, 1.0),
            (KeyCode::Char('j'), -1.0),
            (KeyCode::Up, -1.0),
            (KeyCode::Char('l'), 40.0),
            (KeyCode::PageDown, 40.0),
            (KeyCode::Char('h'), -40.0),
            (KeyCode::PageUp, -40.0),
        ];
        for (code, expected) in cases {
            match mapper.map_event(key(code)) {
                UiEvent::Command(Command::AdjustSpeed { delta }) => assert_eq!(delta, expected),
                other => panic!("unexpected event for {:?}: {:?}", code, other),
            }
        }

        let custom = EventMapper::new(ScrollSteps {
            speed: 2.5,
            fast_speed: 25.0,
            zoom: 0.2,
        });
        assert_eq!(
            custom.map_event(key(KeyCode::Char('h'))),
            UiEvent::Command(Command::AdjustSpeed { delta: -25.0 })
        );
        assert_eq!(
            custom.map_event(key(KeyCode::Char('u'))),
            UiEvent::Command(Command::AdjustZoom { delta: 0.2 })
        );
    }

    #[test]
    fn stop_zoom_and_jump_keys() {
        let mapper = EventMapper::default();
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('s'))),
            UiEvent::Command(Command::StopScrolling)
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char(' '))),
            UiEvent::Command(Command::StopScrolling)
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('d'))),
            UiEvent::Command(Command::AdjustZoom { delta: -0.1 })
        );
        assert_eq!(
            mapper.map_event(key_with(
                KeyCode::Char('+'),
                KeyModifiers::SHIFT,
                KeyEventKind::Press
            )),
            UiEvent::Command(Command::AdjustZoom { delta: 0.1 })
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('n'))),
            UiEvent::Command(Command::NextPage)
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('p'))),
            UiEvent::Command(Command::PrevPage)
        );
    }

    #[test]
    fn quit_keys() {
        let mapper = EventMapper::default();
        assert_eq!(mapper.map_event(key(KeyCode::Char('q'))), UiEvent::Quit);
        assert_eq!(mapper.map_event(key(KeyCode::Esc)), UiEvent::Quit);
        assert_eq!(
            mapper.map_event(key_with(
                KeyCode::Char('c'),
                KeyModifiers::CONTROL,
                KeyEventKind::Press
            )),
            UiEvent::Quit
        );
        assert_eq!(
            mapper.map_event(key_with(
                KeyCode::Char('d'),
                KeyModifiers::CONTROL,
                KeyEventKind::Press
            )),
            UiEvent::None
        );
    }

    #[test]
    fn releases_and_repeats_are_ignored() {
        let mapper = EventMapper::default();
        for kind in [KeyEventKind::Release, KeyEventKind::Repeat] {
            assert_eq!(
                mapper.map_event(key_with(KeyCode::Char('l'), KeyModifiers::NONE, kind)),
                UiEvent::None
            );
        }
        assert_eq!(mapper.map_event(key(KeyCode::Char('x'))), UiEvent::None);
        assert_eq!(mapper.map_event(Event::FocusLost), UiEvent::None);
    }

    #[test]
    fn resize_events_carry_the_new_grid() {
        let mapper = EventMapper::default();
        assert_eq!(
            mapper.map_event(Event::Resize(120, 40)),
            UiEvent::Resize {
                columns: 120,
                rows: 40
            }
        );
    }
}
