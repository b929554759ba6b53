//! Captioned alert graphics.
//!
//! Captions are laid out as an SVG overlay, rasterised with `resvg` against
//! the system font database, and composited onto the template with `image`.

use std::fmt::Write as _;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use resvg::tiny_skia;
use resvg::usvg::{self, fontdb};
use tracing::{debug, info};

const WRAP_COLUMNS: usize = 40;
const MIN_FONT_PX: f32 = 10.0;
const TOP_MARGIN_PX: f32 = 10.0;
const BOTTOM_MARGIN_PX: f32 = 20.0;
const LINE_HEIGHT: f32 = 1.2;
// average advance of a bold sans glyph relative to its size
const GLYPH_WIDTH_RATIO: f32 = 0.6;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unable to load or encode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("caption overlay is not valid SVG: {0}")]
    Svg(#[from] usvg::Error),
    #[error("cannot allocate a {width}x{height} overlay")]
    Overlay { width: u32, height: u32 },
}

/// Renders top and bottom captions over template images.
#[derive(Default)]
pub struct MemeRenderer {
    fonts: OnceLock<Arc<fontdb::Database>>,
}

impl std::fmt::Debug for MemeRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemeRenderer")
            .field("fonts_loaded", &self.fonts.get().is_some())
            .finish()
    }
}

impl MemeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the captioned template encoded as JPEG.
    pub fn render(
        &self,
        template: &Path,
        top_text: &str,
        bottom_text: &str,
    ) -> Result<Vec<u8>, RenderError> {
        info!(template = %template.display(), "generating alert graphic");
        let base = image::open(template)?;
        let (width, height) = (base.width(), base.height());

        let svg = caption_svg(width, height, top_text, bottom_text);
        let overlay = self.rasterise(&svg, width, height)?;

        let mut canvas = base.to_rgba8();
        image::imageops::overlay(&mut canvas, &overlay, 0, 0);

        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)?;
        debug!(bytes = encoded.len(), "alert graphic encoded");
        Ok(encoded)
    }

    fn rasterise(&self, svg: &str, width: u32, height: u32) -> Result<RgbaImage, RenderError> {
        let options = usvg::Options {
            fontdb: self.fonts().clone(),
            ..usvg::Options::default()
        };
        let tree = usvg::Tree::from_str(svg, &options)?;

        let mut pixmap =
            tiny_skia::Pixmap::new(width, height).ok_or(RenderError::Overlay { width, height })?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        let mut overlay = RgbaImage::new(width, height);
        for (target, source) in overlay.pixels_mut().zip(pixmap.pixels()) {
            let color = source.demultiply();
            *target = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Ok(overlay)
    }

    fn fonts(&self) -> &Arc<fontdb::Database> {
        self.fonts.get_or_init(|| {
            let mut database = fontdb::Database::new();
            database.load_system_fonts();
            debug!(faces = database.len(), "loaded system fonts");
            Arc::new(database)
        })
    }
}

/// Font size that fits the widest wrapped line into 90% of the image width,
/// stepping down 2px at a time from `start` and never below 10px.
fn fit_font_size(lines: &[String], image_width: u32, start: f32) -> f32 {
    let max_width = image_width as f32 * 0.9;
    let widest = lines
        .iter()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0) as f32;

    let mut size = start;
    while widest * size * GLYPH_WIDTH_RATIO > max_width && size > MIN_FONT_PX {
        size -= 2.0;
    }
    size.max(MIN_FONT_PX)
}

fn caption_svg(width: u32, height: u32, top_text: &str, bottom_text: &str) -> String {
    let center = width as f32 / 2.0;
    let start_size = (height as f32 / 10.0).max(MIN_FONT_PX);

    let top_lines = wrap_text(top_text, WRAP_COLUMNS);
    let top_size = fit_font_size(&top_lines, width, start_size);
    // the bottom caption starts from whatever size the top one settled on
    let bottom_lines = wrap_text(bottom_text, WRAP_COLUMNS);
    let bottom_size = fit_font_size(&bottom_lines, width, top_size);

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">"
    );

    let top_baseline = TOP_MARGIN_PX + top_size;
    push_text_block(&mut svg, &top_lines, center, top_baseline, top_size);

    let block_height = bottom_lines.len() as f32 * bottom_size * LINE_HEIGHT;
    let bottom_baseline = height as f32 - BOTTOM_MARGIN_PX - block_height + bottom_size;
    push_text_block(&mut svg, &bottom_lines, center, bottom_baseline, bottom_size);

    svg.push_str("</svg>");
    svg
}

fn push_text_block(svg: &mut String, lines: &[String], x: f32, first_baseline: f32, size: f32) {
    if lines.is_empty() {
        return;
    }
    let _ = write!(
        svg,
        "<text font-family=\"Impact, Anton, 'DejaVu Sans', Arial, sans-serif\" font-weight=\"bold\" \
         font-size=\"{size}\" fill=\"white\" stroke=\"black\" stroke-width=\"{:.1}\" \
         paint-order=\"stroke\" text-anchor=\"middle\">",
        (size / 15.0).max(1.0)
    );
    for (index, line) in lines.iter().enumerate() {
        let y = first_baseline + index as f32 * size * LINE_HEIGHT;
        let _ = write!(
            svg,
            "<tspan x=\"{x}\" y=\"{y}\">{}</tspan>",
            escape_xml(line)
        );
    }
    svg.push_str("</text>");
}

/// Greedy word wrap; words longer than `width` are split.
pub(crate) fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(width) {
            let piece: String = piece.iter().collect();
            let current_len = current.chars().count();
            if current.is_empty() {
                current = piece;
            } else if current_len + 1 + piece.chars().count() <= width {
                current.push(' ');
                current.push_str(&piece);
            } else {
                lines.push(std::mem::replace(&mut current, piece));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn escape_xml(raw: &str) -> String {
    crate::notify::compose::escape_html(raw)
}
