//! Drawing detections onto frames and encoding the result.
//!
use std::{fs, path::Path};

use anyhow::Result;
use common::protocol::Detection;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use lazy_static::lazy_static;
use rusttype::{point, Font, Scale};

/// Quality of the annotated JPEG sent back to the page.
pub const JPEG_QUALITY: u8 = 90;

const BOX_THICKNESS: i32 = 2;
const CAPTION_HEIGHT: f32 = 18.0;
const CAPTION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Box colours, cycled by class id.
const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

lazy_static! {
    static ref DEJAVU_MONO: Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        Font::try_from_bytes(font_data).expect("failed to load bundled font")
    };
}

/// Draws bounding boxes with captions.
pub struct Annotator {
    font: Font<'static>,
    scale: Scale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: DEJAVU_MONO.clone(),
            scale: Scale::uniform(CAPTION_HEIGHT),
        }
    }
}

impl Annotator {
    /// Create an annotator with captions rendered in the font at `font_path`.
    ///
    /// Without a path, or if the font cannot be used, the bundled DejaVu Sans Mono is used.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| match fs::read(path) {
            Ok(data) => {
                let font = Font::try_from_vec(data);
                if font.is_none() {
                    log::warn!("{} is not a usable font, using bundled font", path.display());
                }
                font
            }
            Err(err) => {
                log::warn!("Using bundled font, font {}: {err}", path.display());
                None
            }
        });

        match font {
            Some(font) => Self {
                font,
                ..Default::default()
            },
            None => Self::default(),
        }
    }

    /// Draw every detection onto the frame.
    ///
    /// Captions read `"<label> <confidence>"`, labels are looked up in `names`.
    pub fn draw(&self, frame: &mut RgbImage, detections: &[Detection], names: &[String]) {
        let (width, height) = (frame.width() as i32, frame.height() as i32);
        if width == 0 || height == 0 {
            return;
        }

        for detection in detections.iter() {
            let color = class_color(detection.class_index());

            // Coordinates of top-left and bottom-right points, clipped to the frame
            let x_tl = (detection.bbox[0] as i32).clamp(0, width - 1);
            let y_tl = (detection.bbox[1] as i32).clamp(0, height - 1);
            let x_br = (detection.bbox[2] as i32).clamp(0, width - 1);
            let y_br = (detection.bbox[3] as i32).clamp(0, height - 1);
            if x_br <= x_tl || y_br <= y_tl {
                continue;
            }

            for inset in 0..BOX_THICKNESS {
                let rect_width = x_br - x_tl + 1 - 2 * inset;
                let rect_height = y_br - y_tl + 1 - 2 * inset;
                if rect_width <= 0 || rect_height <= 0 {
                    break;
                }
                let rect = Rect::at(x_tl + inset, y_tl + inset)
                    .of_size(rect_width as u32, rect_height as u32);
                draw_hollow_rect_mut(frame, rect, color);
            }

            let caption = match detection.class_index().and_then(|index| names.get(index)) {
                Some(name) => format!("{} {:.2}", name, detection.confidence),
                None => format!("{:.2}", detection.confidence),
            };
            self.draw_caption(frame, &caption, x_tl, y_tl, color);
        }
    }

    /// Draw a caption on a filled background above the box, or inside it at the top border.
    fn draw_caption(&self, frame: &mut RgbImage, caption: &str, x: i32, y: i32, color: Rgb<u8>) {
        let caption_width = text_width(&self.font, self.scale, caption);
        let caption_height = self.scale.y.ceil() as i32;
        let caption_y = if y >= caption_height {
            y - caption_height
        } else {
            y
        };

        if caption_width > 0 {
            let background =
                Rect::at(x, caption_y).of_size(caption_width as u32 + 2, caption_height as u32);
            draw_filled_rect_mut(frame, background, color);
        }
        draw_text_mut(
            frame,
            CAPTION_COLOR,
            x + 1,
            caption_y,
            self.scale,
            &self.font,
            caption,
        );
    }
}

fn class_color(class_index: Option<usize>) -> Rgb<u8> {
    let index = class_index.unwrap_or(0) % PALETTE.len();
    Rgb(PALETTE[index])
}

/// Width in pixels of a single line of text.
fn text_width(font: &Font, scale: Scale, text: &str) -> i32 {
    font.layout(text, scale, point(0.0, font.v_metrics(scale).ascent))
        .filter_map(|glyph| glyph.pixel_bounding_box())
        .map(|bbox| bbox.max.x)
        .max()
        .unwrap_or(0)
}

/// Encode a frame as JPEG.
#[cfg(not(feature = "turbojpeg"))]
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;
    use std::io::Cursor;

    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        frame,
        frame.width(),
        frame.height(),
        image::ColorType::Rgb8,
    )?;

    Ok(buf.into_inner())
}

/// Encode a frame as JPEG.
#[cfg(feature = "turbojpeg")]
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let buf = turbojpeg::compress_image(frame, JPEG_QUALITY as i32, turbojpeg::Subsamp::Sub2x2)?;
    Ok(buf.to_vec())
}
