use ndarray::{s, Array3};
use std::path::PathBuf;

use crate::error::{CallistoError, Result};

/// Bit depth of the samples an image was decoded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SampleDepth {
    Bits8,
    Bits16,
}

impl SampleDepth {
    pub fn bits(&self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
        }
    }
}

/// A single decoded image.
/// Pixel values are f32 in [0.0, 1.0].
#[derive(Clone, Debug)]
pub struct ImageBuffer {
    /// Pixel data, shape = (planes, height, width). Mono images have one
    /// plane, color images three (R, G, B).
    pub data: Array3<f32>,
    /// Sample depth of the source the data was decoded from.
    pub depth: SampleDepth,
}

impl ImageBuffer {
    pub fn new(data: Array3<f32>, depth: SampleDepth) -> Self {
        Self { data, depth }
    }

    pub fn planes(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    /// Shape descriptor used for sequence consistency checks.
    pub fn format(&self) -> FrameFormat {
        FrameFormat {
            planes: self.planes(),
            height: self.height(),
            width: self.width(),
            depth: self.depth,
        }
    }

    /// Bytes held in memory by the decoded pixel data.
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Copy of the region `rect` of every plane.
    pub fn crop(&self, rect: &Rect) -> Result<ImageBuffer> {
        let (x, y) = (rect.x as usize, rect.y as usize);
        let (w, h) = (rect.width as usize, rect.height as usize);
        if w == 0 || h == 0 || x + w > self.width() || y + h > self.height() {
            return Err(CallistoError::InvalidCrop(format!(
                "region ({},{} {}x{}) exceeds image dimensions ({}x{})",
                rect.x,
                rect.y,
                w,
                h,
                self.width(),
                self.height()
            )));
        }
        let data = self.data.slice(s![.., y..y + h, x..x + w]).to_owned();
        Ok(ImageBuffer::new(data, self.depth))
    }
}

/// Per-frame shape of a sequence: every real frame of one session must
/// agree on plane count and sample depth, and on dimensions for
/// fixed-geometry containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFormat {
    pub planes: usize,
    pub height: usize,
    pub width: usize,
    pub depth: SampleDepth,
}

/// A rectangle in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Validate the rectangle against source dimensions.
    /// Snaps x/y/width/height to even values for Bayer color modes so the
    /// pattern phase is preserved.
    pub fn validated(&self, src_w: u32, src_h: u32, color_mode: &ColorMode) -> Result<Rect> {
        let mut x = self.x;
        let mut y = self.y;
        let mut w = self.width;
        let mut h = self.height;

        if color_mode.is_bayer() {
            x &= !1;
            y &= !1;
            w &= !1;
            h &= !1;
        }

        if w == 0 || h == 0 {
            return Err(CallistoError::InvalidCrop(
                "width and height must be > 0".into(),
            ));
        }

        if x + w > src_w || y + h > src_h {
            return Err(CallistoError::InvalidCrop(format!(
                "region ({x},{y} {w}x{h}) exceeds source dimensions ({src_w}x{src_h})"
            )));
        }

        Ok(Rect {
            x,
            y,
            width: w,
            height: h,
        })
    }
}

/// Color/Bayer mode of the source data.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ColorMode {
    Mono,
    BayerRGGB,
    BayerGRBG,
    BayerGBRG,
    BayerBGGR,
    RGB,
    BGR,
}

impl ColorMode {
    pub fn is_bayer(&self) -> bool {
        matches!(
            self,
            Self::BayerRGGB | Self::BayerGRBG | Self::BayerGBRG | Self::BayerBGGR
        )
    }
}

/// Metadata about the source file.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub filename: PathBuf,
    pub total_frames: usize,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_mode: ColorMode,
    pub observer: Option<String>,
    pub telescope: Option<String>,
    pub instrument: Option<String>,
}
