use super::Executor;
use crate::error::FlowError;
use crate::models::{DocumentArray, Endpoint, ImageTensor, Parameters};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use serde::Deserialize;
use tracing::{debug, warn};

pub const USES: &str = "image-preprocessor";

pub const DEFAULT_TARGET_SIZE: u32 = 224;
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagePreprocessorConfig {
    #[serde(default = "TraversalPaths::chunks")]
    pub traversal_paths: TraversalPaths,
    #[serde(default = "default_target_size")]
    pub target_size: u32,
}

fn default_target_size() -> u32 {
    DEFAULT_TARGET_SIZE
}

impl Default for ImagePreprocessorConfig {
    fn default() -> Self {
        Self {
            traversal_paths: TraversalPaths::chunks(),
            target_size: DEFAULT_TARGET_SIZE,
        }
    }
}

/// Turns image blobs into normalized, square, channel-first tensors.
pub struct ImagePreprocessor {
    config: ImagePreprocessorConfig,
}

impl ImagePreprocessor {
    pub fn new(config: ImagePreprocessorConfig) -> Self {
        Self { config }
    }
}

/// Resizes the short side to `size`, centre crops to `size`x`size` and
/// normalizes with the CLIP statistics. The centre square is cut out first,
/// so long strips never get scaled up as a whole.
pub fn preprocess(image: &DynamicImage, size: u32) -> ImageTensor {
    let (width, height) = image.dimensions();
    let short = width.min(height).max(1);
    let square = image.crop_imm(
        width.saturating_sub(short) / 2,
        height.saturating_sub(short) / 2,
        short,
        short,
    );
    let cropped = square
        .resize_exact(size, size, FilterType::CatmullRom)
        .to_rgb8();

    let side = size as usize;
    let mut data = vec![0.0f32; 3 * side * side];
    for (x, y, pixel) in cropped.enumerate_pixels() {
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data[(channel * side + y as usize) * side + x as usize] =
                (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
        }
    }

    ImageTensor {
        shape: [3, side, side],
        data,
    }
}

/// Undoes the normalization of a preprocessed tensor.
pub fn to_rgb_image(tensor: &ImageTensor) -> Option<RgbImage> {
    if tensor.channels() != 3 || !tensor.is_consistent() {
        return None;
    }

    let width = u32::try_from(tensor.width()).ok()?;
    let height = u32::try_from(tensor.height()).ok()?;
    Some(RgbImage::from_fn(width, height, |x, y| {
        let mut pixel = [0u8; 3];
        for (channel, value) in pixel.iter_mut().enumerate() {
            let normalized = tensor.at(channel, y as usize, x as usize);
            let restored = normalized * CLIP_STD[channel] + CLIP_MEAN[channel];
            *value = (restored * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        image::Rgb(pixel)
    }))
}

#[async_trait]
impl Executor for ImagePreprocessor {
    fn uses(&self) -> &'static str {
        USES
    }

    async fn handle(
        &self,
        _endpoint: Endpoint,
        docs: &mut DocumentArray,
        _parameters: &Parameters,
    ) -> Result<(), FlowError> {
        let size = self.config.target_size;
        let mut processed = 0usize;

        self.config.traversal_paths.apply_mut(docs, |doc| {
            if doc.tensor.is_some() || !doc.is_image() {
                return;
            }
            let Some(blob) = doc.blob.as_deref() else {
                return;
            };

            match image::load_from_memory(blob) {
                Ok(image) => {
                    doc.tensor = Some(preprocess(&image, size));
                    processed += 1;
                }
                Err(error) => warn!(doc = %doc.id, %error, "skipping undecodable image"),
            }
        });

        debug!(processed, "preprocessed images");
        Ok(())
    }
}
