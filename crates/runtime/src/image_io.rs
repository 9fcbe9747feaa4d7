//! Reading input images and writing colourised label masks.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, Rgb, RgbImage};

use crate::error::RuntimeError;

/// Per-channel normalisation applied to `[0, 1]` pixel values.
pub const MEAN: f64 = 0.5;
pub const STD: f64 = 0.5;

/// Loads an RGB image as a `(1, 3, H, W)` f32 tensor normalised with
/// [`MEAN`] and [`STD`], optionally resized to `(height, width)` first.
pub fn load_image(
    path: &Path,
    device: &Device,
    resize: Option<(u32, u32)>,
) -> Result<Tensor, RuntimeError> {
    let mut rgb = image::open(path)?.to_rgb8();
    if let Some((height, width)) = resize {
        if height == 0 || width == 0 {
            return Err(RuntimeError::runtime(format!(
                "resize target must be non-empty, got ({height}, {width})"
            )));
        }
        if rgb.dimensions() != (width, height) {
            rgb = image::imageops::resize(&rgb, width, height, FilterType::Triangle);
        }
    }
    let (width, height) = rgb.dimensions();
    log::debug!("loaded {} ({}x{})", path.display(), width, height);
    image_to_tensor(&rgb, device)
}

/// Converts an 8-bit RGB image into a normalised `(1, 3, H, W)` tensor.
pub fn image_to_tensor(rgb: &RgbImage, device: &Device) -> Result<Tensor, RuntimeError> {
    let (width, height) = rgb.dimensions();
    let pixels = Tensor::from_vec(
        rgb.as_raw().clone(),
        (height as usize, width as usize, 3),
        &Device::Cpu,
    )?;
    let scale = 1.0 / (255.0 * STD);
    let tensor = pixels
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(scale, -MEAN / STD)?
        .unsqueeze(0)?
        .to_device(device)?;
    Ok(tensor)
}

/// Pseudo-colour palette: the bits of each class id are interleaved into the
/// high bits of the red, green and blue channels. Class 0 is black.
pub fn color_map(num_classes: usize) -> Vec<[u8; 3]> {
    (0..num_classes)
        .map(|class| {
            let mut color = [0u8; 3];
            let mut label = class;
            let mut bit = 0;
            while label > 0 && bit < 8 {
                for (channel, value) in color.iter_mut().enumerate() {
                    *value |= (((label >> channel) & 1) as u8) << (7 - bit);
                }
                bit += 1;
                label >>= 3;
            }
            color
        })
        .collect()
}

/// Paints an `(H, W)` (or `(1, H, W)`) label map with `palette`.
pub fn colorize(labels: &Tensor, palette: &[[u8; 3]]) -> Result<RgbImage, RuntimeError> {
    let labels = match labels.rank() {
        3 if labels.dim(0)? == 1 => labels.squeeze(0)?,
        2 => labels.clone(),
        _ => {
            return Err(RuntimeError::runtime(format!(
                "label map must be (H, W) or (1, H, W), got {:?}",
                labels.dims()
            )))
        }
    };
    let rows = labels.to_dtype(DType::U32)?.to_vec2::<u32>()?;
    let height = rows.len() as u32;
    let width = rows.first().map_or(0, |row| row.len()) as u32;

    let mut mask = RgbImage::new(width, height);
    for (y, row) in rows.iter().enumerate() {
        for (x, &label) in row.iter().enumerate() {
            let color = palette.get(label as usize).ok_or_else(|| {
                RuntimeError::runtime(format!(
                    "label {label} has no palette entry ({} colours)",
                    palette.len()
                ))
            })?;
            mask.put_pixel(x as u32, y as u32, Rgb(*color));
        }
    }
    Ok(mask)
}

/// Writes the colourised label map; the format follows the file extension.
pub fn save_mask(labels: &Tensor, palette: &[[u8; 3]], path: &Path) -> Result<(), RuntimeError> {
    let mask = colorize(labels, palette)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    mask.save(path)?;
    log::info!(
        "wrote {}x{} mask to {}",
        mask.width(),
        mask.height(),
        path.display()
    );
    Ok(())
}
