// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fit an image into a pixel budget while approaching a target aspect ratio.
//!
//! The geometry is computed by [`plan_fit`] without touching pixels, then
//! [`fit_to_budget`] applies it: resize the full original first, then take a
//! centered crop. Cropping after the resize keeps a single interpolation
//! pass over the whole scene.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Dimensions below this are treated as degenerate.
const MIN_DIMENSION: u32 = 1;

/// Resize-then-crop geometry for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPlan {
    /// Already within budget.
    Unchanged,
    Adjust {
        /// Canvas after the uniform resize (equal to the input when no
        /// resize is needed).
        resized_width: u32,
        resized_height: u32,
        crop_x: u32,
        crop_y: u32,
        crop_width: u32,
        crop_height: u32,
    },
}

impl FitPlan {
    /// Output dimensions of the plan given the input dimensions.
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            FitPlan::Unchanged => (width, height),
            FitPlan::Adjust {
                crop_width,
                crop_height,
                ..
            } => (crop_width, crop_height),
        }
    }
}

/// Largest region of `width`x`height` with the target aspect ratio.
///
/// Truncates, so the region never exceeds the canvas.
fn target_region(width: u32, height: u32, target_aspect: f64) -> (u32, u32) {
    let aspect = width as f64 / height.max(MIN_DIMENSION) as f64;
    if aspect > target_aspect {
        let crop_width = (height as f64 * target_aspect) as u32;
        (crop_width.clamp(MIN_DIMENSION, width), height)
    } else {
        let crop_height = (width as f64 / target_aspect) as u32;
        (width, crop_height.clamp(MIN_DIMENSION, height))
    }
}

/// Compute the resize and crop needed to fit `max_pixels`.
pub fn plan_fit(
    width: u32,
    height: u32,
    max_pixels: u64,
    target_aspect: f64,
) -> Result<FitPlan, FitError> {
    if !target_aspect.is_finite() || target_aspect <= 0.0 {
        return Err(FitError::InvalidTarget(target_aspect));
    }
    if max_pixels == 0 {
        return Err(FitError::InvalidBudget);
    }
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Ok(FitPlan::Unchanged);
    }
    if width as u64 * height as u64 <= max_pixels {
        return Ok(FitPlan::Unchanged);
    }

    let (crop_width, crop_height) = target_region(width, height, target_aspect);
    let crop_pixels = crop_width as u64 * crop_height as u64;

    let (resized_width, resized_height) = if crop_pixels > max_pixels {
        let scale = (max_pixels as f64 / crop_pixels as f64).sqrt();
        (
            ((width as f64 * scale) as u32).max(MIN_DIMENSION),
            ((height as f64 * scale) as u32).max(MIN_DIMENSION),
        )
    } else {
        (width, height)
    };

    // Recompute against the resized canvas; integer rounding shifts the ratio.
    let (mut crop_width, mut crop_height) =
        target_region(resized_width, resized_height, target_aspect);

    // Floating point can leave the product a pixel row over budget.
    while crop_width as u64 * crop_height as u64 > max_pixels
        && crop_width > MIN_DIMENSION
        && crop_height > MIN_DIMENSION
    {
        if crop_width as f64 / crop_height as f64 > target_aspect {
            crop_width -= 1;
        } else {
            crop_height -= 1;
        }
    }

    Ok(FitPlan::Adjust {
        resized_width,
        resized_height,
        crop_x: (resized_width - crop_width) / 2,
        crop_y: (resized_height - crop_height) / 2,
        crop_width,
        crop_height,
    })
}

/// Fit encoded image bytes to the pixel budget.
///
/// Returns the input untouched when it is already within budget; otherwise
/// re-encodes in the input's own format.
pub fn fit_to_budget(bytes: &[u8], max_pixels: u64, target_aspect: f64) -> Result<Vec<u8>, FitError> {
    let format = image::guess_format(bytes).map_err(|e| FitError::Decode(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| FitError::Decode(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    let plan = plan_fit(width, height, max_pixels, target_aspect)?;

    let FitPlan::Adjust {
        resized_width,
        resized_height,
        crop_x,
        crop_y,
        crop_width,
        crop_height,
    } = plan
    else {
        return Ok(bytes.to_vec());
    };

    tracing::debug!(
        width,
        height,
        resized_width,
        resized_height,
        crop_width,
        crop_height,
        "Fitting image to pixel budget"
    );

    let resized = if (resized_width, resized_height) == (width, height) {
        img
    } else {
        img.resize_exact(resized_width, resized_height, FilterType::Lanczos3)
    };
    let cropped = resized.crop_imm(crop_x, crop_y, crop_width, crop_height);

    encode(cropped, format)
}

fn encode(img: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, FitError> {
    // JPEG has no alpha channel.
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)
        .map_err(|e| FitError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

/// Errors from image post-processing.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Invalid target aspect ratio: {0}")]
    InvalidTarget(f64),

    #[error("Pixel budget must be positive")]
    InvalidBudget,
}
