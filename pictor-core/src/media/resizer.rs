use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::config::{ConfigStore, ConfigValue};
use crate::error::{Error, Result};

/// Resize backend, selected by the top-level `mode` key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Triangle resampling
    Fast,
    /// Lanczos3 resampling
    Quality,
}

impl ResizeMode {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "quality" => Ok(Self::Quality),
            other => Err(Error::Media(format!(
                "unsupported resize mode '{other}' (expected fast|quality)"
            ))),
        }
    }

    fn filter(self) -> FilterType {
        match self {
            Self::Fast => FilterType::Triangle,
            Self::Quality => FilterType::Lanczos3,
        }
    }
}

// A fixed pixel count, or `*` meaning "derive this axis from the other by
// aspect ratio".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Fixed(u32),
    Auto,
}

impl Dimension {
    fn parse(value: &ConfigValue, key: &str) -> Result<Self> {
        match value {
            ConfigValue::Int(pixels) if *pixels > 0 => Ok(Self::Fixed(*pixels as u32)),
            ConfigValue::Str(text) if text == "*" => Ok(Self::Auto),
            other => Err(Error::Media(format!(
                "size entry '{key}' must be a positive pixel count or '*', got {other:?}"
            ))),
        }
    }

    fn label(self) -> String {
        match self {
            Self::Fixed(pixels) => pixels.to_string(),
            Self::Auto => "auto".to_owned(),
        }
    }
}

/// Produces resized derivatives of archive images, driven by size profiles
/// in the config store (`<size>/width`, `<size>/height`, `<size>/crop`,
/// `<size>/filters`)
pub struct Resizer<'a> {
    config: &'a ConfigStore,
    mode: ResizeMode,
    archive_dir: PathBuf,
    cache_dir: PathBuf,
}

impl<'a> Resizer<'a> {
    pub fn new(config: &'a ConfigStore) -> Result<Self> {
        let mode = ResizeMode::parse(required_str(config, "mode")?)?;
        let archive_dir = PathBuf::from(required_str(config, "archive")?);
        let cache_dir = PathBuf::from(required_str(config, "imageCache")?);

        Ok(Self {
            config,
            mode,
            archive_dir,
            cache_dir,
        })
    }

    /// Renders the derivative of `filename` for the named size profile,
    /// reusing it when it is at least as new as the source file
    pub fn resize(&self, filename: &str, size_name: &str) -> Result<PathBuf> {
        let source = self.archive_dir.join(filename);
        if !source.exists() {
            return Err(Error::NotFound(format!(
                "archive file '{}' does not exist",
                source.display()
            )));
        }

        let width = self.size_dimension(size_name, "width")?;
        let height = self.size_dimension(size_name, "height")?;
        let crop = self
            .config
            .get(&format!("{size_name}/crop"))
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false);

        let target = self.derivative_path(filename, width, height, crop)?;
        if derivative_is_fresh(&source, &target)? {
            tracing::debug!(target = %target.display(), "serving cached derivative");
            return Ok(target);
        }

        let image = image::open(&source).map_err(|err| {
            Error::Media(format!("failed to open '{}': {err}", source.display()))
        })?;
        let (orig_width, orig_height) = image.dimensions();
        let (new_width, new_height) = target_size(orig_width, orig_height, width, height, crop)?;

        let resized = if crop {
            image.resize_to_fill(new_width, new_height, self.mode.filter())
        } else {
            image.resize_exact(new_width, new_height, self.mode.filter())
        };
        let finished = self.apply_filters(resized, size_name);

        save_jpeg(&finished, &target)?;
        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            width = new_width,
            height = new_height,
            "rendered derivative"
        );
        Ok(target)
    }

    fn size_dimension(&self, size_name: &str, axis: &str) -> Result<Dimension> {
        let key = format!("{size_name}/{axis}");
        let value = self
            .config
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("size configuration '{key}' is not set")))?;
        Dimension::parse(value, &key)
    }

    fn derivative_path(
        &self,
        filename: &str,
        width: Dimension,
        height: Dimension,
        crop: bool,
    ) -> Result<PathBuf> {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                Error::Media(format!("cannot derive a cache name from '{filename}'"))
            })?;
        let fit = if crop { "crop" } else { "fit" };
        Ok(self.cache_dir.join(format!(
            "{stem}_{}_{}_{fit}.jpg",
            width.label(),
            height.label()
        )))
    }

    fn apply_filters(&self, mut image: DynamicImage, size_name: &str) -> DynamicImage {
        let Some(filters) = self
            .config
            .get(&format!("{size_name}/filters"))
            .and_then(ConfigValue::as_list)
        else {
            return image;
        };

        for filter in filters {
            match filter.as_str() {
                Some("grayscale") => image = image.grayscale(),
                Some("blur") => image = image.blur(1.5),
                other => {
                    tracing::warn!(?other, size_name, "skipping unknown image filter")
                }
            }
        }
        image
    }
}

// Resolves `*` dimensions and, without crop, scales both axes by the same
// ratio so the image fits inside the requested box.
fn target_size(
    orig_width: u32,
    orig_height: u32,
    width: Dimension,
    height: Dimension,
    crop: bool,
) -> Result<(u32, u32)> {
    let (mut width_px, mut height_px) = match (width, height) {
        (Dimension::Fixed(w), Dimension::Fixed(h)) => (f64::from(w), f64::from(h)),
        (Dimension::Auto, Dimension::Fixed(h)) => (
            f64::from(h) / f64::from(orig_height) * f64::from(orig_width),
            f64::from(h),
        ),
        (Dimension::Fixed(w), Dimension::Auto) => (
            f64::from(w),
            f64::from(w) / f64::from(orig_width) * f64::from(orig_height),
        ),
        (Dimension::Auto, Dimension::Auto) => {
            return Err(Error::Media(
                "width and height cannot both be '*'".to_owned(),
            ))
        }
    };

    if !crop {
        let ratio = (width_px / f64::from(orig_width)).min(height_px / f64::from(orig_height));
        width_px = f64::from(orig_width) * ratio;
        height_px = f64::from(orig_height) * ratio;
    }

    Ok((
        width_px.round().max(1.0) as u32,
        height_px.round().max(1.0) as u32,
    ))
}

fn derivative_is_fresh(source: &Path, target: &Path) -> Result<bool> {
    if !target.exists() {
        return Ok(false);
    }
    let source_modified = std::fs::metadata(source)?.modified()?;
    let target_modified = std::fs::metadata(target)?.modified()?;
    Ok(source_modified <= target_modified)
}

fn save_jpeg(image: &DynamicImage, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    rgb.save_with_format(target, ImageFormat::Jpeg)
        .map_err(|err| Error::Media(format!("failed to save '{}': {err}", target.display())))
}

fn required_str<'a>(config: &'a ConfigStore, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .and_then(ConfigValue::as_str)
        .ok_or_else(|| Error::NotFound(format!("config key '{key}' is not set")))
}
