//! PNG loading into tightly packed RGBA8
//!
//! Rows are flipped on load so texture coordinates with a bottom-left origin
//! sample the image the right way up.

use std::path::{Path, PathBuf};

use scene_renderer::render::backends::vulkan::resources::texture::CUBEMAP_FACE_SUFFIXES;
use scene_renderer::PixelData;

use super::AssetError;

/// Load an image file as flipped RGBA8
pub fn load_rgba<P: AsRef<Path>>(path: P) -> Result<PixelData, AssetError> {
    let path = path.as_ref();
    log::debug!("Loading image from: {:?}", path);

    let img = image::open(path).map_err(|e| AssetError::LoadFailed(format!("{}: {e}", path.display())))?;
    let rgba = image::imageops::flip_vertical(&img.to_rgba8());
    let (width, height) = rgba.dimensions();

    log::info!("Loaded image {}x{} from {:?}", width, height, path);
    PixelData::new(width, height, rgba.into_raw()).map_err(|e| AssetError::LoadFailed(e.to_string()))
}

/// Load an image, falling back to the 1x1 placeholder when it cannot be read
pub fn load_or_placeholder<P: AsRef<Path>>(path: P) -> PixelData {
    load_rgba(&path).unwrap_or_else(|e| {
        log::warn!("Using placeholder texture: {e}");
        PixelData::placeholder()
    })
}

/// Paths of the six faces of `root`, in `_r _l _u _d _b _f` order
pub fn cubemap_face_paths<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let root = root.as_ref().to_string_lossy();
    CUBEMAP_FACE_SUFFIXES
        .iter()
        .map(|suffix| PathBuf::from(format!("{root}{suffix}.png")))
        .collect()
}

/// Load the six cube faces; a missing face makes the whole cubemap a placeholder
pub fn load_cubemap_or_placeholder<P: AsRef<Path>>(root: P) -> Vec<PixelData> {
    let faces: Result<Vec<PixelData>, AssetError> = cubemap_face_paths(root).iter().map(load_rgba).collect();
    faces.unwrap_or_else(|e| {
        log::warn!("Using placeholder cubemap: {e}");
        vec![PixelData::placeholder(); CUBEMAP_FACE_SUFFIXES.len()]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_paths_follow_suffix_order() {
        let paths = cubemap_face_paths("resources/cubemap/cubemap");
        assert_eq!(paths.len(), 6);
        assert_eq!(paths[0], PathBuf::from("resources/cubemap/cubemap_r.png"));
        assert_eq!(paths[5], PathBuf::from("resources/cubemap/cubemap_f.png"));
    }

    #[test]
    fn test_missing_file_gives_placeholder() {
        let pixels = load_or_placeholder("does/not/exist.png");
        assert_eq!(pixels, PixelData::placeholder());
    }

    #[test]
    fn test_missing_cubemap_gives_six_placeholders() {
        let faces = load_cubemap_or_placeholder("does/not/exist");
        assert_eq!(faces.len(), 6);
        assert!(faces.iter().all(|face| face.width == 1 && face.height == 1));
    }

    #[test]
    fn test_round_trip_flips_rows() {
        let dir = std::env::temp_dir().join("dragons_app_image_loader_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("two_rows.png");

        // top row red, bottom row blue
        let mut img = image::RgbaImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        img.save(&path).unwrap();

        let pixels = load_rgba(&path).unwrap();
        assert_eq!(&pixels.rgba[0..4], &[0, 0, 255, 255]);
        assert_eq!(&pixels.rgba[4..8], &[255, 0, 0, 255]);
    }
}
