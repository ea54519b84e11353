//! Decoded texture data and the image-file texture source
//!
//! PNG files go through the `image` crate and always come out as a single
//! RGBA8 level. Block-compressed textures come from [`super::dds`].

use std::path::Path;

use super::{AssetError, AssetResult};

/// Pixel formats a texture source can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB
    Rgba8Srgb,
    /// BC1 with alpha, linear
    Bc1RgbaUnorm,
    /// BC1 with alpha, sRGB
    Bc1RgbaSrgb,
    /// BC2, linear
    Bc2Unorm,
    /// BC2, sRGB
    Bc2Srgb,
    /// BC3, linear
    Bc3Unorm,
    /// BC3, sRGB
    Bc3Srgb,
    /// BC4 unsigned
    Bc4Unorm,
    /// BC4 signed
    Bc4Snorm,
    /// BC5 unsigned
    Bc5Unorm,
    /// BC5 signed
    Bc5Snorm,
    /// BC6H unsigned float
    Bc6hUfloat,
    /// BC6H signed float
    Bc6hSfloat,
    /// BC7, linear
    Bc7Unorm,
    /// BC7, sRGB
    Bc7Srgb,
    /// A format identifier the loader saw but cannot name, e.g. a DXGI code
    Other(u32),
}

impl PixelFormat {
    /// Whether the format stores 4x4 compressed blocks
    pub fn is_block_compressed(self) -> bool {
        !matches!(self, Self::Rgba8Unorm | Self::Rgba8Srgb | Self::Other(_))
    }

    /// Bytes per 4x4 block for compressed formats, bytes per texel otherwise
    pub fn block_size(self) -> u32 {
        match self {
            Self::Bc1RgbaUnorm | Self::Bc1RgbaSrgb | Self::Bc4Unorm | Self::Bc4Snorm => 8,
            Self::Rgba8Unorm | Self::Rgba8Srgb => 4,
            Self::Other(_) => 0,
            _ => 16,
        }
    }

    /// Byte size of a single mip level
    pub fn level_size(self, width: u32, height: u32) -> usize {
        if self.is_block_compressed() {
            (width.div_ceil(4) as usize) * (height.div_ceil(4) as usize) * self.block_size() as usize
        } else {
            width as usize * height as usize * self.block_size() as usize
        }
    }

    /// Byte size of `levels` mip levels starting at `width` x `height`
    pub fn image_size(self, width: u32, height: u32, levels: u32) -> usize {
        mip_extents(width, height, levels)
            .map(|(w, h)| self.level_size(w, h))
            .sum()
    }
}

/// Extents of each mip level, halving down to 1
pub fn mip_extents(width: u32, height: u32, levels: u32) -> impl Iterator<Item = (u32, u32)> {
    let halve = |extent: u32, level: u32| extent.checked_shr(level).unwrap_or(0).max(1);
    (0..levels).map(move |level| (halve(width, level), halve(height, level)))
}

/// Texture ready for upload: metadata plus tightly packed level data
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Width of level 0 in pixels
    pub width: u32,
    /// Height of level 0 in pixels
    pub height: u32,
    /// Number of mip levels stored in `data`
    pub mip_levels: u32,
    /// Format of `data`
    pub format: PixelFormat,
    /// All levels back to back, level 0 first
    pub data: Vec<u8>,
}

impl DecodedImage {
    /// Byte offset and size of every mip level inside `data`
    pub fn level_ranges(&self) -> Vec<(usize, usize)> {
        let mut offset = 0;
        mip_extents(self.width, self.height, self.mip_levels)
            .map(|(w, h)| {
                let size = self.format.level_size(w, h);
                let range = (offset, size);
                offset += size;
                range
            })
            .collect()
    }

    /// Two-colour checkerboard in RGBA8, the renderer's default texture
    pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let color = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            mip_levels: 1,
            format: PixelFormat::Rgba8Unorm,
            data,
        }
    }
}

/// Something that can turn a path into a [`DecodedImage`]
pub trait TextureSource {
    /// Load and decode the texture at `path`
    fn load(&self, path: &Path) -> AssetResult<DecodedImage>;
}

/// PNG texture loader backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileSource {
    /// Tag decoded pixels as sRGB instead of linear
    pub srgb: bool,
}

impl ImageFileSource {
    /// Decode an in-memory encoded image
    pub fn decode(&self, bytes: &[u8]) -> AssetResult<DecodedImage> {
        let img = image::load_from_memory(bytes).map_err(|e| AssetError::Decode(e.to_string()))?;
        Ok(self.from_rgba(img.to_rgba8()))
    }

    fn from_rgba(&self, rgba: image::RgbaImage) -> DecodedImage {
        let (width, height) = rgba.dimensions();
        DecodedImage {
            width,
            height,
            mip_levels: 1,
            format: if self.srgb { PixelFormat::Rgba8Srgb } else { PixelFormat::Rgba8Unorm },
            data: rgba.into_raw(),
        }
    }
}

impl TextureSource for ImageFileSource {
    fn load(&self, path: &Path) -> AssetResult<DecodedImage> {
        log::debug!("[TEXTURE] Decoding image {:?}", path);
        let img = image::open(path).map_err(|e| AssetError::Decode(format!("{}: {}", path.display(), e)))?;
        let decoded = self.from_rgba(img.to_rgba8());
        log::info!("[TEXTURE] Loaded {}x{} image from {:?}", decoded.width, decoded.height, path);
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bc_level_sizes_round_up_to_blocks() {
        assert_eq!(PixelFormat::Bc1RgbaUnorm.level_size(4, 4), 8);
        assert_eq!(PixelFormat::Bc1RgbaUnorm.level_size(5, 5), 32);
        assert_eq!(PixelFormat::Bc7Unorm.level_size(1, 1), 16);
        assert_eq!(PixelFormat::Rgba8Unorm.level_size(3, 2), 24);
    }

    #[test]
    fn test_image_size_sums_mips() {
        // 16x16 BC3: 16 blocks + 4 blocks + 1 block + 1 block + 1 block
        assert_eq!(PixelFormat::Bc3Unorm.image_size(16, 16, 5), (16 + 4 + 1 + 1 + 1) * 16);
    }

    #[test]
    fn test_extents_past_full_chain_stay_at_one() {
        let extents: Vec<_> = mip_extents(8, 2, 40).collect();
        assert_eq!(extents.len(), 40);
        assert_eq!(extents[1], (4, 1));
        assert!(extents[3..].iter().all(|&extent| extent == (1, 1)));
        assert_eq!(PixelFormat::Bc1RgbaUnorm.image_size(8, 8, 40), 4 * 8 + 39 * 8);
    }

    #[test]
    fn test_level_ranges_are_contiguous() {
        let image = DecodedImage {
            width: 8,
            height: 4,
            mip_levels: 4,
            format: PixelFormat::Rgba8Unorm,
            data: vec![0; PixelFormat::Rgba8Unorm.image_size(8, 4, 4)],
        };
        let ranges = image.level_ranges();
        assert_eq!(ranges, vec![(0, 128), (128, 32), (160, 8), (168, 4)]);
    }

    #[test]
    fn test_checkerboard_alternates() {
        let white = [255, 255, 255, 255];
        let black = [0, 0, 0, 255];
        let image = DecodedImage::checkerboard(16, 1, white, black);
        assert_eq!(image.data.len(), 16 * 16 * 4);
        assert_eq!(&image.data[0..4], &white);
        assert_eq!(&image.data[4..8], &black);
        assert_eq!(&image.data[64..68], &black);
    }

    #[test]
    fn test_decode_png_bytes() {
        let mut png = Vec::new();
        let pixels = image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]));
        pixels
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let decoded = ImageFileSource::default().decode(&png).unwrap();
        assert_eq!((decoded.width, decoded.height), (2, 3));
        assert_eq!(decoded.format, PixelFormat::Rgba8Unorm);
        assert_eq!(&decoded.data[0..4], &[10, 20, 30, 255]);
    }
}
