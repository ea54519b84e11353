//! DDS container parsing for block-compressed textures
//!
//! Only plain 2D textures are accepted: cubemaps, volumes and DX10 array or
//! non-2D resources are rejected.

use std::path::Path;

use super::image_loader::{DecodedImage, PixelFormat, TextureSource};
use super::{AssetError, AssetResult};

const MAGIC: u32 = fourcc(b"DDS ");
const HEADER_SIZE: usize = 124;
const PIXEL_FORMAT_SIZE: u32 = 32;
const DX10_HEADER_SIZE: usize = 20;

const DDSCAPS2_CUBEMAP: u32 = 0x200;
const DDSCAPS2_VOLUME: u32 = 0x20_0000;
const DDS_DIMENSION_TEXTURE2D: u32 = 3;

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Fields of the DDS header the loader cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdsHeader {
    /// Level 0 width
    pub width: u32,
    /// Level 0 height
    pub height: u32,
    /// Mip levels stored in the file, at least 1
    pub mip_levels: u32,
    /// Pixel format named by the FourCC or DXGI code
    pub format: PixelFormat,
    /// Offset of the first byte of pixel data
    pub data_offset: usize,
}

fn read_u32(bytes: &[u8], offset: usize) -> AssetResult<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| AssetError::InvalidDds(format!("file truncated at byte {}", offset)))
}

fn format_from_fourcc(code: u32) -> Option<PixelFormat> {
    match &code.to_le_bytes() {
        b"DXT1" => Some(PixelFormat::Bc1RgbaUnorm),
        b"DXT3" => Some(PixelFormat::Bc2Unorm),
        b"DXT5" => Some(PixelFormat::Bc3Unorm),
        b"ATI1" | b"BC4U" => Some(PixelFormat::Bc4Unorm),
        b"ATI2" | b"BC5U" => Some(PixelFormat::Bc5Unorm),
        _ => None,
    }
}

fn format_from_dxgi(code: u32) -> PixelFormat {
    match code {
        28 => PixelFormat::Rgba8Unorm,
        29 => PixelFormat::Rgba8Srgb,
        71 => PixelFormat::Bc1RgbaUnorm,
        72 => PixelFormat::Bc1RgbaSrgb,
        74 => PixelFormat::Bc2Unorm,
        75 => PixelFormat::Bc2Srgb,
        77 => PixelFormat::Bc3Unorm,
        78 => PixelFormat::Bc3Srgb,
        80 => PixelFormat::Bc4Unorm,
        81 => PixelFormat::Bc4Snorm,
        83 => PixelFormat::Bc5Unorm,
        84 => PixelFormat::Bc5Snorm,
        95 => PixelFormat::Bc6hUfloat,
        96 => PixelFormat::Bc6hSfloat,
        98 => PixelFormat::Bc7Unorm,
        99 => PixelFormat::Bc7Srgb,
        other => PixelFormat::Other(other),
    }
}

impl DdsHeader {
    /// Parse the magic, the main header and the optional DX10 extension
    pub fn parse(bytes: &[u8]) -> AssetResult<Self> {
        if read_u32(bytes, 0)? != MAGIC {
            return Err(AssetError::InvalidDds("missing DDS magic".to_string()));
        }

        let header = 4;
        if read_u32(bytes, header)? as usize != HEADER_SIZE || read_u32(bytes, header + 72)? != PIXEL_FORMAT_SIZE {
            return Err(AssetError::InvalidDds("unexpected header size".to_string()));
        }

        let height = read_u32(bytes, header + 8)?;
        let width = read_u32(bytes, header + 12)?;
        let mip_levels = read_u32(bytes, header + 24)?.max(1);
        let four_cc = read_u32(bytes, header + 80)?;
        let caps2 = read_u32(bytes, header + 108)?;

        if caps2 & (DDSCAPS2_CUBEMAP | DDSCAPS2_VOLUME) != 0 {
            return Err(AssetError::InvalidDds("cubemaps and volume textures are not supported".to_string()));
        }

        let mut data_offset = header + HEADER_SIZE;
        let format = if four_cc == fourcc(b"DX10") {
            let dxgi_format = read_u32(bytes, data_offset)?;
            let dimension = read_u32(bytes, data_offset + 4)?;
            let array_size = read_u32(bytes, data_offset + 12)?;
            if dimension != DDS_DIMENSION_TEXTURE2D || array_size > 1 {
                return Err(AssetError::InvalidDds("only single 2D textures are supported".to_string()));
            }
            data_offset += DX10_HEADER_SIZE;
            format_from_dxgi(dxgi_format)
        } else {
            format_from_fourcc(four_cc).unwrap_or(PixelFormat::Other(four_cc))
        };

        if width == 0 || height == 0 {
            return Err(AssetError::InvalidDds("zero-sized texture".to_string()));
        }

        let full_chain = 32 - width.max(height).leading_zeros();
        if mip_levels > full_chain {
            return Err(AssetError::InvalidDds(format!(
                "{} mip levels declared, a {}x{} texture has at most {}",
                mip_levels, width, height, full_chain
            )));
        }

        Ok(Self { width, height, mip_levels, format, data_offset })
    }
}

/// Parse a complete DDS file into a [`DecodedImage`]
///
/// The pixel payload must hold every mip level the header announces.
pub fn decode(bytes: &[u8]) -> AssetResult<DecodedImage> {
    let header = DdsHeader::parse(bytes)?;
    if header.format.block_size() == 0 {
        // Unknown formats are passed through so the renderer can report them
        let data = bytes.get(header.data_offset..).map(<[u8]>::to_vec).unwrap_or_default();
        return Ok(DecodedImage {
            width: header.width,
            height: header.height,
            mip_levels: header.mip_levels,
            format: header.format,
            data,
        });
    }

    let size = header.format.image_size(header.width, header.height, header.mip_levels);
    let payload = header
        .data_offset
        .checked_add(size)
        .and_then(|end| bytes.get(header.data_offset..end))
        .ok_or_else(|| {
            AssetError::InvalidDds(format!(
                "expected {} bytes of pixel data, found {}",
                size,
                bytes.len().saturating_sub(header.data_offset)
            ))
        })?;

    Ok(DecodedImage {
        width: header.width,
        height: header.height,
        mip_levels: header.mip_levels,
        format: header.format,
        data: payload.to_vec(),
    })
}

/// Texture source reading `.dds` files
#[derive(Debug, Clone, Copy, Default)]
pub struct DdsFileSource;

impl TextureSource for DdsFileSource {
    fn load(&self, path: &Path) -> AssetResult<DecodedImage> {
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io { path: path.to_path_buf(), source })?;
        let image = decode(&bytes)?;
        log::info!(
            "[TEXTURE] Loaded {}x{} {:?} DDS with {} mip(s) from {:?}",
            image.width, image.height, image.format, image.mip_levels, path
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width: u32, height: u32, mips: u32, four_cc: &[u8; 4], caps2: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 4 + HEADER_SIZE];
        let mut put = |offset: usize, value: u32| bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        put(0, MAGIC);
        put(4, HEADER_SIZE as u32);
        put(4 + 8, height);
        put(4 + 12, width);
        put(4 + 24, mips);
        put(4 + 72, PIXEL_FORMAT_SIZE);
        put(4 + 80, fourcc(four_cc));
        put(4 + 108, caps2);
        bytes
    }

    fn dx10(dxgi: u32, dimension: u32) -> Vec<u8> {
        [dxgi, dimension, 0, 1, 0].iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_dxt1_with_mips() {
        let mut bytes = header(8, 8, 4, b"DXT1", 0);
        let size = PixelFormat::Bc1RgbaUnorm.image_size(8, 8, 4);
        bytes.extend(std::iter::repeat(0xAB).take(size));

        let image = decode(&bytes).unwrap();
        assert_eq!(image.format, PixelFormat::Bc1RgbaUnorm);
        assert_eq!(image.mip_levels, 4);
        // 4 blocks + 1 + 1 + 1, 8 bytes each
        assert_eq!(image.data.len(), 7 * 8);
    }

    #[test]
    fn test_parse_dx10_bc7() {
        let mut bytes = header(4, 4, 1, b"DX10", 0);
        bytes.extend(dx10(98, DDS_DIMENSION_TEXTURE2D));
        bytes.extend([0u8; 16]);

        let header = DdsHeader::parse(&bytes).unwrap();
        assert_eq!(header.format, PixelFormat::Bc7Unorm);
        assert_eq!(header.data_offset, 4 + HEADER_SIZE + DX10_HEADER_SIZE);
        assert_eq!(decode(&bytes).unwrap().data.len(), 16);
    }

    #[test]
    fn test_zero_mip_count_means_one() {
        let mut bytes = header(4, 4, 0, b"DXT5", 0);
        bytes.extend([0u8; 16]);
        assert_eq!(decode(&bytes).unwrap().mip_levels, 1);
    }

    #[test]
    fn test_mip_count_beyond_full_chain_rejected() {
        let mut bytes = header(8, 8, 40, b"DXT1", 0);
        bytes.extend([0u8; 64]);
        assert!(matches!(decode(&bytes), Err(AssetError::InvalidDds(_))));

        let corrupt = header(8, 8, u32::MAX, b"DXT1", 0);
        assert!(matches!(DdsHeader::parse(&corrupt), Err(AssetError::InvalidDds(_))));

        // 8x8 has exactly four levels: 8, 4, 2, 1
        assert!(DdsHeader::parse(&header(8, 8, 4, b"DXT1", 0)).is_ok());
        assert!(DdsHeader::parse(&header(8, 8, 5, b"DXT1", 0)).is_err());
    }

    #[test]
    fn test_cubemap_rejected() {
        let bytes = header(4, 4, 1, b"DXT1", DDSCAPS2_CUBEMAP);
        assert!(matches!(DdsHeader::parse(&bytes), Err(AssetError::InvalidDds(_))));
    }

    #[test]
    fn test_dx10_texture3d_rejected() {
        let mut bytes = header(4, 4, 1, b"DX10", 0);
        bytes.extend(dx10(98, 4));
        assert!(DdsHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        let mut bytes = header(4, 4, 1, b"DXT1", 0);
        bytes[0] = b'X';
        assert!(DdsHeader::parse(&bytes).is_err());

        let truncated = header(8, 8, 1, b"DXT1", 0);
        assert!(matches!(decode(&truncated), Err(AssetError::InvalidDds(_))));
    }

    #[test]
    fn test_unknown_dxgi_format_is_reported_not_dropped() {
        let mut bytes = header(4, 4, 1, b"DX10", 0);
        bytes.extend(dx10(2, DDS_DIMENSION_TEXTURE2D));
        bytes.extend([0u8; 64]);
        let image = decode(&bytes).unwrap();
        assert_eq!(image.format, PixelFormat::Other(2));
    }
}
