//! Depth pyramid extents and a CPU min-reduction pyramid

use crate::foundation::math::previous_pow2;

/// Extent and level count of a depth pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidExtent {
    /// Width of level 0
    pub width: u32,
    /// Height of level 0
    pub height: u32,
    /// Number of levels, level indices run `0..mip_count`
    pub mip_count: u32,
}

impl PyramidExtent {
    /// Pyramid for a draw target of `width` x `height`
    ///
    /// Each axis of level 0 is the previous power of two of the draw extent, so
    /// the pyramid never claims coverage the depth buffer does not have. The
    /// level count is the number of halvings until both axes reach 1.
    pub fn for_draw_extent(width: u32, height: u32) -> Self {
        let width = previous_pow2(width);
        let height = previous_pow2(height);

        let (mut w, mut h) = (width, height);
        let mut mip_count = 0;
        while w > 1 || h > 1 {
            mip_count += 1;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }

        Self {
            width,
            height,
            // A 1x1 draw target still needs one level to sample
            mip_count: mip_count.max(1),
        }
    }

    /// Extent of `level`
    pub fn level_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    /// Extents of every level, level 0 first
    pub fn levels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.mip_count).map(move |level| self.level_extent(level))
    }
}

/// CPU depth pyramid with the same min reduction as `depth_pyramid.comp`
#[derive(Debug, Clone, PartialEq)]
pub struct DepthPyramidModel {
    extent: PyramidExtent,
    levels: Vec<Vec<f32>>,
}

impl DepthPyramidModel {
    /// Reduce a row-major depth buffer of `width` x `height`
    ///
    /// Level 0 texels take the minimum over every source texel they overlap,
    /// which is at least as conservative as the GPU's min-filtered sample.
    pub fn build(depth: &[f32], width: u32, height: u32) -> Self {
        let extent = PyramidExtent::for_draw_extent(width, height);
        let mut levels: Vec<Vec<f32>> = Vec::with_capacity(extent.mip_count as usize);

        let (w0, h0) = extent.level_extent(0);
        let mut base = Vec::with_capacity((w0 * h0) as usize);
        for y in 0..h0 {
            let sy0 = (y * height) / h0;
            let sy1 = (((y + 1) * height).div_ceil(h0)).min(height);
            for x in 0..w0 {
                let sx0 = (x * width) / w0;
                let sx1 = (((x + 1) * width).div_ceil(w0)).min(width);
                let mut value = f32::MAX;
                for sy in sy0..sy1 {
                    for sx in sx0..sx1 {
                        value = value.min(depth[(sy * width + sx) as usize]);
                    }
                }
                base.push(value);
            }
        }
        levels.push(base);

        for level in 1..extent.mip_count {
            let (pw, ph) = extent.level_extent(level - 1);
            let (w, h) = extent.level_extent(level);
            let prev = &levels[level as usize - 1];
            let mut next = Vec::with_capacity((w * h) as usize);
            for y in 0..h {
                for x in 0..w {
                    let mut value = f32::MAX;
                    for sy in (y * 2)..(y * 2 + 2).min(ph) {
                        for sx in (x * 2)..(x * 2 + 2).min(pw) {
                            value = value.min(prev[(sy * pw + sx) as usize]);
                        }
                    }
                    next.push(value);
                }
            }
            levels.push(next);
        }

        Self { extent, levels }
    }

    /// Pyramid extent
    pub fn extent(&self) -> PyramidExtent {
        self.extent
    }

    /// Texel of `level` at `(x, y)`
    pub fn texel(&self, level: u32, x: u32, y: u32) -> f32 {
        let (w, _) = self.extent.level_extent(level);
        self.levels[level as usize][(y * w + x) as usize]
    }

    /// Min-filtered sample at `uv`, mirroring a linear sampler in MIN reduction mode
    ///
    /// `level` is clamped to the available range like `textureLod` clamps to
    /// the image's mip count.
    pub fn sample(&self, uv: [f32; 2], level: f32) -> f32 {
        let level = (level.max(0.0) as u32).min(self.extent.mip_count - 1);
        let (w, h) = self.extent.level_extent(level);

        let fx = (uv[0].clamp(0.0, 1.0) * w as f32 - 0.5).floor();
        let fy = (uv[1].clamp(0.0, 1.0) * h as f32 - 0.5).floor();
        let clamp_x = |v: f32| v.clamp(0.0, (w - 1) as f32) as u32;
        let clamp_y = |v: f32| v.clamp(0.0, (h - 1) as f32) as u32;

        let (x0, x1) = (clamp_x(fx), clamp_x(fx + 1.0));
        let (y0, y1) = (clamp_y(fy), clamp_y(fy + 1.0));

        self.texel(level, x0, y0)
            .min(self.texel(level, x1, y0))
            .min(self.texel(level, x0, y1))
            .min(self.texel(level, x1, y1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_hd_pyramid() {
        let extent = PyramidExtent::for_draw_extent(1920, 1080);
        assert_eq!((extent.width, extent.height), (1024, 1024));
        assert_eq!(extent.mip_count, 10);
        assert_eq!(extent.level_extent(extent.mip_count - 1), (2, 2));
    }

    #[test]
    fn test_mip_count_matches_log2_of_base() {
        for &(w, h) in &[(1920, 1080), (800, 600), (1280, 720), (4096, 16), (17, 3000)] {
            let extent = PyramidExtent::for_draw_extent(w, h);
            let expected = (extent.width.max(extent.height) as f32).log2().floor() as u32;
            assert_eq!(extent.mip_count, expected, "{}x{}", w, h);
            assert!(extent.width <= w && extent.height <= h);
        }
    }

    #[test]
    fn test_non_square_levels_clamp_to_one() {
        let extent = PyramidExtent::for_draw_extent(4096, 16);
        assert_eq!((extent.width, extent.height), (2048, 8));
        let levels: Vec<_> = extent.levels().collect();
        assert_eq!(levels.len(), 11);
        assert_eq!(levels[3], (256, 1));
        assert_eq!(levels[10], (2, 1));
    }

    #[test]
    fn test_tiny_target_has_one_level() {
        assert_eq!(PyramidExtent::for_draw_extent(1, 1).mip_count, 1);
        assert_eq!(PyramidExtent::for_draw_extent(2, 2).mip_count, 1);
    }

    #[test]
    fn test_reduction_keeps_minimum() {
        // 8x8 buffer, all 1.0 except one far texel
        let mut depth = vec![1.0f32; 64];
        depth[9] = 0.25;
        let pyramid = DepthPyramidModel::build(&depth, 8, 8);

        assert_eq!(pyramid.extent().width, 4);
        assert_eq!(pyramid.texel(0, 0, 0), 0.25);
        assert_eq!(pyramid.texel(0, 1, 0), 1.0);
        let last = pyramid.extent().mip_count - 1;
        assert_eq!(pyramid.texel(last, 0, 0), 0.25);
    }

    #[test]
    fn test_every_level_is_min_of_previous() {
        let depth: Vec<f32> = (0..256).map(|i| ((i * 37) % 101) as f32 / 100.0).collect();
        let pyramid = DepthPyramidModel::build(&depth, 16, 16);
        for level in 1..pyramid.extent().mip_count {
            let (w, h) = pyramid.extent().level_extent(level);
            for y in 0..h {
                for x in 0..w {
                    let expected = pyramid
                        .texel(level - 1, x * 2, y * 2)
                        .min(pyramid.texel(level - 1, x * 2 + 1, y * 2))
                        .min(pyramid.texel(level - 1, x * 2, y * 2 + 1))
                        .min(pyramid.texel(level - 1, x * 2 + 1, y * 2 + 1));
                    assert_eq!(pyramid.texel(level, x, y), expected);
                }
            }
        }
    }

    #[test]
    fn test_sample_clamps_level() {
        let pyramid = DepthPyramidModel::build(&vec![0.5; 64], 8, 8);
        assert_eq!(pyramid.sample([0.5, 0.5], 99.0), 0.5);
        assert_eq!(pyramid.sample([0.0, 1.0], -3.0), 0.5);
    }
}
