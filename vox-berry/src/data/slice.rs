//! 体数据的二维水平切片视图.

use std::ops::Index;
use std::path::Path;

use image::ImageResult;
use ndarray::iter::{IndexedIter, Iter};
use ndarray::{ArrayView2, Ix2};

use crate::{GrayWindow, Idx2d};

/// 不可变、借用的二维水平强度切片.
pub struct ScanSlice<'a> {
    /// 底层数据的轻量级视图, 借用于 [`crate::Volume`].
    ///
    /// 这里有意把代码写死为 `ArrayView` 降低灵活性, 但使结构的意图更加明确.
    data: ArrayView2<'a, f32>,
}

impl Index<Idx2d> for ScanSlice<'_> {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

impl<'a> ScanSlice<'a> {
    /// 根据已有的二维视图创建切片.
    #[inline]
    pub(crate) fn new(data: ArrayView2<'a, f32>) -> Self {
        Self { data }
    }

    /// 获取切片形状, 按 (高, 宽) 次序.
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 获取切片像素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (h, w) = self.shape();
        h * w
    }

    /// 获取给定位置 (高, 宽) 的像素值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx2d) -> Option<f32> {
        self.data.get(pos).copied()
    }

    /// 获取可以迭代图像像素的迭代器.
    #[inline]
    pub fn iter(&self) -> Iter<'_, f32, Ix2> {
        self.data.iter()
    }

    /// 获取能以 ((高, 宽), 像素值) 格式迭代图像的迭代器.
    #[inline]
    pub fn indexed_iter(&self) -> IndexedIter<'_, f32, Ix2> {
        self.data.indexed_iter()
    }

    /// 统计切片上强度严格大于 `threshold` 的像素个数.
    #[inline]
    pub fn count_above(&self, threshold: f64) -> usize {
        self.data.iter().filter(|&&p| (p as f64) > threshold).count()
    }

    /// 计算切片全体像素强度的平均值.
    pub fn mean(&self) -> f64 {
        let sum: f64 = self.data.iter().map(|&p| p as f64).sum();
        sum / (self.size() as f64)
    }

    /// 按照 `window` 给出的窗口规则将切片保存为单通道灰度图.
    ///
    /// 窗口外的像素被钳到黑/白两端. 如果切片存在非有限像素, 则程序 panic.
    pub fn save_vis<P: AsRef<Path>>(&self, window: GrayWindow, path: P) -> ImageResult<()> {
        let (height, width) = self.shape();
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((h, w), &pix) in self.indexed_iter() {
            let gray = window.eval(pix).expect("切片存在非有限像素");
            buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
        }
        buf.save(path)
    }
}

#[cfg(test)]
mod tests {
    use crate::Volume;
    use ndarray::Array3;

    #[test]
    fn test_slice_view_and_count() {
        let mut data = Array3::zeros((2, 3, 4));
        data[(0, 1, 2)] = 80.0;
        data[(0, 2, 3)] = 50.0;
        data[(1, 0, 0)] = 120.0;
        let vol = Volume::synthetic(data, [1.0, 1.0, 1.0]);

        let s0 = vol.slice_at(0);
        assert_eq!(s0.shape(), (3, 4));
        assert_eq!(s0.size(), 12);
        assert_eq!(s0[(1, 2)], 80.0);
        assert_eq!(s0.get((3, 0)), None);

        // 50.0 不严格大于 50.0, 不被计入.
        assert_eq!(s0.count_above(50.0), 1);
        assert_eq!(vol.slice_at(1).count_above(50.0), 1);
        assert!((s0.mean() - 130.0 / 12.0).abs() < 1e-9);
    }
}
