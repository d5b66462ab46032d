//! 强度区间阈值分割.

use ndarray::Array3;

use crate::consts::mask;
use crate::{Idx3d, Volume};

/// 二值掩膜体. 体素值只取 [`mask::IN`] 和 [`mask::OUT`] 两个哨兵值.
///
/// 掩膜是派生数据, 生命周期只覆盖一次管线运行, 从不持久化.
#[derive(Debug, Clone)]
pub struct Mask {
    data: Array3<u8>,
}

impl Mask {
    /// 由裸数据直接创建掩膜. 调用方保证体素值只含两个哨兵值.
    #[inline]
    pub(crate) fn from_raw(data: Array3<u8>) -> Self {
        debug_assert!(data.iter().all(|&p| p == mask::IN || p == mask::OUT));
        Self { data }
    }

    /// 获取掩膜形状, 按 `(z, h, w)` 次序.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 给定位置是否属于目标组织? 越界时返回 `false`.
    #[inline]
    pub fn is_in(&self, pos: Idx3d) -> bool {
        self.data.get(pos).copied().is_some_and(mask::is_in)
    }

    /// 获取掩膜中目标组织体素的个数.
    #[inline]
    pub fn count_in(&self) -> usize {
        self.data.iter().filter(|&&p| mask::is_in(p)).count()
    }

    /// 获取底层数据.
    #[inline]
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// 将掩膜转换为浮点标量场, 供后续高斯平滑与等值面提取使用.
    #[inline]
    pub fn into_field(self) -> Array3<f32> {
        self.data.mapv(f32::from)
    }
}

/// 对体数据做闭区间强度分割.
///
/// 强度落在 \[`lower`, `upper`\] 内的体素标记为 [`mask::IN`],
/// 其余标记为 [`mask::OUT`]. `lower == upper` 时恰好选中单一强度值,
/// 不附带任何容差.
///
/// # 注意
///
/// 区间合法性 (`lower <= upper`) 由 [`crate::pipeline::PipelineParams`]
/// 在构建时保证, 本函数只以 debug 断言复查.
pub fn threshold_band(volume: &Volume, lower: f64, upper: f64) -> Mask {
    debug_assert!(lower <= upper, "非法分割区间");

    let data = volume.data().mapv(|p| {
        if (lower..=upper).contains(&(p as f64)) {
            mask::IN
        } else {
            mask::OUT
        }
    });
    Mask::from_raw(data)
}
