//! 通用常量.

/// 掩膜哨兵值.
pub mod mask {
    /// 掩膜中属于目标组织的体素值.
    pub const IN: u8 = 255;

    /// 掩膜中属于背景的体素值.
    pub const OUT: u8 = 0;

    /// 体素是否属于目标组织?
    #[inline]
    pub const fn is_in(p: u8) -> bool {
        matches!(p, IN)
    }

    /// 体素是否属于背景?
    #[inline]
    pub const fn is_out(p: u8) -> bool {
        !is_in(p)
    }
}

/// 分割强度区间下限默认值.
pub const DEFAULT_LOWER_THRESHOLD: f64 = 50.0;

/// 分割强度区间上限默认值.
pub const DEFAULT_UPPER_THRESHOLD: f64 = 800.0;

/// 闭运算立方结构元边长默认值. 必须为正奇数.
pub const DEFAULT_KERNEL_SIZE: usize = 5;

/// 高斯平滑标准差默认值, 以体素为单位.
pub const DEFAULT_SMOOTHING_STD_DEV: f64 = 1.0;

/// 等值面提取的等值. 闭运算 + 平滑后的掩膜场在该值处取面.
pub const DEFAULT_ISO_VALUE: f32 = 1.0;

/// 逐切片体素统计的计数门限默认值. 严格大于该值的体素才被计入.
pub const DEFAULT_COUNTING_THRESHOLD: f64 = 50.0;
