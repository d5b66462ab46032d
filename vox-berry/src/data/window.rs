/// 灰度显示窗口, 包含窗位 (window level) 和窗宽 (window width).
///
/// 用于把任意量纲的体素强度映射到 8-bit 灰度, 以便切片可视化导出.
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug)]
pub struct GrayWindow {
    level: f32,
    width: f32,
}

impl GrayWindow {
    /// 构建显示窗口.
    ///
    /// `level` 和 `width` 必须在合理范围内, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<GrayWindow> {
        if (-1e5..=1e5).contains(&level) && 0.0 < width && width <= 1e5 {
            Some(Self { level, width })
        } else {
            None
        }
    }

    /// 构建一个恰好覆盖闭区间 \[`lo`, `hi`\] 的显示窗口.
    ///
    /// 通常配合 [`crate::Volume::min_max`] 使用, 使窗口覆盖整个强度值域.
    /// 要求 `lo < hi` 且两者均在合理范围内, 否则返回 `None`.
    pub fn from_range(lo: f32, hi: f32) -> Option<GrayWindow> {
        if lo < hi {
            Self::new((lo + hi) / 2.0, hi - lo)
        } else {
            None
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// 求在当前窗口设置下, 强度值 `p` 对应的灰度图像素整数值 (0 <= value <= 255).
    ///
    /// 如果 `p` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, p: f32) -> Option<u8> {
        if !p.is_finite() {
            return None;
        }
        let lb = self.lower_bound();
        if p <= lb {
            Some(u8::MIN)
        } else if p >= self.upper_bound() {
            Some(u8::MAX)
        } else {
            // 255, not 256.
            Some((((p - lb) / self.width()) * 255.0) as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::GrayWindow;

    fn is_valid_init(level: f32, width: f32) -> bool {
        GrayWindow::new(level, width).is_some()
    }

    #[test]
    fn test_gray_window_invalid_input() {
        assert!(!is_valid_init(0.0, -1.0));
        assert!(!is_valid_init(0.0, 0.0));
        assert!(GrayWindow::from_range(10.0, 10.0).is_none());
        assert!(GrayWindow::from_range(10.0, 5.0).is_none());
    }

    #[test]
    fn test_gray_window_generic() {
        // [60, 100]
        let gw = GrayWindow::new(80.0, 40.0).unwrap();
        assert_eq!(gw.eval(f32::NAN), None);
        assert_eq!(gw.eval(f32::MIN), Some(0));
        assert_eq!(gw.eval(f32::MAX), Some(255));

        assert_eq!(gw.eval(50.0), Some(0));
        assert_eq!(gw.eval(60.0), Some(0));
        assert_eq!(gw.eval(70.0).unwrap(), (255.0 * 0.25) as u8);
        assert_eq!(gw.eval(80.0).unwrap(), (255.0 * 0.5) as u8);
        assert_eq!(gw.eval(90.0).unwrap(), (255.0 * 0.75) as u8);
        assert_eq!(gw.eval(99.999), Some(254));
        assert_eq!(gw.eval(100.0).unwrap(), u8::MAX);
    }

    #[test]
    fn test_gray_window_from_range() {
        let gw = GrayWindow::from_range(0.0, 200.0).unwrap();
        assert_eq!(gw.level(), 100.0);
        assert_eq!(gw.width(), 200.0);
        assert_eq!(gw.lower_bound(), 0.0);
        assert_eq!(gw.upper_bound(), 200.0);
    }
}
