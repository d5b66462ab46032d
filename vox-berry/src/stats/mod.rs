//! 逐切片体素统计与滑块浏览.
//!
//! 统计在每次体数据加载 (或计数门限变更) 时整体预计算一遍,
//! 之后滑块移动只做 O(1) 索引查询, 不触发重算.

use std::sync::Arc;

use itertools::Itertools;
use log::warn;

use crate::Volume;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use ndarray::Axis;
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 逐切片体素计数: 对每个 z 切片统计强度严格大于计数门限的体素个数.
///
/// 条目按 z 升序排列, 长度恒等于源体数据的切片数.
/// 该值依附于某一代体数据, 随新一次加载被整体替换, 绝不跨代共享.
#[derive(Debug, Clone)]
pub struct SliceCounts {
    threshold: f64,
    counts: Vec<usize>,
}

impl SliceCounts {
    /// 遍历整个体数据, 预计算每个切片的计数. 复杂度 O(z * h * w).
    pub fn analyze(volume: &Volume, threshold: f64) -> Self {
        #[cfg(feature = "rayon")]
        let counts = volume
            .data()
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|s| s.iter().filter(|&&p| (p as f64) > threshold).count())
            .collect();
        #[cfg(not(feature = "rayon"))]
        let counts = volume
            .slice_iter()
            .map(|s| s.count_above(threshold))
            .collect();

        Self { threshold, counts }
    }

    /// 获取预计算时使用的计数门限.
    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 获取切片个数. 恒等于源体数据的 `len_z()`.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// 统计是否为空? 对合法体数据恒为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// 获取第 `z` 个切片的计数. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, z: usize) -> Option<usize> {
        self.counts.get(z).copied()
    }

    /// 获取底层计数序列, 按 z 升序.
    #[inline]
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// 获取能以 (切片索引, 计数) 格式按 z 升序迭代的迭代器.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (usize, usize)> + '_ {
        self.counts.iter().copied().enumerate()
    }

    /// 获取全体切片计数之和, 即整个体数据中强度大于门限的体素总数.
    #[inline]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// 获取计数最大的切片及其计数. 多个切片并列最大时, 取索引最大者.
    #[inline]
    pub fn peak(&self) -> Option<(usize, usize)> {
        self.counts.iter().copied().position_max().map(|z| (z, self.counts[z]))
    }
}

/// 滑块浏览状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum BrowserState {
    /// 尚无可用统计 (未加载, 或新一轮预计算未完成).
    #[default]
    Idle,

    /// 预计算完成, 等待首次滑块交互.
    Ready,

    /// 滑块交互进行中.
    Active,
}

/// 滑块驱动的切片浏览状态机.
///
/// 交互层推入连续的滑块值, 本结构截断取整后返回预计算好的
/// (切片索引, 体素计数) 对, 与任何渲染控件的回调机制解耦.
///
/// 状态转移: `Idle -> Ready` 于预计算完成 ([`Self::attach`]);
/// `Ready -> Active` 于首次交互; `Active -> Active` 于后续每次交互.
/// 只有新一次体数据加载 ([`Self::reset`]) 能回到 `Idle`,
/// 同时废弃旧统计.
#[derive(Debug, Default)]
pub struct SliceBrowser {
    counts: Option<Arc<SliceCounts>>,
    state: BrowserState,
}

impl SliceBrowser {
    /// 创建空浏览器, 初始为 `Idle` 态.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前状态.
    #[inline]
    pub fn state(&self) -> BrowserState {
        self.state
    }

    /// 获取当前依附的统计值.
    #[inline]
    pub fn counts(&self) -> Option<&Arc<SliceCounts>> {
        self.counts.as_ref()
    }

    /// 废弃当前统计, 回到 `Idle` 态. 在新一次体数据加载时调用.
    pub fn reset(&mut self) {
        self.counts = None;
        self.state = BrowserState::Idle;
    }

    /// 预计算完成, 依附新统计并进入 `Ready` 态.
    pub fn attach(&mut self, counts: Arc<SliceCounts>) {
        self.counts = Some(counts);
        self.state = BrowserState::Ready;
    }

    /// 响应一次滑块交互.
    ///
    /// `raw` 为连续滑块值, 向零截断取整后钳到合法切片范围.
    /// 返回选中切片的 (切片索引, 体素计数) 对.
    /// `Idle` 态或非有限输入返回 `None`.
    pub fn select(&mut self, raw: f64) -> Option<(usize, usize)> {
        if !raw.is_finite() {
            warn!("忽略非有限滑块值 {raw}");
            return None;
        }
        let counts = self.counts.as_ref()?;

        let z = (raw.trunc().max(0.0) as usize).min(counts.len() - 1);
        self.state = BrowserState::Active;

        // 钳位后必然在界内.
        Some((z, counts.get(z).unwrap()))
    }
}
