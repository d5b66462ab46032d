//! 管线参数、编排与结果发布.
//!
//! 编排器按 分割 -> 闭运算 -> 平滑 -> 等值面 -> 度量 的固定次序
//! 驱动各阶段, 在工作线程上执行, 并把 (度量, 网格) 作为一个整体
//! 原子发布. 参数或体数据变更触发整条管线重跑, 不存在部分重算.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::consts;
use crate::data::store::Generation;
use crate::stats::{SliceBrowser, SliceCounts};
use crate::{Idx3d, PipelineError, Volume, VolumeStore};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod metrics;
pub mod morph;
pub mod segment;
pub mod surface;

pub use metrics::MeshMetrics;
pub use segment::Mask;
pub use surface::Mesh;

/// 一次管线运行的全部可调参数.
///
/// 任一字段变更都会触发整条管线重跑. 合法性在构建时一次性校验,
/// 之后各阶段不再重复检查.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineParams {
    lower_threshold: f64,
    upper_threshold: f64,
    kernel_size: usize,
    smoothing_std_dev: f64,
}

impl Default for PipelineParams {
    #[inline]
    fn default() -> Self {
        Self {
            lower_threshold: consts::DEFAULT_LOWER_THRESHOLD,
            upper_threshold: consts::DEFAULT_UPPER_THRESHOLD,
            kernel_size: consts::DEFAULT_KERNEL_SIZE,
            smoothing_std_dev: consts::DEFAULT_SMOOTHING_STD_DEV,
        }
    }
}

impl PipelineParams {
    /// 构建并校验管线参数.
    ///
    /// 要求 `lower <= upper` (允许相等, 此时恰好选中单一强度),
    /// `kernel_size` 为正奇数, `smoothing_std_dev` 非负且有限.
    pub fn new(
        lower: f64,
        upper: f64,
        kernel_size: usize,
        smoothing_std_dev: f64,
    ) -> Result<Self, PipelineError> {
        if !(lower <= upper) {
            return Err(PipelineError::InvalidRange(lower, upper));
        }
        if kernel_size == 0 || kernel_size % 2 == 0 {
            return Err(PipelineError::InvalidKernel(kernel_size));
        }
        if !smoothing_std_dev.is_finite() || smoothing_std_dev < 0.0 {
            return Err(PipelineError::InvalidSigma(smoothing_std_dev));
        }
        Ok(Self {
            lower_threshold: lower,
            upper_threshold: upper,
            kernel_size,
            smoothing_std_dev,
        })
    }

    /// 分割强度区间下限.
    #[inline]
    pub fn lower_threshold(&self) -> f64 {
        self.lower_threshold
    }

    /// 分割强度区间上限.
    #[inline]
    pub fn upper_threshold(&self) -> f64 {
        self.upper_threshold
    }

    /// 闭运算立方结构元边长.
    #[inline]
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// 高斯平滑标准差, 以体素为单位.
    #[inline]
    pub fn smoothing_std_dev(&self) -> f64 {
        self.smoothing_std_dev
    }
}

/// 管线向观察者广播的事件. 只在一次运行完整成功 (或失败) 后发出.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// 体数据维度变更, 按 `(z, h, w)` 次序.
    DimensionsChanged(Idx3d),

    /// 封闭体积变更, 以立方毫米为单位.
    VolumeChanged(f64),

    /// 总表面积变更, 以平方毫米为单位.
    SurfaceAreaChanged(f64),

    /// 模型加载完成标志变更.
    ModelLoadedChanged(bool),

    /// 新一轮逐切片体素统计可用.
    VoxelDataUpdated(Arc<SliceCounts>),

    /// 一次加载或管线运行失败. 上一次成功发布的结果保持不变.
    RunFailed(PipelineError),
}

/// 同步执行一次完整管线: 分割 -> 闭运算 -> 高斯平滑 -> 等值面 -> 度量.
///
/// 这是管线的纯计算核心, 不涉及线程与发布. 编排器与测试共用该入口.
pub fn execute(volume: &Volume, params: &PipelineParams) -> (Mesh, MeshMetrics) {
    let mask = segment::threshold_band(volume, params.lower_threshold, params.upper_threshold);
    let closed = morph::close(&mask, params.kernel_size);
    let field = morph::gaussian_smooth(&closed.into_field(), params.smoothing_std_dev);
    let mesh = surface::extract_isosurface(&field, consts::DEFAULT_ISO_VALUE, volume.pix_dim());
    let metrics = metrics::measure(&mesh, volume.shape());
    (mesh, metrics)
}

/// 一次成功运行发布的结果. (度量, 网格) 整体替换, 从不部分更新.
#[derive(Debug, Clone)]
struct Published {
    run_id: u64,
    generation: Generation,
    metrics: MeshMetrics,
    mesh: Arc<Mesh>,
}

/// 编排器与其工作线程共享的状态.
#[derive(Debug)]
struct Shared {
    store: Arc<VolumeStore>,
    params: Mutex<PipelineParams>,
    counting_threshold: Mutex<f64>,
    slot: Mutex<Option<Published>>,
    browser: Mutex<SliceBrowser>,
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
    run_seq: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    /// 向所有存活的订阅者广播事件, 顺带剔除已断开的订阅者.
    fn emit(&self, ev: PipelineEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(ev.clone()).is_ok());
    }

    /// 报告一次失败: 记录日志并广播 [`PipelineEvent::RunFailed`].
    fn fail(&self, err: PipelineError) {
        warn!("管线失败: {err:?}");
        self.emit(PipelineEvent::RunFailed(err));
    }
}

/// 在工作线程上执行 `f`, 并登记其 join handle.
fn spawn_worker<F>(shared: &Arc<Shared>, f: F)
where
    F: FnOnce(Arc<Shared>) + Send + 'static,
{
    let cloned = shared.clone();
    let handle = thread::spawn(move || f(cloned));
    shared.workers.lock().unwrap().push(handle);
}

/// 工作线程体: 执行整条管线并按 (代数, 运行序号) 决定是否发布.
fn run_pipeline(shared: &Arc<Shared>) {
    let Some((volume, generation)) = shared.store.snapshot() else {
        shared.fail(PipelineError::NoVolumeLoaded);
        return;
    };
    let params = *shared.params.lock().unwrap();
    let run_id = shared.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("管线运行 #{run_id} 开始 (第 {generation} 代)");

    let (mesh, metrics) = execute(&volume, &params);

    {
        let mut slot = shared.slot.lock().unwrap();
        if shared.store.generation() != generation {
            debug!("体数据已更新, 丢弃运行 #{run_id} 的结果");
            return;
        }
        if slot.as_ref().is_some_and(|p| p.run_id > run_id) {
            debug!("已有更新的运行完成, 丢弃运行 #{run_id} 的结果");
            return;
        }
        *slot = Some(Published {
            run_id,
            generation,
            metrics: metrics.clone(),
            mesh: Arc::new(mesh),
        });
    }

    shared.emit(PipelineEvent::DimensionsChanged(metrics.shape));
    shared.emit(PipelineEvent::VolumeChanged(metrics.enclosed_volume));
    shared.emit(PipelineEvent::SurfaceAreaChanged(metrics.surface_area));
    shared.emit(PipelineEvent::ModelLoadedChanged(true));
}

/// 工作线程体: 对当前体数据整体预计算逐切片统计.
fn run_slice_analysis(shared: &Arc<Shared>) {
    let Some((volume, generation)) = shared.store.snapshot() else {
        warn!("尚未加载体数据, 跳过切片统计");
        return;
    };
    let threshold = *shared.counting_threshold.lock().unwrap();
    let counts = Arc::new(SliceCounts::analyze(&volume, threshold));

    let mut browser = shared.browser.lock().unwrap();
    if shared.store.generation() != generation {
        debug!("体数据已更新, 丢弃第 {generation} 代切片统计");
        return;
    }
    browser.attach(counts.clone());
    drop(browser);

    shared.emit(PipelineEvent::VoxelDataUpdated(counts));
}

/// 管线编排器.
///
/// 持有体数据仓库的引用, 在工作线程上顺序执行各阶段;
/// 新加载会使尚在途的旧代计算结果被静默丢弃 (不强行中断).
/// 所有工作线程的 join handle 都被保留, [`Self::wait_idle`]
/// 可以等待它们结束并捕获 panic.
#[derive(Debug)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl Pipeline {
    /// 以默认参数创建编排器. `store` 由调用方显式构建并注入.
    #[inline]
    pub fn new(store: Arc<VolumeStore>) -> Self {
        Self::with_params(store, PipelineParams::default())
    }

    /// 以给定参数创建编排器.
    pub fn with_params(store: Arc<VolumeStore>, params: PipelineParams) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                params: Mutex::new(params),
                counting_threshold: Mutex::new(consts::DEFAULT_COUNTING_THRESHOLD),
                slot: Mutex::new(None),
                browser: Mutex::new(SliceBrowser::new()),
                subscribers: Mutex::new(Vec::new()),
                run_seq: AtomicU64::new(0),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 获取注入的体数据仓库.
    #[inline]
    pub fn store(&self) -> &Arc<VolumeStore> {
        &self.shared.store
    }

    /// 订阅管线事件. 每个订阅者获得独立的接收端.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// 获取当前管线参数.
    #[inline]
    pub fn params(&self) -> PipelineParams {
        *self.shared.params.lock().unwrap()
    }

    /// 获取最近一次成功运行发布的度量. 尚无成功运行时返回 `None`.
    pub fn metrics(&self) -> Option<MeshMetrics> {
        self.shared
            .slot
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.metrics.clone())
    }

    /// 获取最近一次成功运行发布的网格. 尚无成功运行时返回 `None`.
    pub fn mesh(&self) -> Option<Arc<Mesh>> {
        self.shared.slot.lock().unwrap().as_ref().map(|p| p.mesh.clone())
    }

    /// 获取最近一次发布所对应的体数据代数.
    pub fn published_generation(&self) -> Option<Generation> {
        self.shared.slot.lock().unwrap().as_ref().map(|p| p.generation)
    }

    /// 异步加载 nii 文件并启动整条管线与切片统计.
    ///
    /// 解码失败通过 [`PipelineEvent::RunFailed`] 报告,
    /// 此时上一次成功发布的结果与统计保持不变.
    pub fn load_volume<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        spawn_worker(&self.shared, move |shared| match Volume::open(&path) {
            Ok(volume) => load_decoded_inner(&shared, volume),
            Err(e) => shared.fail(e),
        });
    }

    /// 接收一个外部解码器产出的体数据: 当场发布 (保证多次调用的发布次序
    /// 与调用次序一致), 随后异步启动整条管线与切片统计.
    pub fn load_decoded(&self, volume: Volume) {
        load_decoded_inner(&self.shared, volume);
    }

    /// 校验并更新管线参数, 成功后触发一次全新运行.
    ///
    /// 校验失败时返回 `Err`, 管线不会运行,
    /// 已发布的度量保持不变.
    pub fn update_params(
        &self,
        lower: f64,
        upper: f64,
        kernel_size: usize,
        smoothing_std_dev: f64,
    ) -> Result<(), PipelineError> {
        let params = PipelineParams::new(lower, upper, kernel_size, smoothing_std_dev)?;
        *self.shared.params.lock().unwrap() = params;

        if self.shared.store.get().is_some() {
            spawn_worker(&self.shared, |shared| run_pipeline(&shared));
        } else {
            warn!("尚未加载体数据, 参数已记录但管线不运行");
        }
        Ok(())
    }

    /// 以当前参数触发一次全新管线运行.
    pub fn run_now(&self) -> Result<(), PipelineError> {
        if self.shared.store.get().is_none() {
            return Err(PipelineError::NoVolumeLoaded);
        }
        spawn_worker(&self.shared, |shared| run_pipeline(&shared));
        Ok(())
    }

    /// 更新切片计数门限并重新预计算逐切片统计.
    /// 非有限值被忽略 (仅记录警告).
    pub fn set_counting_threshold(&self, threshold: f64) {
        if !threshold.is_finite() {
            warn!("忽略非有限计数门限 {threshold}");
            return;
        }
        *self.shared.counting_threshold.lock().unwrap() = threshold;

        if self.shared.store.get().is_some() {
            self.shared.browser.lock().unwrap().reset();
            spawn_worker(&self.shared, |shared| run_slice_analysis(&shared));
        }
    }

    /// 获取当前计数门限.
    #[inline]
    pub fn counting_threshold(&self) -> f64 {
        *self.shared.counting_threshold.lock().unwrap()
    }

    /// 响应一次滑块交互, 返回选中切片的 (切片索引, 体素计数) 对.
    ///
    /// 统计尚未就绪时返回 `None` (配一条警告), 属于可恢复情况.
    pub fn on_slice_selected(&self, raw: f64) -> Option<(usize, usize)> {
        let ans = self.shared.browser.lock().unwrap().select(raw);
        if ans.is_none() {
            warn!("切片统计尚未就绪, 忽略滑块值 {raw}");
        }
        ans
    }

    /// 获取当前代的逐切片统计. 预计算未完成时返回 `None`.
    pub fn slice_counts(&self) -> Option<Arc<SliceCounts>> {
        self.shared.browser.lock().unwrap().counts().cloned()
    }

    /// 等待所有已登记的工作线程结束. 工作线程的 panic 在此被捕获并记录,
    /// 不会传播到调用方.
    pub fn wait_idle(&self) {
        loop {
            let drained: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.shared.workers.lock().unwrap());
            if drained.is_empty() {
                break;
            }
            for handle in drained {
                if let Err(e) = handle.join() {
                    warn!("工作线程 panic: {e:?}");
                }
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // 不把游离线程留在进程里.
        self.wait_idle();
    }
}

/// 发布体数据, 随后并行启动管线运行与切片统计.
fn load_decoded_inner(shared: &Arc<Shared>, volume: Volume) {
    let generation = shared.store.publish(volume);
    debug!("第 {generation} 代体数据已进入仓库");

    // 旧统计立即作废, 浏览器回到 Idle 态直至新统计就绪.
    shared.browser.lock().unwrap().reset();

    spawn_worker(shared, |shared| run_pipeline(&shared));
    spawn_worker(shared, |shared| run_slice_analysis(&shared));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::f64::consts::PI;

    fn flat_volume(shape: Idx3d, value: f32) -> Volume {
        Volume::synthetic(Array3::from_elem(shape, value), [1.0, 1.0, 1.0])
    }

    /// 半径 `r` 的实心球, 球内强度 100, 球外 0.
    fn sphere_volume(n: usize, r: f64) -> Volume {
        let c = (n as f64 - 1.0) / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(z, h, w)| {
            let (dx, dy, dz) = (w as f64 - c, h as f64 - c, z as f64 - c);
            if (dx * dx + dy * dy + dz * dz).sqrt() < r {
                100.0
            } else {
                0.0
            }
        });
        Volume::synthetic(data, [1.0, 1.0, 1.0])
    }

    #[test]
    fn test_params_validation() {
        assert!(PipelineParams::new(50.0, 800.0, 5, 1.0).is_ok());
        assert!(PipelineParams::new(50.0, 50.0, 1, 0.0).is_ok());

        assert_eq!(
            PipelineParams::new(800.0, 50.0, 5, 1.0),
            Err(PipelineError::InvalidRange(800.0, 50.0))
        );
        // NaN 区间也是非法区间 (注意 NaN != NaN, 不能用等值断言).
        assert!(matches!(
            PipelineParams::new(f64::NAN, 50.0, 5, 1.0),
            Err(PipelineError::InvalidRange(_, _))
        ));
        assert_eq!(
            PipelineParams::new(0.0, 1.0, 4, 1.0),
            Err(PipelineError::InvalidKernel(4))
        );
        assert_eq!(
            PipelineParams::new(0.0, 1.0, 0, 1.0),
            Err(PipelineError::InvalidKernel(0))
        );
        assert_eq!(
            PipelineParams::new(0.0, 1.0, 5, -1.0),
            Err(PipelineError::InvalidSigma(-1.0))
        );
    }

    #[test]
    fn test_run_now_without_volume() {
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        assert_eq!(pipeline.run_now(), Err(PipelineError::NoVolumeLoaded));
        assert_eq!(pipeline.metrics(), None);
    }

    #[test]
    fn test_end_to_end_flat_zero_volume() {
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        let rx = pipeline.subscribe();

        pipeline.load_decoded(flat_volume((4, 4, 4), 0.0));
        pipeline.wait_idle();

        // 全零体数据在 (50, 800) 区间下: 空网格, 零度量.
        let m = pipeline.metrics().unwrap();
        assert_eq!(m.shape, (4, 4, 4));
        assert_eq!(m.enclosed_volume, 0.0);
        assert_eq!(m.surface_area, 0.0);
        assert!(pipeline.mesh().unwrap().is_empty());

        // 切片统计: 全零.
        let sc = pipeline.slice_counts().unwrap();
        assert_eq!(sc.len(), 4);
        assert_eq!(sc.total(), 0);
        assert_eq!(pipeline.on_slice_selected(2.7), Some((2, 0)));

        // 事件: 维度先于加载完成标志; 切片统计事件也已发出.
        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        let dims_at = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::DimensionsChanged((4, 4, 4))))
            .unwrap();
        let loaded_at = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::ModelLoadedChanged(true)))
            .unwrap();
        assert!(dims_at < loaded_at);
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::VoxelDataUpdated(_))));
    }

    #[test]
    fn test_invalid_range_preserves_metrics() {
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        pipeline.load_decoded(flat_volume((4, 4, 4), 0.0));
        pipeline.wait_idle();
        let before = pipeline.metrics().unwrap();

        assert_eq!(
            pipeline.update_params(800.0, 50.0, 5, 1.0),
            Err(PipelineError::InvalidRange(800.0, 50.0))
        );
        pipeline.wait_idle();

        // 管线未运行, 参数与度量原样保留.
        assert_eq!(pipeline.metrics().unwrap(), before);
        assert_eq!(pipeline.params(), PipelineParams::default());
    }

    #[test]
    fn test_newer_load_supersedes_older() {
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        pipeline.load_decoded(flat_volume((4, 4, 4), 0.0));
        pipeline.load_decoded(flat_volume((3, 5, 6), 0.0));
        pipeline.wait_idle();

        // 无论两轮运行以何种先后完成, 发布的必须是最新一代的结果.
        assert_eq!(pipeline.published_generation(), Some(2));
        assert_eq!(pipeline.metrics().unwrap().shape, (3, 5, 6));
        assert_eq!(pipeline.slice_counts().unwrap().len(), 3);
    }

    /// 12^3 体数据, 中央 \[4, 8) 放一个 4^3 的强度 100 实心块.
    fn block_volume() -> Volume {
        let data = Array3::from_shape_fn((12, 12, 12), |(z, h, w)| {
            if (4..8).contains(&z) && (4..8).contains(&h) && (4..8).contains(&w) {
                100.0
            } else {
                0.0
            }
        });
        Volume::synthetic(data, [1.0, 1.0, 1.0])
    }

    #[test]
    fn test_update_params_reruns_pipeline() {
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        pipeline.load_decoded(block_volume());
        pipeline.wait_idle();
        let full = pipeline.metrics().unwrap();
        assert!(full.enclosed_volume > 0.0);
        assert!(full.surface_area > 0.0);

        // 把区间挪到 100 以上, 分割结果变空.
        pipeline.update_params(200.0, 800.0, 5, 1.0).unwrap();
        pipeline.wait_idle();
        let empty = pipeline.metrics().unwrap();
        assert_eq!(empty.enclosed_volume, 0.0);
        assert_eq!(empty.surface_area, 0.0);
    }

    #[test]
    fn test_sphere_phantom_end_to_end() {
        let (n, r) = (41usize, 10.0f64);
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        pipeline
            .update_params(50.0, 800.0, 3, 1.0)
            .expect("合法参数");
        pipeline.load_decoded(sphere_volume(n, r));
        pipeline.wait_idle();

        let m = pipeline.metrics().unwrap();

        // 平滑核截断半径为 2 体素, 等值面最多外扩约 3 体素;
        // 体积与表面积都应落在以此为界的解析范围内.
        let vol = |r: f64| 4.0 / 3.0 * PI * r.powi(3);
        let area = |r: f64| 4.0 * PI * r * r;
        assert!(m.enclosed_volume > 0.8 * vol(r), "体积过小: {}", m.enclosed_volume);
        assert!(m.enclosed_volume < vol(r + 3.6), "体积过大: {}", m.enclosed_volume);
        assert!(m.surface_area > 0.8 * area(r), "表面积过小: {}", m.surface_area);
        assert!(m.surface_area < area(r + 3.6), "表面积过大: {}", m.surface_area);

        // 切片统计与暴力全量计数交叉验证.
        let sc = pipeline.slice_counts().unwrap();
        let store = pipeline.store().clone();
        let volume = store.get().unwrap();
        let brute = volume.data().iter().filter(|&&p| (p as f64) > 50.0).count();
        assert_eq!(sc.len(), n);
        assert_eq!(sc.total(), brute);

        // 球心切片是计数峰值.
        assert_eq!(sc.peak().map(|(z, _)| z), Some(n / 2));
    }

    #[test]
    fn test_counting_threshold_change_recomputes() {
        let pipeline = Pipeline::new(Arc::new(VolumeStore::new()));
        pipeline.load_decoded(flat_volume((3, 2, 2), 60.0));
        pipeline.wait_idle();
        assert_eq!(pipeline.slice_counts().unwrap().total(), 12);

        pipeline.set_counting_threshold(70.0);
        pipeline.wait_idle();
        let sc = pipeline.slice_counts().unwrap();
        assert_eq!(sc.threshold(), 70.0);
        assert_eq!(sc.total(), 0);
    }
}
