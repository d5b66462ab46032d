use std::ops::{Index, IndexMut};
use std::path::Path;

use itertools::Itertools;
use log::debug;
use ndarray::{Array3, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use ordered_float::OrderedFloat;

use crate::{Idx2d, Idx3d, PipelineError};

pub mod store;

mod slice;
mod window;

pub use slice::ScanSlice;
pub use store::VolumeStore;
pub use window::GrayWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 判断路径扩展名是否是本库接受的 nii 格式.
#[inline]
fn is_nii_path(path: &Path) -> bool {
    let Some(s) = path.to_str() else {
        return false;
    };
    s.ends_with(".nii") || s.ends_with(".nii.gz")
}

/// 已解码的 3D 标量体数据, 包括 header 和体素强度场. 强度值以 `f32` 保存.
///
/// 数据按 `(z, h, w)` 次序索引. 体数据一经发布便不再修改;
/// 新一次加载会产生新的 `Volume` 实体并整体替换旧值.
#[derive(Debug, Clone)]
pub struct Volume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Volume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Volume {
    /// 打开 nii 文件格式的 3D 体数据. `path` 为 `.nii` 或 `.nii.gz`
    /// 文件的本地路径.
    ///
    /// 其它扩展名一律返回 [`PipelineError::UnsupportedFormat`],
    /// 本函数不会嗅探文件内容. 解码失败或解码出的维度非法时返回
    /// [`PipelineError::DecodeFailure`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        if !is_nii_path(path) {
            return Err(PipelineError::UnsupportedFormat(
                path.to_string_lossy().into_owned(),
            ));
        }

        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| PipelineError::DecodeFailure(e.to_string()))?;
        let header = Box::new(obj.header().clone());

        let shape = get_shape_from_header(&header);
        let (z, h, w) = shape;
        if z == 0 || h == 0 || w == 0 {
            return Err(PipelineError::DecodeFailure(format!(
                "非法体数据维度: {shape:?}"
            )));
        }

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|e| PipelineError::DecodeFailure(e.to_string()))?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data = Array3::<f32>::from_shape_vec(shape, data.into_raw_vec()).unwrap();

        debug!("已解码体数据 {path:?}, 维度 {shape:?}");
        Ok(Self { header, data })
    }

    /// 根据裸强度场和体素分辨率直接创建 `Volume` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按照 `(z, h, w)` 次序组织, 且三个维度都必须非零.
    /// 2. `pix_dim` 按照 \[z, h, w\] 格式给出体素分辨率, 以毫米为单位.
    ///
    /// # 注意
    ///
    /// 该方法生成的 header 仅携带维度与分辨率信息,
    /// 因此你应仅将其用于测试与合成数据场景.
    pub fn synthetic(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        let (z, h, w) = data.dim();
        assert!(z >= 1 && h >= 1 && w >= 1, "体数据三个维度都必须非零");

        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        let [pz, ph, pw] = pix_dim;
        header.pixdim = [1.0, pw, ph, pz, 1.0, 1.0, 1.0, 1.0];
        header.intent_name[..4].copy_from_slice(b"synt");

        Self { header, data }
    }

    /// 判断该结构是否是由 [`Self::synthetic`] 手动拼接的.
    pub fn is_synthetic(&self) -> bool {
        self.header.intent_name.starts_with(b"synt")
    }

    /// 获取 header 部分.
    #[inline]
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// 获取数据形状大小, 按 `(z, h, w)` 次序.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        get_shape_from_header(&self.header)
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    pub fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header.pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取 width 方向体素分辨率, 以毫米为单位.
    #[inline]
    pub fn width_mm(&self) -> f64 {
        self.header.pixdim[1] as f64
    }

    /// 获取 height 方向体素分辨率, 以毫米为单位.
    #[inline]
    pub fn height_mm(&self) -> f64 {
        self.header.pixdim[2] as f64
    }

    /// 获取空间方向 (相邻切片的方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn z_mm(&self) -> f64 {
        self.header.pixdim[3] as f64
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    pub fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    pub fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 获取给定位置的体素强度值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx3d) -> Option<f32> {
        self.data.get(pos).copied()
    }

    /// 获取 3D 体数据 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ScanSlice<'_> {
        ScanSlice::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获取能按升序迭代 3D 体数据水平不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ScanSlice> {
        self.data.axis_iter(Axis(0)).map(ScanSlice::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }

    /// 获取全体体素强度的最小值与最大值.
    ///
    /// 如果存在 NaN 体素, 则程序 panic.
    pub fn min_max(&self) -> (f32, f32) {
        use itertools::MinMaxResult::*;

        assert!(self.data.iter().all(|p| !p.is_nan()), "体数据含 NaN");
        match self.data.iter().copied().map(OrderedFloat).minmax() {
            NoElements => unreachable!("体数据维度非零"),
            OneElement(p) => (p.0, p.0),
            MinMax(lo, hi) => (lo.0, hi.0),
        }
    }

    /// 计算全体体素强度的平均值.
    pub fn mean(&self) -> f64 {
        let sum: f64 = self.data.iter().map(|&p| p as f64).sum();
        sum / (self.size() as f64)
    }
}
