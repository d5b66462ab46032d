#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 3D 体数据 (nii 格式) 的阈值分割、形态学清理、
//! 等值面提取、网格度量与逐切片体素统计功能.
//!
//! 该 crate 目前仅提供 `safe` 接口. 在非期望情况下, 程序会直接 panic,
//! 而不会导致内存错误. As what Rust promises.
//!
//! # 注意
//!
//! 1. 该 crate 只负责已解码体数据的处理. 文件解码仅支持 nii (`.nii` /
//!   `.nii.gz`) 格式; 渲染与窗口交互不属于本 crate 的职责.
//! 2. 一次完整的管线运行包括: 阈值分割 -> 闭运算 -> 高斯平滑 ->
//!   marching cubes -> 体积/表面积度量. 各阶段不单独重算,
//!   参数或体数据变更会触发整条管线重跑.
//!
//! # 开发计划
//!
//! ### 体数据结构与 nii 加载 ✅
//!
//! 实现位于 `vox-berry/src/data`.
//!
//! ### 体数据仓库 (单写多读, 带代数) ✅
//!
//! 写者独占发布新体数据, 读者获取一致快照. 代数 (generation)
//! 用于丢弃过期的并发计算结果.
//!
//! 实现位于 `vox-berry/src/data/store.rs`.
//!
//! ### 强度区间分割与三维闭运算 ✅
//!
//! 立方结构元先膨胀后腐蚀, 填补小空洞而不扩张整体边界.
//!
//! 实现位于 `vox-berry/src/pipeline/{segment, morph}.rs`.
//!
//! ### 可分离高斯平滑 ✅
//!
//! 将硬 0/255 掩膜场变为连续标量场, 供插值式等值面提取使用.
//!
//! 实现位于 `vox-berry/src/pipeline/morph.rs`.
//!
//! ### Marching cubes 等值面提取 ✅
//!
//! 标准 256 配置三角表, 沿体素边线性插值, 顶点按体素物理间距缩放.
//!
//! 实现位于 `vox-berry/src/pipeline/surface.rs`.
//!
//! ### 封闭网格几何度量 ✅
//!
//! 散度定理求封闭体积, 叉积求总表面积.
//!
//! 实现位于 `vox-berry/src/pipeline/metrics.rs`.
//!
//! ### 逐切片体素统计与滑块浏览状态机 ✅
//!
//! 每次加载预计算一遍, 之后按索引 O(1) 查询.
//!
//! 实现位于 `vox-berry/src/stats`.
//!
//! ### 管线编排器 ✅
//!
//! 工作线程执行整条管线, 按 (代数, 运行序号) 原子发布结果,
//! 通过事件通道通知观察者.
//!
//! 实现位于 `vox-berry/src/pipeline/mod.rs`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三维空间点, 以毫米为单位.
pub type Point3 = [f64; 3];

/// 无索引三角形, 三个顶点按固定绕向排列.
pub type Triangle = [Point3; 3];

/// 3D 体数据基础数据结构.
mod data;

pub use data::{GrayWindow, ScanSlice, Volume, VolumeStore};

pub use data::store::Generation;

pub mod consts;

mod error;

pub use error::PipelineError;

pub mod pipeline;

pub mod stats;

pub mod prelude;
