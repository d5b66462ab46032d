//! 封闭网格的几何度量.

use itertools::izip;

use crate::pipeline::surface::Mesh;
use crate::{Idx3d, Point3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一次管线运行产出的度量快照. 每次运行整体替换, 从不部分更新.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeshMetrics {
    /// 源体数据维度, 按 `(z, h, w)` 次序.
    pub shape: Idx3d,

    /// 网格所围体积, 以立方毫米为单位.
    pub enclosed_volume: f64,

    /// 网格总表面积, 以平方毫米为单位.
    pub surface_area: f64,
}

#[inline]
fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: Point3, b: Point3) -> f64 {
    izip!(a, b).map(|(x, y)| x * y).sum()
}

#[inline]
fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn norm(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

/// 计算封闭网格所围的体积.
///
/// 按散度定理对每个三角形与坐标原点构成的四面体求带符号体积
/// `(1/6) * (p0 × p1) · p2` 并求和. 三角表的绕向全表一致,
/// 因此和的符号整体相同; 最终取一次绝对值, 使结果不依赖绕向的朝向.
/// 对封闭网格该值与原点的选取无关.
pub fn enclosed_volume(mesh: &Mesh) -> f64 {
    let signed: f64 = mesh
        .iter()
        .map(|&[p0, p1, p2]| dot(cross(p0, p1), p2) / 6.0)
        .sum();
    signed.abs()
}

/// 计算网格的总表面积: 对每个三角形求 `0.5 * |(p1 - p0) × (p2 - p0)|` 并求和.
pub fn surface_area(mesh: &Mesh) -> f64 {
    mesh.iter()
        .map(|&[p0, p1, p2]| 0.5 * norm(cross(sub(p1, p0), sub(p2, p0))))
        .sum()
}

/// 一次性计算全部度量.
#[inline]
pub fn measure(mesh: &Mesh, shape: Idx3d) -> MeshMetrics {
    MeshMetrics {
        shape,
        enclosed_volume: enclosed_volume(mesh),
        surface_area: surface_area(mesh),
    }
}
