//! 三维形态学闭运算与可分离高斯平滑.
//!
//! 立方结构元的膨胀/腐蚀可分解为三个轴向的一维滑窗极值滤波;
//! 高斯平滑同样按轴向分解为三次一维卷积. 边界体素一律按
//! 边缘复制 (clamp) 方式取邻居.

use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

use super::segment::Mask;

/// 对一条 lane 做滑窗极值滤波. `pick` 在窗口内逐元素折叠.
fn extremum_lane(dst: &mut ArrayViewMut1<u8>, src: &ArrayView1<u8>, radius: usize, pick: fn(u8, u8) -> u8) {
    let n = src.len() as isize;
    let r = radius as isize;
    for i in 0..n {
        // 越界邻居按边缘复制处理. 对极值滤波而言, 复制边缘值与
        // 直接跳过越界下标等价.
        let lo = (i - r).max(0) as usize;
        let hi = ((i + r).min(n - 1)) as usize;
        let mut acc = src[lo];
        for j in lo + 1..=hi {
            acc = pick(acc, src[j]);
        }
        dst[i as usize] = acc;
    }
}

/// 沿 `axis` 方向对掩膜数据做一次滑窗极值滤波.
fn filter_axis(src: &Array3<u8>, axis: Axis, radius: usize, pick: fn(u8, u8) -> u8) -> Array3<u8> {
    let mut dst = Array3::zeros(src.dim());
    let zip = Zip::from(dst.lanes_mut(axis)).and(src.lanes(axis));

    #[cfg(feature = "rayon")]
    zip.par_for_each(|mut d, s| extremum_lane(&mut d, &s, radius, pick));
    #[cfg(not(feature = "rayon"))]
    zip.for_each(|mut d, s| extremum_lane(&mut d, &s, radius, pick));

    dst
}

/// 以边长 `kernel_size` 的立方结构元对三个轴依次做滑窗滤波.
fn cubic_filter(m: &Mask, kernel_size: usize, pick: fn(u8, u8) -> u8) -> Mask {
    assert!(kernel_size >= 1 && kernel_size % 2 == 1, "结构元边长必须为正奇数");

    let radius = kernel_size / 2;
    if radius == 0 {
        return m.clone();
    }

    let mut data = m.data().clone();
    for k in 0..3 {
        data = filter_axis(&data, Axis(k), radius, pick);
    }
    Mask::from_raw(data)
}

/// 膨胀: 结构元半径内存在目标体素, 即标记为目标.
#[inline]
pub fn dilate(m: &Mask, kernel_size: usize) -> Mask {
    cubic_filter(m, kernel_size, u8::max)
}

/// 腐蚀: 结构元半径内全为目标体素, 才保留目标标记.
#[inline]
pub fn erode(m: &Mask, kernel_size: usize) -> Mask {
    cubic_filter(m, kernel_size, u8::min)
}

/// 闭运算: 先膨胀再腐蚀.
///
/// 净效果是填补尺寸不超过结构元半径的小空洞与缝隙,
/// 而不使整体掩膜边界向外扩张. 输出维度与输入一致.
#[inline]
pub fn close(m: &Mask, kernel_size: usize) -> Mask {
    erode(&dilate(m, kernel_size), kernel_size)
}

/// 构建归一化的一维高斯核. 空间支撑半径为每轴 `ceil(2 * sigma)` 个体素.
fn build_kernel(sigma: f64) -> Vec<f32> {
    let radius = (2.0 * sigma).ceil() as usize;
    if radius == 0 {
        return vec![1.0];
    }
    let mut kernel = Vec::with_capacity(2 * radius + 1);

    let two_sigma_sq = 2.0 * sigma * sigma;
    for i in 0..=2 * radius {
        let x = i as f64 - radius as f64;
        kernel.push((-x * x / two_sigma_sq).exp());
    }

    let sum: f64 = kernel.iter().sum();
    kernel.iter().map(|&k| (k / sum) as f32).collect()
}

/// 对一条 lane 做一维卷积, 越界下标钳到边缘.
fn convolve_lane(dst: &mut ArrayViewMut1<f32>, src: &ArrayView1<f32>, kernel: &[f32]) {
    let n = src.len() as isize;
    let r = (kernel.len() / 2) as isize;
    for i in 0..n {
        let mut acc = 0.0f32;
        for (k, &kv) in kernel.iter().enumerate() {
            let j = (i + k as isize - r).clamp(0, n - 1);
            acc += src[j as usize] * kv;
        }
        dst[i as usize] = acc;
    }
}

/// 沿 `axis` 方向做一次一维高斯卷积.
fn smooth_axis(src: &Array3<f32>, axis: Axis, kernel: &[f32]) -> Array3<f32> {
    let mut dst = Array3::zeros(src.dim());
    let zip = Zip::from(dst.lanes_mut(axis)).and(src.lanes(axis));

    #[cfg(feature = "rayon")]
    zip.par_for_each(|mut d, s| convolve_lane(&mut d, &s, kernel));
    #[cfg(not(feature = "rayon"))]
    zip.for_each(|mut d, s| convolve_lane(&mut d, &s, kernel));

    dst
}

/// 可分离三维高斯平滑.
///
/// 把硬 0/255 掩膜场变为连续标量场, 供插值式等值面提取使用.
/// `sigma` 以体素为单位; `sigma == 0` 时原样返回. 输出维度与输入一致.
pub fn gaussian_smooth(field: &Array3<f32>, sigma: f64) -> Array3<f32> {
    assert!(sigma >= 0.0 && sigma.is_finite(), "非法高斯标准差");

    let kernel = build_kernel(sigma);
    if kernel.len() == 1 {
        return field.clone();
    }

    let mut out = smooth_axis(field, Axis(0), &kernel);
    out = smooth_axis(&out, Axis(1), &kernel);
    smooth_axis(&out, Axis(2), &kernel)
}
