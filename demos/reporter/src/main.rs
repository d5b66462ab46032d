//! 无头管线报告器.
//!
//! 加载一个 nii 体数据文件, 运行完整管线 (分割 -> 闭运算 -> 平滑 ->
//! 等值面 -> 度量) 与逐切片统计, 然后把结果打印到标准输出.
//! 可选地把计数峰值切片导出为灰度 PNG.
//!
//! 用法: `reporter <scan.nii[.gz]> [slice.png]`
//!
//! 分割区间可通过环境变量覆盖:
//!
//! 1. 若 `$VOX_LOWER_THRESHOLD` / `$VOX_UPPER_THRESHOLD` 非空, 则采用其值;
//! 2. 否则, 采用库内默认值 (50, 800).

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use vox_berry::consts::{DEFAULT_LOWER_THRESHOLD, DEFAULT_UPPER_THRESHOLD};
use vox_berry::prelude::*;

/// 从环境变量读取 f64, 未设置时回落到默认值. 解析失败直接 panic.
fn threshold_from_env(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(s) => s.parse().expect("环境变量必须是合法浮点数"),
        Err(_) => default,
    }
}

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Info).expect("日志初始化失败");

    let mut args = env::args().skip(1);
    let Some(scan_path) = args.next() else {
        eprintln!("用法: reporter <scan.nii[.gz]> [slice.png]");
        return ExitCode::FAILURE;
    };
    let png_path = args.next();

    let lower = threshold_from_env("VOX_LOWER_THRESHOLD", DEFAULT_LOWER_THRESHOLD);
    let upper = threshold_from_env("VOX_UPPER_THRESHOLD", DEFAULT_UPPER_THRESHOLD);

    let store = Arc::new(VolumeStore::new());
    let pipeline = Pipeline::new(store.clone());
    if let Err(e) = pipeline.update_params(lower, upper, 5, 1.0) {
        eprintln!("非法分割区间 [{lower}, {upper}]: {e:?}");
        return ExitCode::FAILURE;
    }

    let rx = pipeline.subscribe();
    pipeline.load_volume(scan_path.as_str());
    pipeline.wait_idle();

    for ev in rx.try_iter() {
        if let PipelineEvent::RunFailed(e) = ev {
            eprintln!("加载或管线运行失败: {e:?}");
            return ExitCode::FAILURE;
        }
    }

    let Some(m) = pipeline.metrics() else {
        eprintln!("管线没有产出度量");
        return ExitCode::FAILURE;
    };
    let (z, h, w) = m.shape;
    let triangles = pipeline.mesh().map_or(0, |mesh| mesh.len());

    const S4: &str = "    ";
    println!("Pipeline report for `{scan_path}`:");
    println!("{S4}Dimensions (w, h, z): {w} x {h} x {z}");
    println!("{S4}Segmentation band: [{lower}, {upper}]");
    println!("{S4}Triangles: {triangles}");
    println!("{S4}Enclosed volume: {:.3} mm^3", m.enclosed_volume);
    println!("{S4}Surface area: {:.3} mm^2", m.surface_area);

    let Some(counts) = pipeline.slice_counts() else {
        eprintln!("切片统计没有就绪");
        return ExitCode::FAILURE;
    };
    println!("{S4}Voxels above {}: {}", counts.threshold(), counts.total());

    // 像滑块那样走几个位置.
    for raw in [0.0, (z as f64 - 1.0) / 2.0, z as f64 - 1.0] {
        if let Some((index, count)) = pipeline.on_slice_selected(raw) {
            println!("{S4}Slice {index}: {count} voxels above threshold");
        }
    }

    if let Some(png) = png_path {
        let (peak, _) = counts.peak().expect("切片统计非空");
        let volume = store.get().expect("体数据已发布");
        let (lo, hi) = volume.min_max();
        match GrayWindow::from_range(lo, hi) {
            Some(window) => {
                if let Err(e) = volume.slice_at(peak).save_vis(window, &png) {
                    eprintln!("切片导出失败: {e}");
                    return ExitCode::FAILURE;
                }
                println!("{S4}Peak slice {peak} saved to `{png}`");
            }
            None => eprintln!("体数据强度值域退化, 跳过切片导出"),
        }
    }

    ExitCode::SUCCESS
}
