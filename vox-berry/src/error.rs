//! 运行时错误.

/// 体数据加载与管线运行时错误.
///
/// 所有错误都会被报告给调用者或观察者并记录日志, 不会使进程崩溃.
/// 一次失败的管线运行不会覆盖上一次成功发布的结果.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// 在成功加载体数据之前发起了查询或运行.
    NoVolumeLoaded,

    /// 分割区间非法: 下限大于上限.
    ///
    /// 两个参数依次为当时给出的下限与上限.
    InvalidRange(f64, f64),

    /// 结构元边长非法: 必须为正奇数.
    InvalidKernel(usize),

    /// 高斯标准差非法: 必须非负且有限.
    InvalidSigma(f64),

    /// 文件扩展名不受支持. 本库不会嗅探内容来猜测格式.
    UnsupportedFormat(String),

    /// 文件虽被接受但解码失败, 或解码出的体数据维度非法.
    DecodeFailure(String),
}
