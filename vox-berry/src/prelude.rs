//! 🫐 常用功能一站式导入.

pub use crate::{Idx2d, Idx3d, Point3, Triangle};

pub use crate::{Generation, GrayWindow, PipelineError, ScanSlice, Volume, VolumeStore};

pub use crate::pipeline::{
    execute, Mask, Mesh, MeshMetrics, Pipeline, PipelineEvent, PipelineParams,
};

pub use crate::stats::{BrowserState, SliceBrowser, SliceCounts};

pub use crate::consts::mask::{IN, OUT};
