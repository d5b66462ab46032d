//! 体数据仓库: 单写多读, 带代数.

use std::sync::{Arc, RwLock};

use log::debug;

use crate::Volume;

/// 单调递增的体数据代数. 每发布一个新体数据, 代数加一.
/// 用于丢弃过期的并发计算结果.
pub type Generation = u64;

/// 仓库内部状态. 整个结构在一把读写锁下原子替换.
#[derive(Debug, Default)]
struct Inner {
    volume: Option<Arc<Volume>>,
    generation: Generation,
}

/// 当前已解码体数据的唯一属主.
///
/// 写者 (新一次加载) 独占地发布新体数据; 读者 (管线各阶段、切片统计)
/// 以共享方式获取一致快照, 并在一次运行期间持有该快照.
/// 读者绝不会观察到构建了一半的体数据.
///
/// 该结构没有全局单例. 调用方显式创建实例并注入给管线与统计器,
/// 多个互不相干的仓库可以共存.
#[derive(Debug, Default)]
pub struct VolumeStore {
    inner: RwLock<Inner>,
}

impl VolumeStore {
    /// 创建空仓库. 初始代数为 0, 表示尚未加载任何体数据.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 独占地发布新体数据, 整体替换旧值, 并返回新的代数.
    pub fn publish(&self, volume: Volume) -> Generation {
        // 锁中毒只可能来自其它持锁线程 panic, 此时继续运行没有意义.
        let mut inner = self.inner.write().unwrap();
        inner.volume = Some(Arc::new(volume));
        inner.generation += 1;
        debug!("已发布第 {} 代体数据", inner.generation);
        inner.generation
    }

    /// 获取当前体数据. 仓库为空时返回 `None`.
    #[inline]
    pub fn get(&self) -> Option<Arc<Volume>> {
        self.inner.read().unwrap().volume.clone()
    }

    /// 同时获取当前体数据与其代数, 保证两者来自同一次发布.
    /// 仓库为空时返回 `None`.
    #[inline]
    pub fn snapshot(&self) -> Option<(Arc<Volume>, Generation)> {
        let inner = self.inner.read().unwrap();
        inner.volume.clone().map(|v| (v, inner.generation))
    }

    /// 获取当前代数. 0 表示尚未加载任何体数据.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.inner.read().unwrap().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::sync::mpsc;

    fn uniform_volume(value: f32) -> Volume {
        Volume::synthetic(Array3::from_elem((4, 4, 4), value), [1.0, 1.0, 1.0])
    }

    #[test]
    fn test_empty_store() {
        let store = VolumeStore::new();
        assert!(store.get().is_none());
        assert!(store.snapshot().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_publish_bumps_generation() {
        let store = VolumeStore::new();
        assert_eq!(store.publish(uniform_volume(1.0)), 1);
        assert_eq!(store.publish(uniform_volume(2.0)), 2);

        let (vol, gen) = store.snapshot().unwrap();
        assert_eq!(gen, 2);
        assert_eq!(vol[(0, 0, 0)], 2.0);
    }

    /// 并发写入与读取下, 读者不应观察到 "混合" 的体数据.
    /// 每个发布的体数据都是常量场, 因此任何快照内部必须完全一致.
    #[test]
    fn test_concurrent_set_get_never_tears() {
        let store = Arc::new(VolumeStore::new());
        store.publish(uniform_volume(0.0));

        let workers = num_cpus::get().max(4);
        let pool = threadpool::ThreadPool::new(workers);
        let (tx, rx) = mpsc::channel::<bool>();

        // 写者: 各自发布若干常量体数据.
        for t in 0..4u32 {
            let store = store.clone();
            let tx = tx.clone();
            pool.execute(move || {
                for i in 0..50u32 {
                    store.publish(uniform_volume((t * 1000 + i) as f32));
                }
                tx.send(true).unwrap();
            });
        }

        // 读者: 每次快照都必须是内部一致的常量场.
        for _ in 0..4 {
            let store = store.clone();
            let tx = tx.clone();
            pool.execute(move || {
                let mut ok = true;
                for _ in 0..200 {
                    let (vol, _) = store.snapshot().unwrap();
                    let first = vol[(0, 0, 0)];
                    ok &= vol.data().iter().all(|&p| p == first);
                }
                tx.send(ok).unwrap();
            });
        }

        drop(tx);
        assert!(rx.iter().take(8).all(|ok| ok));
        pool.join();
    }
}
