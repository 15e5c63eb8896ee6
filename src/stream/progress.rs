//! 进度上报
//!
//! 字节级进度换算为百分比后回调给任务。任务的每次进度修改都会写穿到
//! 持久化层，因此这里只在整数百分比变化时才回调，避免每个数据块都落盘。

use crate::errors::Result;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 进度回调，参数为 0-100 的百分比
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

/// 空进度回调
pub fn noop_sink() -> ProgressSink {
    Arc::new(|_| {})
}

/// 字节进度上报器
///
/// 线程安全，使用 CAS 保证同一百分比只回调一次
pub struct ProgressReporter {
    total: u64,
    done: AtomicU64,
    /// 上次回调的百分比，-1 表示尚未回调
    last_percent: AtomicI64,
    sink: ProgressSink,
}

impl ProgressReporter {
    pub fn new(total: u64, sink: ProgressSink) -> Self {
        Self {
            total,
            done: AtomicU64::new(0),
            last_percent: AtomicI64::new(-1),
            sink,
        }
    }

    /// 已处理字节数
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// 增加已处理字节数
    pub fn advance(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        self.emit(self.percent_of(done));
    }

    /// 强制上报 100%
    pub fn finish(&self) {
        self.emit(100);
    }

    fn percent_of(&self, done: u64) -> i64 {
        if self.total == 0 {
            return 0;
        }
        ((done.saturating_mul(100)) / self.total).min(100) as i64
    }

    fn emit(&self, percent: i64) {
        let last = self.last_percent.load(Ordering::Relaxed);
        if percent <= last {
            return;
        }
        if self
            .last_percent
            .compare_exchange(last, percent, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            (self.sink)(percent as f64);
        }
    }
}

/// 带进度的流拷贝
///
/// 返回拷贝的总字节数
pub async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    reporter: &ProgressReporter,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        reporter.advance(n as u64);
    }
    writer.flush().await?;
    reporter.finish();
    Ok(total)
}
