// 数据流模块

pub mod progress;
pub mod seekable;

pub use progress::{copy_with_progress, noop_sink, ProgressReporter, ProgressSink};
pub use seekable::{BoxReader, SeekableStream};
