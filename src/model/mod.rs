// 数据模型

pub mod object;
pub mod storage;

pub use object::{Link, LinkArgs, Obj, OtherArgs};
pub use storage::{Storage, STATUS_DISABLED, STATUS_WORK};
