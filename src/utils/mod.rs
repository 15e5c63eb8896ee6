// 公共工具模块

pub mod path;

pub use path::{
    fix_and_clean_path, get_actual_mount_path, is_sub_path, join_path, split_path,
};
