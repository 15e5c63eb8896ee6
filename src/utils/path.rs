//! 虚拟路径工具函数
//!
//! 所有挂载路径和虚拟路径在使用前都要经过 `fix_and_clean_path` 规范化：
//! 单个前导斜杠、无末尾斜杠（根路径 `/` 除外）、消除 `.` / `..` / 重复斜杠

/// 负载均衡存储的挂载路径后缀，例如 `/movies.balance1`
pub const BALANCE_SUFFIX: &str = ".balance";

/// 规范化路径
///
/// - 反斜杠统一为 `/`
/// - 补齐前导 `/`
/// - 去掉重复斜杠、`.`，处理 `..`（不会越过根）
/// - 去掉末尾斜杠
pub fn fix_and_clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// 路径末尾补 `/`
pub fn path_add_separator_suffix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// 判断 `sub_path` 是否等于 `path` 或位于其之下
pub fn is_sub_path(path: &str, sub_path: &str) -> bool {
    let path = fix_and_clean_path(path);
    let sub_path = fix_and_clean_path(sub_path);
    path == sub_path || sub_path.starts_with(&path_add_separator_suffix(&path))
}

/// 去掉负载均衡后缀，得到对外可见的挂载路径
///
/// `/a/b.balance2` => `/a/b`
pub fn get_actual_mount_path(mount_path: &str) -> &str {
    match mount_path.find(BALANCE_SUFFIX) {
        Some(i) => &mount_path[..i],
        None => mount_path,
    }
}

/// 是否为负载均衡存储
pub fn is_balance(mount_path: &str) -> bool {
    mount_path.contains(BALANCE_SUFFIX)
}

/// 路径深度：`path + "/"` 中的斜杠数
///
/// `/` => 1，`/a` => 2，`/a/b` => 3
pub fn depth(path: &str) -> usize {
    path_add_separator_suffix(path).matches('/').count()
}

/// 拼接路径并规范化
pub fn join_path(base: &str, name: &str) -> String {
    fix_and_clean_path(&format!("{}/{}", base, name))
}

/// 拆分为 (父目录, 名称)
///
/// `/a/b/c` => (`/a/b`, `c`)，`/` => (`/`, ``)
pub fn split_path(path: &str) -> (String, String) {
    let path = fix_and_clean_path(path);
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
        None => ("/".to_string(), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_and_clean_path() {
        assert_eq!(fix_and_clean_path(""), "/");
        assert_eq!(fix_and_clean_path("/"), "/");
        assert_eq!(fix_and_clean_path("a/b/"), "/a/b");
        assert_eq!(fix_and_clean_path("//a//b/./c/"), "/a/b/c");
        assert_eq!(fix_and_clean_path("/a/../../b"), "/b");
        assert_eq!(fix_and_clean_path("\\a\\b"), "/a/b");
    }

    #[test]
    fn test_is_sub_path() {
        assert!(is_sub_path("/", "/a"));
        assert!(is_sub_path("/a", "/a"));
        assert!(is_sub_path("/a", "/a/b/c"));
        assert!(!is_sub_path("/a", "/ab"));
        assert!(!is_sub_path("/a/b", "/a"));
    }

    #[test]
    fn test_actual_mount_path_and_depth() {
        assert_eq!(get_actual_mount_path("/a/b.balance1"), "/a/b");
        assert_eq!(get_actual_mount_path("/a/b"), "/a/b");
        assert!(is_balance("/a.balance"));
        assert_eq!(depth("/"), 1);
        assert_eq!(depth("/a"), 2);
        assert_eq!(depth("/a/b"), 3);
    }

    #[test]
    fn test_split_and_join() {
        assert_eq!(split_path("/a/b/c"), ("/a/b".to_string(), "c".to_string()));
        assert_eq!(split_path("/a"), ("/".to_string(), "a".to_string()));
        assert_eq!(split_path("/"), ("/".to_string(), "".to_string()));
        assert_eq!(join_path("/a/", "b"), "/a/b");
        assert_eq!(join_path("/", "b"), "/b");
    }
}
