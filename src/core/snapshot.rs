//! 快照数据模型：路径键、内容指纹，以及快照 / 删除记录两种映射

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use std::str::FromStr;

/// 同步根目录下保留的状态目录，永远不参与同步
pub const STATE_DIR: &str = ".sync";

/// 路径键构造失败的原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathKeyError {
    #[error("路径为空")]
    Empty,
    #[error("路径不能包含上级目录: {0}")]
    ParentComponent(String),
    #[error("路径位于保留的 .sync 目录内: {0}")]
    Reserved(String),
    #[error("路径不是有效的 UTF-8: {0}")]
    NonUtf8(String),
}

/// 把本平台的路径分隔符统一为 `/`
///
/// 只有 Windows 上的反斜杠是分隔符；Unix 上它是合法的文件名字符，原样保留。
pub(crate) fn unify_separators(raw: &str) -> Cow<'_, str> {
    if MAIN_SEPARATOR == '\\' {
        Cow::Owned(raw.replace('\\', "/"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// 相对同步根目录的规范化路径（统一使用 `/` 分隔）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathKey(String);

impl PathKey {
    /// 规范化并校验路径
    ///
    /// 去掉开头的 `./` 与 `/`，忽略空段和 `.` 段；Windows 上反斜杠视为 `/`。
    /// 含 `..` 的路径、空路径和保留目录内的路径会被拒绝。
    pub fn new(raw: &str) -> Result<Self, PathKeyError> {
        let unified = unify_separators(raw);
        let mut parts = Vec::new();

        for part in unified.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(PathKeyError::ParentComponent(raw.to_string())),
                p => parts.push(p),
            }
        }

        Self::from_parts(&parts, raw)
    }

    /// 由相对根目录的文件系统路径构造，逐个路径分量转换
    ///
    /// 非 UTF-8 的文件名无法无损表示，直接拒绝。
    pub fn from_relative(relative: &Path) -> Result<Self, PathKeyError> {
        let raw = relative.to_string_lossy();
        let mut parts = Vec::new();

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| PathKeyError::NonUtf8(raw.to_string()))?;
                    parts.push(part);
                }
                Component::ParentDir => {
                    return Err(PathKeyError::ParentComponent(raw.to_string()))
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        Self::from_parts(&parts, &raw)
    }

    fn from_parts(parts: &[&str], raw: &str) -> Result<Self, PathKeyError> {
        match parts.first() {
            None => Err(PathKeyError::Empty),
            Some(&first) if first == STATE_DIR => Err(PathKeyError::Reserved(raw.to_string())),
            Some(_) => Ok(Self(parts.join("/"))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 父目录（根目录下的文件返回 None）
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// 解析为某个根目录下的绝对路径
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PathKey {
    type Error = PathKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PathKey> for String {
    fn from(key: PathKey) -> Self {
        key.0
    }
}

impl FromStr for PathKey {
    type Err = PathKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// 文件完整内容的 BLAKE3 摘要（32 字节，不截断）
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    /// 计算一段内容的指纹
    pub fn of(data: &[u8]) -> Self {
        Self::from(blake3::hash(data))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl From<blake3::Hash> for ContentFingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({})", self.to_hex())
    }
}

impl FromStr for ContentFingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s)
            .map(Self::from)
            .map_err(|e| format!("无效的指纹 {:?}: {}", s, e))
    }
}

impl Serialize for ContentFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 路径 -> 指纹 映射的公共部分
macro_rules! fingerprint_map {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(BTreeMap<PathKey, ContentFingerprint>);

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn get(&self, path: &PathKey) -> Option<&ContentFingerprint> {
                self.0.get(path)
            }

            pub fn contains(&self, path: &PathKey) -> bool {
                self.0.contains_key(path)
            }

            pub fn insert(&mut self, path: PathKey, fingerprint: ContentFingerprint) {
                self.0.insert(path, fingerprint);
            }

            pub fn remove(&mut self, path: &PathKey) -> Option<ContentFingerprint> {
                self.0.remove(path)
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// 按路径顺序遍历
            pub fn iter(&self) -> impl Iterator<Item = (&PathKey, &ContentFingerprint)> {
                self.0.iter()
            }

            pub fn keys(&self) -> impl Iterator<Item = &PathKey> {
                self.0.keys()
            }
        }

        impl FromIterator<(PathKey, ContentFingerprint)> for $name {
            fn from_iter<I: IntoIterator<Item = (PathKey, ContentFingerprint)>>(iter: I) -> Self {
                Self(iter.into_iter().collect())
            }
        }

        impl IntoIterator for $name {
            type Item = (PathKey, ContentFingerprint);
            type IntoIter = std::collections::btree_map::IntoIter<PathKey, ContentFingerprint>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }

        impl Extend<(PathKey, ContentFingerprint)> for $name {
            fn extend<I: IntoIterator<Item = (PathKey, ContentFingerprint)>>(&mut self, iter: I) {
                self.0.extend(iter);
            }
        }
    };
}

fingerprint_map!(
    /// 某一时刻同步根目录下所有普通文件的指纹
    Snapshot
);

fingerprint_map!(
    /// 副本主动删除过的文件，记录删除时的指纹
    TombstoneSet
);

/// 上一次成功同步结束时保存的快照
pub type StoredSnapshot = Snapshot;
