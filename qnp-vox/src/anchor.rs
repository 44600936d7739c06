//! 人工锚点: 每个被试一行 `subject=X,Y,Z`.
//!
//! `X`, `Z` 为平移量, `Y` 为固定切片索引. 文件不要求有序或唯一, 同一被试以首次出现为准.

use std::fs;
use std::path::{Path, PathBuf};

use crate::Subject;

/// 锚点查找错误.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    /// 锚点文件无法读取.
    #[error("failed to read manual coordinates file {path}: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        source: std::io::Error,
    },

    /// 没有该被试的行.
    #[error("no manual coordinates for subject {0}; add a line `{0}=X,Y,Z`")]
    AnchorNotFound(Subject),

    /// 等号右侧不是恰好三个整数.
    #[error("manual coordinates for subject {subject} are malformed: `{raw}`")]
    AnchorMalformed {
        /// 被试.
        subject: Subject,
        /// 等号右侧原文.
        raw: String,
    },
}

/// 人工给定的偏移量与切片索引.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualAnchor {
    /// 被试.
    pub subject: Subject,
    /// X 方向偏移.
    pub x: i64,
    /// 固定的 Y 切片索引.
    pub y_slice: i64,
    /// Z 方向偏移.
    pub z: i64,
}

impl ManualAnchor {
    /// 在 `text` 中查找 `subject` 的锚点. 只看第一条匹配行, 即使它格式错误.
    pub fn resolve(text: &str, subject: Subject) -> Result<Self, AnchorError> {
        let key = subject.to_string();
        let raw = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .find_map(|(k, v)| (k.trim() == key).then_some(v.trim()))
            .ok_or(AnchorError::AnchorNotFound(subject))?;

        let malformed = || AnchorError::AnchorMalformed {
            subject,
            raw: raw.to_owned(),
        };
        let parts = raw
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed())?;
        match parts[..] {
            [x, y_slice, z] => Ok(Self {
                subject,
                x,
                y_slice,
                z,
            }),
            _ => Err(malformed()),
        }
    }

    /// 读取锚点文件并查找 `subject`. 每次调用都重新读取, 不做缓存.
    pub fn load<P: AsRef<Path>>(path: P, subject: Subject) -> Result<Self, AnchorError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| AnchorError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::resolve(&text, subject)
    }
}
