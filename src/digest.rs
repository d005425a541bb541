//! 摘要计算
//!
//! 对文件的半开区间 `[start, end)` 计算SHA256摘要

use crate::error::{Error, Result};
use crate::DIGEST_SIZE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// 读取缓冲区大小（64KB）
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// 固件摘要（SHA256，32字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDigest([u8; DIGEST_SIZE]);

impl ImageDigest {
    /// 从原始字节构造
    pub const fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// 小写十六进制字符串
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 从十六进制字符串解析（大小写均可）
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut bytes = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(text.trim(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; DIGEST_SIZE]> for ImageDigest {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ImageDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ImageDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ImageDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// 计算内存数据的摘要
pub fn digest_bytes(data: &[u8]) -> ImageDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ImageDigest(hasher.finalize().into())
}

/// 计算文件中 `[start, end)` 区间的摘要
///
/// 只读操作，文件句柄在函数返回时关闭
///
/// # 参数
///
/// * `path` - 文件路径
/// * `start` - 起始偏移（包含）
/// * `end` - 结束偏移（不包含）
///
/// # 返回
///
/// 成功返回摘要；`start > end` 返回 `InvalidRange`，文件长度小于 `end` 返回 `FileTooSmall`
pub fn compute_range_digest(path: &Path, start: u64, end: u64) -> Result<ImageDigest> {
    if start > end {
        return Err(Error::InvalidRange { start, end });
    }

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < end {
        return Err(Error::FileTooSmall {
            expected: end,
            actual: file_len,
        });
    }

    file.seek(SeekFrom::Start(start))?;
    let wanted = end - start;
    let mut reader = BufReader::with_capacity(READ_CHUNK_SIZE, file.take(wanted));

    let mut hasher = Sha256::new();
    let mut consumed = 0u64;
    loop {
        let chunk = reader.fill_buf()?;
        let length = chunk.len();
        if length == 0 {
            break;
        }
        hasher.update(chunk);
        reader.consume(length);
        consumed += length as u64;
    }

    // 文件在检查长度之后被截断
    if consumed != wanted {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("只读取到 {} / {} 字节", consumed, wanted),
        )));
    }

    Ok(ImageDigest(hasher.finalize().into()))
}
