//! 摘要写入
//!
//! 两种固定位置的覆盖写入：
//! - 二进制镜像的末尾32字节（尾部区域）
//! - 链接镜像中标记偏移之后的32字节
//!
//! 所有写入都是原地覆盖，不会改变文件长度。写入之前先检查长度，
//! 长度不足时不写任何字节。

use crate::digest::ImageDigest;
use crate::error::{Error, Result};
use crate::DIGEST_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// 尾部区域在长度为 `len` 的文件中的起始偏移
pub fn trailer_offset(len: u64) -> Result<u64> {
    len.checked_sub(DIGEST_SIZE as u64)
        .ok_or(Error::FileTooSmall {
            expected: DIGEST_SIZE as u64,
            actual: len,
        })
}

/// 将摘要写入文件末尾32字节
///
/// # 返回
///
/// 成功返回写入的偏移；文件小于32字节时返回 `FileTooSmall` 且不写入
pub fn inject_trailer(path: &Path, digest: &ImageDigest) -> Result<u64> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let offset = trailer_offset(file.metadata()?.len())?;

    write_digest(&mut file, offset, digest)?;
    log::debug!("尾部摘要写入 {} @ {:#x}", path.display(), offset);

    Ok(offset)
}

/// 读取文件末尾32字节
pub fn read_trailer(path: &Path) -> Result<ImageDigest> {
    let len = std::fs::metadata(path)?.len();
    read_at(path, trailer_offset(len)?)
}

/// 读取 `offset` 处的32字节
pub fn read_at(path: &Path, offset: u64) -> Result<ImageDigest> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    ensure_region(offset, len)?;

    let mut bytes = [0u8; DIGEST_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut bytes)?;

    Ok(ImageDigest::new(bytes))
}

/// 将摘要写入 `marker_offset + patch_offset`
///
/// 未找到标记（`None`）时不打开文件，直接跳过
///
/// # 返回
///
/// 写入时返回写入偏移，跳过时返回 `None`
pub fn inject_at_marker(
    path: &Path,
    digest: &ImageDigest,
    marker_offset: Option<usize>,
    patch_offset: usize,
) -> Result<Option<u64>> {
    let Some(marker_offset) = marker_offset else {
        return Ok(None);
    };

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    let offset = marker_patch_position(marker_offset, patch_offset, len)?;
    ensure_region(offset, len)?;

    write_digest(&mut file, offset, digest)?;
    log::debug!("标记摘要写入 {} @ {:#x}", path.display(), offset);

    Ok(Some(offset))
}

/// 内存版本：覆盖缓冲区末尾32字节
pub fn patch_trailer_in_buffer(buf: &mut [u8], digest: &ImageDigest) -> Result<usize> {
    let offset = trailer_offset(buf.len() as u64)? as usize;
    buf[offset..].copy_from_slice(digest.as_bytes());
    Ok(offset)
}

/// 内存版本：覆盖 `marker_offset + patch_offset` 处的32字节
pub fn patch_marker_in_buffer(
    buf: &mut [u8],
    digest: &ImageDigest,
    marker_offset: Option<usize>,
    patch_offset: usize,
) -> Result<Option<usize>> {
    let Some(marker_offset) = marker_offset else {
        return Ok(None);
    };

    let len = buf.len() as u64;
    let offset = marker_patch_position(marker_offset, patch_offset, len)?;
    ensure_region(offset, len)?;

    // 上面已保证 offset + 32 <= buf.len()
    let offset = offset as usize;
    buf[offset..offset + DIGEST_SIZE].copy_from_slice(digest.as_bytes());
    Ok(Some(offset))
}

/// 标记偏移加上摘要偏移，溢出时视为文件不够大
fn marker_patch_position(marker_offset: usize, patch_offset: usize, len: u64) -> Result<u64> {
    (marker_offset as u64)
        .checked_add(patch_offset as u64)
        .ok_or(Error::FileTooSmall {
            expected: u64::MAX,
            actual: len,
        })
}

/// 检查 `[offset, offset + 32)` 完全落在长度为 `len` 的文件内
fn ensure_region(offset: u64, len: u64) -> Result<()> {
    let end = offset.checked_add(DIGEST_SIZE as u64).ok_or(Error::FileTooSmall {
        expected: u64::MAX,
        actual: len,
    })?;
    if len < end {
        return Err(Error::FileTooSmall {
            expected: end,
            actual: len,
        });
    }
    Ok(())
}

fn write_digest(file: &mut File, offset: u64, digest: &ImageDigest) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(digest.as_bytes())?;
    file.flush()?;
    Ok(())
}
