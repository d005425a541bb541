//! 摘要注入流程
//!
//! 按固定顺序执行：计算摘要 -> 写入二进制尾部 -> 写入链接镜像标记处 -> 回读校验

use crate::config::{CommitMode, InjectConfig};
use crate::digest::{compute_range_digest, digest_bytes, ImageDigest};
use crate::error::{Error, Result};
use crate::marker::{find_occurrence, MarkerBlock};
use crate::patch::{
    inject_at_marker, inject_trailer, patch_marker_in_buffer, patch_trailer_in_buffer, read_at,
    read_trailer, trailer_offset,
};
use crate::DIGEST_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// 一次注入的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionReport {
    /// 计算得到的摘要
    pub digest: ImageDigest,
    /// 二进制镜像路径
    pub binary_image: PathBuf,
    /// 链接镜像路径
    pub linked_image: PathBuf,
    /// 被选中的标记偏移，未找到时为 `None`
    pub marker_offset: Option<usize>,
    /// 链接镜像中摘要的写入偏移，跳过时为 `None`
    pub linked_patch_offset: Option<u64>,
}

impl InjectionReport {
    /// 链接镜像是否被修改
    pub fn linked_patched(&self) -> bool {
        self.linked_patch_offset.is_some()
    }

    /// 序列化为格式化的JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }
}

/// 摘要注入器
///
/// 持有两个目标文件的路径和配置，不持有任何文件句柄
pub struct Injector {
    /// 固件二进制（.bin）
    binary_image: PathBuf,
    /// 链接镜像（.elf）
    linked_image: PathBuf,
    /// 注入配置
    config: InjectConfig,
}

impl Injector {
    /// 使用默认配置创建注入器
    pub fn new(binary_image: impl Into<PathBuf>, linked_image: impl Into<PathBuf>) -> Self {
        Self {
            binary_image: binary_image.into(),
            linked_image: linked_image.into(),
            config: InjectConfig::default(),
        }
    }

    /// 使用自定义配置创建注入器
    pub fn with_config(
        binary_image: impl Into<PathBuf>,
        linked_image: impl Into<PathBuf>,
        config: InjectConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            binary_image: binary_image.into(),
            linked_image: linked_image.into(),
            config,
        })
    }

    /// 当前配置
    pub fn config(&self) -> &InjectConfig {
        &self.config
    }

    /// 执行注入
    ///
    /// 任何IO错误都会立即中止，之后的步骤不再执行。原地模式下已完成的写入不会回滚，
    /// 两个文件不保证一致；暂存模式下失败时两个文件都保持原样
    /// （链接镜像提交失败时会写回二进制原来的尾部）。
    ///
    /// 链接镜像中找不到标记不是错误，只跳过该文件的写入。
    ///
    /// # 示例
    ///
    /// ```no_run
    /// # use fw_digest_inject::Injector;
    /// let injector = Injector::new("firmware.bin", "firmware.elf");
    /// let report = injector.run()?;
    /// let digest = injector.verify(&report)?;
    /// println!("SHA256 Digest: {}", digest);
    /// # Ok::<(), fw_digest_inject::Error>(())
    /// ```
    pub fn run(&self) -> Result<InjectionReport> {
        match self.config.commit {
            CommitMode::InPlace => self.run_in_place(),
            CommitMode::Staged => self.run_staged(),
        }
    }

    /// 回读校验
    ///
    /// 重新读取二进制尾部（以及已写入的链接镜像区域），与报告中的摘要逐字节比较
    ///
    /// # 返回
    ///
    /// 成功返回从二进制尾部读取的摘要
    pub fn verify(&self, report: &InjectionReport) -> Result<ImageDigest> {
        let trailer = read_trailer(&self.binary_image)?;
        ensure_same(&report.digest, &trailer)?;

        if let Some(offset) = report.linked_patch_offset {
            let linked = read_at(&self.linked_image, offset)?;
            ensure_same(&report.digest, &linked)?;
        }

        Ok(trailer)
    }

    fn run_in_place(&self) -> Result<InjectionReport> {
        // 1. 对负载区域计算摘要（不含尾部32字节）
        let binary_len = fs::metadata(&self.binary_image)?.len();
        let payload_len = trailer_offset(binary_len)?;
        log::info!(
            "计算摘要: {} [0, {:#x})",
            self.binary_image.display(),
            payload_len
        );
        let digest = compute_range_digest(&self.binary_image, 0, payload_len)?;
        log::debug!("摘要: {}", digest);

        // 2. 写入二进制尾部
        log::info!("写入二进制尾部: {}", self.binary_image.display());
        inject_trailer(&self.binary_image, &digest)?;

        // 3. 定位标记并写入链接镜像
        let linked = fs::read(&self.linked_image)?;
        let marker_offset = self.locate_marker(&linked, payload_len);
        drop(linked);

        let linked_patch_offset = inject_at_marker(
            &self.linked_image,
            &digest,
            marker_offset,
            self.config.marker_patch_offset,
        )?;
        self.log_linked_result(linked_patch_offset);

        Ok(self.report(digest, marker_offset, linked_patch_offset))
    }

    fn run_staged(&self) -> Result<InjectionReport> {
        let mut binary = fs::read(&self.binary_image)?;
        let payload_len = trailer_offset(binary.len() as u64)? as usize;
        log::info!(
            "计算摘要: {} [0, {:#x})",
            self.binary_image.display(),
            payload_len
        );
        let digest = digest_bytes(&binary[..payload_len]);
        log::debug!("摘要: {}", digest);

        let mut previous_trailer = [0u8; DIGEST_SIZE];
        previous_trailer.copy_from_slice(&binary[payload_len..]);
        patch_trailer_in_buffer(&mut binary, &digest)?;

        let mut linked = fs::read(&self.linked_image)?;
        let marker_offset = self.locate_marker(&linked, payload_len as u64);
        let linked_patch_offset = patch_marker_in_buffer(
            &mut linked,
            &digest,
            marker_offset,
            self.config.marker_patch_offset,
        )?;

        // 两个临时文件都写成功后才提交，失败时临时文件随drop删除
        let binary_tmp = stage_write(&self.binary_image, &binary)?;
        let linked_tmp = match linked_patch_offset {
            Some(_) => Some(stage_write(&self.linked_image, &linked)?),
            None => None,
        };

        log::info!("提交二进制尾部: {}", self.binary_image.display());
        commit_staged(
            (binary_tmp, self.binary_image.as_path()),
            linked_tmp.map(|tmp| (tmp, self.linked_image.as_path())),
            &ImageDigest::new(previous_trailer),
            persist,
        )?;

        let linked_patch_offset = linked_patch_offset.map(|offset| offset as u64);
        self.log_linked_result(linked_patch_offset);

        Ok(self.report(digest, marker_offset, linked_patch_offset))
    }

    /// 查找配置指定的标记，并检查信息块与二进制是否吻合
    fn locate_marker(&self, linked: &[u8], payload_len: u64) -> Option<usize> {
        let marker = &self.config.marker;
        let occurrence = self.config.marker_occurrence;
        let offset = find_occurrence(linked, marker, occurrence);

        match offset {
            Some(offset) => {
                log::debug!("第 {} 个标记位于 {:#x}", occurrence, offset);
                self.check_marker_blocks(linked, offset, payload_len);
            }
            None => log::warn!(
                "{} 中未找到第 {} 个标记 {}，跳过链接镜像",
                self.linked_image.display(),
                occurrence,
                hex::encode_upper(marker)
            ),
        }

        offset
    }

    /// 只做诊断，不影响是否写入
    fn check_marker_blocks(&self, linked: &[u8], offset: usize, payload_len: u64) {
        let Some(block) = MarkerBlock::parse(linked, offset) else {
            return;
        };

        // 固件要求前后两个信息块相同
        let first = find_occurrence(linked, &self.config.marker, 0)
            .filter(|&first| first != offset)
            .and_then(|first| MarkerBlock::parse(linked, first));
        if let Some(first) = first {
            if !first.same_content(&block) {
                log::warn!(
                    "前后信息块不一致: {:#x} [{:#x}, {:#x}) / {:#x} [{:#x}, {:#x})",
                    first.offset,
                    first.bin_start,
                    first.bin_end,
                    block.offset,
                    block.bin_start,
                    block.bin_end
                );
            }
        }

        match block.payload_len() {
            Some(len) if len == payload_len => {}
            Some(len) => log::warn!(
                "信息块声明的负载长度 {:#x} 与二进制负载长度 {:#x} 不符",
                len,
                payload_len
            ),
            None => log::warn!(
                "信息块地址倒置: bin_start {:#x} > bin_end {:#x}",
                block.bin_start,
                block.bin_end
            ),
        }
    }

    fn log_linked_result(&self, linked_patch_offset: Option<u64>) {
        if let Some(offset) = linked_patch_offset {
            log::info!(
                "写入链接镜像: {} @ {:#x}",
                self.linked_image.display(),
                offset
            );
        }
    }

    fn report(
        &self,
        digest: ImageDigest,
        marker_offset: Option<usize>,
        linked_patch_offset: Option<u64>,
    ) -> InjectionReport {
        InjectionReport {
            digest,
            binary_image: self.binary_image.clone(),
            linked_image: self.linked_image.clone(),
            marker_offset,
            linked_patch_offset,
        }
    }
}

fn ensure_same(expected: &ImageDigest, actual: &ImageDigest) -> Result<()> {
    if expected != actual {
        return Err(Error::DigestMismatch {
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        });
    }
    Ok(())
}

/// 在目标文件所在目录创建临时文件，写入数据并复制原文件权限
///
/// 临时文件名随机生成，不会覆盖已有文件；未提交时在drop时删除
fn stage_write(path: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".fw-digest-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        let permissions = fs::metadata(path)?.permissions();
        temp.as_file().set_permissions(permissions)?;
    }

    Ok(temp)
}

/// 用临时文件原子替换目标文件
fn persist(temp: NamedTempFile, target: &Path) -> io::Result<()> {
    temp.persist(target).map(drop).map_err(|e| e.error)
}

/// 依次提交二进制和链接镜像
///
/// 链接镜像提交失败时把二进制尾部写回原来的内容，两个文件都回到注入前的状态
fn commit_staged<F>(
    binary: (NamedTempFile, &Path),
    linked: Option<(NamedTempFile, &Path)>,
    previous_trailer: &ImageDigest,
    mut commit: F,
) -> Result<()>
where
    F: FnMut(NamedTempFile, &Path) -> io::Result<()>,
{
    let (binary_tmp, binary_path) = binary;
    commit(binary_tmp, binary_path)?;

    let Some((linked_tmp, linked_path)) = linked else {
        return Ok(());
    };

    if let Err(e) = commit(linked_tmp, linked_path) {
        log::error!("提交链接镜像失败，恢复二进制尾部: {}", e);
        if let Err(restore) = inject_trailer(binary_path, previous_trailer) {
            log::error!("恢复二进制尾部失败，两个文件不一致: {}", restore);
        }
        return Err(e.into());
    }

    Ok(())
}
