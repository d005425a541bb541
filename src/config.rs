//! 注入配置定义和操作

use crate::error::{Error, Result};
use crate::{MAGIC_MARKER, MARKER_OCCURRENCE, MARKER_PATCH_OFFSET};
use serde::{Deserialize, Serialize};

/// 两个文件的提交方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// 原地覆盖，逐个文件打开、写入、关闭；失败时不回滚
    #[default]
    InPlace,

    /// 先在内存中修改两个文件并写入临时文件，全部成功后再依次重命名
    Staged,
}

/// 注入配置
///
/// 默认值对应固件链接脚本中的信息块布局
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectConfig {
    /// 链接镜像中的魔数标记
    pub marker: [u8; 8],

    /// 要写入的标记序号（从0开始，默认第二个）
    pub marker_occurrence: usize,

    /// 摘要相对标记起点的偏移
    pub marker_patch_offset: usize,

    /// 提交方式
    #[serde(default)]
    pub commit: CommitMode,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            marker: MAGIC_MARKER,
            marker_occurrence: MARKER_OCCURRENCE,
            marker_patch_offset: MARKER_PATCH_OFFSET,
            commit: CommitMode::InPlace,
        }
    }
}

impl InjectConfig {
    /// 从JSON字节反序列化
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为JSON字节
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    /// 使用指定的提交方式
    pub fn with_commit(mut self, commit: CommitMode) -> Self {
        self.commit = commit;
        self
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.marker.iter().all(|&b| b == 0) {
            return Err(Error::Config("魔数标记不能全为0".to_string()));
        }

        // 摘要不能覆盖用于定位的标记本身
        if self.marker_patch_offset < self.marker.len() {
            return Err(Error::Config(format!(
                "摘要偏移({})不能小于标记长度({})",
                self.marker_patch_offset,
                self.marker.len()
            )));
        }

        Ok(())
    }
}
