//! 错误类型定义

use std::fmt;

/// 库的错误类型
#[derive(Debug)]
pub enum Error {
    /// IO错误（文件不存在、无权限、读取不足等）
    Io(std::io::Error),

    /// 文件长度不足以容纳所需区域，此时不会写入任何字节
    FileTooSmall { expected: u64, actual: u64 },

    /// 无效的字节范围（start > end）
    InvalidRange { start: u64, end: u64 },

    /// 配置错误
    Config(String),

    /// 解析错误（十六进制摘要、JSON配置）
    Parse(String),

    /// 回读校验失败
    DigestMismatch { expected: String, actual: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO错误: {}", e),
            Error::FileTooSmall { expected, actual } => {
                write!(f, "文件太小: 至少需要 {} 字节, 实际 {} 字节", expected, actual)
            }
            Error::InvalidRange { start, end } => {
                write!(f, "无效的字节范围: [{}, {})", start, end)
            }
            Error::Config(e) => write!(f, "配置错误: {}", e),
            Error::Parse(e) => write!(f, "解析错误: {}", e),
            Error::DigestMismatch { expected, actual } => {
                write!(f, "摘要不匹配: 期望 {}, 实际 {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(format!("JSON错误: {}", e))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Parse(format!("十六进制错误: {}", e))
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
