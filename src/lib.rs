//! # Firmware Digest Inject
//!
//! 固件构建后的签名步骤：把SHA256摘要写入固件二进制，并同步写入对应的链接镜像，
//! 使固件在启动时可以自校验。
//!
//! ## 文件约定
//!
//! - **二进制镜像**（`.bin`）：末尾32字节为预留的尾部区域，写入其余全部字节的SHA256
//! - **链接镜像**（`.elf`）：包含两个魔数标记 `34 12 D5 1E 21 43 D5 1E`，
//!   第一个属于前置信息块，跳过；摘要写在第二个标记起点之后16字节处。
//!   找不到第二个标记时链接镜像保持不变
//!
//! 摘要只覆盖负载区域，不含尾部，所以对已注入的镜像重复执行会得到相同结果。
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use fw_digest_inject::Injector;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let injector = Injector::new("build/firmware.bin", "build/firmware.elf");
//!
//!     let report = injector.run()?;
//!     if !report.linked_patched() {
//!         println!("链接镜像中没有标记，已跳过");
//!     }
//!
//!     // 回读校验
//!     let digest = injector.verify(&report)?;
//!     println!("SHA256 Digest: {}", digest);
//!
//!     Ok(())
//! }
//! ```

// 内部模块
mod config;
mod digest;
mod error;
mod injector;
mod marker;
mod patch;

// 公开导出
pub use config::{CommitMode, InjectConfig};
pub use digest::{compute_range_digest, digest_bytes, ImageDigest};
pub use error::{Error, Result};
pub use injector::{InjectionReport, Injector};
pub use marker::{find_occurrence, find_pattern, find_second_marker, MarkerBlock, MARKER_BLOCK_SIZE};
pub use patch::{
    inject_at_marker, inject_trailer, patch_marker_in_buffer, patch_trailer_in_buffer, read_at,
    read_trailer, trailer_offset,
};

/// 摘要长度（SHA256）
pub const DIGEST_SIZE: usize = 32;

/// 链接镜像中的魔数标记（小端的 0x1ED51234、0x1ED54321）
pub const MAGIC_MARKER: [u8; 8] = [0x34, 0x12, 0xD5, 0x1E, 0x21, 0x43, 0xD5, 0x1E];

/// 摘要相对标记起点的偏移
pub const MARKER_PATCH_OFFSET: usize = 16;

/// 被写入的标记序号（从0开始）
pub const MARKER_OCCURRENCE: usize = 1;
