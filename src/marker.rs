//! 魔数标记定位
//!
//! 在链接镜像中按内容搜索魔数标记，只做原始字节匹配，不解析ELF结构

/// 标记之后的信息块长度：魔数(8) + bin_start(4) + bin_end(4)
pub const MARKER_BLOCK_SIZE: usize = 16;

/// 从 `from` 开始查找 `pattern` 的第一次出现
///
/// 返回绝对偏移；空模式或超出范围时返回 `None`
pub fn find_pattern(haystack: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if pattern.is_empty() || from >= haystack.len() {
        return None;
    }

    haystack[from..]
        .windows(pattern.len())
        .position(|window| window == pattern)
        .map(|pos| from + pos)
}

/// 查找第 `index` 次（从0开始）不重叠的出现
///
/// 每次搜索从上一次匹配的末尾开始，而不是起点
pub fn find_occurrence(haystack: &[u8], pattern: &[u8], index: usize) -> Option<usize> {
    let mut from = 0;
    let mut found = None;

    for _ in 0..=index {
        let offset = find_pattern(haystack, pattern, from)?;
        found = Some(offset);
        from = offset + pattern.len();
    }

    found
}

/// 查找第二次出现的位置
///
/// 第一次出现属于其他结构，必须跳过。偏移0是合法的第一次匹配
pub fn find_second_marker(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    find_occurrence(haystack, pattern, 1)
}

/// 标记处的信息块
///
/// 固件启动时要求前后两个信息块完全一致，并对 `[bin_start, bin_end)` 计算摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerBlock {
    /// 标记在文件中的偏移
    pub offset: usize,
    /// 被校验区域的起始地址
    pub bin_start: u32,
    /// 被校验区域的结束地址（摘要区起点）
    pub bin_end: u32,
}

impl MarkerBlock {
    /// 解析 `offset` 处的信息块，数据不足时返回 `None`
    pub fn parse(haystack: &[u8], offset: usize) -> Option<Self> {
        let block = haystack.get(offset..offset.checked_add(MARKER_BLOCK_SIZE)?)?;

        let bin_start = u32::from_le_bytes([block[8], block[9], block[10], block[11]]);
        let bin_end = u32::from_le_bytes([block[12], block[13], block[14], block[15]]);

        Some(Self {
            offset,
            bin_start,
            bin_end,
        })
    }

    /// 被校验区域的长度；地址倒置时返回 `None`
    pub fn payload_len(&self) -> Option<u64> {
        self.bin_end
            .checked_sub(self.bin_start)
            .map(|len| len as u64)
    }

    /// 两个信息块的内容（不含偏移）是否一致
    pub fn same_content(&self, other: &Self) -> bool {
        self.bin_start == other.bin_start && self.bin_end == other.bin_end
    }
}
