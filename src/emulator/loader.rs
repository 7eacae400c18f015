//! 固件加载
//!
//! 把段内容写进已映射的地址范围，再单独映射栈区域。
//! 失败时不回滚已经写入的内容。

use thiserror::Error;
use tracing::{debug, warn};

use super::engine::{AddressSpace, EngineError};
use super::memory::AddressRange;
use crate::utils::elf::Segment;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("映射固件区域失败: {0}")]
    MapFailed(#[source] EngineError),
    #[error("写入段 #{index} 失败 (物理地址 {addr:#010x}): {source}")]
    SegmentWriteFailed {
        index: usize,
        addr: u32,
        #[source]
        source: EngineError,
    },
    #[error("段 #{index} 超出文件范围: 偏移 {offset:#x}, 大小 {size:#x}, 文件长度 {file_len:#x}")]
    SegmentOutOfFile {
        index: usize,
        offset: u32,
        size: u32,
        file_len: usize,
    },
}

/// 栈区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: u32,
    pub size: u32,
    /// 映射是否成功
    pub mapped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub segments_written: usize,
    pub bytes_written: u64,
    pub bytes_zero_filled: u64,
}

/// 固件加载器
#[derive(Debug, Clone, Copy)]
pub struct MemoryLoader {
    /// 是否显式清零 memsz 超出 filesz 的部分
    pub zero_fill: bool,
}

impl MemoryLoader {
    pub fn new(zero_fill: bool) -> Self {
        Self { zero_fill }
    }

    /// 映射地址范围并写入所有段
    pub fn load<A: AddressSpace + ?Sized>(
        &self,
        space: &mut A,
        file: &[u8],
        segments: &[Segment],
        range: &AddressRange,
    ) -> Result<LoadReport, LoadError> {
        space.map(range.min, range.length).map_err(LoadError::MapFailed)?;
        debug!(
            base = format_args!("{:#010x}", range.min),
            length = format_args!("{:#x}", range.length),
            "映射固件区域"
        );

        for (index, seg) in segments.iter().enumerate() {
            if seg.file_range().end > file.len() {
                return Err(LoadError::SegmentOutOfFile {
                    index,
                    offset: seg.file_offset,
                    size: seg.file_size,
                    file_len: file.len(),
                });
            }
        }

        let mut report = LoadReport::default();

        // 先清零，再写文件内容，避免清零覆盖其他程序头的数据
        if self.zero_fill {
            for (index, seg) in segments.iter().enumerate() {
                if seg.memory_size <= seg.file_size {
                    continue;
                }
                let addr = seg.physical_address + seg.file_size;
                let zeros = vec![0u8; (seg.memory_size - seg.file_size) as usize];
                space
                    .write(addr, &zeros)
                    .map_err(|source| LoadError::SegmentWriteFailed { index, addr, source })?;
                report.bytes_zero_filled += zeros.len() as u64;
            }
        }

        for (index, seg) in segments.iter().enumerate() {
            if seg.file_size == 0 {
                continue;
            }
            space
                .write(seg.physical_address, &file[seg.file_range()])
                .map_err(|source| LoadError::SegmentWriteFailed {
                    index,
                    addr: seg.physical_address,
                    source,
                })?;
            debug!(
                index,
                addr = format_args!("{:#010x}", seg.physical_address),
                size = format_args!("{:#x}", seg.file_size),
                "写入段"
            );
            report.segments_written += 1;
            report.bytes_written += seg.file_size as u64;
        }

        Ok(report)
    }

    /// 映射栈区域，与固件范围是否重叠不做检查
    ///
    /// 映射失败只记录警告（栈通常位于已映射的 RAM 段内）。
    pub fn map_stack<A: AddressSpace + ?Sized>(&self, space: &mut A, base: u32, size: u32) -> StackRegion {
        let mapped = match space.map(base, size) {
            Ok(()) => true,
            Err(e) => {
                warn!(base = format_args!("{:#010x}", base), size, error = %e, "栈区域映射失败, 继续运行");
                false
            }
        };
        StackRegion { base, size, mapped }
    }
}
