//! 内存管理模块
//!
//! 包括固件占用的地址范围计算，以及不依赖 CPU 后端的软件地址空间。

use thiserror::Error;

use super::engine::{AddressSpace, EngineError};
use crate::utils::elf::Segment;

/// 内存错误类型
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("固件没有任何程序头")]
    NoSegments,
    #[error("地址范围超出 32 位地址空间: 起始 {min:#x}, 结束 {end:#x}")]
    RangeOverflow { min: u32, end: u64 },
    #[error("内存访问越界: 地址 {addr:#x}, 大小 {size}")]
    OutOfBounds { addr: u32, size: usize },
    #[error("内存区域重叠: 地址 {addr:#x}")]
    Overlap { addr: u32 },
    #[error("映射大小为 0: 地址 {addr:#x}")]
    ZeroSize { addr: u32 },
}

/// 固件占用的连续地址范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub min: u32,
    pub max: u32,
    /// `max - min` 按映射粒度向上取整
    pub length: u32,
}

impl AddressRange {
    /// 映射区域的结束地址（不含）
    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.min as u64 + self.length as u64
    }

    /// 映射区域最后一个字节的地址
    #[inline(always)]
    pub fn last(&self) -> u64 {
        self.end().saturating_sub(1)
    }
}

/// 计算覆盖所有段的最小地址范围
///
/// 所有程序头都参与计算，不按段类型过滤。
pub fn compute_range(segments: &[Segment], align: u32) -> Result<AddressRange, MemoryError> {
    let (min, end) = segments
        .iter()
        .fold(None, |acc: Option<(u32, u64)>, seg| {
            let (min, end) = acc.unwrap_or((u32::MAX, 0));
            Some((min.min(seg.physical_address), end.max(seg.end())))
        })
        .ok_or(MemoryError::NoSegments)?;

    let max = u32::try_from(end).map_err(|_| MemoryError::RangeOverflow { min, end })?;
    let align = align.max(1) as u64;
    let length = (max - min) as u64;
    let length = length.div_ceil(align) * align;
    // 结束地址必须能用 32 位表示
    if min as u64 + length >= 1 << 32 {
        return Err(MemoryError::RangeOverflow {
            min,
            end: min as u64 + length,
        });
    }

    Ok(AddressRange {
        min,
        max,
        length: length as u32,
    })
}

/// 一段已映射的内存
#[derive(Clone)]
pub struct MemoryRegion {
    pub base: u32,
    data: Vec<u8>,
}

impl MemoryRegion {
    #[inline(always)]
    fn end(&self) -> u64 {
        self.base as u64 + self.data.len() as u64
    }

    #[inline(always)]
    fn contains(&self, addr: u32, size: usize) -> bool {
        addr >= self.base && addr as u64 + size as u64 <= self.end()
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.data.len()))
            .finish()
    }
}

/// 软件地址空间
///
/// 由若干互不重叠的区域组成，新映射的内存全部为 0。
#[derive(Debug, Clone, Default)]
pub struct Memory {
    regions: Vec<MemoryRegion>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 映射一段内存
    pub fn map_region(&mut self, base: u32, size: u32) -> Result<(), MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize { addr: base });
        }
        let new_end = base as u64 + size as u64;
        if new_end > 1 << 32 {
            return Err(MemoryError::OutOfBounds {
                addr: base,
                size: size as usize,
            });
        }

        // 检查地址重叠
        for region in &self.regions {
            if (base as u64) < region.end() && new_end > region.base as u64 {
                return Err(MemoryError::Overlap { addr: base });
            }
        }

        self.regions.push(MemoryRegion {
            base,
            data: vec![0; size as usize],
        });
        self.regions.sort_by_key(|region| region.base);
        Ok(())
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// 查找完整包含 `[addr, addr + size)` 的区域
    #[inline(always)]
    fn find_region(&self, addr: u32, size: usize) -> Result<usize, MemoryError> {
        self.regions
            .iter()
            .position(|region| region.contains(addr, size))
            .ok_or(MemoryError::OutOfBounds { addr, size })
    }

    /// 读取内存
    pub fn read_bytes(&self, addr: u32, size: usize) -> Result<Vec<u8>, MemoryError> {
        let region = &self.regions[self.find_region(addr, size)?];
        let start = (addr - region.base) as usize;
        Ok(region.data[start..start + size].to_vec())
    }

    /// 写入内存
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let index = self.find_region(addr, data.len())?;
        let region = &mut self.regions[index];
        let start = (addr - region.base) as usize;
        region.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl AddressSpace for Memory {
    fn map(&mut self, addr: u32, size: u32) -> Result<(), EngineError> {
        self.map_region(addr, size).map_err(|e| EngineError::Map {
            addr,
            size,
            reason: e.to_string(),
        })
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), EngineError> {
        self.write_bytes(addr, data).map_err(|e| EngineError::Write {
            addr,
            len: data.len(),
            reason: e.to_string(),
        })
    }

    fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        self.read_bytes(addr, len).map_err(|e| EngineError::Read {
            addr,
            len,
            reason: e.to_string(),
        })
    }
}
