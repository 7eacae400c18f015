//! ELF固件读取
//!
//! 只负责把文件读进内存并校验格式，段和符号的解释交给调用方。

use object::elf::{EM_ARM, FileHeader32, SHT_SYMTAB};
use object::read::elf::{FileHeader, ProgramHeader, SectionHeader, Sym};
use object::{Endianness, FileKind};
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

type Elf32Header = FileHeader32<Endianness>;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("固件文件不存在: {0}")]
    NotFound(PathBuf),
    #[error("无法读取固件文件 '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("'{0}' 不是有效的 ELF32 目标文件")]
    NotAnObjectFile(PathBuf),
    #[error("ELF 结构损坏: {0}")]
    Malformed(#[from] object::Error),
}

/// 程序头描述的一段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub physical_address: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub memory_size: u32,
}

impl Segment {
    /// 段在内存中的结束地址（不含）
    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.physical_address as u64 + self.memory_size as u64
    }

    /// 段内容在文件中的字节范围
    pub fn file_range(&self) -> Range<usize> {
        let start = self.file_offset as usize;
        start..start + self.file_size as usize
    }
}

/// 已读入内存的固件文件
pub struct FirmwareImage {
    path: PathBuf,
    data: Vec<u8>,
}

impl std::fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("path", &self.path)
            .field("size", &format_args!("{:#x}", self.data.len()))
            .finish()
    }
}

impl FirmwareImage {
    /// 打开并校验固件文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ImageError::NotFound(path.to_path_buf()),
            _ => ImageError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::from_bytes(path, data)
    }

    /// 从已有的字节构造，格式校验与 [`FirmwareImage::open`] 相同
    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<Self, ImageError> {
        let path = path.into();
        // 先检查文件类型标记，再做其他解析
        match FileKind::parse(&*data) {
            Ok(FileKind::Elf32) => {}
            _ => return Err(ImageError::NotAnObjectFile(path)),
        }
        let image = Self { path, data };
        let (header, endian) = image.header()?;
        // 程序头表和节表必须完整
        header.program_headers(endian, image.data())?;
        header.sections(endian, image.data())?;
        let machine = header.e_machine(endian);
        if machine != EM_ARM {
            tracing::warn!(path = %image.path.display(), machine, "ELF 目标架构不是 ARM");
        }
        tracing::debug!(path = %image.path.display(), size = image.data.len(), "固件文件校验通过");
        Ok(image)
    }

    fn header(&self) -> Result<(&Elf32Header, Endianness), ImageError> {
        let header = Elf32Header::parse(self.data())?;
        let endian = header.endian()?;
        Ok((header, endian))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 原始文件内容
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// ELF 头中的入口地址
    pub fn entry(&self) -> Result<u32, ImageError> {
        let (header, endian) = self.header()?;
        Ok(header.e_entry(endian))
    }

    /// 所有程序头（不按类型过滤）
    pub fn segments(&self) -> Result<Vec<Segment>, ImageError> {
        let (header, endian) = self.header()?;
        Ok(header
            .program_headers(endian, self.data())?
            .iter()
            .map(|ph| Segment {
                physical_address: ph.p_paddr(endian),
                file_offset: ph.p_offset(endian),
                file_size: ph.p_filesz(endian),
                memory_size: ph.p_memsz(endian),
            })
            .collect())
    }

    /// 第一个 SHT_SYMTAB 节中的 (名称, 值)，没有符号表时返回 `None`
    pub fn symbols(&self) -> Result<Option<Vec<(String, u32)>>, ImageError> {
        let (header, endian) = self.header()?;
        let sections = header.sections(endian, self.data())?;
        let has_symtab = sections
            .iter()
            .any(|section| section.sh_type(endian) == SHT_SYMTAB);
        if !has_symtab {
            return Ok(None);
        }

        let table = sections.symbols(endian, self.data(), SHT_SYMTAB)?;
        let strings = table.strings();
        let mut symbols = Vec::with_capacity(table.symbols().len());
        for sym in table.symbols() {
            let name = sym.name(endian, strings)?;
            symbols.push((String::from_utf8_lossy(name).into_owned(), sym.st_value(endian)));
        }
        Ok(Some(symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_elf::{ElfBuilder, PT_NOTE};

    #[test]
    fn test_open_missing_file() {
        let err = FirmwareImage::open("/nonexistent/firmware.elf").unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[test]
    fn test_rejects_non_elf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        std::fs::write(&path, b"this is not an object file at all").unwrap();
        let err = FirmwareImage::open(&path).unwrap_err();
        assert!(matches!(err, ImageError::NotAnObjectFile(_)));
    }

    #[test]
    fn test_rejects_truncated_elf() {
        let mut data = ElfBuilder::new().segment(0x1000, &[1, 2, 3, 4], 4).build();
        // 程序头表被截断
        data.truncate(60);
        let err = FirmwareImage::from_bytes("truncated.elf", data).unwrap_err();
        assert!(matches!(err, ImageError::Malformed(_)));
    }

    #[test]
    fn test_segments_in_header_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = ElfBuilder::new()
            .segment(0x0800_0000, &[0xaa; 16], 16)
            .segment_with_type(PT_NOTE, 0x0800_0100, &[0xbb; 4], 4)
            .segment(0x2000_0000, &[0xcc; 8], 0x100)
            .write_to(dir.path(), "fw.elf");

        let image = FirmwareImage::open(&path).unwrap();
        let segments = image.segments().unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].physical_address, 0x0800_0000);
        assert_eq!(segments[1].physical_address, 0x0800_0100);
        assert_eq!(segments[2].file_size, 8);
        assert_eq!(segments[2].memory_size, 0x100);
        assert_eq!(segments[2].end(), 0x2000_0100);

        let seg = segments[0];
        assert_eq!(&image.data()[seg.file_range()], &[0xaa; 16]);
    }

    #[test]
    fn test_symbols_and_entry() {
        let image = FirmwareImage::from_bytes(
            "fw.elf",
            ElfBuilder::new()
                .entry(0x101)
                .segment(0, &[0; 4], 4)
                .symbol("main", 0x101)
                .symbol("__stack", 0x2000_4000)
                .build(),
        )
        .unwrap();

        assert_eq!(image.entry().unwrap(), 0x101);
        let symbols = image.symbols().unwrap().unwrap();
        assert!(symbols.contains(&("main".to_string(), 0x101)));
        assert!(symbols.contains(&("__stack".to_string(), 0x2000_4000)));
    }

    #[test]
    fn test_missing_symtab() {
        let image = FirmwareImage::from_bytes(
            "fw.elf",
            ElfBuilder::new().segment(0, &[0; 4], 4).without_symtab().build(),
        )
        .unwrap();
        assert!(image.symbols().unwrap().is_none());
    }
}
