//! 测试用的最小 ELF32 生成器（ARM, 小端）

use std::path::{Path, PathBuf};

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const SHN_ABS: u16 = 0xfff1;

struct TestSegment {
    p_type: u32,
    paddr: u32,
    data: Vec<u8>,
    memsz: u32,
}

pub struct ElfBuilder {
    entry: u32,
    segments: Vec<TestSegment>,
    symbols: Option<Vec<(String, u32)>>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self {
            entry: 0,
            segments: Vec::new(),
            symbols: Some(Vec::new()),
        }
    }

    pub fn entry(mut self, entry: u32) -> Self {
        self.entry = entry;
        self
    }

    /// 添加 PT_LOAD 段
    pub fn segment(self, paddr: u32, data: &[u8], memsz: u32) -> Self {
        self.segment_with_type(PT_LOAD, paddr, data, memsz)
    }

    pub fn segment_with_type(mut self, p_type: u32, paddr: u32, data: &[u8], memsz: u32) -> Self {
        self.segments.push(TestSegment {
            p_type,
            paddr,
            data: data.to_vec(),
            memsz,
        });
        self
    }

    pub fn symbol(mut self, name: &str, value: u32) -> Self {
        if let Some(symbols) = self.symbols.as_mut() {
            symbols.push((name.to_string(), value));
        }
        self
    }

    /// 不生成 .symtab
    pub fn without_symtab(mut self) -> Self {
        self.symbols = None;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; EHDR_SIZE + PHDR_SIZE * self.segments.len()];

        // 段数据
        let mut offsets = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            align_to(&mut out, 4);
            offsets.push(out.len() as u32);
            out.extend_from_slice(&seg.data);
        }

        // 节: null, [.symtab, .strtab,] .shstrtab
        let mut shstrtab = vec![0u8];
        let mut sections: Vec<[u32; 10]> = vec![[0; 10]];
        if let Some(symbols) = &self.symbols {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; SYM_SIZE];
            for (name, value) in symbols {
                let name_off = strtab.len() as u32;
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);
                symtab.extend_from_slice(&name_off.to_le_bytes());
                symtab.extend_from_slice(&value.to_le_bytes());
                symtab.extend_from_slice(&0u32.to_le_bytes());
                symtab.push(0x12); // STB_GLOBAL | STT_FUNC
                symtab.push(0);
                symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
            }

            align_to(&mut out, 4);
            let symtab_off = out.len() as u32;
            out.extend_from_slice(&symtab);
            let strtab_off = out.len() as u32;
            out.extend_from_slice(&strtab);

            let symtab_name = push_name(&mut shstrtab, ".symtab");
            let strtab_name = push_name(&mut shstrtab, ".strtab");
            // sh_name, sh_type, sh_flags, sh_addr, sh_offset, sh_size, sh_link, sh_info, sh_addralign, sh_entsize
            sections.push([symtab_name, 2, 0, 0, symtab_off, symtab.len() as u32, 2, 1, 4, SYM_SIZE as u32]);
            sections.push([strtab_name, 3, 0, 0, strtab_off, strtab.len() as u32, 0, 0, 1, 0]);
        }
        let shstrtab_name = push_name(&mut shstrtab, ".shstrtab");
        let shstrtab_off = out.len() as u32;
        out.extend_from_slice(&shstrtab);
        sections.push([shstrtab_name, 3, 0, 0, shstrtab_off, shstrtab.len() as u32, 0, 0, 1, 0]);

        align_to(&mut out, 4);
        let shoff = out.len() as u32;
        for section in &sections {
            for field in section {
                out.extend_from_slice(&field.to_le_bytes());
            }
        }

        // ELF 头
        let mut ehdr = Vec::with_capacity(EHDR_SIZE);
        ehdr.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        ehdr.extend_from_slice(&[0; 8]);
        ehdr.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        ehdr.extend_from_slice(&40u16.to_le_bytes()); // EM_ARM
        ehdr.extend_from_slice(&1u32.to_le_bytes());
        ehdr.extend_from_slice(&self.entry.to_le_bytes());
        let phoff = if self.segments.is_empty() { 0 } else { EHDR_SIZE as u32 };
        ehdr.extend_from_slice(&phoff.to_le_bytes());
        ehdr.extend_from_slice(&shoff.to_le_bytes());
        ehdr.extend_from_slice(&0x0500_0000u32.to_le_bytes());
        ehdr.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        ehdr.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        ehdr.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        ehdr.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        ehdr.extend_from_slice(&(sections.len() as u16).to_le_bytes());
        ehdr.extend_from_slice(&((sections.len() - 1) as u16).to_le_bytes());
        out[..EHDR_SIZE].copy_from_slice(&ehdr);

        // 程序头
        for (i, (seg, offset)) in self.segments.iter().zip(&offsets).enumerate() {
            let fields = [
                seg.p_type,
                *offset,
                seg.paddr,
                seg.paddr,
                seg.data.len() as u32,
                seg.memsz,
                7,
                4,
            ];
            let start = EHDR_SIZE + i * PHDR_SIZE;
            for (j, field) in fields.iter().enumerate() {
                out[start + j * 4..start + j * 4 + 4].copy_from_slice(&field.to_le_bytes());
            }
        }

        out
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

fn align_to(out: &mut Vec<u8>, align: usize) {
    while out.len() % align != 0 {
        out.push(0);
    }
}

fn push_name(table: &mut Vec<u8>, name: &str) -> u32 {
    let off = table.len() as u32;
    table.extend_from_slice(name.as_bytes());
    table.push(0);
    off
}
