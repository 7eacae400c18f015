//! ARM Thumb 指令反汇编模块

use anyhow::{Result, anyhow};
use capstone::arch::arm::{ArchExtraMode, ArchMode};
use capstone::prelude::*;

/// Thumb 指令最长 4 字节
pub const MAX_THUMB_INSN_LEN: usize = 4;

/// ARM Thumb（Cortex-M）反汇编器
pub struct ThumbDisassembler {
    cs: Capstone,
}

impl ThumbDisassembler {
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .arm()
            .mode(ArchMode::Thumb)
            .extra_mode([ArchExtraMode::MClass].iter().copied())
            .detail(true)
            .build()
            .map_err(|e| anyhow!("无法创建 capstone 反汇编引擎: {}", e))?;

        Ok(Self { cs })
    }

    /// 反汇编 `code` 开头的一条指令
    ///
    /// 返回指令长度和文本，无法识别时返回 `None`。
    pub fn disasm_one(&self, code: &[u8], address: u32) -> Result<Option<(usize, String)>> {
        let insns = self
            .cs
            .disasm_count(code, address as u64, 1)
            .map_err(|e| anyhow!("反汇编失败: {}", e))?;

        Ok(insns.iter().next().map(|insn| {
            let mnemonic = insn.mnemonic().unwrap_or("<unknown>");
            let text = match insn.op_str() {
                Some(op) if !op.is_empty() => format!("{} {}", mnemonic, op),
                _ => mnemonic.to_string(),
            };
            (insn.bytes().len(), text)
        }))
    }
}
