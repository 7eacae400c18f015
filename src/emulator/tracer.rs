//! 取指追踪
//!
//! 记录最近执行的若干个 PC，出错时配合反汇编打印现场。

use std::collections::VecDeque;

use super::engine::AddressSpace;
use crate::utils::disasm::{MAX_THUMB_INSN_LEN, ThumbDisassembler};

pub struct FetchTracer {
    pcs: VecDeque<u32>,
    capacity: usize,
    total: u64,
    disasm: Option<ThumbDisassembler>,
}

impl FetchTracer {
    pub fn new(capacity: usize) -> Self {
        let disasm = match ThumbDisassembler::new() {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!("反汇编器不可用, 追踪日志只输出机器码: {e:#}");
                None
            }
        };
        Self {
            pcs: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            total: 0,
            disasm,
        }
    }

    /// 记录一次取指，超出容量时丢弃最旧的
    #[inline(always)]
    pub fn record(&mut self, pc: u32) {
        if self.pcs.len() == self.capacity {
            self.pcs.pop_front();
        }
        self.pcs.push_back(pc);
        self.total += 1;
    }

    /// 累计记录的取指次数
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn recent(&self) -> impl Iterator<Item = u32> + '_ {
        self.pcs.iter().copied()
    }

    /// 从旧到新打印记录的指令
    pub fn get_instructions_log<A: AddressSpace + ?Sized>(&self, space: &A) -> String {
        let mut log = String::new();
        for pc in self.recent() {
            log += &self.format_line(space, pc);
            log.push('\n');
        }
        log
    }

    fn format_line<A: AddressSpace + ?Sized>(&self, space: &A, pc: u32) -> String {
        // 区域末尾可能只剩一条 16 位指令
        let code = space
            .read(pc, MAX_THUMB_INSN_LEN)
            .or_else(|_| space.read(pc, 2));
        let Ok(code) = code else {
            return format!("{:08x}: <unmapped>", pc);
        };

        let decoded = self
            .disasm
            .as_ref()
            .and_then(|d| d.disasm_one(&code, pc).ok().flatten());
        match decoded {
            Some((len, text)) => format!("{:08x}: {:<8}  {}", pc, hex::encode(&code[..len]), text),
            None => format!("{:08x}: {:<8}  <invalid>", pc, hex::encode(&code[..2])),
        }
    }
}
