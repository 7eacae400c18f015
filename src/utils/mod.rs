//! 工具模块

pub mod disasm;
pub mod elf;
pub mod symbols;

#[cfg(test)]
pub(crate) mod test_elf;

pub use disasm::ThumbDisassembler;
pub use elf::{FirmwareImage, ImageError, Segment};
