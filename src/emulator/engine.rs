//! CPU 模拟引擎接口
//!
//! 核心逻辑只依赖这里的两个 trait：地址空间和寄存器访问。
//! unicorn 后端和纯软件的 [`SoftMachine`](super::SoftMachine) 都实现它们。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("模拟器初始化失败: {0}")]
    Init(String),
    #[error("未启用 CPU 后端, 请开启 `unicorn` 特性重新编译")]
    BackendUnavailable,
    #[error("内存映射失败: 地址 {addr:#010x}, 大小 {size:#x}: {reason}")]
    Map { addr: u32, size: u32, reason: String },
    #[error("内存写入失败: 地址 {addr:#010x}, 长度 {len:#x}: {reason}")]
    Write { addr: u32, len: usize, reason: String },
    #[error("内存读取失败: 地址 {addr:#010x}, 长度 {len:#x}: {reason}")]
    Read { addr: u32, len: usize, reason: String },
    #[error("寄存器 {reg:?} 访问失败: {reason}")]
    Register { reg: Register, reason: String },
    #[error("钩子注册失败: {0}")]
    Hook(String),
    #[error("执行失败: {0}")]
    Execution(String),
}

/// 与架构无关的寄存器角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    ProgramCounter,
    StackPointer,
    LinkRegister,
    /// 第一个参数
    Argument0,
    /// 返回值
    ReturnValue,
}

/// 被模拟的地址空间
pub trait AddressSpace {
    /// 以读/写/执行权限映射一段内存
    fn map(&mut self, addr: u32, size: u32) -> Result<(), EngineError>;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), EngineError>;

    fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>, EngineError>;
}

/// 寄存器读写
pub trait CpuAccess {
    fn read_reg(&self, reg: Register) -> Result<u32, EngineError>;

    fn write_reg(&mut self, reg: Register, value: u32) -> Result<(), EngineError>;
}
