//! 调用约定
//!
//! 外设桥只和寄存器角色、模式位打交道，具体架构在这里描述。

use super::engine::Register;

#[cfg(feature = "unicorn")]
use unicorn_engine::RegisterARM;
#[cfg(feature = "unicorn")]
use unicorn_engine::unicorn_const::{Arch, Mode};

pub trait CallingConvention: Copy + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// 去掉模式位后的取指地址
    fn code_address(&self, addr: u32) -> u32;

    /// 带模式位的入口地址
    fn entry_address(&self, addr: u32) -> u32;

    /// 寄存器角色对应的 unicorn 寄存器号
    #[cfg(feature = "unicorn")]
    fn unicorn_register(&self, reg: Register) -> i32;

    #[cfg(feature = "unicorn")]
    fn unicorn_arch(&self) -> (Arch, Mode);
}

/// ARM Thumb（Cortex-M）
///
/// 地址最低位是 Thumb 模式位，参数和返回值都在 R0，返回地址在 LR。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmThumb;

const THUMB_BIT: u32 = 1;

impl CallingConvention for ArmThumb {
    fn name(&self) -> &'static str {
        "arm-thumb"
    }

    #[inline(always)]
    fn code_address(&self, addr: u32) -> u32 {
        addr & !THUMB_BIT
    }

    #[inline(always)]
    fn entry_address(&self, addr: u32) -> u32 {
        addr | THUMB_BIT
    }

    #[cfg(feature = "unicorn")]
    fn unicorn_register(&self, reg: Register) -> i32 {
        let id = match reg {
            Register::ProgramCounter => RegisterARM::PC,
            Register::StackPointer => RegisterARM::SP,
            Register::LinkRegister => RegisterARM::LR,
            Register::Argument0 | Register::ReturnValue => RegisterARM::R0,
        };
        id.into()
    }

    #[cfg(feature = "unicorn")]
    fn unicorn_arch(&self) -> (Arch, Mode) {
        (Arch::ARM, Mode::THUMB | Mode::MCLASS)
    }
}

/// 软件寄存器文件使用的寄存器槽位
#[inline(always)]
pub(crate) fn arm_slot(reg: Register) -> usize {
    match reg {
        Register::Argument0 | Register::ReturnValue => 0,
        Register::StackPointer => 13,
        Register::LinkRegister => 14,
        Register::ProgramCounter => 15,
    }
}
