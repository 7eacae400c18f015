//! unicorn CPU 后端

use unicorn_engine::Unicorn;
use unicorn_engine::unicorn_const::Permission;

use super::arch::CallingConvention;
use super::engine::{AddressSpace, CpuAccess, EngineError, Register};

/// 基于 unicorn 的 CPU 后端
pub struct UnicornBackend<C> {
    uc: Unicorn<'static, ()>,
    convention: C,
}

impl<C: CallingConvention + 'static> UnicornBackend<C> {
    pub fn new(convention: C) -> Result<Self, EngineError> {
        let (arch, mode) = convention.unicorn_arch();
        let uc = Unicorn::new(arch, mode).map_err(|e| EngineError::Init(format!("{:?}", e)))?;
        tracing::debug!(arch = convention.name(), "unicorn 引擎已创建");
        Ok(Self { uc, convention })
    }

    /// 注册取指钩子，覆盖 `[begin, end]`（闭区间），回调参数为当前指令地址
    pub fn add_fetch_hook<F>(&mut self, begin: u32, end: u64, mut callback: F) -> Result<(), EngineError>
    where
        F: FnMut(&mut UnicornCpu<'_, '_, C>, u32) + 'static,
    {
        let convention = self.convention;
        self.uc
            .add_code_hook(begin as u64, end, move |uc, addr, _size| {
                let mut cpu = UnicornCpu { uc, convention };
                callback(&mut cpu, addr as u32);
            })
            .map_err(|e| EngineError::Hook(format!("{:?}", e)))?;
        Ok(())
    }

    /// 从 `entry` 开始执行，到达 `until` 或预算用完时返回
    pub fn start(&mut self, entry: u32, until: u64, timeout_us: u64, count: usize) -> Result<(), EngineError> {
        self.uc
            .emu_start(entry as u64, until, timeout_us, count)
            .map_err(|e| EngineError::Execution(format!("{:?}", e)))
    }
}

impl<C: CallingConvention> AddressSpace for UnicornBackend<C> {
    fn map(&mut self, addr: u32, size: u32) -> Result<(), EngineError> {
        self.uc
            .mem_map(addr as u64, size as usize, Permission::ALL)
            .map_err(|e| EngineError::Map {
                addr,
                size,
                reason: format!("{:?}", e),
            })
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), EngineError> {
        self.uc.mem_write(addr as u64, data).map_err(|e| EngineError::Write {
            addr,
            len: data.len(),
            reason: format!("{:?}", e),
        })
    }

    fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        self.uc.mem_read_as_vec(addr as u64, len).map_err(|e| EngineError::Read {
            addr,
            len,
            reason: format!("{:?}", e),
        })
    }
}

impl<C: CallingConvention> CpuAccess for UnicornBackend<C> {
    fn read_reg(&self, reg: Register) -> Result<u32, EngineError> {
        read_reg(&self.uc, self.convention, reg)
    }

    fn write_reg(&mut self, reg: Register, value: u32) -> Result<(), EngineError> {
        write_reg(&mut self.uc, self.convention, reg, value)
    }
}

/// 钩子回调中看到的 CPU
pub struct UnicornCpu<'a, 'u, C> {
    uc: &'a mut Unicorn<'u, ()>,
    convention: C,
}

impl<C: CallingConvention> UnicornCpu<'_, '_, C> {
    /// 请求引擎在当前指令后停止
    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.uc
            .emu_stop()
            .map_err(|e| EngineError::Execution(format!("{:?}", e)))
    }
}

impl<C: CallingConvention> CpuAccess for UnicornCpu<'_, '_, C> {
    fn read_reg(&self, reg: Register) -> Result<u32, EngineError> {
        read_reg(&*self.uc, self.convention, reg)
    }

    fn write_reg(&mut self, reg: Register, value: u32) -> Result<(), EngineError> {
        write_reg(&mut *self.uc, self.convention, reg, value)
    }
}

#[inline(always)]
fn read_reg<C: CallingConvention>(uc: &Unicorn<'_, ()>, convention: C, reg: Register) -> Result<u32, EngineError> {
    uc.reg_read(convention.unicorn_register(reg))
        .map(|value| value as u32)
        .map_err(|e| EngineError::Register {
            reg,
            reason: format!("{:?}", e),
        })
}

#[inline(always)]
fn write_reg<C: CallingConvention>(
    uc: &mut Unicorn<'_, ()>,
    convention: C,
    reg: Register,
    value: u32,
) -> Result<(), EngineError> {
    uc.reg_write(convention.unicorn_register(reg), value as u64)
        .map_err(|e| EngineError::Register {
            reg,
            reason: format!("{:?}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::arch::ArmThumb;

    #[test]
    fn test_map_write_read() {
        let mut backend = UnicornBackend::new(ArmThumb).unwrap();
        backend.map(0x2000_0000, 0x400).unwrap();
        backend.write(0x2000_0010, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.read(0x2000_0010, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(backend.write(0x3000_0000, &[0]).is_err());
    }

    #[test]
    fn test_register_roles() {
        let mut backend = UnicornBackend::new(ArmThumb).unwrap();
        backend.write_reg(Register::StackPointer, 0x2000_0400).unwrap();
        backend.write_reg(Register::Argument0, 0x58).unwrap();
        assert_eq!(backend.read_reg(Register::StackPointer).unwrap(), 0x2000_0400);
        assert_eq!(backend.read_reg(Register::ReturnValue).unwrap(), 0x58);
    }
}
