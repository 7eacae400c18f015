//! 外设桥
//!
//! 引擎在每次取指前回调 [`PeripheralBridge::on_fetch`]。PC 落在 UART 桩函数入口时，
//! 桥在宿主侧完成收发，再把 PC 设为 LR 模拟函数返回，桩函数本身的指令不会执行。

use rustc_hash::FxHashMap;
use serial_trait::{DeviceError, SerialDevice};
use thiserror::Error;
use tracing::trace;

use super::arch::CallingConvention;
use super::engine::{CpuAccess, EngineError, Register};
use crate::utils::symbols::ResolvedSymbols;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("外设桥访问寄存器失败: {0}")]
    Engine(#[from] EngineError),
    #[error("串口设备错误: {0}")]
    Device(#[from] DeviceError),
}

/// 桩函数种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    UartTx,
    UartRx,
}

/// 一次回调的效果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeAction {
    /// 不是桩函数，正常执行
    Passthrough,
    Transmitted(u8),
    Received(u8),
}

pub struct PeripheralBridge<C, D> {
    convention: C,
    /// 去掉模式位的桩函数地址
    stubs: FxHashMap<u32, StubKind>,
    device: D,
    tx_count: u64,
    rx_count: u64,
}

impl<C: CallingConvention, D: SerialDevice> PeripheralBridge<C, D> {
    pub fn new(convention: C, uart_tx: Option<u32>, uart_rx: Option<u32>, device: D) -> Self {
        let mut stubs = FxHashMap::default();
        // 两个地址相同时发送优先
        if let Some(addr) = uart_rx {
            stubs.insert(convention.code_address(addr), StubKind::UartRx);
        }
        if let Some(addr) = uart_tx {
            stubs.insert(convention.code_address(addr), StubKind::UartTx);
        }
        Self {
            convention,
            stubs,
            device,
            tx_count: 0,
            rx_count: 0,
        }
    }

    pub fn from_symbols(convention: C, symbols: &ResolvedSymbols, device: D) -> Self {
        Self::new(convention, symbols.uart_tx, symbols.uart_rx, device)
    }

    /// 地址是否是桩函数入口
    pub fn stub_at(&self, addr: u32) -> Option<StubKind> {
        self.stubs.get(&self.convention.code_address(addr)).copied()
    }

    /// 取指前回调
    pub fn on_fetch<P: CpuAccess + ?Sized>(&mut self, cpu: &mut P) -> Result<BridgeAction, BridgeError> {
        let pc = cpu.read_reg(Register::ProgramCounter)?;
        let Some(kind) = self.stub_at(pc) else {
            return Ok(BridgeAction::Passthrough);
        };

        match kind {
            StubKind::UartTx => {
                let arg = cpu.read_reg(Register::Argument0)?;
                let lr = cpu.read_reg(Register::LinkRegister)?;
                let byte = arg as u8;
                self.device.transmit(byte)?;
                cpu.write_reg(Register::ProgramCounter, lr)?;
                self.tx_count += 1;
                trace!(pc = format_args!("{:#010x}", pc), ret = format_args!("{:#010x}", lr), byte, "uart tx");
                Ok(BridgeAction::Transmitted(byte))
            }
            StubKind::UartRx => {
                let lr = cpu.read_reg(Register::LinkRegister)?;
                // 阻塞直到宿主输入可读
                let byte = self.device.receive()?;
                cpu.write_reg(Register::ReturnValue, byte as u32)?;
                cpu.write_reg(Register::ProgramCounter, lr)?;
                self.rx_count += 1;
                trace!(pc = format_args!("{:#010x}", pc), ret = format_args!("{:#010x}", lr), byte, "uart rx");
                Ok(BridgeAction::Received(byte))
            }
        }
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    pub fn rx_count(&self) -> u64 {
        self.rx_count
    }

    pub fn into_device(self) -> D {
        self.device
    }
}
