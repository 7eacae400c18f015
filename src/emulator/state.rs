//! 运行状态与寄存器文件

use std::fmt;

use super::arch::arm_slot;
use super::engine::{CpuAccess, EngineError, Register};

/// 执行驱动的状态
///
/// 状态严格按顺序推进，任何一步失败都直接进入 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ExecState {
    #[default]
    Uninitialized,
    EngineOpen,
    ImageLoaded,
    BridgeInstalled,
    Running,
    Completed,
    Failed,
}

impl ExecState {
    /// 正常推进时的下一个状态
    pub fn next(self) -> Option<ExecState> {
        match self {
            ExecState::Uninitialized => Some(ExecState::EngineOpen),
            ExecState::EngineOpen => Some(ExecState::ImageLoaded),
            ExecState::ImageLoaded => Some(ExecState::BridgeInstalled),
            ExecState::BridgeInstalled => Some(ExecState::Running),
            ExecState::Running => Some(ExecState::Completed),
            ExecState::Completed | ExecState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecState::Completed | ExecState::Failed)
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecState::Uninitialized => "uninitialized",
            ExecState::EngineOpen => "engine-open",
            ExecState::ImageLoaded => "image-loaded",
            ExecState::BridgeInstalled => "bridge-installed",
            ExecState::Running => "running",
            ExecState::Completed => "completed",
            ExecState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 执行到了结束地址
    Completed { pc: u32 },
    /// 超时或指令数用完
    BudgetExhausted { pc: u32 },
    /// 引擎报告的执行错误（非法指令、未映射访问等）
    Faulted { pc: u32, reason: String },
}

impl RunOutcome {
    pub fn pc(&self) -> u32 {
        match self {
            RunOutcome::Completed { pc }
            | RunOutcome::BudgetExhausted { pc }
            | RunOutcome::Faulted { pc, .. } => *pc,
        }
    }
}

/// 软件寄存器文件（R0-R15）
#[derive(Debug, Clone, Default)]
pub struct State {
    registers: [u32; 16],
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CpuAccess for State {
    fn read_reg(&self, reg: Register) -> Result<u32, EngineError> {
        Ok(self.registers[arm_slot(reg)])
    }

    fn write_reg(&mut self, reg: Register, value: u32) -> Result<(), EngineError> {
        self.registers[arm_slot(reg)] = value;
        Ok(())
    }
}
