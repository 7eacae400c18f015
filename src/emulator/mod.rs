//! 模拟器核心模块
//!
//! [`Emulator`] 是执行驱动：打开引擎、加载固件、安装外设桥、运行，
//! 状态按 [`ExecState`] 的顺序推进，任何一步失败都进入 `Failed`。
//! 资源全部由局部变量持有，出错提前返回时按获取的逆序释放。

pub mod arch;
#[cfg(feature = "unicorn")]
pub mod backend;
pub mod bridge;
pub mod engine;
pub mod loader;
pub mod memory;
pub mod state;
pub mod tracer;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serial_trait::SerialDevice;
use thiserror::Error;
use tracing::{debug, warn};

use crate::const_values::{EXIT_BAD_ARGS, EXIT_ENGINE_INIT, EXIT_LOAD, EXIT_RUNTIME, EmuConfig};
use crate::utils::elf::{FirmwareImage, ImageError};
use crate::utils::symbols::{ResolvedSymbols, SymbolError, resolve_image};

pub use arch::{ArmThumb, CallingConvention};
pub use bridge::{BridgeAction, BridgeError, PeripheralBridge};
pub use engine::{AddressSpace, CpuAccess, EngineError, Register};
pub use loader::{LoadError, LoadReport, MemoryLoader, StackRegion};
pub use memory::{AddressRange, Memory, MemoryError, compute_range};
pub use state::{ExecState, RunOutcome, State};
pub use tracer::FetchTracer;

/// 不能执行指令的软件机器，用于检查模式和测试
#[derive(Debug, Clone, Default)]
pub struct SoftMachine {
    pub memory: Memory,
    pub state: State,
}

impl AddressSpace for SoftMachine {
    fn map(&mut self, addr: u32, size: u32) -> Result<(), EngineError> {
        self.memory.map(addr, size)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), EngineError> {
        self.memory.write(addr, data)
    }

    fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        self.memory.read(addr, len)
    }
}

impl CpuAccess for SoftMachine {
    fn read_reg(&self, reg: Register) -> Result<u32, EngineError> {
        self.state.read_reg(reg)
    }

    fn write_reg(&mut self, reg: Register, value: u32) -> Result<(), EngineError> {
        self.state.write_reg(reg, value)
    }
}

/// 错误类别，对应进程退出时的失败阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 文件缺失、不可读、不是目标文件，参数或配置错误
    Input,
    /// 结构损坏、没有符号表、符号不足
    Parse,
    /// 内存映射或段写入失败
    Mapping,
    /// 引擎初始化或钩子注册失败
    Engine,
    /// 运行期间的宿主 I/O 失败
    Runtime,
}

/// 固件加载阶段的错误
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("计算固件地址范围失败: {0}")]
    Footprint(#[from] MemoryError),
    #[error(transparent)]
    Symbols(#[from] SymbolError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("设置寄存器失败: {0}")]
    Cpu(#[from] EngineError),
}

impl FirmwareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FirmwareError::Image(e) | FirmwareError::Symbols(SymbolError::Image(e)) => match e {
                ImageError::Malformed(_) => ErrorKind::Parse,
                _ => ErrorKind::Input,
            },
            FirmwareError::Footprint(_) | FirmwareError::Symbols(_) => ErrorKind::Parse,
            FirmwareError::Load(_) => ErrorKind::Mapping,
            FirmwareError::Cpu(_) => ErrorKind::Engine,
        }
    }
}

/// 执行驱动返回的错误
#[derive(Debug, Error)]
pub enum RunError {
    #[error("配置错误: {0:#}")]
    Config(anyhow::Error),
    #[error("无法打开 UART 流 '{}': {source}", path.display())]
    UartStream {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("模拟器初始化失败: {0}")]
    Engine(#[source] EngineError),
    #[error("固件加载失败: {0}")]
    Firmware(#[from] FirmwareError),
    #[error("外设桥运行失败 (pc = {pc:#010x}): {source}")]
    Bridge {
        pc: u32,
        #[source]
        source: BridgeError,
    },
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Config(_) | RunError::UartStream { .. } => ErrorKind::Input,
            RunError::Engine(_) => ErrorKind::Engine,
            RunError::Firmware(e) => e.kind(),
            RunError::Bridge { .. } => ErrorKind::Runtime,
        }
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::UartStream { .. } => EXIT_BAD_ARGS,
            RunError::Engine(_) => EXIT_ENGINE_INIT,
            RunError::Firmware(_) => EXIT_LOAD,
            RunError::Bridge { .. } => EXIT_RUNTIME,
        }
    }
}

/// 已加载进地址空间的固件
#[derive(Debug, Clone)]
pub struct LoadedFirmware {
    pub path: PathBuf,
    pub range: AddressRange,
    pub symbols: ResolvedSymbols,
    /// 带模式位的入口地址
    pub entry: u32,
    pub segment_count: usize,
    pub report: LoadReport,
    pub stack: Option<StackRegion>,
}

impl fmt::Display for LoadedFirmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} is a valid ELF file", self.path.display())?;
        writeln!(
            f,
            "Mapping ELF from [0x{:08x} - 0x{:08x}] (len = {})",
            self.range.min,
            self.range.max,
            self.range.max - self.range.min
        )?;
        writeln!(f, "  segments : {}", self.segment_count)?;
        writeln!(f, "  entry    : 0x{:08x}", self.entry)?;
        let symbol = |value: Option<u32>| match value {
            Some(v) => format!("0x{:08x}", v),
            None => "<missing>".to_string(),
        };
        writeln!(f, "  main     : {}", symbol(self.symbols.main))?;
        writeln!(f, "  __stack  : {} (size {:#x})", symbol(self.symbols.stack), self.symbols.stack_size)?;
        writeln!(f, "  uart_tx  : {}", symbol(self.symbols.uart_tx))?;
        write!(f, "  uart_rx  : {}", symbol(self.symbols.uart_rx))
    }
}

/// 读取固件、写入地址空间、设置栈
///
/// 固件文件内容只在这个函数内存活。
pub fn prepare<M, C>(
    machine: &mut M,
    convention: C,
    path: &Path,
    config: &EmuConfig,
) -> Result<LoadedFirmware, FirmwareError>
where
    M: AddressSpace + CpuAccess + ?Sized,
    C: CallingConvention,
{
    let image = FirmwareImage::open(path)?;
    let segments = image.segments()?;
    debug!(path = %image.path().display(), segments = segments.len(), "读取程序头");
    let range = compute_range(&segments, config.memory.page_align)?;
    debug!(
        min = format_args!("{:#010x}", range.min),
        max = format_args!("{:#010x}", range.max),
        length = format_args!("{:#x}", range.length),
        "固件地址范围"
    );
    let symbols = resolve_image(&image, config.memory.default_stack_size)?;

    let loader = MemoryLoader::new(config.memory.zero_fill_bss);
    let report = loader.load(machine, image.data(), &segments, &range)?;

    let stack = match symbols.stack {
        Some(base) => {
            let region = loader.map_stack(machine, base, symbols.stack_size);
            machine.write_reg(Register::StackPointer, base)?;
            Some(region)
        }
        None => {
            warn!("固件没有 __stack 符号, 不设置栈");
            None
        }
    };

    let main = match symbols.main {
        Some(main) => main,
        None => {
            let entry = image.entry()?;
            warn!(entry = format_args!("{:#010x}", entry), "固件没有 main 符号, 使用 ELF 入口地址");
            entry
        }
    };

    Ok(LoadedFirmware {
        path: path.to_path_buf(),
        range,
        symbols,
        entry: convention.entry_address(main),
        segment_count: segments.len(),
        report,
        stack,
    })
}

/// 一次运行的汇总
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub firmware: LoadedFirmware,
    pub tx_count: u64,
    pub rx_count: u64,
}

/// 执行驱动
pub struct Emulator {
    config: EmuConfig,
    exec_state: ExecState,
}

impl Emulator {
    pub fn new(config: EmuConfig) -> Self {
        Self {
            config,
            exec_state: ExecState::Uninitialized,
        }
    }

    #[inline(always)]
    pub fn get_exec_state(&self) -> ExecState {
        self.exec_state
    }

    pub fn config(&self) -> &EmuConfig {
        &self.config
    }

    fn transition(&mut self, to: ExecState) {
        debug_assert!(
            to == ExecState::Failed || self.exec_state.next() == Some(to),
            "非法状态切换: {} -> {}",
            self.exec_state,
            to
        );
        debug!(from = %self.exec_state, to = %to, "状态切换");
        self.exec_state = to;
    }

    /// 只加载到软件机器上检查，不执行
    pub fn inspect(&self, path: &Path) -> Result<LoadedFirmware, RunError> {
        let mut machine = SoftMachine::default();
        Ok(prepare(&mut machine, ArmThumb, path, &self.config)?)
    }

    /// 加载并运行固件，阻塞到运行结束
    pub fn run<D: SerialDevice + 'static>(&mut self, path: &Path, device: D) -> Result<RunReport, RunError> {
        // 上一次运行已结束，从头开始
        if self.exec_state.is_terminal() {
            self.exec_state = ExecState::Uninitialized;
        }
        let result = self.run_stages(path, device);
        match &result {
            Ok(_) => self.transition(ExecState::Completed),
            Err(_) => self.transition(ExecState::Failed),
        }
        result
    }

    #[cfg(not(feature = "unicorn"))]
    fn run_stages<D: SerialDevice + 'static>(&mut self, path: &Path, device: D) -> Result<RunReport, RunError> {
        let _ = (path, device);
        Err(RunError::Engine(EngineError::BackendUnavailable))
    }

    #[cfg(feature = "unicorn")]
    fn run_stages<D: SerialDevice + 'static>(&mut self, path: &Path, device: D) -> Result<RunReport, RunError> {
        use std::cell::RefCell;
        use std::rc::Rc;

        use backend::UnicornBackend;
        use tracing::{error, info};

        struct HookContext<D> {
            bridge: PeripheralBridge<ArmThumb, D>,
            tracer: Option<FetchTracer>,
            error: Option<(u32, BridgeError)>,
        }

        let convention = ArmThumb;
        let mut backend = UnicornBackend::new(convention).map_err(RunError::Engine)?;
        self.transition(ExecState::EngineOpen);

        let firmware = prepare(&mut backend, convention, path, &self.config)?;
        info!(
            path = %path.display(),
            segments = firmware.report.segments_written,
            bytes = firmware.report.bytes_written,
            "固件已加载"
        );
        self.transition(ExecState::ImageLoaded);

        let tracer = self
            .config
            .debug
            .trace
            .then(|| FetchTracer::new(self.config.debug.trace_list_size));
        let context = Rc::new(RefCell::new(HookContext {
            bridge: PeripheralBridge::from_symbols(convention, &firmware.symbols, device),
            tracer,
            error: None,
        }));

        let hook_context = Rc::clone(&context);
        backend
            .add_fetch_hook(firmware.range.min, firmware.range.last(), move |cpu, addr| {
                let mut guard = hook_context.borrow_mut();
                let ctx = &mut *guard;
                if let Some(tracer) = ctx.tracer.as_mut() {
                    tracer.record(addr);
                }
                if ctx.error.is_some() {
                    return;
                }
                if let Err(e) = ctx.bridge.on_fetch(cpu) {
                    ctx.error = Some((addr, e));
                    if let Err(stop) = cpu.stop() {
                        error!("无法停止模拟器: {}", stop);
                    }
                }
            })
            .map_err(RunError::Engine)?;
        self.transition(ExecState::BridgeInstalled);

        let until = firmware.range.end();
        info!(
            entry = format_args!("{:#010x}", firmware.entry),
            until = format_args!("{:#010x}", until),
            "开始执行"
        );
        self.transition(ExecState::Running);
        let started = backend.start(
            firmware.entry,
            until,
            self.config.run.timeout_us,
            self.config.run.max_instructions,
        );
        let pc = backend.read_reg(Register::ProgramCounter).map_err(RunError::Engine)?;

        let mut ctx = context.borrow_mut();
        if let Some(tracer) = ctx.tracer.as_ref() {
            info!(fetches = tracer.total(), "最近执行的指令:\n{}", tracer.get_instructions_log(&backend));
        }
        if let Some((pc, source)) = ctx.error.take() {
            return Err(RunError::Bridge { pc, source });
        }

        let outcome = match started {
            Ok(()) if convention.code_address(pc) as u64 == until => RunOutcome::Completed { pc },
            Ok(()) => RunOutcome::BudgetExhausted { pc },
            Err(e) => RunOutcome::Faulted {
                pc,
                reason: e.to_string(),
            },
        };

        Ok(RunReport {
            outcome,
            tx_count: ctx.bridge.tx_count(),
            rx_count: ctx.bridge.rx_count(),
            firmware,
        })
    }
}
