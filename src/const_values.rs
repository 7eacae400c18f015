use anyhow::{self, Context};
use serde::Deserialize;
use std::path::Path;

/// 固件入口符号
pub const SYM_MAIN: &str = "main";
/// 栈大小符号
pub const SYM_STACK_SIZE: &str = "Stack_Size";
/// 栈地址符号
pub const SYM_STACK: &str = "__stack";
/// UART 发送桩函数
pub const SYM_UART_TX: &str = "unicorn_uart_tx";
/// UART 接收桩函数
pub const SYM_UART_RX: &str = "unicorn_uart_rx";

/// 至少需要匹配的符号数（五个中的四个）
pub const MIN_RESOLVED_SYMBOLS: u8 = 4;

/// 未定义 `Stack_Size` 时使用的栈大小
pub const DEFAULT_STACK_SIZE: u32 = 1024 * 100;
/// 映射粒度
pub const PAGE_ALIGN: u32 = 1024;
/// 执行超时（微秒）
pub const DEFAULT_TIMEOUT_US: u64 = 10 * 1000 * 1000;
pub const DEFAULT_TRACE_LIST_SIZE: usize = 64;

/// 进程退出码
pub const EXIT_BAD_ARGS: i32 = -1;
pub const EXIT_ENGINE_INIT: i32 = -2;
pub const EXIT_LOAD: i32 = -3;
pub const EXIT_RUNTIME: i32 = -4;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub page_align: u32,
    pub default_stack_size: u32,
    /// 是否显式清零 memsz 超出 filesz 的部分
    pub zero_fill_bss: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_align: PAGE_ALIGN,
            default_stack_size: DEFAULT_STACK_SIZE,
            zero_fill_bss: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub timeout_us: u64,
    /// 0 表示不限制指令数
    pub max_instructions: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_us: DEFAULT_TIMEOUT_US,
            max_instructions: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UartConfig {
    pub rx_retry_interval_ms: u64,
    pub fail_on_eof: bool,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            rx_retry_interval_ms: 1,
            fail_on_eof: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub trace: bool,
    pub trace_list_size: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            trace: false,
            trace_list_size: DEFAULT_TRACE_LIST_SIZE,
        }
    }
}

/// 模拟器配置（profile/config.toml），所有字段均有默认值
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct EmuConfig {
    pub memory: MemoryConfig,
    pub run: RunConfig,
    pub uart: UartConfig,
    pub debug: DebugConfig,
}

impl EmuConfig {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<EmuConfig> {
        let toml_str = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref().as_os_str()))?;
        let config: EmuConfig = toml::from_str(&toml_str)
            .with_context(|| format!("无法解析配置文件: {:?}", path.as_ref().as_os_str()))?;
        config.validate()?;
        anyhow::Ok(config)
    }

    /// 检查取值范围
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.memory.page_align == 0 || !self.memory.page_align.is_power_of_two() {
            anyhow::bail!("memory.page_align 必须是 2 的幂: {}", self.memory.page_align);
        }
        if self.debug.trace && self.debug.trace_list_size == 0 {
            anyhow::bail!("debug.trace_list_size 不能为 0");
        }
        Ok(())
    }
}
