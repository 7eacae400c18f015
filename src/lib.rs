//! ARM Cortex-M 固件模拟器库
//!
//! 把固件 ELF 加载到 CPU 模拟器中运行，固件里的 UART 桩函数被拦截，
//! 收发通过宿主的标准输入输出（或指定文件）完成。

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use uart::HostUart;

pub mod const_values;
pub mod emulator;
pub mod utils;

use crate::const_values::EmuConfig;
use crate::emulator::{Emulator, RunError, RunOutcome};

/// ARM Cortex-M 固件模拟器
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 固件 ELF 文件路径
    #[arg(value_name = "ELF")]
    pub elf: PathBuf,

    /// 配置文件路径 (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 只检查固件并打印映射范围和符号，不执行
    #[arg(long)]
    pub check: bool,

    /// UART 输入文件，默认使用标准输入
    #[arg(long, value_name = "PATH")]
    pub uart_in: Option<PathBuf>,

    /// UART 输出文件，默认使用标准输出
    #[arg(long, value_name = "PATH")]
    pub uart_out: Option<PathBuf>,

    /// 执行超时 (微秒)
    #[arg(long, value_name = "US")]
    pub timeout: Option<u64>,

    /// 最多执行的指令数, 0 表示不限
    #[arg(long, value_name = "N")]
    pub max_instructions: Option<usize>,

    /// 运行结束时打印最近执行的指令
    #[arg(long)]
    pub trace: bool,
}

impl Args {
    /// 读取配置文件，再用命令行参数覆盖
    pub fn load_config(&self) -> anyhow::Result<EmuConfig> {
        let mut config = match &self.config {
            Some(path) => EmuConfig::new(path)?,
            None => EmuConfig::default(),
        };
        if let Some(timeout) = self.timeout {
            config.run.timeout_us = timeout;
        }
        if let Some(count) = self.max_instructions {
            config.run.max_instructions = count;
        }
        if self.trace {
            config.debug.trace = true;
        }
        config.validate()?;
        Ok(config)
    }
}

type HostStreams = HostUart<Box<dyn Read>, Box<dyn Write>>;

fn open_uart(args: &Args, config: &EmuConfig) -> Result<HostStreams, RunError> {
    let input: Box<dyn Read> = match &args.uart_in {
        Some(path) => Box::new(File::open(path).map_err(|source| RunError::UartStream {
            path: path.clone(),
            source,
        })?),
        None => Box::new(io::stdin()),
    };
    let output: Box<dyn Write> = match &args.uart_out {
        Some(path) => Box::new(File::create(path).map_err(|source| RunError::UartStream {
            path: path.clone(),
            source,
        })?),
        None => Box::new(io::stdout()),
    };

    Ok(HostUart::new("uart0", input, output)
        .with_retry_interval(Duration::from_millis(config.uart.rx_retry_interval_ms))
        .with_fail_on_eof(config.uart.fail_on_eof))
}

pub fn build_emu_run_blocking(args: Args) -> Result<(), RunError> {
    let config = args.load_config().map_err(RunError::Config)?;
    let mut emu = Emulator::new(config);

    if args.check {
        let firmware = emu.inspect(&args.elf)?;
        println!("{}", firmware);
        return Ok(());
    }

    let uart = open_uart(&args, emu.config())?;
    info!(path = %args.elf.display(), "加载固件");
    let report = emu.run(&args.elf, uart)?;

    let pc = report.outcome.pc();
    match &report.outcome {
        RunOutcome::Completed { .. } => info!(
            pc = format_args!("{:#010x}", pc),
            tx = report.tx_count,
            rx = report.rx_count,
            "运行结束"
        ),
        RunOutcome::BudgetExhausted { .. } => warn!(
            pc = format_args!("{:#010x}", pc),
            tx = report.tx_count,
            rx = report.rx_count,
            "执行预算用完, 运行结束"
        ),
        RunOutcome::Faulted { reason, .. } => warn!(
            pc = format_args!("{:#010x}", pc),
            reason = %reason,
            "模拟器报告执行错误, 运行结束"
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_values::{DEFAULT_TIMEOUT_US, EXIT_BAD_ARGS, EXIT_LOAD};
    use crate::emulator::ErrorKind;
    use crate::utils::test_elf::ElfBuilder;

    fn firmware(dir: &std::path::Path) -> PathBuf {
        ElfBuilder::new()
            .segment(0x0800_0000, &[0x58, 0x20, 0x70, 0x47], 4)
            .symbol("main", 0x0800_0001)
            .symbol("__stack", 0x2000_0400)
            .symbol("unicorn_uart_tx", 0x0800_0003)
            .symbol("unicorn_uart_rx", 0x0800_0005)
            .write_to(dir, "fw.elf")
    }

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from(["firmware-emu", "fw.elf", "--timeout", "500", "--trace"]).unwrap();
        assert_eq!(args.elf, PathBuf::from("fw.elf"));
        assert_eq!(args.timeout, Some(500));
        assert!(args.trace);
        assert!(!args.check);

        // 缺少固件路径
        assert!(Args::try_parse_from(["firmware-emu"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[run]\ntimeout_us = 42\nmax_instructions = 7\n").unwrap();

        let args = Args::try_parse_from([
            "firmware-emu",
            "fw.elf",
            "--config",
            config_path.to_str().unwrap(),
            "--max-instructions",
            "100",
        ])
        .unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.run.timeout_us, 42);
        assert_eq!(config.run.max_instructions, 100);

        let args = Args::try_parse_from(["firmware-emu", "fw.elf"]).unwrap();
        assert_eq!(args.load_config().unwrap().run.timeout_us, DEFAULT_TIMEOUT_US);
    }

    #[test]
    fn test_bad_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[memory]\npage_align = 1000\n").unwrap();

        let args = Args::try_parse_from(["firmware-emu", "fw.elf", "-c", config_path.to_str().unwrap()]).unwrap();
        let err = build_emu_run_blocking(args).unwrap_err();
        assert!(matches!(err, RunError::Config(_)));
        assert_eq!(err.exit_code(), EXIT_BAD_ARGS);
    }

    #[test]
    fn test_check_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = firmware(dir.path());
        let args = Args::try_parse_from(["firmware-emu", path.to_str().unwrap(), "--check"]).unwrap();
        assert!(build_emu_run_blocking(args).is_ok());
    }

    #[test]
    fn test_check_mode_rejects_bad_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.elf");
        let args = Args::try_parse_from(["firmware-emu", path.to_str().unwrap(), "--check"]).unwrap();
        let err = build_emu_run_blocking(args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(err.exit_code(), EXIT_LOAD);
    }

    #[test]
    fn test_missing_uart_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = firmware(dir.path());
        let uart_in = dir.path().join("no-such-input");
        let args = Args::try_parse_from([
            "firmware-emu",
            path.to_str().unwrap(),
            "--uart-in",
            uart_in.to_str().unwrap(),
        ])
        .unwrap();
        let err = build_emu_run_blocking(args).unwrap_err();
        assert!(matches!(err, RunError::UartStream { .. }));
        assert_eq!(err.exit_code(), EXIT_BAD_ARGS);
    }
}
