use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::{self, EnvFilter};

use firmware_emu::const_values::EXIT_BAD_ARGS;
use firmware_emu::{Args, build_emu_run_blocking};

fn main() {
    // 初始化日志, 写到标准错误, 标准输出留给固件的 UART
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_target(false) // 不显示目标模块
        .with_file(true) // 显示文件名
        .with_line_number(true) // 显示行号
        .init();

    // 解析命令行参数, --help/--version 正常退出
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_BAD_ARGS } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "启动固件模拟器");

    if let Err(e) = build_emu_run_blocking(args) {
        error!(kind = ?e.kind(), "{}", e);
        std::process::exit(e.exit_code());
    }
}
