//! 固件符号解析

use crate::const_values::{
    MIN_RESOLVED_SYMBOLS, SYM_MAIN, SYM_STACK, SYM_STACK_SIZE, SYM_UART_RX,
    SYM_UART_TX,
};
use crate::utils::elf::{FirmwareImage, ImageError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("固件中没有符号表")]
    NoSymbolTable,
    #[error("符号不足: 只匹配到 {found} 个, 至少需要 {required} 个")]
    InsufficientSymbols { found: u8, required: u8 },
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// 解析出的固件符号
///
/// 只统计匹配次数，不检查具体是哪几个符号，未匹配的符号为 `None`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbols {
    pub main: Option<u32>,
    pub stack_size: u32,
    pub stack: Option<u32>,
    pub uart_tx: Option<u32>,
    pub uart_rx: Option<u32>,
    /// 匹配次数，重复的符号会重复计数
    pub progress: u8,
}

impl ResolvedSymbols {
    fn with_stack_size(stack_size: u32) -> Self {
        Self {
            main: None,
            stack_size,
            stack: None,
            uart_tx: None,
            uart_rx: None,
            progress: 0,
        }
    }
}

/// 扫描一遍符号表，提取需要的符号
pub fn resolve<I, S>(symbols: I, default_stack_size: u32) -> Result<ResolvedSymbols, SymbolError>
where
    I: IntoIterator<Item = (S, u32)>,
    S: AsRef<str>,
{
    let mut resolved = ResolvedSymbols::with_stack_size(default_stack_size);

    for (name, value) in symbols {
        let slot = match name.as_ref() {
            SYM_MAIN => &mut resolved.main,
            SYM_STACK => &mut resolved.stack,
            SYM_UART_TX => &mut resolved.uart_tx,
            SYM_UART_RX => &mut resolved.uart_rx,
            SYM_STACK_SIZE => {
                resolved.stack_size = value;
                resolved.progress = resolved.progress.saturating_add(1);
                debug!(name = SYM_STACK_SIZE, value = format_args!("{:#x}", value), "匹配符号");
                continue;
            }
            _ => continue,
        };
        *slot = Some(value);
        resolved.progress = resolved.progress.saturating_add(1);
        debug!(name = name.as_ref(), value = format_args!("{:#x}", value), "匹配符号");
    }

    if resolved.progress < MIN_RESOLVED_SYMBOLS {
        return Err(SymbolError::InsufficientSymbols {
            found: resolved.progress,
            required: MIN_RESOLVED_SYMBOLS,
        });
    }
    Ok(resolved)
}

/// 从固件的符号表解析
pub fn resolve_image(
    image: &FirmwareImage,
    default_stack_size: u32,
) -> Result<ResolvedSymbols, SymbolError> {
    let symbols = image.symbols()?.ok_or(SymbolError::NoSymbolTable)?;
    resolve(symbols, default_stack_size)
}
