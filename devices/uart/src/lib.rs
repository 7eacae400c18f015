//! UART 设备实现
//!
//! 固件中的 `unicorn_uart_tx` / `unicorn_uart_rx` 桩函数被拦截后，
//! 由这里的 [`HostUart`] 把字节送到宿主的输出流、从宿主的输入流取字节。

use serial_trait::{DeviceError, SerialDevice};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

/// 默认的接收重试间隔
pub const DEFAULT_RX_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// 宿主侧 UART
pub struct HostUart<R, W> {
    name: String,
    input: R,
    output: W,
    /// 输入暂无数据时两次读取之间的等待时间
    retry_interval: Duration,
    /// 输入流结束时是否报错（否则一直等待）
    fail_on_eof: bool,
}

impl<R: Read, W: Write> HostUart<R, W> {
    /// 创建新的 UART 设备
    pub fn new(name: impl Into<String>, input: R, output: W) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            retry_interval: DEFAULT_RX_RETRY_INTERVAL,
            fail_on_eof: false,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_fail_on_eof(mut self, fail_on_eof: bool) -> Self {
        self.fail_on_eof = fail_on_eof;
        self
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }
}

impl<R: Read, W: Write> SerialDevice for HostUart<R, W> {
    fn transmit(&mut self, byte: u8) -> Result<(), DeviceError> {
        self.output.write_all(&[byte])?;
        self.output.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<u8, DeviceError> {
        let mut buf = [0u8; 1];
        loop {
            match self.input.read(&mut buf) {
                Ok(1) => return Ok(buf[0]),
                Ok(_) if self.fail_on_eof => {
                    return Err(DeviceError::Closed(self.name.clone()));
                }
                Ok(_) => {
                    tracing::trace!(device = %self.name, "输入流暂无数据, 等待中");
                    thread::sleep(self.retry_interval);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.retry_interval);
                }
                Err(e) => return Err(DeviceError::Io(e)),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
