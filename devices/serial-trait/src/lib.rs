//! 串口设备 trait 定义

use thiserror::Error;

/// 设备错误类型
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("设备输入已关闭: {0}")]
    Closed(String),
    #[error("设备 I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 串口设备 trait
/// 外设桥通过此 trait 完成宿主侧的收发
pub trait SerialDevice {
    /// 发送一个字节
    ///
    /// 实现必须在返回前把字节交给宿主（不做缓冲）
    fn transmit(&mut self, byte: u8) -> Result<(), DeviceError>;

    /// 接收一个字节
    ///
    /// 没有数据时阻塞，直到有字节可读
    fn receive(&mut self) -> Result<u8, DeviceError>;

    /// 获取设备名称（用于调试）
    fn name(&self) -> &str {
        "unknown"
    }
}

impl<T: SerialDevice + ?Sized> SerialDevice for Box<T> {
    fn transmit(&mut self, byte: u8) -> Result<(), DeviceError> {
        (**self).transmit(byte)
    }

    fn receive(&mut self) -> Result<u8, DeviceError> {
        (**self).receive()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback {
        pending: Option<u8>,
    }

    impl SerialDevice for Loopback {
        fn transmit(&mut self, byte: u8) -> Result<(), DeviceError> {
            self.pending = Some(byte);
            Ok(())
        }

        fn receive(&mut self) -> Result<u8, DeviceError> {
            self.pending
                .take()
                .ok_or_else(|| DeviceError::Closed("loopback".to_string()))
        }
    }

    #[test]
    fn test_default_name() {
        let dev = Loopback { pending: None };
        assert_eq!(dev.name(), "unknown");
    }

    #[test]
    fn test_boxed_device_forwards() {
        let mut dev: Box<dyn SerialDevice> = Box::new(Loopback { pending: None });
        dev.transmit(b'Z').unwrap();
        assert_eq!(dev.receive().unwrap(), b'Z');
        assert!(matches!(dev.receive(), Err(DeviceError::Closed(_))));
    }
}
