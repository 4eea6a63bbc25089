// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial device backend.
//!
//! [`SerialConnection`](super::SerialConnection) only needs three things
//! from a port: how many bytes are buffered, a read, and a write. Those sit
//! behind [`SerialDevice`]; [`SerialOpener`] turns a [`SerialConfig`] into a
//! device. [`SystemSerialOpener`] opens a Unix TTY in raw mode through
//! termios.

use crate::config::SerialConfig;
use crate::error::Result;

#[cfg(not(unix))]
use crate::error::LinkError;

use std::io;

/// An open byte-stream port.
pub trait SerialDevice: Send {
    /// Bytes currently buffered by the driver.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Opens a [`SerialDevice`] for a configuration.
pub trait SerialOpener: Send + Sync {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn SerialDevice>>;
}

impl<F> SerialOpener for F
where
    F: Fn(&SerialConfig) -> Result<Box<dyn SerialDevice>> + Send + Sync,
{
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn SerialDevice>> {
        self(config)
    }
}

/// Opens real serial ports.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSerialOpener;

impl SerialOpener for SystemSerialOpener {
    #[cfg(unix)]
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn SerialDevice>> {
        let device = tty::TtyDevice::open(config)?;
        Ok(Box::new(device))
    }

    #[cfg(not(unix))]
    fn open(&self, _config: &SerialConfig) -> Result<Box<dyn SerialDevice>> {
        Err(LinkError::Unsupported("serial ports require a Unix TTY"))
    }
}

#[cfg(unix)]
mod tty {
    use super::SerialDevice;
    use crate::config::{Parity, SerialConfig, StopBits};
    use crate::error::{LinkError, Result};
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    /// Raw-mode TTY.
    pub(super) struct TtyDevice {
        file: File,
    }

    impl TtyDevice {
        pub(super) fn open(config: &SerialConfig) -> Result<Self> {
            let speed = baud_to_speed(config.baud_rate).ok_or_else(|| {
                LinkError::InvalidConfig(format!("unsupported baud rate {}", config.baud_rate))
            })?;

            // O_NONBLOCK so open() does not wait for carrier detect.
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(&config.port_name)?;
            let fd = file.as_raw_fd();

            // SAFETY:
            // - fd is a valid descriptor owned by `file` for the whole block
            // - termios is a plain C struct; zeroed is a valid initial value and
            //   tcgetattr overwrites it before use
            // - every libc call result is checked
            unsafe {
                if libc::isatty(fd) != 1 {
                    return Err(LinkError::InvalidConfig(format!(
                        "{} is not a terminal device",
                        config.port_name
                    )));
                }

                let mut tio: libc::termios = std::mem::zeroed();
                if libc::tcgetattr(fd, &mut tio) != 0 {
                    return Err(io::Error::last_os_error().into());
                }

                libc::cfmakeraw(&mut tio);
                tio.c_cflag |= libc::CLOCAL | libc::CREAD;

                tio.c_cflag &= !libc::CSIZE;
                tio.c_cflag |= match config.data_bits {
                    5 => libc::CS5,
                    6 => libc::CS6,
                    7 => libc::CS7,
                    _ => libc::CS8,
                };

                match config.parity {
                    Parity::None => tio.c_cflag &= !(libc::PARENB | libc::PARODD),
                    Parity::Odd => tio.c_cflag |= libc::PARENB | libc::PARODD,
                    Parity::Even => {
                        tio.c_cflag |= libc::PARENB;
                        tio.c_cflag &= !libc::PARODD;
                    }
                }

                match config.stop_bits {
                    StopBits::One => tio.c_cflag &= !libc::CSTOPB,
                    StopBits::Two => tio.c_cflag |= libc::CSTOPB,
                }

                // Reads return whatever is buffered, possibly nothing.
                tio.c_cc[libc::VMIN] = 0;
                tio.c_cc[libc::VTIME] = 0;

                if libc::cfsetispeed(&mut tio, speed) != 0
                    || libc::cfsetospeed(&mut tio, speed) != 0
                {
                    return Err(io::Error::last_os_error().into());
                }
                if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                    return Err(io::Error::last_os_error().into());
                }
                libc::tcflush(fd, libc::TCIOFLUSH);

                // Back to blocking writes.
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
                    return Err(io::Error::last_os_error().into());
                }
            }

            log::debug!(
                "[SERIAL] configured {} ({} baud, {} data bits, {:?} parity, {:?} stop)",
                config.port_name,
                config.baud_rate,
                config.data_bits,
                config.parity,
                config.stop_bits
            );
            Ok(Self { file })
        }
    }

    impl SerialDevice for TtyDevice {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            let mut available: libc::c_int = 0;
            // SAFETY: fd is owned by self.file; FIONREAD writes one c_int.
            let ret = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    libc::FIONREAD,
                    &mut available as *mut libc::c_int,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(available.max(0) as usize)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.file.write_all(data)?;
            self.file.flush()
        }
    }

    fn baud_to_speed(baud: u32) -> Option<libc::speed_t> {
        let speed = match baud {
            1200 => libc::B1200,
            2400 => libc::B2400,
            4800 => libc::B4800,
            9600 => libc::B9600,
            19_200 => libc::B19200,
            38_400 => libc::B38400,
            57_600 => libc::B57600,
            115_200 => libc::B115200,
            230_400 => libc::B230400,
            #[cfg(target_os = "linux")]
            460_800 => libc::B460800,
            #[cfg(target_os = "linux")]
            921_600 => libc::B921600,
            _ => return None,
        };
        Some(speed)
    }

}
