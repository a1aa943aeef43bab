//! Byte-stream side of the driver: write a frame, read one line.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::time::Duration;

use log::{debug, trace};
use serialport::SerialPortInfo;

use crate::errors::{DriverError, Result};

/// Fixed baud rate of the OpenAFE firmware.
pub const BAUD_RATE: u32 = 115200;

/// Default read deadline for a single line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest line accepted before giving up on finding a terminator.
pub const MAX_LINE_LEN: usize = 256;

/// Minimal port interface the session depends on.
///
/// Reads block until a full line arrives or the implementation's own deadline
/// expires; there is no timeout above this layer.
pub trait Transport: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// One line including its `\n` terminator.
    fn read_line(&mut self) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(bytes)
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        (**self).read_line()
    }
}

/// Line transport over any `Read + Write` stream.
pub struct LineTransport<S: Read + Write + Send> {
    reader: BufReader<S>,
}

impl<S: Read + Write + Send> LineTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

impl<S: Read + Write + Send> Transport for LineTransport<S> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes).map_err(map_io)?;
        stream.flush().map_err(map_io)?;
        trace!("wrote {} bytes", bytes.len());
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::with_capacity(64);
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(e)),
            };
            if available.is_empty() {
                return Err(DriverError::Disconnected);
            }

            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..=pos], true),
                None => (available, false),
            };
            line.extend_from_slice(chunk);
            let used = chunk.len();
            self.reader.consume(used);

            if done || line.len() >= MAX_LINE_LEN {
                // An overlong line goes to the decoder as is and fails framing there.
                return Ok(line);
            }
        }
    }
}

fn map_io(e: std::io::Error) -> DriverError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => DriverError::Timeout(e.to_string()),
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            DriverError::Disconnected
        }
        _ => DriverError::Io(e),
    }
}

/// Serial port transport at [`BAUD_RATE`].
pub type SerialTransport = LineTransport<Box<dyn serialport::SerialPort>>;

impl SerialTransport {
    /// Open a serial port (e.g. `/dev/ttyACM0` or `COM14`).
    ///
    /// `timeout` bounds every single read; it is the only way to interrupt a
    /// measurement that stopped sending.
    pub fn open(path: &str, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, BAUD_RATE).timeout(timeout).open()?;
        debug!("opened serial port {} at {} baud", path, BAUD_RATE);
        Ok(Self::new(port))
    }

    pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reads from a fixed input, records writes.
    struct Loopback {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn transport(input: &[u8]) -> LineTransport<Loopback> {
        LineTransport::new(Loopback {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
        })
    }

    #[test]
    fn reads_lines_in_order_then_disconnects() {
        let mut t = transport(b"$A*41\r\n$B*42\r\n");
        assert_eq!(t.read_line().unwrap(), b"$A*41\r\n");
        assert_eq!(t.read_line().unwrap(), b"$B*42\r\n");
        assert!(matches!(t.read_line(), Err(DriverError::Disconnected)));
    }

    #[test]
    fn writes_pass_through() {
        let mut t = transport(b"");
        t.write_bytes(b"$CMD,CUR,200*00\r\n").unwrap();
        assert_eq!(t.get_ref().output, b"$CMD,CUR,200*00\r\n");
        t.write_bytes(b"$SWV*00\r\n").unwrap();
        assert_eq!(t.into_inner().output, b"$CMD,CUR,200*00\r\n$SWV*00\r\n");
    }

    #[test]
    fn overlong_line_is_cut() {
        let input = vec![b'x'; MAX_LINE_LEN * 2];
        let mut t = transport(&input);
        let line = t.read_line().unwrap();
        assert!(line.len() >= MAX_LINE_LEN);
        assert!(!line.ends_with(b"\n"));
    }

    #[test]
    fn io_error_mapping() {
        assert!(matches!(
            map_io(std::io::Error::from(ErrorKind::TimedOut)),
            DriverError::Timeout(_)
        ));
        assert!(matches!(
            map_io(std::io::Error::from(ErrorKind::BrokenPipe)),
            DriverError::Disconnected
        ));
        assert!(matches!(
            map_io(std::io::Error::from(ErrorKind::PermissionDenied)),
            DriverError::Io(_)
        ));
    }
}
