//! TCP client interface

use crate::error::{CmdTlmError, Result};
use crate::interface::{Interface, InterfaceInfo, InterfaceStats, RawPacket, ReadResult};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const READ_BUFFER_SIZE: usize = 65536;

pub struct TcpClientInterface {
    info: InterfaceInfo,
    stats: InterfaceStats,
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    /// Write half; also used to shut the socket down
    stream: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
}

impl TcpClientInterface {
    pub fn new(
        info: InterfaceInfo,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            info,
            stats: InterfaceStats::default(),
            host: host.to_string(),
            port,
            connect_timeout,
            read_timeout,
            stream: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Interface for TcpClientInterface {
    fn info(&self) -> &InterfaceInfo {
        &self.info
    }

    fn stats(&self) -> &InterfaceStats {
        &self.stats
    }

    fn connect(&self) -> Result<()> {
        let endpoint = self.endpoint();
        let addr = endpoint.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address for {}", endpoint),
            )
        })?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.read_timeout)?;
        let reader = stream.try_clone()?;
        *self.reader.lock() = Some(reader);
        *self.stream.lock() = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        info!("{}: connected to {}", self.info.name, endpoint);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.lock().take() {
            // unblocks a reader parked in read()
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("{}: shutdown: {}", self.info.name, e);
            }
        }
    }

    fn read_interface(&self) -> Result<ReadResult> {
        let mut guard = self.reader.lock();
        let Some(reader) = guard.as_mut() else {
            return Err(CmdTlmError::NotConnected(self.info.name.clone()));
        };
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let n = match reader.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if !self.connected() => {
                debug!("{}: read after disconnect: {}", self.info.name, e);
                0
            },
            // Unix reports an expired SO_RCVTIMEO as WouldBlock
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout after {:?}", self.read_timeout.unwrap_or_default()),
                )
                .into());
            },
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            *guard = None;
            return Ok(ReadResult::NoData);
        }
        buffer.truncate(n);
        Ok(ReadResult::Data(RawPacket::new(buffer)))
    }

    fn write_interface(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Err(CmdTlmError::NotConnected(self.info.name.clone()));
        };
        stream.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_read_write_and_disconnect_unblocks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(&[1, 2, 3]).unwrap();
            let mut buf = [0u8; 2];
            sock.read_exact(&mut buf).unwrap();
            (buf, sock)
        });

        let tcp = std::sync::Arc::new(TcpClientInterface::new(
            InterfaceInfo::new("TCP_INT", &["INST"]),
            "127.0.0.1",
            port,
            Duration::from_secs(2),
            None,
        ));
        tcp.connect().unwrap();
        assert_eq!(
            tcp.read_interface().unwrap(),
            ReadResult::Data(RawPacket::new(vec![1, 2, 3]))
        );
        tcp.write_interface(&[7, 8]).unwrap();
        let (received, _peer) = server.join().unwrap();
        assert_eq!(received, [7, 8]);

        let reader = {
            let tcp = tcp.clone();
            thread::spawn(move || tcp.read_interface().unwrap())
        };
        thread::sleep(Duration::from_millis(100));
        tcp.disconnect();
        assert_eq!(reader.join().unwrap(), ReadResult::NoData);
    }

    #[test]
    fn test_connection_refused_kind() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let tcp = TcpClientInterface::new(
            InterfaceInfo::new("TCP_INT", &[]),
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            None,
        );
        let err = tcp.connect().unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
    }
}
