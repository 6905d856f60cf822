#[cfg(target_os = "linux")]
use rustix::net::{MMsgHdr, SendAncillaryBuffer, SocketAddrAny};
#[cfg(target_os = "linux")]
use std::io::IoSlice;
#[cfg(target_os = "linux")]
use std::os::fd::AsFd;

use std::net::{SocketAddr, UdpSocket};

use crate::{MetricResult, MetricsError};

/// Datagram sink underneath a line writer.
pub trait Writer {
    /// Sends one packet.
    ///
    /// # Errors
    /// Returns the socket error.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;
}

/// Datagram sink able to send several packets in one system call.
#[cfg(target_os = "linux")]
pub trait BatchWriter: Writer {
    /// Sends every header with `sendmmsg`, returning how many were sent.
    ///
    /// # Errors
    /// Returns the errno of the system call.
    fn write_mvec(&self, headers: &mut [MMsgHdr<'_>]) -> MetricResult<usize>;

    /// Destination address of every packet.
    fn destination(&self) -> &SocketAddrAny;
}

/// UDP socket bound once and sending to a fixed destination.
pub struct UdpSocketWriter {
    sock: UdpSocket,
    #[cfg(target_os = "linux")]
    destination: SocketAddrAny,
    destination_addr: SocketAddr,
}

impl UdpSocketWriter {
    /// Binds a UDP socket on `bind_addr` sending to `destination_addr`.
    ///
    /// # Errors
    /// Returns the bind error.
    pub fn bind(bind_addr: SocketAddr, destination_addr: SocketAddr) -> MetricResult<Self> {
        Ok(Self {
            sock: UdpSocket::bind(bind_addr)?,
            #[cfg(target_os = "linux")]
            destination: SocketAddrAny::from(destination_addr),
            destination_addr,
        })
    }
}

impl Writer for UdpSocketWriter {
    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.sock.send_to(buf, self.destination_addr)
    }
}

#[cfg(target_os = "linux")]
impl BatchWriter for UdpSocketWriter {
    fn write_mvec(&self, headers: &mut [MMsgHdr<'_>]) -> MetricResult<usize> {
        if headers.is_empty() {
            Ok(0)
        } else {
            rustix::net::sendmmsg(self.sock.as_fd(), headers, rustix::net::SendFlags::empty())
                .map_err(std::convert::Into::into)
        }
    }

    fn destination(&self) -> &SocketAddrAny {
        &self.destination
    }
}

/// Transport stage fed by the publication channel.
///
/// Implement this trait to send lines to a custom destination. Lines arrive
/// without a terminator, in submission order, on a single thread.
pub trait LineWriterTrait {
    /// Accepts one encoded line.
    ///
    /// # Errors
    /// Returns `MetricResult::Err` if the line cannot be accepted; the line is
    /// dropped and not retried.
    fn write(&mut self, line: &str) -> MetricResult<()>;

    /// Sends everything accepted so far.
    ///
    /// # Errors
    /// Returns `MetricResult::Err` on I/O failure.
    fn flush(&mut self) -> MetricResult<usize>;

    /// Discards any buffered state.
    fn reset(&mut self);
}

/// Specifies the transport backend used for sending lines.
pub enum LineWriterType {
    /// One `send_to` per packet. Works on all platforms.
    Simple,
    /// Uses `sendmmsg` to send batches of packets. Linux only.
    #[cfg(target_os = "linux")]
    LinuxBatch,
    /// User-provided writer implementation.
    Custom(Box<dyn LineWriterTrait + Send + 'static>),
}

impl std::fmt::Debug for LineWriterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "Simple"),
            #[cfg(target_os = "linux")]
            Self::LinuxBatch => write!(f, "LinuxBatch"),
            Self::Custom(_) => write!(f, "Custom(...)"),
        }
    }
}

/// The default writer type (Simple) that works on all platforms.
pub const DEFAULT_LINE_WRITER_TYPE: LineWriterType = LineWriterType::Simple;

pub(crate) fn build_line_writer(
    writer_type: LineWriterType,
    bind_addr: SocketAddr,
    dst_addr: SocketAddr,
    max_udp_packet_size: u16,
    max_udp_batch_size: u32,
) -> MetricResult<Box<dyn LineWriterTrait + Send>> {
    #[cfg(not(target_os = "linux"))]
    let _ = max_udp_batch_size;

    let line_writer = match writer_type {
        LineWriterType::Simple => Box::new(LineWriterSimple::new(
            UdpSocketWriter::bind(bind_addr, dst_addr)?,
            max_udp_packet_size,
        )) as Box<dyn LineWriterTrait + Send>,

        #[cfg(target_os = "linux")]
        LineWriterType::LinuxBatch => Box::new(LineWriterLinux::new(
            UdpSocketWriter::bind(bind_addr, dst_addr)?,
            max_udp_batch_size,
            max_udp_packet_size,
        )) as Box<dyn LineWriterTrait + Send>,

        LineWriterType::Custom(writer) => writer,
    };
    Ok(line_writer)
}

fn line_too_large(max_udp_packet_size: u16) -> MetricsError {
    format!("Line is larger than {max_udp_packet_size}").into()
}

// keeps the first failure until the next flush
fn defer_error(deferred: &mut Option<MetricsError>, err: MetricsError) {
    if deferred.is_none() {
        *deferred = Some(err);
    }
}

fn take_deferred(
    deferred: &mut Option<MetricsError>,
    result: MetricResult<usize>,
) -> MetricResult<usize> {
    match deferred.take() {
        Some(err) => Err(err),
        None => result,
    }
}

/// Packs newline-terminated lines into packets of at most
/// `max_udp_packet_size` bytes.
///
/// A packet that fails to send while a later line is written does not affect
/// that line; the failure is reported by the next [`LineWriterTrait::flush`].
pub struct LineWriterSimple<T> {
    max_udp_packet_size: u16,
    writer: T,
    current_packet: String,
    deferred_error: Option<MetricsError>,
}

impl<T: Writer> LineWriterSimple<T> {
    /// Creates a writer sending packets through `writer`.
    pub fn new(writer: T, max_udp_packet_size: u16) -> Self {
        Self {
            max_udp_packet_size,
            writer,
            current_packet: String::with_capacity(max_udp_packet_size as usize),
            deferred_error: None,
        }
    }

    fn flush_current_packet(&mut self) -> MetricResult<usize> {
        if self.current_packet.is_empty() {
            return Ok(0);
        }
        let result = self.writer.write(self.current_packet.as_bytes());
        // a failed packet is dropped, not retried
        self.current_packet.clear();
        Ok(result?)
    }
}

impl<T: Writer> LineWriterTrait for LineWriterSimple<T> {
    fn write(&mut self, line: &str) -> MetricResult<()> {
        let line_len = line.len() + 1; // '\n'
        let max = self.max_udp_packet_size as usize;

        if line_len > max {
            return Err(line_too_large(self.max_udp_packet_size));
        }

        if self.current_packet.len() + line_len > max {
            if let Err(err) = self.flush_current_packet() {
                defer_error(&mut self.deferred_error, err);
            }
        }

        self.current_packet.push_str(line);
        self.current_packet.push('\n');
        Ok(())
    }

    fn flush(&mut self) -> MetricResult<usize> {
        let result = self.flush_current_packet();
        take_deferred(&mut self.deferred_error, result)
    }

    fn reset(&mut self) {
        self.current_packet.clear();
        self.deferred_error = None;
    }
}

/// Packs lines like [`LineWriterSimple`] but queues up to
/// `max_udp_batch_size` packets and sends them with one `sendmmsg` call.
#[cfg(target_os = "linux")]
pub struct LineWriterLinux<T> {
    max_udp_packet_size: u16,
    max_udp_batch_size: usize,
    writer: T,

    queued_packets: Vec<String>,
    current_packet: String,

    // for reuse in application lifetime
    pool_packets: Vec<String>,
    deferred_error: Option<MetricsError>,
}

#[cfg(target_os = "linux")]
impl<T: BatchWriter> LineWriterLinux<T> {
    /// Creates a writer sending batches through `writer`.
    pub fn new(writer: T, max_udp_batch_size: u32, max_udp_packet_size: u16) -> Self {
        let max_udp_batch_size = max_udp_batch_size.max(1) as usize;
        Self {
            max_udp_packet_size,
            max_udp_batch_size,
            writer,
            queued_packets: Vec::with_capacity(max_udp_batch_size),
            current_packet: String::with_capacity(max_udp_packet_size as usize),
            pool_packets: Vec::with_capacity(max_udp_batch_size),
            deferred_error: None,
        }
    }

    fn queue_current_packet(&mut self) {
        let new_current = self
            .pool_packets
            .pop()
            .unwrap_or_else(|| String::with_capacity(self.max_udp_packet_size as usize));
        let old_packet = std::mem::replace(&mut self.current_packet, new_current);
        self.queued_packets.push(old_packet);
    }

    fn flush_queued_packets(&mut self) -> MetricResult<usize> {
        if self.queued_packets.is_empty() {
            return Ok(0);
        }

        let result = {
            let destination = self.writer.destination();
            let iovecs: Vec<[IoSlice<'_>; 1]> = self
                .queued_packets
                .iter()
                .map(|packet| [IoSlice::new(packet.as_bytes())])
                .collect();
            let mut controls: Vec<SendAncillaryBuffer<'_, '_, '_>> =
                iovecs.iter().map(|_| SendAncillaryBuffer::default()).collect();
            let mut headers: Vec<MMsgHdr<'_>> = iovecs
                .iter()
                .zip(controls.iter_mut())
                .map(|(iov, control)| MMsgHdr::new_with_addr(destination, iov, control))
                .collect();

            let mut sent = 0;
            let mut result: MetricResult<()> = Ok(());
            while sent < headers.len() {
                match self.writer.write_mvec(&mut headers[sent..]) {
                    Ok(0) => break,
                    Ok(n) => sent += n,
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
            }
            result.map(|()| sent)
        };

        // return to pool for future reuse, sent or not
        while let Some(mut packet) = self.queued_packets.pop() {
            packet.clear();
            self.pool_packets.push(packet);
        }
        result
    }
}

#[cfg(target_os = "linux")]
impl<T: BatchWriter> LineWriterTrait for LineWriterLinux<T> {
    fn write(&mut self, line: &str) -> MetricResult<()> {
        let line_len = line.len() + 1;
        let max = self.max_udp_packet_size as usize;

        if line_len > max {
            return Err(line_too_large(self.max_udp_packet_size));
        }

        if self.current_packet.len() + line_len > max {
            self.queue_current_packet();
        }

        self.current_packet.push_str(line);
        self.current_packet.push('\n');

        if self.queued_packets.len() >= self.max_udp_batch_size {
            if let Err(err) = self.flush_queued_packets() {
                defer_error(&mut self.deferred_error, err);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> MetricResult<usize> {
        if !self.current_packet.is_empty() {
            self.queue_current_packet();
        }
        let result = self.flush_queued_packets();
        take_deferred(&mut self.deferred_error, result)
    }

    fn reset(&mut self) {
        self.current_packet.clear();
        self.deferred_error = None;
        while let Some(mut packet) = self.queued_packets.pop() {
            packet.clear();
            self.pool_packets.push(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Records packets; the first `failures` sends fail
    #[derive(Default)]
    struct PacketWriter {
        packets: RefCell<Vec<String>>,
        failures: Cell<usize>,
    }

    impl PacketWriter {
        fn failing(failures: usize) -> Self {
            Self {
                failures: Cell::new(failures),
                ..Self::default()
            }
        }
    }

    impl Writer for PacketWriter {
        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(std::io::Error::other("unreachable collector"));
            }
            self.packets
                .borrow_mut()
                .push(String::from_utf8(buf.to_vec()).unwrap());
            Ok(buf.len())
        }
    }

    #[test]
    fn test_simple_writer_packs_lines() {
        let mut writer = LineWriterSimple::new(PacketWriter::default(), 20);

        writer.write("a:1|g").unwrap();
        writer.write("b:2|g").unwrap();
        writer.write("c:3|g").unwrap();
        writer.write("d:4|g").unwrap();
        assert_eq!(writer.flush().unwrap(), 6);

        let packets = writer.writer.packets.borrow();
        assert_eq!(*packets, vec!["a:1|g\nb:2|g\nc:3|g\n", "d:4|g\n"]);
    }

    #[test]
    fn test_simple_writer_rejects_oversized_line() {
        let mut writer = LineWriterSimple::new(PacketWriter::default(), 8);

        let err = writer.write("too.long:1|g").unwrap_err();
        assert_eq!(err.to_string(), "Custom error: Line is larger than 8");

        writer.write("a:1|g").unwrap();
        writer.flush().unwrap();
        assert_eq!(*writer.writer.packets.borrow(), vec!["a:1|g\n"]);
    }

    #[test]
    fn test_simple_writer_drops_failed_packet() {
        let mut writer = LineWriterSimple::new(PacketWriter::failing(1), 64);

        writer.write("a:1|g").unwrap();
        assert!(writer.flush().is_err());
        assert_eq!(writer.flush().unwrap(), 0);
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let mut writer = LineWriterSimple::new(PacketWriter::default(), 64);
        assert_eq!(writer.flush().unwrap(), 0);
        writer.write("a:1|g").unwrap();
        writer.reset();
        assert_eq!(writer.flush().unwrap(), 0);
        assert!(writer.writer.packets.borrow().is_empty());
    }

    #[test]
    fn test_simple_writer_keeps_line_after_failed_packet() {
        let mut writer = LineWriterSimple::new(PacketWriter::failing(1), 12);

        writer.write("a:1|g").unwrap();
        // sending the packet holding `a` fails, `bbbbbb` must still go out
        writer.write("bbbbbb:2|g").unwrap();
        writer.write("c:3|g").unwrap();

        let err = writer.flush().unwrap_err();
        assert_eq!(err.to_string(), "Std Io error: unreachable collector");
        assert_eq!(
            *writer.writer.packets.borrow(),
            vec!["bbbbbb:2|g\n", "c:3|g\n"]
        );

        // the failure is reported once
        assert_eq!(writer.flush().unwrap(), 0);
    }

    #[cfg(target_os = "linux")]
    struct BatchPacketWriter {
        destination: SocketAddrAny,
        failures: Cell<usize>,
        sent: Cell<usize>,
    }

    #[cfg(target_os = "linux")]
    impl BatchPacketWriter {
        fn failing(failures: usize) -> Self {
            let addr: SocketAddr = "127.0.0.1:8125".parse().unwrap();
            Self {
                destination: SocketAddrAny::from(addr),
                failures: Cell::new(failures),
                sent: Cell::new(0),
            }
        }
    }

    #[cfg(target_os = "linux")]
    impl Writer for BatchPacketWriter {
        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
    }

    #[cfg(target_os = "linux")]
    impl BatchWriter for BatchPacketWriter {
        fn write_mvec(&self, headers: &mut [MMsgHdr<'_>]) -> MetricResult<usize> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(rustix::io::Errno::CONNREFUSED.into());
            }
            self.sent.set(self.sent.get() + headers.len());
            Ok(headers.len())
        }

        fn destination(&self) -> &SocketAddrAny {
            &self.destination
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_writer_accepts_line_after_failed_batch() {
        let mut writer = LineWriterLinux::new(BatchPacketWriter::failing(1), 1, 12);

        writer.write("a:1|g").unwrap();
        // queues `a` and sends it, the failed batch must not reject `bbbbbb`
        assert!(writer.write("bbbbbb:2|g").is_ok());
        assert!(writer.write("c:3|g").is_ok());
        assert_eq!(writer.writer.sent.get(), 1);

        assert!(writer.flush().is_err());
        assert_eq!(writer.writer.sent.get(), 2);
        assert_eq!(writer.flush().unwrap(), 0);
    }
}
