use std::time::Duration;

use crate::error::Result;

/// A bulk pipe pair to one MTP interface.
///
/// Each call performs a single USB transfer. A read shorter than the buffer
/// marks the end of a container.
pub trait Transport: Send {
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize>;

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// wMaxPacketSize of the bulk OUT endpoint.
    fn max_packet_size(&self) -> usize;

    /// Releases the interface. Later transfers fail.
    fn close(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(buf, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
