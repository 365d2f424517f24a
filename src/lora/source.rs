//! Receive-side radio abstraction.

/// A radio the ingest loop can poll for packets.
///
/// Calls are short register transactions and must not block for long; the
/// loop does its own pacing between polls.
pub trait PacketSource {
    /// Driver error type.
    type Error: std::error::Error;

    /// Put the radio in receive mode. Calling this while already receiving is
    /// harmless.
    fn arm_receive(&mut self) -> Result<(), Self::Error>;

    /// Whether a received packet is waiting to be read.
    fn packet_available(&mut self) -> Result<bool, Self::Error>;

    /// Read the pending packet into `buf`.
    ///
    /// Returns the packet length reported by the radio. Implementations copy at
    /// most `buf.len()` bytes; callers must treat a length above `buf.len()` as
    /// a truncated packet.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

impl<S: PacketSource + ?Sized> PacketSource for &mut S {
    type Error = S::Error;

    fn arm_receive(&mut self) -> Result<(), Self::Error> {
        (**self).arm_receive()
    }

    fn packet_available(&mut self) -> Result<bool, Self::Error> {
        (**self).packet_available()
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read_packet(buf)
    }
}
