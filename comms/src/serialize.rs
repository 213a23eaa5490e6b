use std::io;

/// Types that can be written into the wire.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer where the header and any copied data is written to.
    ///
    /// # Returns
    /// An optional borrowed tail that is sent right after `buf` without being copied,
    /// or an io error if the message could not be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
