use std::io;

/// Types that can be read from the wire, potentially borrowing from the read buffer.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
