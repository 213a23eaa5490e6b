mod align;
mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::{Align1, Align4};
pub use deserialize::Deserialize;
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Upper bound of a single frame, anything bigger is treated as a corrupted stream.
const MAX_FRAME_LEN: usize = 1 << 31;

fn check_frame_len(len: usize, kind: io::ErrorKind) -> io::Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            kind,
            format!("frame of {len} bytes exceeds the maximum of {MAX_FRAME_LEN}"),
        ));
    }

    Ok(())
}

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
