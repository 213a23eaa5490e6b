use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: u8 = 0;
const CONTROL_KIND: u8 = 1;
const WEIGHTS_KIND: u8 = 2;
const CONTRIBUTION_KIND: u8 = 3;
const REDUCED_KIND: u8 = 4;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    /// The model parameters broadcast by the root rank.
    Weights(&'a [f32]),
    /// A rank's local values entering a reduction.
    Contribution(&'a [f32]),
    /// The averaged values the coordinator sends back after a reduction.
    Reduced(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First message of a peer, introduces its rank and the group size it expects.
    Join { rank: usize, world_size: usize },
    /// The coordinator's answer to a valid `Join`.
    Welcome { world_size: usize },
    /// Arrival at (peer to coordinator) or release from (coordinator to peer) a barrier.
    Barrier,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name of the kind of message, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Weights(_)) => "data/weights",
            Msg::Data(Payload::Contribution(_)) => "data/contribution",
            Msg::Data(Payload::Reduced(_)) => "data/reduced",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&(ERR_KIND as Header).to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&(CONTROL_KIND as Header).to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Weights(nums) => (WEIGHTS_KIND, *nums),
                    Payload::Contribution(nums) => (CONTRIBUTION_KIND, *nums),
                    Payload::Reduced(nums) => (REDUCED_KIND, *nums),
                };

                buf.extend_from_slice(&(kind as Header).to_be_bytes());
                Ok(Some(bytemuck::cast_slice(nums)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);
        let kind = Header::from_be_bytes(header) as u8;

        match kind {
            ERR_KIND => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            WEIGHTS_KIND | CONTRIBUTION_KIND | REDUCED_KIND => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}"))
                })?;

                let payload = match kind {
                    WEIGHTS_KIND => Payload::Weights(nums),
                    CONTRIBUTION_KIND => Payload::Contribution(nums),
                    _ => Payload::Reduced(nums),
                };

                Ok(Self::Data(payload))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<'a>(msg: &'a Msg<'a>) -> Vec<u32> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        if let Some(tail) = tail {
            buf.extend_from_slice(tail);
        }

        // Copy into a 4-byte aligned buffer, the same way the receiver stores it.
        let mut aligned = vec![0u32; buf.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut aligned)[..buf.len()].copy_from_slice(&buf);
        aligned
    }

    #[test]
    fn control_message_survives_the_wire() {
        let msg = Msg::Control(Command::Join {
            rank: 3,
            world_size: 4,
        });
        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).unwrap().is_none());

        let decoded = Msg::deserialize(&buf).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn data_payload_is_zero_copy() {
        let values = [1.5, -2.0, 0.25];
        let msg = Msg::Data(Payload::Contribution(&values));
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap().unwrap();

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(tail.len(), values.len() * size_of::<f32>());

        let aligned = encode(&msg);
        let bytes: &[u8] = bytemuck::cast_slice(&aligned);
        let decoded = Msg::deserialize(&bytes[..HEADER_SIZE + tail.len()]).unwrap();
        assert_eq!(decoded, Msg::Data(Payload::Contribution(&values)));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let buf = 9u32.to_be_bytes();
        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(Msg::deserialize(&[0, 1]).is_err());
    }
}
