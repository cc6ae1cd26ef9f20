//! Thorlabs APT message subset spoken by the MCM3000.
//!
//! Frames start with a 6-byte header, little-endian:
//!
//! ```text
//! offset  0..2   message id (u16)
//! short   2      param1 (channel)      long  2..4  data length (u16)
//!         3      param2 (0)
//!         4      destination (0x00)
//!         5      source (0x00)
//! long    6..8   channel (u16)
//!         8..12  encoder counts (i32)
//! ```
//!
//! The controller uses the short form only for the encoder-count request;
//! every other message here carries a 6-byte channel/counts payload.

use mcm_core::McmError;
use thiserror::Error;

/// Header length shared by every frame.
pub const HEADER_LEN: usize = 6;

/// Payload length of the channel/counts messages.
pub const COUNTS_DATA_LEN: u16 = 6;

/// Total length of a channel/counts frame, including the encoder-count reply.
pub const ENCODER_REPLY_LEN: usize = HEADER_LEN + COUNTS_DATA_LEN as usize;

/// Message identifiers used by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// `MOT_SET_ENCCOUNTER`: redefine the current encoder count.
    SetEncoderCount,
    /// `MOT_REQ_ENCCOUNTER`: ask for the current encoder count.
    RequestEncoderCount,
    /// `MOT_GET_ENCCOUNTER`: encoder count report.
    GetEncoderCount,
    /// `MOT_MOVE_ABSOLUTE` with inline target.
    MoveAbsolute,
}

impl MessageId {
    /// Wire value of the identifier.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            MessageId::SetEncoderCount => 0x0409,
            MessageId::RequestEncoderCount => 0x040A,
            MessageId::GetEncoderCount => 0x040B,
            MessageId::MoveAbsolute => 0x0453,
        }
    }

    /// Look up an identifier by its wire value.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0409 => Some(MessageId::SetEncoderCount),
            0x040A => Some(MessageId::RequestEncoderCount),
            0x040B => Some(MessageId::GetEncoderCount),
            0x0453 => Some(MessageId::MoveAbsolute),
            _ => None,
        }
    }

    /// Whether frames with this id carry a data packet after the header.
    #[must_use]
    pub fn has_data(self) -> bool {
        !matches!(self, MessageId::RequestEncoderCount)
    }
}

/// Reply the controller sends for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// No reply.
    None,
    /// One `GetEncoderCount` frame.
    EncoderCount,
}

/// Wire-level failures while decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame length differs from the fixed length of its type.
    #[error("expected {expected}-byte frame, got {actual} bytes")]
    WrongLength {
        /// Expected length.
        expected: usize,
        /// Received length.
        actual: usize,
    },

    /// Header carries a different message id.
    #[error("expected message 0x{expected:04X}, got 0x{actual:04X}")]
    UnexpectedMessage {
        /// Expected id.
        expected: u16,
        /// Received id.
        actual: u16,
    },

    /// Header announces a data length other than the payload size.
    #[error("expected data length {expected}, got {actual}")]
    BadDataLength {
        /// Expected data length.
        expected: u16,
        /// Received data length.
        actual: u16,
    },

    /// Reply addresses another channel.
    #[error("reply for channel {actual}, expected channel {expected}")]
    ChannelMismatch {
        /// Channel that was queried.
        expected: u8,
        /// Channel found in the reply.
        actual: u16,
    },

    /// Channel field does not fit a controller channel.
    #[error("channel {0} out of range")]
    ChannelOutOfRange(u16),

    /// Bytes arrived after a complete reply.
    #[error("{count} unexpected bytes after reply")]
    TrailingBytes {
        /// Number of extra bytes.
        count: usize,
    },

    /// Header carries an id this driver does not speak.
    #[error("unknown message id 0x{0:04X}")]
    UnknownMessage(u16),
}

impl From<ProtocolError> for McmError {
    fn from(err: ProtocolError) -> Self {
        McmError::Protocol(err.to_string())
    }
}

/// Outbound command.
///
/// `channel` is the zero-based wire channel (axis 1 is channel 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Query the encoder count of a channel.
    RequestEncoderCount {
        /// Wire channel.
        channel: u8,
    },
    /// Overwrite the encoder count of a channel.
    SetEncoderCount {
        /// Wire channel.
        channel: u8,
        /// New count.
        counts: i32,
    },
    /// Start an absolute move to `counts`.
    MoveAbsolute {
        /// Wire channel.
        channel: u8,
        /// Target count.
        counts: i32,
    },
}

impl Command {
    /// Message id of the frame.
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        match self {
            Command::RequestEncoderCount { .. } => MessageId::RequestEncoderCount,
            Command::SetEncoderCount { .. } => MessageId::SetEncoderCount,
            Command::MoveAbsolute { .. } => MessageId::MoveAbsolute,
        }
    }

    /// Zero-based wire channel.
    #[must_use]
    pub fn channel(&self) -> u8 {
        match *self {
            Command::RequestEncoderCount { channel }
            | Command::SetEncoderCount { channel, .. }
            | Command::MoveAbsolute { channel, .. } => channel,
        }
    }

    /// What the controller answers with.
    #[must_use]
    pub fn expected_reply(&self) -> ReplyShape {
        match self {
            Command::RequestEncoderCount { .. } => ReplyShape::EncoderCount,
            Command::SetEncoderCount { .. } | Command::MoveAbsolute { .. } => ReplyShape::None,
        }
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let id = self.message_id().code().to_le_bytes();
        match *self {
            Command::RequestEncoderCount { channel } => {
                vec![id[0], id[1], channel, 0x00, 0x00, 0x00]
            }
            Command::SetEncoderCount { channel, counts }
            | Command::MoveAbsolute { channel, counts } => {
                encode_counts_frame(self.message_id(), channel, counts)
            }
        }
    }

    /// Parse a complete command frame.
    ///
    /// Used by the simulated controller to interpret what the driver sent.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::WrongLength {
                expected: HEADER_LEN,
                actual: frame.len(),
            });
        }
        let code = u16::from_le_bytes([frame[0], frame[1]]);
        let id = MessageId::from_code(code).ok_or(ProtocolError::UnknownMessage(code))?;

        match id {
            MessageId::RequestEncoderCount => {
                if frame.len() != HEADER_LEN {
                    return Err(ProtocolError::WrongLength {
                        expected: HEADER_LEN,
                        actual: frame.len(),
                    });
                }
                Ok(Command::RequestEncoderCount { channel: frame[2] })
            }
            MessageId::SetEncoderCount | MessageId::MoveAbsolute => {
                let (channel, counts) = decode_counts_frame(frame, id)?;
                let channel =
                    u8::try_from(channel).map_err(|_| ProtocolError::ChannelOutOfRange(channel))?;
                Ok(if id == MessageId::MoveAbsolute {
                    Command::MoveAbsolute { channel, counts }
                } else {
                    Command::SetEncoderCount { channel, counts }
                })
            }
            MessageId::GetEncoderCount => Err(ProtocolError::UnknownMessage(code)),
        }
    }
}

/// Body length that follows `header`, for framing a byte stream.
pub fn data_len(header: &[u8; HEADER_LEN]) -> Result<usize, ProtocolError> {
    let code = u16::from_le_bytes([header[0], header[1]]);
    let id = MessageId::from_code(code).ok_or(ProtocolError::UnknownMessage(code))?;
    if id.has_data() {
        Ok(usize::from(u16::from_le_bytes([header[2], header[3]])))
    } else {
        Ok(0)
    }
}

/// Decoded `GetEncoderCount` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderCountReply {
    /// Wire channel.
    pub channel: u8,
    /// Signed encoder count.
    pub counts: i32,
}

impl EncoderCountReply {
    /// Parse a reply, checking length, header and channel.
    pub fn decode(frame: &[u8], expected_channel: u8) -> Result<Self, ProtocolError> {
        let (channel, counts) = decode_counts_frame(frame, MessageId::GetEncoderCount)?;
        if channel != u16::from(expected_channel) {
            return Err(ProtocolError::ChannelMismatch {
                expected: expected_channel,
                actual: channel,
            });
        }
        Ok(Self {
            channel: expected_channel,
            counts,
        })
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_counts_frame(MessageId::GetEncoderCount, self.channel, self.counts)
    }
}

fn encode_counts_frame(id: MessageId, channel: u8, counts: i32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ENCODER_REPLY_LEN);
    frame.extend_from_slice(&id.code().to_le_bytes());
    frame.extend_from_slice(&COUNTS_DATA_LEN.to_le_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&u16::from(channel).to_le_bytes());
    frame.extend_from_slice(&counts.to_le_bytes());
    frame
}

fn decode_counts_frame(frame: &[u8], id: MessageId) -> Result<(u16, i32), ProtocolError> {
    if frame.len() != ENCODER_REPLY_LEN {
        return Err(ProtocolError::WrongLength {
            expected: ENCODER_REPLY_LEN,
            actual: frame.len(),
        });
    }

    let code = u16::from_le_bytes([frame[0], frame[1]]);
    if code != id.code() {
        return Err(ProtocolError::UnexpectedMessage {
            expected: id.code(),
            actual: code,
        });
    }

    let data_len = u16::from_le_bytes([frame[2], frame[3]]);
    if data_len != COUNTS_DATA_LEN {
        return Err(ProtocolError::BadDataLength {
            expected: COUNTS_DATA_LEN,
            actual: data_len,
        });
    }

    let channel = u16::from_le_bytes([frame[6], frame[7]]);
    let counts = i32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
    Ok((channel, counts))
}
