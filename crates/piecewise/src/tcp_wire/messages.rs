use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Block, BlockInfo, MAX_MESSAGE_SIZE};
use crate::{bitfield::Bitfield, error::Error};

/// Core messages exchanged after a successful handshake.
/// These are from the vanilla protocol, with no extensions.
///
/// Message ids that this client does not understand (fast extension,
/// extension protocol, hash messages, ...) decode into [`Message::Unknown`]
/// so that they can be skipped without closing the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
    Unknown(u8, Vec<u8>),
}

/// The IDs of the [`Message`] variants.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        match value {
            0 => Ok(Choke),
            1 => Ok(Unchoke),
            2 => Ok(Interested),
            3 => Ok(NotInterested),
            4 => Ok(Have),
            5 => Ok(Bitfield),
            6 => Ok(Request),
            7 => Ok(Piece),
            8 => Ok(Cancel),
            other => Err(other),
        }
    }
}

impl Message {
    /// Length of the message body, which is everything after the 4 byte
    /// length prefix.
    pub fn body_len(&self) -> usize {
        use Message::*;
        match self {
            KeepAlive => 0,
            Choke | Unchoke | Interested | NotInterested => 1,
            Have(_) => 1 + 4,
            Bitfield(b) => 1 + b.as_raw_slice().len(),
            Request(_) | Cancel(_) => 1 + 4 + 4 + 4,
            Piece(b) => 1 + 4 + 4 + b.block.len(),
            Unknown(_, payload) => 1 + payload.len(),
        }
    }

    /// Write the message body, `<id><payload>`, into `buf`.
    /// A keep-alive has no body.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Message::KeepAlive => {}
            Message::Choke => buf.put_u8(MessageId::Choke as u8),
            Message::Unchoke => buf.put_u8(MessageId::Unchoke as u8),
            Message::Interested => buf.put_u8(MessageId::Interested as u8),
            Message::NotInterested => {
                buf.put_u8(MessageId::NotInterested as u8)
            }
            // <id=4><piece index>
            Message::Have(piece) => {
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            // <id=5><bitfield>
            Message::Bitfield(bitfield) => {
                buf.put_u8(MessageId::Bitfield as u8);
                buf.extend_from_slice(bitfield.as_raw_slice());
            }
            // <id=6><index><begin><length>
            Message::Request(block_info) => {
                buf.put_u8(MessageId::Request as u8);
                block_info.encode(buf);
            }
            // <id=7><index><begin><block>
            Message::Piece(block) => {
                buf.put_u8(MessageId::Piece as u8);
                block.encode(buf);
            }
            // <id=8><index><begin><length>
            Message::Cancel(block_info) => {
                buf.put_u8(MessageId::Cancel as u8);
                block_info.encode(buf);
            }
            Message::Unknown(id, payload) => {
                buf.put_u8(*id);
                buf.extend_from_slice(payload);
            }
        }
    }

    /// Encode the message body, without the length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.body_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Decode a message body, without the length prefix. An empty frame is a
    /// keep-alive.
    pub fn decode(frame: &[u8]) -> Result<Message, Error> {
        let Some((&id, mut payload)) = frame.split_first() else {
            return Ok(Message::KeepAlive);
        };

        let msg_id = match MessageId::try_from(id) {
            Ok(msg_id) => msg_id,
            Err(id) => return Ok(Message::Unknown(id, payload.to_vec())),
        };

        let msg = match msg_id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                if payload.len() != 4 {
                    return Err(Error::MessageMalformed(id));
                }
                Message::Have(payload.get_u32())
            }
            MessageId::Bitfield => {
                Message::Bitfield(Bitfield::from_vec(payload.to_vec()))
            }
            MessageId::Request | MessageId::Cancel => {
                if payload.len() != 4 + 4 + 4 {
                    return Err(Error::MessageMalformed(id));
                }
                let block_info = BlockInfo {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    len: payload.get_u32(),
                };
                if msg_id == MessageId::Request {
                    Message::Request(block_info)
                } else {
                    Message::Cancel(block_info)
                }
            }
            MessageId::Piece => {
                if payload.len() < 4 + 4 {
                    return Err(Error::MessageMalformed(id));
                }
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Message::Piece(Block { index, begin, block: payload.to_vec() })
            }
        };

        Ok(msg)
    }
}

/// Frames [`Message`]s with their 4 byte big-endian length prefix.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let len = item.body_len();
        buf.reserve(4 + len);
        buf.put_u32(len as u32);
        item.encode_into(buf);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        // the message length header must be present at the minimum, otherwise
        // we can't determine the message type
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek at length prefix without consuming
        let size =
            u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if size > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(size));
        }

        // incomplete message, the decoder will be called again when more
        // bytes arrive. The cursor is not advanced until the whole frame is
        // buffered.
        if buf.len() < 4 + size {
            buf.reserve(4 + size - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let frame = buf.split_to(size);

        Message::decode(&frame).map(Some)
    }
}
