//! Framing: 4-byte LE length, then the bincode-encoded [`Message`].
//!
//! Every Channel payload carries exactly one frame. Stream transports can use
//! [`decode_frame`] to peel frames off a buffer one at a time.

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("declared frame length {0} exceeds the limit")]
    TooLarge(usize),
    #[error("{0} bytes after the frame")]
    Trailing(usize),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let size = bincode::serialized_size(msg)? as usize;
    if size > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge(size));
    }
    let mut out = Vec::with_capacity(LEN_SIZE + size);
    out.extend_from_slice(&(size as u32).to_le_bytes());
    bincode::serialize_into(&mut out, msg)?;
    Ok(out)
}

/// Decode the frame at the front of `bytes`; returns it with the bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let Some((len, rest)) = bytes.split_first_chunk::<LEN_SIZE>() else {
        return Err(FrameDecodeError::NeedMore);
    };
    let len = u32::from_le_bytes(*len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    let body = rest.get(..len).ok_or(FrameDecodeError::NeedMore)?;
    Ok((bincode::deserialize(body)?, LEN_SIZE + len))
}

/// Decode a whole Channel payload. Anything after the frame is an error.
pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameDecodeError> {
    let (msg, used) = decode_frame(payload)?;
    match payload.len() - used {
        0 => Ok(msg),
        extra => Err(FrameDecodeError::Trailing(extra)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdSource, SeededIds};
    use crate::protocol::{FileId, Signal};

    fn sample_offer() -> Message {
        let mut ids = SeededIds::new(11);
        Message::Signal(Signal::offer(ids.next_id(), ids.next_id(), "v=0".into()))
    }

    #[test]
    fn offer_survives_framing() {
        let msg = sample_offer();
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(frame.len(), LEN_SIZE + bincode::serialized_size(&msg).unwrap() as usize);
        assert_eq!(decode_payload(&frame).unwrap(), msg);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&sample_offer()).unwrap();
        assert!(matches!(decode_frame(&frame[..2]), Err(FrameDecodeError::NeedMore)));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut bogus = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        bogus.extend_from_slice(&[0u8; 8]);
        assert!(matches!(decode_frame(&bogus), Err(FrameDecodeError::TooLarge(_))));
    }

    #[test]
    fn garbage_payload_fails_decode() {
        let mut frame = 3u32.to_le_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(decode_payload(&frame), Err(FrameDecodeError::Decode(_))));
    }

    #[test]
    fn payload_with_two_frames_is_rejected_but_stream_reads_both() {
        let a = sample_offer();
        let b = Message::TransferQuery {
            file_id: FileId::from_content(b"x"),
            chunk: 4,
        };
        let fa = encode_frame(&a).unwrap();
        let mut buf = fa.clone();
        buf.extend_from_slice(&encode_frame(&b).unwrap());
        assert!(matches!(
            decode_payload(&buf),
            Err(FrameDecodeError::Trailing(n)) if n == buf.len() - fa.len()
        ));

        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, fa.len());
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(n1 + n2, buf.len());
        assert_eq!((m1, m2), (a, b));
    }
}
