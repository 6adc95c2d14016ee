//! Binary frames on the peer-to-peer data channel.
//!
//! Every frame starts with one type byte:
//!
//! ```text
//! 0x00  identity   UTF-8 text (sent once per channel, re-sent on change)
//! 0x01  pose       7 × f32 (head) or 25 × f32 (head + two hands)
//! 0x02  broadcast  UTF-8 JSON
//! 0x03  broadcast  raw application bytes
//! ```
//!
//! Pose frames carry no header beyond the type byte: the body length alone
//! says whether hands are present. The body is the head transform
//! (position xyz, orientation xyzw), then optionally the right hand and
//! the left hand, each as:
//!
//! ```text
//! position (3 × f32)  orientation (4 × f32)  state (f32)  reserved (f32)
//! ```
//!
//! The reserved float is written as `0.0` and ignored when decoding.
//!
//! All floats are IEEE-754 single precision in **little-endian** byte order. Quaternions go over the wire as given;
//! normalizing them is the producer's job.
//!
//! Any other leading byte decodes to [`Frame::Unknown`] rather than an
//! error, so newer peers can add frame types without breaking older ones.

use serde_json::Value;

use crate::DecodeError;

/// Type byte of the one-shot identity frame.
pub const IDENTITY_TAG: u8 = 0x00;
/// Type byte of a pose frame.
pub const POSE_TAG: u8 = 0x01;
/// Type byte of a JSON broadcast.
pub const JSON_TAG: u8 = 0x02;
/// Type byte of a raw binary broadcast.
pub const BINARY_TAG: u8 = 0x03;

const HEAD_FLOATS: usize = 7;
const HAND_FLOATS: usize = 9;

/// Frame length (type byte included) of a head-only pose.
pub const HEAD_ONLY_FRAME_LEN: usize = 1 + HEAD_FLOATS * 4;
/// Frame length (type byte included) of a pose with both hands.
pub const TWO_HAND_FRAME_LEN: usize = 1 + (HEAD_FLOATS + 2 * HAND_FLOATS) * 4;

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Position plus orientation quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Transform {
    /// The identity transform at the origin.
    pub const IDENTITY: Self = Self {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

/// One tracked hand.
///
/// `state` is an application-defined gesture code (open, grip, point...).
/// On the wire it travels as an f32 like the other fields.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hand {
    pub transform: Transform,
    pub state: u8,
}

/// Both hands. Encoded right first, then left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hands {
    pub right: Hand,
    pub left: Hand,
}

/// A participant's tracked pose for one tick.
///
/// A single tracked hand is not representable on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub head: Transform,
    pub hands: Option<Hands>,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            head: Transform::IDENTITY,
            hands: None,
        }
    }
}

fn put_transform(out: &mut Vec<u8>, t: &Transform) {
    for v in t.position.iter().chain(t.orientation.iter()) {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn put_hand(out: &mut Vec<u8>, hand: &Hand) {
    put_transform(out, &hand.transform);
    out.extend_from_slice(&f32::from(hand.state).to_le_bytes());
    out.extend_from_slice(&0.0f32.to_le_bytes());
}

/// Encodes a pose as a `0x01` frame.
pub fn encode_pose(pose: &Pose) -> Vec<u8> {
    let len = if pose.hands.is_some() {
        TWO_HAND_FRAME_LEN
    } else {
        HEAD_ONLY_FRAME_LEN
    };
    let mut out = Vec::with_capacity(len);
    out.push(POSE_TAG);
    put_transform(&mut out, &pose.head);
    if let Some(hands) = &pose.hands {
        put_hand(&mut out, &hands.right);
        put_hand(&mut out, &hands.left);
    }
    debug_assert_eq!(out.len(), len);
    out
}

/// Decodes a complete `0x01` frame (type byte included).
pub fn decode_pose(frame: &[u8]) -> Result<Pose, DecodeError> {
    match frame.first() {
        None => Err(DecodeError::Empty),
        Some(&POSE_TAG) => decode_pose_body(&frame[1..]),
        Some(&tag) => Err(DecodeError::UnexpectedTag(tag)),
    }
}

fn decode_pose_body(body: &[u8]) -> Result<Pose, DecodeError> {
    let with_hands = match body.len() + 1 {
        HEAD_ONLY_FRAME_LEN => false,
        TWO_HAND_FRAME_LEN => true,
        len => return Err(DecodeError::Truncated { len }),
    };

    let mut reader = FloatReader { body, pos: 0 };
    let head = reader.transform();
    let hands = if with_hands {
        let right = reader.hand();
        let left = reader.hand();
        Some(Hands { right, left })
    } else {
        None
    };

    Ok(Pose { head, hands })
}

/// Sequential little-endian f32 reader over a body of checked length.
struct FloatReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl FloatReader<'_> {
    fn f32(&mut self) -> f32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.body[self.pos..self.pos + 4]);
        self.pos += 4;
        f32::from_le_bytes(raw)
    }

    fn transform(&mut self) -> Transform {
        Transform {
            position: [self.f32(), self.f32(), self.f32()],
            orientation: [self.f32(), self.f32(), self.f32(), self.f32()],
        }
    }

    fn hand(&mut self) -> Hand {
        let transform = self.transform();
        // `as` saturates: out-of-range or NaN states clamp into u8.
        let state = self.f32() as u8;
        let _reserved = self.f32();
        Hand { transform, state }
    }
}

// ---------------------------------------------------------------------------
// Broadcasts and identity
// ---------------------------------------------------------------------------

/// A discrete application event fanned out to every ready peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    /// Sent as a `0x02` frame.
    Json(Value),
    /// Sent as a `0x03` frame.
    Binary(Vec<u8>),
}

/// Encodes a broadcast as a `0x02` or `0x03` frame.
pub fn encode_broadcast(payload: &Broadcast) -> Vec<u8> {
    match payload {
        Broadcast::Json(value) => {
            let text = value.to_string();
            let mut out = Vec::with_capacity(1 + text.len());
            out.push(JSON_TAG);
            out.extend_from_slice(text.as_bytes());
            out
        }
        Broadcast::Binary(bytes) => {
            let mut out = Vec::with_capacity(1 + bytes.len());
            out.push(BINARY_TAG);
            out.extend_from_slice(bytes);
            out
        }
    }
}

/// Encodes the identity payload as a `0x00` frame.
pub fn encode_identity(identity: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + identity.len());
    out.push(IDENTITY_TAG);
    out.extend_from_slice(identity.as_bytes());
    out
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A decoded data-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Identity(String),
    Pose(Pose),
    Broadcast(Broadcast),
    /// Unrecognized leading byte. Carries the whole frame, type byte
    /// included, for an application-level fallback handler.
    Unknown(Vec<u8>),
}

/// Decodes one frame, dispatching on its leading byte only.
pub fn decode_frame(frame: &[u8]) -> Result<Frame, DecodeError> {
    let (&tag, body) = frame.split_first().ok_or(DecodeError::Empty)?;
    match tag {
        IDENTITY_TAG => std::str::from_utf8(body)
            .map(|s| Frame::Identity(s.to_owned()))
            .map_err(|_| DecodeError::Utf8),
        POSE_TAG => decode_pose_body(body).map(Frame::Pose),
        JSON_TAG => {
            let text = std::str::from_utf8(body).map_err(|_| DecodeError::Utf8)?;
            serde_json::from_str(text)
                .map(|v| Frame::Broadcast(Broadcast::Json(v)))
                .map_err(|e| DecodeError::Json(e.to_string()))
        }
        BINARY_TAG => Ok(Frame::Broadcast(Broadcast::Binary(body.to_vec()))),
        _ => Ok(Frame::Unknown(frame.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn head_only() -> Pose {
        Pose {
            head: Transform {
                position: [1.5, 1.7, -0.25],
                orientation: [0.0, 0.7071068, 0.0, 0.7071068],
            },
            hands: None,
        }
    }

    fn two_hands() -> Pose {
        let hand = |x: f32, state: u8| Hand {
            transform: Transform {
                position: [x, 1.2, -0.4],
                orientation: [0.1, 0.2, 0.3, 0.9273618],
            },
            state,
        };
        Pose {
            hands: Some(Hands {
                right: hand(0.3, 1),
                left: hand(-0.3, 2),
            }),
            ..head_only()
        }
    }

    #[test]
    fn test_pose_frame_lengths() {
        assert_eq!(encode_pose(&head_only()).len(), 29);
        assert_eq!(encode_pose(&two_hands()).len(), 101);
        assert_eq!(encode_pose(&head_only())[0], POSE_TAG);
    }

    #[test]
    fn test_pose_survives_encoding_with_and_without_hands() {
        for pose in [head_only(), two_hands()] {
            assert_eq!(decode_pose(&encode_pose(&pose)).unwrap(), pose);
        }
    }

    #[test]
    fn test_pose_floats_are_little_endian() {
        let frame = encode_pose(&head_only());
        assert_eq!(&frame[1..5], &1.5f32.to_le_bytes());
    }

    #[test]
    fn test_quaternions_are_not_normalized() {
        let mut pose = head_only();
        pose.head.orientation = [2.0, 0.0, 0.0, 0.0];
        let decoded = decode_pose(&encode_pose(&pose)).unwrap();
        assert_eq!(decoded.head.orientation, [2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_pose_rejects_every_illegal_length() {
        let legal = [HEAD_ONLY_FRAME_LEN, TWO_HAND_FRAME_LEN];
        for len in 1..=TWO_HAND_FRAME_LEN + 8 {
            let mut frame = vec![0u8; len];
            frame[0] = POSE_TAG;
            let result = decode_pose(&frame);
            if legal.contains(&len) {
                assert!(result.is_ok(), "length {len} should decode");
            } else {
                assert_eq!(result, Err(DecodeError::Truncated { len }));
            }
        }
    }

    #[test]
    fn test_decode_pose_of_empty_or_foreign_frame() {
        assert_eq!(decode_pose(&[]), Err(DecodeError::Empty));
        assert_eq!(decode_pose(&[JSON_TAG, b'1']), Err(DecodeError::UnexpectedTag(JSON_TAG)));
    }

    #[test]
    fn test_json_broadcast_frame() {
        let frame = encode_broadcast(&Broadcast::Json(json!({ "pickup": 3 })));
        assert_eq!(frame[0], JSON_TAG);
        assert_eq!(&frame[1..], br#"{"pickup":3}"#);
        assert_eq!(
            decode_frame(&frame).unwrap(),
            Frame::Broadcast(Broadcast::Json(json!({ "pickup": 3 })))
        );
    }

    #[test]
    fn test_binary_broadcast_frame() {
        let frame = encode_broadcast(&Broadcast::Binary(vec![4]));
        assert_eq!(frame, vec![BINARY_TAG, 4]);
        assert_eq!(
            decode_frame(&frame).unwrap(),
            Frame::Broadcast(Broadcast::Binary(vec![4]))
        );
    }

    #[test]
    fn test_empty_binary_broadcast_is_legal() {
        let frame = encode_broadcast(&Broadcast::Binary(Vec::new()));
        assert_eq!(decode_frame(&frame).unwrap(), Frame::Broadcast(Broadcast::Binary(vec![])));
    }

    #[test]
    fn test_identity_frame() {
        let frame = encode_identity("data:image/png;base64,AAAA");
        assert_eq!(frame[0], IDENTITY_TAG);
        assert_eq!(
            decode_frame(&frame).unwrap(),
            Frame::Identity("data:image/png;base64,AAAA".into())
        );
    }

    #[test]
    fn test_unknown_leading_byte_is_not_an_error() {
        let frame = [0x7f, 1, 2, 3];
        assert_eq!(decode_frame(&frame).unwrap(), Frame::Unknown(frame.to_vec()));
    }

    #[test]
    fn test_decode_frame_failures() {
        assert_eq!(decode_frame(&[]), Err(DecodeError::Empty));
        assert_eq!(decode_frame(&[POSE_TAG, 0, 0]), Err(DecodeError::Truncated { len: 3 }));
        assert_eq!(decode_frame(&[IDENTITY_TAG, 0xff]), Err(DecodeError::Utf8));
        assert!(matches!(decode_frame(b"\x02{oops"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_hand_state_travels_as_float() {
        let frame = encode_pose(&two_hands());
        // Right hand state follows the head and the right hand transform.
        let at = 1 + (HEAD_FLOATS + 7) * 4;
        assert_eq!(&frame[at..at + 4], &1.0f32.to_le_bytes());
        assert_eq!(&frame[at + 4..at + 8], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_right_hand_is_encoded_before_left() {
        let frame = encode_pose(&two_hands());
        let right_x = 1 + HEAD_FLOATS * 4;
        let left_x = right_x + HAND_FLOATS * 4;
        assert_eq!(&frame[right_x..right_x + 4], &0.3f32.to_le_bytes());
        assert_eq!(&frame[left_x..left_x + 4], &(-0.3f32).to_le_bytes());
        assert_eq!(&frame[left_x + 28..left_x + 32], &2.0f32.to_le_bytes());
    }

    #[test]
    fn test_two_hand_frame_from_another_encoder() {
        // Hand-built 101-byte frame with a non-zero reserved float.
        let mut floats = vec![0.0f32, 1.6, 0.0, 0.0, 0.0, 0.0, 1.0];
        floats.extend([0.2, 1.1, -0.3, 0.0, 0.0, 0.0, 1.0, 3.0, 9.5]);
        floats.extend([-0.2, 1.0, -0.3, 0.0, 0.0, 0.0, 1.0, 4.0, 9.5]);
        let mut frame = vec![POSE_TAG];
        for f in &floats {
            frame.extend_from_slice(&f.to_le_bytes());
        }
        assert_eq!(frame.len(), TWO_HAND_FRAME_LEN);

        let hands = decode_pose(&frame).unwrap().hands.unwrap();
        assert_eq!(hands.right.transform.position, [0.2, 1.1, -0.3]);
        assert_eq!(hands.right.state, 3);
        assert_eq!(hands.left.transform.position, [-0.2, 1.0, -0.3]);
        assert_eq!(hands.left.state, 4);
    }
}
