//! Line-delimited JSON framing with descriptor association.
//!
//! Each message is one JSON value terminated by `\n`. Descriptors received
//! via `SCM_RIGHTS` are queued and attached to the next message completed
//! from the byte stream; the peer sends a descriptor in the same system
//! call as its frame's bytes, so the association holds.

use parking_lot::Mutex;
use serde::Serialize;
use spawnkit_common::{ChannelError, ChannelResult};
use std::collections::VecDeque;
use std::os::fd::OwnedFd;

/// One received IPC message: an opaque JSON payload plus the transferred
/// descriptor, if the sender attached one.
///
/// The handle sits behind interior mutability so a message fanned out to
/// several observers still has exactly one owner for the descriptor: the
/// first consumer to call [`IpcMessage::take_handle`] gets it.
#[derive(Debug)]
pub struct IpcMessage {
    pub payload: serde_json::Value,
    handle: Mutex<Option<OwnedFd>>,
}

impl IpcMessage {
    pub fn new(payload: serde_json::Value, handle: Option<OwnedFd>) -> Self {
        Self {
            payload,
            handle: Mutex::new(handle),
        }
    }

    /// Deserialize the payload into a concrete type.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> ChannelResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ChannelError::decode(e.to_string()))
    }

    pub fn has_handle(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Take ownership of the transferred descriptor, if one arrived with
    /// this message and nobody claimed it yet.
    pub fn take_handle(&self) -> Option<OwnedFd> {
        self.handle.lock().take()
    }
}

/// Encode one message payload as a frame.
pub fn encode<T: Serialize>(payload: &T) -> ChannelResult<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec(payload).map_err(|e| ChannelError::encode(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Incremental frame decoder for the receive side.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
    pending_fds: VecDeque<OwnedFd>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes received from the socket.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Feed descriptors received alongside the bytes.
    pub fn push_fds(&mut self, fds: impl IntoIterator<Item = OwnedFd>) {
        self.pending_fds.extend(fds);
    }

    /// Pop the next complete message, if any.
    ///
    /// A malformed frame is reported as an error and consumed; decoding
    /// continues with the following frame.
    pub fn next_message(&mut self) -> Option<ChannelResult<IpcMessage>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let frame: Vec<u8> = self.buf.drain(..=newline).collect();
        let frame = &frame[..frame.len() - 1];

        match serde_json::from_slice(frame) {
            Ok(payload) => Some(Ok(IpcMessage::new(payload, self.pending_fds.pop_front()))),
            Err(e) => Some(Err(ChannelError::decode(format!(
                "malformed IPC frame: {}",
                e
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_appends_newline() {
        let bytes = encode(&json!({"a": 1})).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let value: serde_json::Value =
            serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_decode_preserves_order() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"{\"seq\":1}\n{\"seq\":2}\n");

        let first = codec.next_message().unwrap().unwrap();
        let second = codec.next_message().unwrap().unwrap();
        assert_eq!(first.payload["seq"], 1);
        assert_eq!(second.payload["seq"], 2);
        assert!(codec.next_message().is_none());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"{\"seq\"");
        assert!(codec.next_message().is_none());
        codec.push_bytes(b":1}\n");
        let msg = codec.next_message().unwrap().unwrap();
        assert_eq!(msg.payload["seq"], 1);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"not json\n{\"ok\":true}\n");

        assert!(codec.next_message().unwrap().is_err());
        let msg = codec.next_message().unwrap().unwrap();
        assert_eq!(msg.payload["ok"], true);
    }
}
