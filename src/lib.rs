pub mod chunker;
pub mod config;
pub mod distributor_node;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod report;
pub mod transport;
pub mod worker_node;

pub use error::{MrError, Result};

/// Every request starts with a fixed-width command tag; the rest of the
/// message is payload. Replies carry no tag.
pub const TAG_LEN: usize = 3;

/// Body of the reply to a shutdown request.
pub const SHUTDOWN_ACK: &[u8] = b"rip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Map,
    Reduce,
    Shutdown,
}

impl Command {
    pub fn tag(self) -> &'static [u8; TAG_LEN] {
        match self {
            Command::Map => b"map",
            Command::Reduce => b"red",
            Command::Shutdown => b"rip",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Command> {
        match tag {
            b"map" => Some(Command::Map),
            b"red" => Some(Command::Reduce),
            b"rip" => Some(Command::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Request<'a> {
    /// None for an unrecognised or missing tag.
    pub command: Option<Command>,
    pub payload: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn new(command: Command, payload: &'a [u8]) -> Request<'a> {
        Request {
            command: Some(command),
            payload,
        }
    }

    pub fn decode(message: &'a [u8]) -> Request<'a> {
        if message.len() < TAG_LEN {
            return Request {
                command: None,
                payload: &[],
            };
        }
        let (tag, payload) = message.split_at(TAG_LEN);
        Request {
            command: Command::from_tag(tag),
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(TAG_LEN + self.payload.len());
        if let Some(command) = self.command {
            message.extend_from_slice(command.tag());
        }
        message.extend_from_slice(self.payload);
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_framing_is_tag_then_payload() {
        let message = Request::new(Command::Map, b"the cat").encode();
        assert_eq!(message, b"mapthe cat".to_vec());
        assert_eq!(Request::decode(&message), Request::new(Command::Map, b"the cat"));
    }

    #[test]
    fn shutdown_has_empty_payload() {
        let message = Request::new(Command::Shutdown, b"").encode();
        assert_eq!(message, b"rip".to_vec());
        let request = Request::decode(&message);
        assert_eq!(request.command, Some(Command::Shutdown));
        assert!(request.payload.is_empty());
    }

    #[test]
    fn unknown_or_short_tags_decode_to_none() {
        assert_eq!(Request::decode(b"xyzpayload").command, None);
        assert_eq!(Request::decode(b"ma").command, None);
        assert_eq!(Request::decode(b"").command, None);
    }
}
