use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest frame the control socket accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Messages sent from a control client to the running player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    TogglePause,
    Pause,
    Resume,
    /// A named hotkey was pressed; resolved against the loaded bindings.
    Key { key: String },
    Status,
}

/// Messages sent back from the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum Reply {
    Status {
        status: PlaybackStatus,
        channel_id: Option<u64>,
        track: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Playback status of the session.
///
/// `Playing` and `Paused` only while a track is loaded in the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Reply(Reply),
}

impl Message {
    /// 4-byte big-endian length, then the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let len = Self::frame_len(data)?;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }

    /// Body length announced by the header at the front of `data`.
    pub fn frame_len(data: &[u8]) -> anyhow::Result<usize> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds limit", len);
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_command_encode_decode() {
        let msg = Message::Command(Command::Key { key: "Pause".into() });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Key { key }) => assert_eq!(key, "Pause"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_status_reply_wire_shape() {
        let msg = Message::Reply(Reply::Status {
            status: PlaybackStatus::Paused,
            channel_id: Some(42),
            track: None,
        });
        let encoded = msg.encode().unwrap();
        let body: serde_json::Value = serde_json::from_slice(&encoded[4..]).unwrap();
        assert_eq!(body["reply"], "Status");
        assert_eq!(body["status"], "Paused");
        assert_eq!(body["channel_id"], 42);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let encoded = Message::Command(Command::TogglePause).encode().unwrap();
        assert!(Message::decode(&encoded[..3]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        let (decoded, _) = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, Message::Command(Command::TogglePause));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(Message::frame_len(&header).is_err());
    }
}
