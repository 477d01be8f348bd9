//! Control messages exchanged with the remote bridge
//!
//! Frames on the bridge's stdin are `<length>\n<channel>\n<payload>`, where
//! `length` counts the channel line and payload, and the empty channel is the
//! control channel.

use serde::ser::Serializer;
use serde::Serialize;

use crate::error::Result;

/// Superuser elevation requested at startup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Superuser {
    #[default]
    None,
    /// Elevate using the named superuser bridge
    Init { id: String },
}

impl Superuser {
    /// Interpret an `init-superuser` request value; absent or `"none"` disables it
    pub fn from_option(value: Option<&str>) -> Self {
        match value {
            None | Some("none") => Superuser::None,
            Some(id) => Superuser::Init { id: id.to_string() },
        }
    }
}

impl Serialize for Superuser {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Superuser::None => serializer.serialize_bool(false),
            Superuser::Init { id } => serde_json::json!({ "id": id }).serialize(serializer),
        }
    }
}

/// Control messages written by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// First message on a new bridge
    Init {
        version: u32,
        host: String,
        superuser: Superuser,
    },
    /// Reply to an authorize challenge
    Authorize { cookie: String, response: String },
}

/// Frame a payload for `channel`
pub fn frame(channel: &str, payload: &[u8]) -> Vec<u8> {
    let length = channel.len() + 1 + payload.len();
    let mut data = format!("{}\n{}\n", length, channel).into_bytes();
    data.extend_from_slice(payload);
    data
}

/// Frame a message for the control channel
pub fn control_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    Ok(frame("", &payload))
}
