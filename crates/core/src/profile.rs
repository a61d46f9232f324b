//! Who is practicing, and the credentials handed out to join a practice room.

use crate::scenario::Gender;
use serde::{Deserialize, Serialize};

/// The user as the persona should address them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub gender: Gender,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, gender: Gender) -> Self {
        Self {
            name: name.into(),
            gender,
        }
    }
}

/// Where to connect and with which token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    pub server_url: String,
    pub room_name: String,
    pub participant_name: String,
    pub participant_token: String,
}
