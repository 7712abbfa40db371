//! WhatsApp JID (Jabber ID) types.
//!
//! JIDs identify users, groups and broadcast lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::ChatKind;
use crate::error::ValidationError;

/// Known JID servers
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const GROUP: &str = "g.us";
    pub const LEGACY_USER: &str = "c.us";
    pub const BROADCAST: &str = "broadcast";
}

/// JID represents a WhatsApp address: `user[:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// Creates a new regular JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// User JID for a phone number. Formatting characters are dropped.
    pub fn from_phone(phone: &str) -> Result<Self, ValidationError> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(ValidationError::InvalidJid(phone.to_string()));
        }
        Ok(Self::new(digits, servers::DEFAULT_USER))
    }

    /// Returns a version of the JID without the device part.
    pub fn to_non_ad(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }

    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    /// Returns true if this is a broadcast list (not status broadcast).
    pub fn is_broadcast_list(&self) -> bool {
        self.server == servers::BROADCAST && self.user != "status"
    }

    /// Kind of chat this JID addresses.
    pub fn chat_kind(&self) -> ChatKind {
        match self.server.as_str() {
            servers::GROUP => ChatKind::Group,
            servers::BROADCAST => ChatKind::Broadcast,
            _ => ChatKind::Dm,
        }
    }

    /// Returns true if the JID is empty (no server).
    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidJid(s.to_string());
        let Some((user_part, server)) = s.split_once('@') else {
            if s.is_empty() || s.contains(char::is_whitespace) {
                return Err(invalid());
            }
            return Ok(Jid::new("", s));
        };
        if server.is_empty() || server.contains('@') {
            return Err(invalid());
        }

        let mut jid = Jid::new(user_part, server);
        if let Some((user, device)) = user_part.split_once(':') {
            jid.user = user.to_string();
            jid.device = device.parse().map_err(|_| invalid())?;
        }
        if jid.user.is_empty() {
            return Err(invalid());
        }
        Ok(jid)
    }
}

impl Serialize for Jid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// Common JIDs
lazy_static::lazy_static! {
    pub static ref SERVER_JID: Jid = Jid::new("", servers::DEFAULT_USER);
    pub static ref GROUP_SERVER_JID: Jid = Jid::new("", servers::GROUP);
    pub static ref STATUS_BROADCAST_JID: Jid = Jid::new("status", servers::BROADCAST);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_jid() {
        let jid: Jid = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert_eq!(jid.device, 0);
    }

    #[test]
    fn test_parse_device_jid() {
        let jid: Jid = "1234567890:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.device, 2);
        assert_eq!(jid.to_string(), "1234567890:2@s.whatsapp.net");
        assert_eq!(jid.to_non_ad().to_string(), "1234567890@s.whatsapp.net");
    }

    #[test]
    fn test_server_only_jid() {
        let jid: Jid = "s.whatsapp.net".parse().unwrap();
        assert_eq!(jid, *SERVER_JID);
        assert_eq!(jid.to_string(), "s.whatsapp.net");
    }

    #[test]
    fn test_invalid_jids() {
        for bad in ["", "@g.us", "user@", "a@b@c", "user:x@s.whatsapp.net", "has space"] {
            assert!(bad.parse::<Jid>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_chat_kind() {
        let group: Jid = "123456789-1234567890@g.us".parse().unwrap();
        assert!(group.is_group());
        assert_eq!(group.chat_kind(), ChatKind::Group);
        assert_eq!(Jid::new("123", servers::BROADCAST).chat_kind(), ChatKind::Broadcast);
        assert!(!STATUS_BROADCAST_JID.is_broadcast_list());
        assert_eq!(Jid::new("1555", servers::DEFAULT_USER).chat_kind(), ChatKind::Dm);
    }

    #[test]
    fn test_from_phone() {
        let jid = Jid::from_phone("+1 (555) 123-4567").unwrap();
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
        assert!(Jid::from_phone("---").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let jid: Jid = "1555@s.whatsapp.net".parse().unwrap();
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"1555@s.whatsapp.net\"");
        assert_eq!(serde_json::from_str::<Jid>(&json).unwrap(), jid);
    }
}
