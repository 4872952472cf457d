//! Identifiers and contact info types of the mirai-api-http protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

id_type! {
    /// A QQ account number.
    UserId(i64)
}

id_type! {
    /// A QQ group number.
    GroupId(i64)
}

id_type! {
    /// Identifies a message for quoting and recalling.
    MessageId(i64)
}

/// Addresses a member of a group in a temporary (non-friend) chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId {
    pub user: UserId,
    pub group: GroupId,
}

impl TempId {
    pub fn new(user: impl Into<UserId>, group: impl Into<GroupId>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }
}

/// Role of the bot or a member inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Member,
    Administrator,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub id: UserId,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    /// The bot's own permission in this group.
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    #[serde(rename = "memberName", default)]
    pub name: String,
    pub permission: Permission,
    pub group: Group,
}

impl Member {
    pub fn temp_id(&self) -> TempId {
        TempId::new(self.id, self.group.id)
    }
}

// =============================================================================
// Configuration payloads
// =============================================================================

/// Per-session settings on the server side (`/config`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_websocket: Option<bool>,
}

/// Group settings (`/groupConfig`). Unset fields are left unchanged on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confess_talk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_member_invite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_approve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_chat: Option<bool>,
}

/// Member profile inside a group (`/memberInfo`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_title: Option<String>,
}

/// Answer to a `NewFriendRequestEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewFriendResponse {
    Accept,
    Reject,
    /// Reject and never accept requests from this account again.
    RejectAndBlacklist,
}

/// Answer to a `MemberJoinRequestEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberJoinResponse {
    Accept,
    Reject,
    Ignore,
    RejectAndBlacklist,
    IgnoreAndBlacklist,
}

/// Answer to a `BotInvitedJoinGroupRequestEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotInvitedResponse {
    Accept,
    Reject,
}

impl NewFriendResponse {
    pub fn operate(self) -> i32 {
        match self {
            Self::Accept => 0,
            Self::Reject => 1,
            Self::RejectAndBlacklist => 2,
        }
    }
}

impl MemberJoinResponse {
    pub fn operate(self) -> i32 {
        match self {
            Self::Accept => 0,
            Self::Reject => 1,
            Self::Ignore => 2,
            Self::RejectAndBlacklist => 3,
            Self::IgnoreAndBlacklist => 4,
        }
    }
}

impl BotInvitedResponse {
    pub fn operate(self) -> i32 {
        match self {
            Self::Accept => 0,
            Self::Reject => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_uses_wire_field_names() {
        let member: Member = serde_json::from_value(serde_json::json!({
            "id": 1234,
            "memberName": "alice",
            "permission": "ADMINISTRATOR",
            "group": { "id": 42, "name": "rustaceans", "permission": "MEMBER" }
        }))
        .unwrap();

        assert_eq!(member.id, UserId(1234));
        assert_eq!(member.name, "alice");
        assert_eq!(member.permission, Permission::Administrator);
        assert_eq!(member.temp_id(), TempId::new(1234, 42));
    }

    #[test]
    fn partial_group_config_skips_unset_fields() {
        let config = GroupConfig {
            confess_talk: Some(true),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            serde_json::json!({ "confessTalk": true })
        );
    }
}
