//! The event model of the inbound stream.
//!
//! - [`Event`] - Closed sum of every event the server pushes
//! - [`EventType`] - Fieldless tag of an [`Event`], compared in O(1)
//! - [`ConcreteEvent`] - Typed access to one variant, derived with
//!   `#[derive(ConcreteEvent)]`
//! - [`MessageEvent`] / [`Participants`] - Views used by the built-in patterns
//!
//! # Decoding
//!
//! Every frame is a JSON object whose `type` field names the concrete event:
//!
//! ```rust,ignore
//! let event = Event::decode(r#"{"type":"BotJoinGroupEvent","group":{...}}"#)?;
//! if let Some(join) = event.get_if::<BotJoinGroupEvent>() {
//!     println!("joined {}", join.group.name);
//! }
//! ```

use mirai_macros::ConcreteEvent;
use serde::Deserialize;
use serde_json::Value;

use super::error::{DecodeError, DecodeResult};
use super::message::ReceivedMessage;
use super::types::{Friend, Group, GroupId, Member, MessageId, Permission, TempId, UserId};

// ============================================================================
// Event / EventType
// ============================================================================

macro_rules! define_events {
    ($($(#[$meta:meta])* $variant:ident($ty:ident)),* $(,)?) => {
        /// Tag naming the concrete variant of an [`Event`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($variant),*
        }

        impl EventType {
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }
        }

        /// One decoded notification from the event stream.
        #[derive(Debug, Clone)]
        pub enum Event {
            $($(#[$meta])* $variant($ty)),*
        }

        impl Event {
            pub fn event_type(&self) -> EventType {
                match self {
                    $(Self::$variant(_) => EventType::$variant),*
                }
            }
        }
    };
}

define_events! {
    FriendMessage(FriendMessageEvent),
    GroupMessage(GroupMessageEvent),
    TempMessage(TempMessageEvent),
    BotOnline(BotOnlineEvent),
    BotOffline(BotOfflineEvent),
    BotGroupPermissionChange(BotGroupPermissionChangeEvent),
    BotMuted(BotMutedEvent),
    BotUnmuted(BotUnmutedEvent),
    BotJoinGroup(BotJoinGroupEvent),
    BotQuit(BotQuitEvent),
    BotKicked(BotKickedEvent),
    GroupRecall(GroupRecallEvent),
    FriendRecall(FriendRecallEvent),
    GroupNameChange(GroupNameChangeEvent),
    GroupEntranceAnnouncementChange(GroupEntranceAnnouncementChangeEvent),
    GroupSettingChange(GroupSettingChangeEvent),
    MemberJoin(MemberJoinEvent),
    MemberKicked(MemberKickedEvent),
    MemberQuit(MemberQuitEvent),
    MemberCardChange(MemberCardChangeEvent),
    MemberSpecialTitleChange(MemberSpecialTitleChangeEvent),
    MemberPermissionChange(MemberPermissionChangeEvent),
    MemberMuted(MemberMutedEvent),
    MemberUnmuted(MemberUnmutedEvent),
    NewFriendRequest(NewFriendRequestEvent),
    MemberJoinRequest(MemberJoinRequestEvent),
    BotInvitedJoinGroupRequest(BotInvitedJoinGroupRequestEvent),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete event struct that occupies exactly one [`Event`] variant.
///
/// Implemented with `#[derive(ConcreteEvent)]`.
pub trait ConcreteEvent: Sized + Send + 'static {
    const TYPE: EventType;

    /// Borrows the payload if `event` is this variant.
    fn peek(event: &Event) -> Option<&Self>;

    /// Moves the payload out, or returns the event unchanged.
    fn extract(event: Event) -> Result<Self, Event>;
}

impl Event {
    /// Decodes one stream frame.
    pub fn decode(raw: &str) -> DecodeResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_json(value)
    }

    /// Decodes an event object, dispatching on its `type` field.
    pub fn from_json(value: Value) -> DecodeResult<Self> {
        let discriminant = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingDiscriminant)?
            .to_owned();

        macro_rules! decode {
            ($ty:ty) => {{
                let event: $ty = serde_json::from_value(value)?;
                Ok(event.into())
            }};
            ($ty:ty, $field:ident = $kind:expr) => {{
                let mut event: $ty = serde_json::from_value(value)?;
                event.$field = $kind;
                Ok(event.into())
            }};
        }

        match discriminant.as_str() {
            "FriendMessage" => decode!(FriendMessageEvent),
            "GroupMessage" => decode!(GroupMessageEvent),
            "TempMessage" => decode!(TempMessageEvent),
            "BotOnlineEvent" => decode!(BotOnlineEvent, kind = OnlineKind::Login),
            "BotReloginEvent" => decode!(BotOnlineEvent, kind = OnlineKind::Relogin),
            "BotOfflineEventActive" => decode!(BotOfflineEvent, kind = OfflineKind::Active),
            "BotOfflineEventForce" => decode!(BotOfflineEvent, kind = OfflineKind::Forced),
            "BotOfflineEventDropped" => decode!(BotOfflineEvent, kind = OfflineKind::Dropped),
            "BotGroupPermissionChangeEvent" => decode!(BotGroupPermissionChangeEvent),
            "BotMuteEvent" => decode!(BotMutedEvent),
            "BotUnmuteEvent" => decode!(BotUnmutedEvent),
            "BotJoinGroupEvent" => decode!(BotJoinGroupEvent),
            "BotLeaveEventActive" => decode!(BotQuitEvent),
            "BotLeaveEventKick" => decode!(BotKickedEvent),
            "GroupRecallEvent" => decode!(GroupRecallEvent),
            "FriendRecallEvent" => decode!(FriendRecallEvent),
            "GroupNameChangeEvent" => decode!(GroupNameChangeEvent),
            "GroupEntranceAnnouncementChangeEvent" => {
                decode!(GroupEntranceAnnouncementChangeEvent)
            }
            "GroupMuteAllEvent" => decode!(GroupSettingChangeEvent, setting = GroupSetting::MuteAll),
            "GroupAllowAnonymousChatEvent" => {
                decode!(GroupSettingChangeEvent, setting = GroupSetting::AnonymousChat)
            }
            "GroupAllowConfessTalkEvent" => {
                decode!(GroupSettingChangeEvent, setting = GroupSetting::ConfessTalk)
            }
            "GroupAllowMemberInviteEvent" => {
                decode!(GroupSettingChangeEvent, setting = GroupSetting::MemberInvite)
            }
            "MemberJoinEvent" => decode!(MemberJoinEvent),
            "MemberLeaveEventKick" => decode!(MemberKickedEvent),
            "MemberLeaveEventQuit" => decode!(MemberQuitEvent),
            "MemberCardChangeEvent" => decode!(MemberCardChangeEvent),
            "MemberSpecialTitleChangeEvent" => decode!(MemberSpecialTitleChangeEvent),
            "MemberPermissionChangeEvent" => decode!(MemberPermissionChangeEvent),
            "MemberMuteEvent" => decode!(MemberMutedEvent),
            "MemberUnmuteEvent" => decode!(MemberUnmutedEvent),
            "NewFriendRequestEvent" => decode!(NewFriendRequestEvent),
            "MemberJoinRequestEvent" => decode!(MemberJoinRequestEvent),
            "BotInvitedJoinGroupRequestEvent" => decode!(BotInvitedJoinGroupRequestEvent),
            _ => Err(DecodeError::UnknownEventType(discriminant)),
        }
    }

    /// Borrows the payload as `E`, if this event is that variant.
    pub fn get_if<E: ConcreteEvent>(&self) -> Option<&E> {
        E::peek(self)
    }

    /// Converts into `E`, handing the event back if it is another variant.
    pub fn into_concrete<E: ConcreteEvent>(self) -> Result<E, Event> {
        E::extract(self)
    }

    pub fn is<E: ConcreteEvent>(&self) -> bool {
        self.event_type() == E::TYPE
    }
}

// ============================================================================
// Message events
// ============================================================================

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct FriendMessageEvent {
    #[serde(rename = "messageChain")]
    pub message: ReceivedMessage,
    pub sender: Friend,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct GroupMessageEvent {
    #[serde(rename = "messageChain")]
    pub message: ReceivedMessage,
    pub sender: Member,
}

/// A message from a group member who is not a friend of the bot.
#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct TempMessageEvent {
    #[serde(rename = "messageChain")]
    pub message: ReceivedMessage,
    pub sender: Member,
}

/// Where a reply to a message event has to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    Friend(UserId),
    Group(GroupId),
    Temp(TempId),
}

/// Common view of the three message events.
pub trait MessageEvent: ConcreteEvent {
    fn message(&self) -> &ReceivedMessage;
    fn sender_id(&self) -> UserId;
    fn reply_target(&self) -> ReplyTarget;
}

impl MessageEvent for FriendMessageEvent {
    fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    fn sender_id(&self) -> UserId {
        self.sender.id
    }

    fn reply_target(&self) -> ReplyTarget {
        ReplyTarget::Friend(self.sender.id)
    }
}

impl MessageEvent for GroupMessageEvent {
    fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    fn sender_id(&self) -> UserId {
        self.sender.id
    }

    fn reply_target(&self) -> ReplyTarget {
        ReplyTarget::Group(self.sender.group.id)
    }
}

impl MessageEvent for TempMessageEvent {
    fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    fn sender_id(&self) -> UserId {
        self.sender.id
    }

    fn reply_target(&self) -> ReplyTarget {
        ReplyTarget::Temp(self.sender.temp_id())
    }
}

// ============================================================================
// Bot events
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnlineKind {
    #[default]
    Login,
    Relogin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OfflineKind {
    /// The bot logged out on its own.
    #[default]
    Active,
    /// Another client logged in with the same account.
    Forced,
    /// The connection to the server dropped.
    Dropped,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotOnlineEvent {
    #[serde(skip)]
    pub kind: OnlineKind,
    #[serde(rename = "qq")]
    pub bot_id: UserId,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotOfflineEvent {
    #[serde(skip)]
    pub kind: OfflineKind,
    #[serde(rename = "qq")]
    pub bot_id: UserId,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotGroupPermissionChangeEvent {
    #[serde(rename = "origin")]
    pub original: Permission,
    pub current: Permission,
    pub group: Group,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotMutedEvent {
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: i64,
    #[serde(rename = "operator")]
    pub executor: Member,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotUnmutedEvent {
    #[serde(rename = "operator")]
    pub executor: Member,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotJoinGroupEvent {
    pub group: Group,
}

/// The bot left a group on its own.
#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotQuitEvent {
    pub group: Group,
}

/// The bot was removed from a group.
#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct BotKickedEvent {
    pub group: Group,
}

// ============================================================================
// Group and friend notices
// ============================================================================

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecallEvent {
    #[serde(rename = "authorId")]
    pub sender_id: UserId,
    pub message_id: MessageId,
    pub time: i64,
    pub group: Group,
    /// `None` when the bot itself recalled the message.
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
#[serde(rename_all = "camelCase")]
pub struct FriendRecallEvent {
    #[serde(rename = "authorId")]
    pub sender_id: UserId,
    pub message_id: MessageId,
    pub time: i64,
    #[serde(rename = "operator")]
    pub executor_id: UserId,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct GroupNameChangeEvent {
    #[serde(rename = "origin")]
    pub original: String,
    pub current: String,
    pub group: Group,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct GroupEntranceAnnouncementChangeEvent {
    #[serde(rename = "origin")]
    pub original: String,
    pub current: String,
    pub group: Group,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

/// Which boolean group setting a [`GroupSettingChangeEvent`] reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupSetting {
    #[default]
    MuteAll,
    AnonymousChat,
    ConfessTalk,
    MemberInvite,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct GroupSettingChangeEvent {
    #[serde(skip)]
    pub setting: GroupSetting,
    #[serde(rename = "origin")]
    pub original: bool,
    pub current: bool,
    pub group: Group,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

// ============================================================================
// Member notices
// ============================================================================

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberJoinEvent {
    pub member: Member,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberKickedEvent {
    pub member: Member,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberQuitEvent {
    pub member: Member,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberCardChangeEvent {
    #[serde(rename = "origin")]
    pub original: String,
    pub current: String,
    pub member: Member,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberSpecialTitleChangeEvent {
    #[serde(rename = "origin")]
    pub original: String,
    pub current: String,
    pub member: Member,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberPermissionChangeEvent {
    #[serde(rename = "origin")]
    pub original: Permission,
    pub current: Permission,
    pub member: Member,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberMutedEvent {
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: i64,
    pub member: Member,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
pub struct MemberUnmutedEvent {
    pub member: Member,
    #[serde(rename = "operator", default)]
    pub executor: Option<Member>,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
#[serde(rename_all = "camelCase")]
pub struct NewFriendRequestEvent {
    pub event_id: i64,
    pub from_id: UserId,
    /// The group the requester found the bot through, or 0.
    #[serde(default)]
    pub group_id: GroupId,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
#[serde(rename_all = "camelCase")]
pub struct MemberJoinRequestEvent {
    pub event_id: i64,
    pub from_id: UserId,
    pub group_id: GroupId,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, ConcreteEvent)]
#[serde(rename_all = "camelCase")]
pub struct BotInvitedJoinGroupRequestEvent {
    pub event_id: i64,
    pub from_id: UserId,
    pub group_id: GroupId,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Participants
// ============================================================================

/// The user and group an event is primarily about, if any.
pub trait Participants {
    fn user(&self) -> Option<UserId> {
        None
    }

    fn group(&self) -> Option<GroupId> {
        None
    }
}

impl Participants for FriendMessageEvent {
    fn user(&self) -> Option<UserId> {
        Some(self.sender.id)
    }
}

impl Participants for FriendRecallEvent {
    fn user(&self) -> Option<UserId> {
        Some(self.sender_id)
    }
}

impl Participants for NewFriendRequestEvent {
    fn user(&self) -> Option<UserId> {
        Some(self.from_id)
    }
}

macro_rules! member_participants {
    ($($ty:ty => $member:ident),* $(,)?) => {
        $(impl Participants for $ty {
            fn user(&self) -> Option<UserId> {
                Some(self.$member.id)
            }

            fn group(&self) -> Option<GroupId> {
                Some(self.$member.group.id)
            }
        })*
    };
}

member_participants! {
    GroupMessageEvent => sender,
    TempMessageEvent => sender,
    BotMutedEvent => executor,
    BotUnmutedEvent => executor,
    MemberJoinEvent => member,
    MemberKickedEvent => member,
    MemberQuitEvent => member,
    MemberCardChangeEvent => member,
    MemberSpecialTitleChangeEvent => member,
    MemberPermissionChangeEvent => member,
    MemberMutedEvent => member,
    MemberUnmutedEvent => member,
}

macro_rules! group_participants {
    ($($ty:ty),* $(,)?) => {
        $(impl Participants for $ty {
            fn group(&self) -> Option<GroupId> {
                Some(self.group.id)
            }
        })*
    };
}

group_participants! {
    BotGroupPermissionChangeEvent,
    BotJoinGroupEvent,
    BotQuitEvent,
    BotKickedEvent,
    GroupNameChangeEvent,
    GroupEntranceAnnouncementChangeEvent,
    GroupSettingChangeEvent,
}

impl Participants for GroupRecallEvent {
    fn user(&self) -> Option<UserId> {
        Some(self.sender_id)
    }

    fn group(&self) -> Option<GroupId> {
        Some(self.group.id)
    }
}

impl Participants for MemberJoinRequestEvent {
    fn user(&self) -> Option<UserId> {
        Some(self.from_id)
    }

    fn group(&self) -> Option<GroupId> {
        Some(self.group_id)
    }
}

impl Participants for BotInvitedJoinGroupRequestEvent {
    fn user(&self) -> Option<UserId> {
        Some(self.from_id)
    }

    fn group(&self) -> Option<GroupId> {
        Some(self.group_id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{Value, json};

    pub fn member(id: i64, group: i64) -> Value {
        json!({
            "id": id,
            "memberName": format!("member-{id}"),
            "permission": "MEMBER",
            "group": { "id": group, "name": format!("group-{group}"), "permission": "ADMINISTRATOR" }
        })
    }

    pub fn group_message(sender: i64, group: i64, message_id: i64, text: &str) -> String {
        json!({
            "type": "GroupMessage",
            "messageChain": [
                { "type": "Source", "id": message_id, "time": 1_600_000_000 },
                { "type": "Plain", "text": text }
            ],
            "sender": member(sender, group)
        })
        .to_string()
    }

    pub fn friend_message(sender: i64, message_id: i64, text: &str) -> String {
        json!({
            "type": "FriendMessage",
            "messageChain": [
                { "type": "Source", "id": message_id, "time": 1_600_000_000 },
                { "type": "Plain", "text": text }
            ],
            "sender": { "id": sender, "nickname": "friend", "remark": "" }
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_group_message() {
        let event = Event::decode(&group_message(1, 2, 3, "ping")).unwrap();
        assert_eq!(event.event_type(), EventType::GroupMessage);

        let message = event.get_if::<GroupMessageEvent>().unwrap();
        assert_eq!(message.sender.id, UserId(1));
        assert_eq!(message.sender.group.id, GroupId(2));
        assert_eq!(message.message.id(), MessageId(3));
        assert_eq!(message.message.plain_text(), "ping");
        assert!(event.get_if::<FriendMessageEvent>().is_none());
    }

    #[test]
    fn discriminant_selects_subtype() {
        let event = Event::decode(r#"{"type":"BotReloginEvent","qq":10}"#).unwrap();
        let online = event.into_concrete::<BotOnlineEvent>().unwrap();
        assert_eq!(online.kind, OnlineKind::Relogin);
        assert_eq!(online.bot_id, UserId(10));

        let raw = json!({
            "type": "GroupAllowConfessTalkEvent",
            "origin": false,
            "current": true,
            "group": { "id": 5, "name": "g", "permission": "OWNER" },
            "isByBot": false
        });
        let event = Event::from_json(raw).unwrap();
        let change = event.get_if::<GroupSettingChangeEvent>().unwrap();
        assert_eq!(change.setting, GroupSetting::ConfessTalk);
        assert!(change.executor.is_none());
    }

    #[test]
    fn unknown_discriminant_is_a_decode_error() {
        let err = Event::decode(r#"{"type":"NudgeEvent"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEventType(ref ty) if ty == "NudgeEvent"));

        let err = Event::decode(r#"{"qq":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingDiscriminant));

        let err = Event::decode("not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn into_concrete_hands_back_other_variants() {
        let event = Event::decode(&friend_message(9, 1, "hi")).unwrap();
        let event = event.into_concrete::<GroupMessageEvent>().unwrap_err();
        assert!(event.is::<FriendMessageEvent>());
        assert_eq!(FriendMessageEvent::TYPE, EventType::FriendMessage);
    }

    #[test]
    fn participants_cover_member_events() {
        let raw = json!({
            "type": "MemberMuteEvent",
            "durationSeconds": 600,
            "member": member(7, 8),
            "operator": member(1, 8)
        });
        let event = Event::from_json(raw).unwrap();
        let muted = event.get_if::<MemberMutedEvent>().unwrap();
        assert_eq!(muted.user(), Some(UserId(7)));
        assert_eq!(muted.group(), Some(GroupId(8)));
        assert_eq!(muted.executor.as_ref().map(|m| m.id), Some(UserId(1)));
    }
}
