//! # Mirai Core
//!
//! Event model and event multiplexing for the mirai-api-http client.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Events**: the closed [`Event`] sum with its [`EventType`] tag and
//!   typed access through [`ConcreteEvent`]
//! - **Messages**: [`Message`] chains and their [`Segment`]s
//! - **Types**: ids, contacts and configuration payloads
//! - **Errors**: [`TransportError`], [`DecodeError`], [`ApiError`]
//!
//! ### Framework Layer
//!
//! - **Scheduler**: [`Scheduler`] / [`TokioScheduler`]
//! - **Waiter Queue**: [`WaiterQueue`], first registered waiter wins
//! - **Patterns**: [`Pattern`] and `WaiterQueue::await_match*`
//! - **Stream Reader**: [`StreamReader`], fallback dispatch and draining
//!
//! ### Integration Layer
//!
//! - **Transport**: the [`Transport`] / [`FrameStream`] traits implemented by
//!   `mirai-transport`
//!
//! ## Event flow
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   claimed   ┌─────────────────┐
//! │ Transport │──▶│ StreamReader │────────────▶│ PendingWaiter   │
//! │  (frames) │   │ decode+claim │             └─────────────────┘
//! └───────────┘   └──────┬───────┘  unclaimed  ┌─────────────────┐
//!                        └────────────────────▶│ fallback task(s)│
//!                                              └─────────────────┘
//! ```

extern crate self as mirai_core;

pub mod foundation;
pub mod framework;
pub mod integration;

pub use framework::pattern;

// Foundation
pub use foundation::error::{
    ApiError, ApiResult, DecodeError, DecodeResult, MiraiStatus, TransportError, TransportResult,
};
pub use foundation::event::{
    BotGroupPermissionChangeEvent, BotInvitedJoinGroupRequestEvent, BotJoinGroupEvent,
    BotKickedEvent, BotMutedEvent, BotOfflineEvent, BotOnlineEvent, BotQuitEvent,
    BotUnmutedEvent, ConcreteEvent, Event, EventType, FriendMessageEvent, FriendRecallEvent,
    GroupEntranceAnnouncementChangeEvent, GroupMessageEvent, GroupNameChangeEvent,
    GroupRecallEvent, GroupSetting, GroupSettingChangeEvent, MemberCardChangeEvent,
    MemberJoinEvent, MemberJoinRequestEvent, MemberKickedEvent, MemberMutedEvent,
    MemberPermissionChangeEvent, MemberQuitEvent, MemberSpecialTitleChangeEvent,
    MemberUnmutedEvent, MessageEvent, NewFriendRequestEvent, OfflineKind, OnlineKind,
    Participants, ReplyTarget, TempMessageEvent,
};
pub use foundation::message::{
    ImageRef, Message, MessageSource, QuotedMessage, ReceivedMessage, Segment,
};
pub use foundation::types::{
    BotInvitedResponse, Friend, Group, GroupConfig, GroupId, Member, MemberInfo,
    MemberJoinResponse, MessageId, NewFriendResponse, Permission, SessionConfig, TempId, UserId,
};

// Framework
pub use framework::error::{
    BoxError, DispatchError, StreamError, StreamResult, WaitError, WaitResult,
};
pub use framework::pattern::Pattern;
pub use framework::scheduler::{Instant, Scheduler, SharedScheduler, TokioScheduler};
pub use framework::stream::{
    CallbackResult, EventCallback, ExceptionSink, Flow, StopHandle, StreamHandle, StreamReader,
    StreamState, log_exception,
};
pub use framework::waiter::{Claim, PendingWaiter, WaiterId, WaiterQueue};

// Integration
pub use integration::transport::{
    BoxedFrameStream, EndpointConfig, FrameStream, HttpMethod, HttpRequest, MultipartPart,
    RequestBody, RetryConfig, SharedTransport, Transport,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use mirai_macros::ConcreteEvent;
