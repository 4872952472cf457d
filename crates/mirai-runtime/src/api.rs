//! Request/response endpoints of a [`Bot`] session.
//!
//! Every method needs an authorized session and fails with
//! [`ApiError::NotAuthorized`] otherwise.

use std::path::Path;
use std::time::Duration;

use mirai_core::{
    ApiError, ApiResult, BotInvitedJoinGroupRequestEvent, BotInvitedResponse, Event, Friend,
    Group, GroupConfig, GroupId, HttpRequest, ImageRef, Member, MemberInfo,
    MemberJoinRequestEvent, MemberJoinResponse, Message, MessageEvent, MessageId,
    MultipartPart, NewFriendRequestEvent, NewFriendResponse, ReplyTarget, Segment, SessionConfig,
    TempId, TransportError, UserId,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::bot::Bot;

/// Which kind of chat an uploaded file is meant for. Friend and group
/// uploads are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    Friend,
    Group,
    Temp,
}

impl UploadTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Group => "group",
            Self::Temp => "temp",
        }
    }
}

impl From<ReplyTarget> for UploadTarget {
    fn from(target: ReplyTarget) -> Self {
        match target {
            ReplyTarget::Friend(_) => Self::Friend,
            ReplyTarget::Group(_) => Self::Group,
            ReplyTarget::Temp(_) => Self::Temp,
        }
    }
}

/// Fields addressing `target` the way `sendImageMessage` expects them.
fn target_fields(target: ReplyTarget) -> Value {
    match target {
        ReplyTarget::Friend(user) => json!({ "qq": user }),
        ReplyTarget::Group(group) => json!({ "group": group }),
        ReplyTarget::Temp(temp) => json!({ "qq": temp.user, "group": temp.group }),
    }
}

fn field<T: DeserializeOwned>(response: &Value, name: &str) -> ApiResult<T> {
    let value = response
        .get(name)
        .cloned()
        .ok_or_else(|| ApiError::response(format!("missing `{name}`")))?;
    Ok(serde_json::from_value(value)?)
}

fn mime_for(path: &Path, fallback: &str) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("amr") => "audio/amr",
        Some("silk" | "slk") => "audio/silk",
        _ => fallback,
    }
    .to_owned()
}

/// POST endpoints that take the session key plus a few fields and return
/// nothing but a status code.
macro_rules! impl_api {
    ($(#[$meta:meta])* $name:ident => $path:literal, ($($arg:ident: $typ:ty => $key:literal),* $(,)?)) => {
        $(#[$meta])*
        pub async fn $name(&self, $($arg: $typ),*) -> ApiResult<()> {
            let body = self.with_session(json!({ $($key: $arg),* }))?;
            self.call(HttpRequest::post_json($path, body)).await?;
            Ok(())
        }
    };
}

// =============================================================================
// Messaging
// =============================================================================

impl Bot {
    async fn post_message(&self, path: &str, mut body: Value, message: Message, quote: Option<MessageId>) -> ApiResult<MessageId> {
        body["messageChain"] = serde_json::to_value(&message)?;
        if let Some(quote) = quote {
            body["quote"] = json!(quote);
        }
        let body = self.with_session(body)?;
        let response = self.call(HttpRequest::post_json(path, body)).await?;
        let id: MessageId = field(&response, "messageId")?;
        debug!(path, message_id = %id, "Message sent");
        Ok(id)
    }

    /// Sends `message` to a friend, optionally quoting `quote`.
    pub async fn send_friend_message(
        &self,
        target: impl Into<UserId>,
        message: impl Into<Message>,
        quote: Option<MessageId>,
    ) -> ApiResult<MessageId> {
        let body = json!({ "target": target.into() });
        self.post_message("/sendFriendMessage", body, message.into(), quote)
            .await
    }

    pub async fn send_group_message(
        &self,
        target: impl Into<GroupId>,
        message: impl Into<Message>,
        quote: Option<MessageId>,
    ) -> ApiResult<MessageId> {
        let body = json!({ "target": target.into() });
        self.post_message("/sendGroupMessage", body, message.into(), quote)
            .await
    }

    /// Sends `message` to a group member who is not a friend.
    pub async fn send_temp_message(
        &self,
        target: TempId,
        message: impl Into<Message>,
        quote: Option<MessageId>,
    ) -> ApiResult<MessageId> {
        let body = json!({ "qq": target.user, "group": target.group });
        self.post_message("/sendTempMessage", body, message.into(), quote)
            .await
    }

    /// Sends to whichever chat `target` names.
    pub async fn send_message(
        &self,
        target: ReplyTarget,
        message: impl Into<Message>,
        quote: Option<MessageId>,
    ) -> ApiResult<MessageId> {
        match target {
            ReplyTarget::Friend(user) => self.send_friend_message(user, message, quote).await,
            ReplyTarget::Group(group) => self.send_group_message(group, message, quote).await,
            ReplyTarget::Temp(temp) => self.send_temp_message(temp, message, quote).await,
        }
    }

    /// Answers in the chat `event` came from.
    pub async fn reply<E: MessageEvent>(&self, event: &E, message: impl Into<Message>) -> ApiResult<MessageId> {
        self.send_message(event.reply_target(), message, None).await
    }

    /// Answers in the chat `event` came from, quoting it.
    pub async fn quote_reply<E: MessageEvent>(&self, event: &E, message: impl Into<Message>) -> ApiResult<MessageId> {
        let quote = event.message().id();
        self.send_message(event.reply_target(), message, Some(quote)).await
    }

    impl_api!(
        /// Recalls a message sent by or visible to the bot.
        recall => "/recall",
        (message: MessageId => "target")
    );

    /// Sends images by URL and returns their image ids.
    pub async fn send_image_message(&self, target: ReplyTarget, urls: &[String]) -> ApiResult<Vec<String>> {
        let mut body = target_fields(target);
        body["urls"] = json!(urls);
        let body = self.with_session(body)?;
        let response = self.call(HttpRequest::post_json("/sendImageMessage", body)).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn upload(
        &self,
        path: &str,
        target: UploadTarget,
        file_field: &str,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    ) -> ApiResult<Value> {
        let parts = vec![
            MultipartPart::Text {
                name: "sessionKey".to_owned(),
                value: self.session_key()?,
            },
            MultipartPart::Text {
                name: "type".to_owned(),
                value: target.as_str().to_owned(),
            },
            MultipartPart::File {
                name: file_field.to_owned(),
                file_name,
                mime,
                bytes,
            },
        ];
        self.call(HttpRequest::post_multipart(path, parts)).await
    }

    /// Uploads image bytes for later sending in a `target` chat.
    pub async fn upload_image(
        &self,
        target: UploadTarget,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> ApiResult<ImageRef> {
        let file_name = file_name.into();
        let mime = mime_for(Path::new(&file_name), "application/octet-stream");
        let response = self
            .upload("/uploadImage", target, "img", file_name, mime, bytes)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Reads `path` and uploads it as an image.
    pub async fn upload_image_file(&self, target: UploadTarget, path: impl AsRef<Path>) -> ApiResult<ImageRef> {
        let (file_name, bytes) = read_upload(path.as_ref()).await?;
        self.upload_image(target, file_name, bytes).await
    }

    /// Uploads voice bytes (AMR or SILK) and returns a `Voice` segment.
    pub async fn upload_voice(
        &self,
        target: UploadTarget,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> ApiResult<Segment> {
        let file_name = file_name.into();
        let mime = mime_for(Path::new(&file_name), "application/octet-stream");
        let response = self
            .upload("/uploadVoice", target, "voice", file_name, mime, bytes)
            .await?;
        Ok(Segment::Voice {
            voice_id: field(&response, "voiceId").ok(),
            url: field(&response, "url").ok(),
            path: field(&response, "path").ok(),
        })
    }

    pub async fn upload_voice_file(&self, target: UploadTarget, path: impl AsRef<Path>) -> ApiResult<Segment> {
        let (file_name, bytes) = read_upload(path.as_ref()).await?;
        self.upload_voice(target, file_name, bytes).await
    }
}

async fn read_upload(path: &Path) -> ApiResult<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ApiError::Transport(TransportError::from(e)))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_owned();
    Ok((file_name, bytes))
}

// =============================================================================
// Polling
// =============================================================================

impl Bot {
    async fn poll_events(&self, path: &str, count: usize) -> ApiResult<Vec<Event>> {
        let request = HttpRequest::get(path)
            .query("sessionKey", self.session_key()?)
            .query("count", count);
        let response = self.call(request).await?;
        let raw: Vec<Value> = field(&response, "data")?;

        let mut events = Vec::with_capacity(raw.len());
        for value in raw {
            match Event::from_json(value) {
                Ok(event) => events.push(event),
                Err(e) => warn!(path, error = %e, "Skipping undecodable event"),
            }
        }
        Ok(events)
    }

    /// Removes and returns up to `count` of the oldest queued events.
    pub async fn fetch_events(&self, count: usize) -> ApiResult<Vec<Event>> {
        self.poll_events("/fetchMessage", count).await
    }

    /// Removes and returns up to `count` of the newest queued events.
    pub async fn fetch_latest_events(&self, count: usize) -> ApiResult<Vec<Event>> {
        self.poll_events("/fetchLatestMessage", count).await
    }

    /// Like [`fetch_events`](Self::fetch_events), but leaves the events queued.
    pub async fn peek_events(&self, count: usize) -> ApiResult<Vec<Event>> {
        self.poll_events("/peekMessage", count).await
    }

    pub async fn peek_latest_events(&self, count: usize) -> ApiResult<Vec<Event>> {
        self.poll_events("/peekLatestMessage", count).await
    }

    /// Looks up a cached message event by id.
    pub async fn message_from_id(&self, id: MessageId) -> ApiResult<Event> {
        let request = HttpRequest::get("/messageFromId")
            .query("sessionKey", self.session_key()?)
            .query("id", id);
        let response = self.call(request).await?;
        let raw: Value = field(&response, "data")?;
        Event::from_json(raw).map_err(|e| ApiError::response(e.to_string()))
    }

    /// Number of events waiting in the server-side queue.
    pub async fn count_message(&self) -> ApiResult<usize> {
        let request = HttpRequest::get("/countMessage").query("sessionKey", self.session_key()?);
        let response = self.call(request).await?;
        field(&response, "data")
    }
}

// =============================================================================
// Management
// =============================================================================

impl Bot {
    async fn get<T: DeserializeOwned>(&self, request: HttpRequest) -> ApiResult<T> {
        let response = self.call(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn list_friends(&self) -> ApiResult<Vec<Friend>> {
        self.get(HttpRequest::get("/friendList").query("sessionKey", self.session_key()?))
            .await
    }

    pub async fn list_groups(&self) -> ApiResult<Vec<Group>> {
        self.get(HttpRequest::get("/groupList").query("sessionKey", self.session_key()?))
            .await
    }

    pub async fn list_members(&self, group: impl Into<GroupId>) -> ApiResult<Vec<Member>> {
        let request = HttpRequest::get("/memberList")
            .query("sessionKey", self.session_key()?)
            .query("target", group.into());
        self.get(request).await
    }

    /// Mutes `member` of `group` for `duration`, rounded down to whole seconds.
    pub async fn mute(&self, group: impl Into<GroupId>, member: impl Into<UserId>, duration: Duration) -> ApiResult<()> {
        let body = self.with_session(json!({
            "target": group.into(),
            "memberId": member.into(),
            "time": duration.as_secs(),
        }))?;
        self.call(HttpRequest::post_json("/mute", body)).await?;
        Ok(())
    }

    impl_api!(
        unmute => "/unmute",
        (group: GroupId => "target", member: UserId => "memberId")
    );

    impl_api!(
        /// Mutes everyone but administrators.
        mute_all => "/muteAll",
        (group: GroupId => "target")
    );

    impl_api!(
        unmute_all => "/unmuteAll",
        (group: GroupId => "target")
    );

    impl_api!(
        /// Removes `member` from `group`, showing `reason` to them.
        kick => "/kick",
        (group: GroupId => "target", member: UserId => "memberId", reason: &str => "msg")
    );

    impl_api!(
        /// Leaves `group`.
        quit => "/quit",
        (group: GroupId => "target")
    );

    async fn respond(&self, path: &str, event_id: i64, from: UserId, group: GroupId, operate: i32, message: &str) -> ApiResult<()> {
        let body = self.with_session(json!({
            "eventId": event_id,
            "fromId": from,
            "groupId": group,
            "operate": operate,
            "message": message,
        }))?;
        self.call(HttpRequest::post_json(path, body)).await?;
        Ok(())
    }

    pub async fn respond_new_friend(
        &self,
        event: &NewFriendRequestEvent,
        response: NewFriendResponse,
        message: &str,
    ) -> ApiResult<()> {
        self.respond(
            "/resp/newFriendRequestEvent",
            event.event_id,
            event.from_id,
            event.group_id,
            response.operate(),
            message,
        )
        .await
    }

    pub async fn respond_member_join(
        &self,
        event: &MemberJoinRequestEvent,
        response: MemberJoinResponse,
        message: &str,
    ) -> ApiResult<()> {
        self.respond(
            "/resp/memberJoinRequestEvent",
            event.event_id,
            event.from_id,
            event.group_id,
            response.operate(),
            message,
        )
        .await
    }

    pub async fn respond_bot_invited(
        &self,
        event: &BotInvitedJoinGroupRequestEvent,
        response: BotInvitedResponse,
        message: &str,
    ) -> ApiResult<()> {
        self.respond(
            "/resp/botInvitedJoinGroupRequestEvent",
            event.event_id,
            event.from_id,
            event.group_id,
            response.operate(),
            message,
        )
        .await
    }

    pub async fn group_config(&self, group: impl Into<GroupId>) -> ApiResult<GroupConfig> {
        let request = HttpRequest::get("/groupConfig")
            .query("sessionKey", self.session_key()?)
            .query("target", group.into());
        self.get(request).await
    }

    /// Updates the fields of `config` that are set.
    pub async fn set_group_config(&self, group: impl Into<GroupId>, config: &GroupConfig) -> ApiResult<()> {
        let body = self.with_session(json!({ "target": group.into(), "config": config }))?;
        self.call(HttpRequest::post_json("/groupConfig", body)).await?;
        Ok(())
    }

    pub async fn member_info(&self, group: impl Into<GroupId>, member: impl Into<UserId>) -> ApiResult<MemberInfo> {
        let request = HttpRequest::get("/memberInfo")
            .query("sessionKey", self.session_key()?)
            .query("target", group.into())
            .query("memberId", member.into());
        self.get(request).await
    }

    pub async fn set_member_info(
        &self,
        group: impl Into<GroupId>,
        member: impl Into<UserId>,
        info: &MemberInfo,
    ) -> ApiResult<()> {
        let body = self.with_session(json!({
            "target": group.into(),
            "memberId": member.into(),
            "info": info,
        }))?;
        self.call(HttpRequest::post_json("/memberInfo", body)).await?;
        Ok(())
    }

    pub async fn session_config(&self) -> ApiResult<SessionConfig> {
        self.get(HttpRequest::get("/config").query("sessionKey", self.session_key()?))
            .await
    }

    pub async fn set_session_config(&self, config: &SessionConfig) -> ApiResult<()> {
        let body = self.with_session(serde_json::to_value(config)?)?;
        self.call(HttpRequest::post_json("/config", body)).await?;
        Ok(())
    }
}
