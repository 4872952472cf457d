//! Patterns and the pattern matching API.
//!
//! A [`Pattern<E>`] decides whether a waiter accepts an event of type `E`.
//! Any `Fn(&E) -> bool` closure is a pattern, tuples of patterns match when
//! every member matches, and the built-in constructors cover the usual
//! filters:
//!
//! ```rust,ignore
//! use mirai_core::pattern::{from_group, text_eq};
//!
//! let reply: GroupMessageEvent = queue
//!     .await_match((from_group(42), text_eq("yes")))
//!     .await?;
//!
//! let maybe: Option<FriendMessageEvent> = queue
//!     .await_match_within(from_user(10), Duration::from_secs(30))
//!     .await?;
//! ```

use std::time::Duration;

use tracing::debug;

use super::error::WaitResult;
use super::scheduler::Instant;
use super::waiter::WaiterQueue;
use crate::foundation::event::{ConcreteEvent, MessageEvent, Participants};
use crate::foundation::types::{GroupId, MessageId, TempId, UserId};

/// Predicate over events of type `E`.
///
/// Patterns run under the waiter queue lock and should be cheap and free of
/// side effects.
pub trait Pattern<E>: Send + Sync + 'static {
    fn matches(&self, event: &E) -> bool;
}

impl<E, F> Pattern<E> for F
where
    F: Fn(&E) -> bool + Send + Sync + 'static,
{
    fn matches(&self, event: &E) -> bool {
        self(event)
    }
}

macro_rules! impl_tuple_pattern {
    ($($name:ident),+) => {
        impl<E, $($name: Pattern<E>),+> Pattern<E> for ($($name,)+) {
            #[allow(non_snake_case)]
            fn matches(&self, event: &E) -> bool {
                let ($($name,)+) = self;
                $($name.matches(event))&&+
            }
        }
    };
}

impl_tuple_pattern!(A, B);
impl_tuple_pattern!(A, B, C);
impl_tuple_pattern!(A, B, C, D);

// ============================================================================
// Built-in patterns
// ============================================================================

/// Matches every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Any;

impl<E> Pattern<E> for Any {
    fn matches(&self, _event: &E) -> bool {
        true
    }
}

pub fn any() -> Any {
    Any
}

/// Matches events about the given user: message senders, affected members
/// and requesters.
#[derive(Debug, Clone, Copy)]
pub struct FromUser(pub UserId);

impl<E: Participants> Pattern<E> for FromUser {
    fn matches(&self, event: &E) -> bool {
        event.user() == Some(self.0)
    }
}

pub fn from_user(user: impl Into<UserId>) -> FromUser {
    FromUser(user.into())
}

/// Matches events that happen in the given group.
#[derive(Debug, Clone, Copy)]
pub struct FromGroup(pub GroupId);

impl<E: Participants> Pattern<E> for FromGroup {
    fn matches(&self, event: &E) -> bool {
        event.group() == Some(self.0)
    }
}

pub fn from_group(group: impl Into<GroupId>) -> FromGroup {
    FromGroup(group.into())
}

/// Matches events about one member of one group.
#[derive(Debug, Clone, Copy)]
pub struct FromTemp(pub TempId);

impl<E: Participants> Pattern<E> for FromTemp {
    fn matches(&self, event: &E) -> bool {
        event.user() == Some(self.0.user) && event.group() == Some(self.0.group)
    }
}

pub fn from_temp(temp: TempId) -> FromTemp {
    FromTemp(temp)
}

/// Matches messages that quote the given message.
#[derive(Debug, Clone, Copy)]
pub struct Replying(pub MessageId);

impl<E: MessageEvent> Pattern<E> for Replying {
    fn matches(&self, event: &E) -> bool {
        event
            .message()
            .quote
            .as_ref()
            .is_some_and(|quote| quote.id == self.0)
    }
}

pub fn replying(message: impl Into<MessageId>) -> Replying {
    Replying(message.into())
}

/// Matches messages whose plain text equals the given string.
#[derive(Debug, Clone)]
pub struct TextEq(pub String);

impl<E: MessageEvent> Pattern<E> for TextEq {
    fn matches(&self, event: &E) -> bool {
        event.message().plain_text() == self.0
    }
}

pub fn text_eq(text: impl Into<String>) -> TextEq {
    TextEq(text.into())
}

// ============================================================================
// Matching API
// ============================================================================

impl WaiterQueue {
    /// Waits for the next `E` accepted by `pattern`.
    pub async fn await_match<E, P>(&self, pattern: P) -> WaitResult<E>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        self.enqueue(pattern).await.await
    }

    /// Like [`await_match`](Self::await_match), but gives up at `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline wins. An event that was claimed
    /// while the deadline fired is still returned.
    pub async fn await_match_until<E, P>(&self, pattern: P, deadline: Instant) -> WaitResult<Option<E>>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        let mut waiter = self.enqueue(pattern).await;
        let timer = self.scheduler().sleep_until(deadline);

        tokio::select! {
            biased;
            result = &mut waiter => result.map(Some),
            () = timer => {
                debug!(waiter_id = %waiter.id(), event_type = %E::TYPE, "Waiter deadline elapsed");
                waiter.cancel().await
            }
        }
    }

    /// Like [`await_match`](Self::await_match), but gives up after `timeout`.
    pub async fn await_match_within<E, P>(&self, pattern: P, timeout: Duration) -> WaitResult<Option<E>>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        let deadline = self.scheduler().now() + timeout;
        self.await_match_until(pattern, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::event::fixtures::group_message;
    use crate::foundation::event::{Event, GroupMessageEvent};
    use crate::framework::error::WaitError;
    use crate::framework::scheduler::TokioScheduler;
    use crate::framework::waiter::Claim;
    use serde_json::json;

    fn queue() -> WaiterQueue {
        WaiterQueue::new(TokioScheduler::current().shared())
    }

    fn group_event(sender: i64, group: i64, id: i64, text: &str) -> Event {
        Event::decode(&group_message(sender, group, id, text)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn match_before_deadline_returns_early() {
        let queue = queue();
        let start = Instant::now();

        let injector = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = injector.try_claim(group_event(1, 2, 3, "ping")).await;
        });

        let event: Option<GroupMessageEvent> = queue
            .await_match_within(text_eq("ping"), Duration::from_millis(500))
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(event.unwrap().message.plain_text(), "ping");
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_without_match_returns_none_and_cleans_up() {
        let queue = queue();
        let start = Instant::now();

        let injector = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = injector.try_claim(group_event(1, 2, 3, "pong")).await;
        });

        let event: Option<GroupMessageEvent> = queue
            .await_match_within(text_eq("ping"), Duration::from_millis(500))
            .await
            .unwrap();

        assert!(event.is_none());
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_deadline_race_has_exactly_one_outcome() {
        let queue = queue();

        for id in 0..200 {
            let claimer = queue.clone();
            let claim = tokio::spawn(async move {
                claimer.try_claim(group_event(1, 2, id, "race")).await.is_claimed()
            });

            let outcome: Option<GroupMessageEvent> = queue
                .await_match_until(any(), Instant::now())
                .await
                .unwrap();
            let claimed = claim.await.unwrap();

            assert_eq!(outcome.is_some(), claimed, "iteration {id}");
            assert!(queue.is_empty().await);
        }
    }

    #[tokio::test]
    async fn panicking_pattern_surfaces_to_caller() {
        let queue = queue();
        let waiting = queue.clone();
        let handle = tokio::spawn(async move {
            waiting
                .await_match(|event: &GroupMessageEvent| -> bool {
                    assert_eq!(event.message.plain_text(), "expected");
                    true
                })
                .await
        });

        while queue.is_empty().await {
            tokio::task::yield_now().await;
        }
        let claim = queue.try_claim(group_event(1, 2, 3, "other")).await;
        assert!(matches!(claim, Claim::Unclaimed(_)));

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(WaitError::PredicatePanicked(_))));
    }

    #[test]
    fn builtin_patterns() {
        let event = group_event(10, 20, 30, "yes");
        let message = event.get_if::<GroupMessageEvent>().unwrap();

        assert!(from_user(10).matches(message));
        assert!(!from_user(11).matches(message));
        assert!(from_group(20).matches(message));
        assert!(from_temp(TempId::new(10, 20)).matches(message));
        assert!((from_group(20), text_eq("yes")).matches(message));
        assert!(!(from_group(20), text_eq("no")).matches(message));
        assert!(!replying(5).matches(message));
    }

    #[test]
    fn replying_checks_the_quote() {
        let raw = json!({
            "type": "FriendMessage",
            "messageChain": [
                { "type": "Source", "id": 2, "time": 0 },
                { "type": "Quote", "id": 1, "groupId": 0, "senderId": 5, "targetId": 5, "origin": [] },
                { "type": "Plain", "text": "ok" }
            ],
            "sender": { "id": 5, "nickname": "n", "remark": "" }
        });
        let event = Event::from_json(raw).unwrap();
        let message = event
            .get_if::<crate::foundation::event::FriendMessageEvent>()
            .unwrap();

        assert!(replying(1).matches(message));
        assert!((replying(1), text_eq("ok"), from_user(5)).matches(message));
    }
}
