//! Realtime service: the composition root wiring channel, dispatcher,
//! notification store, typing tracker, and push bridge together.
//!
//! One instance per running app process, constructed explicitly during
//! application startup and passed down to consumers; there is no global
//! singleton. Inbound frames flow channel → dispatcher → built-in
//! handlers, which update the stores and re-emit store-change events for
//! UI consumers (notification bell, notification center, chat panel).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelConfig, ConnectionStatus};
use crate::common::time::{Clock, SystemClock};
use crate::config::RealtimeConfig;
use crate::dispatcher::{EventDispatcher, SubscriptionHandle};
use crate::notifications::{InAppNotification, NotificationKind, NotificationStore};
use crate::protocol::{
    self, ChatMessagePayload, EventKind, GameCancelledPayload, NotificationCreatedPayload,
    PlayerPresencePayload, TeamInvitePayload, TypingPayload,
};
use crate::push::{PushBridge, PushPayload, PushProvider, notification_from_push};
use crate::typing::{TypingIndicator, TypingTracker};

/// Store-change event: a notification was added
pub const EVENT_IN_APP_NOTIFICATION: &str = "in_app_notification";
/// Store-change event: a notification was removed (expiry or explicit)
pub const EVENT_IN_APP_NOTIFICATION_REMOVED: &str = "in_app_notification_removed";
/// Store-change event: a notification was marked read
pub const EVENT_IN_APP_NOTIFICATION_READ: &str = "in_app_notification_read";
/// Store-change event: the store was cleared
pub const EVENT_IN_APP_NOTIFICATIONS_CLEARED: &str = "in_app_notifications_cleared";

/// The realtime client session for one running app process.
pub struct RealtimeService {
    config: RealtimeConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<EventDispatcher>,
    channel: Channel,
    notifications: Arc<NotificationStore>,
    typing: Arc<TypingTracker>,
    push: PushBridge,
    auth_token: Mutex<Option<String>>,
    initialized: AtomicBool,
    builtin_handles: Mutex<Vec<SubscriptionHandle>>,
    sweep_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeService {
    /// Create a service on the system clock
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a service with an injected clock (used by tests to drive
    /// expiry deterministically)
    pub fn with_clock(config: RealtimeConfig, clock: Arc<dyn Clock>) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let channel = Channel::new(ChannelConfig::from(&config), dispatcher.clone());
        let notifications = Arc::new(NotificationStore::new(
            clock.clone(),
            config.notification_ttl,
        ));
        let typing = Arc::new(TypingTracker::new(clock.clone(), config.typing_ttl));
        let push = PushBridge::new(config.api_base_url.clone());

        Self {
            config,
            clock,
            dispatcher,
            channel,
            notifications,
            typing,
            push,
            auth_token: Mutex::new(None),
            initialized: AtomicBool::new(false),
            builtin_handles: Mutex::new(Vec::new()),
            sweep_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register the built-in event handlers and start the expiry sweeps.
    ///
    /// Idempotent; a second call changes nothing.
    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.config.enable_in_app_notifications {
            self.register_builtin_handlers();
        }
        self.spawn_sweeps();
        tracing::info!("Realtime service initialized");
    }

    /// Event dispatcher, for consumers subscribing to domain events
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Establish the channel connection
    pub async fn connect(&self) -> Result<(), crate::error::RealtimeError> {
        self.channel.connect().await
    }

    /// Close the channel connection and cancel reconnects
    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    /// Current channel status (the persistent "disconnected" surface)
    pub fn status(&self) -> ConnectionStatus {
        self.channel.status()
    }

    /// Store the bearer credential used for the auth frame and for
    /// device-token registration
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.lock().expect("auth lock poisoned") = token.clone();
        self.channel.set_auth_token(token);
    }

    /// Initialize the push bridge with a platform provider.
    ///
    /// Returns whether the bridge became active. Denial and registration
    /// failures are non-fatal; channel delivery keeps working.
    pub async fn initialize_push(&self, provider: &dyn PushProvider) -> bool {
        if !self.config.enable_push_notifications {
            tracing::debug!("Push notifications disabled by configuration");
            return false;
        }
        let bearer = self.auth_token.lock().expect("auth lock poisoned").clone();
        match self.push.initialize(provider, bearer.as_deref()).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!("Push bridge initialization failed: {}", e);
                false
            }
        }
    }

    /// Route a foreground push payload into the in-app notification store
    pub fn handle_foreground_push(&self, payload: &PushPayload) {
        if !self.config.enable_in_app_notifications {
            return;
        }
        let notification = notification_from_push(payload, self.clock.now_millis());
        self.add_notification(notification);
    }

    /// Send a chat message to a game room (dropped when disconnected)
    pub fn send_chat_message(&self, game_id: &str, sender_name: &str, content: &str) {
        self.channel.send(
            &protocol::chat_destination(game_id),
            serde_json::json!({
                "senderName": sender_name,
                "content": content,
                "sentAt": self.clock.now_millis(),
            }),
        );
    }

    /// Announce that a user is typing in a game room
    pub fn send_typing(&self, game_id: &str, user_id: &str, user_name: &str) {
        self.channel.send(
            &protocol::typing_destination(game_id),
            serde_json::json!({
                "userId": user_id,
                "userName": user_name,
            }),
        );
    }

    /// Snapshot of the in-app notifications, most-recent-first
    pub fn notifications(&self) -> Vec<InAppNotification> {
        self.notifications.snapshot()
    }

    /// Count of unread in-app notifications
    pub fn unread_count(&self) -> usize {
        self.notifications.unread_count()
    }

    /// Mark one notification as read
    pub fn mark_notification_read(&self, id: &str) {
        if self.notifications.mark_read(id) {
            self.emit_store_event(EVENT_IN_APP_NOTIFICATION_READ, serde_json::json!({ "id": id }));
        }
    }

    /// Mark every notification as read
    pub fn mark_all_notifications_read(&self) {
        self.notifications.mark_all_read();
    }

    /// Remove one notification
    pub fn remove_notification(&self, id: &str) {
        if self.notifications.remove(id) {
            self.emit_store_event(
                EVENT_IN_APP_NOTIFICATION_REMOVED,
                serde_json::json!({ "id": id }),
            );
        }
    }

    /// Empty the notification store
    pub fn clear_notifications(&self) {
        self.notifications.clear_all();
        self.emit_store_event(EVENT_IN_APP_NOTIFICATIONS_CLEARED, Value::Null);
    }

    /// Users currently typing in a game room
    pub fn typing_users(&self, game_id: &str) -> Vec<TypingIndicator> {
        self.typing.active(game_id)
    }

    /// Stop the sweeps, drop the built-in subscriptions, and disconnect
    pub async fn shutdown(&self) {
        for task in self.sweep_tasks.lock().expect("sweep lock poisoned").drain(..) {
            task.abort();
        }
        for handle in self
            .builtin_handles
            .lock()
            .expect("handles lock poisoned")
            .drain(..)
        {
            self.dispatcher.unsubscribe(&handle);
        }
        self.channel.disconnect().await;
        tracing::info!("Realtime service shut down");
    }

    fn register_builtin_handlers(&self) {
        let mut handles = self.builtin_handles.lock().expect("handles lock poisoned");

        handles.push(self.on_event(EventKind::NotificationCreated, {
            let service = self.handler_context();
            move |payload| match serde_json::from_value::<NotificationCreatedPayload>(payload.clone())
            {
                Ok(event) => service.handle_notification_created(event),
                Err(e) => tracing::warn!("Bad notification_created payload: {}", e),
            }
        }));

        handles.push(self.on_event(EventKind::PlayerJoined, {
            let service = self.handler_context();
            move |payload| match serde_json::from_value::<PlayerPresencePayload>(payload.clone()) {
                Ok(event) => service.handle_player_joined(event),
                Err(e) => tracing::warn!("Bad player_joined payload: {}", e),
            }
        }));

        handles.push(self.on_event(EventKind::PlayerLeft, {
            let service = self.handler_context();
            move |payload| match serde_json::from_value::<PlayerPresencePayload>(payload.clone()) {
                Ok(event) => service.handle_player_left(event),
                Err(e) => tracing::warn!("Bad player_left payload: {}", e),
            }
        }));

        handles.push(self.on_event(EventKind::GameCancelled, {
            let service = self.handler_context();
            move |payload| match serde_json::from_value::<GameCancelledPayload>(payload.clone()) {
                Ok(event) => service.handle_game_cancelled(event),
                Err(e) => tracing::warn!("Bad game_cancelled payload: {}", e),
            }
        }));

        handles.push(self.on_event(EventKind::TeamInvite, {
            let service = self.handler_context();
            move |payload| match serde_json::from_value::<TeamInvitePayload>(payload.clone()) {
                Ok(event) => service.handle_team_invite(event),
                Err(e) => tracing::warn!("Bad team_invite payload: {}", e),
            }
        }));

        handles.push(self.on_event(EventKind::Typing, {
            let service = self.handler_context();
            move |payload| match serde_json::from_value::<TypingPayload>(payload.clone()) {
                Ok(event) => service.typing.record(&event.game_id, &event.user_id, &event.user_name),
                Err(e) => tracing::warn!("Bad typing payload: {}", e),
            }
        }));

        // chat_message and game_updated reach their subscribers through the
        // dispatcher alone; logged here for visibility.
        handles.push(self.on_event(EventKind::ChatMessage, |payload| {
            if let Ok(message) = serde_json::from_value::<ChatMessagePayload>(payload.clone()) {
                tracing::debug!(
                    "Chat message in game {} from {}",
                    message.game_id,
                    message.sender_name
                );
            }
        }));
        handles.push(self.on_event(EventKind::GameUpdated, |_| {
            tracing::debug!("Game updated");
        }));
    }

    fn on_event<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            clock: self.clock.clone(),
            dispatcher: self.dispatcher.clone(),
            notifications: self.notifications.clone(),
            typing: self.typing.clone(),
        }
    }

    fn add_notification(&self, notification: InAppNotification) {
        let record = serde_json::to_value(&notification).unwrap_or(Value::Null);
        if self.notifications.add(notification) {
            self.emit_store_event(EVENT_IN_APP_NOTIFICATION, record);
        }
    }

    fn emit_store_event(&self, event: &str, payload: Value) {
        self.dispatcher
            .dispatch(&EventKind::Other(event.to_string()), &payload);
    }

    fn spawn_sweeps(&self) {
        let mut tasks = self.sweep_tasks.lock().expect("sweep lock poisoned");
        let interval = self.config.sweep_interval;

        let notifications = self.notifications.clone();
        let dispatcher = self.dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                for id in notifications.sweep_expired() {
                    dispatcher.dispatch(
                        &EventKind::Other(EVENT_IN_APP_NOTIFICATION_REMOVED.to_string()),
                        &serde_json::json!({ "id": id }),
                    );
                }
            }
        }));

        let typing = self.typing.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                typing.sweep();
            }
        }));
    }
}

/// The slice of service state the built-in handlers need; the handlers
/// run inside dispatcher callbacks, so they hold their own Arcs rather
/// than a reference to the service.
struct HandlerContext {
    clock: Arc<dyn Clock>,
    dispatcher: Arc<EventDispatcher>,
    notifications: Arc<NotificationStore>,
    typing: Arc<TypingTracker>,
}

impl HandlerContext {
    fn handle_notification_created(&self, event: NotificationCreatedPayload) {
        let notification = InAppNotification {
            id: event.id,
            title: event.title,
            message: event.message,
            kind: NotificationKind::from_priority(event.priority.as_deref()),
            action_url: event.action_url,
            timestamp: self.clock.now_millis(),
            is_read: false,
        };
        self.add_notification(notification);
    }

    fn handle_player_joined(&self, event: PlayerPresencePayload) {
        self.add_notification(InAppNotification::new(
            "Player Joined",
            format!("{} joined the game!", event.player_name),
            NotificationKind::Success,
            Some(format!("/games/{}", event.game_id)),
            self.clock.now_millis(),
        ));
    }

    fn handle_player_left(&self, event: PlayerPresencePayload) {
        self.add_notification(InAppNotification::new(
            "Player Left",
            format!("{} left the game", event.player_name),
            NotificationKind::Info,
            Some(format!("/games/{}", event.game_id)),
            self.clock.now_millis(),
        ));
    }

    fn handle_game_cancelled(&self, event: GameCancelledPayload) {
        self.add_notification(InAppNotification::new(
            "Game Cancelled",
            format!("Game \"{}\" has been cancelled", event.game_name),
            NotificationKind::Error,
            Some(format!("/games/{}", event.game_id)),
            self.clock.now_millis(),
        ));
    }

    fn handle_team_invite(&self, event: TeamInvitePayload) {
        self.add_notification(InAppNotification::new(
            "Team Invitation",
            format!("You've been invited to join \"{}\"", event.team_name),
            NotificationKind::Info,
            Some(format!("/teams/{}", event.team_id)),
            self.clock.now_millis(),
        ));
    }

    fn add_notification(&self, notification: InAppNotification) {
        let record = serde_json::to_value(&notification).unwrap_or(Value::Null);
        if self.notifications.add(notification) {
            self.dispatcher.dispatch(
                &EventKind::Other(EVENT_IN_APP_NOTIFICATION.to_string()),
                &record,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn test_service(clock: Arc<ManualClock>) -> RealtimeService {
        let config = RealtimeConfig {
            ws_url: "ws://127.0.0.1:9/ws".to_string(),
            ..RealtimeConfig::default()
        };
        let service = RealtimeService::with_clock(config, clock);
        service.initialize();
        service
    }

    #[tokio::test]
    async fn test_notification_created_event_populates_store() {
        // テスト項目: notification_created イベントが未読通知としてストアに入る
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));

        // when (操作):
        service.dispatcher().dispatch_raw(
            r#"{"type":"notification_created","payload":{"id":"n1","title":"Hi","message":"Test","priority":"high"}}"#,
        );

        // then (期待する結果):
        let notifications = service.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].id, "n1");
        assert_eq!(notifications[0].kind, NotificationKind::Warning);
        assert!(!notifications[0].is_read);
        assert_eq!(service.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_notification_id_is_ignored() {
        // テスト項目: 同じ id の notification_created が二重登録されない
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));
        let frame =
            r#"{"type":"notification_created","payload":{"id":"n1","title":"Hi","message":"Test"}}"#;
        service.dispatcher().dispatch_raw(frame);

        // when (操作):
        service.dispatcher().dispatch_raw(frame);

        // then (期待する結果):
        assert_eq!(service.notifications().len(), 1);
        assert_eq!(service.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_player_joined_becomes_success_notification() {
        // テスト項目: player_joined イベントが success 通知に変換される
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));

        // when (操作):
        service.dispatcher().dispatch_raw(
            r#"{"type":"player_joined","payload":{"gameId":"42","playerName":"Sujan"}}"#,
        );

        // then (期待する結果):
        let notifications = service.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Success);
        assert_eq!(notifications[0].message, "Sujan joined the game!");
        assert_eq!(notifications[0].action_url.as_deref(), Some("/games/42"));
    }

    #[tokio::test]
    async fn test_game_cancelled_becomes_error_notification() {
        // テスト項目: game_cancelled イベントが error 通知に変換される
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));

        // when (操作):
        service.dispatcher().dispatch_raw(
            r#"{"type":"game_cancelled","payload":{"gameId":"42","gameName":"Sunday Futsal"}}"#,
        );

        // then (期待する結果):
        let notifications = service.notifications();
        assert_eq!(notifications[0].kind, NotificationKind::Error);
        assert_eq!(
            notifications[0].message,
            "Game \"Sunday Futsal\" has been cancelled"
        );
    }

    #[tokio::test]
    async fn test_store_event_emitted_on_add() {
        // テスト項目: 通知追加時に in_app_notification イベントが再発行される
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        service.dispatcher().subscribe(
            EventKind::Other(EVENT_IN_APP_NOTIFICATION.to_string()),
            move |payload| {
                assert_eq!(payload["id"], "n1");
                seen_in_handler.fetch_add(1, Ordering::SeqCst);
            },
        );

        // when (操作):
        service.dispatcher().dispatch_raw(
            r#"{"type":"notification_created","payload":{"id":"n1","title":"Hi","message":"Test"}}"#,
        );

        // then (期待する結果):
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_typing_event_feeds_tracker() {
        // テスト項目: typing イベントがタイピングトラッカーに記録される
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(1000)));

        // when (操作):
        service.dispatcher().dispatch_raw(
            r#"{"type":"typing","payload":{"gameId":"42","userId":"u1","userName":"Asha"}}"#,
        );

        // then (期待する結果):
        let typing = service.typing_users("42");
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].user_name, "Asha");
    }

    #[tokio::test]
    async fn test_mark_read_emits_read_event() {
        // テスト項目: mark_notification_read が既読イベントを発行する
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));
        service.dispatcher().dispatch_raw(
            r#"{"type":"notification_created","payload":{"id":"n1","title":"Hi","message":"Test"}}"#,
        );
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        service.dispatcher().subscribe(
            EventKind::Other(EVENT_IN_APP_NOTIFICATION_READ.to_string()),
            move |_| {
                seen_in_handler.fetch_add(1, Ordering::SeqCst);
            },
        );

        // when (操作):
        service.mark_notification_read("n1");

        // then (期待する結果):
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(service.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_foreground_push_reaches_store() {
        // テスト項目: フォアグラウンド push が通知ストアに入る
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));
        let payload = PushPayload {
            title: "Game reminder".to_string(),
            body: "Kickoff in 30 minutes".to_string(),
            action_url: None,
            image_url: None,
            data: None,
        };

        // when (操作):
        service.handle_foreground_push(&payload);

        // then (期待する結果):
        assert_eq!(service.unread_count(), 1);
        assert_eq!(service.notifications()[0].title, "Game reminder");
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_panic_service() {
        // テスト項目: 不正なペイロードでもサービスがパニックしない
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));

        // when (操作):
        service
            .dispatcher()
            .dispatch_raw(r#"{"type":"player_joined","payload":{"wrong":"shape"}}"#);

        // then (期待する結果):
        assert!(service.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_send_chat_while_disconnected_is_dropped() {
        // テスト項目: 未接続時のチャット送信が警告付きで破棄される
        // given (前提条件):
        let service = test_service(Arc::new(ManualClock::new(0)));

        // when (操作):
        service.send_chat_message("42", "Asha", "hello");

        // then (期待する結果):
        assert_eq!(service.status().dropped_sends, 1);
    }
}
