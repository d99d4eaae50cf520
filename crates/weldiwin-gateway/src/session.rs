//! Command handling for one realtime connection.
//!
//! A session starts authenticated or not, depending on the handshake token.
//! Every command gets exactly one `Ack`; failures are reported there and
//! never end the connection.

use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use weldiwin_types::api::parse_id;
use weldiwin_types::events::{GatewayCommand, GatewayEvent, PresenceState};
use weldiwin_types::models::{Actor, MessagePayload, Sender, SenderKind, SignalType};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::Gateway;

/// How much of an unparsable frame ends up in the log.
const RAW_FRAME_LOG_CHARS: usize = 200;

/// Longest prefix of `text` holding at most `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}

pub struct Session {
    gateway: Gateway,
    conn_id: Uuid,
    actor: Option<Actor>,
}

impl Session {
    pub fn new(gateway: Gateway, conn_id: Uuid, actor: Option<Actor>) -> Self {
        Self {
            gateway,
            conn_id,
            actor,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// Parses and runs one raw frame, returning its acknowledgement.
    pub async fn handle_text(&self, text: &str) -> GatewayEvent {
        match serde_json::from_str::<GatewayCommand>(text) {
            Ok(cmd) => self.handle(cmd).await,
            Err(e) => {
                warn!(
                    "Connection {} sent a bad command: {} -- raw: {}",
                    self.conn_id,
                    e,
                    clip(text, RAW_FRAME_LOG_CHARS)
                );
                ack("unknown", Err(ServiceError::invalid(format!("bad command: {e}"))))
            }
        }
    }

    pub async fn handle(&self, cmd: GatewayCommand) -> GatewayEvent {
        let name = cmd.name();
        let result = match cmd {
            GatewayCommand::JoinRoom { room_id } => self.join_room(&room_id).await,
            GatewayCommand::LeaveRoom { room_id } => self.leave_room(&room_id).await,
            GatewayCommand::SendText {
                room_id,
                text,
                sender_model,
                sender_id,
            } => self.send_text(&room_id, text, sender_model, &sender_id).await,
            GatewayCommand::Signal {
                room_id,
                sender_model,
                sender_id,
                kind,
                payload,
            } => {
                self.signal(&room_id, sender_model, &sender_id, kind, payload)
                    .await
            }
        };
        if let Err(e) = &result {
            debug!("Connection {} {} failed: {}", self.conn_id, name, e);
        }
        ack(name, result)
    }

    fn authenticated(&self) -> ServiceResult<&Actor> {
        self.actor
            .as_ref()
            .ok_or_else(|| ServiceError::unauthorized("Unauthorized"))
    }

    async fn join_room(&self, raw_room_id: &str) -> ServiceResult<Value> {
        let actor = self.authenticated()?;
        let room_id = parse_id(raw_room_id, "roomId")?;
        if self.gateway.enforce_membership {
            self.gateway.services.rooms.get(actor, room_id).await?;
        }

        self.gateway.dispatcher.join(room_id, self.conn_id).await;
        info!("{} joined room {} (conn {})", actor.id, room_id, self.conn_id);

        let presence = GatewayEvent::Presence {
            user_id: actor.id,
            state: PresenceState::Joined,
            room_id,
        };
        self.gateway
            .dispatcher
            .broadcast_to_room(room_id, presence, None)
            .await;
        Ok(json!({ "roomId": room_id }))
    }

    async fn leave_room(&self, raw_room_id: &str) -> ServiceResult<Value> {
        let room_id = parse_id(raw_room_id, "roomId")?;
        let was_member = self.gateway.dispatcher.leave(room_id, self.conn_id).await;

        if let (true, Some(actor)) = (was_member, self.actor.as_ref()) {
            let presence = GatewayEvent::Presence {
                user_id: actor.id,
                state: PresenceState::Left,
                room_id,
            };
            self.gateway
                .dispatcher
                .broadcast_to_room(room_id, presence, None)
                .await;
        }
        Ok(json!({ "roomId": room_id }))
    }

    /// Text reaches every subscriber, the sender's own connection included.
    async fn send_text(
        &self,
        raw_room_id: &str,
        text: String,
        sender_model: SenderKind,
        raw_sender_id: &str,
    ) -> ServiceResult<Value> {
        let actor = self.authenticated()?;
        let room_id = parse_id(raw_room_id, "roomId")?;
        let sender = Sender {
            kind: sender_model,
            id: parse_id(raw_sender_id, "senderId")?,
        };

        let message = self
            .gateway
            .services
            .messages
            .append(actor, room_id, sender, MessagePayload::Text(text))
            .await?;
        self.gateway
            .dispatcher
            .broadcast_to_room(room_id, GatewayEvent::NewMessage(message.clone()), None)
            .await;
        to_data(&message)
    }

    /// Signals reach every subscriber except the sending connection.
    async fn signal(
        &self,
        raw_room_id: &str,
        sender_model: SenderKind,
        raw_sender_id: &str,
        kind: SignalType,
        payload: Value,
    ) -> ServiceResult<Value> {
        let actor = self.authenticated()?;
        let room_id = parse_id(raw_room_id, "roomId")?;
        let sender = Sender {
            kind: sender_model,
            id: parse_id(raw_sender_id, "senderId")?,
        };

        let message = self
            .gateway
            .services
            .messages
            .append(actor, room_id, sender, MessagePayload::Signal { kind, payload })
            .await?;
        self.gateway
            .dispatcher
            .broadcast_to_room(
                room_id,
                GatewayEvent::Signal(message.clone()),
                Some(self.conn_id),
            )
            .await;
        to_data(&message)
    }

    /// Removes the connection from every room group and tells each group.
    pub async fn close(&self) {
        let rooms = self.gateway.dispatcher.unregister(self.conn_id).await;
        let Some(actor) = self.actor.as_ref() else {
            return;
        };
        for room_id in rooms {
            let presence = GatewayEvent::Presence {
                user_id: actor.id,
                state: PresenceState::Left,
                room_id,
            };
            self.gateway
                .dispatcher
                .broadcast_to_room(room_id, presence, None)
                .await;
        }
    }
}

fn to_data<T: serde::Serialize>(value: &T) -> ServiceResult<Value> {
    serde_json::to_value(value).map_err(|e| ServiceError::Internal(e.to_string()))
}

fn ack(command: &str, result: ServiceResult<Value>) -> GatewayEvent {
    match result {
        Ok(data) => GatewayEvent::Ack {
            command: command.to_string(),
            ok: true,
            data: Some(data),
            error: None,
        },
        Err(e) => GatewayEvent::Ack {
            command: command.to_string(),
            ok: false,
            data: None,
            error: Some(e.body()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::Map;
    use tokio::sync::mpsc::UnboundedReceiver;
    use weldiwin_core::Services;
    use weldiwin_db::Database;
    use weldiwin_db::models::{NewChild, NewUser};
    use weldiwin_types::models::{Role, UserStatus};

    struct World {
        gateway: Gateway,
        parent: Uuid,
        stranger: Uuid,
        aunt: Uuid,
        child: Uuid,
        room: Uuid,
    }

    async fn world(enforce_membership: bool) -> World {
        let db = Database::open_in_memory().unwrap();
        let services = Services::new(Arc::new(db), Duration::from_secs(5));
        let mut ids = Vec::new();
        for email in ["mom@example.com", "nosy@example.com", "aunt@example.com"] {
            let user = services
                .accounts
                .create_account(NewUser {
                    id: Uuid::new_v4(),
                    name: email.into(),
                    email: email.into(),
                    phone: None,
                    password_hash: "hash".into(),
                    role: Role::Parent,
                    status: UserStatus::Active,
                    avatar_url: None,
                    is_verified: true,
                    google_id: None,
                })
                .await
                .unwrap();
            ids.push(user.id);
        }
        let child = Uuid::new_v4();
        let parent = ids[0];
        services
            .store
            .write("seed", move |db| {
                db.insert_child(
                    &NewChild {
                        id: child,
                        name: "Kid".into(),
                        main_parent: parent,
                        avatar_url: None,
                        device_info: None,
                        qr_code: child.simple().to_string(),
                        attributes: Map::new(),
                    },
                    Utc::now(),
                )
            })
            .await
            .unwrap();
        let room = services.rooms.get_or_create(parent, child).await.unwrap().id;

        World {
            gateway: Gateway::new(services, enforce_membership),
            parent,
            stranger: ids[1],
            aunt: ids[2],
            child,
            room,
        }
    }

    async fn connect(gateway: &Gateway, actor: Option<Actor>) -> (Session, UnboundedReceiver<GatewayEvent>) {
        let (conn_id, rx) = gateway
            .dispatcher
            .register(actor.as_ref().map(|a| a.id))
            .await;
        (Session::new(gateway.clone(), conn_id, actor), rx)
    }

    fn assert_ack(event: &GatewayEvent, expect_ok: bool) -> Option<String> {
        match event {
            GatewayEvent::Ack { ok, error, .. } => {
                assert_eq!(*ok, expect_ok, "unexpected ack {:?}", event);
                error.as_ref().map(|e| e.error.clone())
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    fn join(room: Uuid) -> GatewayCommand {
        GatewayCommand::JoinRoom { room_id: room.to_string() }
    }

    #[tokio::test]
    async fn unauthenticated_connection_stays_restricted() {
        let w = world(true).await;
        let (session, _rx) = connect(&w.gateway, None).await;
        let ack = session.handle(join(w.room)).await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("Unauthorized"));

        // The session still answers further commands.
        let ack = session.handle_text("not json").await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("InvalidInput"));
    }

    #[tokio::test]
    async fn membership_check_is_configurable() {
        let enforced = world(true).await;
        let nosy = Actor::user(enforced.stranger, Role::Parent);
        let (session, _rx) = connect(&enforced.gateway, Some(nosy)).await;
        let ack = session.handle(join(enforced.room)).await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("Forbidden"));

        let open = world(false).await;
        let nosy = Actor::user(open.stranger, Role::Parent);
        let (session, _rx) = connect(&open.gateway, Some(nosy)).await;
        assert_ack(&session.handle(join(open.room)).await, true);
    }

    #[tokio::test]
    async fn text_includes_sender_but_signal_does_not() {
        let w = world(true).await;
        let (parent, mut parent_rx) =
            connect(&w.gateway, Some(Actor::user(w.parent, Role::Parent))).await;
        let (kid, mut kid_rx) = connect(&w.gateway, Some(Actor::child(w.child, w.parent))).await;

        assert_ack(&parent.handle(join(w.room)).await, true);
        assert_ack(&kid.handle(join(w.room)).await, true);
        while parent_rx.try_recv().is_ok() {}
        while kid_rx.try_recv().is_ok() {}

        let ack = kid
            .handle(GatewayCommand::SendText {
                room_id: w.room.to_string(),
                text: "hi mom".into(),
                sender_model: SenderKind::ChildSide,
                sender_id: w.child.to_string(),
            })
            .await;
        assert_ack(&ack, true);
        assert!(matches!(kid_rx.try_recv(), Ok(GatewayEvent::NewMessage(_))));
        assert!(matches!(parent_rx.try_recv(), Ok(GatewayEvent::NewMessage(_))));

        let ack = kid
            .handle(GatewayCommand::Signal {
                room_id: w.room.to_string(),
                sender_model: SenderKind::ChildSide,
                sender_id: w.child.to_string(),
                kind: SignalType::CallOffer,
                payload: json!({ "sdp": "v=0" }),
            })
            .await;
        assert_ack(&ack, true);
        assert!(kid_rx.try_recv().is_err());
        assert!(matches!(parent_rx.try_recv(), Ok(GatewayEvent::Signal(_))));
    }

    #[tokio::test]
    async fn illegitimate_sender_is_acked_not_dropped() {
        let w = world(true).await;
        let (parent, _rx) = connect(&w.gateway, Some(Actor::user(w.parent, Role::Parent))).await;
        let ack = parent
            .handle(GatewayCommand::SendText {
                room_id: w.room.to_string(),
                text: "spoofed".into(),
                sender_model: SenderKind::ParentSide,
                sender_id: w.stranger.to_string(),
            })
            .await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("Forbidden"));

        let ack = parent
            .handle(GatewayCommand::SendText {
                room_id: "not-an-id".into(),
                text: "x".into(),
                sender_model: SenderKind::ParentSide,
                sender_id: w.parent.to_string(),
            })
            .await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("InvalidInput"));
    }

    #[tokio::test]
    async fn closing_leaves_all_rooms_with_presence() {
        let w = world(true).await;
        let (parent, _parent_rx) =
            connect(&w.gateway, Some(Actor::user(w.parent, Role::Parent))).await;
        let (kid, mut kid_rx) = connect(&w.gateway, Some(Actor::child(w.child, w.parent))).await;
        parent.handle(join(w.room)).await;
        kid.handle(join(w.room)).await;
        while kid_rx.try_recv().is_ok() {}

        parent.close().await;
        assert_eq!(w.gateway.dispatcher.room_size(w.room).await, 1);
        match kid_rx.try_recv() {
            Ok(GatewayEvent::Presence { user_id, state, .. }) => {
                assert_eq!(user_id, w.parent);
                assert_eq!(state, PresenceState::Left);
            }
            other => panic!("expected presence, got {:?}", other),
        }
    }

    fn text(w: &World, body: &str) -> GatewayCommand {
        GatewayCommand::SendText {
            room_id: w.room.to_string(),
            text: body.into(),
            sender_model: SenderKind::ParentSide,
            sender_id: w.parent.to_string(),
        }
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let raw = format!("{}é tail", "x".repeat(199));
        assert_eq!(clip(&raw, 200), format!("{}é", "x".repeat(199)));
        assert_eq!(clip("short", 200), "short");
        assert_eq!(clip("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn bad_frames_with_multibyte_text_are_acked_while_logging() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let w = world(true).await;
        let (session, _rx) = connect(&w.gateway, Some(Actor::user(w.parent, Role::Parent))).await;
        let frame = format!("{}é tail", "x".repeat(199));
        let ack = session.handle_text(&frame).await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("InvalidInput"));

        // Still usable afterwards.
        assert_ack(&session.handle(join(w.room)).await, true);
    }

    #[tokio::test]
    async fn removed_invitee_stops_receiving_room_traffic() {
        let w = world(true).await;
        let owner = Actor::user(w.parent, Role::Parent);
        let aunt = Actor::user(w.aunt, Role::Parent);
        w.gateway
            .services
            .rooms
            .invite_parent(&owner, w.room, w.aunt)
            .await
            .unwrap();

        let (parent, mut parent_rx) = connect(&w.gateway, Some(owner.clone())).await;
        let (invitee, mut aunt_rx) = connect(&w.gateway, Some(aunt)).await;
        assert_ack(&parent.handle(join(w.room)).await, true);
        assert_ack(&invitee.handle(join(w.room)).await, true);
        while parent_rx.try_recv().is_ok() {}
        while aunt_rx.try_recv().is_ok() {}

        w.gateway
            .remove_invited_parent(&owner, w.room, w.aunt)
            .await
            .unwrap();
        assert_eq!(w.gateway.dispatcher.room_size(w.room).await, 1);
        for rx in [&mut aunt_rx, &mut parent_rx] {
            match rx.try_recv() {
                Ok(GatewayEvent::Presence { user_id, state, .. }) => {
                    assert_eq!(user_id, w.aunt);
                    assert_eq!(state, PresenceState::Left);
                }
                other => panic!("expected presence, got {:?}", other),
            }
        }

        assert_ack(&parent.handle(text(&w, "secret")).await, true);
        assert!(matches!(parent_rx.try_recv(), Ok(GatewayEvent::NewMessage(_))));
        assert!(aunt_rx.try_recv().is_err());

        // Re-joining now fails the membership check.
        let ack = invitee.handle(join(w.room)).await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("Forbidden"));
    }

    #[tokio::test]
    async fn deleting_the_child_closes_its_room_group() {
        let w = world(true).await;
        let owner = Actor::user(w.parent, Role::Parent);
        let (parent, mut parent_rx) = connect(&w.gateway, Some(owner.clone())).await;
        let (kid, mut kid_rx) = connect(&w.gateway, Some(Actor::child(w.child, w.parent))).await;
        assert_ack(&parent.handle(join(w.room)).await, true);
        assert_ack(&kid.handle(join(w.room)).await, true);
        while parent_rx.try_recv().is_ok() {}
        while kid_rx.try_recv().is_ok() {}

        w.gateway.delete_child(&owner, w.child).await.unwrap();
        assert_eq!(w.gateway.dispatcher.room_size(w.room).await, 0);
        assert!(matches!(
            kid_rx.try_recv(),
            Ok(GatewayEvent::Presence { state: PresenceState::Left, .. })
        ));

        let ack = parent.handle(text(&w, "anyone?")).await;
        assert_eq!(assert_ack(&ack, false).as_deref(), Some("NotFound"));
        while parent_rx.try_recv().is_ok() {}
        assert!(kid_rx.try_recv().is_err());
    }
}
