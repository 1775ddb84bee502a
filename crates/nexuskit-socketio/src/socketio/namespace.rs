//! A handle onto one joined namespace.
//!
//! The namespace does not own the client; it holds the shared session
//! handle and addresses its own channel by name, so its lifetime is
//! bounded by the client clearing session state on disconnect.

use std::sync::Arc;

use crate::error::SocketIoError;
use crate::payload::Payload;
use crate::socketio::client::{emit_packet, emit_with_ack, on_event, ClientShared};

pub struct Namespace {
    name: String,
    shared: Arc<ClientShared>,
}

impl Namespace {
    pub(crate) fn new(name: String, shared: Arc<ClientShared>) -> Self {
        Self { name, shared }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a handler for `event` on this namespace.
    pub fn on(&self, event: &str, handler: impl Fn(&[Payload]) + Send + Sync + 'static) {
        on_event(&self.shared, &self.name, event, handler);
    }

    pub async fn emit(&self, event: &str, args: Vec<Payload>) -> Result<(), SocketIoError> {
        emit_packet(&self.shared, &self.name, event, args, None).await
    }

    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Payload>,
    ) -> Result<Vec<Payload>, SocketIoError> {
        emit_with_ack(&self.shared, &self.name, event, args).await
    }

    /// Ask the server to put this client into `room` and track it locally.
    /// The membership set clears on disconnect.
    pub async fn join(&self, room: &str) -> Result<(), SocketIoError> {
        emit_packet(
            &self.shared,
            &self.name,
            "join",
            vec![Payload::Text(room.to_string())],
            None,
        )
        .await?;
        if let Some(state) = self.shared.namespaces.lock().get_mut(&self.name) {
            state.rooms.insert(room.to_string());
        }
        Ok(())
    }

    pub async fn leave(&self, room: &str) -> Result<(), SocketIoError> {
        emit_packet(
            &self.shared,
            &self.name,
            "leave",
            vec![Payload::Text(room.to_string())],
            None,
        )
        .await?;
        if let Some(state) = self.shared.namespaces.lock().get_mut(&self.name) {
            state.rooms.remove(room);
        }
        Ok(())
    }

    pub async fn leave_all(&self) -> Result<(), SocketIoError> {
        for room in self.rooms() {
            self.leave(&room).await?;
        }
        Ok(())
    }

    /// Fan an event out to every member of `room` (server-side fan-out; the
    /// wire carries an explicit `"to"` event).
    pub async fn emit_to(
        &self,
        room: &str,
        event: &str,
        mut args: Vec<Payload>,
    ) -> Result<(), SocketIoError> {
        let mut full_args = vec![
            Payload::Text(room.to_string()),
            Payload::Text(event.to_string()),
        ];
        full_args.append(&mut args);
        emit_packet(&self.shared, &self.name, "to", full_args, None).await
    }

    /// The rooms this client currently believes it has joined.
    pub fn rooms(&self) -> Vec<String> {
        self.shared
            .namespaces
            .lock()
            .get(&self.name)
            .map(|state| state.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}
