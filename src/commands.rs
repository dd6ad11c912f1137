//! Command surface
//! join / leave requests from the chat layer; both consult the connection
//! manager's state and never touch the transport handle themselves

use std::sync::Arc;

use crate::connection::{ConnectionManager, ConnectionState};

/// Join the configured voice channel. Returns the user-facing reply.
pub async fn join(manager: &Arc<ConnectionManager>) -> String {
    match manager.state() {
        ConnectionState::Disconnected => {
            manager.connect().await;
            match manager.state() {
                ConnectionState::Connected => "Joined the voice channel.".to_string(),
                _ => "Could not join the voice channel.".to_string(),
            }
        }
        _ => "Already connected to a voice channel.".to_string(),
    }
}

/// Leave the voice channel, releasing audio resources first
pub async fn leave(manager: &Arc<ConnectionManager>) -> String {
    match manager.state() {
        ConnectionState::Disconnected => "Not connected to a voice channel.".to_string(),
        _ => {
            manager.disconnect().await;
            "Left the voice channel.".to_string()
        }
    }
}
