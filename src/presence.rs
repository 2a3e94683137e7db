//! Active-user roster and cursor presence.
//!
//! The roster tracks who is currently on the canvas. A user may hold several
//! connection ids at once (multiple tabs), so the roster deduplicates by the
//! stable `email` identity field, keeping the most recent record per email.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shape::UserId;

/// Cursor position of a remote user in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// X in canvas coordinates.
    pub x: f64,
    /// Y in canvas coordinates.
    pub y: f64,
}

/// One user on the canvas as carried by `USER_JOIN` / `ACTIVE_USERS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    /// Connection-scoped user id; also the `userId` on this user's messages.
    pub user_id: UserId,
    /// Stable identity used for deduplication across connections.
    pub email: String,
    /// Display name shown in lock notices and cursor labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Cursor color assigned by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Last known cursor position, if the user has moved their cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
}

impl ActiveUser {
    /// The name to show for this user, falling back to the email local part.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}

/// The set of users currently on the canvas, deduplicated by email.
pub struct Roster {
    users: HashMap<String, ActiveUser>,
}

impl Roster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self { users: HashMap::new() }
    }

    /// Insert or refresh a user. A record with the same email replaces the
    /// previous one, so the newest connection id wins.
    pub fn join(&mut self, user: ActiveUser) {
        self.users.insert(user.email.clone(), user);
    }

    /// Remove the user holding `user_id`, if present.
    pub fn leave(&mut self, user_id: UserId) {
        self.users.retain(|_, u| u.user_id != user_id);
    }

    /// Replace the whole roster from an `ACTIVE_USERS` message. Later
    /// entries for the same email win.
    pub fn replace(&mut self, users: Vec<ActiveUser>) {
        self.users.clear();
        for user in users {
            self.users.insert(user.email.clone(), user);
        }
    }

    /// Update a user's cursor position by connection id.
    pub fn set_cursor(&mut self, user_id: UserId, cursor: CursorPosition) {
        if let Some(user) = self.users.values_mut().find(|u| u.user_id == user_id) {
            user.cursor = Some(cursor);
        }
    }

    /// Look up a user by connection id.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<&ActiveUser> {
        self.users.values().find(|u| u.user_id == user_id)
    }

    /// Display name for a user id, falling back to `"another user"` when the
    /// id is not in the roster. Used for lock-contention notices.
    #[must_use]
    pub fn display_name(&self, user_id: Option<UserId>) -> String {
        user_id
            .and_then(|id| self.get(id))
            .map_or_else(|| "another user".to_owned(), |u| u.display_name().to_owned())
    }

    /// All users, in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &ActiveUser> {
        self.users.values()
    }

    /// Number of distinct users on the canvas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if no users are on the canvas.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
