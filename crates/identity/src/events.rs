//! Events emitted by the identity rules.

use serde_json::json;
use uuid::Uuid;

use cmdproc_core::UserId;
use cmdproc_events::Event;

pub const USER_REGISTERED: &str = "user_registered";
pub const ROLE_ASSIGNED: &str = "role_assigned";
pub const EMAIL_CONFIRMATION_REQUESTED: &str = "email_confirmation_requested";
pub const EMAIL_CHANGED: &str = "email_changed";
pub const USERNAME_CHANGED: &str = "username_changed";

pub fn user_registered(
    user_id: &UserId,
    email: &str,
    username: &str,
    salted_hash: Option<&str>,
) -> Event {
    Event::new(
        USER_REGISTERED,
        json!({
            "user_id": user_id,
            "email": email,
            "username": username,
            "salted_hash": salted_hash,
        }),
    )
}

pub fn role_assigned(user_id: &UserId, role: &str) -> Event {
    Event::new(ROLE_ASSIGNED, json!({ "user_id": user_id, "role": role }))
}

/// The confirmation code is random; it never influences rule branching.
pub fn email_confirmation_requested(user_id: &UserId, email: &str) -> Event {
    Event::new(
        EMAIL_CONFIRMATION_REQUESTED,
        json!({
            "user_id": user_id,
            "email": email,
            "code": Uuid::new_v4().simple().to_string(),
        }),
    )
}

pub fn email_changed(user_id: &UserId, old_email: &str, new_email: &str) -> Event {
    Event::new(
        EMAIL_CHANGED,
        json!({ "user_id": user_id, "old_email": old_email, "new_email": new_email }),
    )
}

pub fn username_changed(user_id: &UserId, old_username: &str, new_username: &str) -> Event {
    Event::new(
        USERNAME_CHANGED,
        json!({
            "user_id": user_id,
            "old_username": old_username,
            "new_username": new_username,
        }),
    )
}
