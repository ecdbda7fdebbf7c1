//! Identity rule handlers.

use cmdproc_events::AuthContext;
use cmdproc_rules::{Outcome, RuleRegistry};

use crate::commands::{AssignRole, ChangeEmail, ChangeUsername, Register};
use crate::events;
use crate::objects::{ADMIN_ROLE, EMAIL, ROLE_USERS, RoleUsersObject, USER, USERNAME, UserObject};

pub const USER_ID_TAKEN: &str = "user_id already taken";
pub const EMAIL_TAKEN: &str = "email already taken";
pub const USERNAME_TAKEN: &str = "username already taken";
pub const EMAIL_UNCHANGED: &str = "email unchanged";
pub const USERNAME_UNCHANGED: &str = "username unchanged";
pub const NOT_AUTHENTICATED: &str = "not authenticated";
pub const NOT_AUTHORIZED: &str = "not authorized";
pub const ROLE_ALREADY_ASSIGNED: &str = "role already assigned";

/// Registry with every identity rule.
pub fn registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    register_all(&mut registry);
    registry
}

/// Add the identity rules to an existing registry.
pub fn register_all(registry: &mut RuleRegistry) {
    registry
        .register("register", register)
        .register("change_email", change_email)
        .register("change_username", change_username)
        .register("assign_role", assign_role);
}

/// user id free → email free → username free → bootstrap admin if none exists.
pub fn register(cmd: Register, _auth: &AuthContext) -> Outcome {
    Outcome::ensure_absent(USER, cmd.user_id.to_string(), USER_ID_TAKEN, move || {
        Outcome::ensure_absent(EMAIL, cmd.email.as_str().to_owned(), EMAIL_TAKEN, move || {
            Outcome::ensure_absent(USERNAME, cmd.username.as_str().to_owned(), USERNAME_TAKEN, move || {
                let first_user = cmd.clone();
                Outcome::fetch(
                    ROLE_USERS,
                    ADMIN_ROLE,
                    move |_| registered(cmd, false),
                    move || registered(first_user, true),
                )
            })
        })
    })
}

fn registered(cmd: Register, bootstrap_admin: bool) -> Outcome {
    let mut out = vec![events::user_registered(
        &cmd.user_id,
        cmd.email.as_str(),
        cmd.username.as_str(),
        cmd.salted_hash.as_deref(),
    )];
    if bootstrap_admin {
        out.push(events::role_assigned(&cmd.user_id, ADMIN_ROLE));
    }
    out.push(events::email_confirmation_requested(&cmd.user_id, cmd.email.as_str()));
    Outcome::succeeded(out)
}

pub fn change_email(cmd: ChangeEmail, auth: &AuthContext) -> Outcome {
    let Some(user_id) = auth.acting_user().cloned() else {
        return Outcome::failed(NOT_AUTHENTICATED);
    };
    Outcome::fetch_as(USER, user_id.to_string(), move |user: UserObject| {
        if user.email == cmd.new_email.as_str() {
            return Outcome::failed(EMAIL_UNCHANGED);
        }
        Outcome::ensure_absent(EMAIL, cmd.new_email.as_str().to_owned(), EMAIL_TAKEN, move || {
            let new_email = cmd.new_email.as_str();
            Outcome::succeeded([
                events::email_changed(&user_id, &user.email, new_email),
                events::email_confirmation_requested(&user_id, new_email),
            ])
        })
    })
}

pub fn change_username(cmd: ChangeUsername, auth: &AuthContext) -> Outcome {
    let Some(user_id) = auth.acting_user().cloned() else {
        return Outcome::failed(NOT_AUTHENTICATED);
    };
    Outcome::fetch_as(USER, user_id.to_string(), move |user: UserObject| {
        if user.username == cmd.new_username.as_str() {
            return Outcome::failed(USERNAME_UNCHANGED);
        }
        Outcome::ensure_absent(USERNAME, cmd.new_username.as_str().to_owned(), USERNAME_TAKEN, move || {
            Outcome::succeeded([events::username_changed(
                &user_id,
                &user.username,
                cmd.new_username.as_str(),
            )])
        })
    })
}

/// Only members of the admin role may assign roles.
pub fn assign_role(cmd: AssignRole, auth: &AuthContext) -> Outcome {
    let Some(actor) = auth.acting_user().cloned() else {
        return Outcome::failed(NOT_AUTHENTICATED);
    };
    Outcome::fetch_as_or(
        ROLE_USERS,
        ADMIN_ROLE,
        move |admins: RoleUsersObject| {
            if !admins.contains(&actor) {
                return Outcome::failed(NOT_AUTHORIZED);
            }
            Outcome::fetch_found(USER, cmd.user_id.to_string(), move |_| {
                let unassigned = cmd.clone();
                Outcome::fetch_as_or(
                    ROLE_USERS,
                    cmd.role.as_str().to_owned(),
                    move |holders: RoleUsersObject| {
                        if holders.contains(&cmd.user_id) {
                            Outcome::failed(ROLE_ALREADY_ASSIGNED)
                        } else {
                            Outcome::succeeded([events::role_assigned(
                                &cmd.user_id,
                                cmd.role.as_str(),
                            )])
                        }
                    },
                    move || {
                        Outcome::succeeded([events::role_assigned(
                            &unassigned.user_id,
                            unassigned.role.as_str(),
                        )])
                    },
                )
            })
        },
        || Outcome::failed(NOT_AUTHORIZED),
    )
}
