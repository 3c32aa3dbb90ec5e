//! Authentication bookkeeping
//!
//! Users are known through an `AuthenticationMechanism`, grouped in
//! `AuthenticationGroup`s that carry roles. The set of roles is fixed at
//! compile time with `define_roles!`, which generates the role enum and the
//! `is_<role>` / `set_<role>` accessors on groups. Who is logged in is an
//! explicit `AuthContext` value handed to whoever needs it.
//!
//! # Examples
//!
//! ```
//! use chrono::NaiveDate;
//! use queryproxy::auth::{AuthContext, AuthDirectory, Role, RoleAccess};
//!
//! let mut directory = AuthDirectory::new();
//! let ctx = AuthContext::establish(&mut directory, "alice");
//! let now = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
//!
//! // The first login bootstraps an admin group
//! directory.update_last_login(&ctx, Some("admin"), &[Role::Admin], now);
//! assert!(directory.group("admin").unwrap().is_admin());
//!
//! let ctx = AuthContext::establish(&mut directory, "alice");
//! assert!(ctx.has_role(Role::Admin));
//! ```

use chrono::{Local, NaiveDate, NaiveDateTime};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A compile-time set of roles, generated by `define_roles!`.
pub trait RoleSet: Copy + fmt::Debug + 'static {
    const ALL: &'static [Self];

    /// Identifier stored in a group's role set.
    fn id(self) -> u32;

    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|role| role.name() == name)
    }
}

/// Define the roles of an application.
///
/// Generates the role enum implementing `RoleSet` and a trait with one
/// getter and one setter per role, implemented for `AuthenticationGroup`.
///
/// ```
/// use queryproxy::auth::{AuthenticationGroup, RoleSet};
///
/// queryproxy::define_roles! {
///     pub enum ShopRole, trait ShopRoleAccess {
///         Cashier = 10 => is_cashier / set_cashier,
///         Manager = 11 => is_manager / set_manager,
///     }
/// }
///
/// let mut group = AuthenticationGroup::new("staff");
/// group.set_cashier(true);
/// assert!(group.is_cashier());
/// assert!(!group.is_manager());
/// assert_eq!(ShopRole::from_name("Manager"), Some(ShopRole::Manager));
/// ```
#[macro_export]
macro_rules! define_roles {
    (
        $(#[$meta:meta])*
        $vis:vis enum $role:ident, trait $access:ident {
            $($variant:ident = $id:literal => $is:ident / $set:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $role {
            $($variant),+
        }

        impl $crate::auth::RoleSet for $role {
            const ALL: &'static [Self] = &[$($role::$variant),+];

            fn id(self) -> u32 {
                match self {
                    $($role::$variant => $id),+
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $($role::$variant => stringify!($variant)),+
                }
            }
        }

        $vis trait $access {
            $(
                fn $is(&self) -> bool;
                fn $set(&mut self, value: bool);
            )+
        }

        impl $access for $crate::auth::AuthenticationGroup {
            $(
                fn $is(&self) -> bool {
                    self.has_role($role::$variant)
                }

                fn $set(&mut self, value: bool) {
                    self.set_role($role::$variant, value)
                }
            )+
        }
    };
}

define_roles! {
    /// Roles known to the library itself.
    pub enum Role, trait RoleAccess {
        Admin = 1 => is_admin / set_admin,
        Editor = 2 => is_editor / set_editor,
    }
}

/// Last day an authentication can be valid.
pub fn end_of_times() -> NaiveDate {
    NaiveDate::from_ymd_opt(2400, 12, 31).unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationType {
    #[default]
    OperatingSystem,
    Database,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationMechanism {
    pub username: String,
    pub authentication_type: AuthenticationType,
    pub from_date: NaiveDate,
    pub thru_date: NaiveDate,
    pub last_login: Option<NaiveDateTime>,
}

impl AuthenticationMechanism {
    /// A mechanism valid from `today` until the end of times.
    pub fn new(username: impl Into<String>, today: NaiveDate) -> Self {
        AuthenticationMechanism {
            username: username.into(),
            authentication_type: AuthenticationType::default(),
            from_date: today,
            thru_date: end_of_times(),
            last_login: None,
        }
    }

    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        (self.from_date..=self.thru_date).contains(&date)
    }
}

/// A group of users sharing a set of roles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthenticationGroup {
    pub name: String,
    roles: BTreeSet<u32>,
    members: Vec<String>,
}

impl AuthenticationGroup {
    pub fn new(name: impl Into<String>) -> Self {
        AuthenticationGroup {
            name: name.into(),
            ..AuthenticationGroup::default()
        }
    }

    pub fn has_role<R: RoleSet>(&self, role: R) -> bool {
        self.roles.contains(&role.id())
    }

    pub fn set_role<R: RoleSet>(&mut self, role: R, value: bool) {
        if value {
            self.roles.insert(role.id());
        } else {
            self.roles.remove(&role.id());
        }
    }

    pub fn role_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.roles.iter().copied()
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn add_member(&mut self, username: impl Into<String>) {
        let username = username.into();
        if !self.members.contains(&username) {
            self.members.push(username);
        }
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }
}

/// Users and groups of an application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthDirectory {
    mechanisms: Vec<AuthenticationMechanism>,
    groups: Vec<AuthenticationGroup>,
}

impl AuthDirectory {
    pub fn new() -> Self {
        AuthDirectory::default()
    }

    /// The mechanism of `username`, created valid from today when unknown.
    pub fn get_or_create(&mut self, username: &str) -> &AuthenticationMechanism {
        let position = match self.mechanisms.iter().position(|m| m.username == username) {
            Some(position) => position,
            None => {
                debug!("creating authentication for {}", username);
                self.mechanisms
                    .push(AuthenticationMechanism::new(username, Local::now().date_naive()));
                self.mechanisms.len() - 1
            }
        };
        &self.mechanisms[position]
    }

    pub fn mechanism(&self, username: &str) -> Option<&AuthenticationMechanism> {
        self.mechanisms.iter().find(|m| m.username == username)
    }

    pub fn group(&self, name: &str) -> Option<&AuthenticationGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut AuthenticationGroup> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    pub fn groups(&self) -> &[AuthenticationGroup] {
        &self.groups
    }

    pub fn add_group(&mut self, group: AuthenticationGroup) {
        self.groups.push(group);
    }

    pub fn groups_of<'a>(&'a self, username: &'a str) -> impl Iterator<Item = &'a AuthenticationGroup> + 'a {
        self.groups.iter().filter(move |g| g.is_member(username))
    }

    /// Whether any group of `username` carries `role`.
    pub fn has_role<R: RoleSet>(&self, username: &str, role: R) -> bool {
        self.groups_of(username).any(|g| g.has_role(role))
    }

    /// Record a login of the context's user at `now`. When no group exists
    /// yet and `initial_group` is given, that group is created with
    /// `initial_roles` and the user becomes its first member.
    pub fn update_last_login<R: RoleSet>(
        &mut self,
        ctx: &AuthContext,
        initial_group: Option<&str>,
        initial_roles: &[R],
        now: NaiveDateTime,
    ) {
        self.get_or_create(ctx.username());
        if let Some(mechanism) = self.mechanisms.iter_mut().find(|m| m.username == ctx.username()) {
            mechanism.last_login = Some(now);
        }
        if let Some(name) = initial_group {
            if self.groups.is_empty() {
                info!("bootstrapping authentication group {} for {}", name, ctx.username());
                let mut group = AuthenticationGroup::new(name);
                for role in initial_roles {
                    group.set_role(*role, true);
                }
                group.add_member(ctx.username());
                self.groups.push(group);
            }
        }
    }
}

/// The logged in user, with the role ids of their groups at the time the
/// context was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    username: String,
    roles: BTreeSet<u32>,
}

impl AuthContext {
    pub fn establish(directory: &mut AuthDirectory, username: &str) -> Self {
        directory.get_or_create(username);
        let roles = directory
            .groups_of(username)
            .flat_map(|g| g.role_ids())
            .collect();
        AuthContext {
            username: username.to_string(),
            roles,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn has_role<R: RoleSet>(&self, role: R) -> bool {
        self.roles.contains(&role.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn test_role_accessors() {
        let mut group = AuthenticationGroup::new("editors");
        assert!(!group.is_editor());
        group.set_editor(true);
        group.set_editor(true);
        assert!(group.is_editor());
        assert_eq!(group.role_ids().collect::<Vec<_>>(), vec![2]);
        group.set_editor(false);
        assert!(!group.is_editor());
        assert_eq!(Role::from_name("Admin"), Some(Role::Admin));
        assert_eq!(Role::Editor.id(), 2);
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut directory = AuthDirectory::new();
        let mechanism = directory.get_or_create("bob").clone();
        assert_eq!(mechanism.thru_date, end_of_times());
        assert_eq!(mechanism.authentication_type, AuthenticationType::OperatingSystem);
        assert!(mechanism.last_login.is_none());

        directory.get_or_create("bob");
        assert_eq!(directory.mechanisms.len(), 1);
    }

    #[test]
    fn test_validity_window() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let mut mechanism = AuthenticationMechanism::new("carol", today);
        assert!(mechanism.is_valid_on(today));
        assert!(!mechanism.is_valid_on(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap()));
        mechanism.thru_date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert!(!mechanism.is_valid_on(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }

    #[test]
    fn test_bootstrap_only_first_group() {
        let mut directory = AuthDirectory::new();
        let alice = AuthContext::establish(&mut directory, "alice");
        assert!(!alice.has_role(Role::Admin));

        directory.update_last_login(&alice, Some("admin"), &[Role::Admin, Role::Editor], at(2024, 3, 1));
        assert_eq!(directory.mechanism("alice").unwrap().last_login, Some(at(2024, 3, 1)));

        let bob = AuthContext::establish(&mut directory, "bob");
        directory.update_last_login(&bob, Some("admin"), &[Role::Admin], at(2024, 3, 2));
        assert_eq!(directory.groups().len(), 1);
        assert!(directory.has_role("alice", Role::Editor));
        assert!(!directory.has_role("bob", Role::Admin));

        let alice = AuthContext::establish(&mut directory, "alice");
        assert_eq!(alice.username(), "alice");
        assert!(alice.has_role(Role::Admin));
    }

    #[test]
    fn test_login_without_initial_group() {
        let mut directory = AuthDirectory::new();
        let ctx = AuthContext::establish(&mut directory, "dave");
        directory.update_last_login::<Role>(&ctx, None, &[], at(2024, 5, 5));
        assert!(directory.groups().is_empty());
        assert!(directory.mechanism("dave").unwrap().last_login.is_some());
    }
}
