/// Recipient resolution.
///
/// Identity and tenancy come from an external user system; the monitor only
/// needs four predicates, expressed by the [`Identity`] trait. The fan-out
/// rule itself is [`resolve_recipients`]:
///
/// - administrators receive every notification;
/// - other users receive it only if they are staff and belong to the
///   organization owning the metric's target;
/// - with no target, or a target without an organization, only
///   administrators are notified.

use serde::{Deserialize, Serialize};

use crate::model::{OrgId, TargetRef, UserId};

pub trait Identity {
    /// All users that may receive notifications, in a stable order.
    fn users(&self) -> Vec<UserId>;
    fn is_admin(&self, user: &UserId) -> bool;
    fn is_staff(&self, user: &UserId) -> bool;
    fn in_organization(&self, user: &UserId, org: &OrgId) -> bool;
}

/// Users who should receive a notification about `target`.
pub fn resolve_recipients<I: Identity + ?Sized>(identity: &I, target: Option<&TargetRef>) -> Vec<UserId> {
    let org = target.and_then(|t| t.organization.as_ref());
    identity
        .users()
        .into_iter()
        .filter(|user| {
            identity.is_admin(user)
                || org.is_some_and(|org| identity.is_staff(user) && identity.in_organization(user, org))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub organizations: Vec<OrgId>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            is_admin: false,
            is_staff: false,
            organizations: Vec::new(),
        }
    }

    /// Administrators are always staff.
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            is_staff: true,
            ..Self::new(id)
        }
    }

    pub fn staff(id: impl Into<String>) -> Self {
        Self {
            is_staff: true,
            ..Self::new(id)
        }
    }

    pub fn member_of(mut self, org: OrgId) -> Self {
        self.organizations.push(org);
        self
    }
}

/// Users kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<User>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user, replacing any existing user with the same id.
    pub fn add(&mut self, user: User) {
        match self.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
    }

    pub fn join(&mut self, user: &UserId, org: OrgId) {
        if let Some(u) = self.users.iter_mut().find(|u| &u.id == user) {
            if !u.organizations.contains(&org) {
                u.organizations.push(org);
            }
        }
    }

    pub fn get(&self, user: &UserId) -> Option<&User> {
        self.users.iter().find(|u| &u.id == user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<User> for UserDirectory {
    fn from_iter<T: IntoIterator<Item = User>>(iter: T) -> Self {
        let mut directory = UserDirectory::new();
        for user in iter {
            directory.add(user);
        }
        directory
    }
}

impl Identity for UserDirectory {
    fn users(&self) -> Vec<UserId> {
        self.users.iter().map(|u| u.id.clone()).collect()
    }

    fn is_admin(&self, user: &UserId) -> bool {
        self.get(user).is_some_and(|u| u.is_admin)
    }

    fn is_staff(&self, user: &UserId) -> bool {
        self.get(user).is_some_and(|u| u.is_staff)
    }

    fn in_organization(&self, user: &UserId, org: &OrgId) -> bool {
        self.get(user).is_some_and(|u| u.organizations.contains(org))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testorg() -> OrgId {
        OrgId::new("test-org")
    }

    /// admin, staff in testorg, lone staff, plain member of testorg.
    fn directory() -> UserDirectory {
        [
            User::admin("admin"),
            User::staff("staff").member_of(testorg()),
            User::staff("staff-lone"),
            User::new("user").member_of(testorg()),
        ]
        .into_iter()
        .collect()
    }

    fn ids(users: &[UserId]) -> Vec<&str> {
        users.iter().map(|u| u.0.as_str()).collect()
    }

    #[test]
    fn test_general_metric_reaches_only_admins() {
        let recipients = resolve_recipients(&directory(), None);
        assert_eq!(ids(&recipients), vec!["admin"]);
    }

    #[test]
    fn test_object_metric_reaches_staff_of_same_org() {
        let device = TargetRef::new("device", "d1", "default.test.device").in_organization(testorg());
        let recipients = resolve_recipients(&directory(), Some(&device));
        assert_eq!(
            ids(&recipients),
            vec!["admin", "staff"],
            "lone staff and non-staff members must not be notified"
        );
    }

    #[test]
    fn test_target_without_organization_reaches_only_admins() {
        let user_target = TargetRef::new("user", "user", "user");
        let recipients = resolve_recipients(&directory(), Some(&user_target));
        assert_eq!(ids(&recipients), vec!["admin"]);
    }

    #[test]
    fn test_staff_of_other_org_is_excluded() {
        let device = TargetRef::new("device", "d2", "other").in_organization(OrgId::new("other-org"));
        let recipients = resolve_recipients(&directory(), Some(&device));
        assert_eq!(ids(&recipients), vec!["admin"]);
    }

    #[test]
    fn test_directory_add_replaces_and_join_is_idempotent() {
        let mut dir = directory();
        dir.add(User::new("admin"));
        assert_eq!(dir.len(), 4);
        assert!(!dir.is_admin(&UserId::new("admin")));

        let lone = UserId::new("staff-lone");
        dir.join(&lone, testorg());
        dir.join(&lone, testorg());
        assert_eq!(dir.get(&lone).unwrap().organizations.len(), 1);
        assert!(dir.in_organization(&lone, &testorg()));
    }
}
