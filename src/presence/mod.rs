//! User directory cache: resolves any identity shape to one merged profile.
//!
//! Every identity (`Unified`, `Student`, `Staff`) canonicalises to a slot
//! index. Identities known to belong to the same person share a slot, so a
//! write through one key is visible through all of them.

use std::collections::HashMap;

use crate::models::{
    Identity, PresenceStatus, ProfilePatch, SenderIdentity, StaffRecord, StudentRecord,
    UserRecord,
};

/// Name shown when a sender cannot be resolved.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Merged profile behind one or more identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: Option<String>,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub status: Option<PresenceStatus>,
}

impl Profile {
    /// Shallow merge: present fields overwrite, absent fields are kept.
    pub fn merge(&mut self, patch: &ProfilePatch) {
        if let Some(name) = non_empty(&patch.name) {
            self.name = Some(name);
        }
        if let Some(username) = non_empty(&patch.username) {
            self.username = Some(username);
        }
        if let Some(avatar) = non_empty(&patch.avatar) {
            self.avatar = Some(avatar);
        }
        if let Some(status) = patch.status {
            self.status = Some(status);
        }
    }

    /// Fill fields this profile lacks from `other`.
    fn absorb(&mut self, other: Profile) {
        self.name = self.name.take().or(other.name);
        self.username = self.username.take().or(other.username);
        self.avatar = self.avatar.take().or(other.avatar);
        self.status = self.status.or(other.status);
    }

    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref() {
            return Some(name.to_string());
        }
        self.username.as_deref().map(title_case_username)
    }
}

/// What the view layer needs to show for a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub display_name: String,
    pub avatar: Option<String>,
    pub status: Option<PresenceStatus>,
    /// False for the placeholder returned when nothing is cached.
    pub known: bool,
}

impl ResolvedProfile {
    fn unknown() -> Self {
        Self {
            display_name: UNKNOWN_NAME.to_string(),
            avatar: None,
            status: None,
            known: false,
        }
    }
}

/// Identity-to-profile cache shared by every open view.
#[derive(Debug, Default)]
pub struct UserDirectory {
    slots: Vec<Profile>,
    aliases: HashMap<Identity, usize>,
    /// Slots emptied by `link`, reused before the table grows.
    free: Vec<usize>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct people known.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn get(&self, identity: Identity) -> Option<&Profile> {
        self.aliases.get(&identity).map(|&slot| &self.slots[slot])
    }

    /// Merge fields into the profile behind `identity`, creating it if needed.
    pub fn merge(&mut self, identity: Identity, patch: &ProfilePatch) {
        let slot = self.slot_for(identity);
        self.slots[slot].merge(patch);
    }

    /// Declare that two identities are the same person.
    pub fn link(&mut self, a: Identity, b: Identity) {
        let keep = self.slot_for(a);
        let other = match self.aliases.get(&b) {
            Some(&slot) => slot,
            None => {
                self.aliases.insert(b, keep);
                return;
            }
        };
        if other == keep {
            return;
        }

        let absorbed = std::mem::take(&mut self.slots[other]);
        self.slots[keep].absorb(absorbed);
        for slot in self.aliases.values_mut() {
            if *slot == other {
                *slot = keep;
            }
        }
        self.free.push(other);
    }

    /// Link every identity a sender carries.
    pub fn observe(&mut self, sender: &SenderIdentity) {
        let ids = sender.identities();
        if let Some((first, rest)) = ids.split_first() {
            for id in rest {
                self.link(*first, *id);
            }
        }
    }

    /// Link a sender's identities and merge the profile fields its message
    /// carried.
    pub fn note_sender(&mut self, sender: &SenderIdentity, hints: &ProfilePatch) {
        self.observe(sender);
        if hints.is_empty() {
            return;
        }
        if let Some(&identity) = sender.identities().first() {
            self.merge(identity, hints);
        }
    }

    /// Best known profile for a sender; role-scoped entries win over the
    /// unified one. Falls back to an "Unknown" placeholder.
    pub fn resolve(&self, sender: &SenderIdentity) -> ResolvedProfile {
        sender
            .identities()
            .into_iter()
            .filter_map(|id| self.get(id))
            .find_map(|profile| {
                profile.display_name().map(|display_name| ResolvedProfile {
                    display_name,
                    avatar: profile.avatar.clone(),
                    status: profile.status,
                    known: true,
                })
            })
            .unwrap_or_else(ResolvedProfile::unknown)
    }

    /// Identity worth fetching when the sender has no display name yet.
    pub fn needs_lookup(&self, sender: &SenderIdentity) -> Option<Identity> {
        if self.resolve(sender).known {
            return None;
        }
        sender.identities().into_iter().next()
    }

    /// Bulk-load the three directories and cross-link their ids.
    pub fn ingest_directory(
        &mut self,
        users: &[UserRecord],
        students: &[StudentRecord],
        staff: &[StaffRecord],
    ) {
        for user in users {
            let id = Identity::Unified(user.user_id);
            self.merge(id, &user.profile);
            if let Some(student_id) = user.student_id {
                self.link(id, Identity::Student(student_id));
            }
            if let Some(staff_id) = user.staff_id {
                self.link(id, Identity::Staff(staff_id));
            }
        }
        for student in students {
            let id = Identity::Student(student.student_id);
            self.merge(id, &student.profile);
            if let Some(user_id) = student.user_id {
                self.link(id, Identity::Unified(user_id));
            }
        }
        for member in staff {
            let id = Identity::Staff(member.staff_id);
            self.merge(id, &member.profile);
            if let Some(user_id) = member.user_id {
                self.link(id, Identity::Unified(user_id));
            }
        }
        tracing::info!(
            "Directory loaded: {} users, {} students, {} staff ({} people)",
            users.len(),
            students.len(),
            staff.len(),
            self.len()
        );
    }

    pub fn apply_presence_event(&mut self, user_id: u64, status: PresenceStatus) {
        tracing::debug!("Presence: user {} is {}", user_id, status);
        self.merge(
            Identity::Unified(user_id),
            &ProfilePatch {
                status: Some(status),
                ..ProfilePatch::default()
            },
        );
    }

    pub fn apply_avatar_event(
        &mut self,
        user_id: u64,
        url: &str,
        status: Option<PresenceStatus>,
    ) {
        tracing::debug!("Avatar: user {} changed avatar", user_id);
        self.merge(
            Identity::Unified(user_id),
            &ProfilePatch {
                avatar: Some(url.to_string()),
                status,
                ..ProfilePatch::default()
            },
        );
    }

    fn slot_for(&mut self, identity: Identity) -> usize {
        if let Some(&slot) = self.aliases.get(&identity) {
            return slot;
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Profile::default());
                self.slots.len() - 1
            }
        };
        self.aliases.insert(identity, slot);
        slot
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// `jane_doe.smith` -> `Jane Doe Smith`.
pub fn title_case_username(username: &str) -> String {
    username
        .split(['_', '.'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> ProfilePatch {
        ProfilePatch {
            name: Some(name.to_string()),
            ..ProfilePatch::default()
        }
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let mut dir = UserDirectory::new();
        dir.merge(Identity::Unified(1), &named("Sam"));
        dir.apply_avatar_event(1, "https://cdn/sam.png", None);

        let profile = dir.get(Identity::Unified(1)).unwrap();
        assert_eq!(profile.name.as_deref(), Some("Sam"));
        assert_eq!(profile.avatar.as_deref(), Some("https://cdn/sam.png"));
    }

    #[test]
    fn test_blank_fields_do_not_clobber() {
        let mut dir = UserDirectory::new();
        dir.merge(Identity::Student(4), &named("Kim"));
        dir.merge(
            Identity::Student(4),
            &ProfilePatch {
                name: Some("  ".into()),
                username: Some("kim_lee".into()),
                ..ProfilePatch::default()
            },
        );
        let profile = dir.get(Identity::Student(4)).unwrap();
        assert_eq!(profile.name.as_deref(), Some("Kim"));
        assert_eq!(profile.username.as_deref(), Some("kim_lee"));
    }

    #[test]
    fn test_unknown_then_upgrade() {
        let mut dir = UserDirectory::new();
        let sender = SenderIdentity::student(9);

        let first = dir.resolve(&sender);
        assert_eq!(first.display_name, UNKNOWN_NAME);
        assert!(!first.known);
        assert_eq!(dir.needs_lookup(&sender), Some(Identity::Student(9)));

        dir.merge(Identity::Student(9), &named("Rae"));
        assert_eq!(dir.resolve(&sender).display_name, "Rae");
        assert_eq!(dir.needs_lookup(&sender), None);
    }

    #[test]
    fn test_role_scoped_preferred_over_unified() {
        let mut dir = UserDirectory::new();
        dir.merge(Identity::Unified(1), &named("account name"));
        dir.merge(Identity::Staff(70), &named("Dr. Okafor"));

        let sender = SenderIdentity {
            user_id: Some(1),
            staff_id: Some(70),
            is_staff: true,
            ..SenderIdentity::default()
        };
        assert_eq!(dir.resolve(&sender).display_name, "Dr. Okafor");
        assert_eq!(
            dir.resolve(&SenderIdentity::unified(1)).display_name,
            "account name"
        );
    }

    #[test]
    fn test_directory_cross_links_ids() {
        let users: Vec<UserRecord> = serde_json::from_str(
            r#"[{"user_ID": 1, "student_ID": 10, "username": "ana.silva"}]"#,
        )
        .unwrap();
        let students: Vec<StudentRecord> =
            serde_json::from_str(r#"[{"student_ID": 10, "name": "Ana Silva"}]"#).unwrap();
        let staff: Vec<StaffRecord> = serde_json::from_str(
            r#"[{"staff_ID": 5, "user_ID": 2, "username": "b_ortiz"}]"#,
        )
        .unwrap();

        let mut dir = UserDirectory::new();
        dir.ingest_directory(&users, &students, &staff);
        assert_eq!(dir.len(), 2);

        // Same merged entry through either key.
        assert_eq!(
            dir.get(Identity::Unified(1)),
            dir.get(Identity::Student(10))
        );
        assert_eq!(
            dir.resolve(&SenderIdentity::unified(1)).display_name,
            "Ana Silva"
        );
        assert_eq!(
            dir.resolve(&SenderIdentity::staff(5)).display_name,
            "B Ortiz"
        );
    }

    #[test]
    fn test_presence_reaches_role_alias() {
        let mut dir = UserDirectory::new();
        dir.merge(Identity::Student(10), &named("Ana"));
        dir.observe(&SenderIdentity {
            user_id: Some(1),
            student_id: Some(10),
            ..SenderIdentity::default()
        });

        dir.apply_presence_event(1, PresenceStatus::Away);
        let resolved = dir.resolve(&SenderIdentity::student(10));
        assert_eq!(resolved.status, Some(PresenceStatus::Away));
        assert_eq!(resolved.display_name, "Ana");
    }

    #[test]
    fn test_link_merges_existing_slots() {
        let mut dir = UserDirectory::new();
        dir.merge(Identity::Unified(3), &named("Lee"));
        dir.apply_avatar_event(3, "lee.png", Some(PresenceStatus::Online));
        dir.merge(
            Identity::Staff(30),
            &ProfilePatch {
                username: Some("lee_w".into()),
                ..ProfilePatch::default()
            },
        );
        assert_eq!(dir.len(), 2);

        dir.link(Identity::Staff(30), Identity::Unified(3));
        assert_eq!(dir.len(), 1);
        let merged = dir.get(Identity::Unified(3)).unwrap();
        assert_eq!(merged.name.as_deref(), Some("Lee"));
        assert_eq!(merged.username.as_deref(), Some("lee_w"));
        assert_eq!(merged.avatar.as_deref(), Some("lee.png"));
    }

    #[test]
    fn test_linked_slots_are_reused() {
        let mut dir = UserDirectory::new();
        for id in 0..50 {
            dir.merge(Identity::Student(id), &named("S"));
            dir.merge(Identity::Unified(100 + id), &named("U"));
            dir.link(Identity::Unified(100 + id), Identity::Student(id));
        }
        assert_eq!(dir.len(), 50);
        assert_eq!(dir.slots.len(), 51);
        assert_eq!(
            dir.resolve(&SenderIdentity::student(7)).display_name,
            "U"
        );
    }

    #[test]
    fn test_title_case_username() {
        assert_eq!(title_case_username("john_doe"), "John Doe");
        assert_eq!(title_case_username("jane.q_public"), "Jane Q Public");
        assert_eq!(title_case_username("__x__"), "X");
        assert_eq!(title_case_username(""), "");
    }
}
