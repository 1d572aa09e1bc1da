//! User-related models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    #[serde(rename = "dnd", alias = "do-not-disturb")]
    DoNotDisturb,
    Invisible,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::DoNotDisturb => "dnd",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "dnd" | "do-not-disturb" | "donotdisturb" => Ok(Self::DoNotDisturb),
            "invisible" => Ok(Self::Invisible),
            "offline" => Ok(Self::Offline),
            other => Err(format!(
                "Unknown status: {}. Use: online, away, dnd, invisible, offline",
                other
            )),
        }
    }
}

/// Account role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Staff,
}

/// One of the three addressing schemes a user can be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Unified(u64),
    Student(u64),
    Staff(u64),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unified(id) => write!(f, "user:{}", id),
            Self::Student(id) => write!(f, "student:{}", id),
            Self::Staff(id) => write!(f, "staff:{}", id),
        }
    }
}

/// Whatever identity fields an event or message record carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub user_id: Option<u64>,
    pub student_id: Option<u64>,
    pub staff_id: Option<u64>,
    pub is_staff: bool,
}

impl SenderIdentity {
    pub fn unified(user_id: u64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn student(student_id: u64) -> Self {
        Self {
            student_id: Some(student_id),
            ..Self::default()
        }
    }

    pub fn staff(staff_id: u64) -> Self {
        Self {
            staff_id: Some(staff_id),
            is_staff: true,
            ..Self::default()
        }
    }

    /// Role-scoped identity matching the sender's role, falling back to the
    /// other role id if only that one is present.
    pub fn role_scoped(&self) -> Option<Identity> {
        let staff = self.staff_id.map(Identity::Staff);
        let student = self.student_id.map(Identity::Student);
        if self.is_staff {
            staff.or(student)
        } else {
            student.or(staff)
        }
    }

    /// All identities carried, most specific first.
    pub fn identities(&self) -> Vec<Identity> {
        let mut ids = Vec::with_capacity(3);
        if let Some(role) = self.role_scoped() {
            ids.push(role);
        }
        for other in [
            self.student_id.map(Identity::Student),
            self.staff_id.map(Identity::Staff),
        ]
        .into_iter()
        .flatten()
        {
            if !ids.contains(&other) {
                ids.push(other);
            }
        }
        if let Some(id) = self.user_id {
            ids.push(Identity::Unified(id));
        }
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.student_id.is_none() && self.staff_id.is_none()
    }

    /// True when both describe the same user through any shared key.
    pub fn same_user(&self, other: &SenderIdentity) -> bool {
        let eq = |a: Option<u64>, b: Option<u64>| matches!((a, b), (Some(x), Some(y)) if x == y);
        eq(self.user_id, other.user_id)
            || eq(self.student_id, other.student_id)
            || eq(self.staff_id, other.staff_id)
    }
}

impl From<Identity> for SenderIdentity {
    fn from(identity: Identity) -> Self {
        match identity {
            Identity::Unified(id) => Self::unified(id),
            Identity::Student(id) => Self::student(id),
            Identity::Staff(id) => Self::staff(id),
        }
    }
}

/// Partial profile update. `None` fields leave existing values untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "avatar_url", alias = "profile_picture")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: Option<PresenceStatus>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.username.is_none()
            && self.avatar.is_none()
            && self.status.is_none()
    }
}

/// Entry from the unified `/users` directory.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "user_ID", alias = "id")]
    pub user_id: u64,
    #[serde(default, rename = "student_ID")]
    pub student_id: Option<u64>,
    #[serde(default, rename = "staff_ID")]
    pub staff_id: Option<u64>,
    #[serde(flatten)]
    pub profile: ProfilePatch,
}

/// Entry from the `/students` directory.
#[derive(Debug, Clone, Deserialize)]
pub struct StudentRecord {
    #[serde(rename = "student_ID", alias = "id")]
    pub student_id: u64,
    #[serde(default, rename = "user_ID")]
    pub user_id: Option<u64>,
    #[serde(flatten)]
    pub profile: ProfilePatch,
}

/// Entry from the `/staff` directory.
#[derive(Debug, Clone, Deserialize)]
pub struct StaffRecord {
    #[serde(rename = "staff_ID", alias = "id")]
    pub staff_id: u64,
    #[serde(default, rename = "user_ID")]
    pub user_id: Option<u64>,
    #[serde(flatten)]
    pub profile: ProfilePatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_scoped_prefers_sender_role() {
        let sender = SenderIdentity {
            user_id: Some(1),
            student_id: Some(10),
            staff_id: Some(20),
            is_staff: true,
        };
        assert_eq!(sender.role_scoped(), Some(Identity::Staff(20)));
        assert_eq!(
            sender.identities(),
            vec![
                Identity::Staff(20),
                Identity::Student(10),
                Identity::Unified(1)
            ]
        );
        assert_eq!(SenderIdentity::unified(4).role_scoped(), None);
    }

    #[test]
    fn test_same_user() {
        let a = SenderIdentity {
            user_id: Some(1),
            student_id: Some(10),
            ..Default::default()
        };
        assert!(a.same_user(&SenderIdentity::student(10)));
        assert!(a.same_user(&SenderIdentity::unified(1)));
        assert!(!a.same_user(&SenderIdentity::staff(10)));
        assert!(!SenderIdentity::default().same_user(&SenderIdentity::default()));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("DND".parse::<PresenceStatus>(), Ok(PresenceStatus::DoNotDisturb));
        assert_eq!(
            serde_json::from_str::<PresenceStatus>("\"do-not-disturb\"").unwrap(),
            PresenceStatus::DoNotDisturb
        );
        assert!("busy".parse::<PresenceStatus>().is_err());
    }

    #[test]
    fn test_user_record_deserialize() {
        let json = r#"{"user_ID": 3, "student_ID": 30, "name": "Ada Lovelace", "avatar_url": "a.png"}"#;
        let rec: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.user_id, 3);
        assert_eq!(rec.student_id, Some(30));
        assert_eq!(rec.staff_id, None);
        assert_eq!(rec.profile.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(rec.profile.avatar.as_deref(), Some("a.png"));
    }
}
