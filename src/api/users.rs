//! Profile lookups, directories and status updates

use anyhow::{Context, Result};
use serde_json::json;

use super::client::ApiClient;
use crate::models::{Identity, PresenceStatus, ProfilePatch, StaffRecord, StudentRecord, UserRecord};

/// All three user directories.
#[derive(Debug, Default)]
pub struct Directory {
    pub users: Vec<UserRecord>,
    pub students: Vec<StudentRecord>,
    pub staff: Vec<StaffRecord>,
}

fn profile_path(identity: Identity) -> String {
    match identity {
        Identity::Unified(id) => format!("users/{}/profile", id),
        Identity::Student(id) => format!("students/{}/info", id),
        Identity::Staff(id) => format!("staff/{}/info", id),
    }
}

/// Fetch one profile by whichever identity is known.
pub async fn fetch_profile(client: &ApiClient, identity: Identity) -> Result<ProfilePatch> {
    client
        .get(&profile_path(identity))
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse profile for {}", identity))
}

async fn fetch_list<T: serde::de::DeserializeOwned>(client: &ApiClient, path: &str) -> Result<Vec<T>> {
    client
        .get(path)
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse /{} response", path))
}

/// Fetch the three directories concurrently.
///
/// A directory that fails to load is logged and treated as empty.
pub async fn fetch_directory(client: &ApiClient) -> Directory {
    let (users, students, staff) = futures::join!(
        fetch_list::<UserRecord>(client, "users"),
        fetch_list::<StudentRecord>(client, "students"),
        fetch_list::<StaffRecord>(client, "staff"),
    );

    let or_empty = |name: &str, e: anyhow::Error| {
        tracing::warn!("Failed to load {} directory: {:#}", name, e);
    };

    Directory {
        users: users.unwrap_or_else(|e| {
            or_empty("users", e);
            Vec::new()
        }),
        students: students.unwrap_or_else(|e| {
            or_empty("students", e);
            Vec::new()
        }),
        staff: staff.unwrap_or_else(|e| {
            or_empty("staff", e);
            Vec::new()
        }),
    }
}

/// Push a status change to the backend profile.
pub async fn update_status(client: &ApiClient, user_id: u64, status: PresenceStatus) -> Result<()> {
    client
        .patch(
            &format!("users/{}/profile", user_id),
            &json!({ "status": status }),
        )
        .await?;
    Ok(())
}
