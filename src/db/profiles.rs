//! Caller profiles and the approval gate.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    pub status: ApprovalStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }
}

fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
    let role: String = row.get("role")?;
    let status: String = row.get("status")?;
    Ok(Profile {
        user_id: row.get("user_id")?,
        email: row.get("email")?,
        role: if role == "admin" { Role::Admin } else { Role::User },
        status: match status.as_str() {
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => ApprovalStatus::Pending,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl MemoryDB {
    /// Create the caller's profile, or return the existing one unchanged.
    /// The very first profile becomes an approved admin so the instance
    /// can be bootstrapped; everyone after starts pending.
    pub fn register_profile(&self, user_id: &str, email: Option<&str>) -> Result<Profile, GhostError> {
        if user_id.trim().is_empty() || user_id.len() > 128 {
            return Err(GhostError::Validation("user id must be 1-128 chars".into()));
        }
        if let Some(existing) = self.get_profile(user_id)? {
            return Ok(existing);
        }

        let now = now_ms();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))?;
        let (role, status) = if existing == 0 {
            (Role::Admin, ApprovalStatus::Approved)
        } else {
            (Role::User, ApprovalStatus::Pending)
        };
        tx.execute(
            "INSERT OR IGNORE INTO profiles (user_id, email, role, status, created_at, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?5)",
            params![user_id, email, role.as_str(), status.as_str(), now],
        )?;
        tx.commit()?;
        drop(conn);

        if role == Role::Admin {
            tracing::info!(user_id, "first profile registered as admin");
        }
        self.get_profile(user_id)?
            .ok_or_else(|| GhostError::Internal("profile vanished after insert".into()))
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, GhostError> {
        let p = self
            .conn()?
            .query_row("SELECT * FROM profiles WHERE user_id = ?1", [user_id], row_to_profile)
            .optional()?;
        Ok(p)
    }

    pub fn list_profiles(&self, status: Option<ApprovalStatus>) -> Result<Vec<Profile>, GhostError> {
        let conn = self.conn()?;
        let rows = match status {
            Some(s) => {
                let mut stmt = conn.prepare("SELECT * FROM profiles WHERE status = ?1 ORDER BY created_at")?;
                let rows = stmt
                    .query_map([s.as_str()], row_to_profile)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM profiles ORDER BY created_at")?;
                let rows = stmt.query_map([], row_to_profile)?.collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Change a profile's approval status and/or role. `None` if the
    /// profile doesn't exist.
    pub fn set_profile_status(
        &self,
        user_id: &str,
        status: Option<ApprovalStatus>,
        role: Option<Role>,
    ) -> Result<Option<Profile>, GhostError> {
        if self.get_profile(user_id)?.is_none() {
            return Ok(None);
        }
        let now = now_ms();
        let conn = self.conn()?;
        if let Some(s) = status {
            conn.execute(
                "UPDATE profiles SET status = ?1, updated_at = ?2 WHERE user_id = ?3",
                params![s.as_str(), now, user_id],
            )?;
        }
        if let Some(r) = role {
            conn.execute(
                "UPDATE profiles SET role = ?1, updated_at = ?2 WHERE user_id = ?3",
                params![r.as_str(), now, user_id],
            )?;
        }
        drop(conn);
        self.get_profile(user_id)
    }
}
