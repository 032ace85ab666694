use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub const ADMIN_GROUP: &str = "管理員";
pub const APPLICANT_GROUP: &str = "申請人員";
pub const MATERIAL_HANDLER_GROUP: &str = "撥料人員";

pub const ALL_GROUPS: [&str; 3] = [ADMIN_GROUP, APPLICANT_GROUP, MATERIAL_HANDLER_GROUP];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWithGroups {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub is_locked: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub groups: Vec<String>,
}

impl UserWithGroups {
    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g == name)
    }

    pub fn groups_display(&self) -> String {
        self.groups.join(", ")
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct AuditLogDisplay {
    pub id: Uuid,
    pub user_name: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub created_at: DateTime<Utc>,
}
