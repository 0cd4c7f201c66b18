use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::CategoryId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
