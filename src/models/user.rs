//! User-related models

use serde::{Deserialize, Serialize};

/// Drive user profile, as reported by the `about` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: Option<String>,
    pub email_address: Option<String>,
    pub permission_id: Option<String>,
    pub photo_link: Option<String>,
}

impl Profile {
    /// Best human-readable label: email, then display name
    pub fn label(&self) -> &str {
        self.email_address
            .as_deref()
            .or(self.display_name.as_deref())
            .unwrap_or("(unknown)")
    }
}
