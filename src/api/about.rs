//! Drive `about` endpoint

use serde::Deserialize;

use crate::models::Profile;

#[derive(Debug, Deserialize)]
pub(crate) struct AboutResponse {
    pub user: Profile,
}
