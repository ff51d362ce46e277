use serde::{Deserialize, Serialize};

use crate::schema::Validate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalState {
    #[serde(
        rename = "REMEMBERED_TEAM_ID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remembered_team_id: Option<String>,
}

impl Validate for LocalState {}
