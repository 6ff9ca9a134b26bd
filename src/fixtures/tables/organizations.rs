// fixtures/tables/organizations.rs
//
// sql/organizations.sql seeds seven organizations and the sales→customer
// links between them. A sales organization can itself be the customer of
// another sales organization, which is what the recursive subordinate
// count walks.

use crate::fixtures::SqlFixture;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ENTERPRISE_SALES: &str = "ENTERPRISE_SALES";
pub const ENTERPRISE_CUSTOMER: &str = "ENTERPRISE_CUSTOMER";

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Organization {
    pub id: i32,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub org_type: String,
}

impl Organization {
    pub fn is_customer(&self) -> bool {
        self.org_type == ENTERPRISE_CUSTOMER
    }
}

pub struct Organizations;

impl SqlFixture for Organizations {
    const FILE_NAME: &'static str = "organizations.sql";
    const SELECT_ALL: &'static str = "SELECT id, name, type FROM organizations ORDER BY id";
    type Row = Organization;
}
