use serde::{Deserialize, Serialize};

/// Maps to `GET /users`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub priority: f64,
}

/// Maps to `GET /groups`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub priority: f64,
}
