//! Book inventory model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Catalog entry as seen by the lending workflow: only copy counts matter here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub available_copies: i32,
    pub total_copies: i32,
}

impl Book {
    pub fn new(id: impl Into<String>, title: impl Into<String>, copies: i32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            available_copies: copies,
            total_copies: copies,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available_copies > 0
    }
}
