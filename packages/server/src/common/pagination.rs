//! Cursor-based pagination for list endpoints.
//!
//! Resource ids are V7 UUIDs, so ordering by id is ordering by creation and
//! the cursor only needs to carry the last id seen.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AppError, ValidationErrors};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Opaque cursor (base64-encoded UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(Uuid);

impl Cursor {
    pub fn new(id: Uuid) -> Self {
        Cursor(id)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .context("Invalid cursor: not valid base64")?;
        let uuid = Uuid::from_slice(&bytes).context("Invalid cursor: not a valid UUID")?;
        Ok(Cursor(uuid))
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

/// Raw query-string arguments (`?limit=&after=`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageArgs {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

/// Validated page request handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub after: Option<Uuid>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            after: None,
        }
    }
}

impl PageArgs {
    pub fn validate(&self) -> Result<PageRequest, AppError> {
        let mut errors = ValidationErrors::new();

        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            errors.add("limit", format!("must be between 1 and {}", MAX_PAGE_SIZE));
        }

        let after = match self.after.as_deref() {
            None => None,
            Some(raw) => match Cursor::decode(raw) {
                Ok(cursor) => Some(cursor.into_uuid()),
                Err(e) => {
                    errors.add("after", e.to_string());
                    None
                }
            },
        };

        errors.into_result()?;
        Ok(PageRequest { limit, after })
    }
}

/// One page of results plus the cursor for the next one.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Builds a page from `limit + 1` fetched rows: the extra row only
    /// signals that another page exists.
    pub fn from_overfetch(mut items: Vec<T>, limit: usize, id_of: impl Fn(&T) -> Uuid) -> Self {
        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = if has_more {
            items.last().map(|item| Cursor::new(id_of(item)).encode())
        } else {
            None
        };
        Self { items, next_cursor }
    }
}
