use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Entity, SqlValue};

/// Largest page the special listing will return.
const MAX_PAGE_SIZE: i64 = 100;

/// Page size used when the caller asks for none (or a non-positive one).
const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: i64,
    pub name: String,
    pub percent: i32,
    pub is_active: bool,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Coupon {
    /// A not-yet-stored coupon; the id is assigned by the database.
    pub fn new(name: impl Into<String>, percent: i32, is_active: bool) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            percent,
            is_active,
            created: now,
            last_updated: now,
        }
    }
}

impl Entity for Coupon {
    const TABLE: &'static str = "coupons";
    const KEY: &'static str = "id";

    fn key(&self) -> i64 {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("name", self.name.clone().into()),
            ("percent", self.percent.into()),
            ("is_active", self.is_active.into()),
            ("created", self.created.into()),
            ("last_updated", self.last_updated.into()),
        ]
    }
}

/// Coupon as exposed over HTTP, and the body of an update request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CouponDto {
    pub id: i64,
    pub name: String,
    pub percent: i32,
    pub is_active: bool,
    pub created: Option<DateTime<Utc>>,
}

impl From<Coupon> for CouponDto {
    fn from(c: Coupon) -> Self {
        Self {
            id: c.id,
            name: c.name,
            percent: c.percent,
            is_active: c.is_active,
            created: Some(c.created),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateCouponDto {
    pub name: String,
    pub percent: i32,
    pub is_active: bool,
}

/// Filter and paging for the special listing. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponRequest {
    #[serde(alias = "coupoName", alias = "CoupoName")]
    pub coupon_name: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// One-based page position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: i64,
    pub page_size: i64,
}

impl Paging {
    /// Page is clamped to at least 1; a missing or non-positive size falls
    /// back to the default and large sizes are capped.
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page_size = match page_size {
            Some(size) if size >= 1 => size.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        Self {
            page: page.unwrap_or(1).max(1),
            page_size,
        }
    }

    /// Rows to skip. Saturates rather than overflowing for huge page numbers,
    /// which then simply land past the last row.
    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i64,
    pub user_name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserDto,
}

/// Envelope wrapping every HTTP result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T = serde_json::Value> {
    pub status_code: u16,
    pub is_success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(status_code: u16, result: T) -> Self {
        Self {
            status_code,
            is_success: true,
            result: Some(result),
            error_messages: Vec::new(),
        }
    }

    /// Successful response carrying no payload.
    pub fn empty(status_code: u16) -> Self {
        Self {
            status_code,
            is_success: true,
            result: None,
            error_messages: Vec::new(),
        }
    }

    pub fn failure(status_code: u16, error_messages: Vec<String>) -> Self {
        Self {
            status_code,
            is_success: false,
            result: None,
            error_messages,
        }
    }
}
