use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::auth::{self, AdminUser, AuthUser, ROLE_CUSTOMER};
use crate::db::{Params, UnitOfWork};
use crate::http::{ApiError, AppState};
use crate::model::{
    ApiResponse, CouponDto, CouponRequest, CreateCouponDto, Credentials, LoginResponse, Paging,
    UserDto,
};
use crate::validation::Validate;

const COUPON_EXISTS: &str = "Coupon already exists";
const USER_EXISTS: &str = "User already exists";

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/coupon", get(get_all).post(create).put(update))
        .route("/api/coupon/special", get(special))
        .route("/api/coupon/{id}", get(get_one).delete(delete))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
}

/// GET /api/coupon (admin)
#[instrument(skip_all)]
async fn get_all(State(state): State<Arc<AppState>>, _admin: AdminUser) -> ApiResult<Vec<CouponDto>> {
    info!("getting all coupons");
    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let coupons = uow
        .coupons()
        .raw_query("SELECT * FROM coupons ORDER BY id", &Params::new(), false)
        .await?;
    Ok(ApiResponse::success(
        StatusCode::OK.as_u16(),
        coupons.into_iter().map(CouponDto::from).collect(),
    ))
}

/// GET /api/coupon/{id} (any authenticated caller)
#[instrument(skip_all)]
async fn get_one(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<CouponDto> {
    let Path(id) = id.map_err(|_| ApiError::bad_request("Invalid Coupon Id"))?;
    if id == 0 {
        return Err(ApiError::bad_request("Invalid Coupon Id"));
    }

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let coupon = uow
        .coupons()
        .raw_query(
            "SELECT * FROM coupons WHERE id = @id",
            &Params::new().bind("id", id),
            false,
        )
        .await?
        .into_iter()
        .next()
        .ok_or(ApiError::NotFound)?;
    Ok(ApiResponse::success(StatusCode::OK.as_u16(), coupon.into()))
}

/// POST /api/coupon (admin)
#[instrument(skip_all)]
async fn create(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    payload: Result<Json<CreateCouponDto>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(new_coupon) = payload?;
    new_coupon.validate().map_err(ApiError::Validation)?;

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let mut coupons = uow.coupons();

    let exists = coupons
        .raw_scalar_query::<i64>(
            "SELECT COUNT(id) FROM coupons WHERE LOWER(name) = LOWER(@name)",
            &Params::new().bind("name", new_coupon.name.as_str()),
        )
        .await?;
    if exists.first().copied().unwrap_or(0) > 0 {
        return Err(ApiError::Conflict(COUPON_EXISTS.into()));
    }

    let now = Utc::now();
    let params = Params::new()
        .bind("name", new_coupon.name.as_str())
        .bind("is_active", new_coupon.is_active)
        .bind("percent", new_coupon.percent)
        .bind("created", now)
        .bind("last_updated", now);
    let coupon = coupons
        .raw_query(
            "INSERT INTO coupons (name, is_active, percent, created, last_updated)
             VALUES (@name, @is_active, @percent, @created, @last_updated)
             RETURNING *",
            &params,
            false,
        )
        .await
        .map_err(ApiError::conflict_on_unique(COUPON_EXISTS))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::bad_request("Unable to create coupon"))?;

    info!(id = coupon.id, "created coupon");
    let location = format!("/api/coupon/{}", coupon.id);
    let body = ApiResponse::success(StatusCode::CREATED.as_u16(), CouponDto::from(coupon));
    Ok(([(header::LOCATION, location)], body).into_response())
}

/// PUT /api/coupon (admin)
#[instrument(skip_all)]
async fn update(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    payload: Result<Json<CouponDto>, JsonRejection>,
) -> ApiResult<CouponDto> {
    let Json(coupon) = payload?;
    coupon.validate().map_err(ApiError::Validation)?;

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let mut coupons = uow.coupons();

    let exists = coupons
        .raw_scalar_query::<i64>(
            "SELECT COUNT(id) FROM coupons WHERE LOWER(name) = LOWER(@name) AND id != @id",
            &Params::new()
                .bind("id", coupon.id)
                .bind("name", coupon.name.as_str()),
        )
        .await?;
    if exists.first().copied().unwrap_or(0) > 0 {
        return Err(ApiError::Conflict(COUPON_EXISTS.into()));
    }

    let rows = coupons
        .raw_execute(
            "UPDATE coupons
             SET percent = @percent, is_active = @is_active, name = @name, last_updated = @last_updated
             WHERE id = @id",
            &Params::new()
                .bind("id", coupon.id)
                .bind("name", coupon.name.as_str())
                .bind("percent", coupon.percent)
                .bind("is_active", coupon.is_active)
                .bind("last_updated", Utc::now()),
        )
        .await
        .map_err(ApiError::conflict_on_unique(COUPON_EXISTS))?;

    if rows == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ApiResponse::empty(StatusCode::OK.as_u16()))
}

/// DELETE /api/coupon/{id} (admin)
#[instrument(skip_all)]
async fn delete(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let rows = uow
        .coupons()
        .raw_execute(
            "DELETE FROM coupons WHERE id = @id",
            &Params::new().bind("id", id),
        )
        .await?;
    if rows == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/coupon/special (admin): name-filtered, paged listing.
#[instrument(skip_all)]
async fn special(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    headers: HeaderMap,
    request: Result<Query<CouponRequest>, QueryRejection>,
) -> ApiResult<Vec<CouponDto>> {
    info!("getting special coupons");
    let Query(request) = request?;
    let paging = Paging::new(
        request.page.or_else(|| header_number(&headers, "Page")),
        request.page_size.or_else(|| header_number(&headers, "PageSize")),
    );

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let coupons = uow
        .coupons()
        .raw_query(
            "SELECT * FROM coupons
             WHERE @name IS NULL OR name LIKE '%' || @name || '%' ESCAPE '\\'
             ORDER BY id
             LIMIT @page_size OFFSET @offset",
            &Params::new()
                .bind("name", request.coupon_name.as_deref().map(escape_like))
                .bind("page_size", paging.page_size)
                .bind("offset", paging.offset()),
            false,
        )
        .await?;
    Ok(ApiResponse::success(
        StatusCode::OK.as_u16(),
        coupons.into_iter().map(CouponDto::from).collect(),
    ))
}

/// Escape LIKE wildcards so the filter matches a literal substring.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// POST /api/register: create a customer account.
#[instrument(skip_all)]
async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<UserDto> {
    let Json(creds) = payload?;
    creds.validate().map_err(ApiError::Validation)?;
    let user_name = creds.user_name.trim();

    if auth::find_user(&state.pool, user_name).await?.is_some() {
        return Err(ApiError::Conflict(USER_EXISTS.into()));
    }

    let hash = auth::hash_password(&creds.password, state.bcrypt_cost)?;
    let id = auth::create_user(&state.pool, user_name, &hash)
        .await
        .map_err(ApiError::conflict_on_unique(USER_EXISTS))?;
    auth::add_to_role(&state.pool, id, ROLE_CUSTOMER).await?;
    let roles = auth::roles_for(&state.pool, id).await?;

    info!(id, "registered user");
    Ok(ApiResponse::success(
        StatusCode::CREATED.as_u16(),
        UserDto {
            id,
            user_name: user_name.to_string(),
            roles,
        },
    ))
}

/// POST /api/login: exchange credentials for a bearer token.
#[instrument(skip_all)]
async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(creds) = payload?;
    let invalid = || ApiError::bad_request("Username or password is incorrect");

    let user = auth::find_user(&state.pool, creds.user_name.trim())
        .await?
        .ok_or_else(invalid)?;
    if !auth::verify_password(&creds.password, &user.password_hash)? {
        return Err(invalid());
    }

    let roles = auth::roles_for(&state.pool, user.id).await?;
    let (token, session) = state
        .sessions
        .lock()
        .map_err(|e| ApiError::Internal(format!("session store poisoned: {e}")))?
        .create(user.id, user.user_name.clone(), roles);

    info!(user_id = user.id, "user logged in");
    Ok(ApiResponse::success(
        StatusCode::OK.as_u16(),
        LoginResponse {
            token,
            expires_at: session.expires_at,
            user: UserDto {
                id: user.id,
                user_name: user.user_name,
                roles: session.roles,
            },
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("SAVE"), "SAVE");
        assert_eq!(escape_like("10%"), "10\\%");
        assert_eq!(escape_like("a_b\\c"), "a\\_b\\\\c");
    }
}
