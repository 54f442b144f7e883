//! Order commit endpoint

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use pediu_checkout::{
    CartLineItem, CheckoutError, CustomerContact, DeliveryAddress, OrderSubmission,
    ValidationError,
};
use pediu_shared::{Channel, PaymentMethod};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_REPLAY_HEADER: &str = "x-idempotency-replay";

/// Request body; the store comes from the path and the idempotency key
/// from the `Idempotency-Key` header or, failing that, the body
#[derive(Debug, Deserialize)]
pub struct CommitOrderRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub channel: Channel,
    pub payment_method: PaymentMethod,
    pub customer: CustomerContact,
    #[serde(default)]
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    pub declared_discount_cents: i64,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn invalid_key() -> ApiError {
    ApiError::Checkout(CheckoutError::Validation(
        ValidationError::InvalidIdempotencyKey,
    ))
}

pub(crate) fn idempotency_key(headers: &HeaderMap, body_key: Option<&str>) -> ApiResult<Uuid> {
    let raw = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(body_key)
        .ok_or_else(invalid_key)?;

    Uuid::parse_str(raw.trim()).map_err(|_| invalid_key())
}

/// POST /api/v1/stores/{store_id}/orders
///
/// 201 with the receipt on first commit; 200 with the original receipt and
/// `X-Idempotency-Replay: true` when the same request is resent.
pub async fn commit_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(store_id): Path<Uuid>,
    headers: HeaderMap,
    body: Result<Json<CommitOrderRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let key = idempotency_key(&headers, body.idempotency_key.as_deref())?;

    let submission = OrderSubmission {
        store_id,
        idempotency_key: key,
        channel: body.channel,
        payment_method: body.payment_method,
        customer: body.customer,
        delivery_address: body.delivery_address,
        items: body.items,
        declared_discount_cents: body.declared_discount_cents,
        coupon_code: body.coupon_code,
        notes: body.notes,
    };

    let receipt = state.orders.commit(&user.caller(), submission).await?;

    let replayed = receipt.idempotent;
    let status = if replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    let mut response = (status, Json(receipt)).into_response();
    if replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENCY_REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}
