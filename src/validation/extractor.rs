use crate::error::{PlangateError, Result};
use axum::{Json, extract::Request};
use serde::Deserialize;
use validator::Validate;

/// Wrapper for validated JSON data
///
/// Parses the body and runs its `Validate` rules; either failure is a
/// `validation_error` response.
///
/// # Example
///
/// ```rust,ignore
/// use plangate::validation::ValidatedJson;
/// use plangate::billing::CheckoutRequest;
///
/// async fn checkout(
///     ValidatedJson(req): ValidatedJson<CheckoutRequest>,
/// ) -> plangate::Result<axum::Json<serde_json::Value>> {
///     Ok(axum::Json(serde_json::json!({"planId": req.plan_id})))
/// }
/// ```
pub struct ValidatedJson<T>(pub T);

impl<T, S> axum::extract::FromRequest<S> for ValidatedJson<T>
where
    T: for<'de> Deserialize<'de> + Validate + Send,
    S: Send + Sync,
{
    type Rejection = PlangateError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| PlangateError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;

        validate_json(value)
    }
}

/// Validate an already parsed value.
pub fn validate_json<T: Validate>(value: T) -> Result<ValidatedJson<T>> {
    value.validate()?;
    Ok(ValidatedJson(value))
}
