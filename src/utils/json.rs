use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppError;

/// `Json<T>` whose rejections (bad syntax, missing fields, wrong types, missing
/// content type) answer 400 with the usual `{"error": ...}` body.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// A PATCH field: left out, explicitly nulled, or given a value.
#[derive(Debug, Clone, PartialEq)]
pub enum NullableValue<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Default for NullableValue<T> {
    fn default() -> Self {
        NullableValue::Omitted
    }
}

impl<T> NullableValue<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, NullableValue::Omitted)
    }

    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            NullableValue::Omitted => {}
            NullableValue::Null => *field = None,
            NullableValue::Value(value) => *field = Some(value),
        }
    }
}

pub fn classify_nullable<T: DeserializeOwned>(
    optional_value: Option<&Value>,
) -> Result<NullableValue<T>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(other) => serde_json::from_value(other.clone())
            .map(NullableValue::Value)
            .map_err(|err| format!("unexpected value {other}: {err}")),
    }
}

/// Like [`classify_nullable`] for fields that may be left out but never nulled.
pub fn optional_field<T: DeserializeOwned>(
    body: &Value,
    key: &str,
) -> Result<Option<T>, String> {
    match classify_nullable(body.get(key)).map_err(|err| format!("{key}: {err}"))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Err(format!("{key} cannot be null")),
        NullableValue::Value(value) => Ok(Some(value)),
    }
}

pub fn nullable_field<T: DeserializeOwned>(
    body: &Value,
    key: &str,
) -> Result<NullableValue<T>, String> {
    classify_nullable(body.get(key)).map_err(|err| format!("{key}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distinguishes_missing_null_and_value() {
        let body = json!({ "reason": null, "name": "Roof" });
        assert_eq!(
            nullable_field::<String>(&body, "reason").unwrap(),
            NullableValue::Null
        );
        assert_eq!(
            nullable_field::<String>(&body, "name").unwrap(),
            NullableValue::Value("Roof".to_string())
        );
        assert!(nullable_field::<String>(&body, "other").unwrap().is_omitted());
    }

    #[test]
    fn optional_fields_reject_null_and_wrong_types() {
        let body = json!({ "title": null, "count": "three" });
        assert!(optional_field::<String>(&body, "title").is_err());
        assert!(optional_field::<u32>(&body, "count").is_err());
        assert_eq!(optional_field::<String>(&body, "missing").unwrap(), None);
    }

    #[test]
    fn apply_to_follows_the_three_states() {
        let mut field = Some(1);
        NullableValue::Omitted.apply_to(&mut field);
        assert_eq!(field, Some(1));
        NullableValue::Value(2).apply_to(&mut field);
        assert_eq!(field, Some(2));
        NullableValue::Null.apply_to(&mut field);
        assert_eq!(field, None);
    }
}
