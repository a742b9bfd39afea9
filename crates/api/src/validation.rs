use crate::error::ApiError;
use validator::Validate;

/// Runs the `validator` rules and reports the offending fields in one 400.
pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value.validate().map_err(|errors| {
        let mut fields: Vec<String> = errors
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        fields.sort();
        ApiError::Validation(format!("invalid fields: {}", fields.join(", ")))
    })
}
