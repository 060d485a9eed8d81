//! Argument checks shared by the managers.

use std::path::Path;

use crate::error::ValidationError;

pub fn non_empty_str(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyString { field });
    }
    Ok(())
}

pub fn positive(value: i64, field: &'static str) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NonPositive { field });
    }
    Ok(())
}

pub fn non_negative(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::Negative { field });
    }
    Ok(())
}

pub fn non_empty_list<T>(values: &[T], field: &'static str) -> Result<(), ValidationError> {
    if values.is_empty() {
        return Err(ValidationError::EmptyList { field });
    }
    Ok(())
}

pub fn file_exists(path: &Path) -> Result<(), ValidationError> {
    if !path.is_file() {
        return Err(ValidationError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Value must be one of `allowed`.
pub fn one_of(
    value: &str,
    allowed: &[&str],
    field: &'static str,
) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(ValidationError::InvalidChoice {
        field,
        value: value.to_owned(),
        allowed: allowed.join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_strings_are_rejected() {
        assert!(non_empty_str("  ", "name").is_err());
        assert!(non_empty_str("edm", "name").is_ok());
    }

    #[test]
    fn zero_is_not_positive() {
        assert_eq!(
            positive(0, "job_id"),
            Err(ValidationError::NonPositive { field: "job_id" })
        );
        assert!(positive(1, "job_id").is_ok());
    }

    #[test]
    fn nan_is_not_non_negative() {
        assert!(non_negative(f64::NAN, "premium").is_err());
        assert!(non_negative(0.0, "premium").is_ok());
    }

    #[test]
    fn one_of_lists_allowed_values() {
        let error = one_of("XX", &["GR", "GU", "RL"], "perspective_code").expect_err("invalid");
        assert_eq!(
            error.to_string(),
            "invalid perspective_code 'XX', expected one of GR, GU, RL"
        );
    }
}
