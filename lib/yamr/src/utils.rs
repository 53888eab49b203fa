use anyhow::{Context, Result};
use std::str::FromStr;

pub fn is_truthy(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}

/// Parses the value of the environment variable `name`, naming it in the error.
pub fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("{}={:?}", name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", " on "] {
            assert!(is_truthy(v), "{}", v);
        }
        for v in ["0", "false", "", "maybe"] {
            assert!(!is_truthy(v), "{}", v);
        }
    }

    #[test]
    fn parse_errors_name_the_variable() {
        assert_eq!(parse_var::<usize>("N", " 12 ").unwrap(), 12);
        let err = parse_var::<usize>("YAMR_SHUFFLE_BATCH", "lots").unwrap_err();
        assert!(err.to_string().contains("YAMR_SHUFFLE_BATCH"));
    }
}
