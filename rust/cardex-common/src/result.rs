pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[macro_export]
macro_rules! verify_data {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_data(result, stringify!($name), stringify!($expr))?;
    }};
}

/// Internal-consistency check, always fatal when it fails.
///
/// The two-argument form reports the stringified condition; the long form
/// carries a formatted message with the runtime values the condition
/// compared.
#[macro_export]
macro_rules! verify_invariant {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_invariant(result, stringify!($name), stringify!($expr))?;
    }};
    ($name:expr, $expr:expr, $($arg:tt)+) => {{
        if !$expr {
            $crate::result::broken_invariant(stringify!($name), &format!($($arg)+))?;
        }
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[inline]
pub fn verify_data(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_format(name, condition)
    }
}

#[inline]
pub fn verify_invariant(predicate: bool, context: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        broken_invariant(context, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cold]
pub fn invalid_format(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidFormat {
        element: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cold]
pub fn broken_invariant(context: &str, message: &str) -> Result<()> {
    Err(crate::error::ErrorKind::Invariant {
        context: context.to_string(),
        message: message.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use crate::Result;
    use crate::error::ErrorKind;

    fn check(limit: u32, value: u32) -> Result<()> {
        verify_invariant!(check, value <= limit);
        verify_invariant!(check, value != 7, "value {value} hit the reserved slot");
        Ok(())
    }

    #[test]
    fn test_verify_invariant_passes() {
        assert!(check(10, 3).is_ok());
    }

    #[test]
    fn test_verify_invariant_reports_condition() {
        let err = check(10, 11).unwrap_err();
        match err.kind() {
            ErrorKind::Invariant { context, message } => {
                assert_eq!(context, "check");
                assert!(message.contains("value <= limit"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_verify_invariant_formats_message() {
        let err = check(10, 7).unwrap_err();
        match err.kind() {
            ErrorKind::Invariant { message, .. } => {
                assert!(message.contains("value 7"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
