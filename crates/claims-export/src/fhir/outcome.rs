use std::error::Error;

use serde_json::{json, Value};

pub const OPERATION_OUTCOME_RESOURCE_TYPE: &str = "OperationOutcome";

/// Builds an `OperationOutcome` carrying one error issue with `message` as
/// its details text.
pub fn error_outcome(message: &str) -> Value {
    json!({
        "resourceType": OPERATION_OUTCOME_RESOURCE_TYPE,
        "issue": [{
            "severity": "error",
            "code": "exception",
            "details": {"text": message}
        }]
    })
}

/// Message of the innermost error in the `source()` chain.
pub fn root_cause_message(error: &(dyn Error + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Serializes an error outcome for `error` as a single line, without the
/// trailing newline.
pub fn error_line(error: &(dyn Error + 'static)) -> String {
    error_outcome(&root_cause_message(error)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failure")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_root_cause_is_innermost() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert_eq!(root_cause_message(&err), "disk gone");
    }

    #[test]
    fn test_error_outcome_shape() {
        let outcome = error_outcome("boom");
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert_eq!(outcome["issue"][0]["severity"], "error");
        assert_eq!(outcome["issue"][0]["code"], "exception");
        assert_eq!(outcome["issue"][0]["details"]["text"], "boom");
    }

    #[test]
    fn test_error_line_is_single_line() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "a\nb");
        let line = error_line(&err);
        assert!(!line.contains('\n'));
        assert!(line.contains("a\\nb"));
    }
}
