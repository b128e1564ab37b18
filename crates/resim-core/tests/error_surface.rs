use resim_core::errors::{ErrorInfo, InferError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("node", "n3")
        .with_context("reason", "example")
}

#[test]
fn config_error_surface() {
    let err = InferError::Config(sample_info("C001", "illegal block"));
    assert_eq!(err.info().code, "C001");
    assert!(err.info().context.contains_key("node"));
    assert!(!err.is_recoverable());
}

#[test]
fn procedure_errors_are_recoverable() {
    let err = InferError::procedure("P001", "negative scale").with_context("sigma", -1.0);
    assert!(err.is_recoverable());
    assert_eq!(err.info().context.get("sigma").map(String::as_str), Some("-1"));
}

#[test]
fn error_json_roundtrip() {
    let err = InferError::NoStaticBound(sample_info("B001", "unresolved observation").with_hint("use mh"));
    let json = serde_json::to_string(&err).unwrap();
    assert!(json.contains("\"family\":\"NoStaticBound\""));
    let back: InferError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
    assert!(err.to_string().contains("hint: use mh"));
}
