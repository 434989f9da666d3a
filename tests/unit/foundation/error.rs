use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        LumaError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(LumaError::backend("x").to_string().contains("backend error:"));
    assert!(LumaError::queue("x").to_string().contains("queue error:"));
    let shader: LumaError = ShaderCompileError::new("blend", "unbalanced `{`").into();
    assert!(shader.to_string().contains("shader compile error:"));
}

#[test]
fn shader_error_keeps_diagnostic_text() {
    let err = ShaderCompileError::new("lookup", "missing entry point `fs_main`");
    assert_eq!(err.label, "lookup");
    assert!(err.to_string().contains("missing entry point `fs_main`"));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = LumaError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
