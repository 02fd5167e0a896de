use thiserror::Error;

/// Errors surfaced while building GPU resources.
///
/// All variants are fatal at construction time; `step()` never errors.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("required GPU capability missing: {0}")]
    ExtensionMissing(String),
    #[error("shader compilation failed in `{stage}`: {log}")]
    ShaderCompileFailed { stage: String, log: String },
    #[error("pipeline link failed in `{stage}`: {log}")]
    ProgramLinkFailed { stage: String, log: String },
    #[error("incomplete framebuffer in `{stage}`: {reason}")]
    FramebufferIncomplete { stage: String, reason: String },
    #[error("GPU allocation failed in `{stage}`: {log}")]
    AllocationFailed { stage: String, log: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("initialization error: {0}")]
    InitializationError(#[from] InitializationError),
}

#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("Failed to find a compatible GPU adapter")]
    AdapterError(#[from] wgpu::RequestAdapterError),
    #[error("Failed to create device")]
    DeviceError(#[from] wgpu::RequestDeviceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Story: error variants format messages and From conversions work.
    #[test]
    fn resource_error_variants_and_from() {
        let e = ResourceError::ExtensionMissing("float blending".into());
        assert!(e.to_string().contains("float blending"));

        let e = ResourceError::ShaderCompileFailed {
            stage: "traverse".into(),
            log: "unexpected token".into(),
        };
        let s = e.to_string();
        assert!(s.contains("traverse"));
        assert!(s.contains("unexpected token"));

        let e = ResourceError::InvalidInput("positions length".into());
        assert!(matches!(e, ResourceError::InvalidInput(_)));
    }
}
