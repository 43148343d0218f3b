//! Engine error taxonomy.
//!
//! Construction and lowering errors surface before anything runs. Per-lane
//! failures (`LaneUndefined`) are returned from single invocations and are
//! turned into sentinels by the kernel engine. `Compile` and `Resource`
//! always propagate to the caller.

/// Errors raised by graph construction, lowering, delivery and execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Incompatible input shapes for an operation.
    #[error("shape error: {0}")]
    Shape(String),

    /// An operation kind a lowering or backend cannot express.
    #[error("unsupported operation '{kind}' at {site}")]
    Unsupported { kind: String, site: String },

    /// A backend refused to build an artifact.
    #[error("compile error: {0}")]
    Compile(String),

    /// Invocation values do not match the recorded argument bindings.
    #[error("argument error: {0}")]
    Argument(String),

    /// Record index outside a buffer.
    #[error("index {index} out of bounds (count: {count})")]
    Index { index: usize, count: usize },

    /// Unreadable or invalid policy configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A backend resource or session is unavailable.
    #[error("resource error: {0}")]
    Resource(String),

    /// An API used out of its lifecycle (e.g. invoke after dispose).
    #[error("usage error: {0}")]
    Usage(String),

    /// A lane whose value is undefined (failed guard, gather out of range).
    #[error("lane undefined: {0}")]
    LaneUndefined(String),
}

impl EngineError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn unsupported(kind: impl Into<String>, site: impl Into<String>) -> Self {
        Self::Unsupported {
            kind: kind.into(),
            site: site.into(),
        }
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn undefined(msg: impl Into<String>) -> Self {
        Self::LaneUndefined(msg.into())
    }

    /// True for errors that only affect a single lane of a batch.
    pub fn is_lane_local(&self) -> bool {
        matches!(self, Self::LaneUndefined(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = EngineError::Index { index: 7, count: 3 };
        assert_eq!(e.to_string(), "index 7 out of bounds (count: 3)");

        let e = EngineError::unsupported("reduce product", "v4");
        assert_eq!(e.to_string(), "unsupported operation 'reduce product' at v4");

        assert_eq!(
            EngineError::compile("no f64").to_string(),
            "compile error: no f64"
        );
    }

    #[test]
    fn test_lane_local() {
        assert!(EngineError::undefined("miss").is_lane_local());
        assert!(!EngineError::resource("no adapter").is_lane_local());
        assert!(!EngineError::shape("mismatch").is_lane_local());
    }
}
