use home_exit_monitor::MonitorError;
use jni::JNIEnv;
use thiserror::Error;

/// Errors surfaced across the JNI boundary
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Monitor not initialized (call nativeInit first)")]
    NotInitialized,

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<jni::errors::Error> for BindingError {
    fn from(err: jni::errors::Error) -> Self {
        BindingError::JniError(err.to_string())
    }
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, BindingError>;

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &BindingError) -> JResult<()> {
    let exception_class = match error {
        BindingError::NotInitialized => "java/lang/IllegalStateException",
        BindingError::InvalidParameters(_)
        | BindingError::Monitor(MonitorError::InvalidThreshold(_))
        | BindingError::Monitor(MonitorError::InvalidPosition(_))
        | BindingError::Monitor(MonitorError::ConfigError(_)) => {
            "java/lang/IllegalArgumentException"
        }
        BindingError::Monitor(MonitorError::NoFix)
        | BindingError::Monitor(MonitorError::HomeNotSet) => "java/lang/IllegalStateException",
        BindingError::Monitor(MonitorError::StorageError(_))
        | BindingError::Monitor(MonitorError::CorruptValue { .. }) => "java/io/IOException",
        BindingError::Monitor(MonitorError::Internal(_))
        | BindingError::JniError(_)
        | BindingError::Internal(_) => "java/lang/RuntimeException",
    };

    let message = error.to_string();
    env.throw_new(exception_class, message)
        .map_err(|_| BindingError::JniError("Failed to throw exception".to_string()))?;

    Ok(())
}
