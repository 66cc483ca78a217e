// Home Exit Monitor Android JNI Library
// Exposes the home-exit monitor core to Kotlin via JNI

pub mod android_jni;
pub mod error;

pub use error::{BindingError, JResult};

/// Route `log` output to logcat; safe to call more than once
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        let _ = android_log::init("HomeMonitor");
    }
}
