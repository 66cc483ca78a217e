use crate::error::{throw_java_exception, BindingError, JResult};
use home_exit_monitor::{
    run_background_task, AppLifecycle, Decision, ForegroundTracker, JsonFileStore, KeyValueStore,
    MonitorConfig, PermissionStatus, Position, RecordingSink, TrackerEvent,
};
use jni::objects::{JClass, JDoubleArray, JString};
use jni::sys::{jboolean, jdouble, jint, jstring, JNI_FALSE};
use jni::JNIEnv;
use std::sync::{Arc, Mutex};

/// Doubles per fix in the background batch array: lat, lon, accuracy, speed
const FIX_STRIDE: usize = 4;

struct NativeMonitor {
    store_path: String,
    store: Arc<dyn KeyValueStore>,
    config: MonitorConfig,
    sink: Arc<RecordingSink>,
    tracker: ForegroundTracker,
}

// Process-wide monitor; the foreground activity and the background location
// task both reach it through these entry points.
lazy_static::lazy_static! {
    static ref MONITOR: Mutex<Option<NativeMonitor>> = Mutex::new(None);
}

fn with_monitor<T, F>(f: F) -> JResult<T>
where
    F: FnOnce(&mut NativeMonitor) -> JResult<T>,
{
    let mut guard = MONITOR
        .lock()
        .map_err(|_| BindingError::Internal("Failed to acquire monitor lock".to_string()))?;
    let monitor = guard.as_mut().ok_or(BindingError::NotInitialized)?;
    f(monitor)
}

/// Negative accuracy/speed from the Kotlin side means "not reported"
fn optional(value: f64) -> Option<f64> {
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

fn fix_from_parts(latitude: f64, longitude: f64, accuracy: f64, speed: f64) -> Position {
    Position {
        latitude,
        longitude,
        accuracy_meters: optional(accuracy),
        speed_mps: optional(speed),
    }
}

/// Empty text means "no config supplied"
fn parse_config(text: &str) -> JResult<Option<MonitorConfig>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let config: MonitorConfig = serde_json::from_str(text)
        .map_err(|e| BindingError::InvalidParameters(format!("config: {}", e)))?;
    config.validate()?;
    Ok(Some(config))
}

fn return_string(env: &mut JNIEnv, result: JResult<String>) -> jstring {
    match result {
        Ok(text) => match env.new_string(&text) {
            Ok(jstr) => jstr.into_raw(),
            Err(_) => {
                let _ = throw_java_exception(
                    env,
                    &BindingError::JniError("Failed to create Java string".to_string()),
                );
                std::ptr::null_mut()
            }
        },
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            std::ptr::null_mut()
        }
    }
}

fn return_code(env: &mut JNIEnv, result: JResult<jint>) -> jint {
    match result {
        Ok(code) => code,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

/// JNI: Open the persisted state and build the monitor
/// Parameters: storePath (JSON state file), configJson (may be empty for defaults)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeInit(
    mut env: JNIEnv,
    _class: JClass,
    store_path: JString,
    config_json: JString,
) -> jint {
    let result = init_impl(&mut env, &store_path, &config_json).map(|_| 0);
    return_code(&mut env, result)
}

fn init_impl(env: &mut JNIEnv, store_path: &JString, config_json: &JString) -> JResult<()> {
    crate::init_logging();

    let path: String = env.get_string(store_path)?.into();
    let config_text: String = env.get_string(config_json)?.into();

    let mut guard = MONITOR
        .lock()
        .map_err(|_| BindingError::Internal("Failed to acquire monitor lock".to_string()))?;

    let config = parse_config(&config_text)?;

    // The background task re-enters here in a live process; keep the running tracker
    if let Some(existing) = guard.as_mut() {
        if existing.store_path == path {
            if let Some(config) = config {
                if config != existing.config {
                    log::info!("Applying updated monitor config");
                    existing.tracker.reconfigure(config.clone());
                    existing.config = config;
                }
            }
            return Ok(());
        }
    }
    let config = config.unwrap_or_default();

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&path)?);
    let sink = Arc::new(RecordingSink::new());
    let tracker = ForegroundTracker::new(store.clone(), config.clone(), sink.clone());

    *guard = Some(NativeMonitor {
        store_path: path.clone(),
        store,
        config,
        sink,
        tracker,
    });
    log::info!("Home monitor initialized with store {}", path);
    Ok(())
}

/// JNI: Report location permission state
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeSetPermission(
    mut env: JNIEnv,
    _class: JClass,
    granted: jboolean,
) -> jint {
    let permission = if granted != JNI_FALSE {
        PermissionStatus::Granted
    } else {
        PermissionStatus::Denied
    };
    let result = send_event(TrackerEvent::Permission(permission)).map(|_| 0);
    return_code(&mut env, result)
}

/// JNI: Report activity visibility (true = foreground)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeSetForeground(
    mut env: JNIEnv,
    _class: JClass,
    foreground: jboolean,
) -> jint {
    let lifecycle = if foreground != JNI_FALSE {
        AppLifecycle::Foreground
    } else {
        AppLifecycle::Background
    };
    let result = send_event(TrackerEvent::Lifecycle(lifecycle)).map(|_| 0);
    return_code(&mut env, result)
}

/// JNI: Foreground location update
/// Parameters: latitude, longitude, accuracy (m, <0 if unknown), speed (m/s, <0 if unknown)
/// Returns: 1 if a "left home" alert is pending, 0 otherwise, -1 on error
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeOnLocation(
    mut env: JNIEnv,
    _class: JClass,
    latitude: jdouble,
    longitude: jdouble,
    accuracy: jdouble,
    speed: jdouble,
) -> jint {
    let fix = fix_from_parts(latitude, longitude, accuracy, speed);
    let result = send_event(TrackerEvent::Fix(fix)).map(|decision| match decision {
        Decision::Alert { .. } => 1,
        Decision::None => 0,
    });
    return_code(&mut env, result)
}

fn send_event(event: TrackerEvent) -> JResult<Decision> {
    with_monitor(|monitor| Ok(monitor.tracker.handle(event)?))
}

/// JNI: Batch delivered by the background location task
/// Parameters: flat array [lat, lon, accuracy, speed, lat, lon, ...]
/// Returns: number of alerts raised, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeOnBackgroundLocations(
    mut env: JNIEnv,
    _class: JClass,
    fixes: JDoubleArray,
) -> jint {
    let result = on_background_locations_impl(&mut env, &fixes);
    return_code(&mut env, result)
}

fn on_background_locations_impl(env: &mut JNIEnv, fixes: &JDoubleArray) -> JResult<jint> {
    let len = env.get_array_length(fixes)? as usize;
    if len % FIX_STRIDE != 0 {
        return Err(BindingError::InvalidParameters(format!(
            "fix array length {} is not a multiple of {}",
            len, FIX_STRIDE
        )));
    }
    let mut raw = vec![0.0f64; len];
    env.get_double_array_region(fixes, 0, &mut raw)?;

    let positions: Vec<Position> = raw
        .chunks_exact(FIX_STRIDE)
        .map(|c| fix_from_parts(c[0], c[1], c[2], c[3]))
        .collect();

    with_monitor(|monitor| {
        let decisions = run_background_task(
            monitor.store.clone(),
            monitor.config.clone(),
            monitor.sink.clone(),
            &positions,
        );
        Ok(decisions.iter().filter(|d| d.is_alert()).count() as jint)
    })
}

/// JNI: Drain pending alerts for the notification layer
/// Returns: JSON array of alerts
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeTakeAlertsJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_monitor(|monitor| {
        serde_json::to_string(&monitor.sink.take())
            .map_err(|e| BindingError::Internal(format!("JSON serialization failed: {}", e)))
    });
    return_string(&mut env, result)
}

/// JNI: Use the latest foreground fix as home
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeSetHomeHere(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = send_event(TrackerEvent::SetHome).map(|_| 0);
    return_code(&mut env, result)
}

/// JNI: User reset of the one-shot alert
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeReset(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = send_event(TrackerEvent::Reset).map(|_| 0);
    return_code(&mut env, result)
}

/// JNI: Change the home zone radius (meters)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeSetThreshold(
    mut env: JNIEnv,
    _class: JClass,
    meters: jdouble,
) -> jint {
    let result = send_event(TrackerEvent::SetThreshold(meters)).map(|_| 0);
    return_code(&mut env, result)
}

/// JNI: Current status snapshot
/// Returns: JSON object (distance, threshold, alert state, permission, counters)
#[no_mangle]
pub extern "C" fn Java_com_example_homemonitor_JniBinding_nativeStatusJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_monitor(|monitor| {
        serde_json::to_string(monitor.tracker.status())
            .map_err(|e| BindingError::Internal(format!("JSON serialization failed: {}", e)))
    });
    return_string(&mut env, result)
}
