pub mod api;
pub mod events;
pub mod models;

/// Current wall-clock time as epoch milliseconds, the unit used on the wire.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
