#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("event sink {sink} failed: {message}")]
    SinkFailed { sink: &'static str, message: String },
    #[error("event sink {sink} is closed")]
    Closed { sink: &'static str },
}
