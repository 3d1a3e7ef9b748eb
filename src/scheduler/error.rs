use crate::model::RoomId;

#[derive(Debug)]
pub enum SchedulerError {
    /// The intake queue stayed full for the whole submit timeout; the request was dropped.
    SubmitTimeout(RoomId),
    /// The intake worker is gone.
    Closed,
    AlreadyStarted,
    Persistence(String),
    InvalidConfig(&'static str),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::SubmitTimeout(room) => {
                write!(f, "intake queue full, request for room {room} dropped")
            }
            SchedulerError::Closed => write!(f, "scheduler intake closed"),
            SchedulerError::AlreadyStarted => write!(f, "scheduler workers already started"),
            SchedulerError::Persistence(e) => write!(f, "persistence error: {e}"),
            SchedulerError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for SchedulerError {}
