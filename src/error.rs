pub type Result<T> = std::result::Result<T, Error>;

/// Failures that can surface while building or tearing down the runtime.
///
/// Steady-state operations (acquire, yield, produce, consume) have no error
/// channel: misuse there is a programming error and panics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }
}
