use thiserror::Error;

#[derive(Error, Debug)]
pub enum AmqpError {
    #[error("Lapin error, {0}")]
    LapinError(#[from] lapin::Error),
    #[error("failed to connect to broker after {attempts} attempts: {last}")]
    ConnectExhausted { attempts: u32, last: String },
    #[error("broker rejected message for queue {0}")]
    Nacked(String),
}
