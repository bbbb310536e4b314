mod common;
mod edns;
mod enums;
mod header;
mod message;
mod question;
mod record;

pub use common::*;
pub use edns::*;
pub use enums::*;
pub use header::*;
pub use message::*;
pub use question::*;
pub use record::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of message")]
    UnexpectedEof,
    #[error("invalid label")]
    InvalidLabel,
    #[error("compression pointer loop")]
    PointerLoop,
    #[error("invalid OPT record")]
    InvalidOpt,
    #[error("message too short")]
    TooShort,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
