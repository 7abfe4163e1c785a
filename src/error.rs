use crate::registers;
use std::{convert::From, fmt};

/// Error type shared by the loaders, the executor and the verifier.
/// Translation itself never fails; guest faults are emitted as traps.
pub struct Error {
    pub kind: ErrorKind,
    pub ctx: Option<registers::Set>,
    pub msg: String,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// malformed image, hex record or program text
    Format,
    /// access outside guest or host memory
    Memory,
    /// underlying io error
    IO,
    /// guest trap, executor fault or untranslatable code
    Runtime,
    /// translated code disagrees with the reference model
    Verify,
    /// TestCriterion evaluated to false
    Test,
    /// catch-all for other errors
    General,
}

impl Error {
    pub fn new(kind: ErrorKind, ctx: Option<registers::Set>, message: &str) -> Error {
        Error {
            kind,
            ctx,
            msg: String::from(message),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self { Error::new(ErrorKind::IO, None, e.to_string().as_str()) }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}: {}", red!("m68k::Error"), self.msg) }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut res = write!(f, "{}", self.msg);
        if res.is_ok() {
            if let Some(ctx) = self.ctx {
                res = write!(f, "\nContext: {} -> ({})", ctx, ctx.ccr());
            }
        }
        res
    }
}
impl std::error::Error for Error {}
