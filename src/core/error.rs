//! Purpose: Single structured error type shared by the ledger client, CLI, and server.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Carry a stable kind plus optional context (hint, record index, RPC method/code).
//! Invariants: Exit codes per kind never change once published.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Unavailable,
    Io,
    Rejected,
    Decode,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    index: Option<u64>,
    method: Option<String>,
    rpc_code: Option<i64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            index: None,
            method: None,
            rpc_code: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Ledger record index the failure was observed at, if any.
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn rpc_code(&self) -> Option<i64> {
        self.rpc_code
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_rpc_code(mut self, code: i64) -> Self {
        self.rpc_code = Some(code);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(method) = &self.method {
            write!(f, " (method: {method})")?;
        }
        if let Some(code) = self.rpc_code {
            write!(f, " (code: {code})")?;
        }
        if let Some(index) = self.index {
            write!(f, " (index: {index})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Unavailable => 3,
        ErrorKind::Io => 4,
        ErrorKind::Rejected => 5,
        ErrorKind::Decode => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Unavailable, 3),
            (ErrorKind::Io, 4),
            (ErrorKind::Rejected, 5),
            (ErrorKind::Decode, 6),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_rpc_context() {
        let err = Error::new(ErrorKind::Rejected)
            .with_message("execution reverted")
            .with_method("eth_sendTransaction")
            .with_rpc_code(3)
            .with_index(7);
        assert_eq!(
            err.to_string(),
            "Rejected: execution reverted (method: eth_sendTransaction) (code: 3) (index: 7)"
        );
    }
}
