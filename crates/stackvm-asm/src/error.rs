//! `Location`, `ParseError`, and the `err!` convenience macro, in the
//! shape of `cranelift-reader`'s own error type: a location plus a
//! message, convertible into the core's input-error taxonomy.

use std::fmt;

use stackvm_core::error::InputError;

/// The location of a scanned line. Lines are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line_number: usize,
}

#[derive(Debug)]
pub struct ParseError {
    pub location: Location,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location.line_number, self.message)
    }
}

impl From<ParseError> for InputError {
    fn from(e: ParseError) -> Self {
        InputError::Parse {
            line: e.location.line_number,
            message: e.message,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

macro_rules! err {
    ( $loc:expr, $msg:expr ) => {
        Err($crate::error::ParseError {
            location: $loc,
            message: $msg.to_string(),
        })
    };

    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::error::ParseError {
            location: $loc,
            message: format!( $fmt, $( $arg ),+ ),
        })
    };
}

pub(crate) use err;
