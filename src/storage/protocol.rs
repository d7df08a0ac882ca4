//! Storage Wire Protocol
//!
//! Defines the command vocabulary shared by clients, the coordinator and the shard nodes.
//!
//! The protocol is line-oriented: a header made of newline-terminated fields, optionally
//! followed by a raw body. Bodies carry no length; the sender half-closes its side of the
//! connection to mark the end.

use std::fmt;

// --- Command keywords ---

/// Store a file. Header fields follow on the same line or on the next two lines.
pub const CMD_UPLOAD: &str = "ufile";
/// Fetch a file.
pub const CMD_DOWNLOAD: &str = "dfile";
/// Remove a file.
pub const CMD_DELETE: &str = "rmfile";
/// Fetch an archive of one category.
pub const CMD_ARCHIVE: &str = "dtar";
/// List the files under a directory.
pub const CMD_LIST: &str = "display";

// --- Framing ---

/// Size of every chunk moved by a relay.
pub const CHUNK_SIZE: usize = 1024;

/// Longest header line a node reads, newline included. Longer lines are malformed.
pub const MAX_HEADER_LINE: usize = 4096;

/// Prefix of every failure line. Callers check for it before treating a response as data.
pub const ERROR_PREFIX: &str = "Error: ";

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload {
        filename: String,
        destination: String,
    },
    Download(String),
    Delete(String),
    Archive(String),
    List(String),
}

/// Result of parsing one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Ready(Command),
    /// A bare `ufile` line: filename and destination arrive on the next two lines.
    UploadHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("'{keyword}' expects {expected} argument(s), got {found}")]
    Arity {
        keyword: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("header line longer than {0} bytes")]
    LineTooLong(usize),
}

/// Parses a single header line (without its newline).
pub fn parse_line(line: &str) -> Result<Parsed, ParseError> {
    let mut words = line.split_whitespace();
    let keyword = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let expect = |keyword: &'static str, expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ParseError::Arity {
                keyword,
                expected,
                found: args.len(),
            })
        }
    };

    let command = match keyword {
        CMD_UPLOAD if args.is_empty() => return Ok(Parsed::UploadHeader),
        CMD_UPLOAD => {
            expect(CMD_UPLOAD, 2)?;
            Command::Upload {
                filename: args[0].to_string(),
                destination: args[1].to_string(),
            }
        }
        CMD_DOWNLOAD => {
            expect(CMD_DOWNLOAD, 1)?;
            Command::Download(args[0].to_string())
        }
        CMD_DELETE => {
            expect(CMD_DELETE, 1)?;
            Command::Delete(args[0].to_string())
        }
        CMD_ARCHIVE => {
            expect(CMD_ARCHIVE, 1)?;
            Command::Archive(args[0].to_string())
        }
        CMD_LIST => {
            expect(CMD_LIST, 1)?;
            Command::List(args[0].to_string())
        }
        other => return Err(ParseError::Unknown(other.to_string())),
    };

    Ok(Parsed::Ready(command))
}

impl Command {
    /// The header as a client sends it. Uploads use the multi-line shape.
    pub fn header(&self) -> String {
        match self {
            Command::Upload {
                filename,
                destination,
            } => format!("{}\n{}\n{}\n", CMD_UPLOAD, filename, destination),
            Command::Download(path) => format!("{} {}\n", CMD_DOWNLOAD, path),
            Command::Delete(path) => format!("{} {}\n", CMD_DELETE, path),
            Command::Archive(ext) => format!("{} {}\n", CMD_ARCHIVE, ext),
            Command::List(path) => format!("{} {}\n", CMD_LIST, path),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Upload { .. } => CMD_UPLOAD,
            Command::Download(_) => CMD_DOWNLOAD,
            Command::Delete(_) => CMD_DELETE,
            Command::Archive(_) => CMD_ARCHIVE,
            Command::List(_) => CMD_LIST,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Upload {
                filename,
                destination,
            } => write!(f, "{} {} {}", CMD_UPLOAD, filename, destination),
            Command::Download(p) | Command::Delete(p) | Command::Archive(p) | Command::List(p) => {
                write!(f, "{} {}", self.keyword(), p)
            }
        }
    }
}

/// Header a coordinator sends in front of a forwarded upload body.
pub fn store_header(filename: &str, destination: &str) -> String {
    format!("{}\n{}\n", filename, destination)
}

pub fn error_line(err: impl fmt::Display) -> String {
    format!("{}{}\n", ERROR_PREFIX, err)
}

pub fn status_line(message: impl fmt::Display) -> String {
    format!("{}\n", message)
}
