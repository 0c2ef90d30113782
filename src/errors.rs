// Copyright 2025 Cornell University
// released under MIT License

use thiserror::Error;

/// Fatal errors: compilation stops and no output is produced.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("failed to perform i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse `{filename}`: {message}")]
    Parse { filename: String, message: String },
}

pub type Result<T> = std::result::Result<T, CompileError>;
