//! Terminal I/O utilities for CLI.
//!
//! Provides TTY detection and user prompting.

use crate::error::{Error, ErrorCode, Result};
use crate::ssh::PassphrasePrompt;
use std::io::{self, BufRead, IsTerminal, Write};

pub fn is_stdin_tty() -> bool {
    io::stdin().is_terminal()
}

pub fn prompt(message: &str) -> Result<String> {
    eprint!("{}", message);
    io::stderr().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line).map_err(|e| {
        Error::new(
            ErrorCode::InternalIoError,
            format!("Failed to read input: {}", e),
            serde_json::Value::Null,
        )
    })?;

    Ok(line.trim().to_string())
}

pub fn prompt_password(message: &str) -> Result<String> {
    prompt(message)
}

/// Asks the operator for their private key passphrase on stdin.
pub struct StdinPassphrase;

impl PassphrasePrompt for StdinPassphrase {
    fn ask(&mut self) -> Result<String> {
        prompt_password("What is your private SSH key passphrase? ")
    }
}
