// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for the command-line entry point

use std::process::exit;

/// Represents a fatal error in a command-line program
#[derive(Debug)]
pub enum CmdError {
    /// incorrect command-line arguments
    Usage(String),
    /// all other errors
    Failure(anyhow::Error),
}

impl CmdError {
    fn exit_code(&self) -> i32 {
        match self {
            CmdError::Usage(_) => 2,
            CmdError::Failure(_) => 1,
        }
    }

    fn message(&self) -> String {
        match self {
            CmdError::Usage(message) => message.clone(),
            // The alternate form includes every cause in the chain.
            CmdError::Failure(error) => format!("{:#}", error),
        }
    }
}

/// Exits the current process on a fatal error
pub fn fatal(cmd_error: CmdError) -> ! {
    let arg0_passed = std::env::args().next();
    let arg0 = arg0_passed
        .as_deref()
        .and_then(|arg0| camino::Utf8Path::new(arg0).file_name())
        .unwrap_or("vrrp-failover");
    eprintln!("{}: {}", arg0, cmd_error.message());
    exit(cmd_error.exit_code());
}
