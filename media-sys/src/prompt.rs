// SPDX-License-Identifier: GPL-3.0-only

//! Interactive passphrase entry with the terminal echo turned off

use std::io::{self, BufRead, Write};
use std::sync::OnceLock;

use media_types::is_valid_passphrase;
use media_types::messages;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::cmd::CommandRunner;
use crate::encrypt::check_passphrase_strength;
use crate::{Result, SysError};

/// Terminal state from before the first prompt, read by the signal handler.
static SAVED_TERMINAL: OnceLock<libc::termios> = OnceLock::new();

extern "C" fn restore_terminal(signal: libc::c_int) {
    if let Some(saved) = SAVED_TERMINAL.get() {
        // SAFETY: tcsetattr and _exit are async-signal-safe and `saved` is
        // never written again once set.
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, saved);
        }
    }
    unsafe { libc::_exit(128 + signal) }
}

/// Echo is off while this is alive; SIGINT and SIGTERM put the terminal back
/// before the process dies.
struct EchoOff {
    original: Termios,
    previous: Vec<(Signal, SigAction)>,
}

impl EchoOff {
    fn new() -> Result<Self> {
        let stdin = io::stdin();
        let original = termios::tcgetattr(&stdin)
            .map_err(|e| SysError::Passphrase(format!("cannot read terminal settings: {e}")))?;
        SAVED_TERMINAL.get_or_init(|| original.clone().into());

        let handler = SigAction::new(
            SigHandler::Handler(restore_terminal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let mut previous = Vec::new();
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only calls async-signal-safe functions.
            match unsafe { sigaction(signal, &handler) } {
                Ok(old) => previous.push((signal, old)),
                Err(e) => tracing::warn!("cannot watch {signal}: {e}"),
            }
        }

        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &silent)
            .map_err(|e| SysError::Passphrase(format!("cannot turn off echo: {e}")))?;

        Ok(Self { original, previous })
    }
}

impl Drop for EchoOff {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original) {
            tracing::warn!("could not restore terminal settings: {e}");
        }
        for (signal, action) in self.previous.drain(..) {
            // SAFETY: reinstalls the disposition that was in place before.
            if let Err(e) = unsafe { sigaction(signal, &action) } {
                tracing::warn!("could not restore {signal} handler: {e}");
            }
        }
    }
}

fn read_hidden(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;

    let _echo = EchoOff::new()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    println!();

    if read == 0 {
        return Err(SysError::Passphrase("no passphrase entered".to_string()));
    }
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Ask for the encryption passphrase until a strong one is entered twice.
pub fn ask_passphrase(runner: &dyn CommandRunner) -> Result<String> {
    loop {
        let phrase = read_hidden(&messages::passphrase_prompt())?;
        if let Err(message) = is_valid_passphrase(&phrase)
            .and_then(|()| check_passphrase_strength(runner, &phrase))
        {
            println!("{message}");
            continue;
        }

        let confirm = read_hidden(&messages::passphrase_confirm())?;
        if phrase == confirm {
            return Ok(phrase);
        }
        println!("{}", messages::passphrase_mismatch());
    }
}
