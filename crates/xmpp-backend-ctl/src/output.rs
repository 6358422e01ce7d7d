use std::process::Output;

use xmpp_backend_core::ejabberd::RawSession;
use xmpp_backend_core::{Result, XmppBackendError};

/// Exit code of `ejabberdctl` when the node is not running.
pub(crate) const EXIT_NODE_DOWN: i32 = 3;

/// Captured result of one `ejabberdctl` run.
#[derive(Debug)]
pub(crate) struct CtlOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CtlOutput {
    /// Classify a finished process. Node-down and signal terminations are
    /// connection errors, every other exit code is returned as is.
    pub fn from_output(command: &str, output: Output) -> Result<Self> {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        match output.status.code() {
            Some(EXIT_NODE_DOWN) => Err(XmppBackendError::connection(format!(
                "{}: node is not running: {}",
                command,
                stdout.trim()
            ))),
            Some(code) => Ok(Self {
                code,
                stdout,
                stderr,
            }),
            None => Err(XmppBackendError::connection(format!(
                "{} was terminated by a signal",
                command
            ))),
        }
    }

    /// `BackendError` carrying whatever the command printed.
    pub fn error(&self, command: &str) -> XmppBackendError {
        let message = match self.stderr.trim() {
            "" => self.stdout.trim(),
            stderr => stderr,
        };
        XmppBackendError::backend(format!("{} exited with {}: {}", command, self.code, message))
    }

    pub fn expect_success(&self, command: &str) -> Result<()> {
        match self.code {
            0 => Ok(()),
            _ => Err(self.error(command)),
        }
    }

    /// `0` is yes, `1` is no.
    pub fn yes_no(&self, command: &str) -> Result<bool> {
        match self.code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(self.error(command)),
        }
    }

    /// Non-empty stdout lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// Parse a tab-separated session line.
///
/// `user_sessions_info` prints
/// `connection ip port priority node uptime status resource statustext`;
/// `connected_users_info` prefixes that with the full JID.
pub(crate) fn parse_session_line(line: &str) -> Result<RawSession<'_>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(XmppBackendError::backend(format!(
            "Could not parse session line: {}",
            line
        )));
    }

    let number = |value: &str| -> Result<i64> {
        value.trim().parse().map_err(|_| {
            XmppBackendError::backend(format!("Invalid number {:?} in session line", value))
        })
    };

    Ok(RawSession {
        connection: fields[0],
        ip: fields[1],
        // ejabberd prints `nil` for sessions without presence.
        priority: fields[3].trim().parse().unwrap_or_default(),
        uptime: number(fields[5])?,
        status: fields[6],
        resource: fields[7],
        status_text: fields.get(8).copied().unwrap_or_default(),
    })
}

/// Split `jid\t<session fields>` as printed by `connected_users_info`.
pub(crate) fn split_connected_line(line: &str) -> Result<(&str, &str)> {
    line.split_once('\t').ok_or_else(|| {
        XmppBackendError::backend(format!("Could not parse session line: {}", line))
    })
}
