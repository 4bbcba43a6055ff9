//! Small internal helpers shared across subsystems.

/// Classifies an I/O error as an effective peer-close. The pool watchdog
/// (§4.D) treats these the same as a clean EOF: cancel the idle timer and
/// remove the connection.
pub fn is_remote_closed_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}
