//! Decoding of the wait-status word the fork server reports for each run.

/// Synthetic status produced by the driver when a run exceeds its time
/// budget. Shares its numeric value with SIGKILL, which is why the timeout
/// test must come before the crash-signal test.
pub const TIMEOUT_STATUS: i32 = 9;

/// Signals treated as crashes: HUP, INT, QUIT, ILL, ABRT, BUS, FPE, KILL,
/// SEGV, PIPE, ALRM, TERM, XCPU, XFSZ, SYS.
const CRASH_SIGNALS: [i32; 15] = [1, 2, 3, 4, 6, 7, 8, 9, 11, 13, 14, 15, 24, 25, 31];

/// What one target execution amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Clean exit, whatever the exit code.
    Normal,
    /// Death by a crash signal or with a core dump.
    Crash { signal: i32, core_dump: bool },
    /// The driver had to kill the run.
    Timeout,
}

/// Classifies a status word as reported by the driver.
///
/// Unix convention: bit 0x80 is the core-dump flag, the low 7 bits carry the
/// terminating signal when the process died from one.
pub fn classify(status: i32) -> ExitClass {
    if status == TIMEOUT_STATUS {
        return ExitClass::Timeout;
    }
    let signal = status & 0x7f;
    let core_dump = status & 0x80 != 0;
    if (signal != 0 && CRASH_SIGNALS.contains(&signal)) || core_dump {
        ExitClass::Crash { signal, core_dump }
    } else {
        ExitClass::Normal
    }
}

/// Human-readable name of a crash signal, for the session log.
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        6 => "SIGABRT",
        7 => "SIGBUS",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        24 => "SIGXCPU",
        25 => "SIGXFSZ",
        31 => "SIGSYS",
        _ => "unknown signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segfault_with_core_is_a_crash() {
        // 0x8B: SIGSEGV plus the core-dump bit
        assert_eq!(
            classify(139),
            ExitClass::Crash {
                signal: 11,
                core_dump: true
            }
        );
    }

    #[test]
    fn clean_exit_is_normal() {
        assert_eq!(classify(0), ExitClass::Normal);
    }

    #[test]
    fn non_crash_exit_codes_are_normal() {
        // exited with code 1: status 0x0100, low byte clear
        assert_eq!(classify(0x0100), ExitClass::Normal);
    }

    #[test]
    fn driver_timeout_sentinel_is_never_a_crash() {
        assert_eq!(classify(TIMEOUT_STATUS), ExitClass::Timeout);
    }

    #[test]
    fn abort_without_core_is_a_crash() {
        assert_eq!(
            classify(6),
            ExitClass::Crash {
                signal: 6,
                core_dump: false
            }
        );
    }

    #[test]
    fn core_dump_bit_alone_is_a_crash() {
        assert_eq!(
            classify(0x80),
            ExitClass::Crash {
                signal: 0,
                core_dump: true
            }
        );
    }

    #[test]
    fn stopped_style_signals_are_not_crashes() {
        // SIGCHLD (17) and SIGCONT (18) are not in the crash set
        assert_eq!(classify(17), ExitClass::Normal);
        assert_eq!(classify(18), ExitClass::Normal);
    }
}
