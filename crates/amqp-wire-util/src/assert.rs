/// Aborts the process unconditionally, in every build profile.
///
/// Unlike a recoverable assertion, this is for programmer-error
/// conditions that the caller has no business recovering from: the
/// condition means the connection state machine has been driven from
/// the wrong state, and continuing would operate on buffers that are
/// not in the shape the rest of the engine assumes. Logs via
/// `tracing::error!` first so the abort shows up in whatever sink the
/// caller has configured, then calls `std::process::abort()`
/// regardless of `cfg(debug_assertions)`.
#[macro_export]
macro_rules! hard_abort {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        std::process::abort();
    }}
}

/// Requires `$cond`; hard-aborts the process (see [`hard_abort!`]) if
/// it does not hold, in every build profile.
#[macro_export]
macro_rules! require_state {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::hard_abort!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn require_state_passes_through_when_true() {
        // Should not abort.
        require_state!(1 + 1 == 2, "unreachable");
    }
}
