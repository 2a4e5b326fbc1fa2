//! Library-wide logging switch.
//!
//! Core code logs through the `asm_*` macros. A front-end that owns the process output
//! (a stdio protocol transport, for example) can mute the whole library with [`disable`].

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

#[doc(hidden)]
#[macro_export]
macro_rules! _asm_log {
    ($log_fn: path, target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            $log_fn!(target: $target, $($arg)+)
        }
    };
    ($log_fn: path, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            $log_fn!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! asm_info {
    ($($arg:tt)+) => { $crate::_asm_log!(::log::info, $($arg)+) };
}

#[macro_export]
macro_rules! asm_warn {
    ($($arg:tt)+) => { $crate::_asm_log!(::log::warn, $($arg)+) };
}

#[macro_export]
macro_rules! asm_error {
    ($($arg:tt)+) => { $crate::_asm_log!(::log::error, $($arg)+) };
}

#[macro_export]
macro_rules! asm_debug {
    ($($arg:tt)+) => { $crate::_asm_log!(::log::debug, $($arg)+) };
}
