//! Kernel log macros
//!
//! Zero cost unless the `defmt` feature is enabled, in which case each level
//! forwards to the matching `defmt` macro. Arguments must implement
//! `defmt::Format`.
//!
//! Author: Moroya Sakamoto

macro_rules! kinfo {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::info!($($arg)*);
    }};
}

macro_rules! kwarn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)*);
    }};
}

macro_rules! kerror {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::error!($($arg)*);
    }};
}

macro_rules! kdebug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);
    }};
}

macro_rules! ktrace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
    }};
}

pub(crate) use {kdebug, kerror, kinfo, ktrace, kwarn};
