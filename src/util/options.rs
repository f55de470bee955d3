//! Runtime options for the managed heap.
//!
//! Each option has a typed default and can be overridden from an environment
//! variable at [`Options::from_env`] time. An override that fails to parse or
//! fails validation is logged and ignored, keeping the default.

use std::fmt::Debug;
use std::str::FromStr;
use strum_macros::EnumString;

/// Which write barrier the engine compiles stores with. The Steele barrier is
/// required for incremental collection; with `None`, every collection is a
/// full collection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString)]
pub enum WriteBarrierKind {
    None,
    Steele,
}

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $ty:ty [env = $env:literal] [$validator:expr] = $default:expr;)*) => {
        /// The set of options for the heap and collector.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $ty,)*
        }

        impl Default for Options {
            fn default() -> Self {
                Options {
                    $($name: $default,)*
                }
            }
        }

        impl Options {
            /// Create options from the defaults, applying any environment
            /// variable overrides.
            pub fn from_env() -> Self {
                let mut options = Options::default();
                $(
                    if let Ok(raw) = std::env::var($env) {
                        options.set_from_str(stringify!($name), $env, &raw);
                    }
                )*
                options
            }

            fn set_from_str(&mut self, name: &str, env: &str, raw: &str) {
                match name {
                    $(stringify!($name) => {
                        match <$ty as FromStr>::from_str(raw) {
                            Ok(val) if ($validator)(&val) => self.$name = val,
                            Ok(val) => warn!(
                                "Invalid value {:?} for {} (from {}), keeping default",
                                val, name, env
                            ),
                            Err(_) => warn!(
                                "Failed to parse {:?} for {} (from {}), keeping default",
                                raw, name, env
                            ),
                        }
                    })*
                    _ => unreachable!(),
                }
            }
        }
    };
}

options! {
    /// Run a full collection before every allocation. Used for testing; this
    /// is extremely slow.
    aggressive_gc: bool [env = "KITE_GC_AGGRESSIVE"] [always_valid] = false;
    /// Dump collection statistics (timings, fragmentation map) on every GC.
    gc_stats: bool [env = "KITE_GC_STATS"] [always_valid] = false;
    /// Max overallocation by the GC, in percent of live memory. A collection
    /// is triggered when used * gc_overallocation < total * 100.
    gc_overallocation: usize [env = "KITE_GC_OVERALLOCATION"] [|v: &usize| *v >= 100] = 200;
    /// Force a full collection after this many consecutive incremental
    /// cycles. A safety valve against pathological barrier traffic.
    incremental_cycle_cap: usize [env = "KITE_GC_INCREMENTAL_CAP"] [|v: &usize| *v >= 1] = 16;
    /// The write barrier compiled into stores.
    write_barrier: WriteBarrierKind [env = "KITE_WRITE_BARRIER"] [always_valid] = WriteBarrierKind::Steele;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(!options.aggressive_gc);
        assert!(!options.gc_stats);
        assert_eq!(options.gc_overallocation, 200);
        assert_eq!(options.incremental_cycle_cap, 16);
        assert_eq!(options.write_barrier, WriteBarrierKind::Steele);
    }

    #[test]
    fn invalid_value_keeps_default() {
        let mut options = Options::default();
        options.set_from_str("gc_overallocation", "KITE_GC_OVERALLOCATION", "50");
        assert_eq!(options.gc_overallocation, 200);
        options.set_from_str("gc_overallocation", "KITE_GC_OVERALLOCATION", "300");
        assert_eq!(options.gc_overallocation, 300);
    }

    #[test]
    fn parse_barrier_kind() {
        let mut options = Options::default();
        options.set_from_str("write_barrier", "KITE_WRITE_BARRIER", "None");
        assert_eq!(options.write_barrier, WriteBarrierKind::None);
    }
}
