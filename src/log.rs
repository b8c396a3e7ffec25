#[collapse_debuginfo(yes)]
macro_rules! debug {
        ($($arg:tt)*) => {
            #[cfg(feature = "defmt")]
            {
                defmt::debug!($($arg)*);
            }
            #[cfg(feature = "log")]
            {
                ::log::debug!($($arg)*);
            }
        }
    }
pub(crate) use debug;

#[collapse_debuginfo(yes)]
macro_rules! info {
        ($($arg:tt)*) => {
            #[cfg(feature = "defmt")]
            {
                defmt::info!($($arg)*);
            }
            #[cfg(feature = "log")]
            {
                ::log::info!($($arg)*);
            }
        }
    }
pub(crate) use info;

#[collapse_debuginfo(yes)]
macro_rules! warni {
        ($($arg:tt)*) => {
            #[cfg(feature = "defmt")]
            {
                defmt::warn!($($arg)*);
            }
            #[cfg(feature = "log")]
            {
                ::log::warn!($($arg)*);
            }
        }
    }
pub(crate) use warni as warn;
