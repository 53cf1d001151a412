pub mod audio;
#[cfg(feature = "devices")]
pub mod device;
