use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read the device id")]
    InvalidDeviceId,
    #[error("failed to access device: permission denied")]
    PermissionDenied,
    #[error("no device in RCM mode available")]
    NoDevice,
    #[error("payload already injected")]
    AlreadyInjected,
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
}

impl Error {
    /// Stable numeric code for the single-line failure report the
    /// watcher prints when an injection attempt goes wrong.
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidDeviceId => 0x1,
            Error::PermissionDenied => 0x2,
            Error::NoDevice => 0x3,
            Error::AlreadyInjected => 0x4,
            Error::Usb(_) => 0x5,
        }
    }
}
