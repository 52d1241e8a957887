//! Device identity presented to the service.

use std::fmt;

/// The device kinds the service recognises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(clippy::upper_case_acronyms)]
pub enum DeviceType {
    DESKTOPWIN,
    DESKTOPMAC,
    CHROMEOS,
    ANDROID,
    IOS,
    IOSIPAD,
    WATCHOS,
    WEAROS,
}

impl DeviceType {
    pub const ALL: [DeviceType; 8] = [
        Self::DESKTOPWIN, Self::DESKTOPMAC, Self::CHROMEOS, Self::ANDROID,
        Self::IOS, Self::IOSIPAD, Self::WATCHOS, Self::WEAROS,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DESKTOPWIN => "DESKTOPWIN",
            Self::DESKTOPMAC => "DESKTOPMAC",
            Self::CHROMEOS   => "CHROMEOS",
            Self::ANDROID    => "ANDROID",
            Self::IOS        => "IOS",
            Self::IOSIPAD    => "IOSIPAD",
            Self::WATCHOS    => "WATCHOS",
            Self::WEAROS     => "WEAROS",
        }
    }

    /// Device types an account lives on. Refreshing a token issued to one
    /// of them ends the session on the phone itself.
    pub fn is_primary(self) -> bool {
        matches!(self, Self::ANDROID | Self::IOS)
    }

    pub fn system_name(self) -> &'static str {
        match self {
            Self::DESKTOPWIN => "WINDOWS",
            Self::DESKTOPMAC => "MAC",
            Self::CHROMEOS   => "Chrome_OS",
            Self::ANDROID    => "Android OS",
            Self::IOS | Self::IOSIPAD => "iOS",
            Self::WATCHOS    => "Watch OS",
            Self::WEAROS     => "Wear OS",
        }
    }

    pub fn default_system_version(self) -> &'static str {
        match self {
            Self::DESKTOPWIN => "10.0.0-NT-x64",
            Self::CHROMEOS   => "1",
            _ => "12.1.4",
        }
    }

    pub fn default_app_version(self) -> &'static str {
        match self {
            Self::DESKTOPWIN => "9.2.0.3403",
            Self::DESKTOPMAC => "9.2.0.3402",
            Self::CHROMEOS   => "3.0.3",
            Self::ANDROID | Self::WEAROS => "13.4.1",
            Self::IOS | Self::IOSIPAD | Self::WATCHOS => "15.19.0",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown device type {s:?}"))
    }
}

/// Who this client claims to be. Fixed for the life of a [`crate::Client`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    pub device_type:    DeviceType,
    /// Stable name for this device, shown in the account's device list.
    pub device_id:      String,
    pub app_version:    String,
    pub system_version: String,
    /// Value of the language header.
    pub locale:         String,
}

impl DeviceIdentity {
    /// Defaults for `device_type`, named `device_id`.
    pub fn new(device_type: DeviceType, device_id: impl Into<String>) -> Self {
        Self {
            device_type,
            device_id:      device_id.into(),
            app_version:    device_type.default_app_version().to_string(),
            system_version: device_type.default_system_version().to_string(),
            locale:         "ja_JP".to_string(),
        }
    }

    pub fn with_app_version(mut self, v: impl Into<String>) -> Self {
        self.app_version = v.into();
        self
    }

    pub fn system_name(&self) -> &'static str {
        self.device_type.system_name()
    }

    /// `TYPE\tapp-version\tsystem-name\tsystem-version`
    pub fn application_header(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.device_type, self.app_version, self.system_name(), self.system_version
        )
    }

    pub fn user_agent(&self) -> String {
        format!("Line/{}", self.app_version)
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(DeviceType::DESKTOPWIN, "legy")
    }
}
