//! Wire property keys and typed value enums
//!
//! The protocol addresses device state as a flat bag of short property
//! keys. [`Property`] enumerates every key this library tracks; the value
//! enums give the integer codes stable names.

use crate::error::{Error, Result};

/// A device state property and its wire key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Power,
    Mode,
    TargetTemperature,
    SensorTemperature,
    TemperatureUnit,
    TemperatureBit,
    FanSpeed,
    FreshAir,
    XFan,
    Anion,
    Sleep,
    SleepMode,
    Light,
    HorizontalSwing,
    VerticalSwing,
    Quiet,
    Turbo,
    SteadyHeat,
    PowerSave,
    HeatCoolType,
    DehumidifierMode,
    TargetHumidity,
    HumiditySensor,
    CleanFilter,
    WaterFull,
}

impl Property {
    /// Every property polled by a full status request
    pub const ALL: [Property; 25] = [
        Property::Power,
        Property::Mode,
        Property::TargetTemperature,
        Property::SensorTemperature,
        Property::TemperatureUnit,
        Property::TemperatureBit,
        Property::FanSpeed,
        Property::FreshAir,
        Property::XFan,
        Property::Anion,
        Property::Sleep,
        Property::SleepMode,
        Property::Light,
        Property::HorizontalSwing,
        Property::VerticalSwing,
        Property::Quiet,
        Property::Turbo,
        Property::SteadyHeat,
        Property::PowerSave,
        Property::HeatCoolType,
        Property::DehumidifierMode,
        Property::TargetHumidity,
        Property::HumiditySensor,
        Property::CleanFilter,
        Property::WaterFull,
    ];

    /// Short key used on the wire
    pub const fn wire_name(self) -> &'static str {
        match self {
            Property::Power => "Pow",
            Property::Mode => "Mod",
            Property::TargetTemperature => "SetTem",
            Property::SensorTemperature => "TemSen",
            Property::TemperatureUnit => "TemUn",
            Property::TemperatureBit => "TemRec",
            Property::FanSpeed => "WdSpd",
            Property::FreshAir => "Air",
            Property::XFan => "Blo",
            Property::Anion => "Health",
            Property::Sleep => "SwhSlp",
            Property::SleepMode => "SlpMod",
            Property::Light => "Lig",
            Property::HorizontalSwing => "SwingLfRig",
            Property::VerticalSwing => "SwUpDn",
            Property::Quiet => "Quiet",
            Property::Turbo => "Tur",
            Property::SteadyHeat => "StHt",
            Property::PowerSave => "SvSt",
            Property::HeatCoolType => "HeatCoolType",
            Property::DehumidifierMode => "Dmod",
            Property::TargetHumidity => "Dwet",
            Property::HumiditySensor => "DwatSen",
            Property::CleanFilter => "Dfltr",
            Property::WaterFull => "DwatFul",
        }
    }
}

/// Firmware id key, fetched by a dedicated status request rather than the
/// full poll
pub const FIRMWARE_ID_KEY: &str = "hid";

/// Operating mode codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum Mode {
    Auto = 0,
    Cool = 1,
    Dry = 2,
    Fan = 3,
    Heat = 4,
}

impl TryFrom<i64> for Mode {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Cool),
            2 => Ok(Self::Dry),
            3 => Ok(Self::Fan),
            4 => Ok(Self::Heat),
            _ => Err(Error::OutOfRange(format!("mode {value}"))),
        }
    }
}

/// Fan speed codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum FanSpeed {
    Auto = 0,
    Low = 1,
    MediumLow = 2,
    Medium = 3,
    MediumHigh = 4,
    High = 5,
}

impl TryFrom<i64> for FanSpeed {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Low),
            2 => Ok(Self::MediumLow),
            3 => Ok(Self::Medium),
            4 => Ok(Self::MediumHigh),
            5 => Ok(Self::High),
            _ => Err(Error::OutOfRange(format!("fan speed {value}"))),
        }
    }
}

/// Horizontal louver positions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum HorizontalSwing {
    Default = 0,
    FullSwing = 1,
    Left = 2,
    LeftCenter = 3,
    Center = 4,
    RightCenter = 5,
    Right = 6,
}

impl TryFrom<i64> for HorizontalSwing {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::FullSwing),
            2 => Ok(Self::Left),
            3 => Ok(Self::LeftCenter),
            4 => Ok(Self::Center),
            5 => Ok(Self::RightCenter),
            6 => Ok(Self::Right),
            _ => Err(Error::OutOfRange(format!("horizontal swing {value}"))),
        }
    }
}

/// Vertical louver positions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum VerticalSwing {
    Default = 0,
    FullSwing = 1,
    FixedUpper = 2,
    FixedUpperMiddle = 3,
    FixedMiddle = 4,
    FixedLowerMiddle = 5,
    FixedLower = 6,
    SwingUpper = 7,
    SwingUpperMiddle = 8,
    SwingMiddle = 9,
    SwingLowerMiddle = 10,
    SwingLower = 11,
}

impl TryFrom<i64> for VerticalSwing {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::FullSwing),
            2 => Ok(Self::FixedUpper),
            3 => Ok(Self::FixedUpperMiddle),
            4 => Ok(Self::FixedMiddle),
            5 => Ok(Self::FixedLowerMiddle),
            6 => Ok(Self::FixedLower),
            7 => Ok(Self::SwingUpper),
            8 => Ok(Self::SwingUpperMiddle),
            9 => Ok(Self::SwingMiddle),
            10 => Ok(Self::SwingLowerMiddle),
            11 => Ok(Self::SwingLower),
            _ => Err(Error::OutOfRange(format!("vertical swing {value}"))),
        }
    }
}

/// Temperature display unit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i64)]
pub enum TemperatureUnit {
    #[default]
    Celsius = 0,
    Fahrenheit = 1,
}

impl TryFrom<i64> for TemperatureUnit {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Celsius),
            1 => Ok(Self::Fahrenheit),
            _ => Err(Error::OutOfRange(format!("temperature unit {value}"))),
        }
    }
}
