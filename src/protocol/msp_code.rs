//! Well-known MSP command codes.

pub const MSP_API_VERSION: u8 = 1;
pub const MSP_FC_VARIANT: u8 = 2;
pub const MSP_FC_VERSION: u8 = 3;
pub const MSP_BOARD_INFO: u8 = 4;
pub const MSP_BUILD_INFO: u8 = 5;
pub const MSP_BATTERY_CONFIG: u8 = 32;
pub const MSP_VOLTAGE_METER_CONFIG: u8 = 56;
pub const MSP_IDENT: u8 = 100;
pub const MSP_STATUS: u8 = 101;
pub const MSP_RC: u8 = 105;
pub const MSP_RAW_GPS: u8 = 106;
pub const MSP_ATTITUDE: u8 = 108;
pub const MSP_ALTITUDE: u8 = 109;
pub const MSP_ANALOG: u8 = 110;
pub const MSP_BOXNAMES: u8 = 116;
pub const MSP_SET_RAW_RC: u8 = 200;
