//! BeagleBone Black PWM 针脚控制
//!
//! 通过sysfs加载设备树overlay、查找针脚控制文件，并在后台线程中平滑地调整占空比

pub mod config;
pub mod device;
pub mod error;
pub mod pwm_wapper;
pub mod std_delay;
pub mod sysfs;

pub use device::{BlockNum, DeviceState, PeriodValue, PinNum, PwmDevice, RunValue};
pub use error::PwmError;
