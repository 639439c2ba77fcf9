use std::fmt::Debug;

use embedded_hal::delay::DelayNs;
use embedded_hal_0::PwmPin;

use crate::{
    device::{PwmDevice, RunValue},
    error::PwmError,
    sysfs::SysfsAccessor,
};

#[derive(Debug)]
pub enum PwmWapperError {
    Pwm(PwmError),
}

impl embedded_hal::pwm::Error for PwmWapperError {
    fn kind(&self) -> embedded_hal::pwm::ErrorKind {
        embedded_hal::pwm::ErrorKind::Other
    }
}

impl std::fmt::Display for PwmWapperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for PwmWapperError {}

/// PWM Wapper
///
/// - 让BeagleBone的PWM设备可以直接交给基于embedded-hal(1.0和0.2)编写的驱动使用
/// - 设置占空比时走渐变，而不是立即写入
pub struct PwmWapper<S: SysfsAccessor + 'static, D: DelayNs> {
    device: PwmDevice<S, D>,
}

impl<S: SysfsAccessor + 'static, D: DelayNs> PwmWapper<S, D> {
    /// 设备需要已经初始化完成
    pub fn new(device: PwmDevice<S, D>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &PwmDevice<S, D> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut PwmDevice<S, D> {
        &mut self.device
    }

    pub fn into_inner(self) -> PwmDevice<S, D> {
        self.device
    }

    /// 把`duty / max`换算为以当前周期为满量程的占空比
    fn scale_to_period(&self, duty: u16, max: u16) -> u32 {
        let period = u64::from(self.device.period_value().as_u32());
        // period不超过u32，duty/max不超过1，结果一定在u32范围内
        (period * u64::from(duty) / u64::from(max.max(1))) as u32
    }
}

impl<S: SysfsAccessor + 'static, D: DelayNs> embedded_hal::pwm::ErrorType for PwmWapper<S, D> {
    type Error = PwmWapperError;
}

impl<S: SysfsAccessor + 'static, D: DelayNs> embedded_hal::pwm::SetDutyCycle for PwmWapper<S, D> {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        let target_speed = self.scale_to_period(duty, self.max_duty_cycle());
        self.device
            .set_target_speed(target_speed)
            .map_err(PwmWapperError::Pwm)?;
        Ok(())
    }
}

/// embedded-hal 0.2 的接口没有返回值，失败时只能记录日志
impl<S: SysfsAccessor + 'static, D: DelayNs> PwmPin for PwmWapper<S, D> {
    type Duty = u32;

    fn disable(&mut self) {
        if let Err(err) = self.device.set_run_value(RunValue::Off.as_i32()) {
            log::error!("关闭PWM输出失败: {}", err);
        }
    }

    fn enable(&mut self) {
        if let Err(err) = self.device.set_run_value(RunValue::On.as_i32()) {
            log::error!("开启PWM输出失败: {}", err);
        }
    }

    fn get_duty(&self) -> Self::Duty {
        self.device.duty_value()
    }

    fn get_max_duty(&self) -> Self::Duty {
        self.device.period_value().as_u32()
    }

    fn set_duty(&mut self, duty: Self::Duty) {
        if let Err(err) = self.device.set_target_speed(duty) {
            log::error!("设置目标占空比{}失败: {}", duty, err);
        }
    }
}
