//! BeagleBone Black PWM 设备
//!
//! 设备的生命周期：
//! - 创建后处于`Unconfigured`状态
//! - 设置针脚块和针脚号后变为`Addressable`
//! - [`PwmDevice::init`]执行overlay加载、针脚文件夹查找、初始值读取，成功后进入`Ready`，任何一步失败都进入`Failed`
//! - 只有`Ready`状态下才能调整周期、运行值和目标占空比

pub mod ramp;
pub mod sequencer;

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use embedded_hal::delay::DelayNs;

use crate::{
    config::PwmConfig,
    error::PwmError,
    std_delay::StdDelay,
    sysfs::{StdSysfs, SysfsAccessor},
};

use ramp::RampController;

/// 针脚块（USB口朝向自己时，P9在左侧，P8在右侧）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockNum {
    P8 = 8,
    P9 = 9,
}

/// 支持PWM输出的针脚号，需要时可以继续扩展
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinNum {
    Pwm14 = 14,
    Pwm19 = 19,
    Pwm22 = 22,
    Pwm42 = 42,
}

impl fmt::Display for BlockNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

impl fmt::Display for PinNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// 周期值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodValue {
    /// 启动
    Startup = 1_200_000,
    /// 运行
    Active = 1_900_000,
    /// 停用
    Inactive = 0,
}

impl PeriodValue {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for PeriodValue {
    type Error = PwmError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1_200_000 => Ok(Self::Startup),
            1_900_000 => Ok(Self::Active),
            0 => Ok(Self::Inactive),
            other => Err(PwmError::InvalidPeriodValue(other)),
        }
    }
}

/// 运行值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunValue {
    Off = 0,
    On = 1,
}

impl RunValue {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for RunValue {
    type Error = PwmError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(PwmError::InvalidRunValue(other)),
        }
    }
}

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// 未设置针脚块或针脚号
    Unconfigured,
    /// 已设置针脚块和针脚号
    Addressable,
    /// PWM子系统已就绪
    SubsystemChecked,
    /// 正在加载针脚overlay
    ActivatingOverlay,
    /// 已找到针脚文件夹
    PinFound,
    /// 可以使用
    Ready,
    /// 初始化失败，设备不可再使用
    Failed,
}

/// 针脚文件夹内的控制文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PwmFiles {
    pub(crate) overlay_folder: PathBuf,
    pub(crate) period_file: PathBuf,
    pub(crate) duty_file: PathBuf,
    pub(crate) run_file: PathBuf,
}

impl PwmFiles {
    fn new(overlay_folder: PathBuf) -> Self {
        Self {
            period_file: overlay_folder.join("period"),
            duty_file: overlay_folder.join("duty"),
            run_file: overlay_folder.join("run"),
            overlay_folder,
        }
    }
}

/// BeagleBone Black 单个PWM针脚封装对象
pub struct PwmDevice<S: SysfsAccessor + 'static, D: DelayNs> {
    /// sysfs读写句柄，与占空比渐变线程共享
    sysfs: Arc<S>,
    /// overlay加载后的等待
    delay: D,
    config: PwmConfig,
    block_num: Option<BlockNum>,
    pin_num: Option<PinNum>,
    state: DeviceState,
    /// 查找到的针脚文件夹，`load_initial_values`之前可能已经有值
    pin_folder: Option<PathBuf>,
    /// 只有`Ready`之后才有值
    files: Option<PwmFiles>,
    period_value: PeriodValue,
    run_value: RunValue,
    /// 只有`Ready`之后才有值，持有占空比和目标占空比
    ramp: Option<RampController<S>>,
}

impl PwmDevice<StdSysfs, StdDelay> {
    /// 使用默认配置打开真实硬件上的PWM针脚并完成初始化
    pub fn open(block_num: BlockNum, pin_num: PinNum) -> Result<Self, PwmError> {
        Self::open_with_config(block_num, pin_num, PwmConfig::default())
    }

    /// 使用指定配置打开真实硬件上的PWM针脚并完成初始化
    pub fn open_with_config(
        block_num: BlockNum,
        pin_num: PinNum,
        config: PwmConfig,
    ) -> Result<Self, PwmError> {
        let mut device = Self::new(Arc::new(StdSysfs::new()), StdDelay::new(), config)?;
        device.set_block_num(block_num)?;
        device.set_pin_num(pin_num)?;
        device.init()?;
        // OK
        Ok(device)
    }
}

impl<S: SysfsAccessor + 'static, D: DelayNs> PwmDevice<S, D> {
    /// 创建未配置的PWM设备实例
    pub fn new(sysfs: Arc<S>, delay: D, config: PwmConfig) -> Result<Self, PwmError> {
        config.validate()?;
        // OK
        Ok(Self {
            sysfs,
            delay,
            config,
            block_num: None,
            pin_num: None,
            state: DeviceState::Unconfigured,
            pin_folder: None,
            files: None,
            period_value: PeriodValue::Inactive,
            run_value: RunValue::Off,
            ramp: None,
        })
    }

    /// 针脚块和针脚号都设置后进入`Addressable`
    fn update_addressable(&mut self) {
        if self.block_num.is_some() && self.pin_num.is_some() {
            self.state = DeviceState::Addressable;
        }
    }

    /// 初始化开始后不允许再修改针脚
    fn ensure_pin_editable(&self, operation: &'static str) -> Result<(), PwmError> {
        match self.state {
            DeviceState::Unconfigured | DeviceState::Addressable => Ok(()),
            state => Err(PwmError::InvalidState { state, operation }),
        }
    }

    /// 设置针脚块
    pub fn set_block_num(&mut self, block_num: BlockNum) -> Result<(), PwmError> {
        self.ensure_pin_editable("设置针脚块")?;
        self.block_num = Some(block_num);
        self.update_addressable();
        // OK
        Ok(())
    }

    /// 设置针脚号
    pub fn set_pin_num(&mut self, pin_num: PinNum) -> Result<(), PwmError> {
        self.ensure_pin_editable("设置针脚号")?;
        self.pin_num = Some(pin_num);
        self.update_addressable();
        // OK
        Ok(())
    }

    pub fn block_num(&self) -> Option<BlockNum> {
        self.block_num
    }

    pub fn pin_num(&self) -> Option<PinNum> {
        self.pin_num
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn config(&self) -> &PwmConfig {
        &self.config
    }

    /// 获取已配置的针脚块和针脚号
    fn address(&self) -> Result<(BlockNum, PinNum), PwmError> {
        match (self.block_num, self.pin_num) {
            (Some(block_num), Some(pin_num)) => Ok((block_num, pin_num)),
            _ => Err(PwmError::NotConfigured),
        }
    }

    /// 初始化设备
    ///
    /// - 只能在`Addressable`状态下执行一次
    /// - 失败后设备进入`Failed`状态，之后的操作都会返回错误
    pub fn init(&mut self) -> Result<(), PwmError> {
        match self.state {
            DeviceState::Addressable => {}
            DeviceState::Unconfigured => return Err(PwmError::NotConfigured),
            state => {
                return Err(PwmError::InvalidState {
                    state,
                    operation: "初始化",
                });
            }
        }

        match self.run_sequence() {
            Ok(()) => {
                self.state = DeviceState::Ready;
                log::info!(
                    "PWM P{} 初始化完成, duty={}, period={}, run={}",
                    self.address_label(),
                    self.duty_value(),
                    self.period_value.as_u32(),
                    self.run_value.as_i32()
                );
                // OK
                Ok(())
            }
            Err(err) => {
                log::error!("PWM P{} 初始化失败: {}", self.address_label(), err);
                self.state = DeviceState::Failed;
                self.files = None;
                self.ramp = None;
                Err(err)
            }
        }
    }

    /// 依次执行：检查PWM子系统 -> 启用针脚 -> 读取初始值
    fn run_sequence(&mut self) -> Result<(), PwmError> {
        self.ensure_subsystem_loaded()?;
        self.state = DeviceState::SubsystemChecked;
        self.activate_pin()?;
        self.state = DeviceState::PinFound;
        self.load_initial_values()
    }

    /// 形如`9_14`，未配置时为`?_?`
    fn address_label(&self) -> String {
        let block = self.block_num.map_or("?".to_string(), |b| b.to_string());
        let pin = self.pin_num.map_or("?".to_string(), |p| p.to_string());
        format!("{}_{}", block, pin)
    }

    fn ready_files(&self, operation: &'static str) -> Result<&PwmFiles, PwmError> {
        match (self.state, &self.files) {
            (DeviceState::Ready, Some(files)) => Ok(files),
            (state, _) => Err(PwmError::InvalidState { state, operation }),
        }
    }

    fn ready_ramp(&self, operation: &'static str) -> Result<&RampController<S>, PwmError> {
        match (self.state, &self.ramp) {
            (DeviceState::Ready, Some(ramp)) => Ok(ramp),
            (state, _) => Err(PwmError::InvalidState { state, operation }),
        }
    }

    /// 写入控制文件
    fn write_value(&self, path: &Path, value: &str) -> Result<(), PwmError> {
        self.sysfs
            .write_string(path, value)
            .map_err(|source| PwmError::Io {
                operation: "写入",
                path: path.display().to_string(),
                source,
            })
    }

    /// 设置并写入周期值
    pub fn set_period_value(&mut self, period_value: PeriodValue) -> Result<(), PwmError> {
        let period_file = self.ready_files("设置周期值")?.period_file.clone();
        self.write_value(&period_file, &period_value.as_u32().to_string())?;
        self.period_value = period_value;
        // OK
        Ok(())
    }

    /// 设置并写入运行值
    ///
    /// - 只接受0和1，其他值直接返回错误，不会写入文件
    pub fn set_run_value(&mut self, run_value: i32) -> Result<(), PwmError> {
        let run_value = RunValue::try_from(run_value)?;
        let run_file = self.ready_files("设置运行值")?.run_file.clone();
        self.write_value(&run_file, &run_value.as_i32().to_string())?;
        self.run_value = run_value;
        // OK
        Ok(())
    }

    /// 设置目标占空比，后台线程会逐步把当前占空比调整到目标值
    ///
    /// - 渐变进行中再次调用会直接改变正在进行的渐变的目标，不会产生第二个写入线程
    pub fn set_target_speed(&self, target_speed: u32) -> Result<(), PwmError> {
        self.ready_ramp("设置目标占空比")?.set_target_speed(target_speed)
    }

    /// 阻塞等待当前的占空比渐变完成
    pub fn wait_ramp_idle(&self) {
        if let Some(ramp) = &self.ramp {
            ramp.wait_idle();
        }
    }

    /// 当前占空比，`Ready`之前为0
    pub fn duty_value(&self) -> u32 {
        self.ramp.as_ref().map_or(0, RampController::duty_value)
    }

    /// 目标占空比，`Ready`之前为0
    pub fn target_speed(&self) -> u32 {
        self.ramp.as_ref().map_or(0, RampController::target_speed)
    }

    pub fn period_value(&self) -> PeriodValue {
        self.period_value
    }

    pub fn run_value(&self) -> RunValue {
        self.run_value
    }

    pub fn overlay_folder(&self) -> Option<&Path> {
        self.files.as_ref().map(|files| files.overlay_folder.as_path())
    }

    pub fn period_file(&self) -> Option<&Path> {
        self.files.as_ref().map(|files| files.period_file.as_path())
    }

    pub fn duty_file(&self) -> Option<&Path> {
        self.files.as_ref().map(|files| files.duty_file.as_path())
    }

    pub fn run_file(&self) -> Option<&Path> {
        self.files.as_ref().map(|files| files.run_file.as_path())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{config::SysfsPaths, std_delay::mock::CountingDelay, sysfs::mock::MockSysfs};

    pub(crate) const ROOT: &str = "/fake";

    pub(crate) fn paths() -> SysfsPaths {
        SysfsPaths::with_root(ROOT)
    }

    pub(crate) fn pin_folder(block: u8, pin: u8, suffix: u32) -> PathBuf {
        paths()
            .device_dir
            .join(format!("pwm_test_P{}_{}.{}", block, pin, suffix))
    }

    /// 带插槽文件的空sysfs
    pub(crate) fn bare_sysfs() -> Arc<MockSysfs> {
        let sysfs = Arc::new(MockSysfs::new());
        sysfs.add_file(paths().slots_file, "");
        sysfs
    }

    /// 往sysfs里放一个已导出的针脚文件夹
    pub(crate) fn add_pin_folder(sysfs: &MockSysfs, folder: &Path, duty: &str, period: &str, run: &str) {
        sysfs.add_dir(folder);
        sysfs.add_file(folder.join("duty"), duty);
        sysfs.add_file(folder.join("period"), period);
        sysfs.add_file(folder.join("run"), run);
    }

    pub(crate) fn device(
        sysfs: &Arc<MockSysfs>,
        config: PwmConfig,
    ) -> PwmDevice<MockSysfs, CountingDelay> {
        let mut device = PwmDevice::new(sysfs.clone(), CountingDelay::new(), config).unwrap();
        device.set_block_num(BlockNum::P9).unwrap();
        device.set_pin_num(PinNum::Pwm14).unwrap();
        device
    }

    pub(crate) fn config() -> PwmConfig {
        PwmConfig::default().with_paths(paths()).with_step_smooth(50_000)
    }

    /// 已经处于`Ready`状态的P9_14，占空比500000
    pub(crate) fn ready_device(sysfs: &Arc<MockSysfs>) -> PwmDevice<MockSysfs, CountingDelay> {
        sysfs.add_file(paths().modalias_file, "platform:omap-pwmss\n");
        add_pin_folder(sysfs, &pin_folder(9, 14, 1), "500000\n", "1900000\n", "1\n");
        let mut device = device(sysfs, config());
        device.init().unwrap();
        device
    }

    #[test]
    fn becomes_addressable_once_block_and_pin_are_set() {
        let sysfs = bare_sysfs();
        let mut device = PwmDevice::new(sysfs, CountingDelay::new(), config()).unwrap();
        assert_eq!(device.state(), DeviceState::Unconfigured);
        device.set_block_num(BlockNum::P8).unwrap();
        assert_eq!(device.state(), DeviceState::Unconfigured);
        device.set_pin_num(PinNum::Pwm19).unwrap();
        assert_eq!(device.state(), DeviceState::Addressable);
        assert_eq!(device.block_num(), Some(BlockNum::P8));
        assert_eq!(device.pin_num(), Some(PinNum::Pwm19));
    }

    #[test]
    fn init_without_pin_is_rejected() {
        let sysfs = bare_sysfs();
        let mut device = PwmDevice::new(sysfs.clone(), CountingDelay::new(), config()).unwrap();
        device.set_block_num(BlockNum::P9).unwrap();
        assert!(matches!(device.init(), Err(PwmError::NotConfigured)));
        assert!(sysfs.writes().is_empty());
    }

    #[test]
    fn ready_device_exposes_loaded_values_and_paths() {
        let sysfs = bare_sysfs();
        let device = ready_device(&sysfs);
        let folder = pin_folder(9, 14, 1);

        assert_eq!(device.state(), DeviceState::Ready);
        assert_eq!(device.duty_value(), 500_000);
        assert_eq!(device.target_speed(), 500_000);
        assert_eq!(device.period_value(), PeriodValue::Active);
        assert_eq!(device.run_value(), RunValue::On);
        assert_eq!(device.overlay_folder(), Some(folder.as_path()));
        assert_eq!(device.duty_file(), Some(folder.join("duty").as_path()));
        assert_eq!(device.period_file(), Some(folder.join("period").as_path()));
        assert_eq!(device.run_file(), Some(folder.join("run").as_path()));
        // 初始化过程不写入任何控制文件
        assert!(sysfs.writes().is_empty());
    }

    #[test]
    fn paths_are_hidden_before_ready() {
        let sysfs = bare_sysfs();
        let device = device(&sysfs, config());
        assert_eq!(device.overlay_folder(), None);
        assert_eq!(device.duty_file(), None);
        assert_eq!(device.duty_value(), 0);
    }

    #[test]
    fn init_twice_is_rejected() {
        let sysfs = bare_sysfs();
        let mut device = ready_device(&sysfs);
        assert!(matches!(
            device.init(),
            Err(PwmError::InvalidState {
                state: DeviceState::Ready,
                ..
            })
        ));
        assert!(device.set_pin_num(PinNum::Pwm22).is_err());
    }

    #[test]
    fn invalid_run_value_is_rejected_without_writing() {
        let sysfs = bare_sysfs();
        let mut device = ready_device(&sysfs);

        assert!(matches!(
            device.set_run_value(2),
            Err(PwmError::InvalidRunValue(2))
        ));
        assert!(matches!(
            device.set_run_value(-1),
            Err(PwmError::InvalidRunValue(-1))
        ));
        assert!(sysfs.writes().is_empty());
        assert_eq!(device.run_value(), RunValue::On);
    }

    #[test]
    fn run_value_is_written_to_run_file() {
        let sysfs = bare_sysfs();
        let mut device = ready_device(&sysfs);

        device.set_run_value(0).unwrap();
        let folder = pin_folder(9, 14, 1);
        assert_eq!(sysfs.writes(), vec![(folder.join("run"), "0".to_string())]);
        assert_eq!(device.run_value(), RunValue::Off);
    }

    #[test]
    fn period_value_is_written_to_period_file() {
        let sysfs = bare_sysfs();
        let mut device = ready_device(&sysfs);

        device.set_period_value(PeriodValue::Startup).unwrap();
        let period_file = pin_folder(9, 14, 1).join("period");
        assert_eq!(sysfs.writes_to(&period_file), vec!["1200000".to_string()]);
        assert_eq!(device.period_value(), PeriodValue::Startup);
    }

    #[test]
    fn failed_period_write_keeps_previous_value() {
        let sysfs = bare_sysfs();
        let mut device = ready_device(&sysfs);
        sysfs.fail_writes_to(pin_folder(9, 14, 1).join("period"));

        assert!(matches!(
            device.set_period_value(PeriodValue::Inactive),
            Err(PwmError::Io { .. })
        ));
        assert_eq!(device.period_value(), PeriodValue::Active);
    }

    #[test]
    fn setters_require_ready_state() {
        let sysfs = bare_sysfs();
        let mut device = device(&sysfs, config());

        assert!(matches!(
            device.set_target_speed(800_000),
            Err(PwmError::InvalidState {
                state: DeviceState::Addressable,
                ..
            })
        ));
        assert!(device.set_run_value(1).is_err());
        assert!(device.set_period_value(PeriodValue::Active).is_err());
        assert!(sysfs.writes().is_empty());
    }

    #[test]
    fn period_and_run_values_convert_from_numbers() {
        assert_eq!(PeriodValue::try_from(1_200_000).unwrap(), PeriodValue::Startup);
        assert_eq!(PeriodValue::try_from(1_900_000).unwrap(), PeriodValue::Active);
        assert_eq!(PeriodValue::try_from(0).unwrap(), PeriodValue::Inactive);
        assert!(PeriodValue::try_from(1_000_000).is_err());
        assert_eq!(RunValue::try_from(1).unwrap(), RunValue::On);
        assert_eq!(RunValue::try_from(0).unwrap(), RunValue::Off);
    }
}
