//! BeagleBone Black PWM 相关的硬件常量与配置
//!
//! 所有sysfs路径集中在这里，测试时可以通过[`SysfsPaths::with_root`]整体替换到临时目录下

use std::path::{Path, PathBuf};

use crate::error::PwmError;

/// 设备树插槽控制文件，向其写入overlay名称即可加载对应的设备树
pub const SLOTS_FILE: &str = "/sys/devices/bone_capemgr.9/slots";
/// 导出的PWM overlay文件夹所在目录
pub const DEVICE_DIR: &str = "/sys/devices/ocp.3";
/// am33xx_pwm加载成功后才会出现的标记文件
pub const MODALIAS_FILE: &str = "/sys/devices/ocp.3/48300000.epwmss/modalias";
/// 加载任何PWM针脚前必须先加载的基础overlay
pub const PWM_PREP_OVERLAY: &str = "am33xx_pwm";
/// 针脚overlay名称前缀，完整名称形如`bone_pwm_P9_14`
pub const PIN_OVERLAY_PREFIX: &str = "bone_pwm_";
/// 针脚文件夹名称前缀，完整名称形如`pwm_test_P9_14.15`
pub const PIN_FOLDER_PREFIX: &str = "pwm_test_";

/// 查找针脚文件夹后缀的最大尝试次数（系统追加的后缀通常为1~99）
pub const RETRIES: u32 = 100;
/// 每一步调整占空比的幅度
pub const MOTOR_STEPSMOOTH: u32 = 10_000;
/// 请求加载overlay后等待系统生成文件的时间（毫秒）
pub const SETTLE_DELAY_MS: u32 = 1000;

/// sysfs路径表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsPaths {
    /// 插槽控制文件
    pub slots_file: PathBuf,
    /// overlay文件夹所在目录
    pub device_dir: PathBuf,
    /// PWM子系统标记文件
    pub modalias_file: PathBuf,
}

impl Default for SysfsPaths {
    fn default() -> Self {
        Self {
            slots_file: PathBuf::from(SLOTS_FILE),
            device_dir: PathBuf::from(DEVICE_DIR),
            modalias_file: PathBuf::from(MODALIAS_FILE),
        }
    }
}

impl SysfsPaths {
    /// 把默认路径整体挂到`root`目录下（`/sys/...` -> `<root>/sys/...`）
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let rebase = |path: &str| root.join(path.trim_start_matches('/'));
        Self {
            slots_file: rebase(SLOTS_FILE),
            device_dir: rebase(DEVICE_DIR),
            modalias_file: rebase(MODALIAS_FILE),
        }
    }
}

/// PWM设备配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwmConfig {
    /// sysfs路径
    pub paths: SysfsPaths,
    /// 查找针脚文件夹的最大尝试次数
    pub retries: u32,
    /// 占空比每步调整幅度
    pub step_smooth: u32,
    /// 加载overlay后的等待时间（毫秒）
    pub settle_delay_ms: u32,
    /// 初始化时读到占空比为0是否视为失败
    ///
    /// - 新刷机的板子第一次启用PWM时占空比就是0，这种情况需要关闭该选项
    pub reject_zero_duty: bool,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            paths: SysfsPaths::default(),
            retries: RETRIES,
            step_smooth: MOTOR_STEPSMOOTH,
            settle_delay_ms: SETTLE_DELAY_MS,
            reject_zero_duty: true,
        }
    }
}

impl PwmConfig {
    pub fn with_paths(mut self, paths: SysfsPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_step_smooth(mut self, step_smooth: u32) -> Self {
        self.step_smooth = step_smooth;
        self
    }

    pub fn with_settle_delay_ms(mut self, settle_delay_ms: u32) -> Self {
        self.settle_delay_ms = settle_delay_ms;
        self
    }

    pub fn with_reject_zero_duty(mut self, reject_zero_duty: bool) -> Self {
        self.reject_zero_duty = reject_zero_duty;
        self
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<(), PwmError> {
        // 步长为0时占空比永远无法收敛
        if self.step_smooth == 0 {
            return Err(PwmError::InvalidStepSize);
        }
        if self.retries == 0 {
            return Err(PwmError::InvalidRetries);
        }
        // OK
        Ok(())
    }
}
