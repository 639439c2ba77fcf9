//! overlay加载与针脚文件夹查找
//!
//! 内核为针脚overlay创建的文件夹名称带有一个不确定的数字后缀（如`pwm_test_P9_14.15`），
//! 只能逐个尝试后缀来找到它

use std::path::{Path, PathBuf};

use embedded_hal::delay::DelayNs;

use super::{DeviceState, PeriodValue, PwmDevice, PwmFiles, RunValue, ramp::RampController};
use crate::{
    config::{PIN_FOLDER_PREFIX, PIN_OVERLAY_PREFIX, PWM_PREP_OVERLAY},
    error::PwmError,
    sysfs::{PathKind, SysfsAccessor},
};

impl<S: SysfsAccessor + 'static, D: DelayNs> PwmDevice<S, D> {
    /// 向插槽文件写入overlay名称，请求内核加载该设备树
    fn load_overlay(&self, overlay: &str) -> Result<(), PwmError> {
        let slots_file = &self.config.paths.slots_file;
        log::info!("请求加载overlay {} -> {}", overlay, slots_file.display());
        self.sysfs
            .write_string(slots_file, overlay)
            .map_err(|source| PwmError::OverlayLoadFailed {
                overlay: overlay.to_string(),
                path: slots_file.display().to_string(),
                source,
            })
    }

    /// 每一步只能在初始化流程的对应阶段执行
    fn expect_state(
        &self,
        allowed: &[DeviceState],
        operation: &'static str,
    ) -> Result<(), PwmError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PwmError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    /// 确保PWM子系统（am33xx_pwm）已加载
    ///
    /// - 标记文件存在则直接返回
    /// - 否则请求加载am33xx_pwm，等待后再次检查标记文件
    /// - 只能在`Addressable`状态下执行
    pub fn ensure_subsystem_loaded(&mut self) -> Result<(), PwmError> {
        self.expect_state(&[DeviceState::Addressable], "检查PWM子系统")?;
        let modalias_file = self.config.paths.modalias_file.clone();
        if self.sysfs.path_exists_as(&modalias_file, PathKind::File) {
            log::debug!("PWM子系统已加载: {}", modalias_file.display());
            return Ok(());
        }

        self.load_overlay(PWM_PREP_OVERLAY)?;
        self.delay.delay_ms(self.config.settle_delay_ms);

        if self.sysfs.path_exists_as(&modalias_file, PathKind::File) {
            // OK
            Ok(())
        } else {
            Err(PwmError::SubsystemUnavailable {
                path: modalias_file.display().to_string(),
            })
        }
    }

    /// 第`suffix`个候选针脚文件夹
    fn pin_folder_candidate(&self, suffix: u32) -> Result<PathBuf, PwmError> {
        let (block_num, pin_num) = self.address()?;
        Ok(self.config.paths.device_dir.join(format!(
            "{}P{}_{}.{}",
            PIN_FOLDER_PREFIX, block_num, pin_num, suffix
        )))
    }

    /// 按后缀从小到大查找针脚文件夹
    ///
    /// - 返回消耗的尝试次数，1表示第一次就找到
    /// - 返回值等于最大尝试次数表示没有找到
    /// - 只能在PWM子系统就绪之后、针脚文件夹找到之前执行
    pub fn discover_pin_folder(&mut self) -> Result<u32, PwmError> {
        self.expect_state(
            &[DeviceState::SubsystemChecked, DeviceState::ActivatingOverlay],
            "查找针脚文件夹",
        )?;
        let retries = self.config.retries;
        for suffix in 1..=retries {
            let candidate = self.pin_folder_candidate(suffix)?;
            if self.sysfs.path_exists_as(&candidate, PathKind::Directory) {
                log::trace!("第{}次查找命中: {}", suffix, candidate.display());
                // 最后一次才命中与没有找到无法区分，按没有找到处理
                if suffix < retries {
                    log::info!("找到针脚文件夹: {}", candidate.display());
                    self.pin_folder = Some(candidate);
                }
                return Ok(suffix);
            }
        }
        log::debug!("尝试{}次后仍未找到针脚文件夹", retries);
        // 没有找到
        Ok(retries)
    }

    /// 启用针脚
    ///
    /// - 找不到针脚文件夹时请求加载`bone_pwm_P<块>_<针脚>`，等待后再找一次
    /// - 第二次仍然找不到就是致命错误
    /// - 只能在`SubsystemChecked`状态下执行
    pub fn activate_pin(&mut self) -> Result<(), PwmError> {
        self.expect_state(&[DeviceState::SubsystemChecked], "启用针脚")?;
        let retries = self.config.retries;
        if self.discover_pin_folder()? < retries {
            return Ok(());
        }

        let (block_num, pin_num) = self.address()?;
        let overlay = format!("{}P{}_{}", PIN_OVERLAY_PREFIX, block_num, pin_num);
        self.state = DeviceState::ActivatingOverlay;
        self.load_overlay(&overlay)?;
        // 等待内核生成针脚文件夹
        self.delay.delay_ms(self.config.settle_delay_ms);

        let attempts = self.discover_pin_folder()?;
        if attempts < retries {
            // OK
            Ok(())
        } else {
            Err(PwmError::PinActivationFailed {
                overlay,
                pattern: self
                    .config
                    .paths
                    .device_dir
                    .join(format!("{}P{}_{}.<n>", PIN_FOLDER_PREFIX, block_num, pin_num))
                    .display()
                    .to_string(),
                attempts,
            })
        }
    }

    /// 读取一个控制文件中的整数
    fn read_value(&self, path: &Path) -> Result<u32, PwmError> {
        let content = self
            .sysfs
            .read_string(path)
            .map_err(|source| PwmError::Io {
                operation: "读取",
                path: path.display().to_string(),
                source,
            })?;

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(PwmError::InitialValueLoadFailed {
                path: path.display().to_string(),
                reason: "文件内容为空".to_string(),
            });
        }
        trimmed
            .parse::<u32>()
            .map_err(|err| PwmError::InitialValueLoadFailed {
                path: path.display().to_string(),
                reason: format!("无法解析数值{:?}: {}", trimmed, err),
            })
    }

    /// 生成控制文件路径，并从硬件读取当前的占空比、周期值和运行值
    ///
    /// - 只能在`PinFound`状态下执行，`Ready`设备重新读取会替换掉正在运行的渐变
    pub fn load_initial_values(&mut self) -> Result<(), PwmError> {
        self.expect_state(&[DeviceState::PinFound], "读取初始值")?;
        let (block_num, pin_num) = self.address()?;
        let Some(folder) = self.pin_folder.clone() else {
            return Err(PwmError::InvalidState {
                state: self.state,
                operation: "读取初始值",
            });
        };
        let files = PwmFiles::new(folder);

        // 占空比
        let duty_value = self.read_value(&files.duty_file)?;
        if duty_value == 0 && self.config.reject_zero_duty {
            return Err(PwmError::InitialValueLoadFailed {
                path: files.duty_file.display().to_string(),
                reason: "占空比为0".to_string(),
            });
        }

        // 周期值，0(INACTIVE)视为失败
        let raw_period = self.read_value(&files.period_file)?;
        let period_value = match PeriodValue::try_from(raw_period) {
            Ok(PeriodValue::Inactive) => {
                return Err(PwmError::InitialValueLoadFailed {
                    path: files.period_file.display().to_string(),
                    reason: "周期值为0".to_string(),
                });
            }
            Ok(period_value) => period_value,
            Err(err) => {
                return Err(PwmError::InitialValueLoadFailed {
                    path: files.period_file.display().to_string(),
                    reason: err.to_string(),
                });
            }
        };

        // 运行值
        let raw_run = self.read_value(&files.run_file)?;
        let run_value = i32::try_from(raw_run)
            .ok()
            .and_then(|value| RunValue::try_from(value).ok())
            .ok_or_else(|| PwmError::InitialValueLoadFailed {
                path: files.run_file.display().to_string(),
                reason: format!("非法的运行值{}, 只能是0或1", raw_run),
            })?;

        // 目标占空比初始与当前占空比一致，不会触发渐变
        self.ramp = Some(RampController::new(
            self.sysfs.clone(),
            files.duty_file.clone(),
            self.config.step_smooth,
            format!("pwm-ramp-P{}_{}", block_num, pin_num),
            duty_value,
        ));
        self.period_value = period_value;
        self.run_value = run_value;
        self.files = Some(files);
        // OK
        Ok(())
    }
}
