//! 占空比渐变
//!
//! 每个设备最多只有一个后台线程在写占空比文件。
//! 渐变进行中修改目标值时，线程在下一步就会朝新的目标移动。

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use crate::{error::PwmError, sysfs::SysfsAccessor};

/// 从`duty`朝`target`移动一步
///
/// - 剩余距离不超过一步时直接等于目标值
pub fn next_duty(duty: u32, target: u32, step: u32) -> u32 {
    if duty.abs_diff(target) <= step {
        target
    } else if duty < target {
        duty + step
    } else {
        duty - step
    }
}

/// 渐变线程与设备共享的状态
#[derive(Debug)]
struct RampState {
    duty_value: u32,
    target_speed: u32,
    /// 是否有渐变线程正在运行
    worker_active: bool,
}

impl RampState {
    /// 前进一步，已经收敛时返回None
    ///
    /// - 每次都使用当前的目标值，而不是渐变开始时的目标值
    fn advance(&mut self, step: u32) -> Option<u32> {
        if self.duty_value == self.target_speed {
            None
        } else {
            self.duty_value = next_duty(self.duty_value, self.target_speed, step);
            Some(self.duty_value)
        }
    }
}

/// 状态以及`worker_active`变为false时的通知
#[derive(Debug)]
struct RampShared {
    state: Mutex<RampState>,
    idle: Condvar,
}

impl RampShared {
    fn lock(&self) -> MutexGuard<'_, RampState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在持有锁的情况下标记线程已退出并唤醒等待者
    fn mark_idle(&self, state: &mut RampState) {
        state.worker_active = false;
        self.idle.notify_all();
    }
}

/// 渐变线程异常退出时清除`worker_active`，否则设备再也无法启动新的渐变
struct PanicGuard<'a> {
    shared: &'a RampShared,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        // 正常退出时已经在判断收敛的同一把锁内清除过，这里不能再改，否则可能覆盖新线程的标记
        if thread::panicking() {
            let mut state = self.shared.lock();
            self.shared.mark_idle(&mut state);
        }
    }
}

/// 占空比渐变控制器
pub(crate) struct RampController<S: SysfsAccessor + 'static> {
    sysfs: Arc<S>,
    duty_file: PathBuf,
    step: u32,
    /// 线程名称
    name: String,
    shared: Arc<RampShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SysfsAccessor + 'static> RampController<S> {
    /// 创建控制器，目标值与当前占空比一致
    pub(crate) fn new(
        sysfs: Arc<S>,
        duty_file: PathBuf,
        step: u32,
        name: String,
        duty_value: u32,
    ) -> Self {
        Self {
            sysfs,
            duty_file,
            step,
            name,
            shared: Arc::new(RampShared {
                state: Mutex::new(RampState {
                    duty_value,
                    target_speed: duty_value,
                    worker_active: false,
                }),
                idle: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn duty_value(&self) -> u32 {
        self.shared.lock().duty_value
    }

    pub(crate) fn target_speed(&self) -> u32 {
        self.shared.lock().target_speed
    }

    /// 设置目标值
    ///
    /// - 已有渐变线程时只更新目标值，由该线程继续完成
    /// - 没有渐变线程且尚未收敛时启动新线程
    pub(crate) fn set_target_speed(&self, target_speed: u32) -> Result<(), PwmError> {
        {
            let mut state = self.shared.lock();
            state.target_speed = target_speed;
            if state.worker_active {
                log::debug!("{} 目标值改为{}", self.name, target_speed);
                return Ok(());
            }
            if state.duty_value == target_speed {
                return Ok(());
            }
            state.worker_active = true;
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        // 上一个线程已经决定退出，回收即可
        if let Some(finished) = worker.take() {
            if finished.join().is_err() {
                log::error!("{} 上一个渐变线程异常退出", self.name);
            }
        }

        let sysfs = self.sysfs.clone();
        let duty_file = self.duty_file.clone();
        let shared = self.shared.clone();
        let step = self.step;
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_ramp(sysfs.as_ref(), &duty_file, step, &shared, &name));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                // OK
                Ok(())
            }
            Err(source) => {
                let mut state = self.shared.lock();
                self.shared.mark_idle(&mut state);
                Err(PwmError::RampSpawnFailed { source })
            }
        }
    }

    /// 等待占空比收敛、渐变线程退出
    ///
    /// - 以`worker_active`为准，即使另一个调用者刚启动线程、还没保存线程句柄也会等待
    pub(crate) fn wait_idle(&self) {
        {
            let mut state = self.shared.lock();
            while state.worker_active {
                state = self
                    .shared
                    .idle
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        // 回收已经结束的线程
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    log::error!("{} 渐变线程异常退出", self.name);
                }
            }
        }
    }
}

/// 渐变线程主循环
///
/// - 每一步在锁内计算，锁外写文件
/// - 写入失败只记录日志，继续下一步
/// - 是否退出与`worker_active`在同一把锁内决定，保证不会丢失目标值的更新
fn run_ramp<S: SysfsAccessor>(
    sysfs: &S,
    duty_file: &Path,
    step: u32,
    shared: &RampShared,
    name: &str,
) {
    let _guard = PanicGuard { shared };
    loop {
        let duty_value = {
            let mut state = shared.lock();
            match state.advance(step) {
                Some(duty_value) => duty_value,
                None => {
                    shared.mark_idle(&mut state);
                    log::debug!("{} 占空比已收敛到{}", name, state.duty_value);
                    return;
                }
            }
        };

        match sysfs.write_string(duty_file, &duty_value.to_string()) {
            Ok(()) => log::trace!("{} duty={}", name, duty_value),
            Err(err) => log::warn!(
                "{} 写入占空比{}到{}失败: {}",
                name,
                duty_value,
                duty_file.display(),
                err
            ),
        }
    }
}
