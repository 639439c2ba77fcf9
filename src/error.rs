use std::io;

use derive_more::{Display, Error};

use crate::device::DeviceState;

/// PWM设备错误
///
/// - 初始化阶段（overlay加载、文件夹查找、初始值读取）的错误都是致命的，设备会进入`Failed`状态
/// - 占空比渐变阶段的写入错误只记录日志，不会出现在这里
#[derive(Debug, Display, Error)]
pub enum PwmError {
    /// 尚未设置针脚块或针脚号
    #[display("PWM设备未配置针脚块或针脚号")]
    NotConfigured,

    /// 当前状态不允许该操作
    #[display("PWM设备当前状态{state:?}不允许执行: {operation}")]
    InvalidState {
        state: DeviceState,
        operation: &'static str,
    },

    /// 向插槽文件写入overlay名称失败
    #[display("无法导出overlay {overlay}, 写入{path}失败: {source}")]
    OverlayLoadFailed {
        overlay: String,
        path: String,
        source: io::Error,
    },

    /// 请求加载am33xx_pwm后标记文件仍未出现
    #[display("PWM子系统不可用, 标记文件{path}不存在")]
    SubsystemUnavailable { path: String },

    /// 请求加载针脚overlay后仍然找不到针脚文件夹
    #[display("无法启用针脚overlay {overlay}, 尝试{attempts}次后仍找不到{pattern}")]
    PinActivationFailed {
        overlay: String,
        pattern: String,
        attempts: u32,
    },

    /// 初始值内容不合法
    #[display("无法加载PWM初始值, {path}: {reason}")]
    InitialValueLoadFailed { path: String, reason: String },

    /// sysfs文件读写失败
    #[display("{operation} {path} 失败: {source}")]
    Io {
        operation: &'static str,
        path: String,
        source: io::Error,
    },

    /// 运行值只能是0或1
    #[display("非法的运行值{_0}, 只能是0或1")]
    InvalidRunValue(#[error(not(source))] i32),

    /// 周期值不在STARTUP/ACTIVE/INACTIVE之中
    #[display("非法的周期值{_0}")]
    InvalidPeriodValue(#[error(not(source))] u32),

    /// 占空比步长为0
    #[display("占空比步长不能为0")]
    InvalidStepSize,

    /// 查找次数为0
    #[display("针脚文件夹查找次数不能为0")]
    InvalidRetries,

    /// 无法创建占空比渐变线程
    #[display("无法创建占空比渐变线程: {source}")]
    RampSpawnFailed { source: io::Error },
}
