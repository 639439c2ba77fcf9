use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

/// 路径类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// 普通文件
    File,
    /// 文件夹
    Directory,
}

/// sysfs读写能力
///
/// - 所有操作都是同步阻塞的
/// - 占空比渐变线程会在另一个线程里使用同一个实例，所以需要`Send + Sync`
pub trait SysfsAccessor: Send + Sync {
    /// 以只写方式打开文件并写入全部内容
    fn write_string(&self, path: &Path, content: &str) -> io::Result<()>;

    /// 读取文件全部内容
    fn read_string(&self, path: &Path) -> io::Result<String>;

    /// 检查路径是否存在且为指定类型，不会返回错误
    fn path_exists_as(&self, path: &Path, kind: PathKind) -> bool;
}

/// 基于标准库文件操作的sysfs实现
#[derive(Debug, Default, Clone, Copy)]
pub struct StdSysfs;

impl StdSysfs {
    pub fn new() -> Self {
        Self
    }
}

impl SysfsAccessor for StdSysfs {
    fn write_string(&self, path: &Path, content: &str) -> io::Result<()> {
        // 不创建文件，sysfs控制文件必须已经存在
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        // sysfs属性文件需要一次写完，写入长度不足视为失败
        let written = file.write(content.as_bytes())?;
        if written != content.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("只写入了{}/{}字节", written, content.len()),
            ));
        }
        // OK
        Ok(())
    }

    fn read_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn path_exists_as(&self, path: &Path, kind: PathKind) -> bool {
        match fs::metadata(path) {
            Ok(meta) => match kind {
                PathKind::File => meta.is_file(),
                PathKind::Directory => meta.is_dir(),
            },
            Err(_) => false,
        }
    }
}
