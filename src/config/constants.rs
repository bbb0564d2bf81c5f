//! 常量

/// rathole v0.5.0 (x86_64 linux)
pub const RATHOLE_DOWNLOAD_URL: &str =
    "https://github.com/rapiz1/rathole/releases/download/v0.5.0/rathole-x86_64-unknown-linux-gnu.zip";

/// rathole 服务端控制通道默认端口
pub const RATHOLE_BIND_PORT: u16 = 2333;

/// 远程主机上的二进制路径
pub const RATHOLE_BIN_PATH: &str = "/usr/local/bin/rathole";

/// 远程主机上的配置目录
pub const RATHOLE_CONFIG_DIR: &str = "/etc/rathole";

/// systemd unit 目录
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
