//! 模板渲染
//!
//! 内置 rathole 配置与 systemd unit 模板，可通过 `TEMPLATE_DIR` 覆盖。

use std::path::Path;

use tera::{Context, Tera};
use tracing::info;

pub const SERVER_TEMPLATE: &str = "server.toml";
pub const CLIENT_TEMPLATE: &str = "client.toml";
pub const UNIT_TEMPLATE: &str = "rathole.service";

const EMBEDDED: [(&str, &str); 3] = [
    (SERVER_TEMPLATE, include_str!("../../templates/server.toml.tera")),
    (CLIENT_TEMPLATE, include_str!("../../templates/client.toml.tera")),
    (UNIT_TEMPLATE, include_str!("../../templates/rathole.service.tera")),
];

/// 命名模板集合
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// 仅使用内置模板
    pub fn embedded() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(EMBEDDED)?;
        Ok(Self { tera })
    }

    /// 内置模板 + 目录覆盖（`<dir>/<name>.tera`）
    pub fn with_overrides(dir: &Path) -> Result<Self, tera::Error> {
        let mut engine = Self::embedded()?;
        for (name, _) in EMBEDDED {
            let path = dir.join(format!("{}.tera", name));
            if !path.is_file() {
                continue;
            }
            let source = std::fs::read_to_string(&path).map_err(|e| {
                tera::Error::chain(format!("failed to read {}", path.display()), e)
            })?;
            engine.tera.add_raw_template(name, &source)?;
            info!(template = %name, path = %path.display(), "Loaded template override");
        }
        Ok(engine)
    }

    /// 直接注册模板（主要用于测试）
    pub fn add_raw(&mut self, name: &str, source: &str) -> Result<(), tera::Error> {
        self.tera.add_raw_template(name, source)
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        self.tera.render(name, context)
    }
}
