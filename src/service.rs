use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

const SERVICE_PATH: &str = "/etc/systemd/system/dzapd.service";
const CONFIG_DIR: &str = "/etc/dzapd";
const CONFIG_PATH: &str = "/etc/dzapd/config.toml";

const SERVICE_TEMPLATE: &str = r#"[Unit]
Description=DZap Sanitization Daemon
After=network.target

[Service]
Type=simple
ExecStart={binary_path} daemon --config /etc/dzapd/config.toml
Restart=always
RestartSec=5

StartLimitBurst=5
StartLimitIntervalSec=60

[Install]
WantedBy=multi-user.target
"#;

pub struct ServiceManager {
    service_path: PathBuf,
    config_path: PathBuf,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            service_path: PathBuf::from(SERVICE_PATH),
            config_path: PathBuf::from(CONFIG_PATH),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.service_path.exists()
    }

    pub fn install_and_start(&self, config: &AppConfig) -> Result<()> {
        self.write_config(config)?;
        self.write_service_file()?;
        self.daemon_reload()?;
        self.enable()?;
        self.start()?;
        Ok(())
    }

    fn write_config(&self, config: &AppConfig) -> Result<()> {
        std::fs::create_dir_all(CONFIG_DIR).context("Failed to create /etc/dzapd directory")?;

        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
        std::fs::write(&self.config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn write_service_file(&self) -> Result<()> {
        let binary_path = std::env::current_exe().context("Failed to determine binary path")?;

        let service_content =
            SERVICE_TEMPLATE.replace("{binary_path}", &binary_path.display().to_string());

        std::fs::write(&self.service_path, service_content)
            .context("Failed to write service file")?;

        Ok(())
    }

    fn daemon_reload(&self) -> Result<()> {
        let status = Command::new("systemctl")
            .arg("daemon-reload")
            .status()
            .context("Failed to reload systemd")?;

        if !status.success() {
            anyhow::bail!("systemctl daemon-reload failed");
        }
        Ok(())
    }

    fn enable(&self) -> Result<()> {
        let status = Command::new("systemctl")
            .args(["enable", "dzapd"])
            .status()
            .context("Failed to enable service")?;

        if !status.success() {
            anyhow::bail!("systemctl enable dzapd failed");
        }
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let status = Command::new("systemctl")
            .args(["start", "dzapd"])
            .status()
            .context("Failed to start service")?;

        if !status.success() {
            anyhow::bail!("systemctl start dzapd failed");
        }
        Ok(())
    }
}
