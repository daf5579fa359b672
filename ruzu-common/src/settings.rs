// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use ini::{Ini, Properties};
use log::{debug, info, warn};

/// INI section holding the GPU front-end keys.
pub const GPU_SECTION: &str = "Gpu";

/// GPU front-end settings, populated from config INI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuSettings {
    // Decoder
    pub fast_inline_data: bool,
    pub fast_uniform_update: bool,

    // Waits
    pub command_wait_timeout_ms: u64,
    pub syncpoint_wait_timeout_ms: u64,
    pub semaphore_acquire_timeout_ms: u64,

    // Fetch
    pub initial_flush_skips: u32,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            fast_inline_data: true,
            fast_uniform_update: true,
            command_wait_timeout_ms: 8,
            syncpoint_wait_timeout_ms: 1000,
            semaphore_acquire_timeout_ms: 1000,
            initial_flush_skips: 0,
        }
    }
}

impl GpuSettings {
    pub fn command_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.command_wait_timeout_ms)
    }

    pub fn syncpoint_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.syncpoint_wait_timeout_ms)
    }

    pub fn semaphore_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.semaphore_acquire_timeout_ms)
    }

    /// Load settings from an INI file, failing if it cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        info!("Loading GPU config from: {}", path.display());
        let conf = Ini::load_from_file(path)
            .with_context(|| format!("failed to parse GPU config {}", path.display()))?;
        Ok(Self::from_ini(&conf))
    }

    /// Load settings from an INI file, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No GPU config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from_file(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{:#}", e);
                Self::default()
            }
        }
    }

    /// Build settings from a parsed INI document. Missing keys keep their
    /// default value.
    pub fn from_ini(conf: &Ini) -> Self {
        let mut settings = Self::default();

        let Some(section) = conf.section(Some(GPU_SECTION)) else {
            debug!("GPU config has no [{}] section", GPU_SECTION);
            return settings;
        };

        read_bool(section, "fast_inline_data", &mut settings.fast_inline_data);
        read_bool(section, "fast_uniform_update", &mut settings.fast_uniform_update);
        read_num(section, "command_wait_timeout_ms", &mut settings.command_wait_timeout_ms);
        read_num(section, "syncpoint_wait_timeout_ms", &mut settings.syncpoint_wait_timeout_ms);
        read_num(
            section,
            "semaphore_acquire_timeout_ms",
            &mut settings.semaphore_acquire_timeout_ms,
        );
        read_num(section, "initial_flush_skips", &mut settings.initial_flush_skips);

        debug!("GPU settings: {:?}", settings);
        settings
    }
}

fn read_bool(section: &Properties, key: &str, out: &mut bool) {
    let Some(raw) = section.get(key) else {
        return;
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => *out = true,
        "false" | "0" => *out = false,
        other => warn!("Invalid value '{}' for {}, keeping {}", other, key, out),
    }
}

fn read_num<T>(section: &Properties, key: &str, out: &mut T)
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(raw) = section.get(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *out = v,
        Err(_) => warn!("Invalid value '{}' for {}, keeping {}", raw.trim(), key, out),
    }
}
