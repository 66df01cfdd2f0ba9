use std::{env, error::Error, fmt::Display};

use pager::{PagerConfig, TlbPolicy};

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => {
                write!(f, "invalid value for {}: {:?}", key, value)
            }
        }
    }
}

impl Error for ConfigError {}

/// Runtime settings of the kernel around the pager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Frames handed to the pager, starting at frame 0.
    pub frames: u32,
    pub tlb_size: usize,
    pub tlb_policy: TlbPolicy,
    pub swap_name: String,
    /// Stack pages given to every loaded program.
    pub stack_pages: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            frames: 16,
            tlb_size: 4,
            tlb_policy: TlbPolicy::Random,
            swap_name: String::from("swap"),
            stack_pages: 8,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

impl KernelConfig {
    /// Reads `VM_FRAMES`, `VM_TLB_SIZE`, `VM_TLB_POLICY`, `VM_SWAP_NAME` and
    /// `VM_STACK_PAGES`, keeping the default for every unset variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup("VM_FRAMES") {
            config.frames = parse("VM_FRAMES", value)?;
        }
        if let Some(value) = lookup("VM_TLB_SIZE") {
            config.tlb_size = match parse("VM_TLB_SIZE", value.clone())? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: "VM_TLB_SIZE",
                        value,
                    })
                }
                size => size,
            };
        }
        if let Some(value) = lookup("VM_TLB_POLICY") {
            config.tlb_policy = parse("VM_TLB_POLICY", value)?;
        }
        if let Some(value) = lookup("VM_SWAP_NAME") {
            if value.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "VM_SWAP_NAME",
                    value,
                });
            }
            config.swap_name = value;
        }
        if let Some(value) = lookup("VM_STACK_PAGES") {
            config.stack_pages = parse("VM_STACK_PAGES", value)?;
        }
        Ok(config)
    }

    pub fn pager(&self) -> PagerConfig {
        PagerConfig {
            tlb_size: self.tlb_size,
            tlb_policy: self.tlb_policy,
        }
    }
}
