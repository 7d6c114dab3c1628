//! Выбор вычислительного устройства.
//!
//! Устройство задаётся строкой (`cpu`, `cuda`, `cuda:1`, `metal`, `metal:0`)
//! и разрешается в [`candle_core::Device`] один раз при построении модели.

use std::fmt;
use std::str::FromStr;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VitError, VitResult};

/// Target compute device for model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceKind {
    /// Создать candle-устройство.
    pub fn to_device(self) -> VitResult<Device> {
        debug!(device = %self, "Creating device");
        match self {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda(ordinal) => Ok(Device::new_cuda(ordinal)?),
            DeviceKind::Metal(ordinal) => {
                // candle может panic при инициализации Metal, если устройство недоступно.
                // Панику ловим, а hook временно глушим, чтобы не засорять stderr.
                let prev_hook = std::panic::take_hook();
                std::panic::set_hook(Box::new(|_| {}));
                let res = std::panic::catch_unwind(|| Device::new_metal(ordinal));
                std::panic::set_hook(prev_hook);

                match res {
                    Ok(Ok(dev)) => Ok(dev),
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(VitError::config(
                        "Metal initialisation is unavailable here, try --device cpu",
                    )),
                }
            }
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda(i) => write!(f, "cuda:{i}"),
            DeviceKind::Metal(i) => write!(f, "metal:{i}"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = VitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (name, ordinal) = match s.split_once(':') {
            Some((name, idx)) => {
                let idx = idx
                    .parse::<usize>()
                    .map_err(|_| VitError::config(format!("invalid device ordinal in {s:?}")))?;
                (name.to_string(), idx)
            }
            None => (s.clone(), 0),
        };
        match name.as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" | "gpu" => Ok(DeviceKind::Cuda(ordinal)),
            "metal" | "mps" => Ok(DeviceKind::Metal(ordinal)),
            other => Err(VitError::config(format!("unknown device {other:?}"))),
        }
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = VitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceKind> for String {
    fn from(value: DeviceKind) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        assert_eq!("cpu".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert_eq!("cuda".parse::<DeviceKind>().unwrap(), DeviceKind::Cuda(0));
        assert_eq!("CUDA:2".parse::<DeviceKind>().unwrap(), DeviceKind::Cuda(2));
        assert_eq!("mps".parse::<DeviceKind>().unwrap(), DeviceKind::Metal(0));
        assert!("tpu".parse::<DeviceKind>().is_err());
        assert!("cuda:x".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&DeviceKind::Metal(1)).unwrap();
        assert_eq!(json, "\"metal:1\"");
        let back: DeviceKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DeviceKind::Metal(1));
    }

    #[test]
    fn test_cpu_device() {
        let device = DeviceKind::Cpu.to_device().unwrap();
        assert!(device.is_cpu());
    }
}
