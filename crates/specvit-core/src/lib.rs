//! # specvit-core
//!
//! Базовые типы, трейты и определения ошибок для SpecViT.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Общие типы данных (`AudioBuffer`, `Spectrogram`)
//! - Конфигурация mel-экстрактора и выбор устройства (`DeviceKind`)
//! - Унифицированная обработка ошибок через `VitError`
//! - Trait [`PositionalEncoding`]: точка расширения для позиционного кодирования

pub mod config;
pub mod device;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{FeatureExtractorConfig, LogType, MelNormalization, MelScale};
pub use device::DeviceKind;
pub use error::{VitError, VitResult};
pub use traits::PositionalEncoding;
pub use types::{AudioBuffer, Spectrogram};
