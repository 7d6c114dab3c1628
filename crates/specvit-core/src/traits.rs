//! Точка расширения для позиционного кодирования.
//!
//! Модель не знает, как именно кодируются позиции: она принимает любую
//! реализацию [`PositionalEncoding`] и применяет её к последовательности
//! токенов (и к label-токенам в режиме encoder-decoder).

use std::fmt::Debug;

use candle_core::{Result, Tensor};

/// Injects position information into a token sequence.
///
/// Implementations receive `[batch, seq_len, hidden]` and must return a tensor
/// of exactly the same shape.
pub trait PositionalEncoding: Debug + Send + Sync {
    /// Короткое имя стратегии (для логов).
    fn name(&self) -> &str;

    /// Add position information to `xs`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor>;

    /// Mode-aware variant, for encodings that carry their own dropout.
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        self.forward(xs)
    }
}

impl<T: PositionalEncoding + ?Sized> PositionalEncoding for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        (**self).forward(xs)
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        (**self).forward_t(xs, train)
    }
}
