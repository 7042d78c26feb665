//! Model backends and checkpoint management

pub mod fetch;
pub mod onnx;

pub use fetch::ModelFetcher;
pub use onnx::OnnxSamBackend;
