pub mod backend;
pub mod checkpoint;
pub mod model_manager;
#[cfg(feature = "onnx")]
pub mod onnx;
