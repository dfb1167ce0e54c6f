pub mod decode;
pub mod processor;
